//! Persona to model routing.
//!
//! A pure lookup table keyed by persona id, with one contextual override:
//! requests carrying image attachments never land on a text-only model.

use std::collections::HashMap;

use parley_types::config::{GlobalConfig, PersonaRoute};
use parley_types::llm::ModelRoute;
use tracing::debug;

/// Request facts the router may consider.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteContext {
    pub has_image_attachments: bool,
}

#[derive(Debug, Clone)]
pub struct ModelRouter {
    personas: HashMap<String, PersonaRoute>,
    default_persona: String,
    vision_route: ModelRoute,
}

impl ModelRouter {
    pub fn new(
        personas: Vec<PersonaRoute>,
        default_persona: impl Into<String>,
        vision_route: ModelRoute,
    ) -> Self {
        Self {
            personas: personas
                .into_iter()
                .map(|p| (p.persona_id.clone(), p))
                .collect(),
            default_persona: default_persona.into(),
            vision_route,
        }
    }

    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(
            config.personas.clone(),
            config.default_persona.clone(),
            config.vision_route.clone(),
        )
    }

    /// Resolve a persona to a concrete route. Never fails: unknown personas
    /// use the default persona, and if that is missing too, the vision route.
    pub fn resolve(&self, persona_id: &str, context: &RouteContext) -> ModelRoute {
        let persona = self
            .personas
            .get(persona_id)
            .or_else(|| self.personas.get(&self.default_persona));

        let Some(persona) = persona else {
            debug!(persona_id, "No persona table entry; using vision route");
            return self.vision_route.clone();
        };

        if context.has_image_attachments && !persona.vision {
            debug!(
                persona_id,
                route = %self.vision_route,
                "Image attachments on a text-only persona; redirecting"
            );
            return self.vision_route.clone();
        }

        persona.route()
    }
}
