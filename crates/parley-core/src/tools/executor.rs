//! Server-side tool executor trait and its boxed form.
//!
//! Same blanket-impl pattern as `BoxLlmProvider`: an RPITIT trait for
//! implementors, an object-safe twin with boxed futures, and a wrapper.

use std::future::Future;
use std::pin::Pin;

use parley_types::tool::{ToolError, ToolKind};

/// A tool the server can run within an exchange.
///
/// Implementations live in parley-infra (e.g., `WeatherTool`).
pub trait ToolExecutor: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn execute(
        &self,
        input: serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, ToolError>> + Send;
}

pub trait ToolExecutorDyn: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn execute_boxed<'a>(
        &'a self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + 'a>>;
}

impl<T: ToolExecutor> ToolExecutorDyn for T {
    fn kind(&self) -> ToolKind {
        ToolExecutor::kind(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + 'a>> {
        Box::pin(self.execute(input))
    }
}

/// Type-erased server tool.
pub struct BoxToolExecutor {
    inner: Box<dyn ToolExecutorDyn + Send + Sync>,
}

impl BoxToolExecutor {
    pub fn new<T: ToolExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub fn kind(&self) -> ToolKind {
        self.inner.kind()
    }

    pub async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        self.inner.execute_boxed(input).await
    }
}
