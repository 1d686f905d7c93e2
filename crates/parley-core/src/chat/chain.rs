//! Chain reconstruction.
//!
//! Turns are stored as an unordered set of rows, each pointing at the turn
//! it follows. `reconstruct` recovers the linear order by walking from the
//! root (the turn with no predecessor) through successor links.

use std::collections::{HashMap, HashSet};

use parley_types::turn::Turn;
use uuid::Uuid;

/// Order the turns of one conversation by their predecessor links.
///
/// Input order is irrelevant. Turns that are not reachable from the root
/// (orphans, or the losing side of a fork) are dropped without error. A
/// missing root yields an empty sequence, and a revisited id stops the walk.
pub fn reconstruct(turns: Vec<Turn>) -> Vec<Turn> {
    // Later duplicates for the same predecessor are ignored so the walk is
    // deterministic under any input permutation: keep the smallest id.
    let mut by_predecessor: HashMap<Option<Uuid>, Turn> = HashMap::with_capacity(turns.len());
    for turn in turns {
        match by_predecessor.get(&turn.previous_turn_id) {
            Some(existing) if existing.id <= turn.id => {}
            _ => {
                by_predecessor.insert(turn.previous_turn_id, turn);
            }
        }
    }

    let Some(root) = by_predecessor.remove(&None) else {
        return Vec::new();
    };

    let mut visited = HashSet::from([root.id]);
    let mut current_id = root.id;
    let mut chain = vec![root];

    while let Some(next) = by_predecessor.remove(&Some(current_id)) {
        if !visited.insert(next.id) {
            break;
        }
        current_id = next.id;
        chain.push(next);
    }

    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_types::turn::{SenderType, TurnMetadata, TurnPart};

    fn turn(id: u128, previous: Option<u128>) -> Turn {
        Turn {
            id: Uuid::from_u128(id),
            conversation_id: Uuid::from_u128(999),
            sender_type: if id % 2 == 1 {
                SenderType::User
            } else {
                SenderType::Assistant
            },
            content: vec![TurnPart::text(format!("turn {id}"))],
            previous_turn_id: previous.map(Uuid::from_u128),
            metadata: TurnMetadata::default(),
            created_at: Utc::now(),
        }
    }

    fn ids(turns: &[Turn]) -> Vec<u128> {
        turns.iter().map(|t| t.id.as_u128()).collect()
    }

    fn linear_chain(len: u128) -> Vec<Turn> {
        (1..=len)
            .map(|i| turn(i, if i == 1 { None } else { Some(i - 1) }))
            .collect()
    }

    #[test]
    fn test_reconstruct_ordered_input() {
        let chain = reconstruct(linear_chain(4));
        assert_eq!(ids(&chain), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_reconstruct_invariant_under_permutation() {
        let base = linear_chain(5);
        // Every rotation plus the reversal.
        let mut inputs: Vec<Vec<Turn>> = (0..base.len())
            .map(|k| {
                let mut v = base.clone();
                v.rotate_left(k);
                v
            })
            .collect();
        let mut reversed = base.clone();
        reversed.reverse();
        inputs.push(reversed);

        for input in inputs {
            assert_eq!(ids(&reconstruct(input)), vec![1, 2, 3, 4, 5]);
        }
    }

    #[test]
    fn test_reconstruct_excludes_orphan() {
        let mut turns = linear_chain(3);
        // Predecessor 42 is not in the set.
        turns.push(turn(7, Some(42)));
        let chain = reconstruct(turns);
        assert_eq!(ids(&chain), vec![1, 2, 3]);
    }

    #[test]
    fn test_reconstruct_stops_at_gap() {
        // 3 is missing, so 4 is unreachable.
        let turns = vec![turn(1, None), turn(2, Some(1)), turn(4, Some(3))];
        assert_eq!(ids(&reconstruct(turns)), vec![1, 2]);
    }

    #[test]
    fn test_reconstruct_empty_input() {
        assert!(reconstruct(Vec::new()).is_empty());
    }

    #[test]
    fn test_reconstruct_without_root_is_empty() {
        let turns = vec![turn(2, Some(1)), turn(3, Some(2))];
        assert!(reconstruct(turns).is_empty());
    }

    #[test]
    fn test_reconstruct_cycle_terminates() {
        // 1 -> 2 -> 3 -> 2 forms a loop after the root.
        let turns = vec![turn(1, None), turn(2, Some(1)), turn(3, Some(2)), turn(2, Some(3))];
        let chain = reconstruct(turns);
        assert_eq!(ids(&chain), vec![1, 2, 3]);
    }

    #[test]
    fn test_reconstruct_fork_keeps_one_branch_deterministically() {
        let a = vec![turn(1, None), turn(2, Some(1)), turn(4, Some(1)), turn(6, Some(4))];
        let mut b = a.clone();
        b.reverse();
        let first = reconstruct(a);
        let second = reconstruct(b);
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(ids(&first), vec![1, 2]);
    }

    #[test]
    fn test_reconstruct_single_root() {
        let chain = reconstruct(vec![turn(1, None)]);
        assert_eq!(ids(&chain), vec![1]);
    }
}
