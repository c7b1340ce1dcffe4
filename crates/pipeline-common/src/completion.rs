use std::fmt::Debug;

/// Join over a fixed set of named conditions.
///
/// Each condition is set or cleared as work progresses. The barrier fires the
/// first time every condition holds simultaneously and never fires again,
/// regardless of later updates.
///
/// Semantics:
/// - Conditions not passed to [`CompletionBarrier::new`] are ignored by `set`.
/// - `set` returns `true` exactly once, on the update that completes the join.
/// - A barrier whose conditions already all hold fires on the first `set`.
#[derive(Debug, Clone)]
pub struct CompletionBarrier<C> {
    conditions: Vec<(C, bool)>,
    fired: bool,
}

impl<C> CompletionBarrier<C>
where
    C: Copy + Eq + Debug,
{
    /// Create a barrier over `conditions` with their initial state.
    pub fn new(conditions: impl IntoIterator<Item = (C, bool)>) -> Self {
        let mut list: Vec<(C, bool)> = Vec::new();
        for (condition, holds) in conditions {
            match list.iter_mut().find(|(c, _)| *c == condition) {
                Some(entry) => entry.1 = holds,
                None => list.push((condition, holds)),
            }
        }
        Self {
            conditions: list,
            fired: false,
        }
    }

    /// Update one condition. Returns `true` if this update fired the barrier.
    pub fn set(&mut self, condition: C, holds: bool) -> bool {
        if let Some(entry) = self.conditions.iter_mut().find(|(c, _)| *c == condition) {
            entry.1 = holds;
        }

        if self.fired || !self.conditions.iter().all(|(_, holds)| *holds) {
            return false;
        }

        self.fired = true;
        true
    }

    /// Current state of `condition`, `None` if unknown to this barrier.
    pub fn get(&self, condition: C) -> Option<bool> {
        self.conditions
            .iter()
            .find(|(c, _)| *c == condition)
            .map(|(_, holds)| *holds)
    }

    /// Conditions that do not currently hold.
    pub fn outstanding(&self) -> Vec<C> {
        self.conditions
            .iter()
            .filter(|(_, holds)| !*holds)
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn is_fired(&self) -> bool {
        self.fired
    }
}
