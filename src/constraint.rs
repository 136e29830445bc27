//! Constraint evaluation boundary.
//!
//! The index only stores which constraint keys are attached to which job;
//! whether a key is currently satisfied (network reachable, on wifi, battery
//! not low) is answered by an external evaluator. An unmet constraint leaves
//! a job pending without counting as an attempt.

use std::{
    collections::HashSet,
    sync::RwLock,
};

/// Answers whether a named precondition currently holds.
pub trait ConstraintEvaluator: Send + Sync {
    fn is_satisfied(&self, constraint_key: &str) -> bool;
}

/// Evaluator that treats every constraint as satisfied. The default for
/// schedulers that attach no environmental preconditions.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSatisfied;

impl ConstraintEvaluator for AlwaysSatisfied {
    fn is_satisfied(&self, _constraint_key: &str) -> bool {
        true
    }
}

/// In-memory evaluator backed by a togglable set of satisfied keys.
///
/// # Examples
///
/// ```rust
/// use jobsmith::constraint::{ConstraintEvaluator, InMemoryConstraintEvaluator};
///
/// let evaluator = InMemoryConstraintEvaluator::new();
/// assert!(!evaluator.is_satisfied("network"));
///
/// evaluator.mark_satisfied("network");
/// assert!(evaluator.is_satisfied("network"));
///
/// evaluator.mark_unsatisfied("network");
/// assert!(!evaluator.is_satisfied("network"));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryConstraintEvaluator {
    satisfied: RwLock<HashSet<String>>,
}

impl InMemoryConstraintEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_satisfied(&self, constraint_key: impl Into<String>) {
        let mut satisfied = self.satisfied.write().unwrap_or_else(|e| e.into_inner());
        satisfied.insert(constraint_key.into());
    }

    pub fn mark_unsatisfied(&self, constraint_key: &str) {
        let mut satisfied = self.satisfied.write().unwrap_or_else(|e| e.into_inner());
        satisfied.remove(constraint_key);
    }
}

impl ConstraintEvaluator for InMemoryConstraintEvaluator {
    fn is_satisfied(&self, constraint_key: &str) -> bool {
        let satisfied = self.satisfied.read().unwrap_or_else(|e| e.into_inner());
        satisfied.contains(constraint_key)
    }
}
