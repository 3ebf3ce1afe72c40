//! Apply run reporting

use crate::graph::Address;
use std::collections::BTreeMap;

/// Terminal outcome of one planned action
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The action completed and its state record was committed
    Succeeded,
    /// Nothing to do; state already matched
    NoOp,
    /// The provider or the state commit failed
    Failed(String),
    /// Never dispatched because an upstream action failed
    Blocked { failed_dependency: Address },
    /// Never dispatched because the run was cancelled
    Skipped,
}

impl ActionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ActionOutcome::Succeeded => "succeeded",
            ActionOutcome::NoOp => "no changes",
            ActionOutcome::Failed(_) => "failed",
            ActionOutcome::Blocked { .. } => "blocked",
            ActionOutcome::Skipped => "skipped",
        }
    }
}

/// Per-address outcomes for one apply or destroy run
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub outcomes: BTreeMap<Address, ActionOutcome>,
}

impl ApplyReport {
    pub fn record(&mut self, address: Address, outcome: ActionOutcome) {
        self.outcomes.insert(address, outcome);
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Succeeded))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::NoOp))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Failed(_)))
    }

    pub fn blocked(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Blocked { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ActionOutcome::Skipped))
    }

    /// True when at least one action did not reach a successful terminal
    /// state; the CLI maps this to its partial-apply exit code
    pub fn is_partial(&self) -> bool {
        self.failed() > 0 || self.blocked() > 0 || self.skipped() > 0
    }

    pub fn outcome(&self, address: &Address) -> Option<&ActionOutcome> {
        self.outcomes.get(address)
    }

    fn count(&self, pred: impl Fn(&ActionOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| pred(o)).count()
    }
}
