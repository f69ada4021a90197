// src/dag/trigger.rs

//! Trigger rule evaluation over upstream task states.

use crate::dag::task_info::TaskState;
use crate::types::TriggerRule;

/// Decision for a pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Not decidable yet; some upstream task is still in flight.
    Wait,
    Run,
    Skip,
}

/// Counts of upstream states as seen over a task's incoming edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpstreamSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl UpstreamSummary {
    pub fn from_states<I: IntoIterator<Item = TaskState>>(states: I) -> Self {
        let mut summary = UpstreamSummary::default();
        for state in states {
            summary.total += 1;
            match state {
                TaskState::Success => summary.success += 1,
                TaskState::Failed => summary.failed += 1,
                TaskState::Skipped => summary.skipped += 1,
                TaskState::Pending | TaskState::Running | TaskState::Retrying => {}
            }
        }
        summary
    }

    pub fn done(&self) -> usize {
        self.success + self.failed + self.skipped
    }

    pub fn all_done(&self) -> bool {
        self.done() == self.total
    }
}

/// Decide whether a task gated by `rule` can run given its upstream states.
///
/// Tasks without upstream tasks always run.
pub fn evaluate(rule: TriggerRule, up: UpstreamSummary) -> Readiness {
    if up.total == 0 {
        return Readiness::Run;
    }

    match rule {
        TriggerRule::AllSuccess => {
            if up.failed > 0 || up.skipped > 0 {
                Readiness::Skip
            } else if up.success == up.total {
                Readiness::Run
            } else {
                Readiness::Wait
            }
        }
        TriggerRule::NoneFailed => {
            if up.failed > 0 {
                Readiness::Skip
            } else if up.all_done() {
                Readiness::Run
            } else {
                Readiness::Wait
            }
        }
        TriggerRule::NoneFailedOrSkipped => {
            if up.failed > 0 {
                Readiness::Skip
            } else if !up.all_done() {
                Readiness::Wait
            } else if up.success > 0 {
                Readiness::Run
            } else {
                Readiness::Skip
            }
        }
        TriggerRule::OneSuccess => {
            if up.success > 0 {
                Readiness::Run
            } else if up.all_done() {
                Readiness::Skip
            } else {
                Readiness::Wait
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::task_info::TaskState::*;

    fn eval(rule: TriggerRule, states: &[TaskState]) -> Readiness {
        evaluate(rule, UpstreamSummary::from_states(states.iter().copied()))
    }

    #[test]
    fn roots_always_run() {
        for rule in [
            TriggerRule::AllSuccess,
            TriggerRule::NoneFailed,
            TriggerRule::NoneFailedOrSkipped,
            TriggerRule::OneSuccess,
        ] {
            assert_eq!(eval(rule, &[]), Readiness::Run);
        }
    }

    #[test]
    fn all_success() {
        let r = TriggerRule::AllSuccess;
        assert_eq!(eval(r, &[Success, Success]), Readiness::Run);
        assert_eq!(eval(r, &[Success, Running]), Readiness::Wait);
        assert_eq!(eval(r, &[Skipped, Running]), Readiness::Skip);
        assert_eq!(eval(r, &[Failed, Success]), Readiness::Skip);
    }

    #[test]
    fn none_failed() {
        let r = TriggerRule::NoneFailed;
        assert_eq!(eval(r, &[Skipped, Skipped]), Readiness::Run);
        assert_eq!(eval(r, &[Success, Retrying]), Readiness::Wait);
        assert_eq!(eval(r, &[Failed, Pending]), Readiness::Skip);
    }

    #[test]
    fn none_failed_or_skipped_needs_one_success() {
        let r = TriggerRule::NoneFailedOrSkipped;
        assert_eq!(eval(r, &[Success, Skipped]), Readiness::Run);
        assert_eq!(eval(r, &[Skipped, Success]), Readiness::Run);
        assert_eq!(eval(r, &[Skipped, Skipped]), Readiness::Skip);
        assert_eq!(eval(r, &[Success, Pending]), Readiness::Wait);
        assert_eq!(eval(r, &[Success, Failed]), Readiness::Skip);
    }

    #[test]
    fn one_success() {
        let r = TriggerRule::OneSuccess;
        assert_eq!(eval(r, &[Success, Running]), Readiness::Run);
        assert_eq!(eval(r, &[Failed, Running]), Readiness::Wait);
        assert_eq!(eval(r, &[Failed, Skipped]), Readiness::Skip);
    }
}
