//! The step contract
//!
//! A step is one compensable unit of work inside a flight. Steps are
//! stateless; everything they read or write goes through the flight
//! context. A step's `run` may be invoked more than once for the same
//! logical execution (after a crash and resume), so implementations must
//! be idempotent or start by checking the context for evidence that their
//! work already happened.

use async_trait::async_trait;

use crate::context::FlightContext;

/// Outcome classification of a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The step's work is done; advance to the next step.
    Success,
    /// Transient failure; the engine re-invokes the step per its retry
    /// policy. Exhausting the policy is equivalent to a fatal failure.
    FailureRetry,
    /// Permanent failure; the engine switches to undoing.
    FailureFatal,
}

/// Result of one step attempt, carrying the failure cause when present.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub status: StepStatus,
    pub cause: Option<String>,
}

impl StepResult {
    pub fn success() -> Self {
        Self {
            status: StepStatus::Success,
            cause: None,
        }
    }

    pub fn retry(cause: impl Into<String>) -> Self {
        Self {
            status: StepStatus::FailureRetry,
            cause: Some(cause.into()),
        }
    }

    pub fn fatal(cause: impl Into<String>) -> Self {
        Self {
            status: StepStatus::FailureFatal,
            cause: Some(cause.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// One compensable unit of work.
///
/// `I` is the flight's immutable input; `S` is its mutable working state,
/// persisted by the engine after every successful transition.
#[async_trait]
pub trait Step<I, S>: Send + Sync
where
    I: Send + Sync,
    S: Send + Sync,
{
    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Perform the step's work. Must be safe to re-run against a
    /// partially-applied world.
    async fn run(&self, ctx: &mut FlightContext<I, S>) -> StepResult;

    /// Compensate the step's work. The default is a no-op success, for
    /// steps with no side effects to reverse.
    async fn undo(&self, _ctx: &mut FlightContext<I, S>) -> StepResult {
        StepResult::success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_result_constructors() {
        assert!(StepResult::success().is_success());
        assert!(StepResult::success().cause.is_none());

        let retry = StepResult::retry("timeout");
        assert_eq!(retry.status, StepStatus::FailureRetry);
        assert_eq!(retry.cause.as_deref(), Some("timeout"));

        let fatal = StepResult::fatal("conflict");
        assert_eq!(fatal.status, StepStatus::FailureFatal);
        assert!(!fatal.is_success());
    }
}
