//! Flight engine integration tests
//!
//! Exercises the do/undo lifecycle, retry exhaustion, crash recovery, and
//! the runner's status guarantees against the in-memory flight log.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use depot_flight::{
    Flight, FlightContext, FlightError, FlightId, FlightLog, FlightRunner, FlightStatus,
    MemoryFlightLog, RetryPolicy, Step, StepResult,
};

const POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Input {
    label: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct State {
    completed: Vec<String>,
    undone: Vec<String>,
}

/// Records its execution order in the working state; optionally fails.
struct RecordingStep {
    id: &'static str,
    fail_run: bool,
    fail_undo: bool,
}

impl RecordingStep {
    fn ok(id: &'static str) -> Self {
        Self {
            id,
            fail_run: false,
            fail_undo: false,
        }
    }

    fn failing(id: &'static str) -> Self {
        Self {
            id,
            fail_run: true,
            fail_undo: false,
        }
    }
}

#[async_trait]
impl Step<Input, State> for RecordingStep {
    fn name(&self) -> &'static str {
        self.id
    }

    async fn run(&self, ctx: &mut FlightContext<Input, State>) -> StepResult {
        if self.fail_run {
            return StepResult::fatal(format!("{} exploded", self.id));
        }
        ctx.state.completed.push(self.id.to_string());
        StepResult::success()
    }

    async fn undo(&self, ctx: &mut FlightContext<Input, State>) -> StepResult {
        if self.fail_undo {
            return StepResult::fatal(format!("{} undo exploded", self.id));
        }
        ctx.state.undone.push(self.id.to_string());
        StepResult::success()
    }
}

/// Fails with a retryable error a fixed number of times, then succeeds.
struct FlakyStep {
    attempts: Arc<AtomicU32>,
    failures_before_success: u32,
}

#[async_trait]
impl Step<Input, State> for FlakyStep {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn run(&self, ctx: &mut FlightContext<Input, State>) -> StepResult {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures_before_success {
            return StepResult::retry("transient wobble");
        }
        ctx.state.completed.push("flaky".to_string());
        StepResult::success()
    }
}

fn runner_with_log() -> (Arc<FlightRunner>, Arc<MemoryFlightLog>) {
    let log = Arc::new(MemoryFlightLog::new());
    (FlightRunner::new(log.clone(), 8), log)
}

fn input() -> Input {
    Input {
        label: "test".to_string(),
    }
}

#[tokio::test]
async fn successful_flight_runs_all_steps_in_order() {
    let (runner, _log) = runner_with_log();
    let flight = Flight::new("three-steps")
        .step(RecordingStep::ok("a"))
        .step(RecordingStep::ok("b"))
        .step(RecordingStep::ok("c"));

    let flight_id = runner.create_flight_id();
    runner
        .submit(&flight_id, flight, input(), State::default())
        .await
        .unwrap();

    let state = runner.wait(&flight_id, POLL).await.unwrap();
    assert_eq!(state.status, FlightStatus::Success);

    let result: State = state.result_as().unwrap();
    assert_eq!(result.completed, vec!["a", "b", "c"]);
    assert!(result.undone.is_empty());
}

#[tokio::test]
async fn fatal_failure_undoes_completed_steps_in_reverse() {
    let (runner, _log) = runner_with_log();
    let flight = Flight::new("undo-chain")
        .step(RecordingStep::ok("a"))
        .step(RecordingStep::ok("b"))
        .step(RecordingStep::failing("c"));

    let flight_id = runner.create_flight_id();
    runner
        .submit(&flight_id, flight, input(), State::default())
        .await
        .unwrap();

    let state = runner.wait(&flight_id, POLL).await.unwrap();
    assert_eq!(state.status, FlightStatus::Error);
    assert!(state.error.as_deref().unwrap_or_default().contains("c exploded"));

    // The failed step is undone too, then the completed ones in reverse.
    let result: State = state.result_as().unwrap();
    assert_eq!(result.completed, vec!["a", "b"]);
    assert_eq!(result.undone, vec!["c", "b", "a"]);
}

#[tokio::test]
async fn undo_failure_is_fatal_and_keeps_original_cause() {
    let (runner, _log) = runner_with_log();
    let flight = Flight::new("dismal")
        .step(RecordingStep {
            id: "a",
            fail_run: false,
            fail_undo: true,
        })
        .step(RecordingStep::failing("b"));

    let flight_id = runner.create_flight_id();
    runner
        .submit(&flight_id, flight, input(), State::default())
        .await
        .unwrap();

    let state = runner.wait(&flight_id, POLL).await.unwrap();
    assert_eq!(state.status, FlightStatus::Fatal);
    let error = state.error.unwrap();
    assert!(error.contains("b exploded"));
    assert!(error.contains("a undo exploded"));
}

#[tokio::test]
async fn retry_policy_reinvokes_until_success() {
    let (runner, _log) = runner_with_log();
    let attempts = Arc::new(AtomicU32::new(0));
    let flight = Flight::new("flaky").step_with_retry(
        FlakyStep {
            attempts: attempts.clone(),
            failures_before_success: 2,
        },
        RetryPolicy::FixedInterval {
            interval_ms: 5,
            max_attempts: 5,
        },
    );

    let flight_id = runner.create_flight_id();
    runner
        .submit(&flight_id, flight, input(), State::default())
        .await
        .unwrap();

    let state = runner.wait(&flight_id, POLL).await.unwrap();
    assert_eq!(state.status, FlightStatus::Success);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_exhaustion_becomes_fatal() {
    let (runner, _log) = runner_with_log();
    let attempts = Arc::new(AtomicU32::new(0));
    let flight = Flight::new("flaky-exhausted").step_with_retry(
        FlakyStep {
            attempts: attempts.clone(),
            failures_before_success: 100,
        },
        RetryPolicy::FixedInterval {
            interval_ms: 1,
            max_attempts: 3,
        },
    );

    let flight_id = runner.create_flight_id();
    runner
        .submit(&flight_id, flight, input(), State::default())
        .await
        .unwrap();

    let state = runner.wait(&flight_id, POLL).await.unwrap();
    assert_eq!(state.status, FlightStatus::Error);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn status_of_unknown_flight_is_distinguishable() {
    let (runner, _log) = runner_with_log();
    let err = runner.status(&FlightId::new("never-submitted")).await.unwrap_err();
    assert!(matches!(err, FlightError::UnknownFlight(_)));
}

#[tokio::test]
async fn resume_continues_from_persisted_cursor() {
    // Simulate a crash: persist a flight cursor mid-way by hand, then
    // resume it with a freshly built flight. Steps a and b are already
    // recorded as completed; only c may run.
    let log: Arc<MemoryFlightLog> = Arc::new(MemoryFlightLog::new());
    let runner = FlightRunner::new(log.clone(), 4);

    let flight_id = FlightId::new("crashed-flight");
    let record = depot_flight::FlightRecord::new(
        flight_id.clone(),
        "resumable",
        serde_json::to_value(input()).unwrap(),
        serde_json::to_value(State {
            completed: vec!["a".to_string(), "b".to_string()],
            undone: vec![],
        })
        .unwrap(),
    );
    log.create(&record).await.unwrap();
    log.record_transition(
        &flight_id,
        2,
        depot_flight::FlightDirection::Doing,
        &record.state,
        None,
    )
    .await
    .unwrap();

    let flight = Flight::new("resumable")
        .step(RecordingStep::ok("a"))
        .step(RecordingStep::ok("b"))
        .step(RecordingStep::ok("c"));
    let resumed = runner.resume(&flight_id, flight).await.unwrap();
    assert!(resumed);

    let state = runner.wait(&flight_id, POLL).await.unwrap();
    assert_eq!(state.status, FlightStatus::Success);
    let result: State = state.result_as().unwrap();
    // a and b were not re-run; c ran exactly once.
    assert_eq!(result.completed, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn resume_of_terminal_flight_is_a_noop() {
    let (runner, _log) = runner_with_log();
    let flight = Flight::new("quick").step(RecordingStep::ok("a"));
    let flight_id = runner.create_flight_id();
    runner
        .submit(&flight_id, flight, input(), State::default())
        .await
        .unwrap();
    runner.wait(&flight_id, POLL).await.unwrap();

    let again = Flight::new("quick").step(RecordingStep::ok("a"));
    let resumed = runner.resume(&flight_id, again).await.unwrap();
    assert!(!resumed);
}

#[tokio::test]
async fn delete_refuses_running_flight() {
    let (runner, _log) = runner_with_log();

    // A step that blocks until released keeps the flight running.
    struct Blocked {
        gate: Arc<Mutex<()>>,
    }

    #[async_trait]
    impl Step<Input, State> for Blocked {
        fn name(&self) -> &'static str {
            "blocked"
        }

        async fn run(&self, _ctx: &mut FlightContext<Input, State>) -> StepResult {
            let _held = self.gate.lock().await;
            StepResult::success()
        }
    }

    let gate = Arc::new(Mutex::new(()));
    let held = gate.clone().lock_owned().await;

    let flight = Flight::new("held").step(Blocked { gate: gate.clone() });
    let flight_id = runner.create_flight_id();
    runner
        .submit(&flight_id, flight, input(), State::default())
        .await
        .unwrap();

    // Give the task a moment to start and block.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let err = runner.delete(&flight_id).await.unwrap_err();
    assert!(matches!(err, FlightError::StillRunning(_)));

    drop(held);
    let state = runner.wait(&flight_id, POLL).await.unwrap();
    assert_eq!(state.status, FlightStatus::Success);
    runner.delete(&flight_id).await.unwrap();

    let err = runner.status(&flight_id).await.unwrap_err();
    assert!(matches!(err, FlightError::UnknownFlight(_)));
}

#[tokio::test]
async fn duplicate_submission_is_rejected() {
    let (runner, _log) = runner_with_log();
    let flight_id = FlightId::new("dup");
    runner
        .submit(
            &flight_id,
            Flight::new("one").step(RecordingStep::ok("a")),
            input(),
            State::default(),
        )
        .await
        .unwrap();

    let err = runner
        .submit(
            &flight_id,
            Flight::new("one").step(RecordingStep::ok("a")),
            input(),
            State::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlightError::DuplicateFlight(_)));
}
