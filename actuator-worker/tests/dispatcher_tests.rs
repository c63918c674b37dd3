use actuator::{
    Action, ActionContext, ActionEngine, ActionError, EngineCapabilities, EngineKind, Engines,
    Interpreter, InterpreterSettings,
};
use actuator_worker::backoff::Backoff;
use actuator_worker::queue::memory::Outcome;
use actuator_worker::queue::{Completion, HeartbeatStatus, QueueError, Task};
use actuator_worker::{Dispatcher, DispatcherState, MemoryQueue, TaskOutcome, TaskQueue, WorkerConfig};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Succeeds at everything and counts calls
#[derive(Default)]
struct CountingEngine {
    calls: AtomicUsize,
}

#[async_trait]
impl ActionEngine for CountingEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Desktop
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            image_location: true,
        }
    }

    async fn perform(&self, action: &Action, _ctx: &ActionContext) -> Result<String, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} ok", action.kind()))
    }
}

struct Harness {
    queue: Arc<MemoryQueue>,
    engine: Arc<CountingEngine>,
    dispatcher: Dispatcher,
}

fn harness(config: WorkerConfig) -> Harness {
    let queue = Arc::new(MemoryQueue::new());
    let engine = Arc::new(CountingEngine::default());
    let interpreter = Interpreter::new(
        Engines::new(engine.clone(), engine.clone()),
        InterpreterSettings::default(),
    );
    let dispatcher = Dispatcher::new(queue.clone(), Arc::new(interpreter), Arc::new(config))
        .with_backoff(Backoff::new(Duration::from_millis(10), Duration::from_millis(40)));
    Harness {
        queue,
        engine,
        dispatcher,
    }
}

fn config(max_tasks: Option<u64>) -> WorkerConfig {
    WorkerConfig {
        endpoint: "memory://".to_string(),
        heartbeat_interval: Duration::from_millis(40),
        poll_timeout: Duration::from_millis(200),
        max_tasks,
        ..Default::default()
    }
}

fn envelope(id: u32, actions: Value) -> Value {
    json!({
        "id": id,
        "name": format!("job {id}"),
        "input": {
            "script": {"name": format!("script {id}"), "actions": actions},
            "tenant": "lab"
        }
    })
}

fn success_output(outcome: &Outcome) -> &Value {
    match outcome {
        Outcome::Success(output) => output,
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test]
async fn test_success_report_mirrors_payload() {
    let h = harness(config(Some(1)));
    let token = h
        .queue
        .push(envelope(
            1,
            json!([
                {"type": "press", "key": "enter"},
                {"type": "wait", "duration": 5}
            ]),
        ))
        .await;

    assert_eq!(h.dispatcher.run().await, 1);

    let completions = h.queue.completions().await;
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].token, token);
    let output = success_output(&completions[0].outcome);
    assert_eq!(output["id"], json!(1));
    assert_eq!(output["input"]["tenant"], json!("lab"));
    assert!(output["input"].get("script").is_none());
    assert_eq!(
        output["input"]["script_output"],
        json!({
            "success": true,
            "results": [
                {"action": "press", "status": "success", "details": "press ok"},
                {"action": "wait", "status": "success", "details": "Waited 5ms"}
            ]
        })
    );
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_script_is_reported_as_failure() {
    let h = harness(config(Some(1)));
    h.queue
        .push(envelope(2, json!([{"type": "click", "image": ""}])))
        .await;

    h.dispatcher.run().await;

    let completions = h.queue.completions().await;
    assert_eq!(completions.len(), 1);
    let Outcome::Failure { error, cause } = &completions[0].outcome else {
        panic!("expected failure");
    };
    assert_eq!(error, "ScriptValidationError");
    let cause: Value = serde_json::from_str(cause).unwrap();
    assert_eq!(cause["id"], json!(2));
    let output = &cause["input"]["script_output"];
    assert_eq!(output["success"], json!(false));
    assert_eq!(output["error"], json!("ScriptValidationError"));
    assert!(output["details"]
        .as_str()
        .unwrap()
        .starts_with("Action 0 (click)"));
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_single_flight_and_one_report_per_task() {
    let h = harness(config(Some(3)));
    let mut tokens = Vec::new();
    for id in 0..3 {
        tokens.push(
            h.queue
                .push(envelope(id, json!([{"type": "wait", "duration": 20}])))
                .await,
        );
    }

    assert_eq!(h.dispatcher.run().await, 3);

    let reported: Vec<String> = h
        .queue
        .completions()
        .await
        .into_iter()
        .map(|c| c.token)
        .collect();
    assert_eq!(reported, tokens);
    assert_eq!(h.queue.max_in_flight().await, 1);
    assert!(h.queue.rejected_reports().await.is_empty());
}

#[tokio::test]
async fn test_heartbeats_while_executing_and_not_after() {
    let h = harness(config(Some(1)));
    let token = h
        .queue
        .push(envelope(3, json!([{"type": "wait", "duration": 300}])))
        .await;

    h.dispatcher.run().await;

    let beats = h.queue.heartbeat_count(&token).await;
    assert!(beats >= 3, "expected several heartbeats, got {beats}");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.queue.heartbeat_count(&token).await, beats);
}

#[tokio::test]
async fn test_failed_heartbeats_are_logged_and_the_run_continues() {
    let h = harness(config(Some(1)));
    h.queue.fail_next_heartbeats(2).await;
    let token = h
        .queue
        .push(envelope(9, json!([{"type": "wait", "duration": 300}])))
        .await;

    assert_eq!(h.dispatcher.run().await, 1);

    assert_eq!(h.queue.heartbeat_failures().await, 2);
    let beats = h.queue.heartbeat_count(&token).await;
    assert!(beats >= 2, "heartbeats stopped after a failure: {beats}");
    let completions = h.queue.completions().await;
    assert_eq!(completions.len(), 1);
    let output = &success_output(&completions[0].outcome)["input"]["script_output"];
    assert_eq!(output["success"], json!(true));
    assert!(h.queue.rejected_reports().await.is_empty());
}

#[tokio::test]
async fn test_expired_token_stops_heartbeats_but_not_execution() {
    let h = harness(WorkerConfig {
        heartbeat_interval: Duration::from_millis(30),
        ..config(None)
    });
    let token = h
        .queue
        .push(envelope(4, json!([{"type": "wait", "duration": 400}])))
        .await;
    let task = h
        .queue
        .get_task(Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();

    let queue = h.queue.clone();
    let expiring = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.expire(&expiring).await;
    });
    let outcome = h.dispatcher.handle_task(task).await;

    let TaskOutcome::Completed(result) = outcome else {
        panic!("expected the script to complete");
    };
    assert!(result.success);
    assert!(h.queue.completions().await.is_empty());
    assert_eq!(h.queue.rejected_reports().await, vec![token.clone()]);
    let beats = h.queue.heartbeat_count(&token).await;
    assert!(beats <= 6, "heartbeats kept going after expiry: {beats}");
}

#[tokio::test]
async fn test_poll_errors_back_off_and_recover() {
    let h = harness(config(Some(1)));
    h.queue.fail_next_polls(3).await;
    h.queue
        .push(envelope(5, json!([{"type": "press", "key": "a"}])))
        .await;

    assert_eq!(h.dispatcher.run().await, 1);

    assert_eq!(h.queue.polls().await, 4);
    assert_eq!(h.queue.completions().await.len(), 1);
}

#[tokio::test]
async fn test_shutdown_while_polling() {
    let h = harness(WorkerConfig {
        poll_timeout: Duration::from_secs(30),
        ..config(None)
    });
    let shutdown = CancellationToken::new();
    let dispatcher = h.dispatcher.with_shutdown(shutdown.clone());
    let state = dispatcher.state();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let started = Instant::now();
    assert_eq!(dispatcher.run().await, 0);

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(*state.borrow(), DispatcherState::Stopped);
}

#[tokio::test]
async fn test_shutdown_during_execution_reports_cancelled_result() {
    let h = harness(config(None));
    let shutdown = CancellationToken::new();
    let dispatcher = h.dispatcher.with_shutdown(shutdown.clone());
    h.queue
        .push(envelope(
            6,
            json!([
                {"type": "wait", "duration": "10m"},
                {"type": "press", "key": "a"}
            ]),
        ))
        .await;
    h.queue
        .push(envelope(7, json!([{"type": "press", "key": "b"}])))
        .await;

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    assert_eq!(dispatcher.run().await, 1);

    let completions = h.queue.completions().await;
    assert_eq!(completions.len(), 1);
    let output = &success_output(&completions[0].outcome)["input"]["script_output"];
    assert_eq!(output["success"], json!(false));
    assert_eq!(output["error"], json!("execution cancelled"));
    assert_eq!(output["results"][1]["status"], json!("skipped"));
    // The second task stays queued for another worker
    assert_eq!(h.queue.pending().await, 1);
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dry_run_config_touches_nothing() {
    let h = harness(WorkerConfig {
        dry_run: true,
        ..config(Some(1))
    });
    h.queue
        .push(envelope(8, json!([{"type": "launch", "path": "calc"}])))
        .await;

    h.dispatcher.run().await;

    let completions = h.queue.completions().await;
    let output = &success_output(&completions[0].outcome)["input"]["script_output"];
    assert_eq!(output["success"], json!(true));
    assert!(output["results"][0]["details"]
        .as_str()
        .unwrap()
        .starts_with("dry-run: "));
    assert_eq!(h.engine.calls.load(Ordering::SeqCst), 0);
}

/// Answers every poll at once with "no task"
#[derive(Default)]
struct ImpatientQueue {
    polls: AtomicU64,
}

#[async_trait]
impl TaskQueue for ImpatientQueue {
    async fn get_task(&self, _timeout: Duration) -> Result<Option<Task>, QueueError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn send_heartbeat(&self, _token: &str) -> Result<HeartbeatStatus, QueueError> {
        Ok(HeartbeatStatus::Alive)
    }

    async fn send_success(&self, _token: &str, _output: &Value) -> Result<Completion, QueueError> {
        Ok(Completion::Accepted)
    }

    async fn send_failure(
        &self,
        _token: &str,
        _error: &str,
        _cause: &str,
    ) -> Result<Completion, QueueError> {
        Ok(Completion::Accepted)
    }
}

#[tokio::test]
async fn test_empty_polls_are_spaced_out() {
    let queue = Arc::new(ImpatientQueue::default());
    let interpreter = Interpreter::new(
        Engines::new(
            Arc::new(CountingEngine::default()),
            Arc::new(CountingEngine::default()),
        ),
        InterpreterSettings::default(),
    );
    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::new(queue.clone(), Arc::new(interpreter), Arc::new(config(None)))
        .with_min_poll_interval(Duration::from_millis(100))
        .with_shutdown(shutdown.clone());

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        trigger.cancel();
    });
    assert_eq!(dispatcher.run().await, 0);

    let polls = queue.polls.load(Ordering::SeqCst);
    assert!((2..=5).contains(&polls), "unexpected poll count {polls}");
}
