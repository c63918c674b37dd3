//! The poll / execute / report loop

use actuator::{ExecutionResult, Interpreter, RunOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::backoff::Backoff;
use crate::cancellation::TaskContext;
use crate::config::WorkerConfig;
use crate::heartbeat;
use crate::payload;
use crate::queue::{Completion, QueueError, Task, TaskQueue};
use crate::utils::short_token;

/// Error kind reported when the interpreter itself dies
pub const INTERPRETER_ERROR: &str = "InterpreterError";

/// Empty polls are spaced at least this far apart, for queues that answer
/// "no task" without holding the long-poll
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Polling,
    Executing,
    Stopped,
}

/// What happened to one task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The script ran (possibly with failed actions) and a success report was sent
    Completed(ExecutionResult),
    /// A failure report was sent with this error kind
    Failed { error: String, message: String },
}

/// Pulls one task at a time from the queue and runs it through the interpreter
pub struct Dispatcher {
    queue: Arc<dyn TaskQueue>,
    interpreter: Arc<Interpreter>,
    config: Arc<WorkerConfig>,
    state: watch::Sender<DispatcherState>,
    shutdown: CancellationToken,
    backoff: Backoff,
    min_poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        interpreter: Arc<Interpreter>,
        config: Arc<WorkerConfig>,
    ) -> Self {
        let (state, _) = watch::channel(DispatcherState::Idle);
        Self {
            queue,
            interpreter,
            config,
            state,
            shutdown: CancellationToken::new(),
            backoff: Backoff::default(),
            min_poll_interval: MIN_POLL_INTERVAL,
        }
    }

    /// Stop the loop when `shutdown` is cancelled
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Watch the dispatcher's state
    pub fn state(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: DispatcherState) {
        self.state.send_replace(state);
    }

    /// One long-poll; `None` if the queue had nothing within the poll timeout
    pub async fn poll_once(&self) -> Result<Option<Task>, QueueError> {
        self.queue.get_task(self.config.poll_timeout).await
    }

    /// Run until shutdown or until `max_tasks` tasks were handled. Returns the
    /// number of tasks handled.
    pub async fn run(&self) -> u64 {
        let mut backoff = self.backoff.clone();
        let mut handled = 0u64;
        info!(
            "Worker '{}' polling {} (heartbeat every {:?}, poll timeout {:?})",
            self.config.worker_name,
            self.config.endpoint,
            self.config.heartbeat_interval,
            self.config.poll_timeout
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if self.config.max_tasks.is_some_and(|max| handled >= max) {
                info!("Handled {} task(s), reached --max-tasks", handled);
                break;
            }

            self.set_state(DispatcherState::Polling);
            let poll_started = tokio::time::Instant::now();
            let polled = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                polled = self.poll_once() => polled,
            };

            match polled {
                Ok(Some(task)) => {
                    backoff.reset();
                    self.set_state(DispatcherState::Executing);
                    self.handle_task(task).await;
                    handled += 1;
                    self.set_state(DispatcherState::Idle);
                }
                Ok(None) => {
                    backoff.reset();
                    self.set_state(DispatcherState::Idle);
                    let next_poll = poll_started + self.min_poll_interval;
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep_until(next_poll) => {}
                    }
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!("Polling failed: {}. Retrying in {:?}", e, delay);
                    self.set_state(DispatcherState::Idle);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.set_state(DispatcherState::Stopped);
        info!("Dispatcher stopped after {} task(s)", handled);
        handled
    }

    /// Parse, execute and report one task. Exactly one report is sent per task.
    #[instrument(skip_all, fields(task = %short_token(&task.token)))]
    pub async fn handle_task(&self, task: Task) -> TaskOutcome {
        let context = TaskContext::new(task.token.clone(), &self.shutdown);
        info!(
            "Received task (id={})",
            task.payload.get("id").unwrap_or(&serde_json::Value::Null)
        );

        let script = match payload::extract_script(&task.payload) {
            Ok(script) => script,
            Err(e) => {
                warn!("Rejecting task: {}", e);
                return self
                    .report_failure(&task, e.kind(), &e.to_string())
                    .await;
            }
        };

        let stop_heartbeat = CancellationToken::new();
        let heartbeat = heartbeat::spawn(
            self.queue.clone(),
            task.token.clone(),
            self.config.heartbeat_interval,
            stop_heartbeat.clone(),
        );

        let interpreter = self.interpreter.clone();
        let options = RunOptions::new(context.child_token()).with_dry_run(self.config.dry_run);
        // Spawned so a panic inside the run surfaces as a JoinError
        let run = tokio::spawn(async move { interpreter.run(&script, &options).await }).await;

        stop_heartbeat.cancel();
        let beats = heartbeat.await.unwrap_or_else(|e| {
            warn!("Heartbeat task ended abnormally: {}", e);
            0
        });

        match run {
            Ok(result) => {
                info!(
                    "Task finished in {:?} with {} heartbeat(s): {}",
                    context.elapsed(),
                    beats,
                    result.summary()
                );
                self.report_success(&task, &result).await;
                TaskOutcome::Completed(result)
            }
            Err(e) => {
                error!("Interpreter crashed: {}", e);
                self.report_failure(&task, INTERPRETER_ERROR, &format!("interpreter crashed: {e}"))
                    .await
            }
        }
    }

    /// Send the mirrored success payload. Not retried.
    pub async fn report_success(&self, task: &Task, result: &ExecutionResult) {
        let output = payload::success_output(&task.payload, result);
        let sent = self.queue.send_success(&task.token, &output).await;
        log_completion("success", &task.token, sent);
    }

    /// Send a failure with the mirrored error payload as cause. Not retried.
    pub async fn report_failure(&self, task: &Task, kind: &str, message: &str) -> TaskOutcome {
        let cause = payload::failure_cause(&task.payload, kind, message).to_string();
        let sent = self.queue.send_failure(&task.token, kind, &cause).await;
        log_completion("failure", &task.token, sent);
        TaskOutcome::Failed {
            error: kind.to_string(),
            message: message.to_string(),
        }
    }
}

fn log_completion(report: &str, token: &str, sent: Result<Completion, QueueError>) {
    match sent {
        Ok(Completion::Accepted) => info!("Reported {} for task {}", report, short_token(token)),
        Ok(Completion::Expired) => warn!(
            "Task {} expired before its {} report; result dropped",
            short_token(token),
            report
        ),
        Err(e) => error!(
            "Failed to report {} for task {}: {}",
            report,
            short_token(token),
            e
        ),
    }
}
