use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Completion, HeartbeatStatus, QueueError, Task, TaskQueue};

/// What the worker reported for a token
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure { error: String, cause: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub token: String,
    pub outcome: Outcome,
}

#[derive(Default)]
struct State {
    pending: VecDeque<Task>,
    /// Delivered and still accepted by the queue
    live: HashSet<String>,
    /// Delivered and not yet reported by the worker
    in_flight: HashSet<String>,
    max_in_flight: usize,
    heartbeats: Vec<String>,
    completions: Vec<Completed>,
    rejected_reports: Vec<String>,
    failing_polls: u32,
    failing_heartbeats: u32,
    heartbeat_failures: u32,
    polls: u64,
}

/// In-process [`TaskQueue`] for tests and local smoke runs
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a payload and return the token it will be delivered with
    pub async fn push(&self, payload: Value) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.state
            .lock()
            .await
            .pending
            .push_back(Task::new(token.clone(), payload));
        self.notify.notify_one();
        token
    }

    /// Forget a delivered token, as the real queue does after a heartbeat timeout
    pub async fn expire(&self, token: &str) {
        self.state.lock().await.live.remove(token);
    }

    /// Make the next `count` polls fail with a transport error
    pub async fn fail_next_polls(&self, count: u32) {
        self.state.lock().await.failing_polls = count;
    }

    /// Make the next `count` heartbeats fail with a transport error
    pub async fn fail_next_heartbeats(&self, count: u32) {
        self.state.lock().await.failing_heartbeats = count;
    }

    /// Heartbeats that failed with an injected transport error
    pub async fn heartbeat_failures(&self) -> u32 {
        self.state.lock().await.heartbeat_failures
    }

    /// Heartbeats that reached the queue for `token`
    pub async fn heartbeat_count(&self, token: &str) -> usize {
        let state = self.state.lock().await;
        state.heartbeats.iter().filter(|t| t.as_str() == token).count()
    }

    pub async fn completions(&self) -> Vec<Completed> {
        self.state.lock().await.completions.clone()
    }

    /// Reports for tokens the queue no longer accepted
    pub async fn rejected_reports(&self) -> Vec<String> {
        self.state.lock().await.rejected_reports.clone()
    }

    pub async fn polls(&self) -> u64 {
        self.state.lock().await.polls
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Highest number of delivered-but-unreported tasks seen at once
    pub async fn max_in_flight(&self) -> usize {
        self.state.lock().await.max_in_flight
    }

    async fn complete(&self, token: &str, outcome: Outcome) -> Completion {
        let mut state = self.state.lock().await;
        state.in_flight.remove(token);
        if state.live.remove(token) {
            state.completions.push(Completed {
                token: token.to_string(),
                outcome,
            });
            Completion::Accepted
        } else {
            state.rejected_reports.push(token.to_string());
            Completion::Expired
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn get_task(&self, timeout: Duration) -> Result<Option<Task>, QueueError> {
        let deadline = Instant::now() + timeout;
        {
            let mut state = self.state.lock().await;
            state.polls += 1;
            if state.failing_polls > 0 {
                state.failing_polls -= 1;
                return Err(QueueError::Transport("injected poll failure".to_string()));
            }
        }
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(task) = state.pending.pop_front() {
                    state.live.insert(task.token.clone());
                    state.in_flight.insert(task.token.clone());
                    state.max_in_flight = state.max_in_flight.max(state.in_flight.len());
                    return Ok(Some(task));
                }
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn send_heartbeat(&self, token: &str) -> Result<HeartbeatStatus, QueueError> {
        let mut state = self.state.lock().await;
        if state.failing_heartbeats > 0 {
            state.failing_heartbeats -= 1;
            state.heartbeat_failures += 1;
            return Err(QueueError::Transport(
                "injected heartbeat failure".to_string(),
            ));
        }
        state.heartbeats.push(token.to_string());
        Ok(if state.live.contains(token) {
            HeartbeatStatus::Alive
        } else {
            HeartbeatStatus::Expired
        })
    }

    async fn send_success(&self, token: &str, output: &Value) -> Result<Completion, QueueError> {
        Ok(self.complete(token, Outcome::Success(output.clone())).await)
    }

    async fn send_failure(
        &self,
        token: &str,
        error: &str,
        cause: &str,
    ) -> Result<Completion, QueueError> {
        Ok(self
            .complete(
                token,
                Outcome::Failure {
                    error: error.to_string(),
                    cause: cause.to_string(),
                },
            )
            .await)
    }
}
