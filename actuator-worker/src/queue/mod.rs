//! The durable work queue, seen from the worker

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub mod http;
pub mod memory;

pub use http::HttpTaskQueue;
pub use memory::MemoryQueue;

/// One unit of work. The token is valid until success or failure is reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub token: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl Task {
    pub fn new(token: impl Into<String>, payload: Value) -> Self {
        Self {
            token: token.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatStatus {
    Alive,
    /// The queue no longer knows the token (timed out or already completed)
    Expired,
}

/// How the queue answered a success or failure report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Accepted,
    Expired,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue transport error: {0}")]
    Transport(String),

    #[error("Queue returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed queue response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Long-poll for the next task; `None` when the timeout passes without one
    async fn get_task(&self, timeout: Duration) -> Result<Option<Task>, QueueError>;

    async fn send_heartbeat(&self, token: &str) -> Result<HeartbeatStatus, QueueError>;

    async fn send_success(&self, token: &str, output: &Value) -> Result<Completion, QueueError>;

    /// `error` is a short kind, `cause` the serialized failure payload
    async fn send_failure(
        &self,
        token: &str,
        error: &str,
        cause: &str,
    ) -> Result<Completion, QueueError>;
}
