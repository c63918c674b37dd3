//! Queue worker for `actuator` scripts
//!
//! Polls a durable task queue, runs each task's script through the
//! [`actuator::Interpreter`] while sending heartbeats, and reports a structured
//! result back through the task's completion token.

pub mod backoff;
pub mod cancellation;
pub mod config;
pub mod dispatcher;
pub mod heartbeat;
pub mod payload;
pub mod queue;
pub mod utils;

pub use config::WorkerConfig;
pub use dispatcher::{Dispatcher, DispatcherState, TaskOutcome};
pub use queue::{HttpTaskQueue, MemoryQueue, Task, TaskQueue};
