use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Context for the task currently being executed
#[derive(Clone, Debug)]
pub struct TaskContext {
    pub token: String,
    pub cancellation_token: CancellationToken,
    pub started_at: Instant,
}

impl TaskContext {
    /// Cancelled whenever `shutdown` is
    pub fn new(token: String, shutdown: &CancellationToken) -> Self {
        Self {
            token,
            cancellation_token: shutdown.child_token(),
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn child_token(&self) -> CancellationToken {
        self.cancellation_token.child_token()
    }
}

/// Cancel `shutdown` on the first Ctrl-C
pub fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, finishing the current action and stopping");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}
