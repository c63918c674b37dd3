//! Keep-alive signals for the task being executed

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::queue::{HeartbeatStatus, TaskQueue};
use crate::utils::short_token;

/// Send a heartbeat for `token` every `every` until `stop` is cancelled.
///
/// Runs beside the interpreter and never affects it: failures are logged, and
/// an `Expired` answer ends the heartbeats for this token. The handle yields
/// the number of heartbeats the queue accepted.
pub fn spawn(
    queue: Arc<dyn TaskQueue>,
    token: String,
    every: Duration,
    stop: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut accepted = 0;
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match queue.send_heartbeat(&token).await {
                Ok(HeartbeatStatus::Alive) => {
                    accepted += 1;
                    debug!("Heartbeat {} sent for task {}", accepted, short_token(&token));
                }
                Ok(HeartbeatStatus::Expired) => {
                    warn!(
                        "Task {} expired on the queue, stopping heartbeats; execution continues",
                        short_token(&token)
                    );
                    break;
                }
                Err(e) => warn!("Heartbeat for task {} failed: {}", short_token(&token), e),
            }
        }
        accepted
    })
}
