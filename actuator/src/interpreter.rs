//! Sequential execution of an [`ActionScript`]

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::engine::{select_engine, ActionContext, ActionEngine, EngineKind, Engines};
use crate::errors::{ActionError, LocateError};
use crate::locator::{resolve_image_path, DEFAULT_CONFIDENCE};
use crate::result::{ActionResult, ExecutionResult};
use crate::script::{Action, ActionScript};

pub const CANCELLED: &str = "execution cancelled";
const ABORTED: &str = "aborted: execution cancelled";
const SKIPPED_AFTER_FAILURE: &str = "skipped: a previous action failed";

/// Fixed for the lifetime of an interpreter
#[derive(Debug, Clone)]
pub struct InterpreterSettings {
    /// Engine used for `auto` scripts unless image location forces the other one
    pub default_engine: EngineKind,
    pub default_confidence: f32,
    pub screenshot_dir: PathBuf,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            default_engine: EngineKind::Desktop,
            default_confidence: DEFAULT_CONFIDENCE,
            screenshot_dir: PathBuf::from("."),
        }
    }
}

/// Per-run switches
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Record what would happen without touching the host
    pub dry_run: bool,
    /// Checked before every action and while waiting
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            dry_run: false,
            cancel,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

pub struct Interpreter {
    engines: Engines,
    settings: InterpreterSettings,
}

impl Interpreter {
    pub fn new(engines: Engines, settings: InterpreterSettings) -> Self {
        Self { engines, settings }
    }

    pub fn settings(&self) -> &InterpreterSettings {
        &self.settings
    }

    /// The engine this script will run on
    pub fn select_engine(&self, script: &ActionScript) -> EngineKind {
        select_engine(script, self.settings.default_engine, |kind| {
            self.engines.capabilities(kind)
        })
    }

    /// Run every action in order and account for each one.
    ///
    /// Never fails: action faults, panics and cancellation are all recorded in
    /// the returned [`ExecutionResult`].
    #[instrument(skip_all, fields(script = %script.name, actions = script.actions.len()))]
    pub async fn run(&self, script: &ActionScript, options: &RunOptions) -> ExecutionResult {
        let kind = self.select_engine(script);
        let engine = self.engines.get(kind);
        let ctx = ActionContext {
            base_dir: script.base_dir.clone(),
            default_confidence: self.settings.default_confidence,
            screenshot_dir: self.settings.screenshot_dir.clone(),
        };
        info!(
            "Running script '{}' on {} engine (abort_on_error={}, dry_run={})",
            script.name, kind, script.abort_on_error, options.dry_run
        );

        let mut results = Vec::with_capacity(script.actions.len());
        let mut halted: Option<&'static str> = None;
        let mut error = None;

        for (index, action) in script.actions.iter().enumerate() {
            let kind_name = action.kind();
            if let Some(reason) = halted {
                results.push(ActionResult::skipped(index, kind_name, reason));
                continue;
            }
            if options.cancel.is_cancelled() {
                warn!("Cancellation observed before action {}", index);
                results.push(ActionResult::failed(index, kind_name, ABORTED, 0));
                halted = Some(ABORTED);
                error = Some(CANCELLED.to_string());
                continue;
            }

            debug!("Action {} BEGIN {}", index, action);
            let started = Instant::now();
            let outcome = if options.dry_run {
                dry_run(action, &ctx)
            } else {
                self.perform(engine.as_ref(), action, &ctx, &options.cancel)
                    .await
            };
            let elapsed = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(details) => {
                    debug!("Action {} END success in {}ms: {}", index, elapsed, details);
                    results.push(ActionResult::success(index, kind_name, details, elapsed));
                }
                Err(e) => {
                    warn!("Action {} ({}) failed after {}ms: {}", index, kind_name, elapsed, e);
                    let interrupted = matches!(e, ActionError::Interrupted);
                    let details = e.to_string();
                    if interrupted {
                        halted = Some(ABORTED);
                        error = Some(CANCELLED.to_string());
                    } else if script.abort_on_error {
                        halted = Some(SKIPPED_AFTER_FAILURE);
                        error = Some(format!("stopped at action {index} ({kind_name}): {details}"));
                    }
                    results.push(ActionResult::failed(index, kind_name, details, elapsed));
                }
            }
        }

        let result = ExecutionResult::from_results(results, error);
        info!("Script '{}' finished: {}", script.name, result.summary());
        result
    }

    async fn perform(
        &self,
        engine: &dyn ActionEngine,
        action: &Action,
        ctx: &ActionContext,
        cancel: &CancellationToken,
    ) -> Result<String, ActionError> {
        if let Action::Wait { duration } = action {
            return tokio::select! {
                _ = cancel.cancelled() => Err(ActionError::Interrupted),
                _ = tokio::time::sleep(duration.as_duration()) => Ok(format!("Waited {}ms", duration.0)),
            };
        }
        AssertUnwindSafe(engine.perform(action, ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(ActionError::Internal(format!(
                    "engine panicked: {}",
                    panic_message(panic.as_ref())
                )))
            })
    }
}

/// Describe an action without performing it. Image references are still
/// resolved so a dry run catches missing files.
fn dry_run(action: &Action, ctx: &ActionContext) -> Result<String, ActionError> {
    let Some(target) = action.image_target() else {
        return Ok(format!("dry-run: {action}"));
    };
    let cwd = std::env::current_dir().ok();
    let resolved = resolve_image_path(&target.image, cwd.as_deref(), ctx.base_dir.as_deref())
        .ok_or_else(|| LocateError::Unresolvable(target.image.clone()))?;
    Ok(format!("dry-run: {action} (resolved {})", resolved.display()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
