//! Execution engines that turn [`Action`]s into effects on the host

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::ActionError;
use crate::locator::DEFAULT_CONFIDENCE;
use crate::script::{Action, ActionScript, ExecutorHint};

mod desktop;
mod python;

pub use desktop::DesktopEngine;
pub use python::{find_executable, render_snippet, PythonEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Native input and capture (rdev + xcap)
    Desktop,
    /// External Python interpreter driving pyautogui
    Python,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Desktop, EngineKind::Python];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Desktop => "desktop",
            EngineKind::Python => "python",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineCapabilities {
    /// Can find reference images on screen with a confidence threshold
    pub image_location: bool,
}

/// Per-run settings every action sees
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Directory of the script file, used to resolve relative references
    pub base_dir: Option<PathBuf>,
    pub default_confidence: f32,
    /// Where screenshots without an absolute path are written
    pub screenshot_dir: PathBuf,
}

impl Default for ActionContext {
    fn default() -> Self {
        Self {
            base_dir: None,
            default_confidence: DEFAULT_CONFIDENCE,
            screenshot_dir: PathBuf::from("."),
        }
    }
}

impl ActionContext {
    /// Target file for a `screenshot` action: relative paths land in
    /// `screenshot_dir`, no path means a timestamped file name.
    pub fn screenshot_path(&self, path: Option<&str>) -> PathBuf {
        match path.filter(|p| !p.trim().is_empty()) {
            Some(path) if Path::new(path).is_absolute() => PathBuf::from(path),
            Some(path) => self.screenshot_dir.join(path),
            None => self.screenshot_dir.join(format!(
                "screenshot-{}.png",
                chrono::Local::now().format("%Y%m%d-%H%M%S-%3f")
            )),
        }
    }
}

/// The common trait all engines implement
#[async_trait]
pub trait ActionEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn capabilities(&self) -> EngineCapabilities;

    /// Perform one action and describe what happened.
    ///
    /// Returns the `details` recorded on a successful result.
    async fn perform(&self, action: &Action, ctx: &ActionContext) -> Result<String, ActionError>;
}

/// Pick the engine for a whole script. An explicit hint always wins;
/// otherwise a script needing image location leaves a default engine
/// that cannot do it.
pub fn select_engine(
    script: &ActionScript,
    default: EngineKind,
    capabilities: impl Fn(EngineKind) -> EngineCapabilities,
) -> EngineKind {
    match script.executor {
        ExecutorHint::Desktop => EngineKind::Desktop,
        ExecutorHint::Python => EngineKind::Python,
        ExecutorHint::Auto => {
            if script.needs_image_location() && !capabilities(default).image_location {
                EngineKind::ALL
                    .into_iter()
                    .find(|kind| capabilities(*kind).image_location)
                    .unwrap_or(default)
            } else {
                default
            }
        }
    }
}

/// The engines available to an interpreter, one per [`EngineKind`]
#[derive(Clone)]
pub struct Engines {
    desktop: Arc<dyn ActionEngine>,
    python: Arc<dyn ActionEngine>,
}

impl Engines {
    pub fn new(desktop: Arc<dyn ActionEngine>, python: Arc<dyn ActionEngine>) -> Self {
        Self { desktop, python }
    }

    /// Native desktop engine plus a Python engine using `python` (or the
    /// first `python3`/`python` on `PATH`).
    pub fn local(python: Option<PathBuf>) -> Self {
        Self::new(
            Arc::new(DesktopEngine::local()),
            Arc::new(PythonEngine::new(python)),
        )
    }

    pub fn get(&self, kind: EngineKind) -> &Arc<dyn ActionEngine> {
        match kind {
            EngineKind::Desktop => &self.desktop,
            EngineKind::Python => &self.python,
        }
    }

    pub fn capabilities(&self, kind: EngineKind) -> EngineCapabilities {
        self.get(kind).capabilities()
    }
}
