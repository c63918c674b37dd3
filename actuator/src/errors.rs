use thiserror::Error;

use crate::script::Region;

/// A script could not be turned into a runnable [`ActionScript`](crate::ActionScript).
///
/// Every variant is reported to the queue as a `ScriptValidationError`.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Invalid script JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid script YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Action {index} ({kind}): {message}")]
    InvalidAction {
        index: usize,
        kind: String,
        message: String,
    },

    #[error("Invalid task payload: {0}")]
    Payload(String),

    #[error("Failed to read script {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl ScriptError {
    /// Short, stable error kind used in failure payloads
    pub fn kind(&self) -> &'static str {
        "ScriptValidationError"
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No monitor available for capture")]
    NoMonitor,

    #[error("Region {0:?} does not intersect the captured screen")]
    RegionOutside(Region),

    #[error("Screen capture backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("reference not resolvable: '{0}' does not exist in any search location")]
    Unresolvable(String),

    #[error("not found on screen: '{image}' (best confidence {best:.3} < required {threshold:.2})")]
    NotFound {
        image: String,
        best: f32,
        threshold: f32,
    },

    #[error("failed to load reference image {path}: {reason}")]
    InvalidImage { path: String, reason: String },

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// A single action's effect failed. Recorded on the action's result, never propagated.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Point ({x}, {y}) is outside the screen bounds")]
    OutOfBounds { x: i32, y: i32 },

    #[error("Input simulation failed: {0}")]
    Input(String),

    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error("Failed to launch '{path}': {reason}")]
    Launch { path: String, reason: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unsupported by the {engine} engine: {operation}")]
    Unsupported {
        engine: &'static str,
        operation: String,
    },

    #[error("Engine process failed: {0}")]
    Engine(String),

    #[error("Failed to write {path}: {reason}")]
    Output { path: String, reason: String },

    #[error("Interrupted: execution cancelled")]
    Interrupted,

    #[error("Internal error: {0}")]
    Internal(String),
}
