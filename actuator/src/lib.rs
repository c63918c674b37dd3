//! Declarative desktop automation scripts
//!
//! This crate parses action scripts (an ordered list of typed pointer, keyboard,
//! window and vision actions), runs them against the local desktop through a
//! pluggable [`ActionEngine`], and finds on-screen targets through the
//! template-matching [`Locator`].

pub mod duration;
pub mod engine;
pub mod errors;
pub mod input;
pub mod interpreter;
pub mod keys;
pub mod launch;
pub mod locator;
pub mod result;
pub mod screen;
pub mod script;

pub use engine::{
    select_engine, ActionContext, ActionEngine, DesktopEngine, EngineCapabilities, EngineKind,
    Engines, PythonEngine,
};
pub use errors::{ActionError, CaptureError, LocateError, ScriptError};
pub use input::{InputDriver, RdevInput};
pub use interpreter::{Interpreter, InterpreterSettings, RunOptions};
pub use locator::{LocateMatch, LocateRequest, Locator, MatchPass, DEFAULT_CONFIDENCE};
pub use result::{ActionResult, ActionStatus, ExecutionResult};
pub use screen::{Capture, Rect, Screen, XcapScreen};
pub use script::{
    Action, ActionScript, ExecutorHint, ImageTarget, Millis, MouseButton, PointerTarget, Region,
};
