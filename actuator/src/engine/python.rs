use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use super::{ActionContext, ActionEngine, EngineCapabilities, EngineKind};
use crate::errors::ActionError;
use crate::keys::key_from_name;
use crate::launch;
use crate::script::{Action, Millis, MouseButton, PointerTarget};

const ENGINE_NAME: &str = "python";

/// Prelude for every snippet: fail-safe corner off, no implicit pauses
const PRELUDE: &str = "import pyautogui\npyautogui.FAILSAFE = False\npyautogui.PAUSE = 0.02\n";

/// Find an executable on `PATH`, honoring Windows extensions.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidates = if cfg!(windows) {
        vec![format!("{name}.exe"), format!("{name}.cmd"), name.to_string()]
    } else {
        vec![name.to_string()]
    };
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        candidates
            .iter()
            .map(|candidate| dir.join(candidate))
            .find(|full| full.is_file())
    })
}

/// Engine that runs each action as a short pyautogui program in an external
/// Python interpreter. It has no confidence-based image location.
#[derive(Debug, Clone, Default)]
pub struct PythonEngine {
    python: Option<PathBuf>,
}

impl PythonEngine {
    /// Use `python` if given, otherwise the first `python3` or `python` on `PATH`
    pub fn new(python: Option<PathBuf>) -> Self {
        Self { python }
    }

    fn interpreter(&self) -> Result<PathBuf, ActionError> {
        if let Some(python) = &self.python {
            return Ok(python.clone());
        }
        ["python3", "python"]
            .into_iter()
            .find_map(find_executable)
            .ok_or_else(|| ActionError::Engine("no python3 or python found on PATH".to_string()))
    }

    async fn run_snippet(&self, snippet: &str) -> Result<(), ActionError> {
        let python = self.interpreter()?;
        debug!("Running pyautogui snippet with {}:\n{}", python.display(), snippet);
        let output = Command::new(&python)
            .arg("-c")
            .arg(snippet)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ActionError::Engine(format!("failed to start {}: {e}", python.display())))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        // The last line of a traceback carries the exception message
        let message = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("no error output")
            .trim()
            .to_string();
        Err(ActionError::Engine(format!("{} ({})", message, output.status)))
    }
}

fn unsupported(action: &Action) -> ActionError {
    ActionError::Unsupported {
        engine: ENGINE_NAME,
        operation: format!("{} (image location)", action.kind()),
    }
}

/// A Rust string as a Python string literal. JSON string syntax is a subset.
fn py_str(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn seconds(duration: Option<Millis>) -> f64 {
    duration.map_or(0.0, |d| d.0 as f64 / 1000.0)
}

fn py_button(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "'left'",
        MouseButton::Right => "'right'",
        MouseButton::Middle => "'middle'",
    }
}

/// pyautogui's name for a script key name. Unknown names are rejected up front.
fn py_key(name: &str) -> Result<String, ActionError> {
    key_from_name(name)?;
    let normalized = name.trim().to_ascii_lowercase();
    let mapped = match normalized.as_str() {
        "return" => "enter",
        "control" | "ctrlleft" => "ctrl",
        "escape" => "esc",
        "spacebar" => "space",
        "del" => "delete",
        "ins" => "insert",
        "option" | "altleft" => "alt",
        "altgr" => "altright",
        "shiftleft" => "shift",
        "pgup" => "pageup",
        "pgdn" => "pagedown",
        "prtsc" | "prntscrn" => "printscreen",
        "cmd" | "meta" | "super" | "winleft" => {
            if cfg!(target_os = "macos") {
                "command"
            } else {
                "win"
            }
        }
        other => other,
    };
    Ok(py_str(mapped))
}

fn bounds_check(x: i32, y: i32) -> String {
    format!(
        "if not pyautogui.onScreen({x}, {y}):\n    raise SystemExit('Point ({x}, {y}) is outside the screen bounds')\n"
    )
}

/// Render the pyautogui program for one action. `Wait`, `Launch` and image
/// actions never reach Python.
pub fn render_snippet(action: &Action, ctx: &ActionContext) -> Result<String, ActionError> {
    let body = match action {
        Action::Move { x, y, duration } => format!(
            "{}pyautogui.moveTo({x}, {y}, duration={})\n",
            bounds_check(*x, *y),
            seconds(*duration)
        ),
        Action::Click(target) | Action::Doubleclick(target) | Action::Rightclick(target) => {
            let PointerTarget::At { x, y } = target else {
                return Err(unsupported(action));
            };
            let call = match action {
                Action::Doubleclick(_) => "doubleClick",
                Action::Rightclick(_) => "rightClick",
                _ => "click",
            };
            format!("{}pyautogui.{call}({x}, {y})\n", bounds_check(*x, *y))
        }
        Action::Drag {
            from_x,
            from_y,
            to_x,
            to_y,
            button,
            duration,
        } => format!(
            "{}{}pyautogui.moveTo({from_x}, {from_y})\npyautogui.dragTo({to_x}, {to_y}, duration={}, button={})\n",
            bounds_check(*from_x, *from_y),
            bounds_check(*to_x, *to_y),
            seconds(Some(duration.unwrap_or(Millis(200)))),
            py_button(*button)
        ),
        Action::Scroll { amount, x, y } => match (x, y) {
            (Some(x), Some(y)) => format!(
                "{}pyautogui.scroll({amount}, x={x}, y={y})\n",
                bounds_check(*x, *y)
            ),
            (None, None) => format!("pyautogui.scroll({amount})\n"),
            _ => {
                return Err(ActionError::Input(
                    "scroll position needs both x and y".to_string(),
                ))
            }
        },
        Action::Press { key, presses } => {
            format!("pyautogui.press({}, presses={presses})\n", py_key(key)?)
        }
        Action::Type { text, interval } => format!(
            "pyautogui.write({}, interval={})\n",
            py_str(text),
            seconds(*interval)
        ),
        Action::Hotkey { keys } => {
            let keys = keys
                .iter()
                .map(|key| py_key(key))
                .collect::<Result<Vec<_>, _>>()?;
            format!("pyautogui.hotkey({})\n", keys.join(", "))
        }
        Action::Screenshot { path, region } => {
            let target = ctx.screenshot_path(path.as_deref());
            let region = match region {
                Some(r) => format!("region=({}, {}, {}, {})", r.x, r.y, r.width, r.height),
                None => String::new(),
            };
            format!(
                "import os\nos.makedirs(os.path.dirname(os.path.abspath({path})), exist_ok=True)\npyautogui.screenshot({region}).save({path})\n",
                path = py_str(&target.to_string_lossy())
            )
        }
        Action::Locate(_) => return Err(unsupported(action)),
        Action::Wait { .. } | Action::Launch { .. } => {
            return Err(ActionError::Internal(format!(
                "{} is not run through Python",
                action.kind()
            )))
        }
    };
    Ok(format!("{PRELUDE}{body}"))
}

#[async_trait]
impl ActionEngine for PythonEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Python
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            image_location: false,
        }
    }

    #[instrument(level = "debug", skip(self, ctx), fields(kind = action.kind()))]
    async fn perform(&self, action: &Action, ctx: &ActionContext) -> Result<String, ActionError> {
        match action {
            Action::Launch { path, args } => {
                let pid = launch::launch(path, args)?;
                Ok(format!("Launched '{path}' (pid {pid})"))
            }
            _ => {
                let snippet = render_snippet(action, ctx)?;
                self.run_snippet(&snippet).await?;
                info!("python: {}", action);
                Ok(match action {
                    Action::Screenshot { path, .. } => format!(
                        "Saved screenshot to {}",
                        ctx.screenshot_path(path.as_deref()).display()
                    ),
                    _ => format!("Performed {action}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(value: serde_json::Value) -> Action {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_click_snippet_checks_bounds() {
        let snippet =
            render_snippet(&action(json!({"type": "rightclick", "x": 3, "y": 4})), &ActionContext::default())
                .unwrap();
        assert!(snippet.starts_with(PRELUDE));
        assert!(snippet.contains("pyautogui.onScreen(3, 4)"));
        assert!(snippet.contains("pyautogui.rightClick(3, 4)"));
    }

    #[test]
    fn test_text_is_quoted_safely() {
        let snippet = render_snippet(
            &action(json!({"type": "type", "text": "it's \"quoted\"\n", "interval": 50})),
            &ActionContext::default(),
        )
        .unwrap();
        assert!(snippet.contains(r#"pyautogui.write("it's \"quoted\"\n", interval=0.05)"#));
    }

    #[test]
    fn test_hotkey_maps_key_names() {
        let snippet = render_snippet(
            &action(json!({"type": "hotkey", "keys": ["Control", "Return"]})),
            &ActionContext::default(),
        )
        .unwrap();
        assert!(snippet.contains(r#"pyautogui.hotkey("ctrl", "enter")"#), "{snippet}");
        assert!(render_snippet(
            &action(json!({"type": "press", "key": "hyper"})),
            &ActionContext::default()
        )
        .is_err());
    }

    #[test]
    fn test_image_actions_are_unsupported() {
        let err = render_snippet(
            &action(json!({"type": "click", "image": "ok.png"})),
            &ActionContext::default(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported by the python engine: click (image location)"
        );
        assert!(!PythonEngine::default().capabilities().image_location);
    }

    #[test]
    fn test_drag_uses_default_duration_and_button() {
        let snippet = render_snippet(
            &action(json!({"type": "drag", "from_x": 1, "from_y": 2, "to_x": 30, "to_y": 40, "button": "middle"})),
            &ActionContext::default(),
        )
        .unwrap();
        assert!(snippet.contains("pyautogui.moveTo(1, 2)\npyautogui.dragTo(30, 40, duration=0.2, button='middle')"));
    }

    #[tokio::test]
    async fn test_wait_never_reaches_python() {
        let engine = PythonEngine::new(Some(PathBuf::from("/nonexistent/python-for-tests")));
        let err = engine
            .perform(&action(json!({"type": "wait", "duration": 5})), &ActionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Internal(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_an_engine_error() {
        let engine = PythonEngine::new(Some(PathBuf::from("/nonexistent/python-for-tests")));
        let err = engine
            .perform(&action(json!({"type": "press", "key": "a"})), &ActionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Engine(_)), "{err:?}");
    }
}
