use actuator::errors::CaptureError;
use actuator::{
    ActionContext, ActionEngine, ActionError, ActionScript, ActionStatus, DesktopEngine,
    EngineCapabilities, EngineKind, Engines, InputDriver, Interpreter, InterpreterSettings,
    MouseButton, Rect, Region, RunOptions, Screen,
};
use actuator::{Action, Capture, PointerTarget};
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const SCREEN_WIDTH: i32 = 1920;
const SCREEN_HEIGHT: i32 = 1080;

/// Engine that records what it was asked to do instead of doing it
struct RecordingEngine {
    kind: EngineKind,
    image_location: bool,
    performed: Mutex<Vec<String>>,
    panic_on: Option<&'static str>,
}

impl RecordingEngine {
    fn new(kind: EngineKind, image_location: bool) -> Arc<Self> {
        Arc::new(Self {
            kind,
            image_location,
            performed: Mutex::new(Vec::new()),
            panic_on: None,
        })
    }

    fn panicking_on(kind: EngineKind, action_kind: &'static str) -> Arc<Self> {
        Arc::new(Self {
            kind,
            image_location: true,
            performed: Mutex::new(Vec::new()),
            panic_on: Some(action_kind),
        })
    }

    fn performed(&self) -> Vec<String> {
        self.performed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionEngine for RecordingEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            image_location: self.image_location,
        }
    }

    async fn perform(&self, action: &Action, _ctx: &ActionContext) -> Result<String, ActionError> {
        if self.panic_on == Some(action.kind()) {
            panic!("boom");
        }
        self.performed.lock().unwrap().push(action.kind().to_string());
        if action.needs_image_location() && !self.image_location {
            return Err(ActionError::Unsupported {
                engine: "python",
                operation: action.kind().to_string(),
            });
        }
        match action {
            Action::Click(PointerTarget::At { x, y }) if *x >= SCREEN_WIDTH || *y >= SCREEN_HEIGHT => {
                Err(ActionError::OutOfBounds { x: *x, y: *y })
            }
            _ => Ok(format!("{} done", action.kind())),
        }
    }
}

fn interpreter_with(
    desktop: Arc<RecordingEngine>,
    python: Arc<RecordingEngine>,
    default_engine: EngineKind,
) -> Interpreter {
    Interpreter::new(
        Engines::new(desktop, python),
        InterpreterSettings {
            default_engine,
            ..Default::default()
        },
    )
}

fn desktop_only() -> (Interpreter, Arc<RecordingEngine>) {
    let desktop = RecordingEngine::new(EngineKind::Desktop, true);
    let python = RecordingEngine::new(EngineKind::Python, false);
    (
        interpreter_with(desktop.clone(), python, EngineKind::Desktop),
        desktop,
    )
}

fn script(value: serde_json::Value) -> ActionScript {
    ActionScript::from_value(value).unwrap()
}

fn scenario(abort_on_error: bool) -> ActionScript {
    script(json!({
        "name": "open editor",
        "abort_on_error": abort_on_error,
        "actions": [
            {"type": "launch", "path": "notepad"},
            {"type": "wait", "duration": 10},
            {"type": "click", "x": 5000, "y": 5000},
            {"type": "type", "text": "hello"}
        ]
    }))
}

#[tokio::test]
async fn test_abort_on_error_skips_remaining_actions() {
    let (interpreter, desktop) = desktop_only();
    let result = interpreter.run(&scenario(true), &RunOptions::default()).await;

    assert!(!result.success);
    assert_eq!(
        result.statuses(),
        vec![
            ActionStatus::Success,
            ActionStatus::Success,
            ActionStatus::Failed,
            ActionStatus::Skipped
        ]
    );
    assert_eq!(
        result.results[2].details,
        "Point (5000, 5000) is outside the screen bounds"
    );
    assert_eq!(result.results[3].duration_ms, 0);
    assert_eq!(
        result.error.as_deref(),
        Some("stopped at action 2 (click): Point (5000, 5000) is outside the screen bounds")
    );
    // wait is handled by the interpreter, type never ran
    assert_eq!(desktop.performed(), vec!["launch", "click"]);
}

#[tokio::test]
async fn test_continue_on_error_runs_everything() {
    let (interpreter, desktop) = desktop_only();
    let result = interpreter.run(&scenario(false), &RunOptions::default()).await;

    assert!(!result.success);
    assert_eq!(
        result.statuses(),
        vec![
            ActionStatus::Success,
            ActionStatus::Success,
            ActionStatus::Failed,
            ActionStatus::Success
        ]
    );
    assert_eq!(desktop.performed(), vec!["launch", "click", "type"]);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_one_result_per_action_in_order() {
    let (interpreter, _) = desktop_only();
    let result = interpreter.run(&scenario(true), &RunOptions::default()).await;
    let indexes: Vec<usize> = result.results.iter().map(|r| r.action_index).collect();
    let kinds: Vec<&str> = result.results.iter().map(|r| r.action_kind.as_str()).collect();
    assert_eq!(indexes, vec![0, 1, 2, 3]);
    assert_eq!(kinds, vec!["launch", "wait", "click", "type"]);
}

#[tokio::test]
async fn test_dry_run_has_no_side_effects() {
    let (interpreter, desktop) = desktop_only();
    let long = script(json!({
        "actions": [
            {"type": "launch", "path": "notepad"},
            {"type": "wait", "duration": "1h"},
            {"type": "click", "x": 5000, "y": 5000},
            {"type": "hotkey", "keys": ["ctrl", "s"]}
        ]
    }));
    let started = Instant::now();
    let result = interpreter
        .run(&long, &RunOptions::default().with_dry_run(true))
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(result.success);
    assert!(desktop.performed().is_empty());
    for r in &result.results {
        assert_eq!(r.status, ActionStatus::Success);
        assert!(r.details.starts_with("dry-run: "), "{}", r.details);
    }
}

#[tokio::test]
async fn test_dry_run_still_resolves_image_references() {
    let (interpreter, desktop) = desktop_only();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("present.png"), b"not decoded in dry-run").unwrap();
    let script = script(json!({
        "abort_on_error": false,
        "actions": [
            {"type": "click", "image": "present.png"},
            {"type": "locate", "image": "absent.png"}
        ]
    }))
    .with_base_dir(Some(dir.path().to_path_buf()));

    let result = interpreter
        .run(&script, &RunOptions::default().with_dry_run(true))
        .await;

    assert_eq!(result.results[0].status, ActionStatus::Success);
    assert!(result.results[0].details.contains("present.png"));
    assert_eq!(result.results[1].status, ActionStatus::Failed);
    assert!(result.results[1]
        .details
        .starts_with("reference not resolvable"));
    assert!(desktop.performed().is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let (interpreter, desktop) = desktop_only();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = interpreter
        .run(&scenario(false), &RunOptions::new(cancel))
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("execution cancelled"));
    assert_eq!(result.results[0].status, ActionStatus::Failed);
    assert!(result.results[0].details.starts_with("aborted"));
    for r in &result.results[1..] {
        assert_eq!(r.status, ActionStatus::Skipped);
        assert!(r.details.starts_with("aborted"));
    }
    assert!(desktop.performed().is_empty());
}

#[tokio::test]
async fn test_cancellation_interrupts_wait() {
    let (interpreter, desktop) = desktop_only();
    let cancel = CancellationToken::new();
    let script = script(json!({
        "abort_on_error": false,
        "actions": [
            {"type": "press", "key": "a"},
            {"type": "wait", "duration": "10m"},
            {"type": "press", "key": "b"}
        ]
    }));

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let started = Instant::now();
    let result = interpreter.run(&script, &RunOptions::new(cancel)).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        result.statuses(),
        vec![ActionStatus::Success, ActionStatus::Failed, ActionStatus::Skipped]
    );
    assert_eq!(result.results[1].details, "Interrupted: execution cancelled");
    assert_eq!(result.error.as_deref(), Some("execution cancelled"));
    // Cancellation wins over continue-on-error
    assert_eq!(desktop.performed(), vec!["press"]);
}

#[tokio::test]
async fn test_image_script_routes_away_from_python_default() {
    let desktop = RecordingEngine::new(EngineKind::Desktop, true);
    let python = RecordingEngine::new(EngineKind::Python, false);
    let interpreter = interpreter_with(desktop.clone(), python.clone(), EngineKind::Python);

    let with_image = script(json!({"actions": [
        {"type": "press", "key": "enter"},
        {"type": "click", "image": "ok.png"}
    ]}));
    let plain = script(json!({"actions": [{"type": "press", "key": "enter"}]}));

    assert_eq!(interpreter.select_engine(&with_image), EngineKind::Desktop);
    assert_eq!(interpreter.select_engine(&plain), EngineKind::Python);

    interpreter.run(&with_image, &RunOptions::default()).await;
    interpreter.run(&plain, &RunOptions::default()).await;
    // Engines are never mixed within one script
    assert_eq!(desktop.performed(), vec!["press", "click"]);
    assert_eq!(python.performed(), vec!["press"]);
}

#[tokio::test]
async fn test_explicit_hint_wins_even_without_capability() {
    let desktop = RecordingEngine::new(EngineKind::Desktop, true);
    let python = RecordingEngine::new(EngineKind::Python, false);
    let interpreter = interpreter_with(desktop.clone(), python.clone(), EngineKind::Desktop);
    let hinted = script(json!({
        "executor": "python",
        "actions": [{"type": "locate", "image": "ok.png"}]
    }));

    let result = interpreter.run(&hinted, &RunOptions::default()).await;

    assert!(desktop.performed().is_empty());
    assert_eq!(result.results[0].status, ActionStatus::Failed);
    assert!(result.results[0].details.starts_with("Unsupported by the python engine"));
}

#[tokio::test]
async fn test_engine_panic_becomes_failed_action() {
    let desktop = RecordingEngine::panicking_on(EngineKind::Desktop, "press");
    let python = RecordingEngine::new(EngineKind::Python, false);
    let interpreter = interpreter_with(desktop.clone(), python, EngineKind::Desktop);
    let script = script(json!({"actions": [
        {"type": "move", "x": 1, "y": 1},
        {"type": "press", "key": "enter"},
        {"type": "move", "x": 2, "y": 2}
    ]}));

    let result = interpreter.run(&script, &RunOptions::default()).await;

    assert_eq!(
        result.statuses(),
        vec![ActionStatus::Success, ActionStatus::Failed, ActionStatus::Skipped]
    );
    assert_eq!(result.results[1].details, "Internal error: engine panicked: boom");
}

/// Input driver that accepts everything
struct NullInput;

impl InputDriver for NullInput {
    fn move_to(&self, _x: i32, _y: i32) -> Result<(), ActionError> {
        Ok(())
    }
    fn button(&self, _button: MouseButton, _down: bool) -> Result<(), ActionError> {
        Ok(())
    }
    fn scroll(&self, _dx: i64, _dy: i64) -> Result<(), ActionError> {
        Ok(())
    }
    fn key(&self, _key: rdev::Key, _down: bool) -> Result<(), ActionError> {
        Ok(())
    }
}

/// Static frame standing in for the primary monitor
struct StillScreen(RgbaImage);

impl Screen for StillScreen {
    fn bounds(&self) -> Result<Vec<Rect>, CaptureError> {
        Ok(vec![Rect {
            x: 0,
            y: 0,
            width: self.0.width(),
            height: self.0.height(),
        }])
    }

    fn capture(&self, region: Option<Region>) -> Result<Capture, CaptureError> {
        actuator::screen::crop_to_region(
            Capture {
                image: self.0.clone(),
                origin_x: 0,
                origin_y: 0,
            },
            region,
        )
    }
}

fn gradient_frame() -> RgbaImage {
    RgbaImage::from_fn(64, 48, |x, y| {
        Rgba([(x * 4) as u8, (y * 5) as u8, ((x * y) % 251) as u8, 255])
    })
}

#[tokio::test]
async fn test_unresolvable_and_not_found_details_differ() {
    let frame = gradient_frame();
    let dir = tempfile::tempdir().unwrap();
    // Checkerboard never present in a smooth gradient
    RgbaImage::from_fn(8, 8, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([255, 0, 255, 255])
        } else {
            Rgba([0, 255, 0, 255])
        }
    })
    .save(dir.path().join("checker.png"))
    .unwrap();
    image::imageops::crop_imm(&frame, 20, 10, 12, 12)
        .to_image()
        .save(dir.path().join("visible.png"))
        .unwrap();

    let engine = Arc::new(DesktopEngine::new(
        Arc::new(NullInput),
        Arc::new(StillScreen(frame)),
    ));
    let interpreter = Interpreter::new(
        Engines::new(engine, RecordingEngine::new(EngineKind::Python, false)),
        InterpreterSettings::default(),
    );
    let script = script(json!({
        "abort_on_error": false,
        "actions": [
            {"type": "click", "image": "missing.png"},
            {"type": "click", "image": "checker.png", "confidence": 0.95},
            {"type": "locate", "image": "visible.png"},
            {"type": "click", "x": 64, "y": 10}
        ]
    }))
    .with_base_dir(Some(dir.path().to_path_buf()));

    let result = interpreter.run(&script, &RunOptions::default()).await;

    assert_eq!(
        result.statuses(),
        vec![
            ActionStatus::Failed,
            ActionStatus::Failed,
            ActionStatus::Success,
            ActionStatus::Failed
        ]
    );
    assert!(result.results[0].details.starts_with("reference not resolvable"));
    assert!(result.results[1].details.starts_with("not found on screen"));
    assert!(
        result.results[2].details.starts_with("Found 'visible.png' at (20, 10)"),
        "{}",
        result.results[2].details
    );
    assert_eq!(
        result.results[3].details,
        "Point (64, 10) is outside the screen bounds"
    );
}
