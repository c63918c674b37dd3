use async_trait::async_trait;
use rdev::Key;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::task;
use tracing::{debug, instrument};

use super::{ActionContext, ActionEngine, EngineCapabilities, EngineKind};
use crate::errors::ActionError;
use crate::input::{InputDriver, RdevInput};
use crate::keys::{char_to_keystroke, key_from_name};
use crate::launch;
use crate::locator::{LocateRequest, Locator};
use crate::screen::{Screen, XcapScreen};
use crate::script::{Action, ImageTarget, Millis, MouseButton, PointerTarget};

/// Interval between interpolated pointer positions
const MOTION_STEP: Duration = Duration::from_millis(16);
const MAX_MOTION_STEPS: u64 = 240;

/// Native engine: synthetic input through an [`InputDriver`], capture and
/// image location through a [`Screen`].
#[derive(Clone)]
pub struct DesktopEngine {
    input: Arc<dyn InputDriver>,
    screen: Arc<dyn Screen>,
    locator: Locator,
    /// Last pointer position we moved to, used as the start of timed moves
    pointer: Arc<Mutex<Option<(i32, i32)>>>,
}

impl DesktopEngine {
    pub fn new(input: Arc<dyn InputDriver>, screen: Arc<dyn Screen>) -> Self {
        Self {
            input,
            locator: Locator::new(screen.clone()),
            screen,
            pointer: Arc::new(Mutex::new(None)),
        }
    }

    /// rdev input with xcap capture
    pub fn local() -> Self {
        Self::new(Arc::new(RdevInput::new()), Arc::new(XcapScreen::new()))
    }

    fn ensure_on_screen(&self, x: i32, y: i32) -> Result<(), ActionError> {
        if self.screen.contains(x, y)? {
            Ok(())
        } else {
            Err(ActionError::OutOfBounds { x, y })
        }
    }

    fn move_pointer(&self, x: i32, y: i32) -> Result<(), ActionError> {
        self.input.move_to(x, y)?;
        if let Ok(mut pointer) = self.pointer.lock() {
            *pointer = Some((x, y));
        }
        Ok(())
    }

    /// Move to `(x, y)`, interpolating from `from` over `duration` when both are known
    fn glide(
        &self,
        from: Option<(i32, i32)>,
        to: (i32, i32),
        duration: Option<Millis>,
    ) -> Result<(), ActionError> {
        let (Some((fx, fy)), Some(duration)) = (from, duration.filter(|d| d.0 > 0)) else {
            return self.move_pointer(to.0, to.1);
        };
        let steps = (duration.0 / MOTION_STEP.as_millis() as u64).clamp(1, MAX_MOTION_STEPS);
        let pause = duration.as_duration() / steps as u32;
        for step in 1..=steps {
            let t = step as f64 / steps as f64;
            let x = fx + ((to.0 - fx) as f64 * t).round() as i32;
            let y = fy + ((to.1 - fy) as f64 * t).round() as i32;
            self.move_pointer(x, y)?;
            thread::sleep(pause);
        }
        Ok(())
    }

    fn last_pointer(&self) -> Option<(i32, i32)> {
        self.pointer.lock().ok().and_then(|pointer| *pointer)
    }

    fn click_once(&self, button: MouseButton) -> Result<(), ActionError> {
        self.input.button(button, true)?;
        self.input.button(button, false)
    }

    /// Resolve a pointer target to a screen point plus a description of how
    fn resolve_point(
        &self,
        target: &PointerTarget,
        ctx: &ActionContext,
    ) -> Result<((i32, i32), String), ActionError> {
        match target {
            PointerTarget::At { x, y } => Ok(((*x, *y), format!("({x}, {y})"))),
            PointerTarget::Image(target) => {
                let found = self.locate(target, ctx)?;
                let center = found.center();
                Ok((
                    center,
                    format!(
                        "'{}' at ({}, {}) (confidence {:.3})",
                        target.image, center.0, center.1, found.confidence
                    ),
                ))
            }
        }
    }

    fn locate(
        &self,
        target: &ImageTarget,
        ctx: &ActionContext,
    ) -> Result<crate::locator::LocateMatch, ActionError> {
        let request = LocateRequest::from_target(target, ctx.default_confidence);
        Ok(self.locator.locate(&request, ctx.base_dir.as_deref())?)
    }

    fn click(
        &self,
        target: &PointerTarget,
        button: MouseButton,
        count: u32,
        ctx: &ActionContext,
    ) -> Result<String, ActionError> {
        let ((x, y), described) = self.resolve_point(target, ctx)?;
        self.ensure_on_screen(x, y)?;
        self.move_pointer(x, y)?;
        for _ in 0..count {
            self.click_once(button)?;
        }
        let verb = match (button, count) {
            (MouseButton::Right, _) => "Right-clicked",
            (_, 2) => "Double-clicked",
            _ => "Clicked",
        };
        Ok(format!("{verb} {described}"))
    }

    fn type_text(&self, text: &str, interval: Option<Millis>) -> Result<String, ActionError> {
        // Reject the whole text before typing any of it
        let strokes = text
            .chars()
            .map(|c| char_to_keystroke(c).ok_or_else(|| ActionError::UnknownKey(format!("{c:?}"))))
            .collect::<Result<Vec<_>, _>>()?;
        for (i, (key, shift)) in strokes.iter().enumerate() {
            if i > 0 {
                if let Some(interval) = interval {
                    thread::sleep(interval.as_duration());
                }
            }
            if *shift {
                self.input.key(Key::ShiftLeft, true)?;
            }
            let typed = self
                .input
                .key(*key, true)
                .and_then(|_| self.input.key(*key, false));
            if *shift {
                self.input.key(Key::ShiftLeft, false)?;
            }
            typed?;
        }
        Ok(format!("Typed {} characters", strokes.len()))
    }

    fn hotkey(&self, names: &[String]) -> Result<String, ActionError> {
        let keys = names
            .iter()
            .map(|name| key_from_name(name))
            .collect::<Result<Vec<_>, _>>()?;
        let mut pressed = Vec::with_capacity(keys.len());
        let mut outcome = Ok(());
        for key in &keys {
            if let Err(e) = self.input.key(*key, true) {
                outcome = Err(e);
                break;
            }
            pressed.push(*key);
        }
        for key in pressed.iter().rev() {
            let released = self.input.key(*key, false);
            if outcome.is_ok() {
                outcome = released;
            }
        }
        outcome.map(|_| format!("Pressed hotkey {}", names.join("+")))
    }

    fn screenshot(
        &self,
        path: Option<&str>,
        region: Option<crate::script::Region>,
        ctx: &ActionContext,
    ) -> Result<String, ActionError> {
        let capture = self.screen.capture(region)?;
        let target = ctx.screenshot_path(path);
        let output_error = |reason: String| ActionError::Output {
            path: target.display().to_string(),
            reason,
        };
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| output_error(e.to_string()))?;
        }
        capture
            .image
            .save_with_format(&target, image::ImageFormat::Png)
            .map_err(|e| output_error(e.to_string()))?;
        Ok(format!(
            "Saved {}x{} screenshot to {}",
            capture.image.width(),
            capture.image.height(),
            target.display()
        ))
    }

    /// Everything that touches the OS. Runs on a blocking thread.
    fn perform_blocking(&self, action: &Action, ctx: &ActionContext) -> Result<String, ActionError> {
        match action {
            Action::Move { x, y, duration } => {
                self.ensure_on_screen(*x, *y)?;
                self.glide(self.last_pointer(), (*x, *y), *duration)?;
                Ok(format!("Moved pointer to ({x}, {y})"))
            }
            Action::Click(target) => self.click(target, MouseButton::Left, 1, ctx),
            Action::Doubleclick(target) => self.click(target, MouseButton::Left, 2, ctx),
            Action::Rightclick(target) => self.click(target, MouseButton::Right, 1, ctx),
            Action::Drag {
                from_x,
                from_y,
                to_x,
                to_y,
                button,
                duration,
            } => {
                self.ensure_on_screen(*from_x, *from_y)?;
                self.ensure_on_screen(*to_x, *to_y)?;
                self.move_pointer(*from_x, *from_y)?;
                self.input.button(*button, true)?;
                let moved = self.glide(
                    Some((*from_x, *from_y)),
                    (*to_x, *to_y),
                    Some(duration.unwrap_or(Millis(200))),
                );
                self.input.button(*button, false)?;
                moved?;
                Ok(format!(
                    "Dragged from ({from_x}, {from_y}) to ({to_x}, {to_y})"
                ))
            }
            Action::Scroll { amount, x, y } => {
                match (x, y) {
                    (Some(x), Some(y)) => {
                        self.ensure_on_screen(*x, *y)?;
                        self.move_pointer(*x, *y)?;
                    }
                    (None, None) => {}
                    _ => {
                        return Err(ActionError::Input(
                            "scroll position needs both x and y".to_string(),
                        ))
                    }
                }
                self.input.scroll(0, i64::from(*amount))?;
                Ok(format!("Scrolled {amount}"))
            }
            Action::Press { key, presses } => {
                let code = key_from_name(key)?;
                for _ in 0..*presses {
                    self.input.key(code, true)?;
                    self.input.key(code, false)?;
                }
                Ok(format!("Pressed '{key}' {presses} time(s)"))
            }
            Action::Type { text, interval } => self.type_text(text, *interval),
            Action::Hotkey { keys } => self.hotkey(keys),
            Action::Wait { .. } => Err(ActionError::Internal(
                "wait is run by the interpreter, not the engine".to_string(),
            )),
            Action::Launch { path, args } => {
                let pid = launch::launch(path, args)?;
                Ok(format!("Launched '{path}' (pid {pid})"))
            }
            Action::Screenshot { path, region } => self.screenshot(path.as_deref(), *region, ctx),
            Action::Locate(target) => {
                let found = self.locate(target, ctx)?;
                Ok(format!(
                    "Found '{}' at ({}, {}) size {}x{} confidence {:.3} ({:?} pass)",
                    target.image,
                    found.x,
                    found.y,
                    found.width,
                    found.height,
                    found.confidence,
                    found.pass
                ))
            }
        }
    }
}

#[async_trait]
impl ActionEngine for DesktopEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Desktop
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            image_location: true,
        }
    }

    #[instrument(level = "debug", skip(self, ctx), fields(kind = action.kind()))]
    async fn perform(&self, action: &Action, ctx: &ActionContext) -> Result<String, ActionError> {
        debug!("desktop: {}", action);
        let engine = self.clone();
        let action = action.clone();
        let ctx = ctx.clone();
        task::spawn_blocking(move || engine.perform_blocking(&action, &ctx))
            .await
            .map_err(|e| ActionError::Internal(format!("Task join error: {e}")))?
    }
}
