//! Host input primitives (pointer, wheel, keyboard)

use rdev::{simulate, Button, EventType, Key};
use std::thread;
use std::time::Duration;
use tracing::trace;

use crate::errors::ActionError;
use crate::script::MouseButton;

/// Pause after each synthetic event so the OS event queue keeps up
const EVENT_DELAY: Duration = Duration::from_millis(20);

/// Low-level, blocking input operations. Implementations must be callable from
/// a blocking thread.
pub trait InputDriver: Send + Sync {
    fn move_to(&self, x: i32, y: i32) -> Result<(), ActionError>;

    fn button(&self, button: MouseButton, down: bool) -> Result<(), ActionError>;

    /// Positive `dy` scrolls up
    fn scroll(&self, dx: i64, dy: i64) -> Result<(), ActionError>;

    fn key(&self, key: Key, down: bool) -> Result<(), ActionError>;
}

/// [`InputDriver`] backed by `rdev::simulate`
#[derive(Debug, Default, Clone)]
pub struct RdevInput;

impl RdevInput {
    pub fn new() -> Self {
        Self
    }

    fn send(&self, event: EventType) -> Result<(), ActionError> {
        trace!("simulate {:?}", event);
        let outcome = simulate(&event)
            .map_err(|_| ActionError::Input(format!("could not simulate {event:?}")));
        thread::sleep(EVENT_DELAY);
        outcome
    }
}

impl InputDriver for RdevInput {
    fn move_to(&self, x: i32, y: i32) -> Result<(), ActionError> {
        self.send(EventType::MouseMove {
            x: f64::from(x),
            y: f64::from(y),
        })
    }

    fn button(&self, button: MouseButton, down: bool) -> Result<(), ActionError> {
        let button = match button {
            MouseButton::Left => Button::Left,
            MouseButton::Right => Button::Right,
            MouseButton::Middle => Button::Middle,
        };
        if down {
            self.send(EventType::ButtonPress(button))
        } else {
            self.send(EventType::ButtonRelease(button))
        }
    }

    fn scroll(&self, dx: i64, dy: i64) -> Result<(), ActionError> {
        self.send(EventType::Wheel {
            delta_x: dx,
            delta_y: dy,
        })
    }

    fn key(&self, key: Key, down: bool) -> Result<(), ActionError> {
        if down {
            self.send(EventType::KeyPress(key))
        } else {
            self.send(EventType::KeyRelease(key))
        }
    }
}
