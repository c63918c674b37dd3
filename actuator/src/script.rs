//! Action scripts: the declarative, ordered list of operations run for one task

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::duration::parse_millis;
use crate::errors::ScriptError;

/// Which engine should run the script. `Auto` lets the interpreter decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorHint {
    #[default]
    Auto,
    #[serde(alias = "native", alias = "rust")]
    Desktop,
    #[serde(alias = "pyautogui")]
    Python,
}

/// A parsed, validated script. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionScript {
    pub name: String,
    pub description: String,
    pub abort_on_error: bool,
    pub executor: ExecutorHint,
    pub actions: Vec<Action>,
    /// Directory of the script file, used to resolve relative image references
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

fn default_abort_on_error() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RawScript {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_abort_on_error", alias = "abortOnError")]
    abort_on_error: bool,
    #[serde(default, alias = "executorHint", alias = "executor_hint")]
    executor: ExecutorHint,
    #[serde(default)]
    actions: Vec<serde_json::Value>,
}

impl ActionScript {
    pub fn from_json_str(input: &str) -> Result<Self, ScriptError> {
        let raw: RawScript = serde_json::from_str(input)?;
        Self::from_raw(raw)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, ScriptError> {
        let raw: RawScript = serde_yaml::from_str(input)?;
        Self::from_raw(raw)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ScriptError> {
        let raw: RawScript = serde_json::from_value(value)?;
        Self::from_raw(raw)
    }

    /// Load a script file. `.yml`/`.yaml` files are parsed as YAML, anything else as JSON.
    pub fn from_file(path: &Path) -> Result<Self, ScriptError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScriptError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));
        let script = if is_yaml {
            Self::from_yaml_str(&content)?
        } else {
            Self::from_json_str(&content)?
        };
        let base_dir = path
            .canonicalize()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .or_else(|| path.parent().map(Path::to_path_buf));
        Ok(script.with_base_dir(base_dir))
    }

    pub fn with_base_dir(mut self, base_dir: Option<PathBuf>) -> Self {
        self.base_dir = base_dir;
        self
    }

    fn from_raw(raw: RawScript) -> Result<Self, ScriptError> {
        let actions = raw
            .actions
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                let kind = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("<missing type>")
                    .to_string();
                serde_json::from_value::<Action>(value).map_err(|e| ScriptError::InvalidAction {
                    index,
                    kind,
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: raw.name,
            description: raw.description,
            abort_on_error: raw.abort_on_error,
            executor: raw.executor,
            actions,
            base_dir: None,
        })
    }

    /// True if any action has to find an image on screen
    pub fn needs_image_location(&self) -> bool {
        self.actions.iter().any(Action::needs_image_location)
    }
}

/// One step of a script. Each variant carries only the parameters it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    #[serde(alias = "mouse_move", alias = "moveto", alias = "move_to")]
    Move {
        x: i32,
        y: i32,
        #[serde(default)]
        duration: Option<Millis>,
    },
    Click(PointerTarget),
    #[serde(alias = "double_click")]
    Doubleclick(PointerTarget),
    #[serde(alias = "right_click")]
    Rightclick(PointerTarget),
    Drag {
        from_x: i32,
        from_y: i32,
        to_x: i32,
        to_y: i32,
        #[serde(default)]
        button: MouseButton,
        #[serde(default)]
        duration: Option<Millis>,
    },
    Scroll {
        amount: i32,
        #[serde(default)]
        x: Option<i32>,
        #[serde(default)]
        y: Option<i32>,
    },
    #[serde(alias = "key", alias = "keypress")]
    Press {
        key: String,
        #[serde(default = "default_presses")]
        presses: u32,
    },
    #[serde(alias = "write", alias = "typewrite")]
    Type {
        text: String,
        #[serde(default)]
        interval: Option<Millis>,
    },
    Hotkey {
        #[serde(deserialize_with = "non_empty_keys")]
        keys: Vec<String>,
    },
    #[serde(alias = "sleep", alias = "delay")]
    Wait { duration: Millis },
    #[serde(alias = "open", alias = "launch_app")]
    Launch {
        path: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Screenshot {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        region: Option<Region>,
    },
    #[serde(alias = "locate_image", alias = "locateimage", alias = "find_image")]
    Locate(ImageTarget),
}

fn default_presses() -> u32 {
    1
}

fn non_empty_keys<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let keys = Vec::<String>::deserialize(deserializer)?;
    if keys.is_empty() || keys.iter().any(|k| k.trim().is_empty()) {
        return Err(serde::de::Error::custom(
            "hotkey requires a non-empty list of key names",
        ));
    }
    Ok(keys)
}

impl Action {
    /// Stable, lowercase kind name used in results and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Move { .. } => "move",
            Action::Click(_) => "click",
            Action::Doubleclick(_) => "doubleclick",
            Action::Rightclick(_) => "rightclick",
            Action::Drag { .. } => "drag",
            Action::Scroll { .. } => "scroll",
            Action::Press { .. } => "press",
            Action::Type { .. } => "type",
            Action::Hotkey { .. } => "hotkey",
            Action::Wait { .. } => "wait",
            Action::Launch { .. } => "launch",
            Action::Screenshot { .. } => "screenshot",
            Action::Locate(_) => "locate",
        }
    }

    pub fn needs_image_location(&self) -> bool {
        self.image_target().is_some()
    }

    /// The image reference this action depends on, if any
    pub fn image_target(&self) -> Option<&ImageTarget> {
        match self {
            Action::Click(PointerTarget::Image(target))
            | Action::Doubleclick(PointerTarget::Image(target))
            | Action::Rightclick(PointerTarget::Image(target))
            | Action::Locate(target) => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Move { x, y, .. } => write!(f, "move to ({x}, {y})"),
            Action::Click(target) => write!(f, "click {target}"),
            Action::Doubleclick(target) => write!(f, "double-click {target}"),
            Action::Rightclick(target) => write!(f, "right-click {target}"),
            Action::Drag {
                from_x,
                from_y,
                to_x,
                to_y,
                button,
                ..
            } => write!(
                f,
                "drag {button:?} from ({from_x}, {from_y}) to ({to_x}, {to_y})"
            ),
            Action::Scroll { amount, .. } => write!(f, "scroll {amount}"),
            Action::Press { key, presses } => write!(f, "press '{key}' x{presses}"),
            Action::Type { text, .. } => write!(f, "type {} characters", text.chars().count()),
            Action::Hotkey { keys } => write!(f, "hotkey {}", keys.join("+")),
            Action::Wait { duration } => write!(f, "wait {}ms", duration.0),
            Action::Launch { path, .. } => write!(f, "launch '{path}'"),
            Action::Screenshot { path, .. } => match path {
                Some(path) => write!(f, "screenshot to '{path}'"),
                None => write!(f, "screenshot"),
            },
            Action::Locate(target) => write!(f, "locate image '{}'", target.image),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// Screen-space rectangle limiting a capture or search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// A duration in milliseconds. Deserializes from a number of milliseconds or a
/// human-readable string such as `"1.5s"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Millis(pub u64);

impl Millis {
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl<'de> Deserialize<'de> for Millis {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawMillis {
            Integer(u64),
            Float(f64),
            Text(String),
        }

        match RawMillis::deserialize(deserializer)? {
            RawMillis::Integer(ms) => Ok(Millis(ms)),
            RawMillis::Float(ms) if ms.is_finite() && ms >= 0.0 => Ok(Millis(ms.round() as u64)),
            RawMillis::Float(ms) => Err(serde::de::Error::custom(format!(
                "duration must be non-negative, got {ms}"
            ))),
            RawMillis::Text(text) => parse_millis(&text)
                .map(Millis)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Reference image plus matching parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawImageTarget")]
pub struct ImageTarget {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
}

#[derive(Debug, Deserialize)]
struct RawImageTarget {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    region: Option<Region>,
}

impl ImageTarget {
    pub fn new(
        image: Option<String>,
        confidence: Option<f32>,
        region: Option<Region>,
    ) -> Result<Self, String> {
        let image = match image {
            Some(image) if !image.trim().is_empty() => image,
            _ => return Err("an image reference is required".to_string()),
        };
        if let Some(confidence) = confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(format!(
                    "confidence must be between 0.0 and 1.0, got {confidence}"
                ));
            }
        }
        Ok(Self {
            image,
            confidence,
            region,
        })
    }
}

impl TryFrom<RawImageTarget> for ImageTarget {
    type Error = String;

    fn try_from(raw: RawImageTarget) -> Result<Self, Self::Error> {
        ImageTarget::new(raw.image, raw.confidence, raw.region)
    }
}

/// Where a pointer action lands: explicit coordinates or the center of a located image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPointerTarget", into = "RawPointerTarget")]
pub enum PointerTarget {
    At { x: i32, y: i32 },
    Image(ImageTarget),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawPointerTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    region: Option<Region>,
}

impl TryFrom<RawPointerTarget> for PointerTarget {
    type Error = String;

    fn try_from(raw: RawPointerTarget) -> Result<Self, Self::Error> {
        match (raw.x, raw.y, raw.image) {
            (Some(_), Some(_), Some(_)) => {
                Err("takes either x/y coordinates or an image, not both".to_string())
            }
            (Some(x), Some(y), None) => Ok(PointerTarget::At { x, y }),
            (None, None, Some(image)) => Ok(PointerTarget::Image(ImageTarget::new(
                Some(image),
                raw.confidence,
                raw.region,
            )?)),
            (Some(_), None, _) | (None, Some(_), _) => {
                Err("both x and y are required for a coordinate target".to_string())
            }
            (None, None, None) => {
                Err("requires either x/y coordinates or an image reference".to_string())
            }
        }
    }
}

impl From<PointerTarget> for RawPointerTarget {
    fn from(target: PointerTarget) -> Self {
        match target {
            PointerTarget::At { x, y } => RawPointerTarget {
                x: Some(x),
                y: Some(y),
                ..Default::default()
            },
            PointerTarget::Image(target) => RawPointerTarget {
                image: Some(target.image),
                confidence: target.confidence,
                region: target.region,
                ..Default::default()
            },
        }
    }
}

impl fmt::Display for PointerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerTarget::At { x, y } => write!(f, "at ({x}, {y})"),
            PointerTarget::Image(target) => write!(f, "on image '{}'", target.image),
        }
    }
}
