use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::errors::LocateError;
use crate::screen::Screen;
use crate::script::{ImageTarget, Region};

pub mod matching;

use matching::{find_best, Channels, Scored};

/// Confidence used when neither the action nor the configuration sets one
pub const DEFAULT_CONFIDENCE: f32 = 0.9;

/// Conventional subdirectory searched last for reference images
pub const EXAMPLES_DIR: &str = "examples";

/// What to look for and how sure we need to be
#[derive(Debug, Clone, PartialEq)]
pub struct LocateRequest {
    pub image: String,
    /// Minimum accepted score, `0.0..=1.0`
    pub confidence: f32,
    /// Limit the search to this screen region; whole primary screen if `None`
    pub region: Option<Region>,
}

impl LocateRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            confidence: DEFAULT_CONFIDENCE,
            region: None,
        }
    }

    pub fn from_target(target: &ImageTarget, default_confidence: f32) -> Self {
        Self {
            image: target.image.clone(),
            confidence: target.confidence.unwrap_or(default_confidence),
            region: target.region,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Which pass produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPass {
    Color,
    Grayscale,
}

/// The single best match for a request, in global screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocateMatch {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
    pub pass: MatchPass,
}

impl LocateMatch {
    pub fn center(&self) -> (i32, i32) {
        (
            self.x + (self.width / 2) as i32,
            self.y + (self.height / 2) as i32,
        )
    }
}

/// Result of matching one template against one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemplateSearch {
    Found { at: Scored, pass: MatchPass },
    NotFound { best: f32 },
}

/// Match `template` against `frame`: a color pass first, then a grayscale pass
/// if the color score stays below `threshold`.
pub fn search_template(
    frame: &image::RgbaImage,
    template: &image::RgbaImage,
    threshold: f32,
) -> TemplateSearch {
    let color = find_best(frame, template, Channels::Color);
    if let Some(at) = color.filter(|c| c.score >= threshold) {
        return TemplateSearch::Found {
            at,
            pass: MatchPass::Color,
        };
    }
    let gray = find_best(frame, template, Channels::Gray);
    if let Some(at) = gray.filter(|g| g.score >= threshold) {
        return TemplateSearch::Found {
            at,
            pass: MatchPass::Grayscale,
        };
    }
    let best = color
        .iter()
        .chain(gray.iter())
        .map(|s| s.score)
        .fold(0.0f32, f32::max);
    TemplateSearch::NotFound { best }
}

/// Resolve an image reference: absolute path, then relative to `cwd`, then to
/// `script_dir`, then the `examples/` subdirectory of each. First existing file wins.
pub fn resolve_image_path(
    reference: &str,
    cwd: Option<&Path>,
    script_dir: Option<&Path>,
) -> Option<PathBuf> {
    if reference.trim().is_empty() {
        return None;
    }
    let reference = Path::new(reference);
    if reference.is_absolute() {
        return reference.is_file().then(|| reference.to_path_buf());
    }

    let mut candidates = Vec::with_capacity(4);
    candidates.extend(cwd.map(|dir| dir.join(reference)));
    candidates.extend(script_dir.map(|dir| dir.join(reference)));
    candidates.extend(cwd.map(|dir| dir.join(EXAMPLES_DIR).join(reference)));
    candidates.extend(script_dir.map(|dir| dir.join(EXAMPLES_DIR).join(reference)));
    candidates.into_iter().find(|candidate| candidate.is_file())
}

/// Finds reference images on a [`Screen`]
#[derive(Clone)]
pub struct Locator {
    screen: Arc<dyn Screen>,
}

impl Locator {
    pub fn new(screen: Arc<dyn Screen>) -> Self {
        Self { screen }
    }

    /// Blocking locate: resolve, load, capture, match.
    #[instrument(level = "debug", skip(self, script_dir), fields(image = %request.image))]
    pub fn locate(
        &self,
        request: &LocateRequest,
        script_dir: Option<&Path>,
    ) -> Result<LocateMatch, LocateError> {
        let cwd = std::env::current_dir().ok();
        let path = resolve_image_path(&request.image, cwd.as_deref(), script_dir)
            .ok_or_else(|| LocateError::Unresolvable(request.image.clone()))?;
        let template = image::open(&path)
            .map_err(|e| LocateError::InvalidImage {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
            .to_rgba8();

        let capture = self.screen.capture(request.region)?;
        debug!(
            "Searching {}x{} template in {}x{} capture at ({}, {})",
            template.width(),
            template.height(),
            capture.image.width(),
            capture.image.height(),
            capture.origin_x,
            capture.origin_y
        );

        match search_template(&capture.image, &template, request.confidence) {
            TemplateSearch::Found { at, pass } => Ok(LocateMatch {
                x: capture.origin_x + at.x as i32,
                y: capture.origin_y + at.y as i32,
                width: template.width(),
                height: template.height(),
                confidence: at.score,
                pass,
            }),
            TemplateSearch::NotFound { best } => Err(LocateError::NotFound {
                image: request.image.clone(),
                best,
                threshold: request.confidence,
            }),
        }
    }
}
