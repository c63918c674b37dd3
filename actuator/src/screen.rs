//! Screen geometry and capture

use image::{imageops, RgbaImage};
use tracing::debug;

use crate::errors::CaptureError;
use crate::script::Region;

/// A monitor rectangle in global screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let (x, y) = (i64::from(x), i64::from(y));
        let left = i64::from(self.x);
        let top = i64::from(self.y);
        x >= left && y >= top && x < left + i64::from(self.width) && y < top + i64::from(self.height)
    }
}

impl From<Region> for Rect {
    fn from(region: Region) -> Self {
        Rect {
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
        }
    }
}

/// Captured pixels plus the global coordinates of their top-left corner
#[derive(Debug, Clone)]
pub struct Capture {
    pub image: RgbaImage,
    pub origin_x: i32,
    pub origin_y: i32,
}

/// The visual surface actions run against
pub trait Screen: Send + Sync {
    /// Rectangles of all attached monitors
    fn bounds(&self) -> Result<Vec<Rect>, CaptureError>;

    /// Capture the primary monitor, or the part of the monitor containing
    /// `region`'s top-left corner that overlaps `region`.
    fn capture(&self, region: Option<Region>) -> Result<Capture, CaptureError>;

    fn contains(&self, x: i32, y: i32) -> Result<bool, CaptureError> {
        Ok(self.bounds()?.iter().any(|rect| rect.contains(x, y)))
    }
}

/// Crop a full monitor capture down to `region` (given in global coordinates).
pub fn crop_to_region(capture: Capture, region: Option<Region>) -> Result<Capture, CaptureError> {
    let Some(region) = region else {
        return Ok(capture);
    };
    let left = i64::from(region.x) - i64::from(capture.origin_x);
    let top = i64::from(region.y) - i64::from(capture.origin_y);
    let right = (left + i64::from(region.width)).min(i64::from(capture.image.width()));
    let bottom = (top + i64::from(region.height)).min(i64::from(capture.image.height()));
    let (left, top) = (left.max(0), top.max(0));
    if right <= left || bottom <= top {
        return Err(CaptureError::RegionOutside(region));
    }
    let image = imageops::crop_imm(
        &capture.image,
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    )
    .to_image();
    Ok(Capture {
        image,
        origin_x: capture.origin_x + left as i32,
        origin_y: capture.origin_y + top as i32,
    })
}

/// [`Screen`] backed by `xcap` monitor capture
#[derive(Debug, Default, Clone)]
pub struct XcapScreen;

impl XcapScreen {
    pub fn new() -> Self {
        Self
    }

    fn monitors() -> Result<Vec<xcap::Monitor>, CaptureError> {
        xcap::Monitor::all()
            .map_err(|e| CaptureError::Backend(format!("Failed to get monitors: {e}")))
    }

    fn rect_of(monitor: &xcap::Monitor) -> Result<Rect, CaptureError> {
        let backend = |e: xcap::XCapError| CaptureError::Backend(format!("Monitor query failed: {e}"));
        Ok(Rect {
            x: monitor.x().map_err(backend)?,
            y: monitor.y().map_err(backend)?,
            width: monitor.width().map_err(backend)?,
            height: monitor.height().map_err(backend)?,
        })
    }
}

impl Screen for XcapScreen {
    fn bounds(&self) -> Result<Vec<Rect>, CaptureError> {
        Self::monitors()?.iter().map(Self::rect_of).collect()
    }

    fn capture(&self, region: Option<Region>) -> Result<Capture, CaptureError> {
        let monitors = Self::monitors()?;
        let mut chosen: Option<(xcap::Monitor, Rect)> = None;
        for monitor in monitors {
            let rect = Self::rect_of(&monitor)?;
            let wanted = match region {
                Some(region) => rect.contains(region.x, region.y),
                None => monitor.is_primary().unwrap_or(false),
            };
            if wanted {
                chosen = Some((monitor, rect));
                break;
            }
            if chosen.is_none() {
                chosen = Some((monitor, rect));
            }
        }
        let (monitor, rect) = chosen.ok_or(CaptureError::NoMonitor)?;

        let image = monitor
            .capture_image()
            .map_err(|e| CaptureError::Backend(format!("Failed to capture screen: {e}")))?;
        debug!(
            "Captured monitor at ({}, {}) {}x{}",
            rect.x,
            rect.y,
            image.width(),
            image.height()
        );
        crop_to_region(
            Capture {
                image,
                origin_x: rect.x,
                origin_y: rect.y,
            },
            region,
        )
    }
}
