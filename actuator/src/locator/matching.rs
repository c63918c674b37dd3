//! Zero-mean normalized cross-correlation template matching
//!
//! Scores are in `0.0..=1.0`; 1.0 is a pixel-exact (up to brightness/contrast)
//! match. Large templates are searched coarse-to-fine: a box-downscaled pass
//! scores every position and each local peak close to the top coarse score is
//! refined at full resolution. Look-alike regions can crowd the true match out
//! of the coarse ranking, so when refinement finds no exact match the whole
//! frame is searched at full resolution. Neither step depends on the caller's
//! threshold, so the reported best score is a property of the frame alone.

use image::RgbaImage;
use std::cmp::Ordering;

/// Templates are downscaled until their short side would drop below this
const COARSE_MIN_SIDE: u32 = 6;
const MAX_SCALE: u32 = 8;
/// Coarse peaks scoring this far below the top coarse score are not refined
const COARSE_MARGIN: f32 = 0.25;
const MAX_COARSE_PEAKS: usize = 64;
/// A refined score at or above this ends the search without the full pass
const EXACT_SCORE: f32 = 0.999;
/// Below this sum of squared deviations a window counts as flat
const FLAT_VARIANCE: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channels {
    /// R, G and B compared as one vector
    Color,
    /// Luma only
    Gray,
}

/// A scored top-left position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

impl Scored {
    /// Higher score wins; ties go to the top-most, then left-most position
    fn beats(&self, other: &Scored) -> bool {
        self.rank(other) == Ordering::Less
    }

    fn rank(&self, other: &Scored) -> Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then((self.y, self.x).cmp(&(other.y, other.x)))
    }
}

struct Plane {
    width: u32,
    height: u32,
    channels: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_rgba(image: &RgbaImage, mode: Channels) -> Self {
        let channels = match mode {
            Channels::Color => 3,
            Channels::Gray => 1,
        };
        let mut data = Vec::with_capacity(image.width() as usize * image.height() as usize * channels);
        for pixel in image.pixels() {
            let [r, g, b, _] = pixel.0;
            let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
            match mode {
                Channels::Color => data.extend_from_slice(&[r, g, b]),
                Channels::Gray => data.push(0.299 * r + 0.587 * g + 0.114 * b),
            }
        }
        Self {
            width: image.width(),
            height: image.height(),
            channels,
            data,
        }
    }

    fn row_offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels
    }

    /// Box-average downscale; trailing pixels that do not fill a box are dropped
    fn downsample(&self, factor: u32) -> Plane {
        let width = self.width / factor;
        let height = self.height / factor;
        let area = (factor * factor) as f32;
        let mut data = vec![0.0f32; width as usize * height as usize * self.channels];
        for y in 0..height {
            for x in 0..width {
                let out = (y as usize * width as usize + x as usize) * self.channels;
                for dy in 0..factor {
                    let row = self.row_offset(x * factor, y * factor + dy);
                    for dx in 0..factor as usize {
                        for c in 0..self.channels {
                            data[out + c] += self.data[row + dx * self.channels + c];
                        }
                    }
                }
                for value in &mut data[out..out + self.channels] {
                    *value /= area;
                }
            }
        }
        Plane {
            width,
            height,
            channels: self.channels,
            data,
        }
    }
}

struct PreparedTemplate<'a> {
    plane: &'a Plane,
    centered: Vec<f64>,
    mean: f64,
    norm: f64,
}

impl<'a> PreparedTemplate<'a> {
    fn new(plane: &'a Plane) -> Self {
        let n = plane.data.len().max(1) as f64;
        let mean = plane.data.iter().map(|v| f64::from(*v)).sum::<f64>() / n;
        let centered: Vec<f64> = plane.data.iter().map(|v| f64::from(*v) - mean).collect();
        let norm = centered.iter().map(|v| v * v).sum::<f64>().sqrt();
        Self {
            plane,
            centered,
            mean,
            norm,
        }
    }

    fn score_at(&self, haystack: &Plane, x: u32, y: u32) -> f32 {
        let row_len = self.plane.width as usize * self.plane.channels;
        let n = self.centered.len() as f64;
        let (mut sum, mut sum_sq, mut cross) = (0.0f64, 0.0f64, 0.0f64);
        for ty in 0..self.plane.height {
            let start = haystack.row_offset(x, y + ty);
            let window = &haystack.data[start..start + row_len];
            let template = &self.centered[ty as usize * row_len..(ty as usize + 1) * row_len];
            for (v, t) in window.iter().zip(template) {
                let v = f64::from(*v);
                sum += v;
                sum_sq += v * v;
                cross += t * v;
            }
        }
        let variance = (sum_sq - sum * sum / n).max(0.0);

        let score = if self.norm * self.norm < FLAT_VARIANCE {
            // Flat template: only a flat window of the same brightness matches
            if variance < FLAT_VARIANCE {
                1.0 - ((sum / n) - self.mean).abs() / 255.0
            } else {
                0.0
            }
        } else if variance < FLAT_VARIANCE {
            0.0
        } else {
            cross / (self.norm * variance.sqrt())
        };
        score.clamp(0.0, 1.0) as f32
    }

    fn search(
        &self,
        haystack: &Plane,
        xs: std::ops::RangeInclusive<u32>,
        ys: std::ops::RangeInclusive<u32>,
        best: &mut Option<Scored>,
    ) {
        for y in ys {
            for x in xs.clone() {
                let candidate = Scored {
                    x,
                    y,
                    score: self.score_at(haystack, x, y),
                };
                if best.map_or(true, |b| candidate.beats(&b)) {
                    *best = Some(candidate);
                }
            }
        }
    }
}

/// Best-scoring top-left position of `template` inside `haystack`, or `None`
/// if the template does not fit.
pub fn find_best(haystack: &RgbaImage, template: &RgbaImage, mode: Channels) -> Option<Scored> {
    let (tw, th) = template.dimensions();
    let (hw, hh) = haystack.dimensions();
    if tw == 0 || th == 0 || tw > hw || th > hh {
        return None;
    }
    let haystack = Plane::from_rgba(haystack, mode);
    let template = Plane::from_rgba(template, mode);
    let (max_x, max_y) = (hw - tw, hh - th);

    let scale = (tw.min(th) / COARSE_MIN_SIDE).clamp(1, MAX_SCALE);
    let mut best = None;
    if scale == 1 {
        PreparedTemplate::new(&template).search(&haystack, 0..=max_x, 0..=max_y, &mut best);
        return best;
    }

    let coarse_haystack = haystack.downsample(scale);
    let coarse_template = template.downsample(scale);
    let full = PreparedTemplate::new(&template);
    for candidate in coarse_peaks(&coarse_haystack, &coarse_template) {
        let cx = candidate.x * scale;
        let cy = candidate.y * scale;
        let xs = cx.saturating_sub(scale)..=(cx + scale).min(max_x);
        let ys = cy.saturating_sub(scale)..=(cy + scale).min(max_y);
        full.search(&haystack, xs, ys, &mut best);
    }

    if best.map_or(true, |b| b.score < EXACT_SCORE) {
        best = None;
        full.search(&haystack, 0..=max_x, 0..=max_y, &mut best);
    }
    best
}

/// Coarse positions that no 8-neighbour beats, within [`COARSE_MARGIN`] of the
/// best coarse score, best first
fn coarse_peaks(haystack: &Plane, template: &Plane) -> Vec<Scored> {
    let coarse = PreparedTemplate::new(template);
    let cols = (haystack.width - template.width + 1) as usize;
    let rows = (haystack.height - template.height + 1) as usize;
    let mut scores = Vec::with_capacity(cols * rows);
    for y in 0..rows as u32 {
        for x in 0..cols as u32 {
            scores.push(coarse.score_at(haystack, x, y));
        }
    }
    let top = scores.iter().copied().fold(0.0f32, f32::max);

    let mut peaks = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            let score = scores[row * cols + col];
            if score < top - COARSE_MARGIN {
                continue;
            }
            let neighbours_lower = (row.saturating_sub(1)..=(row + 1).min(rows - 1)).all(|r| {
                (col.saturating_sub(1)..=(col + 1).min(cols - 1))
                    .all(|c| scores[r * cols + c] <= score)
            });
            if neighbours_lower {
                peaks.push(Scored {
                    x: col as u32,
                    y: row as u32,
                    score,
                });
            }
        }
    }
    peaks.sort_by(|a, b| a.rank(b));
    peaks.truncate(MAX_COARSE_PEAKS);
    peaks
}
