//! Draws detection boxes and classification labels onto a copy of the
//! input image.
//!
//! Outline colour follows the currency family of the label: NIS blue,
//! Euro orange, USD green, anything else (including `Unknown`) red.
//! Label text uses the bundled DejaVu Sans unless another font is given.

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::warn;

use crate::currency::Family;
use crate::types::{Classification, DetectedRegion};

const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
const ORANGE: Rgb<u8> = Rgb([255, 165, 0]);
const GREEN: Rgb<u8> = Rgb([0, 128, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Padding around label text, in pixels.
const LABEL_PADDING: u32 = 2;

static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

/// The bundled label font.
pub fn default_font() -> Option<FontArc> {
    match FontArc::try_from_slice(DEFAULT_FONT) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!(error = %e, "Bundled font is unreadable, labels will have no text");
            None
        }
    }
}

/// Outline colour for a classifier label.
pub fn family_color(label: &str) -> Rgb<u8> {
    match Family::from_label(label) {
        Some(Family::Nis) => BLUE,
        Some(Family::Euro) => ORANGE,
        Some(Family::Usd) => GREEN,
        None => RED,
    }
}

/// Text shown next to a box.
pub fn label_text(region: &DetectedRegion, classification: &Classification) -> String {
    match classification {
        Classification::Known { label, confidence } => format!("{label} ({confidence:.2})"),
        Classification::Unknown => {
            format!("{} ({:.2}) - Unknown", region.raw_label, region.confidence)
        }
    }
}

pub struct Annotator {
    font: Option<FontArc>,
    scale: PxScale,
    thickness: u32,
}

impl Annotator {
    pub fn new() -> Self {
        Self {
            font: default_font(),
            scale: PxScale::from(18.0),
            thickness: 2,
        }
    }

    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    /// Draw label backgrounds only.
    pub fn without_text(mut self) -> Self {
        self.font = None;
        self
    }

    pub fn with_scale(mut self, px: f32) -> Self {
        self.scale = PxScale::from(px);
        self
    }

    pub fn with_thickness(mut self, thickness: u32) -> Self {
        self.thickness = thickness.max(1);
        self
    }

    /// Load a TrueType/OpenType font for label text.
    pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read font file {}", path.display()))?;
        FontArc::try_from_vec(bytes)
            .map_err(|e| anyhow!("Invalid font file {}: {e}", path.display()))
    }

    /// Return a new image with every `(box, label)` pair drawn on it.
    /// The input is never modified; with no boxes the copy is pixel-identical.
    pub fn annotate(
        &self,
        image: &RgbImage,
        boxes: &[DetectedRegion],
        labels: &[Classification],
    ) -> RgbImage {
        let mut canvas = image.clone();

        if boxes.len() != labels.len() {
            warn!(
                boxes = boxes.len(),
                labels = labels.len(),
                "Box/label count mismatch, annotating the common prefix"
            );
        }

        for (region, classification) in boxes.iter().zip(labels) {
            let region = &self.near_canvas(region, canvas.dimensions());
            let color = family_color(classification.label());
            self.draw_box(&mut canvas, region, color);
            self.draw_label(&mut canvas, region, &label_text(region, classification), color);
        }

        canvas
    }

    /// Pull far-off coordinates in to just past the canvas edge, where the
    /// outline still falls off-canvas but the drawing maths stays in range.
    fn near_canvas(&self, region: &DetectedRegion, (w, h): (u32, u32)) -> DetectedRegion {
        let margin = i64::from(self.thickness) + 1;
        let fit = |v: i32, dim: u32| {
            (v as i64)
                .clamp(-margin, dim as i64 + margin)
                .clamp(i32::MIN as i64, i32::MAX as i64) as i32
        };
        DetectedRegion {
            x1: fit(region.x1, w),
            y1: fit(region.y1, h),
            x2: fit(region.x2, w),
            y2: fit(region.y2, h),
            ..region.clone()
        }
    }

    fn draw_box(&self, canvas: &mut RgbImage, region: &DetectedRegion, color: Rgb<u8>) {
        let (w, h) = (region.width(), region.height());
        for t in 0..self.thickness {
            if w <= 2 * t || h <= 2 * t {
                break;
            }
            let rect = Rect::at(region.x1.saturating_add(t as i32), region.y1.saturating_add(t as i32))
                .of_size(w - 2 * t, h - 2 * t);
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }

    fn draw_label(&self, canvas: &mut RgbImage, region: &DetectedRegion, text: &str, bg: Rgb<u8>) {
        let (text_w, text_h) = match &self.font {
            Some(font) => text_size(self.scale, font, text),
            None => {
                let char_w = (self.scale.x * 0.6).ceil() as u32;
                (char_w * text.chars().count() as u32, self.scale.y.ceil() as u32)
            }
        };
        let bg_w = text_w + 2 * LABEL_PADDING;
        let bg_h = text_h.max(1) + 2 * LABEL_PADDING;

        // Above the box when there is room, otherwise just inside it.
        let y = if region.y1 >= bg_h as i32 {
            region.y1.saturating_sub(bg_h as i32)
        } else {
            region.y1
        };

        draw_filled_rect_mut(canvas, Rect::at(region.x1, y).of_size(bg_w, bg_h), bg);

        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                WHITE,
                region.x1.saturating_add(LABEL_PADDING as i32),
                y.saturating_add(LABEL_PADDING as i32),
                self.scale,
                font,
                text,
            );
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
