//! Gallery Shield - Canvas
//!
//! Off-DOM drawing surface. Pixels drawn from a non-clean origin taint the
//! canvas, after which read-back fails the way `getImageData` does.
//!
//! Watermarks are burned into the pixels. Text is drawn as a band of glyph
//! blocks, one per non-space character, so no font rasterizer is needed and
//! every tile computes coverage from the same global geometry.

use std::io::Cursor;

use image::{imageops, ImageFormat, Pixel, Rgba, RgbaImage};
use serde::Serialize;
use zeroize::Zeroize;

use crate::error::{ShieldError, ShieldResult};
use crate::render::fragment::TileRect;
use crate::render::watermark::{WatermarkMark, WatermarkPlan};

/// Recorded drawing operation, exported alongside the tile pixels
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    /// Source region copied into the canvas at (0, 0)
    Image {
        src_x: u32,
        src_y: u32,
        width: u32,
        height: u32,
    },
    /// Repeated diagonal text, blended over the image
    Watermark {
        text: String,
        opacity: f32,
        angle_degrees: f32,
        font_px: u32,
        marks: Vec<WatermarkMark>,
    },
}

/// Share of a glyph cell (and of the font height) that carries ink
const INK_FILL: f32 = 0.7;

/// Luma above which ink darkens instead of lightens
const LIGHT_LUMA: u8 = 160;

/// A canvas element holding one tile (or the whole image)
pub struct Canvas {
    rect: TileRect,
    pixels: RgbaImage,
    ops: Vec<DrawOp>,
    origin_clean: bool,
    released: bool,
}

impl Canvas {
    /// Blank canvas placed at `rect` within the full image
    pub fn new(rect: TileRect) -> Self {
        Self {
            rect,
            pixels: RgbaImage::new(rect.width, rect.height),
            ops: Vec::new(),
            origin_clean: true,
            released: false,
        }
    }

    pub fn rect(&self) -> &TileRect {
        &self.rect
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn origin_clean(&self) -> bool {
        self.origin_clean
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Copy this canvas's region of `source`
    pub fn draw_image(&mut self, source: &RgbaImage, origin_clean: bool) -> ShieldResult<()> {
        let TileRect { x, y, width, height, .. } = self.rect;
        if x + width > source.width() || y + height > source.height() {
            return Err(ShieldError::InvalidGrid {
                columns: 1,
                rows: 1,
                width: source.width(),
                height: source.height(),
            });
        }

        let region = imageops::crop_imm(source, x, y, width, height).to_image();
        imageops::replace(&mut self.pixels, &region, 0, 0);
        self.ops.push(DrawOp::Image {
            src_x: x,
            src_y: y,
            width,
            height,
        });

        if !origin_clean {
            self.origin_clean = false;
        }
        Ok(())
    }

    /// Draw this tile's share of a watermark after the image
    pub fn draw_watermark(&mut self, plan: &WatermarkPlan) {
        let marks = plan.for_tile(&self.rect);
        if marks.is_empty() {
            return;
        }
        rasterize_watermark(&mut self.pixels, plan, &marks);
        self.ops.push(DrawOp::Watermark {
            text: plan.text.clone(),
            opacity: plan.opacity,
            angle_degrees: plan.angle_degrees,
            font_px: plan.font_px,
            marks,
        });
    }

    /// Pixel read-back; blocked once tainted or released
    pub fn read_pixels(&self) -> ShieldResult<&RgbaImage> {
        if !self.origin_clean || self.released {
            return Err(ShieldError::CanvasAccessBlocked);
        }
        Ok(&self.pixels)
    }

    /// PNG export of the canvas contents
    pub fn encode_png(&self) -> ShieldResult<Vec<u8>> {
        let pixels = self.read_pixels()?;
        let mut output = Vec::new();
        pixels.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
        Ok(output)
    }

    /// Wipe pixels and drop recorded ops
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        let buffer: &mut [u8] = &mut self.pixels;
        buffer.zeroize();
        self.pixels = RgbaImage::new(0, 0);
        self.ops.clear();
        self.released = true;
    }
}

impl Drop for Canvas {
    fn drop(&mut self) {
        self.release();
    }
}

/// Blend each mark's rotated text band into `pixels`
///
/// `marks` are in canvas coordinates. Coverage is sampled at pixel centres,
/// so a tile and the whole image agree on every shared pixel.
fn rasterize_watermark(pixels: &mut RgbaImage, plan: &WatermarkPlan, marks: &[WatermarkMark]) {
    let glyphs: Vec<bool> = plan.text.chars().map(|c| !c.is_whitespace()).collect();
    let alpha = (plan.opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    if glyphs.is_empty() || alpha == 0 || plan.font_px == 0 {
        return;
    }

    let advance = plan.glyph_advance();
    let extent = advance * glyphs.len() as f32;
    let half_band = plan.font_px as f32 / 2.0;
    let (sin, cos) = plan.angle_degrees.to_radians().sin_cos();
    let (width, height) = (pixels.width() as i64, pixels.height() as i64);

    for mark in marks {
        let (mut min_x, mut min_y) = (f32::MAX, f32::MAX);
        let (mut max_x, mut max_y) = (f32::MIN, f32::MIN);
        for (u, v) in [
            (-extent / 2.0, -half_band),
            (extent / 2.0, -half_band),
            (-extent / 2.0, half_band),
            (extent / 2.0, half_band),
        ] {
            let x = mark.x + u * cos - v * sin;
            let y = mark.y + u * sin + v * cos;
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }

        let x0 = (min_x.floor() as i64 - 1).clamp(0, width);
        let x1 = (max_x.ceil() as i64 + 1).clamp(0, width);
        let y0 = (min_y.floor() as i64 - 1).clamp(0, height);
        let y1 = (max_y.ceil() as i64 + 1).clamp(0, height);

        for py in y0..y1 {
            for px in x0..x1 {
                let dx = px as f32 + 0.5 - mark.x;
                let dy = py as f32 + 0.5 - mark.y;
                // Position along the text run and across it
                let u = dx * cos + dy * sin + extent / 2.0;
                let v = -dx * sin + dy * cos;
                if u < 0.0 || u >= extent || v.abs() > half_band * INK_FILL {
                    continue;
                }
                let cell = u / advance;
                let inked = glyphs.get(cell as usize).copied().unwrap_or(false);
                if !inked || cell.fract() > INK_FILL {
                    continue;
                }

                let pixel = pixels.get_pixel_mut(px as u32, py as u32);
                let ink = if pixel.to_luma()[0] > LIGHT_LUMA {
                    Rgba([0, 0, 0, alpha])
                } else {
                    Rgba([255, 255, 255, alpha])
                };
                pixel.blend(&ink);
            }
        }
    }
}
