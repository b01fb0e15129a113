//! Gallery Shield - Watermark Layout
//!
//! Marks sit on a staggered lattice anchored at the image origin. Tiles take
//! the subset of marks that reach into them and translate by their own
//! offset, so the pattern lines up across fragment seams.

use serde::{Deserialize, Serialize};

use crate::config::WatermarkConfig;
use crate::media::MediaReference;
use crate::policy::ProtectionPolicy;
use crate::render::fragment::TileRect;

/// Average glyph advance relative to font size
const GLYPH_ADVANCE: f32 = 0.6;

/// Anchor of one repetition of the watermark text
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatermarkMark {
    pub x: f32,
    pub y: f32,
}

/// Watermark text resolved for a media item
///
/// Custom text wins; otherwise the configured label plus the filename.
pub fn watermark_label(policy: &ProtectionPolicy, media: &MediaReference, config: &WatermarkConfig) -> String {
    if let Some(text) = &policy.watermark_text {
        return text.clone();
    }
    match media.display_name() {
        Some(name) => format!("{} · {}", config.default_label, name),
        None => config.default_label.clone(),
    }
}

/// Watermark marks for a whole image, in image coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkPlan {
    pub text: String,
    pub opacity: f32,
    pub angle_degrees: f32,
    pub font_px: u32,
    pub marks: Vec<WatermarkMark>,
}

impl WatermarkPlan {
    pub fn layout(text: impl Into<String>, width: u32, height: u32, config: &WatermarkConfig) -> Self {
        let text = text.into();
        let spacing_x = config.spacing_x.max(1) as f32;
        let spacing_y = config.spacing_y.max(1) as f32;

        // One extra lattice step on each side so rotated text reaches the corners
        let rows = (height as f32 / spacing_y).ceil() as i64 + 1;
        let columns = (width as f32 / spacing_x).ceil() as i64 + 1;

        let mut marks = Vec::new();
        for row in -1..=rows {
            let stagger = if row.rem_euclid(2) == 1 { spacing_x / 2.0 } else { 0.0 };
            for column in -1..=columns {
                marks.push(WatermarkMark {
                    x: column as f32 * spacing_x + stagger,
                    y: row as f32 * spacing_y,
                });
            }
        }

        Self {
            text,
            opacity: config.opacity,
            angle_degrees: config.angle_degrees,
            font_px: config.font_px,
            marks,
        }
    }

    /// Horizontal advance of one glyph cell
    pub fn glyph_advance(&self) -> f32 {
        self.font_px as f32 * GLYPH_ADVANCE
    }

    /// Approximate drawn length of one repetition
    pub fn text_extent(&self) -> f32 {
        self.text.chars().count() as f32 * self.glyph_advance()
    }

    /// Marks that reach into `tile`, translated into tile coordinates
    ///
    /// Each mark is the centre of its text run; the reach covers the rotated
    /// band at any angle.
    pub fn for_tile(&self, tile: &TileRect) -> Vec<WatermarkMark> {
        let reach = self.text_extent() + self.font_px as f32;
        let (left, top) = (tile.x as f32, tile.y as f32);
        let (right, bottom) = (tile.right() as f32, tile.bottom() as f32);

        self.marks
            .iter()
            .filter(|m| {
                m.x + reach >= left && m.x - reach <= right && m.y + reach >= top && m.y - reach <= bottom
            })
            .map(|m| WatermarkMark {
                x: m.x - left,
                y: m.y - top,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{derive_policy, ProtectionLevel};
    use crate::render::fragment::FragmentLayout;

    #[test]
    fn test_label_prefers_custom_text() {
        let config = WatermarkConfig::default();
        let media = MediaReference::public("p1", "u").with_filename("beach.jpg");

        let policy = derive_policy(ProtectionLevel::Enhanced, false);
        assert_eq!(watermark_label(&policy, &media, &config), "Protected · beach.jpg");

        let policy = policy.with_watermark_text(Some("© Studio K".into()));
        assert_eq!(watermark_label(&policy, &media, &config), "© Studio K");

        let bare = MediaReference::public("p2", "u");
        let policy = derive_policy(ProtectionLevel::Enhanced, false);
        assert_eq!(watermark_label(&policy, &bare, &config), "Protected");
    }

    #[test]
    fn test_lattice_covers_image() {
        let plan = WatermarkPlan::layout("Protected", 1000, 600, &WatermarkConfig::default());
        assert!(plan.marks.iter().any(|m| m.x <= 0.0 && m.y <= 0.0));
        assert!(plan.marks.iter().any(|m| m.x >= 1000.0 && m.y >= 600.0));
    }

    #[test]
    fn test_pattern_continuous_across_seams() {
        let plan = WatermarkPlan::layout("Protected", 800, 800, &WatermarkConfig::default());
        let layout = FragmentLayout::partition(800, 800, 4, 4).unwrap();

        let (left, right) = (&layout.tiles[0], &layout.tiles[1]);
        let in_left = plan.for_tile(left);
        let in_right = plan.for_tile(right);

        // A mark near the seam appears in both tiles at the same global position
        let shared: Vec<_> = in_left
            .iter()
            .filter(|l| {
                in_right
                    .iter()
                    .any(|r| (r.x + right.x as f32 - (l.x + left.x as f32)).abs() < f32::EPSILON && r.y == l.y)
            })
            .collect();
        assert!(!shared.is_empty());
    }

    #[test]
    fn test_every_tile_gets_marks() {
        let plan = WatermarkPlan::layout("Protected", 1200, 900, &WatermarkConfig::default());
        let layout = FragmentLayout::partition(1200, 900, 4, 4).unwrap();
        assert!(layout.tiles.iter().all(|t| !plan.for_tile(t).is_empty()));
    }
}
