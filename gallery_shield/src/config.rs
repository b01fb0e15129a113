//! Gallery Shield - Configuration
//!
//! Tunable parameters for rendering, detection and escalation, plus the
//! per-event settings supplied by the gallery admin.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ShieldError, ShieldResult};
use crate::policy::{derive_policy, DetectionSensitivity, ProtectionLevel, ProtectionPolicy};

// ═══════════════════════════════════════════════════════════════════════════════
// SHIELD CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Fragment grid configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Columns at full width
    pub columns: u32,
    /// Rows at full height
    pub rows: u32,
    /// Smallest on-screen tile edge before the grid is coarsened
    pub min_tile_px: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns: 4,
            rows: 4,
            min_tile_px: 48,
        }
    }
}

/// Watermark configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    /// Alpha in (0, 1]
    pub opacity: f32,
    /// Text rotation (negative rises left to right)
    pub angle_degrees: f32,
    /// Horizontal distance between repeats
    pub spacing_x: u32,
    /// Vertical distance between rows of repeats
    pub spacing_y: u32,
    /// Font size in pixels
    pub font_px: u32,
    /// Label used when neither custom text nor a filename is available
    pub default_label: String,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            opacity: 0.18,
            angle_degrees: -30.0,
            spacing_x: 240,
            spacing_y: 160,
            font_px: 18,
            default_label: "Protected".into(),
        }
    }
}

/// DevTools sentinel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Polling interval at low sensitivity (ms)
    pub interval_low_ms: u64,
    /// Polling interval at medium sensitivity (ms)
    pub interval_medium_ms: u64,
    /// Polling interval at high sensitivity (ms)
    pub interval_high_ms: u64,
    /// Timing gap that counts as a paused debugger (ms)
    pub timing_gap_threshold_ms: u64,
    /// Outer/inner window delta that counts as a docked inspector (px)
    pub viewport_delta_threshold_px: u32,
    /// Consecutive positive samples required for detection
    pub consecutive_hits: u32,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            interval_low_ms: 1000,
            interval_medium_ms: 750,
            interval_high_ms: 500,
            timing_gap_threshold_ms: 100,
            viewport_delta_threshold_px: 160,
            consecutive_hits: 2,
        }
    }
}

impl SentinelConfig {
    /// Polling interval for a sensitivity
    pub fn interval_for(&self, sensitivity: DetectionSensitivity) -> Duration {
        let ms = match sensitivity {
            DetectionSensitivity::Low => self.interval_low_ms,
            DetectionSensitivity::Medium => self.interval_medium_ms,
            DetectionSensitivity::High => self.interval_high_ms,
        };
        Duration::from_millis(ms)
    }
}

/// Input guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Window after a screenshot chord in which a blur counts as a capture (ms)
    pub screenshot_blur_window_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            screenshot_blur_window_ms: 1500,
        }
    }
}

/// Escalation presentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Toast shown before a viewer closes
    pub close_notice: String,
    /// Toast duration (ms)
    pub toast_duration_ms: u64,
    /// Where a redirect sends the visitor
    pub redirect_location: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            close_notice: "This gallery is protected. The viewer has been closed.".into(),
            toast_duration_ms: 2500,
            redirect_location: "/".into(),
        }
    }
}

/// Shield configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    pub grid: GridConfig,
    pub watermark: WatermarkConfig,
    pub sentinel: SentinelConfig,
    pub input: InputConfig,
    pub escalation: EscalationConfig,
    /// Lifetime of tokens minted by the reference gate (seconds)
    pub token_ttl_secs: u64,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            watermark: WatermarkConfig::default(),
            sentinel: SentinelConfig::default(),
            input: InputConfig::default(),
            escalation: EscalationConfig::default(),
            token_ttl_secs: 300,
        }
    }
}

impl ShieldConfig {
    /// Load from a JSON file; missing sections take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> ShieldResult<Self> {
        let data = std::fs::read(path.as_ref())?;
        let config: ShieldConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would disable a control silently
    pub fn validate(&self) -> ShieldResult<()> {
        if self.grid.columns == 0 || self.grid.rows == 0 {
            return Err(ShieldError::InvalidConfig("grid dimensions must be non-zero".into()));
        }
        if !(self.watermark.opacity > 0.0 && self.watermark.opacity <= 1.0) {
            return Err(ShieldError::InvalidConfig(format!(
                "watermark opacity {} outside (0, 1]",
                self.watermark.opacity
            )));
        }
        if self.watermark.spacing_x == 0 || self.watermark.spacing_y == 0 {
            return Err(ShieldError::InvalidConfig("watermark spacing must be non-zero".into()));
        }
        let s = &self.sentinel;
        if s.interval_low_ms == 0 || s.interval_medium_ms == 0 || s.interval_high_ms == 0 {
            return Err(ShieldError::InvalidConfig("sentinel intervals must be non-zero".into()));
        }
        if s.consecutive_hits == 0 {
            return Err(ShieldError::InvalidConfig("consecutive_hits must be at least 1".into()));
        }
        if self.token_ttl_secs == 0 {
            return Err(ShieldError::InvalidConfig("token_ttl_secs must be non-zero".into()));
        }
        Ok(())
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs as i64)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GALLERY SETTINGS (ADMIN-SUPPLIED)
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-event protection settings as stored by the admin side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryProtectionSettings {
    /// Raw level string, parsed fail-closed
    pub protection_level: String,
    /// Whether the event allows downloads
    pub allow_downloads: bool,
    /// Optional custom watermark text
    #[serde(default)]
    pub watermark_text: Option<String>,
}

impl GalleryProtectionSettings {
    pub fn new(level: ProtectionLevel, allow_downloads: bool) -> Self {
        Self {
            protection_level: level.as_str().into(),
            allow_downloads,
            watermark_text: None,
        }
    }

    /// Parsed level (unknown values become `Standard`)
    pub fn level(&self) -> ProtectionLevel {
        ProtectionLevel::from_setting(&self.protection_level)
    }

    /// Derived policy including custom watermark text
    pub fn policy(&self) -> ProtectionPolicy {
        derive_policy(self.level(), self.allow_downloads)
            .with_watermark_text(self.watermark_text.clone())
    }
}
