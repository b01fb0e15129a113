//! Gallery Shield - Protection Policy
//!
//! Maps a gallery's configured protection level onto the concrete set of
//! anti-exfiltration measures the renderer, sentinel and input guard apply.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ShieldError;

/// Admin-configured protection tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionLevel {
    /// No client-side measures
    Basic,
    /// Canvas rendering and shortcut blocking
    Standard,
    /// Adds watermark, print-screen and devtools detection
    Enhanced,
    /// Everything on, fragmented rendering, high sensitivity
    Maximum,
}

impl Default for ProtectionLevel {
    fn default() -> Self {
        Self::Standard
    }
}

impl ProtectionLevel {
    /// All levels, weakest first
    pub const ALL: [ProtectionLevel; 4] = [
        ProtectionLevel::Basic,
        ProtectionLevel::Standard,
        ProtectionLevel::Enhanced,
        ProtectionLevel::Maximum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Standard => "standard",
            Self::Enhanced => "enhanced",
            Self::Maximum => "maximum",
        }
    }

    /// Parse an admin setting, failing closed to `Standard` on anything unrecognised
    pub fn from_setting(value: &str) -> Self {
        match value.parse() {
            Ok(level) => level,
            Err(_) => {
                log::warn!(
                    "Unrecognised protection level {:?}, falling back to standard",
                    value
                );
                Self::Standard
            }
        }
    }
}

impl FromStr for ProtectionLevel {
    type Err = ShieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "standard" => Ok(Self::Standard),
            "enhanced" => Ok(Self::Enhanced),
            "maximum" => Ok(Self::Maximum),
            other => Err(ShieldError::UnknownProtectionLevel(other.to_string())),
        }
    }
}

impl fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Devtools detection sensitivity
///
/// `Medium` and `Low` require both heuristics to agree on a sample; `High`
/// accepts either one alone. High therefore detects faster but misfires more
/// often (a docked bookmarks bar or zoomed page can trip the viewport check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSensitivity {
    Low,
    Medium,
    High,
}

impl DetectionSensitivity {
    /// Whether a single heuristic is enough to mark a sample positive
    pub fn accepts_single_signal(&self) -> bool {
        matches!(self, Self::High)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Concrete feature set derived from a protection level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionPolicy {
    /// Draw into a canvas instead of a native image element
    pub use_canvas_rendering: bool,
    /// Split the image across a grid of canvases
    pub fragment_grid: bool,
    /// Composite a repeating text watermark
    pub watermark_enabled: bool,
    /// Custom watermark text (renderer falls back to a filename label)
    pub watermark_text: Option<String>,
    /// Suppress save/print/devtools/view-source shortcuts
    pub block_keyboard_shortcuts: bool,
    /// Report print-screen and screenshot-tool signals
    pub detect_print_screen: bool,
    /// Run the devtools sentinel
    pub detect_devtools: bool,
    /// Sentinel sensitivity
    pub detection_sensitivity: DetectionSensitivity,
    /// Whether the visitor may download originals
    pub allow_download: bool,
}

impl ProtectionPolicy {
    /// The protective flags, in declaration order
    pub fn protective_flags(&self) -> [bool; 6] {
        [
            self.use_canvas_rendering,
            self.fragment_grid,
            self.watermark_enabled,
            self.block_keyboard_shortcuts,
            self.detect_print_screen,
            self.detect_devtools,
        ]
    }

    /// Attach custom watermark text (blank text is ignored)
    pub fn with_watermark_text(mut self, text: Option<String>) -> Self {
        self.watermark_text = text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        self
    }

    /// True when `self` enables every protective flag `other` enables
    pub fn covers(&self, other: &ProtectionPolicy) -> bool {
        self.protective_flags()
            .iter()
            .zip(other.protective_flags().iter())
            .all(|(mine, theirs)| *mine || !*theirs)
            && self.detection_sensitivity >= other.detection_sensitivity
    }
}

/// Derive the policy for a level
///
/// Total over every level. `allow_downloads = false` always yields
/// `allow_download = false` and never changes a protective flag.
pub fn derive_policy(level: ProtectionLevel, allow_downloads: bool) -> ProtectionPolicy {
    let at_least = |floor: ProtectionLevel| level >= floor;

    ProtectionPolicy {
        use_canvas_rendering: at_least(ProtectionLevel::Standard),
        fragment_grid: at_least(ProtectionLevel::Maximum),
        watermark_enabled: at_least(ProtectionLevel::Enhanced),
        watermark_text: None,
        block_keyboard_shortcuts: at_least(ProtectionLevel::Standard),
        detect_print_screen: at_least(ProtectionLevel::Enhanced),
        detect_devtools: at_least(ProtectionLevel::Enhanced),
        detection_sensitivity: match level {
            ProtectionLevel::Basic | ProtectionLevel::Standard => DetectionSensitivity::Low,
            ProtectionLevel::Enhanced => DetectionSensitivity::Medium,
            ProtectionLevel::Maximum => DetectionSensitivity::High,
        },
        allow_download: allow_downloads,
    }
}
