//! Gallery Shield - Error Types

use thiserror::Error;

use crate::violation::ViolationKind;

/// Result type for shield operations
pub type ShieldResult<T> = Result<T, ShieldError>;

/// Shield error types
#[derive(Error, Debug)]
pub enum ShieldError {
    // ═══════════════════════════════════════════════════════════════
    // POLICY ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Unknown protection level: {0}")]
    UnknownProtectionLevel(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ═══════════════════════════════════════════════════════════════
    // DELIVERY ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Malformed secure URL template for photo {0}")]
    MalformedUrlTemplate(String),

    #[error("Token fetch failed: {0}")]
    TokenFetchFailed(String),

    #[error("Access token rejected: {0}")]
    TokenInvalid(String),

    #[error("Access token expired")]
    TokenExpired,

    #[error("Media fetch failed: {0}")]
    FetchFailed(String),

    #[error("Image decode failed: {0}")]
    DecodeFailed(String),

    #[error("Render cancelled")]
    RenderCancelled,

    // ═══════════════════════════════════════════════════════════════
    // RENDER ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Canvas pixel access blocked")]
    CanvasAccessBlocked,

    #[error("Invalid fragment grid: {columns}x{rows} for {width}x{height} image")]
    InvalidGrid {
        columns: u32,
        rows: u32,
        width: u32,
        height: u32,
    },

    // ═══════════════════════════════════════════════════════════════
    // IO / SERIALIZATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ShieldError {
    /// Delivery failures degrade to thumbnail or placeholder, never to a violation
    pub fn is_recoverable_delivery(&self) -> bool {
        matches!(
            self,
            ShieldError::MalformedUrlTemplate(_)
                | ShieldError::TokenFetchFailed(_)
                | ShieldError::TokenInvalid(_)
                | ShieldError::TokenExpired
                | ShieldError::FetchFailed(_)
                | ShieldError::DecodeFailed(_)
                | ShieldError::IoError(_)
        )
    }

    /// Security-relevant errors map onto a violation kind
    pub fn violation_kind(&self) -> Option<ViolationKind> {
        match self {
            ShieldError::CanvasAccessBlocked => Some(ViolationKind::CanvasAccessBlocked),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ShieldError {
    fn from(e: serde_json::Error) -> Self {
        ShieldError::SerializationError(e.to_string())
    }
}

impl From<image::ImageError> for ShieldError {
    fn from(e: image::ImageError) -> Self {
        ShieldError::DecodeFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_errors_are_recoverable() {
        assert!(ShieldError::TokenFetchFailed("timeout".into()).is_recoverable_delivery());
        assert!(ShieldError::DecodeFailed("truncated".into()).is_recoverable_delivery());
        assert!(ShieldError::TokenExpired.is_recoverable_delivery());
        assert!(!ShieldError::CanvasAccessBlocked.is_recoverable_delivery());
    }

    #[test]
    fn test_canvas_block_is_a_violation() {
        assert_eq!(
            ShieldError::CanvasAccessBlocked.violation_kind(),
            Some(ViolationKind::CanvasAccessBlocked)
        );
        assert_eq!(ShieldError::TokenExpired.violation_kind(), None);
    }
}
