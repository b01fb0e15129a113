//! Gallery Shield - Media References
//!
//! Read-only view of a photo as handed over by the gallery data layer.

use serde::{Deserialize, Serialize};

use crate::error::{ShieldError, ShieldResult};

/// Substitution point for the access token in a secure URL template
pub const TOKEN_PLACEHOLDER: &str = "{token}";

/// A photo or video as seen by the protected delivery core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    /// Photo ID
    pub photo_id: String,
    /// Public (or fallback) URL
    pub url: String,
    /// Thumbnail URL used when delivery fails
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Whether bytes are gated by an access token
    #[serde(default)]
    pub requires_token: bool,
    /// URL template containing `{token}`
    #[serde(default)]
    pub secure_url_template: Option<String>,
    /// Original filename (feeds the default watermark label)
    #[serde(default)]
    pub filename: Option<String>,
}

impl MediaReference {
    /// Public media, no token required
    pub fn public(photo_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            photo_id: photo_id.into(),
            url: url.into(),
            thumbnail_url: None,
            requires_token: false,
            secure_url_template: None,
            filename: None,
        }
    }

    /// Token-gated media
    pub fn gated(
        photo_id: impl Into<String>,
        url: impl Into<String>,
        secure_url_template: impl Into<String>,
    ) -> Self {
        Self {
            requires_token: true,
            secure_url_template: Some(secure_url_template.into()),
            ..Self::public(photo_id, url)
        }
    }

    pub fn with_thumbnail(mut self, thumbnail_url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(thumbnail_url.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Check the gated-media invariant: a template with a token substitution point
    pub fn validate(&self) -> ShieldResult<()> {
        if !self.requires_token {
            return Ok(());
        }
        match self.secure_url_template.as_deref() {
            Some(template) if template.contains(TOKEN_PLACEHOLDER) => Ok(()),
            _ => Err(ShieldError::MalformedUrlTemplate(self.photo_id.clone())),
        }
    }

    /// Byte-serving URL for a token
    pub fn secure_url(&self, token: &str) -> ShieldResult<String> {
        self.validate()?;
        let template = self
            .secure_url_template
            .as_deref()
            .ok_or_else(|| ShieldError::MalformedUrlTemplate(self.photo_id.clone()))?;
        Ok(template.replace(TOKEN_PLACEHOLDER, token))
    }

    /// Label for the default watermark
    pub fn display_name(&self) -> Option<&str> {
        self.filename.as_deref().filter(|name| !name.is_empty())
    }
}
