//! Gallery Shield - Token Gate
//!
//! Boundary to the backend that gates byte delivery. The renderer only sees
//! the [`TokenGate`] and [`MediaFetcher`] traits; [`HmacTokenGate`] and
//! [`LocalFileFetcher`] are a self-contained issuer/validator pair used by the
//! CLI and tests.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{ShieldError, ShieldResult};
use crate::media::MediaReference;

type HmacSha256 = Hmac<Sha256>;

/// Gate key length
pub const GATE_KEY_LEN: usize = 32;

// ═══════════════════════════════════════════════════════════════════════════════
// TRAITS
// ═══════════════════════════════════════════════════════════════════════════════

/// What the gate hands out for a photo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AccessGrant {
    /// Unprotected gallery: serve from this URL directly
    Public { url: String },
    /// Token for the media's secure URL template
    Token { token: String, expires_at: DateTime<Utc> },
}

impl AccessGrant {
    /// Final byte-serving URL for `media`
    pub fn resolve(&self, media: &MediaReference) -> ShieldResult<String> {
        match self {
            AccessGrant::Public { url } => Ok(url.clone()),
            AccessGrant::Token { token, .. } => media.secure_url(token),
        }
    }
}

/// Backend client issuing per-photo access
#[async_trait]
pub trait TokenGate: Send + Sync {
    async fn grant(&self, gallery_slug: &str, media: &MediaReference) -> ShieldResult<AccessGrant>;
}

/// Bytes behind a resolved URL
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    /// False when the response would taint a canvas (no CORS clearance)
    pub cross_origin_clean: bool,
}

/// Byte fetcher for resolved URLs
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> ShieldResult<FetchedMedia>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// HMAC TOKEN GATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Signing key, zeroized on drop
#[derive(Clone)]
pub struct GateKey {
    inner: Secret<[u8; GATE_KEY_LEN]>,
}

impl GateKey {
    pub fn new(bytes: [u8; GATE_KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    pub fn generate() -> Self {
        let mut bytes = [0u8; GATE_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }

    /// Key from its base64url provisioning form
    pub fn from_base64(encoded: &str) -> ShieldResult<Self> {
        let mut decoded = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| ShieldError::InvalidConfig(format!("gate key: {}", e)))?;
        let bytes: Result<[u8; GATE_KEY_LEN], _> = decoded.as_slice().try_into();
        decoded.zeroize();
        bytes
            .map(Self::new)
            .map_err(|_| ShieldError::InvalidConfig(format!("gate key must be {} bytes", GATE_KEY_LEN)))
    }

    /// Provisioning form; the output is as sensitive as the key
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.expose())
    }

    fn expose(&self) -> &[u8; GATE_KEY_LEN] {
        self.inner.expose_secret()
    }
}

/// Claims carried by a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenClaims {
    pub gallery_slug: String,
    pub photo_id: String,
    pub expires_at: DateTime<Utc>,
}

/// HMAC-SHA256 token issuer and validator with bounded lifetime
pub struct HmacTokenGate {
    key: GateKey,
    ttl: Duration,
}

impl HmacTokenGate {
    pub fn new(key: GateKey, ttl: Duration) -> Self {
        Self { key, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a token expiring `ttl` from now
    pub fn issue(&self, gallery_slug: &str, photo_id: &str) -> ShieldResult<(String, DateTime<Utc>)> {
        self.issue_at(gallery_slug, photo_id, Utc::now())
    }

    fn issue_at(
        &self,
        gallery_slug: &str,
        photo_id: &str,
        now: DateTime<Utc>,
    ) -> ShieldResult<(String, DateTime<Utc>)> {
        let expires_at = now + self.ttl;
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);

        let payload = format!(
            "{}|{}|{}|{}",
            gallery_slug,
            photo_id,
            expires_at.timestamp(),
            URL_SAFE_NO_PAD.encode(nonce)
        );
        let signature = self.sign(payload.as_bytes())?;

        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        );
        Ok((token, expires_at))
    }

    /// Check signature, binding and expiry
    pub fn validate(&self, gallery_slug: &str, photo_id: &str, token: &str) -> ShieldResult<TokenClaims> {
        self.validate_at(gallery_slug, photo_id, token, Utc::now())
    }

    fn validate_at(
        &self,
        gallery_slug: &str,
        photo_id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> ShieldResult<TokenClaims> {
        let (payload_b64, signature_b64) = token
            .split_once('.')
            .ok_or_else(|| ShieldError::TokenInvalid("missing signature".into()))?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| ShieldError::TokenInvalid(e.to_string()))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| ShieldError::TokenInvalid(e.to_string()))?;

        let mut mac = HmacSha256::new_from_slice(self.key.expose())
            .map_err(|e| ShieldError::TokenInvalid(e.to_string()))?;
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| ShieldError::TokenInvalid("signature mismatch".into()))?;

        let payload = String::from_utf8(payload)
            .map_err(|_| ShieldError::TokenInvalid("payload not utf-8".into()))?;
        let fields: Vec<&str> = payload.split('|').collect();
        if fields.len() != 4 {
            return Err(ShieldError::TokenInvalid("unexpected payload shape".into()));
        }
        if fields[0] != gallery_slug || fields[1] != photo_id {
            return Err(ShieldError::TokenInvalid("token bound to another photo".into()));
        }

        let expiry: i64 = fields[2]
            .parse()
            .map_err(|_| ShieldError::TokenInvalid("bad expiry".into()))?;
        let expires_at = Utc
            .timestamp_opt(expiry, 0)
            .single()
            .ok_or_else(|| ShieldError::TokenInvalid("bad expiry".into()))?;
        if now >= expires_at {
            return Err(ShieldError::TokenExpired);
        }

        Ok(TokenClaims {
            gallery_slug: gallery_slug.to_string(),
            photo_id: photo_id.to_string(),
            expires_at,
        })
    }

    fn sign(&self, data: &[u8]) -> ShieldResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(self.key.expose())
            .map_err(|e| ShieldError::TokenFetchFailed(e.to_string()))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[async_trait]
impl TokenGate for HmacTokenGate {
    async fn grant(&self, gallery_slug: &str, media: &MediaReference) -> ShieldResult<AccessGrant> {
        if !media.requires_token {
            return Ok(AccessGrant::Public {
                url: media.url.clone(),
            });
        }
        let (token, expires_at) = self.issue(gallery_slug, &media.photo_id)?;
        Ok(AccessGrant::Token { token, expires_at })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOCAL FILE FETCHER
// ═══════════════════════════════════════════════════════════════════════════════

/// Serves `<relative path>?token=<token>` URLs from a directory
///
/// The relative path doubles as the photo ID the token is bound to.
pub struct LocalFileFetcher {
    root: PathBuf,
    gallery_slug: String,
    gate: Arc<HmacTokenGate>,
    require_token: bool,
}

impl LocalFileFetcher {
    pub fn new(root: &Path, gallery_slug: &str, gate: Arc<HmacTokenGate>) -> Self {
        Self {
            root: root.to_path_buf(),
            gallery_slug: gallery_slug.to_string(),
            gate,
            require_token: true,
        }
    }

    /// Serve untokenised URLs too (public galleries)
    pub fn allow_public(mut self) -> Self {
        self.require_token = false;
        self
    }

    fn resolve_path(&self, relative: &str) -> ShieldResult<PathBuf> {
        let relative = Path::new(relative);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ShieldError::FetchFailed(format!(
                "path escapes media root: {}",
                relative.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl MediaFetcher for LocalFileFetcher {
    async fn fetch(&self, url: &str) -> ShieldResult<FetchedMedia> {
        let (path, query) = match url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (url, None),
        };
        let token = query.and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("token="))
        });

        match token {
            Some(token) => {
                self.gate.validate(&self.gallery_slug, path, token)?;
            }
            None if self.require_token => {
                return Err(ShieldError::TokenInvalid("token required".into()));
            }
            None => {}
        }

        let full_path = self.resolve_path(path)?;
        let bytes = tokio::fs::read(&full_path)
            .await
            .map_err(|e| ShieldError::FetchFailed(format!("{}: {}", full_path.display(), e)))?;

        Ok(FetchedMedia {
            bytes,
            cross_origin_clean: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn gate() -> HmacTokenGate {
        HmacTokenGate::new(GateKey::generate(), Duration::seconds(300))
    }

    #[test]
    fn test_issue_and_validate() {
        let gate = gate();
        let (token, expires_at) = gate.issue("wedding", "p1").unwrap();
        let claims = gate.validate("wedding", "p1", &token).unwrap();
        assert_eq!(claims.photo_id, "p1");
        assert_eq!(claims.expires_at.timestamp(), expires_at.timestamp());
    }

    #[test]
    fn test_provisioned_key_validates_tokens() {
        let key = GateKey::generate();
        let issuer = HmacTokenGate::new(key.clone(), Duration::seconds(60));
        let restored = HmacTokenGate::new(GateKey::from_base64(&key.to_base64()).unwrap(), Duration::seconds(60));

        let (token, _) = issuer.issue("wedding", "p1").unwrap();
        assert!(restored.validate("wedding", "p1", &token).is_ok());
        assert!(GateKey::from_base64("c2hvcnQ").is_err());
    }

    #[test]
    fn test_token_bound_to_photo_and_gallery() {
        let gate = gate();
        let (token, _) = gate.issue("wedding", "p1").unwrap();
        assert!(matches!(gate.validate("wedding", "p2", &token), Err(ShieldError::TokenInvalid(_))));
        assert!(matches!(gate.validate("party", "p1", &token), Err(ShieldError::TokenInvalid(_))));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let gate = gate();
        let (token, _) = gate.issue("wedding", "p1").unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode("wedding|p1|99999999999|AAAA");
        let forged = format!("{}.{}", forged_payload, signature);
        assert!(matches!(gate.validate("wedding", "p1", &forged), Err(ShieldError::TokenInvalid(_))));

        let other = HmacTokenGate::new(GateKey::generate(), Duration::seconds(300));
        assert!(other.validate("wedding", "p1", &token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let gate = gate();
        let issued = Utc::now() - Duration::seconds(600);
        let (token, _) = gate.issue_at("wedding", "p1", issued).unwrap();
        assert!(matches!(gate.validate("wedding", "p1", &token), Err(ShieldError::TokenExpired)));
    }

    #[tokio::test]
    async fn test_grant_public_and_gated() {
        let gate = gate();
        let public = MediaReference::public("p1", "https://cdn.example/p1.jpg");
        assert_eq!(
            gate.grant("g", &public).await.unwrap().resolve(&public).unwrap(),
            "https://cdn.example/p1.jpg"
        );

        let gated = MediaReference::gated("p1", "u", "/g/p1?token={token}");
        let url = gate.grant("g", &gated).await.unwrap().resolve(&gated).unwrap();
        assert!(url.starts_with("/g/p1?token="));
        assert!(!url.contains("{token}"));
    }

    #[tokio::test]
    async fn test_local_fetcher_validates_token() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("shot.png"), b"bytes").unwrap();
        let gate = Arc::new(gate());
        let fetcher = LocalFileFetcher::new(dir.path(), "g", gate.clone());

        let (token, _) = gate.issue("g", "shot.png").unwrap();
        let fetched = fetcher.fetch(&format!("shot.png?token={}", token)).await.unwrap();
        assert_eq!(fetched.bytes, b"bytes");

        assert!(matches!(
            fetcher.fetch("shot.png").await,
            Err(ShieldError::TokenInvalid(_))
        ));
        let (other, _) = gate.issue("g", "other.png").unwrap();
        assert!(fetcher.fetch(&format!("shot.png?token={}", other)).await.is_err());
    }

    #[tokio::test]
    async fn test_local_fetcher_rejects_traversal() {
        let dir = tempdir().unwrap();
        let fetcher = LocalFileFetcher::new(dir.path(), "g", Arc::new(gate())).allow_public();
        assert!(matches!(
            fetcher.fetch("../etc/passwd").await,
            Err(ShieldError::FetchFailed(_))
        ));
    }
}
