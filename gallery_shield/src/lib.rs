//! # Gallery Shield
//!
//! Protected media delivery for event photo galleries: policy-driven
//! rendering, exfiltration detection and violation escalation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     GALLERY VIEW HOST                     │
//! │   lightbox · grid thumbnail · hero banner · carousel      │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────┐  │
//! │  │  PROTECTION │  │ SECURE IMG  │  │  TOKEN GATE +    │  │
//! │  │  POLICY     │→ │ RENDERER    │← │  MEDIA FETCHER   │  │
//! │  └──────┬──────┘  └──────┬──────┘  └──────────────────┘  │
//! │         │                │ canvas_access_blocked          │
//! │  ┌──────┴──────┐  ┌──────┴──────┐                         │
//! │  │  DEVTOOLS   │  │ INPUT GUARD │                         │
//! │  │  SENTINEL   │  │ (leases)    │                         │
//! │  └──────┬──────┘  └──────┬──────┘                         │
//! │         └───────┬────────┘                                │
//! │         ┌───────┴────────┐    ┌─────────────────────┐     │
//! │         │ VIOLATION BUS  │ →  │ ESCALATOR → command │     │
//! │         └────────────────┘    └─────────────────────┘     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Limits
//!
//! - Nothing here stops a determined visitor: canvas and fragment rendering
//!   raise the bar for casual saving, they do not make pixels secret
//! - DevTools detection is heuristic and probabilistic
//! - OS-level screenshots cannot be blocked, only sometimes noticed

pub mod config;
pub mod error;
pub mod escalation;
pub mod host;
pub mod input_guard;
pub mod media;
pub mod platform;
pub mod policy;
pub mod render;
pub mod scope;
pub mod sentinel;
pub mod token_gate;
pub mod violation;

pub use config::{GalleryProtectionSettings, ShieldConfig};
pub use error::{ShieldError, ShieldResult};
pub use escalation::{decide, decide_in, Action, Escalator, HostCommand, ViewContext};
pub use host::{GalleryViewHost, HostServices, ProtectionRuntime, ViewSurface};
pub use input_guard::{GuardLease, GuardSettings, InputGuard};
pub use media::MediaReference;
pub use platform::{Document, DomEvent, KeyEvent, TimerRegistry};
pub use policy::{derive_policy, DetectionSensitivity, ProtectionLevel, ProtectionPolicy};
pub use render::{RenderRequest, RenderSession, RenderStrategy, RenderedView, SecureImageRenderer};
pub use scope::ProtectionScopes;
pub use sentinel::{DevToolsSentinel, EnvironmentProbe, EnvironmentSample, SentinelState};
pub use token_gate::{AccessGrant, HmacTokenGate, LocalFileFetcher, MediaFetcher, TokenGate};
pub use violation::{ViolationBus, ViolationEvent, ViolationKind, ViolationLog, ViolationReporter, ViolationSink};

/// Gallery Shield version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
