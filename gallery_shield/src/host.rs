//! Gallery Shield - Gallery View Host
//!
//! Integration point for lightboxes, grid thumbnails, hero banners and story
//! carousels. A host owns one violation bus with the escalator subscribed,
//! mounts one [`RenderSession`] at a time and tears the previous one down
//! before arming the next.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{GalleryProtectionSettings, ShieldConfig};
use crate::error::{ShieldError, ShieldResult};
use crate::escalation::{Escalator, HostCommand, ViewContext};
use crate::input_guard::InputGuard;
use crate::media::MediaReference;
use crate::platform::{Document, TimerRegistry};
use crate::policy::{ProtectionLevel, ProtectionPolicy};
use crate::render::{RenderRequest, RenderSession, RenderedView, SecureImageRenderer};
use crate::scope::ProtectionScopes;
use crate::sentinel::EnvironmentProbe;
use crate::token_gate::{MediaFetcher, TokenGate};
use crate::violation::{ViolationBus, ViolationReporter, ViolationSink};

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED RUNTIME
// ═══════════════════════════════════════════════════════════════════════════════

/// Page-wide resources shared by every host on a document
#[derive(Clone)]
pub struct ProtectionRuntime {
    pub document: Arc<Document>,
    pub input_guard: Arc<InputGuard>,
    pub timers: TimerRegistry,
    pub probe: Arc<dyn EnvironmentProbe>,
    pub scopes: ProtectionScopes,
}

impl ProtectionRuntime {
    pub fn new(document: Arc<Document>, probe: Arc<dyn EnvironmentProbe>, config: &ShieldConfig) -> Self {
        Self {
            input_guard: InputGuard::new(document.clone(), &config.input),
            document,
            timers: TimerRegistry::new(),
            probe,
            scopes: ProtectionScopes::new(),
        }
    }
}

/// Backend clients plus runtime, handed to each host
#[derive(Clone)]
pub struct HostServices {
    pub gate: Arc<dyn TokenGate>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub runtime: ProtectionRuntime,
    pub config: Arc<ShieldConfig>,
}

impl HostServices {
    pub fn renderer(&self) -> Arc<SecureImageRenderer> {
        Arc::new(SecureImageRenderer::new(
            self.gate.clone(),
            self.fetcher.clone(),
            self.config.clone(),
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a protected view is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewSurface {
    Lightbox,
    GridThumbnail,
    HeroBanner,
    StoryCarousel,
}

impl ViewSurface {
    /// The grid is the only gallery-level surface
    pub fn context(&self) -> ViewContext {
        match self {
            ViewSurface::GridThumbnail => ViewContext::Gallery,
            ViewSurface::Lightbox | ViewSurface::HeroBanner | ViewSurface::StoryCarousel => ViewContext::Viewer,
        }
    }
}

/// A protected media surface
pub struct GalleryViewHost {
    surface: ViewSurface,
    gallery_slug: String,
    policy: ProtectionPolicy,
    level: ProtectionLevel,
    services: HostServices,
    renderer: Arc<SecureImageRenderer>,
    bus: Arc<ViolationBus>,
    commands: mpsc::UnboundedReceiver<HostCommand>,
    session: Option<RenderSession>,
    display_width: Option<u32>,
}

impl GalleryViewHost {
    pub fn new(
        surface: ViewSurface,
        gallery_slug: impl Into<String>,
        settings: &GalleryProtectionSettings,
        services: HostServices,
    ) -> Self {
        let (escalator, commands) = Escalator::new(surface.context(), services.config.escalation.clone());
        let bus = Arc::new(ViolationBus::new());
        bus.subscribe(Arc::new(escalator));

        Self {
            surface,
            gallery_slug: gallery_slug.into(),
            policy: settings.policy(),
            level: settings.level(),
            renderer: services.renderer(),
            services,
            bus,
            commands,
            session: None,
            display_width: None,
        }
    }

    /// Layout width for fragment grid sizing
    pub fn with_display_width(mut self, width: u32) -> Self {
        self.display_width = Some(width);
        self
    }

    /// Caller's violation handler (analytics and the like)
    pub fn subscribe(&self, reporter: Arc<dyn ViolationReporter>) {
        self.bus.subscribe(reporter);
    }

    pub fn surface(&self) -> ViewSurface {
        self.surface
    }

    pub fn policy(&self) -> &ProtectionPolicy {
        &self.policy
    }

    pub fn level(&self) -> ProtectionLevel {
        self.level
    }

    pub fn runtime(&self) -> &ProtectionRuntime {
        &self.services.runtime
    }

    pub fn current(&self) -> Option<&RenderSession> {
        self.session.as_ref()
    }

    /// Mount `media`, tearing down whatever was shown before
    pub fn show(&mut self, media: MediaReference) -> Uuid {
        self.close();

        let sink = ViolationSink::new(media.photo_id.clone(), self.level, self.bus.clone());
        let request = RenderRequest {
            gallery_slug: self.gallery_slug.clone(),
            media,
            policy: self.policy.clone(),
            display_width: self.display_width,
        };

        let session = RenderSession::mount(self.renderer.clone(), request, sink, &self.services.runtime);
        let id = session.id();
        self.session = Some(session);
        id
    }

    /// Unmount the current view
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.teardown();
        }
    }

    /// Wait for the current view to render
    pub async fn view(&mut self) -> ShieldResult<&RenderedView> {
        match self.session.as_mut() {
            Some(session) => session.view().await,
            None => Err(ShieldError::RenderCancelled),
        }
    }

    /// Whether a command still targets what is mounted
    ///
    /// A close raised by a photo that has since been replaced must not close
    /// its successor.
    pub fn is_current(&self, command: &HostCommand) -> bool {
        match command.session_id() {
            Some(id) => self.session.as_ref().map(|s| s.id() == id).unwrap_or(false),
            None => true,
        }
    }

    /// Pending escalation for the current view, if any
    pub fn try_next_command(&mut self) -> Option<HostCommand> {
        while let Ok(command) = self.commands.try_recv() {
            if self.is_current(&command) {
                return Some(command);
            }
            log::debug!("Discarded escalation for an unmounted session: {:?}", command);
        }
        None
    }

    /// Wait for the next escalation for the current view
    pub async fn next_command(&mut self) -> Option<HostCommand> {
        loop {
            let command = self.commands.recv().await?;
            if self.is_current(&command) {
                return Some(command);
            }
            log::debug!("Discarded escalation for an unmounted session: {:?}", command);
        }
    }

    /// Apply an escalation command; both close and redirect unmount the view
    pub fn apply(&mut self, command: &HostCommand) {
        if !self.is_current(command) {
            log::debug!("Ignoring stale escalation: {:?}", command);
            return;
        }
        match command {
            HostCommand::CloseViewer { toast_duration_ms, .. } => {
                log::info!(
                    "Closing {:?} after escalation (toast {}ms)",
                    self.surface,
                    toast_duration_ms
                );
            }
            HostCommand::Redirect { .. } => {
                log::info!("Leaving gallery {} after escalation", self.gallery_slug);
            }
        }
        self.close();
    }
}

impl Drop for GalleryViewHost {
    fn drop(&mut self) {
        self.close();
    }
}
