//! Gallery Shield - Secure Image Renderer
//!
//! Resolves, fetches, decodes and composes a photo according to its
//! [`ProtectionPolicy`]. Delivery failures degrade to the thumbnail or an
//! empty placeholder and never raise a violation. The renderer reports through
//! its [`ViolationSink`] and never decides escalation itself.

pub mod canvas;
pub mod fragment;
pub mod session;
pub mod watermark;

use std::sync::Arc;

use image::RgbaImage;
use serde::Serialize;
use zeroize::Zeroize;

use crate::config::ShieldConfig;
use crate::error::{ShieldError, ShieldResult};
use crate::media::MediaReference;
use crate::policy::ProtectionPolicy;
use crate::token_gate::{MediaFetcher, TokenGate};
use crate::violation::ViolationSink;

pub use canvas::{Canvas, DrawOp};
pub use fragment::{effective_grid, FragmentLayout, TileRect};
pub use session::RenderSession;
pub use watermark::{watermark_label, WatermarkMark, WatermarkPlan};

// ═══════════════════════════════════════════════════════════════════════════════
// STRATEGY
// ═══════════════════════════════════════════════════════════════════════════════

/// Rendering strategy, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStrategy {
    NativeImage,
    CanvasComposite,
    FragmentGrid,
}

impl RenderStrategy {
    pub fn select(policy: &ProtectionPolicy) -> Self {
        if policy.fragment_grid {
            RenderStrategy::FragmentGrid
        } else if policy.use_canvas_rendering {
            RenderStrategy::CanvasComposite
        } else {
            RenderStrategy::NativeImage
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERED VIEWS
// ═══════════════════════════════════════════════════════════════════════════════

/// Plain image element
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NativeImageView {
    pub url: String,
    /// Advisory CSS hints (no drag, no touch callout); not a control
    pub protect_from_download: bool,
    /// Overlay label when a watermark is requested without a canvas
    pub watermark_label: Option<String>,
}

impl NativeImageView {
    pub fn style_hints(&self) -> &'static [&'static str] {
        if self.protect_from_download {
            &["user-select: none", "-webkit-user-drag: none", "-webkit-touch-callout: none"]
        } else {
            &[]
        }
    }
}

/// Canvas-backed rendering: a single composite or a fragment grid
pub struct CanvasView {
    pub strategy: RenderStrategy,
    pub layout: FragmentLayout,
    /// One canvas per layout tile, same order
    pub tiles: Vec<Canvas>,
    pub watermark: Option<WatermarkPlan>,
    pub allow_download: bool,
}

impl CanvasView {
    /// Whether any tile refuses pixel read-back
    pub fn access_blocked(&self) -> bool {
        self.tiles.iter().any(|tile| tile.read_pixels().is_err())
    }

    pub fn release(&mut self) {
        for tile in &mut self.tiles {
            tile.release();
        }
    }
}

/// What a mounted renderer shows
pub enum RenderedView {
    Native(NativeImageView),
    Canvas(CanvasView),
    /// Delivery failed; thumbnail shown instead
    Thumbnail { url: String },
    /// Delivery failed with no thumbnail; empty or blurred state
    Placeholder,
}

impl RenderedView {
    pub fn strategy(&self) -> Option<RenderStrategy> {
        match self {
            RenderedView::Native(_) => Some(RenderStrategy::NativeImage),
            RenderedView::Canvas(view) => Some(view.strategy),
            RenderedView::Thumbnail { .. } | RenderedView::Placeholder => None,
        }
    }

    /// Fell back to thumbnail or placeholder
    pub fn is_degraded(&self) -> bool {
        matches!(self, RenderedView::Thumbnail { .. } | RenderedView::Placeholder)
    }

    /// Whether the view offers a download affordance
    pub fn downloadable(&self) -> bool {
        match self {
            RenderedView::Native(view) => !view.protect_from_download,
            RenderedView::Canvas(view) => view.allow_download,
            RenderedView::Thumbnail { .. } | RenderedView::Placeholder => false,
        }
    }

    pub fn release(&mut self) {
        if let RenderedView::Canvas(view) = self {
            view.release();
        }
    }
}

impl std::fmt::Debug for RenderedView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderedView::Native(_) => f.write_str("Native"),
            RenderedView::Canvas(view) => write!(
                f,
                "Canvas({:?}, {}x{} tiles)",
                view.strategy, view.layout.columns, view.layout.rows
            ),
            RenderedView::Thumbnail { .. } => f.write_str("Thumbnail"),
            RenderedView::Placeholder => f.write_str("Placeholder"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERER
// ═══════════════════════════════════════════════════════════════════════════════

/// One render job
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub gallery_slug: String,
    pub media: MediaReference,
    pub policy: ProtectionPolicy,
    /// CSS width the view is laid out at; defaults to the image width
    pub display_width: Option<u32>,
}

/// Secure image renderer
pub struct SecureImageRenderer {
    gate: Arc<dyn TokenGate>,
    fetcher: Arc<dyn MediaFetcher>,
    config: Arc<ShieldConfig>,
}

impl SecureImageRenderer {
    pub fn new(gate: Arc<dyn TokenGate>, fetcher: Arc<dyn MediaFetcher>, config: Arc<ShieldConfig>) -> Self {
        Self { gate, fetcher, config }
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.config
    }

    /// Render a request; never fails, degrades instead
    ///
    /// Stops between stages once `sink` is revoked and returns a placeholder
    /// without reporting anything.
    pub async fn render(&self, request: &RenderRequest, sink: &ViolationSink) -> RenderedView {
        match self.try_render(request, sink).await {
            Ok(view) => {
                if let RenderedView::Canvas(canvas) = &view {
                    if canvas.access_blocked() {
                        if let Some(kind) = ShieldError::CanvasAccessBlocked.violation_kind() {
                            sink.emit(kind);
                        }
                    }
                }
                view
            }
            Err(ShieldError::RenderCancelled) => {
                log::debug!("Render for photo {} abandoned after unmount", request.media.photo_id);
                RenderedView::Placeholder
            }
            Err(e) => {
                log::warn!("Delivery degraded for photo {}: {}", request.media.photo_id, e);
                Self::fallback(&request.media)
            }
        }
    }

    fn fallback(media: &MediaReference) -> RenderedView {
        match &media.thumbnail_url {
            Some(url) => RenderedView::Thumbnail { url: url.clone() },
            None => RenderedView::Placeholder,
        }
    }

    /// Final byte-serving URL for the media
    pub async fn resolve_url(&self, gallery_slug: &str, media: &MediaReference) -> ShieldResult<String> {
        if !media.requires_token {
            return Ok(media.url.clone());
        }
        media.validate()?;
        let grant = self.gate.grant(gallery_slug, media).await?;
        grant.resolve(media)
    }

    async fn try_render(&self, request: &RenderRequest, sink: &ViolationSink) -> ShieldResult<RenderedView> {
        let RenderRequest { gallery_slug, media, policy, display_width } = request;
        let url = self.resolve_url(gallery_slug, media).await?;
        ensure_live(sink)?;

        let strategy = RenderStrategy::select(policy);
        let label = policy
            .watermark_enabled
            .then(|| watermark_label(policy, media, &self.config.watermark));

        if strategy == RenderStrategy::NativeImage {
            return Ok(RenderedView::Native(NativeImageView {
                url,
                protect_from_download: !policy.allow_download,
                watermark_label: label,
            }));
        }

        let mut fetched = self.fetcher.fetch(&url).await?;
        if let Err(e) = ensure_live(sink) {
            fetched.bytes.zeroize();
            return Err(e);
        }

        // Decoding and tiling are CPU bound; keep them off the async workers
        let config = self.config.clone();
        let sink = sink.clone();
        let display_width = *display_width;
        let allow_download = policy.allow_download;
        tokio::task::spawn_blocking(move || {
            let decoded = image::load_from_memory(&fetched.bytes);
            fetched.bytes.zeroize();
            let mut source = decoded?.to_rgba8();

            let composed = ensure_live(&sink).and_then(|()| {
                compose(
                    &config,
                    strategy,
                    &source,
                    fetched.cross_origin_clean,
                    label,
                    display_width,
                    allow_download,
                )
            });
            // Only the canvases keep pixels
            let buffer: &mut [u8] = &mut source;
            buffer.zeroize();
            composed
        })
        .await
        .map_err(|e| ShieldError::DecodeFailed(format!("decode task failed: {}", e)))?
    }
}

fn ensure_live(sink: &ViolationSink) -> ShieldResult<()> {
    if sink.is_live() {
        Ok(())
    } else {
        Err(ShieldError::RenderCancelled)
    }
}

fn compose(
    config: &ShieldConfig,
    strategy: RenderStrategy,
    source: &RgbaImage,
    origin_clean: bool,
    label: Option<String>,
    display_width: Option<u32>,
    allow_download: bool,
) -> ShieldResult<RenderedView> {
    let (width, height) = source.dimensions();
    let layout = match strategy {
        RenderStrategy::FragmentGrid => {
            let display_width = display_width.unwrap_or(width).max(1);
            let display_height = ((height as u64 * display_width as u64) / width.max(1) as u64) as u32;
            let (columns, rows) = effective_grid(&config.grid, display_width, display_height);
            FragmentLayout::partition(width, height, columns.min(width), rows.min(height))?
        }
        _ => FragmentLayout::whole(width, height)?,
    };

    let watermark = label.map(|text| WatermarkPlan::layout(text, width, height, &config.watermark));

    let mut tiles = Vec::with_capacity(layout.tile_count());
    for rect in &layout.tiles {
        let mut canvas = Canvas::new(*rect);
        canvas.draw_image(source, origin_clean)?;
        if let Some(plan) = &watermark {
            canvas.draw_watermark(plan);
        }
        tiles.push(canvas);
    }

    log::debug!(
        "Composed {:?} {}x{} as {}x{} tiles",
        strategy,
        width,
        height,
        layout.columns,
        layout.rows
    );

    Ok(RenderedView::Canvas(CanvasView {
        strategy,
        layout,
        tiles,
        watermark,
        allow_download,
    }))
}
