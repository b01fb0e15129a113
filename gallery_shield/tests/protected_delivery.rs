//! End-to-end delivery through the reference gate and a local media root

use std::sync::Arc;

use gallery_shield::platform::{DomEventKind, KeyEvent};
use gallery_shield::token_gate::GateKey;
use gallery_shield::{
    decide, Action, Document, DomEvent, EnvironmentProbe, EnvironmentSample, GalleryProtectionSettings,
    GalleryViewHost, HmacTokenGate, HostCommand, HostServices, LocalFileFetcher, MediaReference, ProtectionLevel,
    ProtectionRuntime, RenderStrategy, RenderedView, ShieldConfig, ViewSurface, ViolationKind, ViolationLog,
};
use image::{ImageFormat, Rgba, RgbaImage};
use tempfile::TempDir;

const SLUG: &str = "smith-wedding";

fn media_root() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let img = RgbaImage::from_fn(640, 427, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 90, 255]));
    img.save_with_format(dir.path().join("ceremony.png"), ImageFormat::Png).unwrap();
    dir
}

fn services(root: &TempDir, probe: Arc<dyn EnvironmentProbe>) -> HostServices {
    let config = Arc::new(ShieldConfig::default());
    let gate = Arc::new(HmacTokenGate::new(GateKey::generate(), config.token_ttl()));
    HostServices {
        gate: gate.clone(),
        fetcher: Arc::new(LocalFileFetcher::new(root.path(), SLUG, gate)),
        runtime: ProtectionRuntime::new(Document::new(), probe, &config),
        config,
    }
}

fn calm() -> Arc<dyn EnvironmentProbe> {
    Arc::new(|| EnvironmentSample::calm(1440, 900))
}

fn ceremony() -> MediaReference {
    MediaReference::gated("ceremony.png", "ceremony.png", "ceremony.png?token={token}")
        .with_thumbnail("ceremony_thumb.jpg")
        .with_filename("ceremony.png")
}

#[tokio::test]
async fn maximum_lightbox_renders_fragment_grid() {
    let root = media_root();
    let log = Arc::new(ViolationLog::new());
    let mut host = GalleryViewHost::new(
        ViewSurface::Lightbox,
        SLUG,
        &GalleryProtectionSettings::new(ProtectionLevel::Maximum, false),
        services(&root, calm()),
    )
    .with_display_width(1280);
    host.subscribe(log.clone());

    host.show(ceremony());
    let view = host.view().await.unwrap();

    let RenderedView::Canvas(canvas) = view else {
        panic!("expected canvas view, got {:?}", view);
    };
    assert_eq!(canvas.strategy, RenderStrategy::FragmentGrid);
    assert_eq!(canvas.layout.bounding_box(), Some((0, 0, 640, 427)));
    canvas.layout.verify_tiling().unwrap();
    assert_eq!(canvas.watermark.as_ref().unwrap().text, "Protected · ceremony.png");
    assert!(!view.downloadable());
    assert!(log.is_empty());
}

#[tokio::test]
async fn unknown_level_fails_closed_to_standard() {
    let root = media_root();
    let settings = GalleryProtectionSettings {
        protection_level: "ultra".into(),
        allow_downloads: true,
        watermark_text: None,
    };
    let mut host = GalleryViewHost::new(ViewSurface::HeroBanner, SLUG, &settings, services(&root, calm()));
    assert_eq!(host.level(), ProtectionLevel::Standard);

    host.show(ceremony());
    let view = host.view().await.unwrap();
    assert_eq!(view.strategy(), Some(RenderStrategy::CanvasComposite));
    assert!(view.downloadable());
}

#[tokio::test]
async fn missing_file_degrades_to_thumbnail() {
    let root = media_root();
    let log = Arc::new(ViolationLog::new());
    let mut host = GalleryViewHost::new(
        ViewSurface::Lightbox,
        SLUG,
        &GalleryProtectionSettings::new(ProtectionLevel::Enhanced, false),
        services(&root, calm()),
    );
    host.subscribe(log.clone());

    host.show(MediaReference::gated("gone.png", "gone.png", "gone.png?token={token}").with_thumbnail("gone_thumb.jpg"));
    assert!(matches!(host.view().await.unwrap(), RenderedView::Thumbnail { .. }));
    assert!(log.is_empty());
}

#[tokio::test]
async fn repeated_mounts_leave_no_timers_or_listeners() {
    let root = media_root();
    let services = services(&root, calm());
    let runtime = services.runtime.clone();
    let mut host = GalleryViewHost::new(
        ViewSurface::Lightbox,
        SLUG,
        &GalleryProtectionSettings::new(ProtectionLevel::Maximum, false),
        services,
    );

    for _ in 0..50 {
        host.show(ceremony());
        host.close();
    }

    assert_eq!(runtime.timers.active(), 0);
    assert_eq!(runtime.document.listener_count(DomEventKind::KeyDown), 0);
    assert_eq!(runtime.document.total_listeners(), 0);
}

#[tokio::test]
async fn violations_reach_analytics_and_escalator_in_order() {
    let root = media_root();
    let log = Arc::new(ViolationLog::new());
    let mut host = GalleryViewHost::new(
        ViewSurface::Lightbox,
        SLUG,
        &GalleryProtectionSettings::new(ProtectionLevel::Enhanced, false),
        services(&root, calm()),
    );
    host.subscribe(log.clone());
    host.show(ceremony());

    let document = host.runtime().document.clone();
    document.dispatch(&DomEvent::KeyDown(KeyEvent::ctrl("p")));
    document.dispatch(&DomEvent::Copy);
    document.dispatch(&DomEvent::KeyDown(KeyEvent::plain("PrintScreen")));

    assert_eq!(
        log.kinds(),
        vec![
            ViolationKind::KeyboardShortcutBlocked,
            ViolationKind::ClipboardCaptureAttempt,
            ViolationKind::PrintScreenDetected,
        ]
    );
    let records = log.records();
    assert!(records.iter().all(|r| r.photo_id == "ceremony.png"));

    // Only the print-screen escalates at enhanced
    assert!(matches!(host.try_next_command(), Some(HostCommand::CloseViewer { .. })));
    assert!(host.try_next_command().is_none());
}

#[test]
fn named_escalation_scenarios() {
    assert_eq!(decide(ProtectionLevel::Maximum, ViolationKind::DevtoolsDetected), Action::CloseViewer);
    assert_eq!(decide(ProtectionLevel::Basic, ViolationKind::DevtoolsDetected), Action::Log);
}
