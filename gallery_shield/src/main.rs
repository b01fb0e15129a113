//! Gallery Shield - CLI
//!
//! Inspect derived policies and the escalation table, mint access tokens and
//! render local images the way a protected viewer would.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;

use gallery_shield::escalation::decide_in;
use gallery_shield::render::{Canvas, DrawOp, FragmentLayout, WatermarkPlan};
use gallery_shield::token_gate::GateKey;
use gallery_shield::{
    derive_policy, GalleryProtectionSettings, HmacTokenGate, LocalFileFetcher, MediaReference, ProtectionLevel,
    RenderRequest, RenderStrategy, RenderedView, SecureImageRenderer, ShieldConfig, ViewContext, ViolationKind,
    ViolationLog, ViolationSink,
};

#[derive(Parser)]
#[command(name = "gallery-shield")]
#[command(author = "Karen Tonoyan")]
#[command(version = gallery_shield::VERSION)]
#[command(about = "Gallery Shield - protected media delivery for photo galleries")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the policy derived from a protection level
    Policy {
        /// basic | standard | enhanced | maximum
        level: String,

        /// Gallery allows downloads
        #[arg(long)]
        allow_downloads: bool,
    },

    /// Print the escalation table
    Matrix,

    /// Mint an access token for a photo
    Issue {
        /// Gallery slug
        #[arg(short, long)]
        gallery: String,

        /// Photo ID
        photo: String,

        /// Gate key (base64url); a fresh key is generated when omitted
        #[arg(short, long, env = "GALLERY_SHIELD_KEY")]
        key: Option<String>,
    },

    /// Render a local image under a protection level
    Render {
        /// Source image
        image: PathBuf,

        /// Output directory for tiles and layout.json
        #[arg(short, long, default_value = "./rendered")]
        out: PathBuf,

        /// basic | standard | enhanced | maximum
        #[arg(short, long, default_value = "maximum")]
        level: String,

        /// Custom watermark text
        #[arg(short, long)]
        watermark: Option<String>,

        /// Layout width in CSS pixels
        #[arg(long)]
        width: Option<u32>,

        /// Gallery allows downloads
        #[arg(long)]
        allow_downloads: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => ShieldConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ShieldConfig::default(),
    };

    match cli.command {
        Commands::Policy { level, allow_downloads } => {
            let level: ProtectionLevel = level.parse()?;
            let policy = derive_policy(level, allow_downloads);
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }

        Commands::Matrix => print_matrix(),

        Commands::Issue { gallery, photo, key } => {
            let key = match key {
                Some(encoded) => GateKey::from_base64(&encoded)?,
                None => {
                    let key = GateKey::generate();
                    println!("🔑 Ephemeral key: {}", key.to_base64());
                    key
                }
            };
            let gate = HmacTokenGate::new(key, config.token_ttl());
            let (token, expires_at) = gate.issue(&gallery, &photo)?;
            println!("🎫 Token: {}", token);
            println!("⏳ Expires: {}", expires_at.to_rfc3339());
        }

        Commands::Render {
            image,
            out,
            level,
            watermark,
            width,
            allow_downloads,
        } => {
            let mut settings = GalleryProtectionSettings::new(level.parse()?, allow_downloads);
            settings.watermark_text = watermark;
            render_local(&image, &out, &settings, width, config).await?;
        }
    }

    Ok(())
}

fn print_matrix() {
    print!("{:<10}", "level");
    for kind in ViolationKind::ALL {
        print!(" {:<26}", kind.as_str());
    }
    println!();
    println!("{:-<145}", "");

    for level in ProtectionLevel::ALL {
        print!("{:<10}", level.as_str());
        for kind in ViolationKind::ALL {
            let viewer = decide_in(ViewContext::Viewer, level, kind);
            let gallery = decide_in(ViewContext::Gallery, level, kind);
            let cell = if viewer == gallery {
                format!("{:?}", viewer)
            } else {
                format!("{:?} (grid: {:?})", viewer, gallery)
            };
            print!(" {:<26}", cell);
        }
        println!();
    }
}

#[derive(Serialize)]
struct TileEntry<'a> {
    file: String,
    column: u32,
    row: u32,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    ops: &'a [DrawOp],
}

#[derive(Serialize)]
struct LayoutFile<'a> {
    photo_id: &'a str,
    strategy: RenderStrategy,
    downloadable: bool,
    layout: &'a FragmentLayout,
    watermark: Option<&'a WatermarkPlan>,
    tiles: Vec<TileEntry<'a>>,
    violations: Vec<ViolationKind>,
}

async fn render_local(
    image: &Path,
    out: &Path,
    settings: &GalleryProtectionSettings,
    display_width: Option<u32>,
    config: ShieldConfig,
) -> anyhow::Result<()> {
    let root = image.parent().unwrap_or_else(|| Path::new("."));
    let file_name = image
        .file_name()
        .and_then(|n| n.to_str())
        .context("image path has no file name")?
        .to_string();

    const SLUG: &str = "local";
    let gate = Arc::new(HmacTokenGate::new(GateKey::generate(), config.token_ttl()));
    let fetcher = Arc::new(LocalFileFetcher::new(root, SLUG, gate.clone()));
    let renderer = SecureImageRenderer::new(gate, fetcher, Arc::new(config));

    let media = MediaReference::gated(&file_name, &file_name, format!("{}?token={{token}}", file_name))
        .with_filename(&file_name);
    let request = RenderRequest {
        gallery_slug: SLUG.into(),
        media,
        policy: settings.policy(),
        display_width,
    };

    let log = Arc::new(ViolationLog::new());
    let sink = ViolationSink::new(&file_name, settings.level(), log.clone());

    println!("🖼️  Rendering {} at {} protection", file_name, settings.level());
    let view = renderer.render(&request, &sink).await;

    match &view {
        RenderedView::Native(native) => {
            println!("Native image element (no canvas at this level)");
            println!("   protect_from_download: {}", native.protect_from_download);
            for hint in native.style_hints() {
                println!("   style: {}", hint);
            }
        }
        RenderedView::Canvas(canvas) => {
            std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;

            let mut tiles = Vec::with_capacity(canvas.tiles.len());
            for tile in &canvas.tiles {
                tiles.push(write_tile(out, tile)?);
            }

            let layout = LayoutFile {
                photo_id: &file_name,
                strategy: canvas.strategy,
                downloadable: view.downloadable(),
                layout: &canvas.layout,
                watermark: canvas.watermark.as_ref(),
                tiles,
                violations: log.kinds(),
            };
            let layout_path = out.join("layout.json");
            std::fs::write(&layout_path, serde_json::to_string_pretty(&layout)?)?;

            println!(
                "✅ {} tile(s) ({}x{}) written to {}",
                canvas.tiles.len(),
                canvas.layout.columns,
                canvas.layout.rows,
                out.display()
            );
        }
        RenderedView::Thumbnail { .. } | RenderedView::Placeholder => {
            bail!("delivery failed for {}; see log for details", file_name);
        }
    }

    for kind in log.kinds() {
        println!("⚠️  Violation: {}", kind.as_str());
    }
    Ok(())
}

fn write_tile<'a>(out: &Path, tile: &'a Canvas) -> anyhow::Result<TileEntry<'a>> {
    let rect = tile.rect();
    let file = format!("tile_r{}_c{}.png", rect.row, rect.column);
    let png = tile.encode_png()?;
    std::fs::write(out.join(&file), png)?;

    Ok(TileEntry {
        file,
        column: rect.column,
        row: rect.row,
        x: rect.x,
        y: rect.y,
        width: rect.width,
        height: rect.height,
        ops: tile.ops(),
    })
}
