//! wlo - scrolling text overlay for wlroots-based Wayland compositors
//!
//! Reads lines from stdin and paints each one, faintly, onto a click-through
//! layer-shell overlay, scrolling down one line per input and wrapping back
//! to the top when the surface is full.

mod blit;
mod config;
mod damage;
mod glyph;
mod input;
mod present;
mod shm;
mod slots;
mod surface;
mod wayland;

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: wlo [--config PATH] [--strict-configure] [--no-release-tracking]";

/// Command line overrides
#[derive(Debug, Default, PartialEq, Eq)]
struct Options {
    config: Option<PathBuf>,
    strict_configure: bool,
    no_release_tracking: bool,
    help: bool,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self> {
        let mut options = Self::default();
        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = iter.next().context("--config needs a path")?;
                    options.config = Some(PathBuf::from(path));
                }
                "--strict-configure" => options.strict_configure = true,
                "--no-release-tracking" => options.no_release_tracking = true,
                "--help" | "-h" => options.help = true,
                other => bail!("unknown argument {:?}\n{}", other, USAGE),
            }
        }
        Ok(options)
    }
}

fn run(options: &Options) -> Result<()> {
    let mut config =
        config::Config::load(options.config.as_deref()).context("Failed to load configuration")?;
    if options.strict_configure {
        config.surface.configure_policy = surface::ConfigurePolicy::Strict;
    }
    if options.no_release_tracking {
        config.present.track_release = false;
    }

    let session = wayland::WaylandSession::connect(&config.surface)
        .context("Failed to set up overlay surface")?;

    let (width, height) = session.size();
    let pool = shm::FramePool::allocate(width, height).context("Failed to allocate frame pool")?;

    let rasterizer =
        glyph::FontRasterizer::init(&config.font).context("Failed to initialize font rasterizer")?;

    let mut presenter = present::Presenter::new(
        session,
        rasterizer,
        pool,
        config.text.clone(),
        config.present.track_release,
    )
    .context("Failed to register frame pool")?;

    info!("Reading lines from stdin");
    let mut source = input::LineSource::new(std::io::stdin().lock());
    let result = presenter.run(&mut source);

    presenter.into_glyphs().shutdown();
    result.context("Overlay stopped")
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "wlo=info,warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = Options::parse(&args)?;
    if options.help {
        println!("{}", USAGE);
        return Ok(());
    }

    info!("Starting wlo overlay (pid {})", std::process::id());

    log_failure(run(&options))
}

/// Log a fatal error with its context chain before it reaches the caller
fn log_failure(result: Result<()>) -> Result<()> {
    result.inspect_err(|e| error!("{:#}", e))
}
