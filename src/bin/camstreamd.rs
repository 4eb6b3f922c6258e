//! camstreamd - single-camera MJPEG server
//!
//! This daemon:
//! 1. Loads configuration (JSON file, environment, command line)
//! 2. Opens the configured frame source
//! 3. Serves `/`, `/jpg`, `/stream`, `/flash`, `/restart`
//! 4. Stops on Ctrl-C, or re-executes itself when `/restart` is called

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use camstream::{
    open_source, telemetry, CamstreamConfig, CameraServer, ControlEvent, Flash, ServerConfig,
    SharedCamera, SysfsGpioPin, SystemMemoryProbe,
};

#[derive(Parser, Debug)]
#[command(
    name = "camstreamd",
    version,
    about = "Serve one camera as JPEG snapshots and an MJPEG stream"
)]
struct Args {
    /// JSON config file (defaults to $CAMSTREAM_CONFIG).
    #[arg(long, env = "CAMSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file.
    #[arg(long)]
    addr: Option<String>,

    /// Frame source URL (stub://, dir://, http://, v4l2://), overriding the config file.
    #[arg(long)]
    source: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = CamstreamConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        cfg.addr = addr;
    }
    if let Some(source) = args.source {
        cfg.source.url = source;
    }
    cfg.socket_addr()?;

    telemetry::log_memory(&SystemMemoryProbe);

    let profile = cfg.capture_profile()?;
    let source = open_source(&cfg.source.url, profile)
        .with_context(|| format!("failed to open source {}", cfg.source.url))?;
    log::info!(
        "camera source {} at {} quality {}",
        cfg.source.url,
        profile.frame_size,
        profile.jpeg_quality
    );
    let camera = SharedCamera::new(source);

    let flash = match cfg.flash_gpio {
        Some(gpio) => {
            log::info!("flash on gpio {}", gpio);
            Flash::new(Box::new(SysfsGpioPin::new(gpio)))
        }
        None => Flash::disabled(),
    };

    let handle =
        CameraServer::new(ServerConfig::from(&cfg), camera, Arc::new(flash)).spawn()?;
    log::info!("camstreamd serving http://{}/", handle.addr);

    let shutdown = handle.control_sender();
    ctrlc::set_handler(move || {
        let _ = shutdown.send(ControlEvent::Shutdown);
    })
    .expect("error setting Ctrl-C handler");

    let event = handle.recv_control()?;
    log::info!("{:?} requested, stopping camera server...", event);
    let stats = handle.camera_stats();
    log::info!(
        "camera {}: {} frames captured, {} acquire failures, {} reconfigurations",
        stats.source,
        stats.frames_captured,
        stats.acquire_failures,
        stats.reconfigurations
    );
    handle.stop()?;

    match event {
        ControlEvent::Shutdown => Ok(()),
        ControlEvent::Restart => restart(),
    }
}

/// Replace this process with a fresh copy of itself.
#[cfg(unix)]
fn restart() -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let err = std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(anyhow!("failed to re-execute {}: {}", exe.display(), err))
}

#[cfg(not(unix))]
fn restart() -> Result<()> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .spawn()
        .with_context(|| format!("failed to restart {}", exe.display()))?;
    Ok(())
}
