//! meshcam: webcam face-mesh overlay viewer CLI.

use anyhow::Result;
use clap::Parser;
use meshcam::capture::{CaptureBackend, CaptureConfig, NokhwaCapture};
use meshcam::controller::FrameLoop;
use meshcam::detector::{self, FaceMeshSession, SessionConfig};
use meshcam::display::DisplaySurface;
use std::path::PathBuf;
use tracing::info;

const WINDOW_TITLE: &str = "meshcam";

/// Overlay face-mesh landmarks on live webcam video.
#[derive(Parser, Debug)]
#[command(name = "meshcam")]
#[command(about = "Show face-mesh landmarks over live webcam video")]
struct Args {
    /// Camera device index
    #[arg(short, long, default_value = "2")]
    input: u32,

    /// Initial window width
    #[arg(long, default_value = "800")]
    width: u32,

    /// Initial window height
    #[arg(long, default_value = "600")]
    height: u32,

    /// Directory containing the face-mesh ONNX models
    #[arg(long, default_value = "models")]
    models: PathBuf,

    /// List available cameras and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Initialize ONNX Runtime
    detector::init_runtime()?;

    let args = Args::parse();

    // List devices mode
    if args.list_devices {
        println!("Available cameras:");
        match NokhwaCapture::list_devices() {
            Ok(devices) => {
                for device in devices {
                    println!("  [{}] {}", device.index, device.name);
                }
            }
            Err(e) => {
                eprintln!("Failed to list devices: {}", e);
            }
        }
        return Ok(());
    }

    info!("Starting meshcam...");

    // Resources are acquired in order: camera, window, detection session.
    // Any failure here aborts before the loop is entered.
    info!("Opening camera device {}...", args.input);
    let capture = NokhwaCapture::open(CaptureConfig {
        device_index: args.input,
        ..Default::default()
    })?;
    let (cam_w, cam_h) = capture.frame_size();
    info!("Camera opened successfully at {}x{}", cam_w, cam_h);

    let surface = DisplaySurface::new(WINDOW_TITLE, args.width, args.height)?;

    let config = SessionConfig::default();
    let session = FaceMeshSession::new(config, &args.models)?;
    info!(
        "Face mesh session initialized (streaming, up to {} faces)",
        config.max_faces
    );

    let mut frame_loop = FrameLoop::new(capture, session, surface);
    let reason = frame_loop.run();
    info!("Stopped: {reason}");

    Ok(())
}
