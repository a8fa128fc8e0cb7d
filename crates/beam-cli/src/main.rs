use anyhow::{Context, Result};
use beam_hw::Camera;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[zbus::proxy(
    interface = "org.beam.Beam1",
    default_service = "org.beam.Beam1",
    default_path = "/org/beam/Beam1"
)]
trait Beam {
    fn start(&self) -> zbus::Result<bool>;
    fn stop(&self) -> zbus::Result<bool>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "beam", about = "Webcam happiness indicator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a sampling session
    Start,
    /// Stop the current session
    Stop,
    /// Show daemon status as JSON
    Status,
    /// Show the live background colour and score in the terminal
    Watch {
        /// Refresh period in milliseconds
        #[arg(short, long, default_value_t = 100)]
        interval_ms: u64,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// Camera device to open
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Number of frames to capture
        #[arg(short, long, default_value_t = 30)]
        frames: u32,
        /// Save the last frame as a PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let proxy = connect().await?;
            if proxy.start().await? {
                println!("session started");
            } else {
                println!("session already active");
            }
        }
        Commands::Stop => {
            let proxy = connect().await?;
            if proxy.stop().await? {
                println!("session stopped");
            } else {
                println!("no active session");
            }
        }
        Commands::Status => {
            let proxy = connect().await?;
            let raw = proxy.status().await?;
            let value: serde_json::Value =
                serde_json::from_str(&raw).context("daemon returned malformed status")?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Watch { interval_ms } => {
            let proxy = connect().await?;
            watch(&proxy, Duration::from_millis(interval_ms.max(10))).await?;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no capture devices found");
            }
            for d in devices {
                println!("{}\t{} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test { device, frames, output } => {
            tokio::task::spawn_blocking(move || camera_test(&device, frames, output))
                .await
                .context("camera test worker failed")??;
        }
    }

    Ok(())
}

async fn connect() -> Result<BeamProxy<'static>> {
    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    BeamProxy::new(&connection)
        .await
        .context("beamd is not reachable on the session bus")
}

async fn watch(proxy: &BeamProxy<'_>, period: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(period);
    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }
        let raw = proxy.status().await?;
        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed status");
                continue;
            }
        };
        write!(stdout, "\r{}", render_line(&value))?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

/// One terminal line: the label on the current background colour.
fn render_line(status: &serde_json::Value) -> String {
    let state = status["state"].as_str().unwrap_or("unknown");
    let label = status["label"].as_str().unwrap_or("Score: --");
    let rgb: Option<Vec<u8>> = status["background_rgb"].as_array().and_then(|a| {
        a.iter()
            .map(|c| c.as_u64().and_then(|c| u8::try_from(c).ok()))
            .collect()
    });

    match rgb.as_deref() {
        Some(&[r, g, b]) => {
            let luma = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
            let fg = if luma > 128.0 { "30" } else { "97" };
            format!("\x1b[48;2;{r};{g};{b}m\x1b[{fg}m  {label:<16}\x1b[0m [{state}]\x1b[K")
        }
        _ => format!("  {label:<16} [{state}]\x1b[K"),
    }
}

fn camera_test(device: &str, frames: u32, output: Option<PathBuf>) -> Result<()> {
    let mut camera = Camera::open(device, 640, 480)?;
    println!(
        "{}: {}x{} {:?}",
        camera.device_path, camera.width, camera.height, camera.fourcc
    );

    let frames = frames.max(1);
    let started = Instant::now();
    let mut last = None;
    for _ in 0..frames {
        last = Some(camera.capture_frame()?);
    }
    let elapsed = started.elapsed();

    let Some(frame) = last else {
        anyhow::bail!("no frames captured");
    };
    let mean = frame.data.iter().map(|&p| u64::from(p)).sum::<u64>() as f64 / frame.data.len().max(1) as f64;
    println!(
        "captured {frames} frames in {:.2}s ({:.1} fps), last frame #{} mean brightness {mean:.1}",
        elapsed.as_secs_f64(),
        f64::from(frames) / elapsed.as_secs_f64().max(f64::EPSILON),
        frame.sequence
    );

    if let Some(path) = output {
        let img = image::GrayImage::from_raw(frame.width, frame.height, frame.data)
            .context("frame buffer does not match its dimensions")?;
        img.save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("saved {}", path.display());
    }
    Ok(())
}
