//! RTSP relay CLI

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use rtsp_relay::{Codec, Preset, Relay, RelayConfig};

#[derive(Parser, Debug)]
#[command(name = "rtsp-relay")]
#[command(about = "Resilient RTSP relay with freeze-frame failover")]
#[command(version)]
struct Cli {
    /// Upstream RTSP URL to pull from
    input_url: String,

    /// Downstream RTSP URL to publish to
    output_url: String,

    /// Seconds without frames before the error frame replaces the frozen frame
    #[arg(long, default_value_t = 15.0)]
    timeout: f64,

    /// Per-frame read deadline on the decoder, in seconds
    #[arg(long, default_value_t = 5.0)]
    read_timeout: f64,

    /// Output codec
    #[arg(long, value_enum, default_value = "libx264")]
    codec: Codec,

    /// Output bitrate (engine-native spec, e.g. 2M, 4M)
    #[arg(long, default_value = "2M")]
    bitrate: String,

    /// Encoder preset
    #[arg(long, value_enum, default_value = "medium")]
    preset: Preset,

    /// Keyframe interval in frames
    #[arg(long, default_value_t = 30)]
    gop: u32,

    /// Output framerate
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Output width
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Output height
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Input width, if known; together with --input-height skips probing
    #[arg(long)]
    input_width: Option<u32>,

    /// Input height, if known
    #[arg(long)]
    input_height: Option<u32>,

    /// ffmpeg binary to invoke
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg_path: String,

    /// ffprobe binary to invoke
    #[arg(long, default_value = "ffprobe")]
    ffprobe_path: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<RelayConfig> {
        let mut config = RelayConfig::new(self.input_url, self.output_url);
        config.stale_timeout =
            Duration::try_from_secs_f64(self.timeout).context("invalid --timeout")?;
        config.read_timeout =
            Duration::try_from_secs_f64(self.read_timeout).context("invalid --read-timeout")?;
        config.codec = self.codec;
        config.bitrate = self.bitrate;
        config.preset = self.preset;
        config.gop = self.gop;
        config.fps = self.fps;
        config.width = self.width;
        config.height = self.height;
        config.input_width = self.input_width;
        config.input_height = self.input_height;
        config.ffmpeg_path = self.ffmpeg_path;
        config.ffprobe_path = self.ffprobe_path;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    // Configuration errors are the only fatal ones; the supervision loops
    // retry everything else.
    let config = cli.into_config()?;

    info!(
        input = %config.input_url,
        output = %config.output_url,
        codec = ?config.codec,
        bitrate = %config.bitrate,
        "RTSP relay starting"
    );

    let mut relay = Relay::new(config);
    relay.start();

    info!("Relay running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Interrupt received, shutting down");
    relay.stop().await;

    Ok(())
}
