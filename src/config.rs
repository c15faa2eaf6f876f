//! Relay configuration

use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid output resolution {0}x{1}")]
    InvalidResolution(u32, u32),

    #[error("invalid pinned input resolution {0}x{1}")]
    InvalidInputResolution(u32, u32),

    #[error("invalid output framerate {0}")]
    InvalidFps(f64),

    #[error("GOP length must be at least 1")]
    InvalidGop,

    #[error("bitrate must not be empty")]
    EmptyBitrate,

    #[error("{0} URL must not be empty")]
    EmptyUrl(&'static str),
}

/// Output video codec selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Codec {
    /// H.264 via libx264
    #[value(name = "libx264")]
    H264,

    /// H.265 via libx265
    #[value(name = "libx265")]
    H265,

    /// Stream copy, no re-encoding
    #[value(name = "copy")]
    Copy,
}

impl Codec {
    /// ffmpeg encoder name for `-c:v`.
    pub fn encoder_name(&self) -> &'static str {
        match self {
            Codec::H264 => "libx264",
            Codec::H265 => "libx265",
            Codec::Copy => "copy",
        }
    }
}

/// Encoder speed/quality preset, passed through to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl Preset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Ultrafast => "ultrafast",
            Preset::Superfast => "superfast",
            Preset::Veryfast => "veryfast",
            Preset::Faster => "faster",
            Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow => "slow",
            Preset::Slower => "slower",
            Preset::Veryslow => "veryslow",
        }
    }
}

/// Complete relay configuration. Immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Upstream RTSP URL
    pub input_url: String,

    /// Downstream RTSP URL
    pub output_url: String,

    /// Output width in pixels
    pub width: u32,

    /// Output height in pixels
    pub height: u32,

    /// Output framerate
    pub fps: f64,

    /// Output codec
    pub codec: Codec,

    /// Engine-native bitrate spec (e.g. "2M")
    pub bitrate: String,

    /// Encoder preset
    pub preset: Preset,

    /// Keyframe interval in frames
    pub gop: u32,

    /// Grace period after the last ingested frame before the error frame
    /// replaces the frozen frame
    pub stale_timeout: Duration,

    /// Per-frame read deadline on the decoder pipe
    pub read_timeout: Duration,

    /// Pinned input width; bypasses probing when set together with
    /// `input_height`
    pub input_width: Option<u32>,

    /// Pinned input height
    pub input_height: Option<u32>,

    /// ffmpeg binary (resolved via PATH by default)
    pub ffmpeg_path: String,

    /// ffprobe binary (resolved via PATH by default)
    pub ffprobe_path: String,
}

impl RelayConfig {
    /// Creates a configuration with the default flag values from the CLI
    /// surface.
    pub fn new(input_url: String, output_url: String) -> Self {
        Self {
            input_url,
            output_url,
            width: 1920,
            height: 1080,
            fps: 30.0,
            codec: Codec::H264,
            bitrate: "2M".to_string(),
            preset: Preset::Medium,
            gop: 30,
            stale_timeout: Duration::from_secs_f64(15.0),
            read_timeout: Duration::from_secs_f64(5.0),
            input_width: None,
            input_height: None,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }

    /// Size of one raw RGB24 frame at the output resolution.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Output tick interval.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }

    /// Pinned input resolution, if both dimensions were given.
    pub fn pinned_input(&self) -> Option<(u32, u32)> {
        match (self.input_width, self.input_height) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        }
    }

    /// Validates the configuration. Called once at startup; failures are
    /// fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_url.is_empty() {
            return Err(ConfigError::EmptyUrl("input"));
        }
        if self.output_url.is_empty() {
            return Err(ConfigError::EmptyUrl("output"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidResolution(self.width, self.height));
        }
        if let (Some(w), Some(h)) = (self.input_width, self.input_height) {
            if w == 0 || h == 0 {
                return Err(ConfigError::InvalidInputResolution(w, h));
            }
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(ConfigError::InvalidFps(self.fps));
        }
        if self.gop == 0 {
            return Err(ConfigError::InvalidGop);
        }
        if self.bitrate.is_empty() {
            return Err(ConfigError::EmptyBitrate);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config() -> RelayConfig {
        RelayConfig::new("rtsp://in/stream".into(), "rtsp://out/stream".into())
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.width, 1920);
        assert_eq!(cfg.height, 1080);
        assert_eq!(cfg.codec, Codec::H264);
        assert_eq!(cfg.frame_size(), 1920 * 1080 * 3);
    }

    #[test]
    fn rejects_zero_resolution() {
        let mut cfg = config();
        cfg.height = 0;
        assert_matches!(cfg.validate(), Err(ConfigError::InvalidResolution(1920, 0)));
    }

    #[test]
    fn rejects_bad_fps() {
        let mut cfg = config();
        cfg.fps = 0.0;
        assert_matches!(cfg.validate(), Err(ConfigError::InvalidFps(_)));
        cfg.fps = f64::NAN;
        assert_matches!(cfg.validate(), Err(ConfigError::InvalidFps(_)));
    }

    #[test]
    fn rejects_empty_urls() {
        let mut cfg = config();
        cfg.output_url.clear();
        assert_matches!(cfg.validate(), Err(ConfigError::EmptyUrl("output")));
    }

    #[test]
    fn pinned_input_requires_both_dimensions() {
        let mut cfg = config();
        cfg.input_width = Some(640);
        assert_eq!(cfg.pinned_input(), None);
        cfg.input_height = Some(480);
        assert_eq!(cfg.pinned_input(), Some((640, 480)));
    }
}
