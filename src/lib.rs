//! Resilient RTSP relay
//!
//! Pulls a continuous RTSP feed, decodes it to raw RGB frames through an
//! external ffmpeg process, and re-publishes the stream as RTSP at a
//! constant framerate. When the upstream stalls or disconnects, the relay
//! keeps the downstream session alive: it freezes on the last good frame
//! (with a staleness overlay) and falls back to a generated error frame
//! after a grace period.
//!
//! The pipeline is two supervised stages decoupled by a single-slot
//! latest-wins frame mailbox:
//!
//! ```text
//! upstream RTSP -> decoder (ffmpeg) -> ingest -> FrameBuffer
//!                                   -> output -> encoder (ffmpeg) -> downstream RTSP
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rtsp_relay::{Relay, RelayConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = RelayConfig::new(
//!     "rtsp://camera.local/stream".into(),
//!     "rtsp://relay.local/live".into(),
//! );
//! config.validate()?;
//!
//! let mut relay = Relay::new(config);
//! relay.start();
//! tokio::signal::ctrl_c().await?;
//! relay.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod stream;
pub mod video;

// Re-exports for convenience
pub use config::{Codec, ConfigError, Preset, RelayConfig};
pub use stream::buffer::{Frame, FrameBuffer};
pub use stream::{Relay, RelayStats, StatsSnapshot};
pub use video::scale::ScalePlan;
