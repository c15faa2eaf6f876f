//! Two-stage relay pipeline and its supervisor

pub mod buffer;
mod ingest;
mod output;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::engine::ChildRegistry;
use buffer::FrameBuffer;
use ingest::IngestStage;
use output::OutputStage;

/// Bound on joining each stage task at shutdown.
const STAGE_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared relay counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub(crate) frames_ingested: AtomicU64,
    pub(crate) frames_relayed: AtomicU64,
    pub(crate) frozen_frames: AtomicU64,
    pub(crate) error_frames: AtomicU64,
    pub(crate) decoder_restarts: AtomicU64,
    pub(crate) encoder_restarts: AtomicU64,
}

/// Point-in-time view of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub frames_ingested: u64,
    pub frames_relayed: u64,
    pub frozen_frames: u64,
    pub error_frames: u64,
    pub decoder_restarts: u64,
    pub encoder_restarts: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_ingested: self.frames_ingested.load(Ordering::Relaxed),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            frozen_frames: self.frozen_frames.load(Ordering::Relaxed),
            error_frames: self.error_frames.load(Ordering::Relaxed),
            decoder_restarts: self.decoder_restarts.load(Ordering::Relaxed),
            encoder_restarts: self.encoder_restarts.load(Ordering::Relaxed),
        }
    }
}

/// The relay service: owns the frame mailbox, the shutdown signal, the
/// registry of live engine children, and the two supervised stage tasks.
///
/// Media-level failures never escape the stages; each is self-healing.
/// `stop` is the only way the pipeline ends.
pub struct Relay {
    config: Arc<RelayConfig>,
    buffer: Arc<FrameBuffer>,
    registry: Arc<ChildRegistry>,
    stats: Arc<RelayStats>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            buffer: Arc::new(FrameBuffer::new()),
            registry: Arc::new(ChildRegistry::default()),
            stats: Arc::new(RelayStats::default()),
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Spawns the ingest and output stage tasks. Idempotent.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            debug!("Relay already started");
            return;
        }

        info!(
            input = %self.config.input_url,
            output = %self.config.output_url,
            resolution = %format!("{}x{}", self.config.width, self.config.height),
            fps = %self.config.fps,
            codec = ?self.config.codec,
            "Starting relay"
        );

        let ingest = IngestStage::new(
            Arc::clone(&self.config),
            Arc::clone(&self.buffer),
            Arc::clone(&self.registry),
            Arc::clone(&self.stats),
            self.shutdown.subscribe(),
        );
        self.tasks.push(tokio::spawn(ingest.run()));

        let output = OutputStage::new(
            Arc::clone(&self.config),
            Arc::clone(&self.buffer),
            Arc::clone(&self.registry),
            Arc::clone(&self.stats),
            self.shutdown.subscribe(),
        );
        self.tasks.push(tokio::spawn(output.run()));
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Signals shutdown, joins both stages with a bound, and sweeps any
    /// engine process group a stage did not get to terminate itself.
    pub async fn stop(mut self) {
        info!("Stopping relay");
        let _ = self.shutdown.send(true);

        for task in self.tasks.drain(..) {
            let abort = task.abort_handle();
            if time::timeout(STAGE_JOIN_TIMEOUT, task).await.is_err() {
                warn!("Stage did not stop within bound, aborting task");
                abort.abort();
            }
        }

        let swept = self.registry.kill_remaining();
        if swept > 0 {
            warn!(process_groups = swept, "Force-killed engine processes at shutdown");
        }

        info!("Relay stopped");
    }
}
