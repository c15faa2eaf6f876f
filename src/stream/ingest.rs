//! Ingest stage
//!
//! Keeps a live decoder running against the upstream URL and feeds the
//! frame mailbox. The outer loop establishes the scaling plan (probing the
//! input geometry unless it was pinned) and respawns the decoder; the
//! inner loop reads exact-size frames with a deadline and tolerates brief
//! hiccups before forcing a restart.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::engine::{self, probe, ChildRegistry, EngineProcess, ReadStatus};
use crate::stream::buffer::{Frame, FrameBuffer};
use crate::stream::RelayStats;
use crate::video::scale::ScalePlan;

/// Consecutive failed reads tolerated before the decoder is restarted.
/// One or two short reads ride through a jittery upstream without tearing
/// down a working session; a third means the session is gone.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

const READ_RETRY_PAUSE: Duration = Duration::from_millis(100);
const RESPAWN_BACKOFF: Duration = Duration::from_secs(1);
const PLAN_RETRY_BACKOFF: Duration = Duration::from_secs(5);

pub(crate) struct IngestStage {
    config: Arc<RelayConfig>,
    buffer: Arc<FrameBuffer>,
    registry: Arc<ChildRegistry>,
    stats: Arc<RelayStats>,
    shutdown: watch::Receiver<bool>,
}

impl IngestStage {
    pub(crate) fn new(
        config: Arc<RelayConfig>,
        buffer: Arc<FrameBuffer>,
        registry: Arc<ChildRegistry>,
        stats: Arc<RelayStats>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            buffer,
            registry,
            stats,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Ingest stage started");

        let mut known_input: Option<(u32, u32)> = None;
        let mut plan: Option<ScalePlan> = None;

        while !*self.shutdown.borrow() {
            // Establish the input geometry. Pinned dimensions bypass
            // probing; otherwise each reconnect re-probes so a source
            // that came back with a different resolution gets a fresh
            // plan.
            let input = match self.config.pinned_input() {
                Some(dims) => Some(dims),
                None => {
                    probe::input_resolution_with_retry(&self.config, &mut self.shutdown).await
                }
            };

            let Some(input) = input else {
                if *self.shutdown.borrow() {
                    break;
                }
                warn!(
                    retry_in = ?PLAN_RETRY_BACKOFF,
                    "Input geometry unavailable, cannot start decoder"
                );
                self.sleep(PLAN_RETRY_BACKOFF).await;
                continue;
            };

            if known_input != Some(input) {
                let derived = ScalePlan::derive(input, (self.config.width, self.config.height));
                info!(
                    input = %format!("{}x{}", input.0, input.1),
                    output = %format!("{}x{}", self.config.width, self.config.height),
                    filter = %derived.filter_expr(self.config.width, self.config.height),
                    "Scaling plan established"
                );
                known_input = Some(input);
                plan = Some(derived);
            }
            let Some(active_plan) = plan else {
                continue;
            };

            let mut decoder =
                match EngineProcess::spawn_decoder(&self.config, &active_plan, &self.registry) {
                    Ok(decoder) => decoder,
                    Err(e) => {
                        error!(error = %e, "Failed to spawn decoder");
                        self.sleep(RESPAWN_BACKOFF).await;
                        continue;
                    }
                };

            self.pump(&mut decoder).await;
            decoder.terminate().await;

            if !*self.shutdown.borrow() {
                self.stats.decoder_restarts.fetch_add(1, Ordering::Relaxed);
                self.sleep(RESPAWN_BACKOFF).await;
            }
        }

        info!("Ingest stage stopped");
    }

    /// Steady-state read loop. Returns when the decoder needs a restart
    /// or shutdown was requested; the caller terminates the process.
    async fn pump(&mut self, decoder: &mut EngineProcess) {
        let mut stdout = match decoder.take_stdout() {
            Ok(stdout) => stdout,
            Err(e) => {
                error!(error = %e, "Decoder spawned without a frame pipe");
                return;
            }
        };

        let read_timeout = self.config.read_timeout;
        let mut buf = vec![0u8; self.config.frame_size()];
        let mut failures = 0u32;

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            let read = {
                let read = engine::read_frame(&mut stdout, &mut buf, read_timeout);
                tokio::pin!(read);
                tokio::select! {
                    _ = self.shutdown.changed() => return,
                    result = &mut read => result,
                }
            };

            match read {
                Ok(ReadStatus::Complete) => {
                    failures = 0;
                    // Copy out of the read buffer: the published frame
                    // must not alias decoder-owned memory.
                    self.buffer.publish(Frame::new(
                        self.config.width,
                        self.config.height,
                        Bytes::copy_from_slice(&buf),
                    ));
                    self.stats.frames_ingested.fetch_add(1, Ordering::Relaxed);
                }
                Ok(ReadStatus::Stalled) => {
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        warn!(failures, "Repeated decoder read failures, restarting decoder");
                        return;
                    }
                    warn!(failures, "Decoder read stalled");
                    self.sleep(READ_RETRY_PAUSE).await;
                }
                Err(e) => {
                    warn!(error = %e, "Decoder stream failed, restarting decoder");
                    return;
                }
            }
        }
    }

    async fn sleep(&mut self, duration: Duration) {
        tokio::select! {
            _ = time::sleep(duration) => {}
            _ = self.shutdown.changed() => {}
        }
    }
}
