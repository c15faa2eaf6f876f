//! Output stage
//!
//! Emits exactly one frame per tick to the encoder at the configured
//! framerate, regardless of what the upstream is doing. Each tick selects
//! the frame per the presentation policy: a freshly ingested frame if one
//! is pending, otherwise the last good frame (with a staleness overlay
//! once the outage is noticeable), otherwise the generated error frame.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::engine::{ChildRegistry, EngineProcess};
use crate::stream::buffer::FrameBuffer;
use crate::stream::RelayStats;
use crate::video::overlay;

const RESPAWN_BACKOFF: Duration = Duration::from_secs(1);

/// Frozen frames older than this carry the staleness overlay.
const OVERLAY_AFTER: Duration = Duration::from_secs(1);

/// Emissions between progress log lines (10s at 30 fps).
const PROGRESS_LOG_INTERVAL: u64 = 300;

/// What a single output tick presents downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Presentation {
    /// A frame ingested since the previous tick.
    Live,
    /// No fresh frame, but the outage is within the grace period; the
    /// last good frame is re-emitted.
    Frozen(Duration),
    /// Outage beyond the grace period, or no frame ever received.
    Error,
}

impl Presentation {
    /// Derives the tick's presentation from the buffer state.
    pub(crate) fn derive(
        has_fresh: bool,
        age: Option<Duration>,
        stale_timeout: Duration,
    ) -> Self {
        if has_fresh {
            return Presentation::Live;
        }
        match age {
            None => Presentation::Error,
            Some(age) if age > stale_timeout => Presentation::Error,
            Some(age) => Presentation::Frozen(age),
        }
    }
}

pub(crate) struct OutputStage {
    config: Arc<RelayConfig>,
    buffer: Arc<FrameBuffer>,
    registry: Arc<ChildRegistry>,
    stats: Arc<RelayStats>,
    shutdown: watch::Receiver<bool>,
}

impl OutputStage {
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
        info!("Output stage started");

        let error_frame = overlay::error_frame(self.config.width, self.config.height);

        while !*self.shutdown.borrow() {
            let mut encoder = match EngineProcess::spawn_encoder(&self.config, &self.registry) {
                Ok(encoder) => encoder,
                Err(e) => {
                    error!(error = %e, "Failed to spawn encoder");
                    self.sleep(RESPAWN_BACKOFF).await;
                    continue;
                }
            };

            match encoder.take_stdin() {
                Ok(mut stdin) => {
                    self.pump(&mut encoder, &mut stdin, &error_frame).await;
                    drop(stdin);
                }
                Err(e) => error!(error = %e, "Encoder spawned without a frame pipe"),
            }
            encoder.terminate().await;

            if !*self.shutdown.borrow() {
                self.stats.encoder_restarts.fetch_add(1, Ordering::Relaxed);
                self.sleep(RESPAWN_BACKOFF).await;
            }
        }

        info!("Output stage stopped");
    }

    /// Fixed-cadence emission loop. Returns when the encoder needs a
    /// restart or shutdown was requested.
    async fn pump(
        &mut self,
        encoder: &mut EngineProcess,
        stdin: &mut ChildStdin,
        error_frame: &Bytes,
    ) {
        let tick = self.config.frame_interval();
        let mut next_tick = Instant::now();
        let mut emitted = 0u64;

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            tokio::select! {
                _ = time::sleep_until(next_tick) => {}
                _ = self.shutdown.changed() => return,
            }

            let now = Instant::now();
            next_tick += tick;
            if now > next_tick + tick {
                // More than one frame behind: re-anchor instead of
                // bursting duplicates to catch up.
                debug!("Output cadence slipped, re-anchoring tick baseline");
                next_tick = now + tick;
            }

            let payload = self.select_frame(error_frame);

            if let Err(e) = stdin.write_all(&payload).await {
                warn!(error = %e, "Encoder write failed, restarting encoder");
                return;
            }

            self.stats.frames_relayed.fetch_add(1, Ordering::Relaxed);
            emitted += 1;
            if emitted % PROGRESS_LOG_INTERVAL == 0 {
                let snapshot = self.stats.snapshot();
                debug!(
                    relayed = snapshot.frames_relayed,
                    ingested = snapshot.frames_ingested,
                    frozen = snapshot.frozen_frames,
                    errors = snapshot.error_frames,
                    "Relay progress"
                );
            }

            if encoder.has_exited() {
                warn!("Encoder process exited, restarting encoder");
                return;
            }
        }
    }

    /// Applies the presentation policy for one tick.
    fn select_frame(&self, error_frame: &Bytes) -> Bytes {
        let fresh = self.buffer.try_take();
        let state = Presentation::derive(
            fresh.is_some(),
            self.buffer.age(),
            self.config.stale_timeout,
        );

        match (state, fresh) {
            (Presentation::Live, Some(frame)) => frame.data,
            (Presentation::Frozen(age), _) => match self.buffer.last_delivered() {
                Some(last) => {
                    self.stats.frozen_frames.fetch_add(1, Ordering::Relaxed);
                    if age > OVERLAY_AFTER {
                        // Overlay goes on a per-tick copy; the buffered
                        // frame stays pristine.
                        let mut copy = last.data.to_vec();
                        overlay::apply_staleness_overlay(
                            &mut copy,
                            self.config.width,
                            self.config.height,
                            age,
                        );
                        Bytes::from(copy)
                    } else {
                        last.data
                    }
                }
                None => {
                    self.stats.error_frames.fetch_add(1, Ordering::Relaxed);
                    error_frame.clone()
                }
            },
            _ => {
                self.stats.error_frames.fetch_add(1, Ordering::Relaxed);
                error_frame.clone()
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
