//! External media engine adapter
//!
//! Wraps the ffmpeg binary behind two operations: a decoder child that
//! delivers raw RGB24 frames on stdout, and an encoder child that accepts
//! raw RGB24 frames on stdin and publishes RTSP. Children run in their own
//! process group so teardown can reach any grandchildren the engine forks.

pub mod codec;
pub mod probe;

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time;
use tracing::{debug, warn};

use crate::config::RelayConfig;
use crate::video::scale::ScalePlan;

/// How long a politely signaled child gets before escalation.
const TERM_WAIT: Duration = Duration::from_secs(2);
const KILL_WAIT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn {process}: {source}")]
    Spawn {
        process: &'static str,
        source: std::io::Error,
    },

    #[error("engine pipe missing for {0}")]
    MissingPipe(&'static str),

    #[error("engine closed its frame stream")]
    Eof,

    #[error("engine IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe failed: {0}")]
    Probe(String),
}

/// Outcome of a deadline-bounded frame read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The buffer holds exactly one frame.
    Complete,

    /// The deadline passed before a whole frame arrived. Any partial
    /// bytes are discarded; a short read is never a frame.
    Stalled,
}

/// Process groups of currently live engine children. The shutdown path
/// sweeps whatever is still registered here, which is safe against a
/// stage terminating the same child concurrently: signaling a dead
/// process group is a no-op.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pgids: Mutex<Vec<i32>>,
}

impl ChildRegistry {
    fn register(&self, pgid: i32) {
        self.pgids.lock().push(pgid);
    }

    fn unregister(&self, pgid: i32) {
        self.pgids.lock().retain(|p| *p != pgid);
    }

    pub fn is_empty(&self) -> bool {
        self.pgids.lock().is_empty()
    }

    /// Hard-kills every registered process group. Returns how many were
    /// still registered.
    pub fn kill_remaining(&self) -> usize {
        let pgids: Vec<i32> = self.pgids.lock().drain(..).collect();
        for pgid in &pgids {
            unsafe {
                libc::killpg(*pgid, libc::SIGKILL);
            }
        }
        pgids.len()
    }
}

/// A spawned decoder or encoder child with its stdio pipes.
///
/// Exactly one stage supervises each handle. Termination is idempotent and
/// always releases the process group.
#[derive(Debug)]
pub struct EngineProcess {
    name: &'static str,
    child: Child,
    pgid: Option<i32>,
    registry: Arc<ChildRegistry>,
}

impl EngineProcess {
    /// Spawns the decoder: RTSP over TCP in, raw RGB24 frames at the
    /// output resolution on stdout. The scaling plan is always attached,
    /// so the stdout byte stream is framed at exactly
    /// `width * height * 3` bytes per frame.
    pub fn spawn_decoder(
        config: &RelayConfig,
        plan: &ScalePlan,
        registry: &Arc<ChildRegistry>,
    ) -> Result<Self, EngineError> {
        let filter = plan.filter_expr(config.width, config.height);

        let mut cmd = Command::new(&config.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error"])
            .args(["-rtsp_transport", "tcp"])
            .arg("-i")
            .arg(&config.input_url)
            .arg("-vf")
            .arg(&filter)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        Self::spawn(cmd, "decoder", registry)
    }

    /// Spawns the encoder: raw RGB24 frames on stdin at the declared
    /// geometry and framerate, RTSP over TCP out.
    pub fn spawn_encoder(
        config: &RelayConfig,
        registry: &Arc<ChildRegistry>,
    ) -> Result<Self, EngineError> {
        let mut cmd = Command::new(&config.ffmpeg_path);
        cmd.args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{}x{}", config.width, config.height))
            .arg("-framerate")
            .arg(config.fps.to_string())
            .args(["-i", "pipe:0"])
            .args(codec::encoder_args(config))
            .args(["-f", "rtsp", "-rtsp_transport", "tcp"])
            .arg(&config.output_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        Self::spawn(cmd, "encoder", registry)
    }

    fn spawn(
        mut cmd: Command,
        name: &'static str,
        registry: &Arc<ChildRegistry>,
    ) -> Result<Self, EngineError> {
        cmd.process_group(0).kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|source| EngineError::Spawn { process: name, source })?;

        // With process_group(0) the child leads its own group, so its pid
        // doubles as the pgid.
        let pgid = child.id().map(|pid| pid as i32);
        if let Some(pgid) = pgid {
            registry.register(pgid);
        }

        debug!(process = name, pid = ?child.id(), "Engine process spawned");

        Ok(Self {
            name,
            child,
            pgid,
            registry: Arc::clone(registry),
        })
    }

    /// Takes ownership of the child's stdout (decoder side).
    pub fn take_stdout(&mut self) -> Result<ChildStdout, EngineError> {
        self.child
            .stdout
            .take()
            .ok_or(EngineError::MissingPipe("stdout"))
    }

    /// Takes ownership of the child's stdin (encoder side).
    pub fn take_stdin(&mut self) -> Result<ChildStdin, EngineError> {
        self.child
            .stdin
            .take()
            .ok_or(EngineError::MissingPipe("stdin"))
    }

    /// Returns true if the child has already exited.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)) | Err(_))
    }

    /// Graceful shutdown: SIGTERM and wait up to 2s, then SIGKILL and
    /// wait up to 1s, then SIGKILL the whole process group to reap any
    /// grandchildren. Idempotent; a second call returns immediately.
    pub async fn terminate(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };

        debug!(process = self.name, pgid, "Terminating engine process");

        unsafe {
            libc::kill(pgid, libc::SIGTERM);
        }
        let graceful = time::timeout(TERM_WAIT, self.child.wait()).await.is_ok();

        if !graceful {
            warn!(process = self.name, pgid, "Engine ignored SIGTERM, killing");
            let _ = self.child.start_kill();
            let _ = time::timeout(KILL_WAIT, self.child.wait()).await;
        }

        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
        self.registry.unregister(pgid);
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        // Normal paths call terminate() first; this is the backstop for
        // early returns. kill_on_drop reaps the child itself, the group
        // kill catches grandchildren.
        if let Some(pgid) = self.pgid.take() {
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
            self.registry.unregister(pgid);
        }
    }
}

/// Reads exactly `buf.len()` bytes from the decoder before the deadline.
///
/// Partial reads are reported as [`ReadStatus::Stalled`] and their bytes
/// discarded; EOF and transport errors are fatal to the current decoder
/// session.
pub async fn read_frame(
    stdout: &mut ChildStdout,
    buf: &mut [u8],
    deadline: Duration,
) -> Result<ReadStatus, EngineError> {
    let start = Instant::now();
    let mut filled = 0usize;

    while filled < buf.len() {
        let Some(remaining) = deadline.checked_sub(start.elapsed()) else {
            return Ok(ReadStatus::Stalled);
        };

        match time::timeout(remaining, stdout.read(&mut buf[filled..])).await {
            Ok(Ok(0)) => return Err(EngineError::Eof),
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(EngineError::Io(e)),
            Err(_) => return Ok(ReadStatus::Stalled),
        }
    }

    Ok(ReadStatus::Complete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn registry() -> Arc<ChildRegistry> {
        Arc::new(ChildRegistry::default())
    }

    fn spawn_helper(args: &[&str], registry: &Arc<ChildRegistry>) -> EngineProcess {
        let mut cmd = Command::new(args[0]);
        cmd.args(&args[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        EngineProcess::spawn(cmd, "decoder", registry).expect("spawn test child")
    }

    #[tokio::test]
    async fn terminate_is_idempotent_and_clears_registry() {
        let registry = registry();
        let mut proc = spawn_helper(&["sleep", "30"], &registry);
        assert!(!registry.is_empty());

        proc.terminate().await;
        assert!(registry.is_empty());

        // Second call must be a no-op.
        proc.terminate().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn has_exited_reflects_child_state() {
        let registry = registry();
        let mut done = spawn_helper(&["true"], &registry);
        time::sleep(Duration::from_millis(200)).await;
        assert!(done.has_exited());

        let mut alive = spawn_helper(&["sleep", "30"], &registry);
        assert!(!alive.has_exited());
        alive.terminate().await;
    }

    #[tokio::test]
    async fn kill_remaining_sweeps_registered_groups() {
        let registry = registry();
        let mut proc = spawn_helper(&["sleep", "30"], &registry);
        assert_eq!(registry.kill_remaining(), 1);
        assert!(registry.is_empty());
        // Reap so the test does not leave a zombie behind.
        let _ = proc.child.wait().await;
        proc.pgid = None;
    }

    #[tokio::test]
    async fn read_frame_completes_on_exact_payload() {
        let registry = registry();
        let mut proc = spawn_helper(&["sh", "-c", "head -c 300 /dev/zero"], &registry);
        let mut stdout = proc.take_stdout().unwrap();

        let mut buf = vec![1u8; 300];
        let status = read_frame(&mut stdout, &mut buf, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status, ReadStatus::Complete);
        assert!(buf.iter().all(|&b| b == 0));

        proc.terminate().await;
    }

    #[tokio::test]
    async fn read_frame_reports_stall_on_silent_child() {
        let registry = registry();
        let mut proc = spawn_helper(&["sleep", "30"], &registry);
        let mut stdout = proc.take_stdout().unwrap();

        let mut buf = vec![0u8; 64];
        let status = read_frame(&mut stdout, &mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(status, ReadStatus::Stalled);

        proc.terminate().await;
    }

    #[tokio::test]
    async fn read_frame_reports_short_write_as_stall() {
        let registry = registry();
        let mut proc = spawn_helper(
            &["sh", "-c", "head -c 10 /dev/zero; sleep 30"],
            &registry,
        );
        let mut stdout = proc.take_stdout().unwrap();

        let mut buf = vec![0u8; 64];
        let status = read_frame(&mut stdout, &mut buf, Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(status, ReadStatus::Stalled);

        proc.terminate().await;
    }

    #[tokio::test]
    async fn read_frame_eof_is_fatal() {
        let registry = registry();
        let mut proc = spawn_helper(&["true"], &registry);
        let mut stdout = proc.take_stdout().unwrap();

        let mut buf = vec![0u8; 64];
        let result = read_frame(&mut stdout, &mut buf, Duration::from_secs(5)).await;
        assert_matches!(result, Err(EngineError::Eof));

        proc.terminate().await;
    }
}
