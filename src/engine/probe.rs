//! Input resolution probing
//!
//! Runs the engine's probe tool (ffprobe) against the upstream URL to
//! learn the input geometry before the first decode. Upstream cameras are
//! often slow to accept a second RTSP session right after a reconnect, so
//! detection retries a few times before the ingest stage gives up on the
//! current supervision iteration.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time;
use tracing::{info, warn};

use super::EngineError;
use crate::config::RelayConfig;

pub const PROBE_ATTEMPTS: u32 = 5;
pub const PROBE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Bound on a single ffprobe run; a probe that hangs on a dead upstream
/// counts as a failed attempt.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

/// Single probe attempt against the input URL.
pub async fn input_resolution(config: &RelayConfig) -> Result<(u32, u32), EngineError> {
    let mut cmd = Command::new(&config.ffprobe_path);
    cmd.args(["-v", "error"])
        .args(["-rtsp_transport", "tcp"])
        .args(["-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height"])
        .args(["-of", "json"])
        .arg(&config.input_url)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = time::timeout(PROBE_TIMEOUT, cmd.output())
        .await
        .map_err(|_| EngineError::Probe("probe timed out".into()))?
        .map_err(|source| EngineError::Spawn {
            process: "probe",
            source,
        })?;

    if !output.status.success() {
        return Err(EngineError::Probe(format!(
            "probe exited with {}",
            output.status
        )));
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(stdout: &[u8]) -> Result<(u32, u32), EngineError> {
    let doc: ProbeDocument = serde_json::from_slice(stdout)
        .map_err(|e| EngineError::Probe(format!("unparseable probe output: {e}")))?;

    let stream = doc
        .streams
        .first()
        .ok_or_else(|| EngineError::Probe("no video stream reported".into()))?;

    match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h)),
        (w, h) => Err(EngineError::Probe(format!(
            "invalid dimensions reported: {w:?}x{h:?}"
        ))),
    }
}

/// Probes with retries. Returns `None` when every attempt failed or
/// shutdown was requested mid-probe.
pub async fn input_resolution_with_retry(
    config: &RelayConfig,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<(u32, u32)> {
    for attempt in 1..=PROBE_ATTEMPTS {
        if *shutdown.borrow() {
            return None;
        }

        let attempt_result = tokio::select! {
            result = input_resolution(config) => result,
            // Dropping the in-flight probe kills its child.
            _ = shutdown.changed() => return None,
        };

        match attempt_result {
            Ok((width, height)) => {
                info!(
                    resolution = %format!("{}x{}", width, height),
                    "Detected input resolution"
                );
                return Some((width, height));
            }
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts = PROBE_ATTEMPTS,
                    error = %e,
                    "Input resolution probe failed"
                );
            }
        }

        if attempt < PROBE_ATTEMPTS {
            tokio::select! {
                _ = time::sleep(PROBE_RETRY_DELAY) => {}
                _ = shutdown.changed() => return None,
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_ffprobe_json() {
        let json = br#"{"programs": [], "streams": [{"width": 1280, "height": 720}]}"#;
        assert_eq!(parse_probe_output(json).unwrap(), (1280, 720));
    }

    #[test]
    fn rejects_missing_stream() {
        let json = br#"{"streams": []}"#;
        assert_matches!(parse_probe_output(json), Err(EngineError::Probe(_)));
    }

    #[test]
    fn rejects_zero_dimensions() {
        let json = br#"{"streams": [{"width": 0, "height": 720}]}"#;
        assert_matches!(parse_probe_output(json), Err(EngineError::Probe(_)));
    }

    #[test]
    fn rejects_garbage_output() {
        assert_matches!(parse_probe_output(b"not json"), Err(EngineError::Probe(_)));
    }
}
