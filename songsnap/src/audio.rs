use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cleanup::{remove_file_quietly, TempFileGuard};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::{run_tool, stderr_excerpt, ToolError};

/// Sample rate the recognition service fingerprints at.
pub const SAMPLE_RATE: u32 = 44_100;

/// Mono.
pub const CHANNELS: u32 = 1;

/// Signed 16-bit little-endian.
pub const BYTES_PER_SAMPLE: u32 = 2;

/// Byte length of `duration` of canonical PCM.
pub fn pcm_len(duration: Duration) -> u64 {
    (duration.as_secs_f64() * (SAMPLE_RATE * CHANNELS * BYTES_PER_SAMPLE) as f64) as u64
}

/// Playback length of `bytes` of canonical PCM.
pub fn pcm_duration(bytes: u64) -> Duration {
    Duration::from_secs_f64(bytes as f64 / (SAMPLE_RATE * CHANNELS * BYTES_PER_SAMPLE) as f64)
}

/// Convert the downloaded audio into the canonical PCM snippet at `output`.
///
/// ffmpeg truncates to `config.max_duration`, downmixes to mono, resamples to
/// 44.1 kHz and writes a headerless s16le stream. The input file is owned by
/// this step and removed before returning, whatever the outcome; a partial
/// output is removed on failure.
pub async fn transcode(
    input: TempFileGuard,
    output: &Path,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<TempFileGuard> {
    info!(
        input = %input.path().display(),
        max_secs = config.max_duration.as_secs_f64(),
        "transcoding to raw PCM"
    );

    let result = run_ffmpeg(input.path(), output, config, cancel).await;
    drop(input);

    match result {
        Ok(()) => {
            let guard = TempFileGuard::new(output);
            let len = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
            if len == 0 {
                return Err(Error::Transcode("ffmpeg produced no output".into()));
            }
            debug!(
                bytes = len,
                duration_secs = format!("{:.2}", pcm_duration(len).as_secs_f64()),
                "PCM snippet ready"
            );
            Ok(guard)
        }
        Err(e) => {
            remove_file_quietly(output);
            Err(e)
        }
    }
}

async fn run_ffmpeg(
    input: &Path,
    output: &Path,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut command = Command::new(&config.ffmpeg_bin);
    command
        .args(["-nostdin", "-y", "-hide_banner", "-loglevel", "error", "-i"])
        .arg(input)
        .args([
            "-t",
            &format_seconds(config.max_duration),
            "-f",
            "s16le",
            "-acodec",
            "pcm_s16le",
            "-ac",
            &CHANNELS.to_string(),
            "-ar",
            &SAMPLE_RATE.to_string(),
        ])
        .arg(output);

    let out = run_tool(command, config.transcode_timeout, cancel)
        .await
        .map_err(|e| match e {
            ToolError::NotFound => {
                Error::Transcode("ffmpeg not found — install with: apt install ffmpeg".into())
            }
            ToolError::Cancelled => Error::Cancelled,
            ToolError::TimedOut(limit) => {
                Error::Transcode(format!("ffmpeg timed out after {}s", limit.as_secs()))
            }
            ToolError::Io(e) => Error::Transcode(format!("failed to run ffmpeg: {e}")),
        })?;

    if !out.status.success() {
        return Err(Error::Transcode(format!(
            "ffmpeg failed: {}",
            stderr_excerpt(&out)
        )));
    }

    if !output.is_file() {
        return Err(Error::Transcode(format!(
            "ffmpeg exited successfully but {} is missing",
            output.display()
        )));
    }

    Ok(())
}

/// ffmpeg `-t` value; whole seconds stay integral (`5`, not `5.000`).
fn format_seconds(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.3}", duration.as_secs_f64())
    }
}
