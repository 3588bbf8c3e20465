use std::io::ErrorKind;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Maximum number of stderr characters kept in error messages.
const MAX_STDERR_CHARS: usize = 1000;

/// Why an external tool did not produce an [`Output`].
#[derive(Debug)]
pub(crate) enum ToolError {
    /// The binary is not installed / not on PATH.
    NotFound,
    /// The tool ran longer than its budget and was killed.
    TimedOut(Duration),
    /// The caller cancelled; the tool was killed.
    Cancelled,
    Io(std::io::Error),
}

/// Run an external tool to completion, killing it on timeout or cancellation.
///
/// stdin is closed and stdout/stderr are captured. On unix the child leads its
/// own process group, and unless it finishes normally the whole group is
/// killed, including helpers it started (yt-dlp runs ffmpeg, for one). This
/// also happens when the returned future is dropped.
pub(crate) async fn run_tool(
    mut command: Command,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<Output, ToolError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            ToolError::NotFound
        } else {
            ToolError::Io(e)
        }
    })?;
    let mut group = GroupKiller::new(child.id());

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ToolError::Cancelled),
        result = tokio::time::timeout(limit, child.wait_with_output()) => match result {
            Ok(output) => output.map_err(ToolError::Io),
            Err(_) => Err(ToolError::TimedOut(limit)),
        },
    };
    if result.is_ok() {
        group.disarm();
    }
    result
}

/// Kills a child's process group when dropped, unless disarmed.
struct GroupKiller {
    pgid: Option<u32>,
}

impl GroupKiller {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupKiller {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal. `pgid` is the group the child was
    // spawned into, and it stays reserved while the unreaped child or any of
    // its descendants exist.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!(pgid, error = %err, "failed to kill process group");
        }
    } else {
        tracing::debug!(pgid, "killed process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Lossy, trimmed and length-limited stderr for logs and error messages.
pub(crate) fn stderr_excerpt(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .trim()
        .chars()
        .take(MAX_STDERR_CHARS)
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[tokio::test]
    async fn test_run_tool_captures_output() {
        let output = run_tool(
            sh("echo hello; echo oops >&2"),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
        assert_eq!(stderr_excerpt(&output), "oops");
    }

    #[tokio::test]
    async fn test_run_tool_missing_binary() {
        let result = run_tool(
            Command::new("songsnap-definitely-not-installed"),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(ToolError::NotFound)));
    }

    #[tokio::test]
    async fn test_run_tool_timeout() {
        let result = run_tool(
            sh("sleep 10"),
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(ToolError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_run_tool_cancelled() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let result = run_tool(sh("sleep 10"), Duration::from_secs(30), &cancel).await;
        assert!(matches!(result, Err(ToolError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout_kills_background_helpers() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("late.txt");
        let script = format!(
            "(sleep 1; printf late > '{}') & sleep 10",
            marker.display()
        );

        let result = run_tool(sh(&script), Duration::from_millis(200), &CancellationToken::new()).await;
        assert!(matches!(result, Err(ToolError::TimedOut(_))));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "helper outlived its timed-out parent");
    }

    #[tokio::test]
    async fn test_cancel_kills_background_helpers() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("late.txt");
        let script = format!(
            "(sleep 1; printf late > '{}') & sleep 10",
            marker.display()
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = run_tool(sh(&script), Duration::from_secs(30), &cancel).await;
        assert!(matches!(result, Err(ToolError::Cancelled)));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "helper outlived its cancelled parent");
    }

    #[tokio::test]
    async fn test_stderr_excerpt_truncates() {
        let output = run_tool(
            sh("head -c 5000 /dev/zero | tr '\\0' 'e' >&2"),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(stderr_excerpt(&output).len(), MAX_STDERR_CHARS);
    }
}
