use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cleanup::WorkDir;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::{run_tool, stderr_excerpt, ToolError};
use crate::strategy::ExtractionStrategy;

/// Budget for the `yt-dlp --version` presence check.
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// Coarse reason a strategy failed, derived from yt-dlp's stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    BotDetection,
    Forbidden,
    RateLimited,
    Unavailable,
    Network,
    TimedOut,
    MissingOutput,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::BotDetection => "bot detection",
            FailureKind::Forbidden => "forbidden",
            FailureKind::RateLimited => "rate limited",
            FailureKind::Unavailable => "video unavailable",
            FailureKind::Network => "network error",
            FailureKind::TimedOut => "timed out",
            FailureKind::MissingOutput => "no output file",
            FailureKind::Other => "extractor error",
        };
        f.write_str(s)
    }
}

/// Classify yt-dlp stderr.
pub fn classify_failure(stderr: &str) -> FailureKind {
    let lower = stderr.to_lowercase();
    if lower.contains("sign in to confirm")
        || lower.contains("not a bot")
        || lower.contains("captcha")
    {
        FailureKind::BotDetection
    } else if lower.contains("http error 429") || lower.contains("too many requests") {
        FailureKind::RateLimited
    } else if lower.contains("http error 403") || lower.contains("forbidden") {
        FailureKind::Forbidden
    } else if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("is not available")
        || lower.contains("unsupported url")
    {
        FailureKind::Unavailable
    } else if lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("name resolution")
        || lower.contains("network is unreachable")
    {
        FailureKind::Network
    } else {
        FailureKind::Other
    }
}

/// Trim the URL and reject empty input. Anything else is left to yt-dlp.
pub fn validate_url(url: &str) -> Result<&str> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        Err(Error::InvalidInput("URL is required".into()))
    } else {
        Ok(trimmed)
    }
}

/// Download the best audio stream of `url` into `work` as WAV.
///
/// Strategies from the config are tried in order, each at most once, each
/// writing under its own file name. Between attempts the work dir is emptied so
/// a failed strategy leaves nothing behind, and on success everything but the
/// extracted audio is removed. Returns the path of that audio file.
///
/// # Security
/// - Arguments are passed via `.arg()` (no shell expansion)
/// - The URL follows `--`, so it can never be read as an option
/// - `--no-exec` prevents yt-dlp from running post-processing commands
/// - The reported file path is validated to be inside the work dir
pub async fn acquire(
    url: &str,
    work: &WorkDir,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    let url = validate_url(url)?;
    let strategies = config.resolve_strategies();
    if strategies.is_empty() {
        return Err(Error::Config("no extraction strategies configured".into()));
    }

    info!(%url, strategies = strategies.len(), "acquiring audio");
    check_ytdlp(&config.ytdlp_bin, cancel).await?;

    let mut last_error = String::new();
    for (attempt, strategy) in strategies.iter().enumerate() {
        if attempt > 0 {
            work.clear()?;
        }
        debug!(%strategy, attempt = attempt + 1, "trying extraction strategy");

        match try_strategy(url, strategy, attempt, work, config, cancel).await {
            Ok(path) => {
                work.retain_only(&path)?;
                info!(%strategy, path = %path.display(), "audio downloaded");
                return Ok(path);
            }
            Err(StrategyError::Fatal(e)) => {
                work.clear()?;
                return Err(e);
            }
            Err(StrategyError::Failed(kind, detail)) => {
                warn!(%strategy, reason = %kind, detail = %detail, "extraction strategy failed");
                last_error = format!("{strategy}: {kind}: {detail}");
            }
        }
    }

    work.clear()?;
    Err(Error::Acquisition {
        attempts: strategies.len(),
        last_error,
    })
}

enum StrategyError {
    /// Stop the whole chain (cancellation, missing binary).
    Fatal(Error),
    /// Move on to the next strategy.
    Failed(FailureKind, String),
}

async fn try_strategy(
    url: &str,
    strategy: &ExtractionStrategy,
    attempt: usize,
    work: &WorkDir,
    config: &Config,
    cancel: &CancellationToken,
) -> std::result::Result<PathBuf, StrategyError> {
    let template = work
        .download_template(attempt)
        .to_str()
        .ok_or_else(|| {
            StrategyError::Fatal(Error::Config(
                "work directory path contains invalid UTF-8".into(),
            ))
        })?
        .to_string();

    let mut command = Command::new(&config.ytdlp_bin);
    command
        .args([
            "--format",
            "bestaudio/best",
            "--extract-audio",
            "--audio-format",
            "wav",
            "--audio-quality",
            "0",
            "--no-playlist",
            "--no-exec",
            "--quiet",
            "--no-warnings",
            "--output",
            &template,
            "--print",
            "after_move:filepath",
        ])
        .args(strategy.args())
        .arg("--")
        .arg(url);

    let output = match run_tool(command, config.strategy_timeout, cancel).await {
        Ok(output) => output,
        Err(ToolError::NotFound) => return Err(StrategyError::Fatal(Error::YtDlpNotFound)),
        Err(ToolError::Cancelled) => return Err(StrategyError::Fatal(Error::Cancelled)),
        Err(ToolError::TimedOut(limit)) => {
            return Err(StrategyError::Failed(
                FailureKind::TimedOut,
                format!("no result after {}s", limit.as_secs()),
            ))
        }
        Err(ToolError::Io(e)) => {
            return Err(StrategyError::Failed(FailureKind::Other, e.to_string()))
        }
    };

    if !output.status.success() {
        let stderr = stderr_excerpt(&output);
        return Err(StrategyError::Failed(classify_failure(&stderr), stderr));
    }

    let printed = String::from_utf8_lossy(&output.stdout)
        .lines()
        .last()
        .unwrap_or_default()
        .trim()
        .to_string();

    let audio_path = if printed.is_empty() {
        work.audio_path(attempt)
    } else {
        let candidate = PathBuf::from(printed);
        if !is_path_in_dir(&candidate, work.path()) {
            warn!(
                path = %candidate.display(),
                expected_dir = %work.path().display(),
                "downloaded file path outside work dir"
            );
            return Err(StrategyError::Failed(
                FailureKind::MissingOutput,
                "reported file is outside the work directory".into(),
            ));
        }
        candidate
    };

    if !audio_path.is_file() {
        return Err(StrategyError::Failed(
            FailureKind::MissingOutput,
            format!("exited successfully but {} is missing", audio_path.display()),
        ));
    }

    Ok(audio_path)
}

async fn check_ytdlp(bin: &Path, cancel: &CancellationToken) -> Result<()> {
    let mut command = Command::new(bin);
    command.arg("--version");
    match run_tool(command, VERSION_CHECK_TIMEOUT, cancel).await {
        Ok(output) => {
            debug!(
                version = %String::from_utf8_lossy(&output.stdout).trim(),
                "yt-dlp available"
            );
            Ok(())
        }
        Err(ToolError::NotFound) => Err(Error::YtDlpNotFound),
        Err(ToolError::Cancelled) => Err(Error::Cancelled),
        Err(e) => {
            debug!(error = ?e, "yt-dlp version check inconclusive");
            Ok(())
        }
    }
}

/// Normalize a path by resolving `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir => {}
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Whether `path` lies inside `dir` (guards against path traversal).
fn is_path_in_dir(path: &Path, dir: &Path) -> bool {
    let canonical_dir = dir.canonicalize().unwrap_or_else(|_| normalize_path(dir));
    let canonical_path = path
        .canonicalize()
        .unwrap_or_else(|_| normalize_path(path));
    canonical_path.starts_with(&canonical_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url_trims() {
        assert_eq!(
            validate_url("  https://youtu.be/abc \n").unwrap(),
            "https://youtu.be/abc"
        );
    }

    #[test]
    fn test_validate_url_rejects_empty() {
        assert!(matches!(validate_url(""), Err(Error::InvalidInput(_))));
        assert!(matches!(validate_url(" \t\n"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validate_url_is_opaque() {
        assert!(validate_url("www.tiktok.com/@user/video/1").is_ok());
    }

    #[test]
    fn test_classify_bot_detection() {
        let stderr = "ERROR: [youtube] abc: Sign in to confirm you're not a bot.";
        assert_eq!(classify_failure(stderr), FailureKind::BotDetection);
    }

    #[test]
    fn test_classify_http_errors() {
        assert_eq!(
            classify_failure("ERROR: unable to download video data: HTTP Error 403: Forbidden"),
            FailureKind::Forbidden
        );
        assert_eq!(
            classify_failure("ERROR: HTTP Error 429: Too Many Requests"),
            FailureKind::RateLimited
        );
    }

    #[test]
    fn test_classify_unavailable() {
        assert_eq!(
            classify_failure("ERROR: [youtube] xyz: Video unavailable"),
            FailureKind::Unavailable
        );
        assert_eq!(
            classify_failure("ERROR: Unsupported URL: https://example.com"),
            FailureKind::Unavailable
        );
    }

    #[test]
    fn test_classify_network() {
        assert_eq!(
            classify_failure("<urlopen error [Errno -3] Temporary failure in name resolution>"),
            FailureKind::Network
        );
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(classify_failure("something odd"), FailureKind::Other);
        assert_eq!(classify_failure(""), FailureKind::Other);
    }

    #[test]
    fn test_path_in_dir_valid() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(is_path_in_dir(&tmp.path().join("a.wav"), tmp.path()));
    }

    #[test]
    fn test_path_in_dir_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("work");
        assert!(!is_path_in_dir(Path::new("/etc/passwd"), &dir));
        assert!(!is_path_in_dir(&dir.join("..").join("..").join("etc"), &dir));
    }

    #[tokio::test]
    async fn test_acquire_rejects_blank_url_before_running_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let work = WorkDir::create(tmp.path()).unwrap();
        // A binary that can't exist: if it were invoked we'd get YtDlpNotFound.
        let config = Config::new().ytdlp_bin("/nonexistent/yt-dlp");
        let err = acquire("   ", &work, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_acquire_missing_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let work = WorkDir::create(tmp.path()).unwrap();
        let config = Config::new().ytdlp_bin("/nonexistent/yt-dlp");
        let err = acquire("https://youtu.be/x", &work, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::YtDlpNotFound));
    }

    #[cfg(unix)]
    mod fake_ytdlp {
        use super::*;
        use crate::strategy::PlayerClient;
        use std::os::unix::fs::PermissionsExt;
        use std::sync::atomic::{AtomicUsize, Ordering};

        /// Write a yt-dlp stand-in. It logs every invocation's arguments to
        /// `calls.log`, leaves a `.part` file behind, and succeeds only when
        /// its arguments contain `succeed_on` (writing the WAV named by
        /// `--output`).
        fn script(dir: &Path, succeed_on: &str, write_output: bool) -> PathBuf {
            let path = dir.join("yt-dlp");
            let log = dir.join("calls.log");
            let write = if write_output {
                r#"file=$(printf '%s' "$out" | sed 's/%(ext)s/wav/'); printf 'RIFF' > "$file"; echo "$file""#
            } else {
                ":"
            };
            let body = format!(
                r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo 2024.12.13; exit 0; fi
echo "$*" >> "{log}"
out=""; ok=0
for arg in "$@"; do
  case "$arg" in *{succeed_on}*) ok=1;; esac
done
while [ $# -gt 0 ]; do
  case "$1" in --output) out="$2"; shift 2;; *) shift;; esac
done
printf 'junk' > "$(printf '%s' "$out" | sed 's/%(ext)s/webm.part/')"
if [ "$ok" = 1 ]; then {write}; exit 0; fi
echo "ERROR: [youtube] x: Sign in to confirm you're not a bot" >&2
exit 1
"#,
                log = log.display(),
            );
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn calls(dir: &Path) -> Vec<String> {
            std::fs::read_to_string(dir.join("calls.log"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        fn scratch() -> (tempfile::TempDir, PathBuf) {
            let tmp = tempfile::tempdir().unwrap();
            let bin_dir = tmp
                .path()
                .join(format!("bin{}", COUNTER.fetch_add(1, Ordering::Relaxed)));
            std::fs::create_dir_all(&bin_dir).unwrap();
            (tmp, bin_dir)
        }

        #[tokio::test]
        async fn test_first_successful_strategy_wins() {
            let (tmp, bin_dir) = scratch();
            let work = WorkDir::create(tmp.path()).unwrap();
            let config = Config::new().ytdlp_bin(script(&bin_dir, "player_client=ios", true));

            let path = acquire("https://youtu.be/x", &work, &config, &CancellationToken::new())
                .await
                .unwrap();

            assert_eq!(path, work.audio_path(1));
            assert!(path.is_file());
            let calls = calls(&bin_dir);
            assert_eq!(calls.len(), 2, "tv_embedded fails, ios succeeds: {calls:?}");
            assert!(calls[0].contains("player_client=tv_embedded"));
            assert!(calls[1].contains("player_client=ios"));
            // URL comes after the option terminator.
            assert!(calls[1].ends_with("-- https://youtu.be/x"));
        }

        #[tokio::test]
        async fn test_each_strategy_tried_once_then_acquisition_error() {
            let (tmp, bin_dir) = scratch();
            let work = WorkDir::create(tmp.path()).unwrap();
            let config = Config::new().ytdlp_bin(script(&bin_dir, "never-matches", true));

            let err = acquire("https://youtu.be/x", &work, &config, &CancellationToken::new())
                .await
                .unwrap_err();

            let Error::Acquisition { attempts, last_error } = err else {
                panic!("expected acquisition error, got {err:?}");
            };
            assert_eq!(attempts, 4);
            assert!(last_error.contains("bot detection"));
            assert_eq!(calls(&bin_dir).len(), 4);
            assert!(work.files().is_empty(), "leftovers: {:?}", work.files());
        }

        #[tokio::test]
        async fn test_success_without_output_is_strategy_failure() {
            let (tmp, bin_dir) = scratch();
            let work = WorkDir::create(tmp.path()).unwrap();
            let config = Config::new()
                .ytdlp_bin(script(&bin_dir, "youtube", false))
                .strategies(vec![
                    ExtractionStrategy::client(PlayerClient::Android),
                    ExtractionStrategy::client(PlayerClient::Web),
                ]);

            let err = acquire("https://youtu.be/x", &work, &config, &CancellationToken::new())
                .await
                .unwrap_err();

            let Error::Acquisition { attempts, last_error } = err else {
                panic!("expected acquisition error, got {err:?}");
            };
            assert_eq!(attempts, 2);
            assert!(last_error.contains("no output file"));
            assert!(work.files().is_empty());
        }

        #[tokio::test]
        async fn test_partial_files_cleared_between_strategies() {
            let (tmp, bin_dir) = scratch();
            let work = WorkDir::create(tmp.path()).unwrap();
            let config = Config::new().ytdlp_bin(script(&bin_dir, "player_client=android", true));

            acquire("https://youtu.be/x", &work, &config, &CancellationToken::new())
                .await
                .unwrap();

            // Neither the failed attempts' leftovers nor the winner's .part remain.
            let names: Vec<String> = work
                .files()
                .iter()
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect();
            let id = work.id();
            assert_eq!(names, vec![format!("{id}-2.wav")]);
        }

        #[tokio::test]
        async fn test_timed_out_strategy_cannot_touch_winning_file() {
            let (tmp, bin_dir) = scratch();
            let work = WorkDir::create(tmp.path()).unwrap();
            // tv_embedded forks a late writer and hangs; ios succeeds at once.
            let path = bin_dir.join("yt-dlp");
            std::fs::write(
                &path,
                r#"#!/bin/sh
if [ "$1" = "--version" ]; then echo 2024.12.13; exit 0; fi
hang=0; out=""
for arg in "$@"; do
  case "$arg" in *player_client=tv_embedded*) hang=1;; esac
done
while [ $# -gt 0 ]; do
  case "$1" in --output) out="$2"; shift 2;; *) shift;; esac
done
file=$(printf '%s' "$out" | sed 's/%(ext)s/wav/')
dir=$(dirname "$file")
if [ "$hang" = 1 ]; then
  (sleep 1; printf STALE > "$file"; for f in "$dir"/*.wav; do printf STALE > "$f"; done) &
  sleep 30
fi
printf 'RIFF' > "$file"; echo "$file"
"#,
            )
            .unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            let config = Config::new()
                .ytdlp_bin(&path)
                .strategy_timeout(Duration::from_millis(200))
                .strategies(vec![
                    ExtractionStrategy::client(PlayerClient::TvEmbedded),
                    ExtractionStrategy::client(PlayerClient::Ios),
                ]);

            let audio = acquire("https://youtu.be/x", &work, &config, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(audio, work.audio_path(1));
            assert_eq!(std::fs::read(&audio).unwrap(), b"RIFF");

            tokio::time::sleep(Duration::from_millis(1500)).await;
            assert_eq!(std::fs::read(&audio).unwrap(), b"RIFF");
            assert_eq!(work.files(), vec![audio]);
        }

        #[tokio::test]
        async fn test_cookie_strategy_passes_browser() {
            let (tmp, bin_dir) = scratch();
            let work = WorkDir::create(tmp.path()).unwrap();
            let config = Config::new()
                .ytdlp_bin(script(&bin_dir, "--cookies-from-browser", true))
                .cookie_browser("firefox");

            acquire("https://youtu.be/x", &work, &config, &CancellationToken::new())
                .await
                .unwrap();

            let calls = calls(&bin_dir);
            assert_eq!(calls.len(), 4);
            assert!(calls[3].contains("--cookies-from-browser firefox"));
        }
    }
}
