use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::strategy::{self, ExtractionStrategy};

/// RapidAPI host of the Shazam API.
pub const DEFAULT_API_HOST: &str = "shazam.p.rapidapi.com";

/// Clip length sent for recognition. The service answers 413 somewhere
/// above ~5 s of raw PCM.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(5);

/// Longest clip we allow configuring at all.
pub const MIN_ALLOWED_DURATION: Duration = Duration::from_secs(1);
pub const MAX_ALLOWED_DURATION: Duration = Duration::from_secs(8);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STRATEGY_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_TRANSCODE_TIMEOUT: Duration = Duration::from_secs(30);

/// Image reference used when the service sends no artwork.
pub const PLACEHOLDER_IMAGE: &str = "static/img/no-cover.png";

/// Environment variables read by [`Config::apply_env`], highest priority first
/// for the API key.
pub const ENV_API_KEY: &str = "SONGSNAP_API_KEY";
pub const ENV_API_KEY_FALLBACK: &str = "API_KEY";
pub const ENV_API_HOST: &str = "SONGSNAP_API_HOST";
pub const ENV_COOKIE_BROWSER: &str = "SONGSNAP_COOKIE_BROWSER";

/// Pipeline configuration.
///
/// Built once, then shared read-only by every invocation. Everything a run
/// needs (credential, tool paths, budgets, strategy order) lives here instead
/// of being looked up ad hoc.
#[derive(Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_host: String,
    /// Full detect URL. Defaults to `https://{api_host}/songs/v2/detect`.
    pub endpoint: Option<String>,
    pub credential_header: String,
    pub host_header: String,
    pub max_duration: Duration,
    pub request_timeout: Duration,
    pub strategy_timeout: Duration,
    pub transcode_timeout: Duration,
    /// Explicit strategy order. `None` means [`strategy::default_chain`].
    pub strategies: Option<Vec<ExtractionStrategy>>,
    pub cookie_browser: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub ytdlp_bin: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub placeholder_image: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_host: DEFAULT_API_HOST.into(),
            endpoint: None,
            credential_header: "x-rapidapi-key".into(),
            host_header: "x-rapidapi-host".into(),
            max_duration: DEFAULT_MAX_DURATION,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            strategy_timeout: DEFAULT_STRATEGY_TIMEOUT,
            transcode_timeout: DEFAULT_TRANSCODE_TIMEOUT,
            strategies: None,
            cookie_browser: None,
            work_dir: None,
            ytdlp_bin: PathBuf::from("yt-dlp"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            placeholder_image: PLACEHOLDER_IMAGE.into(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_host", &self.api_host)
            .field("endpoint", &self.endpoint)
            .field("max_duration", &self.max_duration)
            .field("request_timeout", &self.request_timeout)
            .field("strategy_timeout", &self.strategy_timeout)
            .field("transcode_timeout", &self.transcode_timeout)
            .field("strategies", &self.strategies)
            .field("cookie_browser", &self.cookie_browser)
            .field("work_dir", &self.work_dir)
            .field("ytdlp_bin", &self.ytdlp_bin)
            .field("ffmpeg_bin", &self.ffmpeg_bin)
            .finish_non_exhaustive()
    }
}

/// On-disk TOML representation. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    api_key: Option<String>,
    api_host: Option<String>,
    endpoint: Option<String>,
    max_duration_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    strategy_timeout_secs: Option<u64>,
    transcode_timeout_secs: Option<u64>,
    strategies: Option<Vec<ExtractionStrategy>>,
    cookie_browser: Option<String>,
    work_dir: Option<PathBuf>,
    ytdlp_bin: Option<PathBuf>,
    ffmpeg_bin: Option<PathBuf>,
    placeholder_image: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, then the config file, then the environment.
    ///
    /// With `path == None` the default location is used if it exists; an
    /// explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_toml_file(&path)?,
                None => Self::default(),
            },
        };
        Ok(config.apply_env(|key| std::env::var(key).ok()))
    }

    /// Defaults plus the environment.
    pub fn from_env() -> Self {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "loaded config file");
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("invalid config: {e}")))?;

        let mut config = Self::default();
        if let Some(v) = file.api_key {
            config.api_key = Some(v);
        }
        if let Some(v) = file.api_host {
            config.api_host = v;
        }
        config.endpoint = file.endpoint;
        if let Some(secs) = file.max_duration_secs {
            config.max_duration = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.strategy_timeout_secs {
            config.strategy_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.transcode_timeout_secs {
            config.transcode_timeout = Duration::from_secs(secs);
        }
        config.strategies = file.strategies;
        config.cookie_browser = file.cookie_browser;
        config.work_dir = file.work_dir;
        if let Some(v) = file.ytdlp_bin {
            config.ytdlp_bin = v;
        }
        if let Some(v) = file.ffmpeg_bin {
            config.ffmpeg_bin = v;
        }
        if let Some(v) = file.placeholder_image {
            config.placeholder_image = v;
        }
        Ok(config)
    }

    /// Override fields from environment variables, looked up through `var`.
    pub fn apply_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(ENV_API_KEY).or_else(|| non_empty(ENV_API_KEY_FALLBACK)) {
            self.api_key = Some(key);
        }
        if let Some(host) = non_empty(ENV_API_HOST) {
            self.api_host = host;
        }
        if let Some(browser) = non_empty(ENV_COOKIE_BROWSER) {
            self.cookie_browser = Some(browser);
        }
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn api_host(mut self, host: impl Into<String>) -> Self {
        self.api_host = host.into();
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = duration;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn strategy_timeout(mut self, timeout: Duration) -> Self {
        self.strategy_timeout = timeout;
        self
    }

    pub fn transcode_timeout(mut self, timeout: Duration) -> Self {
        self.transcode_timeout = timeout;
        self
    }

    pub fn strategies(mut self, strategies: Vec<ExtractionStrategy>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn cookie_browser(mut self, browser: impl Into<String>) -> Self {
        self.cookie_browser = Some(browser.into());
        self
    }

    pub fn work_dir(mut self, dir: PathBuf) -> Self {
        self.work_dir = Some(dir);
        self
    }

    pub fn ytdlp_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.ytdlp_bin = bin.into();
        self
    }

    pub fn ffmpeg_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.ffmpeg_bin = bin.into();
        self
    }

    pub fn placeholder_image(mut self, image: impl Into<String>) -> Self {
        self.placeholder_image = image.into();
        self
    }

    /// Detect endpoint URL.
    pub fn resolve_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}/songs/v2/detect", self.api_host))
    }

    /// Root for per-invocation work dirs, defaulting to the system temp dir.
    pub fn resolve_work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Strategies in the order they will be tried.
    pub fn resolve_strategies(&self) -> Vec<ExtractionStrategy> {
        self.strategies
            .clone()
            .unwrap_or_else(|| strategy::default_chain(self.cookie_browser.as_deref()))
    }

    /// Check the configuration is usable before any request is made.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
            return Err(Error::Config(format!(
                "API key not set — export {ENV_API_KEY} or set api_key in the config file"
            )));
        }
        if !(MIN_ALLOWED_DURATION..=MAX_ALLOWED_DURATION).contains(&self.max_duration) {
            return Err(Error::InvalidInput(format!(
                "max_duration must be between {} and {}s, got {:?}",
                MIN_ALLOWED_DURATION.as_secs(),
                MAX_ALLOWED_DURATION.as_secs(),
                self.max_duration
            )));
        }
        if self.request_timeout.is_zero()
            || self.strategy_timeout.is_zero()
            || self.transcode_timeout.is_zero()
        {
            return Err(Error::InvalidInput("timeouts must be non-zero".into()));
        }
        if self.strategies.as_ref().is_some_and(|s| s.is_empty()) {
            return Err(Error::Config("at least one extraction strategy is required".into()));
        }
        Ok(())
    }
}

/// `~/.config/songsnap/config.toml` (platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("songsnap").join("config.toml"))
}
