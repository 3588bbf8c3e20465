use std::fmt;

use serde::{Deserialize, Serialize};

/// User agent sent by the [`ExtractionStrategy::UserAgent`] fallback.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Client identity yt-dlp presents to YouTube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerClient {
    TvEmbedded,
    Ios,
    Android,
    Web,
}

impl PlayerClient {
    /// Name as yt-dlp's `player_client` extractor argument expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerClient::TvEmbedded => "tv_embedded",
            PlayerClient::Ios => "ios",
            PlayerClient::Android => "android",
            PlayerClient::Web => "web",
        }
    }
}

/// One way of asking the source for audio.
///
/// Strategies are tried in order by the acquirer; the first one that produces
/// a file wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Spoof a specific player client.
    Client { client: PlayerClient },
    /// Reuse the session cookies of a locally installed browser.
    BrowserCookies { browser: String },
    /// Pretend to be a desktop browser via the web client.
    UserAgent { user_agent: String },
}

impl ExtractionStrategy {
    pub fn client(client: PlayerClient) -> Self {
        ExtractionStrategy::Client { client }
    }

    pub fn browser_cookies(browser: impl Into<String>) -> Self {
        ExtractionStrategy::BrowserCookies {
            browser: browser.into(),
        }
    }

    pub fn user_agent(user_agent: impl Into<String>) -> Self {
        ExtractionStrategy::UserAgent {
            user_agent: user_agent.into(),
        }
    }

    /// Strategy-specific yt-dlp arguments.
    pub fn args(&self) -> Vec<String> {
        match self {
            ExtractionStrategy::Client { client } => vec![
                "--extractor-args".into(),
                format!("youtube:player_client={}", client.as_str()),
            ],
            ExtractionStrategy::BrowserCookies { browser } => {
                vec!["--cookies-from-browser".into(), browser.clone()]
            }
            ExtractionStrategy::UserAgent { user_agent } => vec![
                "--extractor-args".into(),
                format!("youtube:player_client={}", PlayerClient::Web.as_str()),
                "--user-agent".into(),
                user_agent.clone(),
            ],
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStrategy::Client { client } => write!(f, "client:{}", client.as_str()),
            ExtractionStrategy::BrowserCookies { browser } => write!(f, "cookies:{browser}"),
            ExtractionStrategy::UserAgent { .. } => write!(f, "user-agent"),
        }
    }
}

/// The fallback chain, most likely to get past bot checks first.
///
/// A cookie strategy is only included when a browser to read cookies from is
/// known, since yt-dlp fails hard when the browser profile is missing.
pub fn default_chain(cookie_browser: Option<&str>) -> Vec<ExtractionStrategy> {
    let mut chain = vec![
        ExtractionStrategy::client(PlayerClient::TvEmbedded),
        ExtractionStrategy::client(PlayerClient::Ios),
        ExtractionStrategy::client(PlayerClient::Android),
    ];
    if let Some(browser) = cookie_browser {
        chain.push(ExtractionStrategy::browser_cookies(browser));
    }
    chain.push(ExtractionStrategy::user_agent(DESKTOP_USER_AGENT));
    chain
}
