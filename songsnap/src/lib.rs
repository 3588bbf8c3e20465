//! Song recognition for video URLs — a few seconds of audio in, track metadata out.
//!
//! **songsnap** runs the full pipeline: downloading the audio (via yt-dlp, with a
//! fallback chain of extraction strategies), cutting it down to a short canonical
//! PCM clip (via ffmpeg), submitting it to the Shazam detect API, and mapping the
//! answer to a [`TrackResult`].
//!
//! # Quick start
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> songsnap::Result<()> {
//! // API key from SONGSNAP_API_KEY (or API_KEY)
//! let track = songsnap::recognize("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await?;
//! println!("{} — {}", track.artist, track.title);
//!
//! // Or with explicit configuration, reusing one recognizer for many requests
//! let config = songsnap::Config::from_env().cookie_browser("firefox");
//! let recognizer = songsnap::Recognizer::new(config)?;
//! let track = recognizer.recognize("https://www.tiktok.com/@user/video/1").await?;
//! println!("{}", track.text());
//! # Ok(())
//! # }
//! ```
//!
//! Every run works in its own temporary directory, removed on every exit path,
//! so concurrent runs never collide.

pub mod audio;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod payload;
pub(crate) mod process;
pub mod strategy;
pub mod types;

pub use client::RecognitionClient;
pub use config::Config;
pub use error::{Error, Result};
pub use strategy::{ExtractionStrategy, PlayerClient};
pub use tokio_util::sync::CancellationToken;
pub use types::{TrackImages, TrackResult};

use std::sync::Arc;

use tracing::{info, info_span, Instrument};

use crate::cleanup::{TempFileGuard, WorkDir};

/// Recognize the song playing in `url` with configuration from the environment.
pub async fn recognize(url: &str) -> Result<TrackResult> {
    Recognizer::new(Config::from_env())?.recognize(url).await
}

/// The acquisition-and-recognition pipeline.
///
/// Cheap to clone; clones share the read-only configuration and HTTP client,
/// so one recognizer can serve many concurrent requests.
#[derive(Debug, Clone)]
pub struct Recognizer {
    config: Arc<Config>,
    client: RecognitionClient,
}

impl Recognizer {
    /// Validate `config` and build the HTTP client.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = RecognitionClient::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the pipeline for `url`.
    pub async fn recognize(&self, url: &str) -> Result<TrackResult> {
        self.recognize_with_cancel(url, &CancellationToken::new())
            .await
    }

    /// Run the pipeline for `url`, aborting when `cancel` fires.
    ///
    /// Cancellation kills a running yt-dlp/ffmpeg and drops an in-flight
    /// request; the result is then [`Error::Cancelled`]. Temporary files are
    /// removed in every case, including when this future is dropped.
    pub async fn recognize_with_cancel(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<TrackResult> {
        let url = download::validate_url(url)?;
        let work = WorkDir::create(&self.config.resolve_work_dir())?;
        let span = info_span!("invocation", id = %work.id());

        async {
            let result = self.run(url, &work, cancel).await;
            match &result {
                Ok(track) => info!(title = %track.title, artist = %track.artist, "recognized"),
                Err(e) => info!(error = %e, "recognition failed"),
            }
            result
        }
        .instrument(span)
        .await
        // `work` drops here, removing the directory and anything left in it.
    }

    async fn run(&self, url: &str, work: &WorkDir, cancel: &CancellationToken) -> Result<TrackResult> {
        let config = &*self.config;

        let audio = TempFileGuard::new(download::acquire(url, work, config, cancel).await?);
        let pcm = audio::transcode(audio, &work.pcm_path(), config, cancel).await?;

        let payload = payload::encode(pcm.path()).await?;
        // Bytes are in memory; the snippet is no longer needed.
        drop(pcm);

        let body = self.client.recognize(payload, cancel).await?;
        types::map_response(&body, &config.placeholder_image)
    }
}
