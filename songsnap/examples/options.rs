//! Recognize with a custom strategy order and a shorter clip, cancelling
//! after 30 seconds.
//!
//! Usage: SONGSNAP_API_KEY=... cargo run --example options -- <video-url>

use std::time::Duration;

use songsnap::{CancellationToken, Config, ExtractionStrategy, PlayerClient, Recognizer};

#[tokio::main]
async fn main() -> songsnap::Result<()> {
    let url = std::env::args()
        .nth(1)
        .expect("usage: options <video-url>");

    let config = Config::from_env()
        .max_duration(Duration::from_secs(4))
        .strategies(vec![
            ExtractionStrategy::client(PlayerClient::Ios),
            ExtractionStrategy::browser_cookies("firefox"),
        ]);
    let recognizer = Recognizer::new(config)?;

    let cancel = CancellationToken::new();
    let deadline = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        deadline.cancel();
    });

    let track = recognizer.recognize_with_cancel(&url, &cancel).await?;

    println!("Title:  {}", track.title);
    println!("Artist: {}", track.artist);
    if let Some(album) = &track.album {
        println!("Album:  {album}");
    }
    for image in &track.metapage_images {
        println!("  {image}");
    }

    Ok(())
}
