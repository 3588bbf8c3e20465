//! Recognize the song in a video and print title and artist.
//!
//! Usage: SONGSNAP_API_KEY=... cargo run --example basic -- <video-url>

#[tokio::main]
async fn main() -> songsnap::Result<()> {
    let url = std::env::args()
        .nth(1)
        .expect("usage: basic <video-url>");

    let track = songsnap::recognize(&url).await?;

    println!("{} — {}", track.artist, track.title);

    Ok(())
}
