//! Print a recognition result as text and as JSON.
//!
//! Usage: SONGSNAP_API_KEY=... cargo run --example formats -- <video-url>

#[tokio::main]
async fn main() -> songsnap::Result<()> {
    let url = std::env::args()
        .nth(1)
        .expect("usage: formats <video-url>");

    let track = songsnap::recognize(&url).await?;

    println!("=== Text ===\n{}", track.text());
    println!("=== JSON ===\n{}", track.to_json_pretty()?);

    Ok(())
}
