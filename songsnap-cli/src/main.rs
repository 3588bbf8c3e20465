use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use songsnap::{CancellationToken, Config, Error, Recognizer, TrackResult};

#[derive(Parser)]
#[command(name = "songsnap", about = "Recognize the song playing in a video URL")]
struct Cli {
    /// Video URL. Prompted for when omitted.
    url: Option<String>,

    /// Output format.
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Write output to file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Config file (default: ~/.config/songsnap/config.toml if present).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Recognition API key.
    #[arg(long, env = "SONGSNAP_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Browser to borrow cookies from when other strategies are blocked
    /// (e.g. "firefox", "chrome").
    #[arg(long)]
    cookies_from_browser: Option<String>,

    /// Directory for temporary files.
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Print the extraction strategies in the order they are tried.
    #[arg(long)]
    list_strategies: bool,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Exit code when the service found no match.
const EXIT_NO_MATCH: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("songsnap=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match build_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.list_strategies {
        println!("{:<4} {}", "#", "STRATEGY");
        println!("{:<4} {}", "-", "--------");
        for (i, strategy) in config.resolve_strategies().iter().enumerate() {
            println!("{:<4} {strategy}", i + 1);
        }
        return ExitCode::SUCCESS;
    }

    let url = match cli.url.clone().or_else(prompt_url) {
        Some(url) if !url.trim().is_empty() => url,
        _ => {
            eprintln!("URL is required.");
            return ExitCode::FAILURE;
        }
    };

    let recognizer = match Recognizer::new(config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
        spinner.set_style(style);
    }
    spinner.set_message("Downloading and recognizing…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let result = recognizer.recognize_with_cancel(&url, &cancel).await;
    spinner.finish_and_clear();

    let track = match result {
        Ok(t) => t,
        Err(Error::NotFound) => {
            eprintln!("No match found.");
            return ExitCode::from(EXIT_NO_MATCH);
        }
        Err(Error::PayloadTooLarge) => {
            eprintln!("Error: the clip was rejected as too large — use a shorter max_duration_secs");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_transient() {
                eprintln!("This looks temporary; try again in a moment.");
            }
            return ExitCode::FAILURE;
        }
    };

    let output_text = match render(&track, &cli.format) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("JSON error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &output_text) {
                eprintln!("Error writing to {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
            eprintln!("Written to {}", path.display());
        }
        None => print!("{output_text}"),
    }
    ExitCode::SUCCESS
}

fn build_config(cli: &Cli) -> songsnap::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(key) = &cli.api_key {
        config = config.api_key(key);
    }
    if let Some(browser) = &cli.cookies_from_browser {
        config = config.cookie_browser(browser);
    }
    if let Some(dir) = &cli.work_dir {
        config = config.work_dir(dir.clone());
    }
    Ok(config)
}

fn prompt_url() -> Option<String> {
    eprint!("Enter video URL: ");
    std::io::stderr().flush().ok()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).ok()?;
    Some(line.trim().to_string())
}

fn render(track: &TrackResult, format: &OutputFormat) -> songsnap::Result<String> {
    match format {
        OutputFormat::Text => Ok(track.text()),
        OutputFormat::Json => Ok(format!("{}\n", track.to_json_pretty()?)),
    }
}
