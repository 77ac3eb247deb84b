//! Prints an image as ASCII art in the terminal and records whether you like it.

use anyhow::{Context, bail};
use clap::Parser;
use skalogram::{
    ledger::VoteLedger,
    models::ImageContentType,
    render::{AsciiRenderer, RenderOptions, Rendering},
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "skalogram-cli", about = "Render an image as ASCII art and vote on it")]
struct Args {
    /// Path to the image you want to print
    #[arg(long)]
    image: PathBuf,

    /// Path to the local vote database
    #[arg(long, env = "SKALOGRAM_DB_PATH", default_value = "./.db.json")]
    db_path: PathBuf,

    /// Output width in characters
    #[arg(long, default_value_t = RenderOptions::TERMINAL.width)]
    width: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let guessed = mime_guess::from_path(&args.image).first_raw().unwrap_or("");
    if ImageContentType::from_mime(guessed).is_none() {
        bail!(
            "{} does not look like a supported image (png, jpeg or gif)",
            args.image.display()
        );
    }

    let ledger = VoteLedger::open(&args.db_path).await?;

    let data = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("reading {}", args.image.display()))?;
    let renderer = AsciiRenderer::new(RenderOptions {
        width: args.width,
        ..RenderOptions::TERMINAL
    });
    let art = tokio::task::spawn_blocking(move || renderer.render(&data)).await??;
    println!("{}", art);

    let image_key = args.image.display().to_string();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Do you like this image ? (Y/N)");
    let total = loop {
        let Some(line) = lines.next_line().await? else {
            bail!("no answer given");
        };
        match line.trim() {
            "Y" | "y" => break ledger.upvote(&image_key).await,
            "N" | "n" => break ledger.downvote(&image_key).await,
            _ => println!("Wrong choice. Do you like this image ? (Y/N)"),
        }
    };

    println!("The image {} counts {} votes !", image_key, total);
    ledger.save().await?;
    tracing::debug!(ledger = %ledger.path().display(), "Ledger saved");
    Ok(())
}
