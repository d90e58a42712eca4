//! Offline check of round transcripts written by the dealer.

use anyhow::{bail, Context, Result};
use clap::Parser;
use fairdeal_types::RoundTranscript;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Verify fairdeal round transcripts")]
struct Args {
    /// Transcript files (round-<id>.json)
    #[arg(required = true)]
    transcripts: Vec<PathBuf>,
}

fn audit(path: &Path) -> Result<RoundTranscript> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let transcript: RoundTranscript = serde_json::from_slice(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    transcript
        .audit()
        .with_context(|| format!("round {} failed audit", transcript.round))?;
    Ok(transcript)
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut failed = 0usize;
    for path in &args.transcripts {
        match audit(path) {
            Ok(transcript) => info!(
                round = transcript.round,
                dealt = transcript.dealt.len(),
                remaining = transcript.remaining(),
                "transcript verified"
            ),
            Err(err) => {
                error!(path = %path.display(), "{err:#}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} transcripts failed audit", args.transcripts.len());
    }
    Ok(())
}
