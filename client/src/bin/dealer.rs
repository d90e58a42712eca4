//! House process: runs the round orchestrator against the deployed contracts.

use anyhow::{Context, Result};
use clap::Parser;
use fairdeal_client::{
    config::load_private_key, evm::EvmLedger, shutdown, Config, RoundOrchestrator,
    ValidatedConfig,
};
use rand::rngs::OsRng;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Dealer for fairdeal rounds")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long)]
    config: String,

    /// House private key hex (falls back to FAIRDEAL_PRIVATE_KEY)
    #[arg(long)]
    private_key: Option<String>,

    /// Path to a file holding the house private key hex
    #[arg(long)]
    private_key_file: Option<String>,

    /// Validate the configuration and exit without connecting
    #[arg(long)]
    dry_run: bool,
}

fn init_logging(config: &ValidatedConfig) {
    let builder = tracing_subscriber::fmt().with_max_level(config.log_level);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_dry_run_report(config: &ValidatedConfig) {
    println!("dry-run report");
    println!("  rpc_url: {}", config.rpc_url);
    println!("  chain_id: {}", config.chain_id);
    println!("  controller: {}", config.controller_address);
    println!(
        "  polling: interval={:?} max_backoff={:?} deadline={:?}",
        config.polling.poll_interval, config.polling.max_backoff, config.polling.phase_deadline
    );
    println!(
        "  chain: length={} cut_tail_offset={}",
        config.chain_length, config.cut_tail_offset
    );
    println!(
        "  stakes: commit={} wei, verify_gas={:?}",
        config.commit_stake, config.verify_gas
    );
    match &config.transcript_dir {
        Some(dir) => println!("  transcripts: {}", dir.display()),
        None => println!("  transcripts: disabled"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .and_then(Config::validate)
        .with_context(|| format!("invalid config {}", args.config))?;
    if args.dry_run {
        print_dry_run_report(&config);
        return Ok(());
    }
    init_logging(&config);
    info!(?config, "configuration loaded");

    let private_key = load_private_key(args.private_key, args.private_key_file)?;
    let ledger = EvmLedger::connect(&config, &private_key).await?;
    drop(private_key);
    let identity = ledger.identity();

    let (signal, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal.trigger();
        }
    });

    RoundOrchestrator::new(ledger, identity, config, shutdown, OsRng)
        .run()
        .await
        .context("orchestrator failed")
}
