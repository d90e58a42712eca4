//! Automated player: bets, joins the randomness session and plays each round.

use anyhow::{Context, Result};
use clap::Parser;
use fairdeal_client::{
    config::load_private_key, evm::EvmLedger, shutdown, Config, PlayerDriver, ValidatedConfig,
};
use rand::rngs::OsRng;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Automated player for fairdeal rounds")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long)]
    config: String,

    /// Player private key hex (falls back to FAIRDEAL_PRIVATE_KEY)
    #[arg(long)]
    private_key: Option<String>,

    /// Path to a file holding the player private key hex
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

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .and_then(Config::validate)
        .with_context(|| format!("invalid config {}", args.config))?;
    if args.dry_run {
        println!("dry-run report");
        println!("  rpc_url: {}", config.rpc_url);
        println!("  controller: {}", config.controller_address);
        println!(
            "  stakes: bet={} wei, commit={} wei",
            config.bet_stake, config.commit_stake
        );
        println!(
            "  play: max_cut={} hit_probability_bps={}",
            config.max_cut, config.hit_probability_bps
        );
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

    PlayerDriver::new(ledger, identity, config, shutdown, OsRng)
        .run()
        .await
        .context("player failed")
}
