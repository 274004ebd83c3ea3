//! `fleetlb payout`: distribute rewards once, right now

use crate::config::{parse_fee, PayoutArgs, DEFAULT_FEE};
use crate::start::{open_repos, payout_engine};
use chrono::Utc;
use clap::Args;
use owo_colors::OwoColorize;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct PayoutCommand {
    /// Directory of the persistent store holding the request records
    #[arg(long, value_name = "DIR")]
    pub data_dir: PathBuf,

    /// Share of the reward pool kept by the load balancer (0 to 1)
    #[arg(long, default_value_t = DEFAULT_FEE)]
    pub fee: f64,

    #[command(flatten)]
    pub payout: PayoutArgs,
}

pub async fn run(cmd: PayoutCommand) -> anyhow::Result<()> {
    let fee = parse_fee(cmd.fee)?;
    let settings = cmd.payout.validate(false)?;
    let repos = open_repos(Some(&cmd.data_dir))?;
    // no anchor here, a first run pays everything recorded so far
    let engine = payout_engine(&repos, &settings, fee)?;

    let report = engine.run_payout(Utc::now()).await?;
    let distribution = &report.distribution;

    if distribution.is_empty() {
        println!("{}", "No successful requests since the last payout".yellow());
        return Ok(());
    }

    println!(
        "{}: {} ({} nodes, lb fee {})",
        "Distributed".yellow().bold(),
        distribution.nodes_total(),
        distribution.shares.len(),
        distribution.lb_fee
    );
    if !distribution.remainder().is_zero() {
        println!(
            "{}: {}",
            "Undistributed remainder".yellow().bold(),
            distribution.remainder()
        );
    }

    match (&report.payout, &report.error) {
        (Some(_), None) => {
            println!("{}", "✓ Payout completed".green());
            Ok(())
        }
        (Some(_), Some(e)) => {
            anyhow::bail!("payout partially completed: {}", e)
        }
        (None, Some(e)) => anyhow::bail!("payout failed: {}", e),
        (None, None) => Ok(()),
    }
}
