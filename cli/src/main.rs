use clap::{Parser, Subcommand};
use fleet_cli::config::LogSettings;
use fleet_cli::payout::PayoutCommand;
use fleet_cli::{logging, payout, start, StartArgs};

#[derive(Parser)]
#[command(name = "fleetlb", about = "Load balancer for NAT'd RPC nodes", version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the load balancer
    Start(StartArgs),
    /// Distribute the reward pool once and exit
    Payout(PayoutCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => {
            let config = args.with_file_defaults()?.validate()?;
            logging::init(&config.log)?;
            start::run(config).await
        }
        Commands::Payout(cmd) => {
            logging::init(&LogSettings {
                level: "info".to_string(),
                file: None,
            })?;
            payout::run(cmd).await
        }
    }
}
