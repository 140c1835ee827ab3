use clap::Parser;
use tokio::signal::ctrl_c;
use tracing::{error, info};

use myfab::cli::{Cli, Commands};
use myfab::store::StateStore;
use myfab::{logging, Context};
use myfab_config::Config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Configcheck) {
        match Config::load(&cli.config) {
            Ok(_) => println!("{}: ok", cli.config.display()),
            Err(err) => {
                eprintln!("{}", err);
                std::process::exit(1);
            }
        }
        return;
    }

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = logging::setup(&config.logging) {
        eprintln!("{}", err);
        std::process::exit(1);
    }

    if let Err(err) = run(cli.command, config).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Setup => {
            StateStore::from_config(&config.storage)?.setup().await?;
        }
        Commands::Teardown => {
            StateStore::from_config(&config.storage)?.teardown().await?;
        }
        Commands::Run => {
            let ctx = Context::new(config)?;

            // An unreachable state store at startup is fatal.
            drop(ctx.store().connect_with_retry().await?);

            let report = ctx.start().await?;
            if report.skipped > 0 {
                error!(
                    "{} procedure(s) could not be recovered; their checkpoints were left in place",
                    report.skipped
                );
            }

            ctrl_c().await?;
            info!("interrupt received, shutting down");
            ctx.shutdown().await;
        }
        Commands::Configcheck => unreachable!("handled before logging setup"),
    }
    Ok(())
}
