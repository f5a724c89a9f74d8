use clap::Parser;
use topolink_cli::{load_or_default, Cli, Commands};
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

mod commands;

fn main() {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = match load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Loading configuration failed: {:?}", e);
            std::process::exit(2);
        }
    };
    info!("Using store {}", config.store.path.display());

    let (name, result) = match &cli.command {
        Commands::Ingest {
            path,
            workers,
            manifest,
            delete_processed,
        } => (
            "Ingest",
            commands::ingest::handle(
                &config,
                path,
                *workers,
                manifest.clone(),
                *delete_processed,
            ),
        ),
        Commands::Repair {
            feeder,
            max_iterations,
            json,
        } => (
            "Repair",
            commands::repair::handle(&config, feeder, *max_iterations, *json),
        ),
        Commands::Stitch {
            feeder,
            main_device,
            sub_device,
        } => (
            "Stitch",
            commands::stitch::handle(&config, feeder, main_device.clone(), sub_device.clone()),
        ),
        Commands::Graph { command } => ("Graph", commands::graph::handle(&config, command)),
    };

    match result {
        Ok(()) => info!("{name} successful!"),
        Err(e) => {
            error!("{name} failed: {:?}", e);
            std::process::exit(1);
        }
    }
}
