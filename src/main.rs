use clap::Parser;
use log::{error, info};
use playhost::configuration::config::{Args, Config};
use playhost::controller::Controller;

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    info!("playhost v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let mut config = match args.config_file.as_deref() {
        Some(path) => Config::from_file(path).unwrap_or_else(|e| {
            error!("Unable to import configuration from {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => {
            info!("No configuration file given, using defaults");
            Config::default()
        }
    };
    if let Err(e) = config.apply_args(&args) {
        error!("Invalid command-line override: {}", e);
        std::process::exit(1);
    }

    info!("Configuration imported successfully");

    let mut controller = Controller::new(config).unwrap_or_else(|e| {
        error!("Unable to create a controller instance: {}, exiting...", e);
        std::process::exit(1);
    });

    if let Err(e) = controller.run().await {
        error!("Error occured in the controller process: {}, exiting...", e);
        std::process::exit(1);
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for the shutdown signal: {}", e);
    }

    if let Err(e) = controller.shutdown().await {
        error!("Unclean shutdown: {}", e);
        std::process::exit(1);
    }
}
