//! Spinroom - realtime wheel-spin rooms
//!
//! `serve` runs the room server, `demo` drives a local room end to end.

use spinroom_app::cli::{self, Command};
use spinroom_app::{demo, serve, AppConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let args = cli::parse();

    let config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins; otherwise --log-level, then the config file
    let level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    tracing::info!("Starting Spinroom");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = runtime.block_on(async {
        match args.command {
            Command::Serve { port, room } => {
                let mut server = config.server.clone();
                if let Some(port) = port {
                    server.port = port;
                }
                serve::run(&server, &room).await
            }
            Command::Demo { spins, seed } => {
                let seed = seed.unwrap_or_else(rand::random);
                demo::run(&config, spins, seed).await
            }
        }
    });

    if let Err(e) = outcome {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
