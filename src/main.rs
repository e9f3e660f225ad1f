mod config;
mod core;
mod hub;
mod model;
mod registry;
mod status;
mod store;
mod traits;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Handle CLI arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-V" => {
                println!("gendash {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("gendash {}", env!("CARGO_PKG_VERSION"));
                println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
                println!("Usage: gendash [OPTIONS]\n");
                println!("Options:");
                println!("  -c, --config <path>  Configuration file (default: gendash.toml)");
                println!("  -h, --help           Print help");
                println!("  -V, --version        Print version");
                return Ok(());
            }
            _ => {}
        }
    }

    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config" || w[0] == "-c")
        .map(|w| PathBuf::from(&w[1]))
        .unwrap_or_else(|| PathBuf::from("gendash.toml"));

    // A missing config file is fine: defaults mean local-only mode until a
    // database is configured.
    let config = if config_path.exists() {
        config::AppConfig::load(&config_path)?
    } else {
        tracing::info!(
            "No config file at {}; starting with defaults (local-only)",
            config_path.display()
        );
        config::AppConfig::default()
    };

    // Run async
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(crate::core::run(config))
}
