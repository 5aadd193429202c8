use std::path::Path;
use std::process::exit;

use clap::Parser;
use tokio::net::TcpListener;

use rust_irc::config::Config;
use rust_irc::server::{self, ServerConfig};

/// A small Internet Relay Chat server.
#[derive(Debug, Parser)]
struct Args {
    /// Path to the server's TOML configuration file.
    #[arg(long = "config")]
    config: String,
}

/// The process surface (spec §6) names its one flag `-config <path>`, a
/// single dash, not clap's default `--config`. Rewrite that one token
/// before handing argv to clap rather than teach clap a non-standard
/// long-flag prefix.
fn normalize_single_dash_config(argv: impl Iterator<Item = String>) -> Vec<String> {
    argv.map(|arg| {
        if arg == "-config" {
            "--config".to_string()
        } else {
            arg
        }
    })
    .collect()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse_from(normalize_single_dash_config(std::env::args()));
    if args.config.trim().is_empty() {
        tracing::error!("-config must name a configuration file");
        exit(1);
    }

    let config = match Config::load(Path::new(&args.config)) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "failed to load configuration");
            exit(1);
        }
    };

    let server_config = match ServerConfig::from_config(&config) {
        Ok(server_config) => server_config,
        Err(error) => {
            tracing::error!(%error, "failed to resolve configuration");
            exit(1);
        }
    };

    let addr = format!("{}:{}", config.listen_host(), config.listen_port());
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(error) => {
            tracing::error!(%error, %addr, "failed to bind listener");
            exit(1);
        }
    };

    tracing::info!(%addr, "rust_irc listening");
    server::run(listener, server_config, config.operators.clone()).await;
}
