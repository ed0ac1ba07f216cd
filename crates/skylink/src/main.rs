use std::time::Duration;

use clap::Parser;
use skylink::prelude::*;
use tracing_subscriber::EnvFilter;

/// Relay pairing a game with its companion controller.
#[derive(Parser, Debug)]
#[command(name = "skylink-relay", version, about)]
struct Args {
    /// Address for HTTP requests and WebSocket upgrades.
    #[arg(long, env = "SKYLINK_BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind: String,

    /// Only upgrades on this path are accepted.
    #[arg(long, env = "SKYLINK_WS_PATH", default_value = "/ws")]
    ws_path: String,

    /// Session lifetime from creation, in seconds.
    #[arg(long, env = "SKYLINK_SESSION_TTL_SECS", default_value_t = 7200)]
    session_ttl_secs: u64,

    /// Live sessions one address may own at once.
    #[arg(long, env = "SKYLINK_MAX_SESSIONS_PER_ORIGIN", default_value_t = 4)]
    max_sessions_per_origin: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let session = SessionConfig {
        ttl: Duration::from_secs(args.session_ttl_secs),
        max_sessions_per_origin: args.max_sessions_per_origin,
        ..SessionConfig::default()
    };

    let server = RelayServer::builder()
        .bind(&args.bind)
        .ws_path(&args.ws_path)
        .session_config(session)
        .build()
        .await?;

    server.run().await?;
    Ok(())
}
