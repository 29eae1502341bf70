//! Switchgate Gateway Binary
//!
//! # Usage
//! ```bash
//! switchgate-gateway --backend-endpoint https://cloud.example.com [--port 4449] [--verbose]
//! ```

use anyhow::Context;
use clap::Parser;
use switchgate_gateway::{Gateway, GatewayConfig};
use tracing_subscriber::EnvFilter;

/// Switchgate Gateway - session-authenticated smart plug control
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Base URL of the device cloud
    #[arg(long)]
    backend_endpoint: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "switchgate_gateway={},tower_http={}",
            default_level, default_level
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(args.verbose)
        .init();

    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => GatewayConfig::default(),
    }
    .apply_env()?;

    if let Some(host) = args.host {
        config = config.with_host(host);
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    if let Some(endpoint) = args.backend_endpoint {
        config = config.with_backend_endpoint(endpoint);
    }

    let gateway = Gateway::from_config(config).context("invalid gateway configuration")?;
    print_banner(&gateway.state().config);
    gateway.start().await?;

    Ok(())
}

fn print_banner(config: &GatewayConfig) {
    println!();
    println!("Switchgate Gateway v{}", switchgate_gateway::VERSION);
    println!("   ├─ http://{}:{}", config.host, config.port);
    println!("   └─ backend {}", config.backend.endpoint);
    println!();
    println!("Endpoints");
    println!("   ├─ POST /auth/login");
    println!("   ├─ GET  /auth/check");
    println!("   ├─ POST /auth/logout");
    println!("   ├─ GET  /devices");
    println!("   ├─ POST /devices/:id/toggle");
    println!("   ├─ GET  /health");
    println!("   └─ GET  /status");
    println!();
}
