use anyhow::{anyhow, Result};
use srpd::config::{Config, SharedConfig};
use srpd::server::udp::{self, SharedSrpServer};
use srpd::server::SrpServer;
use srpd::time::Clock;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let mut first_args = std::env::args().take(2);
    let (program_name, config_file) = (
        first_args.next().unwrap_or("srpd".to_string()),
        first_args.next(),
    );

    let config = config_init(&program_name, config_file)?;
    let clock = Clock::start();

    let mut server = SrpServer::new(&config)?;
    server.set_enabled(true, clock.now());
    let server: SharedSrpServer = Arc::new(RwLock::new(server));

    let (udp_server, _completions) = udp::new(config.dns_bind_addr, server.clone(), clock).await?;
    tracing::info!(
        "SRP listening on UDP {}:{}",
        config.dns_bind_addr,
        server.read().await.port()
    );
    let dns_handle = tokio::spawn(udp_server.run());

    let api_handle = config.api_bind_addr.map(|api_bind_addr| {
        tracing::info!("API listening on {api_bind_addr}");
        tokio::spawn(srpd::api::new(
            config.clone(),
            server.clone(),
            clock,
            api_bind_addr,
        ))
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("quitting from signal");
        },
        Ok(dns_res) = dns_handle => {
            if let Err(err) = dns_res {
                return Err(err.into())
            }
        }
        Ok(api_res) = async {
            match api_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            if let Err(err) = api_res {
                return Err(err.into())
            }
        }
    }

    // Aborts outstanding transactions and withdraws every registration.
    server.write().await.set_enabled(false, clock.now());
    tracing::info!("goodbye");
    Ok(())
}

fn tracing_init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "srpd=info".into()),
        )
        .init();
}

fn config_init(program_name: &str, config_file: Option<String>) -> Result<SharedConfig> {
    match config_file {
        None => Err(anyhow!("usage: {program_name} /path/to/config.json")),
        Some(config_file) => {
            let config = Config::try_from_file(&config_file)?;
            tracing::debug!("loaded config from {config_file}");
            Ok(Arc::new(config))
        }
    }
}
