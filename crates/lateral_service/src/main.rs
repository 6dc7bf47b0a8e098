mod api;
mod metrics;

use crate::api::AppState;
use crate::metrics::Metrics;
use anyhow::Context;
use lateral_core::{Assembler, AssemblerConfig, DisabledGeocoder};
use std::{net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone)]
struct Config {
    listen_addr: SocketAddr,
    metrics_listen_addr: SocketAddr,
    max_body_bytes: usize,
    assembler: AssemblerConfig,
}

/// Reads `key` through `lookup`, falling back to `default` when unset.
fn var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .parse()
        .with_context(|| format!("Failed to parse {key}"))
}

impl Config {
    fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = AssemblerConfig::default();
        let mut swap = defaults.swap_thresholds;
        swap.split_deg = var(&lookup, "LATERAL_SWAP_SPLIT_DEG", &swap.split_deg.to_string())?;
        swap.ratio = var(&lookup, "LATERAL_SWAP_RATIO", &swap.ratio.to_string())?;
        swap.small_first_deg =
            var(&lookup, "LATERAL_SWAP_SMALL_FIRST_DEG", &swap.small_first_deg.to_string())?;

        let geocode_concurrency: usize = var(&lookup, "LATERAL_GEOCODE_CONCURRENCY", "8")?;
        if geocode_concurrency == 0 {
            anyhow::bail!("LATERAL_GEOCODE_CONCURRENCY must be at least 1");
        }

        Ok(Self {
            listen_addr: var(&lookup, "LATERAL_LISTEN_ADDR", "0.0.0.0:8080")?,
            metrics_listen_addr: var(&lookup, "LATERAL_METRICS_LISTEN_ADDR", "0.0.0.0:9091")?,
            max_body_bytes: var(&lookup, "LATERAL_MAX_BODY_BYTES", "67108864")?,
            assembler: AssemblerConfig {
                stub_length_m: var(&lookup, "LATERAL_STUB_LENGTH_M", &defaults.stub_length_m.to_string())?,
                lateral_offset_m: var(
                    &lookup,
                    "LATERAL_OFFSET_M",
                    &defaults.lateral_offset_m.to_string(),
                )?,
                geocode_timeout: Duration::from_millis(var(
                    &lookup,
                    "LATERAL_GEOCODE_TIMEOUT_MS",
                    &defaults.geocode_timeout.as_millis().to_string(),
                )?),
                geocode_concurrency,
                cache_decimals: var(
                    &lookup,
                    "LATERAL_GEOCODE_CACHE_DECIMALS",
                    &defaults.cache_decimals.to_string(),
                )?,
                swap_thresholds: swap,
                ..defaults
            },
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = Config::from_env()?;
    tracing::info!(config = ?config, "Loaded configuration");

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    // One assembler for the process lifetime: it owns the geocode cache.
    // Addresses resolve to the "Address not found" placeholder; the service
    // ships without a network geocoder.
    let assembler = Arc::new(Assembler::new(config.assembler.clone(), Arc::new(DisabledGeocoder)));

    let state = AppState {
        assembler,
        metrics: metrics.clone(),
    };

    let api_handle = {
        let router = api::router(state, config.max_body_bytes);
        let addr = config.listen_addr;
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {addr}"))?;
            tracing::info!(%addr, "API listening");
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("API server failed")
        })
    };

    let metrics_handle = {
        let router = metrics.router();
        let addr = config.metrics_listen_addr;
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {addr}"))?;
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Metrics server failed")
        })
    };

    let (api_res, metrics_res) = tokio::join!(api_handle, metrics_handle);

    for (name, res) in [("API", api_res), ("Metrics", metrics_res)] {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %format!("{e:#}"), "{name} server task failed."),
            Err(e) => tracing::error!(error = %e, "{name} server task panicked."),
        }
    }

    tracing::info!("Lateral service shut down gracefully.");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
