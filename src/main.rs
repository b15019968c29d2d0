//! proxyrank - Entry Point
//!
//! `proxyrank evaluate` scores `proxies.txt` into the quality store.
//! `proxyrank run` drives traffic through the quality-weighted pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxyrank::config::{Config, LogConfig, ProbeMode};
use proxyrank::consumer::{HttpWorkload, ProxyConsumer, RetryPolicy};
use proxyrank::headers::{BrowserHeaders, UserAgentPool};
use proxyrank::proxy::{ConnectValidator, LivePool, ProxyValidator};
use proxyrank::quality::{resolve_local_ip, EvaluationScheduler, HttpProbe, QualityEstimator};
use proxyrank::repository::{proxy_list, ScoreStore};
use proxyrank::services::TrafficRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Evaluate,
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mode = match std::env::args().nth(1).as_deref() {
        None | Some("evaluate") => Mode::Evaluate,
        Some("run") => Mode::Run,
        Some(other) => bail!("unknown mode {:?}, expected `evaluate` or `run`", other),
    };

    // Load configuration
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.log);
    info!("Starting proxyrank ({:?})", mode);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let result = match mode {
        Mode::Evaluate => evaluate(&config, shutdown_rx).await,
        Mode::Run => run_traffic(&config, shutdown_rx).await,
    };

    signal_task.abort();
    if let Err(e) = &result {
        error!("proxyrank failed: {:#}", e);
    }
    info!("proxyrank stopped");
    result
}

/// Score every proxy in the flat list and persist the working ones
async fn evaluate(config: &Config, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let eval = &config.evaluation;

    let list = proxy_list::load(&eval.proxies_file)
        .with_context(|| format!("failed to load {}", eval.proxies_file.display()))?;
    if list.is_empty() {
        warn!("No proxies to evaluate in {}", eval.proxies_file.display());
        return Ok(());
    }
    info!("Loaded {} proxies", list.len());

    let headers = Arc::new(BrowserHeaders::new());
    let probe = HttpProbe::new(eval.probe_target().clone(), eval.probe_timeout(), headers);

    let estimator = match eval.probe_mode {
        ProbeMode::Target => QualityEstimator::new(Arc::new(probe), eval.attempts),
        ProbeMode::Anonymity => {
            // Anonymity cannot be judged without our own address.
            let local_ip = resolve_local_ip(&eval.ip_echo_url, eval.probe_timeout())
                .await
                .context("cannot evaluate anonymity")?;
            QualityEstimator::new(Arc::new(probe.capturing_egress()), eval.attempts)
                .with_local_ip(local_ip)
        }
    };
    info!(
        "Probing {} ({} mode, {} attempts per proxy)",
        eval.probe_target(),
        eval.probe_mode.as_str(),
        estimator.attempts()
    );

    let store = Arc::new(ScoreStore::new(eval.quality_file.clone()));
    let scheduler = EvaluationScheduler::new(Arc::new(estimator), store, eval.workers);

    let summary = scheduler.run(list.endpoints, shutdown).await?;
    if summary.cancelled {
        warn!(
            "Evaluation interrupted after {} proxies, {} saved",
            summary.evaluated(),
            summary.stored
        );
    }
    Ok(())
}

/// Send the configured number of requests through the live pool
async fn run_traffic(config: &Config, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let traffic = &config.traffic;
    let target_url = traffic.target_url()?.clone();

    let pool = Arc::new(LivePool::load(
        &config.evaluation.quality_file,
        &config.evaluation.proxies_file,
    ));
    if pool.is_empty() {
        warn!("No proxies available. Evaluate proxies first.");
        return Ok(());
    }

    let validator: Option<Arc<dyn ProxyValidator>> = if traffic.validate {
        Some(Arc::new(ConnectValidator::new(
            traffic.validate_host.clone(),
            traffic.validate_port,
            Duration::from_secs(traffic.validate_timeout),
        )))
    } else {
        None
    };

    let workload = Arc::new(HttpWorkload::new(
        target_url,
        Duration::from_secs(traffic.request_timeout),
        Arc::new(UserAgentPool::default()),
    ));

    let policy = RetryPolicy {
        max_proxy_attempts: traffic.max_proxy_attempts,
        evict: traffic.evict,
        bad_statuses: traffic.bad_statuses.clone(),
    };

    let consumer = Arc::new(ProxyConsumer::new(pool, validator, workload, policy));
    let runner = TrafficRunner::new(consumer, traffic.requests, traffic.workers);

    let summary = runner.run(shutdown).await;
    if summary.failed > 0 {
        warn!("{} request units failed unexpectedly", summary.failed);
    }
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxyrank={}", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("pretty") {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
