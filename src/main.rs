// =============================================================================
// Borealis Perp Signals — Main Entry Point
// =============================================================================
//
// Trading in this engine is always simulated: there is no order routing and
// no account access. The loop analyses one symbol on one primary interval,
// drives the simulated position book, and records training samples.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod adapters;
mod api;
mod app_state;
mod cache;
mod daily_guard;
mod engine;
mod errors;
mod events;
mod gates;
mod indicators;
mod market_data;
mod market_state;
mod position;
mod risk_plan;
mod runtime_config;
mod samples;
mod signal;
mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::exchange::BinanceFuturesClient;
use crate::adapters::model::HttpModelClient;
use crate::adapters::sentiment::AlternativeMeClient;
use crate::adapters::{ExchangeAdapter, ModelAdapter, SentimentAdapter};
use crate::app_state::AppState;
use crate::engine::AnalysisEngine;
use crate::runtime_config::EngineConfig;
use crate::samples::{LabelBackfiller, MemorySampleStore, SampleStore};

const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Borealis Perp Signals — Starting Up              ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = EngineConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });

    // Env overrides for the watched market.
    if let Ok(symbol) = std::env::var("BOREALIS_SYMBOL") {
        config.symbol = symbol.trim().to_uppercase();
    }
    if let Ok(interval) = std::env::var("BOREALIS_INTERVAL") {
        config.interval = interval.trim().to_string();
    }

    // ConfigInvalid is fatal at startup only.
    config.validate()?;

    info!(
        symbol = %config.symbol,
        interval = %config.interval,
        analysis_period_secs = config.analysis_period_secs(),
        daily_loss_limit = config.schedule.daily_loss_limit,
        "engine config validated (trading is simulated)"
    );

    // ── 2. Build shared state & adapters ─────────────────────────────────
    let sample_store: Arc<dyn SampleStore> = Arc::new(MemorySampleStore::new());
    sample_store.initialize().await?;

    let model_endpoint = config.model.endpoint.clone();
    let model_timeout = config.model.timeout_ms;
    let state = Arc::new(AppState::new(config, sample_store.clone())?);

    let exchange = Arc::new(BinanceFuturesClient::new());
    let model: Option<Arc<dyn ModelAdapter>> = model_endpoint.map(|endpoint| {
        info!(endpoint = %endpoint, "external forecast model enabled");
        Arc::new(HttpModelClient::new(endpoint, model_timeout)) as Arc<dyn ModelAdapter>
    });
    let sentiment: Option<Arc<dyn SentimentAdapter>> =
        Some(Arc::new(AlternativeMeClient::new()));

    if !exchange.check_connection().await {
        warn!("exchange not reachable at startup — the loop will retry with back-off");
    }

    // ── 3. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr =
        std::env::var("BOREALIS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => {
                info!(addr = %bind_addr, "API server listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "API server failed");
                }
            }
            Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind API server"),
        }
    });

    // ── 4. Label backfiller ──────────────────────────────────────────────
    let backfill_stop = Arc::new(AtomicBool::new(false));
    {
        let poll_secs = state.config.read().schedule.label_poll_secs;
        let backfiller =
            LabelBackfiller::new(sample_store.clone(), exchange.clone(), poll_secs);
        let stop = backfill_stop.clone();
        tokio::spawn(async move {
            backfiller.run(stop).await;
        });
    }

    // ── 5. Analysis loop ─────────────────────────────────────────────────
    let analysis = Arc::new(AnalysisEngine::new(
        state.clone(),
        exchange.clone(),
        model,
        sentiment,
    ));
    let loop_engine = analysis.clone();
    let loop_handle = tokio::spawn(async move {
        loop_engine.run().await;
    });

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    analysis.stop();
    backfill_stop.store(true, Ordering::SeqCst);
    let _ = loop_handle.await;

    if let Err(e) = state.config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save engine config on shutdown");
    }

    info!("Borealis Perp Signals shut down complete.");
    Ok(())
}
