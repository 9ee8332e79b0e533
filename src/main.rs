//! Valuation triage service — binary entrypoint.
//! Loads config and training data, trains the first snapshot and serves the HTTP API.

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use valuation_triage::api::{self, AppState};
use valuation_triage::metrics::{self, Metrics};
use valuation_triage::{bootstrap, EngineConfig, EngineHandle};

/// Compact logs by default; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("valuation_triage=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = EngineConfig::load().context("loading engine config")?;

    // A missing or broken corpus leaves the service up but untrained (503 until /admin/retrain).
    let engine = match bootstrap(&config) {
        Ok(snapshot) => {
            let info = snapshot.info();
            metrics::record_retrain(&info);
            info!(cases = info.cases, labels = info.labels.len(), "initial snapshot ready");
            EngineHandle::with_snapshot(snapshot)
        }
        Err(e) => {
            warn!(error = %e, "starting untrained");
            EngineHandle::new_untrained()
        }
    };

    let addr = config.server.addr.clone();
    let state = AppState::new(engine, config);
    let mut app = api::router(state);
    match Metrics::init() {
        Ok(m) => app = app.merge(m.router()),
        Err(e) => warn!(error = %e, "prometheus recorder not installed"),
    }

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
