// nllb-sidecar: HTTP server wiring (spec.md §6)

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::middleware;
use axum::Router;
use tokio::sync::Mutex as AsyncMutex;

use crate::auth;
use crate::benchmark::BenchmarkOrchestrator;
use crate::config::Config;
use crate::error::SidecarResult;
use crate::ledger::FailureLedger;
use crate::loader::{Loader, ModelSource};
use crate::monitor::{MonitorLimits, ResourceMonitor};
use crate::probe::{self, MemoryProbe, NoGpu};
use crate::state::{now_epoch, AppState};
use crate::{handlers, health, tls, version};

/// Builds the shared application state: probes hardware once, loads (or
/// creates fresh) the failure ledger, and spins up the resource monitor.
/// Does not load a model — that's the caller's job, since the model
/// load itself needs the monitor running first to catch load-time
/// pressure (spec.md §5, mirroring the original's `lifespan` ordering).
pub async fn build_state(config: Config, model_source: Arc<dyn ModelSource>) -> SidecarResult<AppState> {
    let cpu_features = probe::detect_cpu_features();
    let mut probe = MemoryProbe::new(Box::new(NoGpu));
    let ram_total_mb = probe.ram_total_mb();
    let gpu_name = probe.gpu_name();
    let vram_total_mb = probe.vram_mb().map(|(_, total)| total).unwrap_or(0.0);

    let hw_fingerprint = crate::ledger::build_hw_fingerprint(gpu_name.as_deref(), vram_total_mb, ram_total_mb);

    let ledger = FailureLedger::load(&config.failure_ledger_path, hw_fingerprint.clone())?;

    let monitor = Arc::new(ResourceMonitor::new(
        MonitorLimits {
            vram_soft_mb: config.vram_soft_mb as f64,
            vram_hard_mb: config.vram_hard_mb as f64,
            ram_soft_mb: config.ram_soft_mb as f64,
            ram_hard_mb: config.ram_hard_mb as f64,
            swap_hard_mb: config.swap_hard_mb as f64,
            normal_interval_s: config.normal_interval_s,
            fast_interval_s: config.fast_interval_s,
            log_interval_s: config.log_interval_s,
        },
        probe,
    ));

    Ok(AppState {
        config: Arc::new(config.clone()),
        monitor,
        ledger: Arc::new(AsyncMutex::new(ledger)),
        loader: Arc::new(Loader::new()),
        model_source,
        active: Arc::new(AsyncMutex::new(None)),
        started_at: now_epoch(),
        version: version::derive_version_at(config.git_commit_date.as_deref()),
        cpu_features,
        hw_fingerprint,
        stepdown_active: Arc::new(AtomicBool::new(false)),
        stepped_down_from: Arc::new(AsyncMutex::new(None)),
        stepped_down_to: Arc::new(AsyncMutex::new(None)),
        degraded: Arc::new(AtomicBool::new(false)),
        benchmark: Arc::new(BenchmarkOrchestrator::new()),
    })
}

pub fn build_router(state: AppState) -> Router {
    let authed = handlers::routes().layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_auth,
    ));

    Router::new()
        .merge(health::routes())
        .merge(authed)
        .with_state(state)
}

/// Generates (or loads, if present on disk) the self-signed cert, logs
/// its fingerprint, then serves `app` over TLS until the process is
/// signalled to stop.
pub async fn serve(config: &Config, app: Router) -> SidecarResult<()> {
    let cert = tls::generate_self_signed_cert()?;
    let fp = tls::fingerprint(&cert.cert_pem);
    tracing::info!(fingerprint = %fp, "generated self-signed TLS certificate");
    tls::write_to_paths(&cert, &config.tls_cert_path, &config.tls_key_path)?;

    let rustls_config = tls::load_rustls_config(&config.tls_cert_path, &config.tls_key_path).await?;

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .map_err(|e| crate::error::SidecarError::ConfigError(format!("invalid bind address: {e}")))?;

    tracing::info!(%addr, "starting nllb-sidecar");
    axum_server::bind_rustls(addr, rustls_config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| crate::error::SidecarError::InternalError(format!("server error: {e}")))
}
