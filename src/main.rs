// nllb-sidecar: entry point

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use nllb_sidecar::config::Config;
use nllb_sidecar::loader::EchoModelSource;
use nllb_sidecar::selector::Selector;
use nllb_sidecar::translator::EchoEngineCapabilities;
use nllb_sidecar::{models, server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(bind_address = %config.bind_address, "configuration loaded");

    let state = match server::build_state(config.clone(), Arc::new(EchoModelSource)).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to build application state");
            std::process::exit(1);
        }
    };

    let (monitor_handle, monitor_stop) = state.monitor.clone().spawn();

    if let Err(e) = load_initial_model(&state, &config).await {
        tracing::error!(error = %e, "initial model load failed");
    }

    let app = server::build_router(state);

    match server::serve(&config, app).await {
        Ok(()) => tracing::info!("server shut down cleanly"),
        Err(e) => tracing::error!(error = %e, "server error"),
    }

    nllb_sidecar::monitor::ResourceMonitor::stop(monitor_handle, monitor_stop).await;
}

async fn load_initial_model(
    state: &nllb_sidecar::state::AppState,
    config: &Config,
) -> nllb_sidecar::error::SidecarResult<()> {
    let snap = state.monitor.sample_once();
    let ledger = state.ledger.lock().await;
    let selector = Selector::new(&ledger);

    let gpu_present = snap.vram_total_mb > 0.0;
    let device = selector.resolve_device(config.device_override.as_deref(), gpu_present);
    let compute_type = selector.resolve_compute_type(
        config.compute_type_override.as_deref(),
        device,
        &EchoEngineCapabilities,
    );

    let model_override = config.model_name_override.clone().or_else(|| {
        config
            .params_override
            .as_deref()
            .and_then(models::resolve_params_alias)
            .map(|s| s.to_string())
    });

    if let Some(model_id) = &model_override {
        if selector.forced_selection_is_known_failure(model_id, compute_type.as_str(), device.as_str()) {
            tracing::warn!(
                "{}",
                nllb_sidecar::selector::warning_banner(model_id, compute_type.as_str(), device.as_str())
            );
        }
    }

    let available_mb = match device {
        nllb_sidecar::models::Device::Gpu => snap.vram_free_mb(),
        nllb_sidecar::models::Device::Cpu => snap.ram_available_mb,
    };

    let selection = selector
        .resolve_model(device, compute_type, available_mb, model_override.as_deref())
        .ok_or_else(|| {
            nllb_sidecar::error::SidecarError::InternalError("no model fits available hardware".to_string())
        })?;
    drop(ledger);

    let active = state
        .loader
        .load(state.model_source.as_ref(), &selection, &state.monitor)
        .await?;

    tracing::info!(
        model = %active.model_id,
        precision = %active.compute_type.as_str(),
        device = %active.device.as_str(),
        "model ready"
    );
    *state.active.lock().await = Some(active);

    Ok(())
}
