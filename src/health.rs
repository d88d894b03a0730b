// nllb-sidecar: GET /health (spec.md §6)
//
// Two response tiers: unauthenticated requests get a minimal liveness
// payload, authenticated requests get full resource/model detail.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::auth;
use crate::loader::LoadPhase;
use crate::state::{now_epoch, AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Serialize)]
struct BasicHealth {
    status: &'static str,
    version: &'static str,
    version_at: String,
    version_source: &'static str,
    started_at: f64,
    phase: &'static str,
    backend: &'static str,
}

#[derive(Serialize)]
struct ResourcesView {
    vram_used_mb: f64,
    vram_total_mb: f64,
    vram_pct: f64,
    ram_rss_mb: f64,
    ram_available_mb: f64,
    ram_total_mb: f64,
    swap_used_mb: f64,
    pressure: crate::snapshot::PressureState,
    stepdown_active: bool,
    load_progress: Option<crate::snapshot::LoadProgress>,
}

#[derive(Serialize)]
struct FullHealth {
    #[serde(flatten)]
    basic: BasicHealth,
    model: Option<String>,
    device: Option<&'static str>,
    precision: Option<&'static str>,
    cpu_features: crate::probe::CpuFeatures,
    gpu: Option<String>,
    elapsed_s: f64,
    resources: ResourcesView,
    cached_pressure_failures: usize,
}

async fn health(State(state): State<AppState>, headers: HeaderMap) -> Json<serde_json::Value> {
    let loader_phase = state.loader.phase();
    let phase = loader_phase.as_str();
    let backend = "nllb-ct2"; // engine identity; the engine itself is out of scope
    let status = if loader_phase == LoadPhase::Ready { "ok" } else { "loading" };

    let basic = BasicHealth {
        status,
        version: state.version.version,
        version_at: state.version.version_at.clone(),
        version_source: state.version.version_source,
        started_at: state.started_at,
        phase,
        backend,
    };

    if !auth::is_authenticated(&headers, state.config.api_key.as_deref()) {
        return Json(serde_json::to_value(basic).unwrap());
    }

    let snap = state.monitor.sample_once();
    let active = state.active.lock().await;
    let model = active.as_ref().map(|a| a.model_id.clone());
    let device = active.as_ref().map(|a| a.device.as_str());
    let precision = active.as_ref().map(|a| a.compute_type.as_str());
    drop(active);

    let resources = ResourcesView {
        vram_used_mb: snap.vram_used_mb,
        vram_total_mb: snap.vram_total_mb,
        vram_pct: snap.vram_pct(),
        ram_rss_mb: snap.ram_rss_mb,
        ram_available_mb: snap.ram_available_mb,
        ram_total_mb: snap.ram_total_mb,
        swap_used_mb: snap.swap_used_mb,
        pressure: snap.pressure,
        stepdown_active: state.is_stepdown_active(),
        load_progress: state.monitor.get_load_progress(&snap),
    };

    let cached_pressure_failures = state.ledger.lock().await.known_failure_count();

    let full = FullHealth {
        basic,
        model,
        device,
        precision,
        cpu_features: state.cpu_features,
        gpu: state.monitor.gpu_name_hint(),
        elapsed_s: now_epoch() - state.started_at,
        resources,
        cached_pressure_failures,
    };

    Json(serde_json::to_value(full).unwrap())
}
