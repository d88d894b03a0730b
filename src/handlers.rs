// nllb-sidecar: POST /translate, POST /benchmark, DELETE /benchmark/cache
// (spec.md §6)

use axum::extract::State;
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::benchmark::BenchmarkRequest;
use crate::error::{SidecarError, SidecarResult};
use crate::snapshot::{PressureState, ResourceSnapshot};
use crate::state::AppState;
use crate::stepdown::StepdownController;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/translate", post(translate))
        .route("/benchmark", post(run_benchmark))
        .route("/benchmark/cache", delete(clear_benchmark_cache))
}

#[derive(Deserialize)]
struct TranslateRequest {
    text: String,
    source_lang: String,
    target_lang: String,
}

#[derive(Serialize)]
struct TranslateResponse {
    translation: String,
    /// Per spec.md §9 Open Question 1: this is a per-token average over
    /// the full decode (`generate_ms / output_token_count`), not true
    /// first-token latency. Kept under the `ttft_ms` wire name for
    /// contract compatibility; see `benchmark::SentenceResult` for the
    /// same caveat.
    ttft_ms: f64,
    total_ms: f64,
    throughput_tokens_s: f64,
    warning: Option<serde_json::Value>,
}

async fn translate(
    State(state): State<AppState>,
    Json(req): Json<TranslateRequest>,
) -> SidecarResult<Json<TranslateResponse>> {
    if req.text.trim().is_empty() {
        return Err(SidecarError::ValidationError("text must not be empty".to_string()));
    }

    if state.is_degraded() {
        return Err(SidecarError::ServiceDegraded(
            "stepdown chain exhausted, service temporarily unavailable".to_string(),
        ));
    }

    let (translator, attempted_model) = {
        let guard = state.active.lock().await;
        match guard.as_ref() {
            Some(active) => (active.translator.clone(), active.model_id.clone()),
            None => return Err(SidecarError::ModelNotLoaded),
        }
    };

    let start = std::time::Instant::now();
    let out = translator
        .translate(&req.text, &req.source_lang, &req.target_lang)
        .await?;
    let total_ms = start.elapsed().as_secs_f64() * 1000.0;
    let ttft_ms = out.generate_ms / out.output_token_count.max(1) as f64;
    let throughput_tokens_s = out.output_token_count as f64 / (total_ms / 1000.0).max(1e-9);

    let snap = state.monitor.sample_once();
    let warning = if snap.pressure == PressureState::Critical {
        Some(handle_critical_pressure(&state, snap, attempted_model).await)
    } else {
        None
    };

    Ok(Json(TranslateResponse {
        translation: out.text,
        ttft_ms,
        total_ms,
        throughput_tokens_s,
        warning,
    }))
}

/// Runs the stepdown protocol in response to a CRITICAL pressure event
/// observed after a translation, and builds the warning payload spec.md
/// §2 scenario 2/3 describes. The timeline is relativized to the epoch
/// of the CRITICAL transition itself, not this function's own sampling
/// time, so the triggering event lands at `t_ms:0`.
async fn handle_critical_pressure(
    state: &AppState,
    snap: ResourceSnapshot,
    attempted_model: String,
) -> serde_json::Value {
    let reason = "memory pressure detected during translation".to_string();
    let breached_limits = crate::benchmark::breached_limits(&snap, state);
    let critical_epoch = state.monitor.last_critical_epoch().unwrap_or(snap.t_epoch);
    let timeline = state.monitor.get_timeline_relative(critical_epoch);

    let mut active_guard = state.active.lock().await;
    let active_model = if let Some(current) = active_guard.take() {
        let mut ledger = state.ledger.lock().await;
        let outcome = StepdownController::perform(
            &current,
            &reason,
            snap,
            &state.monitor,
            &mut ledger,
            &state.loader,
            state.model_source.as_ref(),
        )
        .await;
        drop(ledger);

        match outcome {
            Ok(Some((new_active, info))) => {
                let label = new_active.model_id.clone();
                *active_guard = Some(new_active);
                state
                    .mark_stepped_down(info.stepped_down_from, info.stepped_down_to)
                    .await;
                label
            }
            Ok(None) => {
                let label = current.model_id.clone();
                state.mark_degraded();
                *active_guard = Some(current);
                label
            }
            Err(e) => {
                tracing::error!(error = %e, "stepdown reload failed");
                state.mark_degraded();
                let label = current.model_id.clone();
                *active_guard = Some(current);
                label
            }
        }
    } else {
        state.mark_degraded();
        "none".to_string()
    };
    drop(active_guard);

    serde_json::json!({
        "type": "memory_pressure_stepdown",
        "reason": reason,
        "attempted_model": attempted_model,
        "active_model": active_model,
        "breached_limits": breached_limits,
        "snapshot_at_decision": snap,
        "timeline": timeline,
    })
}

async fn run_benchmark(
    State(state): State<AppState>,
    Json(req): Json<BenchmarkRequest>,
) -> SidecarResult<Json<crate::benchmark::BenchmarkResponse>> {
    let hw_fingerprint = state.hw_fingerprint.clone();
    let response = state.benchmark.run(&state, req, hw_fingerprint).await?;
    Ok(Json(response))
}

async fn clear_benchmark_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.benchmark.clear_cache().await;
    Json(serde_json::json!({ "cleared": true, "entries_removed": removed }))
}
