// nllb-sidecar: benchmark orchestrator (spec.md §4.9)

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, Notify};

use crate::error::{SidecarError, SidecarResult};
use crate::models::{ComputeType, Device, NLLB_SPECS};
use crate::probe::CpuFeatures;
use crate::selector::Selection;
use crate::snapshot::ResourceSnapshot;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkRequest {
    #[serde(default)]
    pub sentences: Vec<String>,
    pub source_lang: String,
    pub target_lang: String,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub precisions: Vec<ComputeType>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentenceResult {
    pub sentence: String,
    pub translation: String,
    pub ttft_ms: f64,
    pub total_ms: f64,
    pub throughput_tokens_s: f64,
}

/// Per spec.md §9 Open Question 1's resolution: the original Python
/// server represents combo status as a loosely-typed string
/// (`"ok"` / `"skipped (reason)"` / `"failed (reason)"`). Here it's a
/// proper sum type instead.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComboStatus {
    Ok {
        load_time_s: f64,
        avg_ttft_ms: f64,
        avg_throughput_tokens_s: f64,
        sentence_results: Vec<SentenceResult>,
    },
    Skipped {
        reason: String,
    },
    Failed {
        reason: String,
        breached_limits: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ComboResult {
    pub device: Device,
    pub model_label: String,
    pub precision: ComputeType,
    #[serde(flatten)]
    pub status: ComboStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct HardwareInfo {
    pub hw_fingerprint: String,
    pub gpu_name: Option<String>,
    pub vram_total_mb: f64,
    pub ram_total_mb: f64,
    pub cpu_features: CpuFeatures,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkResponse {
    pub hardware: HardwareInfo,
    pub combos: Vec<ComboResult>,
    pub matrices: HashMap<String, Vec<Vec<String>>>,
    pub cached: bool,
    pub joined: bool,
    pub started_at: f64,
    pub completed_at: f64,
    pub resources_at_completion: ResourceSnapshot,
}

/// Deterministic cache key: sha256 over the hardware fingerprint and the
/// request's sentences/filters (including device and precision filters,
/// since two requests differing only in those must not collide), sorted
/// so key order doesn't matter.
pub fn cache_key(hw_fingerprint: &str, req: &BenchmarkRequest) -> String {
    let mut sentences = req.sentences.clone();
    sentences.sort();
    let mut models = req.models.clone();
    models.sort();
    let mut devices: Vec<&'static str> = req.devices.iter().map(|d| d.as_str()).collect();
    devices.sort();
    let mut precisions: Vec<&'static str> = req.precisions.iter().map(|p| p.as_str()).collect();
    precisions.sort();
    let blob = serde_json::json!({
        "hw": hw_fingerprint,
        "sentences": sentences,
        "source_lang": req.source_lang,
        "target_lang": req.target_lang,
        "models": models,
        "devices": devices,
        "precisions": precisions,
    });
    let mut hasher = Sha256::new();
    hasher.update(blob.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

struct Inflight {
    key: String,
    done: Arc<Notify>,
    result: Arc<Mutex<Option<BenchmarkResponse>>>,
}

/// Singleton benchmark runner: a second request for the same key joins
/// the in-flight run rather than starting a duplicate sweep; a request
/// for a different key while one is running is rejected with a conflict.
pub struct BenchmarkOrchestrator {
    running: Mutex<Option<Inflight>>,
    cache: Mutex<HashMap<String, BenchmarkResponse>>,
}

impl BenchmarkOrchestrator {
    pub fn new() -> Self {
        Self {
            running: Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn clear_cache(&self) -> usize {
        let mut cache = self.cache.lock().await;
        let n = cache.len();
        cache.clear();
        n
    }

    /// Execute (or join, or serve from cache) a benchmark request.
    pub async fn run(
        &self,
        state: &AppState,
        req: BenchmarkRequest,
        hw_fingerprint: String,
    ) -> SidecarResult<BenchmarkResponse> {
        let key = cache_key(&hw_fingerprint, &req);

        if let Some(hit) = self.cache.lock().await.get(&key) {
            let mut resp = hit.clone();
            resp.cached = true;
            resp.joined = false;
            return Ok(resp);
        }

        let join_wait = {
            let mut running = self.running.lock().await;
            match running.as_ref() {
                Some(inflight) if inflight.key == key => {
                    Some((inflight.done.clone(), inflight.result.clone()))
                }
                Some(_) => return Err(SidecarError::BenchmarkConflict),
                None => {
                    *running = Some(Inflight {
                        key: key.clone(),
                        done: Arc::new(Notify::new()),
                        result: Arc::new(Mutex::new(None)),
                    });
                    None
                }
            }
        };

        if let Some((done, result)) = join_wait {
            done.notified().await;
            let resp = result.lock().await.clone();
            return resp
                .map(|mut r| {
                    r.joined = true;
                    r
                })
                .ok_or_else(|| SidecarError::InternalError("joined benchmark produced no result".into()));
        }

        let response = run_sweep(state, &req, &hw_fingerprint).await;

        let response = match response {
            Ok(mut resp) => {
                resp.cached = false;
                resp.joined = false;
                self.cache.lock().await.insert(key.clone(), resp.clone());
                Ok(resp)
            }
            Err(e) => Err(e),
        };

        let mut running = self.running.lock().await;
        if let Some(inflight) = running.take() {
            if let Ok(resp) = &response {
                *inflight.result.lock().await = Some(resp.clone());
            }
            inflight.done.notify_waiters();
        }

        response
    }
}

impl Default for BenchmarkOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

const VRAM_HEADROOM_MB: f64 = 1500.0;
const RAM_HEADROOM_MB: f64 = 4000.0;

fn check_feasibility(
    spec: &crate::models::ModelSpec,
    precision: ComputeType,
    device: Device,
    snap: &ResourceSnapshot,
) -> Result<(), String> {
    if device == Device::Cpu && !spec.cpu_practical {
        return Err("not practical on cpu".to_string());
    }
    let estimated = crate::models::estimate_mb(spec.params_m, precision);
    let budget = match device {
        Device::Gpu => (snap.vram_total_mb - snap.vram_used_mb - VRAM_HEADROOM_MB).max(0.0),
        Device::Cpu => (snap.ram_available_mb - RAM_HEADROOM_MB).max(0.0),
    };
    if device == Device::Gpu && snap.vram_total_mb <= 0.0 {
        return Err("no gpu available".to_string());
    }
    if estimated > budget {
        return Err(format!("insufficient headroom ({estimated:.0}MB needed)"));
    }
    Ok(())
}

async fn run_sweep(
    state: &AppState,
    req: &BenchmarkRequest,
    hw_fingerprint: &str,
) -> SidecarResult<BenchmarkResponse> {
    let started_at = crate::state::now_epoch();
    let devices = if req.devices.is_empty() {
        vec![Device::Cpu]
    } else {
        req.devices.clone()
    };
    let precisions = if req.precisions.is_empty() {
        crate::models::ALL_COMPUTE_TYPES.to_vec()
    } else {
        req.precisions.clone()
    };
    let sentences = if req.sentences.is_empty() {
        vec!["Hello, world.".to_string()]
    } else {
        req.sentences.clone()
    };

    let mut combos = Vec::new();

    for &device in &devices {
        for spec in NLLB_SPECS {
            if !req.models.is_empty() && !req.models.contains(&spec.label.to_string()) {
                continue;
            }
            for &precision in &precisions {
                let snap = state.monitor.sample_once();

                if state
                    .ledger
                    .lock()
                    .await
                    .is_known_failure(spec.model_id, precision.as_str(), device.as_str())
                {
                    combos.push(ComboResult {
                        device,
                        model_label: spec.label.to_string(),
                        precision,
                        status: ComboStatus::Skipped {
                            reason: "known ledger failure".to_string(),
                        },
                    });
                    continue;
                }

                if let Err(reason) = check_feasibility(spec, precision, device, &snap) {
                    combos.push(ComboResult {
                        device,
                        model_label: spec.label.to_string(),
                        precision,
                        status: ComboStatus::Skipped { reason },
                    });
                    continue;
                }

                let selection = Selection {
                    model_id: spec.model_id.to_string(),
                    compute_type: precision,
                    device,
                    estimated_mb: crate::models::estimate_mb(spec.params_m, precision),
                };

                let load_start = std::time::Instant::now();
                let loaded = state
                    .loader
                    .load(state.model_source.as_ref(), &selection, &state.monitor)
                    .await;
                let load_time_s = load_start.elapsed().as_secs_f64();

                let active = match loaded {
                    Ok(a) => a,
                    Err(e) => {
                        combos.push(ComboResult {
                            device,
                            model_label: spec.label.to_string(),
                            precision,
                            status: ComboStatus::Failed {
                                reason: e.to_string(),
                                breached_limits: Vec::new(),
                            },
                        });
                        continue;
                    }
                };

                // warmup, matching the original server's single "Hello" call
                let warmup = active
                    .translator
                    .translate("Hello", &req.source_lang, &req.target_lang)
                    .await;
                if let Err(e) = warmup {
                    active.translator.unload();
                    state.monitor.clear_pressure();
                    combos.push(ComboResult {
                        device,
                        model_label: spec.label.to_string(),
                        precision,
                        status: ComboStatus::Failed {
                            reason: e.to_string(),
                            breached_limits: Vec::new(),
                        },
                    });
                    continue;
                }

                // pressure is checked once, right after warmup, before the
                // sentence loop -- spec.md §9 Open Question 2's resolution.
                let post_warmup = state.monitor.sample_once();
                if post_warmup.pressure != crate::snapshot::PressureState::Ok {
                    let reason = "pressure detected after warmup".to_string();
                    state
                        .ledger
                        .lock()
                        .await
                        .record_failure(
                            spec.model_id,
                            precision.as_str(),
                            device.as_str(),
                            reason.clone(),
                            Some(post_warmup),
                            post_warmup.t_epoch,
                        )?;
                    active.translator.unload();
                    state.monitor.clear_pressure();
                    combos.push(ComboResult {
                        device,
                        model_label: spec.label.to_string(),
                        precision,
                        status: ComboStatus::Failed {
                            reason,
                            breached_limits: breached_limits(&post_warmup, state),
                        },
                    });
                    continue;
                }

                let mut sentence_results = Vec::new();
                let mut aborted = None;
                for sentence in &sentences {
                    let snap = state.monitor.sample_once();
                    if snap.pressure != crate::snapshot::PressureState::Ok {
                        aborted = Some(snap);
                        break;
                    }
                    let start = std::time::Instant::now();
                    let out = active
                        .translator
                        .translate(sentence, &req.source_lang, &req.target_lang)
                        .await?;
                    let total_ms = start.elapsed().as_secs_f64() * 1000.0;
                    let ttft_ms = out.generate_ms / out.output_token_count.max(1) as f64;
                    let throughput = out.output_token_count as f64 / (total_ms / 1000.0).max(1e-9);
                    sentence_results.push(SentenceResult {
                        sentence: sentence.clone(),
                        translation: out.text,
                        ttft_ms,
                        total_ms,
                        throughput_tokens_s: throughput,
                    });
                }

                active.translator.unload();
                state.monitor.clear_pressure();

                if let Some(snap) = aborted {
                    let reason = "pressure detected mid-sentence".to_string();
                    state
                        .ledger
                        .lock()
                        .await
                        .record_failure(
                            spec.model_id,
                            precision.as_str(),
                            device.as_str(),
                            reason.clone(),
                            Some(snap),
                            snap.t_epoch,
                        )?;
                    combos.push(ComboResult {
                        device,
                        model_label: spec.label.to_string(),
                        precision,
                        status: ComboStatus::Failed {
                            reason,
                            breached_limits: breached_limits(&snap, state),
                        },
                    });
                    continue;
                }

                let n = sentence_results.len().max(1) as f64;
                let avg_ttft_ms = sentence_results.iter().map(|r| r.ttft_ms).sum::<f64>() / n;
                let avg_throughput = sentence_results.iter().map(|r| r.throughput_tokens_s).sum::<f64>() / n;

                combos.push(ComboResult {
                    device,
                    model_label: spec.label.to_string(),
                    precision,
                    status: ComboStatus::Ok {
                        load_time_s,
                        avg_ttft_ms,
                        avg_throughput_tokens_s: avg_throughput,
                        sentence_results,
                    },
                });
            }
        }
    }

    let matrices = build_matrices(&combos);
    let resources_at_completion = state.monitor.sample_once();

    Ok(BenchmarkResponse {
        hardware: HardwareInfo {
            hw_fingerprint: hw_fingerprint.to_string(),
            gpu_name: state.monitor.gpu_name_hint(),
            vram_total_mb: resources_at_completion.vram_total_mb,
            ram_total_mb: resources_at_completion.ram_total_mb,
            cpu_features: state.cpu_features,
        },
        combos,
        matrices,
        cached: false,
        joined: false,
        started_at,
        completed_at: crate::state::now_epoch(),
        resources_at_completion,
    })
}

pub(crate) fn breached_limits(snap: &ResourceSnapshot, state: &AppState) -> Vec<String> {
    let mut out = Vec::new();
    if snap.ram_available_mb < state.config.ram_hard_mb as f64 {
        out.push("ram_hard".to_string());
    }
    if snap.vram_total_mb > 0.0 && snap.vram_free_mb() < state.config.vram_hard_mb as f64 {
        out.push("vram_hard".to_string());
    }
    out
}

/// Builds metric-name -> grid tables: rows are `(device, model_label)`,
/// columns are all compute types, cells are "—" when a combo wasn't run,
/// a truncated failure reason when it failed, or the metric value.
fn build_matrices(combos: &[ComboResult]) -> HashMap<String, Vec<Vec<String>>> {
    let mut rows: Vec<(Device, String)> = Vec::new();
    for c in combos {
        let key = (c.device, c.model_label.clone());
        if !rows.contains(&key) {
            rows.push(key);
        }
    }
    let columns = crate::models::ALL_COMPUTE_TYPES;

    let mut matrices = HashMap::new();
    for metric in ["avg_ttft_ms", "avg_throughput_tokens_s", "load_time_s"] {
        let mut grid = Vec::new();
        for (device, label) in &rows {
            let mut row = Vec::new();
            for &precision in columns {
                let cell = combos
                    .iter()
                    .find(|c| c.device == *device && &c.model_label == label && c.precision == precision)
                    .map(|c| cell_value(c, metric))
                    .unwrap_or_else(|| "\u{2014}".to_string());
                row.push(cell);
            }
            grid.push(row);
        }
        matrices.insert(metric.to_string(), grid);
    }
    matrices
}

fn cell_value(combo: &ComboResult, metric: &str) -> String {
    match &combo.status {
        ComboStatus::Ok {
            load_time_s,
            avg_ttft_ms,
            avg_throughput_tokens_s,
            ..
        } => match metric {
            "avg_ttft_ms" => format!("{avg_ttft_ms:.1}"),
            "avg_throughput_tokens_s" => format!("{avg_throughput_tokens_s:.1}"),
            "load_time_s" => format!("{load_time_s:.1}"),
            _ => "\u{2014}".to_string(),
        },
        ComboStatus::Skipped { reason } => truncate_reason(reason),
        ComboStatus::Failed { reason, .. } => truncate_reason(reason),
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() > 20 {
        format!("{}...", &reason[..20])
    } else {
        reason.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_order_independent() {
        let mut a = BenchmarkRequest {
            sentences: vec!["b".into(), "a".into()],
            source_lang: "eng_Latn".into(),
            target_lang: "fra_Latn".into(),
            devices: vec![],
            models: vec![],
            precisions: vec![],
        };
        let b = BenchmarkRequest {
            sentences: vec!["a".into(), "b".into()],
            ..a.clone()
        };
        a.sentences = vec!["b".into(), "a".into()];
        assert_eq!(cache_key("fp", &a), cache_key("fp", &b));
    }

    #[test]
    fn cache_key_differs_by_hardware() {
        let req = BenchmarkRequest {
            sentences: vec!["a".into()],
            source_lang: "eng_Latn".into(),
            target_lang: "fra_Latn".into(),
            devices: vec![],
            models: vec![],
            precisions: vec![],
        };
        assert_ne!(cache_key("fp-a", &req), cache_key("fp-b", &req));
    }

    #[test]
    fn cache_key_differs_by_precision_and_device_filters() {
        let base = BenchmarkRequest {
            sentences: vec!["a".into()],
            source_lang: "eng_Latn".into(),
            target_lang: "fra_Latn".into(),
            devices: vec![Device::Cpu],
            models: vec![],
            precisions: vec![ComputeType::Int8],
        };
        let different_precision = BenchmarkRequest {
            precisions: vec![ComputeType::Float32],
            ..base.clone()
        };
        let different_device = BenchmarkRequest {
            devices: vec![Device::Gpu],
            ..base.clone()
        };
        assert_ne!(cache_key("fp", &base), cache_key("fp", &different_precision));
        assert_ne!(cache_key("fp", &base), cache_key("fp", &different_device));
    }

    #[test]
    fn truncate_reason_caps_at_twenty_chars() {
        let short = truncate_reason("oom");
        assert_eq!(short, "oom");
        let long = truncate_reason("insufficient headroom on this host");
        assert!(long.ends_with("..."));
        assert_eq!(long.len(), 23);
    }
}
