// nllb-sidecar: shared application state

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex as AsyncMutex;

use crate::benchmark::BenchmarkOrchestrator;
use crate::config::Config;
use crate::ledger::FailureLedger;
use crate::loader::{ActiveModel, Loader, ModelSource};
use crate::monitor::ResourceMonitor;
use crate::probe::CpuFeatures;
use crate::version::VersionInfo;

/// Everything shared across axum handlers. Cloned cheaply (every field
/// is an `Arc`); the one place that takes a lock across an await point
/// is the active-model cell, and only briefly to clone the `Arc` out
/// before running inference — never held across a translation call
/// (spec.md §5).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub monitor: Arc<ResourceMonitor>,
    pub ledger: Arc<AsyncMutex<FailureLedger>>,
    pub loader: Arc<Loader>,
    pub model_source: Arc<dyn ModelSource>,
    pub active: Arc<AsyncMutex<Option<ActiveModel>>>,
    pub started_at: f64,
    pub version: VersionInfo,
    pub cpu_features: CpuFeatures,
    pub hw_fingerprint: String,
    pub stepdown_active: Arc<AtomicBool>,
    pub stepped_down_from: Arc<AsyncMutex<Option<String>>>,
    pub stepped_down_to: Arc<AsyncMutex<Option<String>>>,
    /// Set when the stepdown chain is exhausted under pressure and there
    /// is no smaller model left to fall back to (spec.md §2 scenario 3).
    /// While set, `/translate` refuses with a 503 rather than continuing
    /// to serve the model that just triggered CRITICAL pressure.
    pub degraded: Arc<AtomicBool>,
    pub benchmark: Arc<BenchmarkOrchestrator>,
}

impl AppState {
    pub async fn mark_stepped_down(&self, from: String, to: String) {
        self.stepdown_active.store(true, Ordering::SeqCst);
        *self.stepped_down_from.lock().await = Some(from);
        *self.stepped_down_to.lock().await = Some(to);
    }

    pub fn is_stepdown_active(&self) -> bool {
        self.stepdown_active.load(Ordering::SeqCst)
    }

    pub fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::SeqCst);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

pub fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
