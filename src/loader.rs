// nllb-sidecar: model load/unload pipeline (spec.md §4.6, §4.6a)

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::SidecarResult;
use crate::models::{ComputeType, Device};
use crate::monitor::ResourceMonitor;
use crate::selector::Selection;
use crate::snapshot::LoadContext;
use crate::translator::{Tokenizer, Translator};

/// Where a load currently stands. Surfaced in `/health`'s `phase` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadPhase {
    Idle = 0,
    PreparingArtifacts = 1,
    ConstructingEngine = 2,
    Ready = 3,
}

impl LoadPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => LoadPhase::PreparingArtifacts,
            2 => LoadPhase::ConstructingEngine,
            3 => LoadPhase::Ready,
            _ => LoadPhase::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadPhase::Idle => "idle",
            LoadPhase::PreparingArtifacts => "preparing_artifacts",
            LoadPhase::ConstructingEngine => "constructing_engine",
            LoadPhase::Ready => "ready",
        }
    }
}

/// A currently-loaded model plus its identifying metadata.
pub struct ActiveModel {
    pub translator: Arc<dyn Translator>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub model_id: String,
    pub compute_type: ComputeType,
    pub device: Device,
}

/// Supplies translator/tokenizer instances for a given selection. The
/// real CTranslate2/NLLB download-convert-load pipeline is out of scope
/// and lives behind this trait; `EchoModelSource` is the in-crate
/// reference implementation.
#[async_trait]
pub trait ModelSource: Send + Sync {
    async fn load(
        &self,
        model_id: &str,
        compute_type: ComputeType,
        device: Device,
    ) -> SidecarResult<(Arc<dyn Translator>, Arc<dyn Tokenizer>)>;
}

pub struct EchoModelSource;

#[async_trait]
impl ModelSource for EchoModelSource {
    async fn load(
        &self,
        _model_id: &str,
        _compute_type: ComputeType,
        _device: Device,
    ) -> SidecarResult<(Arc<dyn Translator>, Arc<dyn Tokenizer>)> {
        Ok((
            Arc::new(crate::translator::EchoTranslator),
            Arc::new(crate::translator::EchoTokenizer),
        ))
    }
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Drives the load/unload sequence, registering a `LoadContext` with the
/// resource monitor around the slow parts so pressure prediction covers
/// the load itself, not just steady-state serving.
pub struct Loader {
    phase: AtomicU8,
}

impl Loader {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(LoadPhase::Idle as u8),
        }
    }

    pub fn phase(&self) -> LoadPhase {
        LoadPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn set_phase(&self, phase: LoadPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Load `selection` via `source`, registering load-context tracking
    /// on `monitor` for the duration and running a startup progress
    /// heartbeat (spec.md §4.6a) while waiting on the slow phases.
    pub async fn load(
        &self,
        source: &dyn ModelSource,
        selection: &Selection,
        monitor: &ResourceMonitor,
    ) -> SidecarResult<ActiveModel> {
        let snap = monitor.sample_once();
        monitor.set_load_context(LoadContext {
            model_id: selection.model_id.clone(),
            precision: selection.compute_type.as_str().to_string(),
            device: selection.device.as_str().to_string(),
            estimated_total_mb: selection.estimated_mb,
            vram_baseline_mb: snap.vram_used_mb,
            ram_baseline_mb: snap.ram_available_mb,
            started_at: now_epoch(),
        });

        self.set_phase(LoadPhase::PreparingArtifacts);
        let (ticker_stop, ticker_handle) = spawn_progress_ticker("preparing_artifacts", Duration::from_secs(10));

        self.set_phase(LoadPhase::ConstructingEngine);
        let result = source
            .load(&selection.model_id, selection.compute_type, selection.device)
            .await;

        let _ = ticker_stop.send(true);
        let _ = ticker_handle.await;

        monitor.clear_load_context();

        let (translator, tokenizer) = result?;
        self.set_phase(LoadPhase::Ready);

        Ok(ActiveModel {
            translator,
            tokenizer,
            model_id: selection.model_id.clone(),
            compute_type: selection.compute_type,
            device: selection.device,
        })
    }

    /// Unload the active model, releasing engine resources. Logs
    /// before/after memory so operators can see whether the engine
    /// actually freed what it claims to.
    pub fn unload(&self, active: &ActiveModel, monitor: &ResourceMonitor) {
        let before = monitor.sample_once();
        active.translator.unload();
        let after = monitor.sample_once();
        let freed_vram = (before.vram_used_mb - after.vram_used_mb).max(0.0);
        tracing::info!(
            freed_vram_mb = freed_vram,
            rss_before_mb = before.ram_rss_mb,
            rss_after_mb = after.ram_rss_mb,
            "unloaded model"
        );
        if before.vram_total_mb > 0.0 && freed_vram < 100.0 {
            tracing::warn!("VRAM not substantially freed after unload");
        }
        self.set_phase(LoadPhase::Idle);
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Background heartbeat logging elapsed time at `interval` while a load
/// phase runs long enough for an operator watching logs to wonder if
/// the process has hung.
fn spawn_progress_ticker(phase_name: &'static str, interval: Duration) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let start = Instant::now();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    tracing::info!(phase = phase_name, elapsed_s = start.elapsed().as_secs_f64(), "still loading");
                }
                _ = rx.changed() => {
                    if *rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::NoGpu;

    fn test_monitor() -> ResourceMonitor {
        ResourceMonitor::new(
            crate::monitor::MonitorLimits {
                vram_soft_mb: 2000.0,
                vram_hard_mb: 500.0,
                ram_soft_mb: 4000.0,
                ram_hard_mb: 1000.0,
                swap_hard_mb: 0.0,
                normal_interval_s: 5.0,
                fast_interval_s: 0.25,
                log_interval_s: 30.0,
            },
            crate::probe::MemoryProbe::new(Box::new(NoGpu)),
        )
    }

    #[tokio::test]
    async fn load_reaches_ready_phase_and_clears_context() {
        let monitor = test_monitor();
        let loader = Loader::new();
        let selection = Selection {
            model_id: "facebook/nllb-200-distilled-600M".to_string(),
            compute_type: ComputeType::Int8,
            device: Device::Cpu,
            estimated_mb: 900.0,
        };
        let active = loader.load(&EchoModelSource, &selection, &monitor).await.unwrap();
        assert_eq!(loader.phase(), LoadPhase::Ready);
        assert_eq!(active.model_id, selection.model_id);
        assert!(monitor.get_load_progress(&monitor.sample_once()).is_none());
    }
}
