// nllb-sidecar: stepdown controller (spec.md §4.7)

use crate::error::SidecarResult;
use crate::ledger::FailureLedger;
use crate::loader::{ActiveModel, Loader, ModelSource};
use crate::models::stepdown_target;
use crate::monitor::ResourceMonitor;
use crate::selector::Selection;
use crate::snapshot::ResourceSnapshot;

pub struct StepdownOutcome {
    pub stepped_down_from: String,
    pub stepped_down_to: String,
}

/// Unloads the current model, records the failure, and loads the next
/// smaller model in the fixed chain. Per spec.md §9 Open Question 3,
/// this does not recurse further down the chain on a second failure —
/// a single attempt either succeeds or the caller surfaces a degraded
/// response.
pub struct StepdownController;

impl StepdownController {
    pub async fn perform(
        current: &ActiveModel,
        reason: &str,
        snapshot_at_decision: ResourceSnapshot,
        monitor: &ResourceMonitor,
        ledger: &mut FailureLedger,
        loader: &Loader,
        source: &dyn ModelSource,
    ) -> SidecarResult<Option<(ActiveModel, StepdownOutcome)>> {
        let Some(target_model_id) = stepdown_target(&current.model_id) else {
            tracing::warn!(model = %current.model_id, "stepdown chain exhausted, no smaller model available");
            return Ok(None);
        };

        ledger.record_failure(
            &current.model_id,
            current.compute_type.as_str(),
            current.device.as_str(),
            reason.to_string(),
            Some(snapshot_at_decision),
            snapshot_at_decision.t_epoch,
        )?;

        loader.unload(current, monitor);

        let selection = Selection {
            model_id: target_model_id.to_string(),
            compute_type: current.compute_type,
            device: current.device,
            estimated_mb: crate::models::estimate_mb(
                crate::models::NLLB_SPECS
                    .iter()
                    .find(|s| s.model_id == target_model_id)
                    .map(|s| s.params_m)
                    .unwrap_or(0.0),
                current.compute_type,
            ),
        };

        // TODO(stepdown-recursion): on failure here, a fully recursive
        // implementation would look up stepdown_target(target_model_id)
        // and retry; this implementation surfaces the failure instead.
        match loader.load(source, &selection, monitor).await {
            Ok(active) => {
                monitor.clear_pressure();
                tracing::warn!(
                    from = %current.model_id,
                    to = %target_model_id,
                    reason,
                    "stepped down to smaller model"
                );
                Ok(Some((
                    active,
                    StepdownOutcome {
                        stepped_down_from: current.model_id.clone(),
                        stepped_down_to: target_model_id.to_string(),
                    },
                )))
            }
            Err(e) => {
                tracing::error!(error = %e, "stepdown reload failed");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::EchoModelSource;
    use crate::models::{ComputeType, Device};
    use crate::probe::NoGpu;
    use crate::snapshot::PressureState;
    use tempfile::tempdir;

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

    fn snap() -> ResourceSnapshot {
        ResourceSnapshot {
            t_epoch: 0.0,
            vram_used_mb: 0.0,
            vram_total_mb: 0.0,
            ram_rss_mb: 0.0,
            ram_available_mb: 500.0,
            ram_total_mb: 16000.0,
            swap_used_mb: 0.0,
            pressure: PressureState::Critical,
        }
    }

    #[tokio::test]
    async fn steps_down_to_smaller_model_and_records_failure() {
        let monitor = test_monitor();
        let loader = Loader::new();
        let dir = tempdir().unwrap();
        let mut ledger = FailureLedger::load(dir.path().join("l.json"), "fp".to_string()).unwrap();

        let current = ActiveModel {
            translator: std::sync::Arc::new(crate::translator::EchoTranslator),
            tokenizer: std::sync::Arc::new(crate::translator::EchoTokenizer),
            model_id: "facebook/nllb-200-distilled-1.3B".to_string(),
            compute_type: ComputeType::Int8,
            device: Device::Cpu,
        };

        let outcome = StepdownController::perform(
            &current,
            "oom",
            snap(),
            &monitor,
            &mut ledger,
            &loader,
            &EchoModelSource,
        )
        .await
        .unwrap();

        let (active, info) = outcome.expect("should step down");
        assert_eq!(active.model_id, "facebook/nllb-200-distilled-600M");
        assert_eq!(info.stepped_down_to, "facebook/nllb-200-distilled-600M");
        assert!(ledger.is_known_failure(
            "facebook/nllb-200-distilled-1.3B",
            "int8",
            "cpu"
        ));
    }

    #[tokio::test]
    async fn smallest_model_has_nowhere_to_step_down_to() {
        let monitor = test_monitor();
        let loader = Loader::new();
        let dir = tempdir().unwrap();
        let mut ledger = FailureLedger::load(dir.path().join("l.json"), "fp".to_string()).unwrap();

        let current = ActiveModel {
            translator: std::sync::Arc::new(crate::translator::EchoTranslator),
            tokenizer: std::sync::Arc::new(crate::translator::EchoTokenizer),
            model_id: "facebook/nllb-200-distilled-600M".to_string(),
            compute_type: ComputeType::Int8,
            device: Device::Cpu,
        };

        let outcome = StepdownController::perform(
            &current,
            "oom",
            snap(),
            &monitor,
            &mut ledger,
            &loader,
            &EchoModelSource,
        )
        .await
        .unwrap();

        assert!(outcome.is_none());
    }
}
