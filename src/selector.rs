// nllb-sidecar: model/compute-type selector (spec.md §4.5)

use crate::ledger::FailureLedger;
use crate::models::{self, ComputeType, Device, ModelSpec, NLLB_SPECS};
use crate::translator::SupportedComputeTypes;

/// Headroom reserved below raw free memory when deciding what fits,
/// matching the original server's constants.
const GPU_HEADROOM_MB: f64 = 1500.0;
const CPU_HEADROOM_MB: f64 = 4000.0;

#[derive(Debug, Clone)]
pub struct Selection {
    pub model_id: String,
    pub compute_type: ComputeType,
    pub device: Device,
    pub estimated_mb: f64,
}

/// Resolves device, compute type, and model given explicit overrides,
/// available memory, and the failure ledger. Mirrors
/// `_resolve_compute_type` / `_resolve_model` from the original server.
pub struct Selector<'a> {
    pub ledger: &'a FailureLedger,
}

impl<'a> Selector<'a> {
    pub fn new(ledger: &'a FailureLedger) -> Self {
        Self { ledger }
    }

    pub fn resolve_device(&self, override_device: Option<&str>, gpu_present: bool) -> Device {
        match override_device {
            Some("cpu") => Device::Cpu,
            Some("gpu") => Device::Gpu,
            _ => {
                if gpu_present {
                    Device::Gpu
                } else {
                    Device::Cpu
                }
            }
        }
    }

    /// Resolves the compute type for `device`. An explicit override wins
    /// outright; otherwise consults the engine's supported-compute-types
    /// query and picks the first entry from the device's ordered
    /// preference list that the engine actually supports (spec.md §4.5,
    /// mirroring `_resolve_compute_type`'s filter against
    /// `ctranslate2.get_supported_compute_types`).
    pub fn resolve_compute_type(
        &self,
        override_ct: Option<&str>,
        device: Device,
        engine: &dyn SupportedComputeTypes,
    ) -> ComputeType {
        if let Some(s) = override_ct {
            if let Some(ct) = ComputeType::from_str_loose(s) {
                return ct;
            }
        }
        let supported = engine.supported_compute_types(device);
        ComputeType::preference_order(device)
            .iter()
            .find(|ct| supported.contains(ct))
            .copied()
            .unwrap_or(ComputeType::preference_order(device)[0])
    }

    /// Select the largest model that plausibly fits `available_mb`
    /// (already headroom-adjusted) at `compute_type`, skipping
    /// ledger-known failures, falling back through lower precisions if
    /// nothing fits at the preferred one.
    pub fn resolve_model(
        &self,
        device: Device,
        compute_type: ComputeType,
        available_mb: f64,
        model_override: Option<&str>,
    ) -> Option<Selection> {
        if let Some(model_id) = model_override {
            let spec = NLLB_SPECS.iter().find(|s| s.model_id == model_id)?;
            let estimated_mb = models::estimate_mb(spec.params_m, compute_type);
            return Some(Selection {
                model_id: spec.model_id.to_string(),
                compute_type,
                device,
                estimated_mb,
            });
        }

        let headroom = match device {
            Device::Gpu => GPU_HEADROOM_MB,
            Device::Cpu => CPU_HEADROOM_MB,
        };
        let budget = (available_mb - headroom).max(0.0);

        for precision in fallback_chain(compute_type) {
            if let Some(sel) = self.largest_fitting(device, precision, budget) {
                return Some(sel);
            }
        }
        None
    }

    fn largest_fitting(&self, device: Device, compute_type: ComputeType, budget_mb: f64) -> Option<Selection> {
        candidates(device)
            .iter()
            .filter(|spec| !self.ledger.is_known_failure(spec.model_id, compute_type.as_str(), device.as_str()))
            .map(|spec| (spec, models::estimate_mb(spec.params_m, compute_type)))
            .filter(|(_, mb)| *mb <= budget_mb)
            .max_by(|(a, _), (b, _)| a.params_m.partial_cmp(&b.params_m).unwrap())
            .map(|(spec, mb)| Selection {
                model_id: spec.model_id.to_string(),
                compute_type,
                device,
                estimated_mb: mb,
            })
    }

    /// True if a forced override matches a ledger-known failure; callers
    /// should log a loud warning before proceeding (spec.md §4.5a).
    pub fn forced_selection_is_known_failure(&self, model_id: &str, precision: &str, device: &str) -> bool {
        self.ledger.is_known_failure(model_id, precision, device)
    }
}

fn candidates(device: Device) -> Vec<&'static ModelSpec> {
    NLLB_SPECS
        .iter()
        .filter(|s| device == Device::Gpu || s.cpu_practical)
        .collect()
}

/// Ordered list starting at `preferred`, stepping through the rest of
/// the device's preference list so `resolve_model` can fall back to a
/// lower precision when nothing fits at the preferred one.
fn fallback_chain(preferred: ComputeType) -> Vec<ComputeType> {
    let mut chain = vec![preferred];
    for ct in models::ALL_COMPUTE_TYPES {
        if *ct != preferred {
            chain.push(*ct);
        }
    }
    chain
}

pub fn warning_banner(model_id: &str, precision: &str, device: &str) -> String {
    format!(
        "\n\
         ################################################################\n\
         # STRONG WARNING: forced selection matches a known failure    #\n\
         # model={model_id}\n\
         # precision={precision} device={device}\n\
         # this combination previously failed under memory pressure on \n\
         # this host and was recorded in the failure ledger.            \n\
         ################################################################"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn empty_ledger() -> FailureLedger {
        let dir = tempdir().unwrap();
        FailureLedger::load(dir.path().join("l.json"), "fp".to_string()).unwrap()
    }

    struct OnlyFloat32;
    impl SupportedComputeTypes for OnlyFloat32 {
        fn supported_compute_types(&self, _device: Device) -> Vec<ComputeType> {
            vec![ComputeType::Float32]
        }
    }

    #[test]
    fn resolve_compute_type_falls_back_to_an_engine_supported_type() {
        let ledger = empty_ledger();
        let selector = Selector::new(&ledger);
        // Preference order for CPU is int8 > float32, but the engine here
        // only supports float32.
        let ct = selector.resolve_compute_type(None, Device::Cpu, &OnlyFloat32);
        assert_eq!(ct, ComputeType::Float32);
    }

    #[test]
    fn resolve_compute_type_override_bypasses_engine_query() {
        let ledger = empty_ledger();
        let selector = Selector::new(&ledger);
        let ct = selector.resolve_compute_type(Some("float32"), Device::Cpu, &OnlyFloat32);
        assert_eq!(ct, ComputeType::Float32);
    }

    #[test]
    fn picks_largest_model_that_fits() {
        let ledger = empty_ledger();
        let selector = Selector::new(&ledger);
        let sel = selector
            .resolve_model(Device::Cpu, ComputeType::Int8, 4000.0 + CPU_HEADROOM_MB, None)
            .unwrap();
        assert_eq!(sel.model_id, "facebook/nllb-200-distilled-1.3B");
    }

    #[test]
    fn falls_back_when_nothing_fits_at_preferred_precision() {
        let ledger = empty_ledger();
        let selector = Selector::new(&ledger);
        // Only room for the smallest model at int8, not at float32.
        let sel = selector
            .resolve_model(Device::Cpu, ComputeType::Float32, 900.0 + CPU_HEADROOM_MB, None)
            .unwrap();
        assert_eq!(sel.model_id, "facebook/nllb-200-distilled-600M");
    }

    #[test]
    fn skips_ledger_known_failures() {
        let mut ledger = empty_ledger();
        ledger
            .record_failure(
                "facebook/nllb-200-distilled-1.3B",
                "int8",
                "cpu",
                "oom".to_string(),
                None,
                0.0,
            )
            .unwrap();
        let selector = Selector::new(&ledger);
        let sel = selector
            .resolve_model(Device::Cpu, ComputeType::Int8, 4000.0 + CPU_HEADROOM_MB, None)
            .unwrap();
        assert_eq!(sel.model_id, "facebook/nllb-200-distilled-600M");
    }

    #[test]
    fn model_override_bypasses_fit_check() {
        let ledger = empty_ledger();
        let selector = Selector::new(&ledger);
        let sel = selector
            .resolve_model(
                Device::Cpu,
                ComputeType::Int8,
                0.0,
                Some("facebook/nllb-200-3.3B"),
            )
            .unwrap();
        assert_eq!(sel.model_id, "facebook/nllb-200-3.3B");
    }
}
