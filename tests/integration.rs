// nllb-sidecar: integration tests

#[cfg(test)]
mod tests {
    use nllb_sidecar::ledger::{build_hw_fingerprint, FailureLedger};
    use nllb_sidecar::loader::{EchoModelSource, Loader, ModelSource};
    use nllb_sidecar::models::{ComputeType, Device};
    use nllb_sidecar::monitor::{MonitorLimits, ResourceMonitor};
    use nllb_sidecar::probe::{MemoryProbe, NoGpu};
    use nllb_sidecar::selector::Selector;
    use nllb_sidecar::translator::{EchoEngineCapabilities, Translator};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_monitor() -> ResourceMonitor {
        ResourceMonitor::new(
            MonitorLimits {
                vram_soft_mb: 1000.0,
                vram_hard_mb: 1200.0,
                ram_soft_mb: 8000.0,
                ram_hard_mb: 10000.0,
                swap_hard_mb: 2000.0,
                normal_interval_s: 5.0,
                fast_interval_s: 1.0,
                log_interval_s: 60.0,
            },
            MemoryProbe::new(Box::new(NoGpu)),
        )
    }

    #[tokio::test]
    async fn selector_and_loader_resolve_a_working_model_end_to_end() {
        let dir = tempdir().expect("tempdir");
        let ledger = FailureLedger::load(
            dir.path().join("ledger.json"),
            build_hw_fingerprint(None, 0.0, 16000.0),
        )
        .expect("fresh ledger loads");
        let selector = Selector::new(&ledger);

        let device = selector.resolve_device(None, false);
        assert_eq!(device, Device::Cpu);

        let compute_type = selector.resolve_compute_type(None, device, &EchoEngineCapabilities);
        assert_eq!(compute_type, ComputeType::Int8);

        let selection = selector
            .resolve_model(device, compute_type, 6000.0, None)
            .expect("a model should fit 6000 MB of headroom on CPU");

        let monitor = test_monitor();
        let loader = Loader::new();
        let source: Arc<dyn ModelSource> = Arc::new(EchoModelSource);

        let active = loader
            .load(source.as_ref(), &selection, &monitor)
            .await
            .expect("load should succeed against the echo model source");

        assert_eq!(active.device, device);
        assert_eq!(active.compute_type, compute_type);

        let out = active
            .translator
            .translate("hello world", "eng_Latn", "fra_Latn")
            .await
            .expect("echo translator never fails");
        assert!(out.text.contains("hello world"));
        assert!(out.output_token_count > 0);
    }

    #[tokio::test]
    async fn ledger_roundtrip_through_selector_blocks_known_bad_combo() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ledger.json");

        let fingerprint = build_hw_fingerprint(Some("Fake GPU"), 4000.0, 16000.0);
        let mut ledger = FailureLedger::load(&path, fingerprint.clone()).expect("fresh ledger loads");
        ledger
            .record_failure(
                "facebook/nllb-200-3.3B",
                "int8",
                "cuda",
                "out of memory".to_string(),
                None,
                0.0,
            )
            .expect("record_failure persists");

        let reloaded = FailureLedger::load(&path, fingerprint).expect("reload succeeds");
        assert!(reloaded.is_known_failure("facebook/nllb-200-3.3B", "int8", "cuda"));
        assert_eq!(reloaded.known_failure_count(), 1);

        let selector = Selector::new(&reloaded);
        assert!(selector.forced_selection_is_known_failure(
            "facebook/nllb-200-3.3B",
            "int8",
            "cuda"
        ));
    }

    #[tokio::test]
    async fn monitor_sample_is_well_formed_on_a_no_gpu_host() {
        let monitor = test_monitor();
        let snap = monitor.sample_once();
        assert!(snap.ram_total_mb >= 0.0);
        assert_eq!(snap.vram_total_mb, 0.0);
        assert_eq!(snap.vram_free_mb(), 0.0);
    }
}
