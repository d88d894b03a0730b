// nllb-sidecar: persistent failure ledger (spec.md §4.4)

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{SidecarError, SidecarResult};
use crate::snapshot::ResourceSnapshot;

/// Current on-disk schema version. A ledger file carrying a different
/// fingerprint or version is discarded rather than partially trusted.
const LEDGER_VERSION: u32 = 1;

/// Hardware identity string the ledger is keyed on:
/// `"<gpu_name>:<vram_total_mb>:<ram_total_mb>"`, or
/// `"no-gpu:0:<ram_total_mb>"` on CPU-only hosts.
pub fn build_hw_fingerprint(gpu_name: Option<&str>, vram_total_mb: f64, ram_total_mb: f64) -> String {
    match gpu_name {
        Some(name) => format!("{name}:{:.0}:{:.0}", vram_total_mb, ram_total_mb),
        None => format!("no-gpu:0:{:.0}", ram_total_mb),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub model_id: String,
    pub precision: String,
    pub device: String,
    pub reason: String,
    pub last_seen_epoch: f64,
    pub snapshot: Option<ResourceSnapshot>,
}

impl FailureRecord {
    fn key(model_id: &str, precision: &str, device: &str) -> String {
        format!("{model_id}|{precision}|{device}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    hw_fingerprint: String,
    records: Vec<FailureRecord>,
}

/// A persisted, hardware-fingerprinted record of model/precision/device
/// combinations previously known to fail under memory pressure on this
/// host.
pub struct FailureLedger {
    path: PathBuf,
    hw_fingerprint: String,
    records: Vec<FailureRecord>,
}

impl FailureLedger {
    /// Load the ledger at `path`, discarding its contents if the stored
    /// hardware fingerprint or schema version doesn't match.
    pub fn load(path: impl Into<PathBuf>, hw_fingerprint: String) -> SidecarResult<Self> {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<LedgerFile>(&content) {
                Ok(file)
                    if file.version == LEDGER_VERSION && file.hw_fingerprint == hw_fingerprint =>
                {
                    file.records
                }
                Ok(_) => {
                    tracing::warn!("failure ledger fingerprint/version mismatch, discarding");
                    Vec::new()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failure ledger unreadable, discarding");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Ok(Self {
            path,
            hw_fingerprint,
            records,
        })
    }

    fn save(&self) -> SidecarResult<()> {
        let file = LedgerFile {
            version: LEDGER_VERSION,
            hw_fingerprint: self.hw_fingerprint.clone(),
            records: self.records.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|e| SidecarError::LedgerError(format!("failed to persist ledger: {e}")))?;
        Ok(())
    }

    /// Record (or update, if already present) a failure for this
    /// model/precision/device combination. Always persists immediately.
    pub fn record_failure(
        &mut self,
        model_id: &str,
        precision: &str,
        device: &str,
        reason: String,
        snapshot: Option<ResourceSnapshot>,
        now: f64,
    ) -> SidecarResult<()> {
        let key = FailureRecord::key(model_id, precision, device);
        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|r| FailureRecord::key(&r.model_id, &r.precision, &r.device) == key)
        {
            existing.reason = reason;
            existing.last_seen_epoch = now;
            existing.snapshot = snapshot;
        } else {
            self.records.push(FailureRecord {
                model_id: model_id.to_string(),
                precision: precision.to_string(),
                device: device.to_string(),
                reason,
                last_seen_epoch: now,
                snapshot,
            });
        }
        self.save()
    }

    pub fn is_known_failure(&self, model_id: &str, precision: &str, device: &str) -> bool {
        let key = FailureRecord::key(model_id, precision, device);
        self.records
            .iter()
            .any(|r| FailureRecord::key(&r.model_id, &r.precision, &r.device) == key)
    }

    pub fn known_failure_count(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let mut ledger = FailureLedger::load(&path, "no-gpu:0:8000".to_string()).unwrap();
        assert!(!ledger.is_known_failure("m", "int8", "cpu"));

        ledger
            .record_failure("m", "int8", "cpu", "oom".to_string(), None, 100.0)
            .unwrap();
        assert!(ledger.is_known_failure("m", "int8", "cpu"));

        let reloaded = FailureLedger::load(&path, "no-gpu:0:8000".to_string()).unwrap();
        assert!(reloaded.is_known_failure("m", "int8", "cpu"));
        assert_eq!(reloaded.known_failure_count(), 1);
    }

    #[test]
    fn fingerprint_mismatch_discards_ledger() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let mut ledger = FailureLedger::load(&path, "gpu-a:8000:16000".to_string()).unwrap();
        ledger
            .record_failure("m", "int8", "gpu", "oom".to_string(), None, 1.0)
            .unwrap();

        let reloaded = FailureLedger::load(&path, "gpu-b:8000:16000".to_string()).unwrap();
        assert!(!reloaded.is_known_failure("m", "int8", "gpu"));
    }

    #[test]
    fn update_in_place_replaces_reason() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let mut ledger = FailureLedger::load(&path, "fp".to_string()).unwrap();
        ledger
            .record_failure("m", "int8", "cpu", "first".to_string(), None, 1.0)
            .unwrap();
        ledger
            .record_failure("m", "int8", "cpu", "second".to_string(), None, 2.0)
            .unwrap();
        assert_eq!(ledger.known_failure_count(), 1);
        assert_eq!(ledger.records[0].reason, "second");
    }
}
