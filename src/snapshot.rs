// nllb-sidecar: resource data model (spec.md §3)

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Four-state memory pressure machine. Transitions are adjacency-only:
/// a jump from Ok straight to Critical never happens without passing
/// through Warn (or VramFull).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureState {
    Ok,
    Warn,
    VramFull,
    Critical,
}

impl Default for PressureState {
    fn default() -> Self {
        PressureState::Ok
    }
}

/// A point-in-time read of system and process memory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub t_epoch: f64,
    pub vram_used_mb: f64,
    pub vram_total_mb: f64,
    pub ram_rss_mb: f64,
    pub ram_available_mb: f64,
    pub ram_total_mb: f64,
    pub swap_used_mb: f64,
    pub pressure: PressureState,
}

impl ResourceSnapshot {
    pub fn vram_free_mb(&self) -> f64 {
        (self.vram_total_mb - self.vram_used_mb).max(0.0)
    }

    pub fn vram_pct(&self) -> f64 {
        if self.vram_total_mb <= 0.0 {
            0.0
        } else {
            (self.vram_used_mb / self.vram_total_mb) * 100.0
        }
    }

    pub fn ram_pct(&self) -> f64 {
        if self.ram_total_mb <= 0.0 {
            0.0
        } else {
            ((self.ram_total_mb - self.ram_available_mb) / self.ram_total_mb) * 100.0
        }
    }

    pub fn to_log_str(&self) -> String {
        format!(
            "pressure={:?} vram={:.0}/{:.0}MB ({:.1}%) ram_avail={:.0}MB ({:.1}% used) rss={:.0}MB swap={:.0}MB",
            self.pressure,
            self.vram_used_mb,
            self.vram_total_mb,
            self.vram_pct(),
            self.ram_available_mb,
            self.ram_pct(),
            self.ram_rss_mb,
            self.swap_used_mb,
        )
    }
}

/// Bookkeeping for an in-flight model load, used to predict whether the
/// load will finish before memory runs out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadContext {
    pub model_id: String,
    pub precision: String,
    pub device: String,
    pub estimated_total_mb: f64,
    pub vram_baseline_mb: f64,
    pub ram_baseline_mb: f64,
    pub started_at: f64,
}

/// Derived view of load progress, computed on demand from a snapshot and
/// the active `LoadContext`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadProgress {
    pub consumed_mb: f64,
    pub progress_pct: f64,
    pub remaining_mb: f64,
    pub ram_after_load_mb: f64,
    pub will_ram_survive: bool,
}

/// A ring-buffer entry recording a pressure-relevant event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub t_epoch: f64,
    pub event: String,
    pub trigger: String,
    pub snapshot: ResourceSnapshot,
    pub extra: Option<serde_json::Value>,
}

impl TimelineEvent {
    /// Relativize this event's timestamp to a reference epoch, in
    /// milliseconds, for inclusion in a response timeline.
    pub fn to_relative_json(&self, ref_epoch: f64) -> serde_json::Value {
        serde_json::json!({
            "t_ms": ((self.t_epoch - ref_epoch) * 1000.0).round(),
            "event": self.event,
            "trigger": self.trigger,
            "snapshot": self.snapshot,
            "extra": self.extra,
        })
    }
}

/// Bounded ring buffer of timeline events; oldest entries are dropped
/// once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct Timeline {
    capacity: usize,
    events: VecDeque<TimelineEvent>,
}

impl Timeline {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: TimelineEvent) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn relative_to(&self, ref_epoch: f64) -> Vec<serde_json::Value> {
        self.events
            .iter()
            .map(|e| e.to_relative_json(ref_epoch))
            .collect()
    }

    /// Epoch of the most recent transition into CRITICAL, the default
    /// reference point for relative-timeline queries.
    pub fn last_critical_epoch(&self) -> Option<f64> {
        self.events
            .iter()
            .rev()
            .find(|e| e.snapshot.pressure == PressureState::Critical)
            .map(|e| e.t_epoch)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(used: f64, total: f64) -> ResourceSnapshot {
        ResourceSnapshot {
            t_epoch: 0.0,
            vram_used_mb: used,
            vram_total_mb: total,
            ram_rss_mb: 0.0,
            ram_available_mb: 0.0,
            ram_total_mb: 0.0,
            swap_used_mb: 0.0,
            pressure: PressureState::Ok,
        }
    }

    #[test]
    fn vram_pct_handles_zero_total() {
        assert_eq!(snap(0.0, 0.0).vram_pct(), 0.0);
    }

    #[test]
    fn timeline_drops_oldest_past_capacity() {
        let mut t = Timeline::new(2);
        for i in 0..5 {
            t.push(TimelineEvent {
                t_epoch: i as f64,
                event: "e".into(),
                trigger: "t".into(),
                snapshot: snap(1.0, 2.0),
                extra: None,
            });
        }
        assert_eq!(t.events.len(), 2);
        assert_eq!(t.events.front().unwrap().t_epoch, 3.0);
    }
}
