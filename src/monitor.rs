// nllb-sidecar: resource monitor (spec.md §4.3)
//
// A background sampler that watches VRAM/RAM/swap, maintains the
// four-state pressure machine, and predicts whether an in-progress model
// load will survive to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::probe::{self, MemoryProbe};
use crate::snapshot::{LoadContext, LoadProgress, PressureState, ResourceSnapshot, Timeline, TimelineEvent};
use crate::velocity::SubsystemVelocity;

#[derive(Debug, Clone)]
pub struct MonitorLimits {
    pub vram_soft_mb: f64,
    pub vram_hard_mb: f64,
    pub ram_soft_mb: f64,
    pub ram_hard_mb: f64,
    pub swap_hard_mb: f64,
    pub normal_interval_s: f64,
    pub fast_interval_s: f64,
    pub log_interval_s: f64,
}

struct MutableState {
    pressure: PressureState,
    load_context: Option<LoadContext>,
    timeline: Timeline,
    last_log_at: f64,
}

/// Background resource sampler. Cloneable handle; the sampler task itself
/// holds a `watch::Receiver` used as a cooperative stop signal.
pub struct ResourceMonitor {
    limits: MonitorLimits,
    probe: Mutex<MemoryProbe>,
    vram_velocity: Mutex<SubsystemVelocity>,
    ram_velocity: Mutex<SubsystemVelocity>,
    state: Mutex<MutableState>,
    pressure_event: AtomicBool,
    swap_baseline_mb: f64,
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl ResourceMonitor {
    pub fn new(limits: MonitorLimits, probe: MemoryProbe) -> Self {
        let (_total, free) = probe::swap_total_and_free_mb();
        let swap_baseline_mb = (probe::swap_total_and_free_mb().0 - free).max(0.0);
        Self {
            limits,
            probe: Mutex::new(probe),
            vram_velocity: Mutex::new(SubsystemVelocity::new()),
            ram_velocity: Mutex::new(SubsystemVelocity::new()),
            state: Mutex::new(MutableState {
                pressure: PressureState::Ok,
                load_context: None,
                timeline: Timeline::new(32),
                last_log_at: 0.0,
            }),
            pressure_event: AtomicBool::new(false),
            swap_baseline_mb,
        }
    }

    /// Spawn the sampling loop. Returns a `(JoinHandle, stop_sender)`
    /// pair; drop or send on `stop_sender` to request a cooperative
    /// shutdown, then await the handle.
    pub fn spawn(self: std::sync::Arc<Self>) -> (JoinHandle<()>, watch::Sender<bool>) {
        let (tx, mut rx) = watch::channel(false);
        let monitor = self;
        let handle = tokio::spawn(async move {
            loop {
                let snap = monitor.sample_once();
                let interval = if snap.pressure == PressureState::Ok {
                    monitor.limits.normal_interval_s
                } else {
                    monitor.limits.fast_interval_s
                };
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs_f64(interval)) => {}
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        (handle, tx)
    }

    pub async fn stop(handle: JoinHandle<()>, tx: watch::Sender<bool>) {
        let _ = tx.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    /// Take one sample, update velocities, run the state machine, and
    /// return the resulting snapshot. Also callable synchronously by
    /// handlers that want an up-to-date read outside the sampler cadence.
    pub fn sample_once(&self) -> ResourceSnapshot {
        let now = now_epoch();
        let mut probe = self.probe.lock().unwrap();
        let ram_total = probe.ram_total_mb();
        let ram_available = probe.ram_available_mb();
        let ram_rss = probe.process_rss_mb();
        let swap_used = probe.swap_used_mb();
        let process_swap = probe.process_swap_mb();
        let (vram_used, vram_total) = probe.vram_mb().unwrap_or((0.0, 0.0));
        drop(probe);

        self.vram_velocity
            .lock()
            .unwrap()
            .update(vram_total - vram_used, now);
        self.ram_velocity.lock().unwrap().update(ram_available, now);

        let mut state = self.state.lock().unwrap();
        let snap = ResourceSnapshot {
            t_epoch: now,
            vram_used_mb: vram_used,
            vram_total_mb: vram_total,
            ram_rss_mb: ram_rss,
            ram_available_mb: ram_available,
            ram_total_mb: ram_total,
            swap_used_mb: swap_used,
            pressure: state.pressure,
        };

        let new_pressure = self.transition(&state, &snap, process_swap);
        if new_pressure != state.pressure {
            let trigger = format!("{:?}->{:?}", state.pressure, new_pressure);
            state.pressure = new_pressure;
            state.timeline.push(TimelineEvent {
                t_epoch: now,
                event: "pressure_transition".to_string(),
                trigger,
                snapshot: ResourceSnapshot { pressure: new_pressure, ..snap },
                extra: None,
            });
            if new_pressure == PressureState::Critical {
                self.pressure_event.store(true, Ordering::SeqCst);
            }
        }

        if now - state.last_log_at >= self.limits.log_interval_s {
            state.last_log_at = now;
            tracing::info!("{}", snap.to_log_str());
        }

        ResourceSnapshot { pressure: state.pressure, ..snap }
    }

    fn transition(&self, state: &MutableState, snap: &ResourceSnapshot, process_swap_mb: f64) -> PressureState {
        let vram_free = snap.vram_free_mb();
        let vram_ttf = self.vram_velocity.lock().unwrap().time_to_full_s(vram_free);
        let ram_ttf = self
            .ram_velocity
            .lock()
            .unwrap()
            .time_to_full_s(snap.ram_available_mb);

        let load_predict_kill = state
            .load_context
            .as_ref()
            .map(|ctx| self.load_predicts_kill(ctx, snap))
            .unwrap_or(false);

        let vram_hard_breach = snap.vram_total_mb > 0.0 && vram_free < self.limits.vram_hard_mb;
        let vram_recovered = !vram_hard_breach;

        let swap_delta = (snap.swap_used_mb - self.swap_baseline_mb).max(0.0);
        let hard_breach = snap.ram_available_mb < self.limits.ram_hard_mb
            || swap_delta > self.limits.swap_hard_mb
            || process_swap_mb > 0.0
            || (load_predict_kill && snap.ram_available_mb < self.limits.ram_soft_mb);

        let soft_arm = snap.vram_total_mb > 0.0 && vram_free < self.limits.vram_soft_mb
            || snap.ram_available_mb < self.limits.ram_soft_mb
            || vram_ttf.map(|t| t < 10.0).unwrap_or(false)
            || ram_ttf.map(|t| t < 30.0).unwrap_or(false)
            || load_predict_kill;

        match state.pressure {
            PressureState::Ok => {
                if soft_arm {
                    PressureState::Warn
                } else {
                    PressureState::Ok
                }
            }
            PressureState::Warn => {
                if hard_breach {
                    PressureState::Critical
                } else if vram_hard_breach {
                    PressureState::VramFull
                } else if !soft_arm {
                    PressureState::Ok
                } else {
                    PressureState::Warn
                }
            }
            PressureState::VramFull => {
                if hard_breach {
                    PressureState::Critical
                } else if vram_recovered {
                    if soft_arm {
                        PressureState::Warn
                    } else {
                        PressureState::Ok
                    }
                } else {
                    PressureState::VramFull
                }
            }
            PressureState::Critical => PressureState::Critical,
        }
    }

    /// Predicts whether the currently loading model will exhaust memory
    /// before it finishes, given how much has been consumed so far
    /// relative to the estimated total.
    fn load_predicts_kill(&self, ctx: &LoadContext, snap: &ResourceSnapshot) -> bool {
        let progress = self.compute_load_progress(ctx, snap);
        !progress.will_ram_survive
    }

    fn compute_load_progress(&self, ctx: &LoadContext, snap: &ResourceSnapshot) -> LoadProgress {
        let vram_consumed = (snap.vram_used_mb - ctx.vram_baseline_mb).max(0.0);
        let ram_consumed = (ctx.ram_baseline_mb - snap.ram_available_mb).max(0.0);
        let consumed = vram_consumed + ram_consumed;
        let progress_pct = if ctx.estimated_total_mb > 0.0 {
            (consumed / ctx.estimated_total_mb * 100.0).min(150.0)
        } else {
            0.0
        };
        let remaining = (ctx.estimated_total_mb - consumed).max(0.0);
        let remaining_to_ram = (remaining - snap.vram_free_mb()).max(0.0);
        let ram_after_load = snap.ram_available_mb - remaining_to_ram;
        LoadProgress {
            consumed_mb: consumed,
            progress_pct,
            remaining_mb: remaining,
            ram_after_load_mb: ram_after_load,
            will_ram_survive: ram_after_load > self.limits.ram_hard_mb,
        }
    }

    pub fn get_load_progress(&self, snap: &ResourceSnapshot) -> Option<LoadProgress> {
        let state = self.state.lock().unwrap();
        state
            .load_context
            .as_ref()
            .map(|ctx| self.compute_load_progress(ctx, snap))
    }

    pub fn set_load_context(&self, ctx: LoadContext) {
        self.state.lock().unwrap().load_context = Some(ctx);
    }

    pub fn clear_load_context(&self) {
        self.state.lock().unwrap().load_context = None;
    }

    pub fn clear_pressure(&self) {
        let mut state = self.state.lock().unwrap();
        state.pressure = PressureState::Ok;
        state.timeline.clear();
        self.pressure_event.store(false, Ordering::SeqCst);
    }

    pub fn pressure_is_set(&self) -> bool {
        self.pressure_event.load(Ordering::SeqCst)
    }

    pub fn current_pressure(&self) -> PressureState {
        self.state.lock().unwrap().pressure
    }

    pub fn gpu_name_hint(&self) -> Option<String> {
        self.probe.lock().unwrap().gpu_name()
    }

    pub fn get_timeline_relative(&self, ref_epoch: f64) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().timeline.relative_to(ref_epoch)
    }

    /// Epoch of the last CRITICAL transition, the default reference
    /// point timeline queries should relativize against (spec.md §4.3).
    pub fn last_critical_epoch(&self) -> Option<f64> {
        self.state.lock().unwrap().timeline.last_critical_epoch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::NoGpu;

    fn test_monitor(ram_hard: f64, ram_soft: f64) -> ResourceMonitor {
        ResourceMonitor::new(
            MonitorLimits {
                vram_soft_mb: 2000.0,
                vram_hard_mb: 500.0,
                ram_soft_mb: ram_soft,
                ram_hard_mb: ram_hard,
                swap_hard_mb: 0.0,
                normal_interval_s: 5.0,
                fast_interval_s: 0.25,
                log_interval_s: 30.0,
            },
            MemoryProbe::new(Box::new(NoGpu)),
        )
    }

    fn snap(ram_available: f64, pressure: PressureState) -> ResourceSnapshot {
        ResourceSnapshot {
            t_epoch: 0.0,
            vram_used_mb: 0.0,
            vram_total_mb: 0.0,
            ram_rss_mb: 0.0,
            ram_available_mb: ram_available,
            ram_total_mb: 16000.0,
            swap_used_mb: 0.0,
            pressure,
        }
    }

    #[test]
    fn ok_to_warn_on_low_ram() {
        let m = test_monitor(1000.0, 4000.0);
        let state = m.state.lock().unwrap();
        let next = m.transition(&state, &snap(3000.0, PressureState::Ok), 0.0);
        assert_eq!(next, PressureState::Warn);
    }

    #[test]
    fn warn_to_critical_on_hard_breach() {
        let m = test_monitor(1000.0, 4000.0);
        let state = m.state.lock().unwrap();
        let next = m.transition(&state, &snap(500.0, PressureState::Warn), 0.0);
        assert_eq!(next, PressureState::Critical);
    }

    #[test]
    fn critical_stays_until_cleared() {
        let m = test_monitor(1000.0, 4000.0);
        let state = m.state.lock().unwrap();
        let next = m.transition(&state, &snap(16000.0, PressureState::Critical), 0.0);
        assert_eq!(next, PressureState::Critical);
        drop(state);
        m.pressure_event.store(true, Ordering::SeqCst);
        m.clear_pressure();
        assert!(!m.pressure_is_set());
    }

    #[test]
    fn ok_never_jumps_straight_to_critical() {
        // ram_available is comfortably above ram_soft, so soft_arm is
        // false; process_swap_mb alone would force hard_breach. From Ok,
        // only soft_arm can fire, so the state must stay Ok -- a hard
        // breach is only actionable once Warn has already been entered.
        let m = test_monitor(1000.0, 4000.0);
        let state = m.state.lock().unwrap();
        let next = m.transition(&state, &snap(5000.0, PressureState::Ok), 5.0);
        assert_eq!(next, PressureState::Ok);
    }

    #[test]
    fn vram_full_drops_to_warn_once_hard_breach_clears_even_below_soft() {
        let m = test_monitor(1000.0, 4000.0);
        let mut snap = snap(5000.0, PressureState::VramFull);
        snap.vram_total_mb = 8000.0;
        snap.vram_used_mb = 7200.0; // free = 800, above vram_hard (500) but below vram_soft (2000)
        let state = m.state.lock().unwrap();
        let next = m.transition(&state, &snap, 0.0);
        assert_eq!(next, PressureState::Warn);
    }

    #[test]
    fn process_swap_forces_hard_breach() {
        let m = test_monitor(1000.0, 4000.0);
        let state = m.state.lock().unwrap();
        let next = m.transition(&state, &snap(8000.0, PressureState::Warn), 5.0);
        assert_eq!(next, PressureState::Critical);
    }
}
