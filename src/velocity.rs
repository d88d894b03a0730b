// nllb-sidecar: EWMA fill-rate estimator (spec.md §4.2)

/// Tracks the rate at which a subsystem's free memory is changing, via
/// an exponentially weighted moving average of instantaneous deltas.
#[derive(Debug, Clone)]
pub struct SubsystemVelocity {
    alpha: f64,
    prev_free_mb: Option<f64>,
    prev_t: Option<f64>,
    ewma_delta_per_s: f64,
}

const DEAD_BAND: f64 = 0.1;

impl SubsystemVelocity {
    pub fn new() -> Self {
        Self {
            alpha: 0.3,
            prev_free_mb: None,
            prev_t: None,
            ewma_delta_per_s: 0.0,
        }
    }

    /// Feed a new (free_mb, now) sample, updating the EWMA. The first
    /// sample only seeds the baseline; it produces no delta.
    pub fn update(&mut self, free_mb: f64, now: f64) {
        if let (Some(prev_free), Some(prev_t)) = (self.prev_free_mb, self.prev_t) {
            let dt = now - prev_t;
            if dt > 0.0 {
                let delta = (free_mb - prev_free) / dt;
                self.ewma_delta_per_s = self.alpha * delta + (1.0 - self.alpha) * self.ewma_delta_per_s;
            }
        }
        self.prev_free_mb = Some(free_mb);
        self.prev_t = Some(now);
    }

    /// Fill rate in MB/s: positive means memory is filling (free space
    /// shrinking), negative means it's draining/recovering.
    pub fn fill_rate_mb_s(&self) -> f64 {
        -self.ewma_delta_per_s
    }

    /// Seconds until free memory hits zero at the current fill rate, or
    /// `None` if the trend is flat/draining (dead-banded at |v| < 0.1
    /// MB/s to avoid noise-driven estimates).
    pub fn time_to_full_s(&self, current_free_mb: f64) -> Option<f64> {
        if self.ewma_delta_per_s >= -DEAD_BAND {
            None
        } else {
            Some(current_free_mb / (-self.ewma_delta_per_s))
        }
    }
}

impl Default for SubsystemVelocity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_without_delta() {
        let mut v = SubsystemVelocity::new();
        v.update(1000.0, 0.0);
        assert_eq!(v.fill_rate_mb_s(), 0.0);
        assert_eq!(v.time_to_full_s(1000.0), None);
    }

    #[test]
    fn steady_drain_yields_ttf() {
        let mut v = SubsystemVelocity::new();
        v.update(1000.0, 0.0);
        // free memory shrinking by 100MB/s, repeated to let the EWMA converge
        for i in 1..20 {
            v.update(1000.0 - 100.0 * i as f64, i as f64);
        }
        assert!(v.fill_rate_mb_s() > 0.0);
        assert!(v.time_to_full_s(500.0).is_some());
    }

    #[test]
    fn flat_trend_has_no_ttf() {
        let mut v = SubsystemVelocity::new();
        v.update(1000.0, 0.0);
        v.update(1000.0, 1.0);
        v.update(1000.0, 2.0);
        assert_eq!(v.time_to_full_s(1000.0), None);
    }

    #[test]
    fn recovering_trend_has_no_ttf() {
        let mut v = SubsystemVelocity::new();
        v.update(500.0, 0.0);
        for i in 1..10 {
            v.update(500.0 + 50.0 * i as f64, i as f64);
        }
        assert!(v.fill_rate_mb_s() < 0.0);
        assert_eq!(v.time_to_full_s(900.0), None);
    }
}
