use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;

/// Source of bandwidth measurements.
///
/// Transport implementations embed a [`BandwidthMeter`] and forward these
/// calls to it; the download engine builds its ABR [`Stage`](crate::Stage)
/// from them.
#[cfg_attr(test, automock)]
pub trait BandwidthEstimator {
    /// Smoothed bandwidth in bits per second, 0 before the first sample.
    fn average_bandwidth(&self) -> u64;

    /// Most recent sample in bits per second, 0 before the first sample.
    fn current_bandwidth(&self) -> u64;

    /// Push a realized bandwidth sample (bits per second).
    fn record_bandwidth(&self, bps: u64);
}

/// Dual-EWMA throughput estimator.
///
/// The estimate is the minimum of a fast (2 s half-life) and a slow (10 s
/// half-life) moving average, which follows drops quickly and rises slowly.
#[derive(Debug)]
pub struct BandwidthMeter {
    state: Mutex<MeterState>,
}

#[derive(Clone, Debug)]
struct MeterState {
    fast_ewma: Ewma,
    slow_ewma: Ewma,
    current_bps: u64,
    initial_bps: u64,
}

impl Default for BandwidthMeter {
    fn default() -> Self {
        Self::new(0)
    }
}

impl BandwidthMeter {
    const FAST_HALF_LIFE_SECS: f64 = 2.0;
    const SLOW_HALF_LIFE_SECS: f64 = 10.0;
    const MIN_CHUNK_BYTES: u64 = 16_000;
    const MIN_DURATION_MS: f64 = 0.5;
    /// Weight of a sample recorded without a transfer duration.
    const DEFAULT_WEIGHT_SECS: f64 = 1.0;

    /// Meter reporting `initial_bps` until the first sample arrives.
    pub fn new(initial_bps: u64) -> Self {
        Self {
            state: Mutex::new(MeterState {
                fast_ewma: Ewma::new(Self::FAST_HALF_LIFE_SECS),
                slow_ewma: Ewma::new(Self::SLOW_HALF_LIFE_SECS),
                current_bps: 0,
                initial_bps,
            }),
        }
    }

    /// Record a finished transfer. Transfers below 16 kB are ignored: their
    /// timing is dominated by latency, not throughput.
    pub fn push_transfer(&self, bytes: u64, duration: Duration) {
        if bytes < Self::MIN_CHUNK_BYTES {
            return;
        }
        let dur_ms = (duration.as_secs_f64() * 1000.0).max(Self::MIN_DURATION_MS);
        let bps = (bytes as f64) * 8000.0 / dur_ms;
        self.push(bps, dur_ms / 1000.0);
    }

    fn push(&self, bps: f64, weight_secs: f64) {
        let mut state = self.state.lock();
        state.fast_ewma.add_sample(weight_secs, bps);
        state.slow_ewma.add_sample(weight_secs, bps);
        state.current_bps = bps.round() as u64;
    }

    pub fn estimate_bps(&self) -> Option<u64> {
        let state = self.state.lock();
        let est = state
            .fast_ewma
            .get_estimate()
            .min(state.slow_ewma.get_estimate());

        if est > 0.0 {
            Some(est.round() as u64)
        } else if state.initial_bps > 0 {
            Some(state.initial_bps)
        } else {
            None
        }
    }
}

impl BandwidthEstimator for BandwidthMeter {
    fn average_bandwidth(&self) -> u64 {
        self.estimate_bps().unwrap_or(0)
    }

    fn current_bandwidth(&self) -> u64 {
        let state = self.state.lock();
        if state.current_bps > 0 {
            state.current_bps
        } else {
            state.initial_bps
        }
    }

    fn record_bandwidth(&self, bps: u64) {
        if bps == 0 {
            return;
        }
        self.push(bps as f64, Self::DEFAULT_WEIGHT_SECS);
    }
}

#[derive(Clone, Debug)]
struct Ewma {
    alpha: f64,
    last_estimate: f64,
    total_weight: f64,
}

impl Ewma {
    fn new(half_life_secs: f64) -> Self {
        Self {
            alpha: f64::exp(0.5_f64.ln() / half_life_secs.max(0.001)),
            last_estimate: 0.0,
            total_weight: 0.0,
        }
    }

    fn add_sample(&mut self, weight: f64, val: f64) {
        let adj_alpha = self.alpha.powf(weight.max(0.0));
        self.last_estimate = val * (1.0 - adj_alpha) + adj_alpha * self.last_estimate;
        self.total_weight += weight.max(0.0);
    }

    fn get_estimate(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
        self.last_estimate / zero_factor.max(1e-6)
    }
}
