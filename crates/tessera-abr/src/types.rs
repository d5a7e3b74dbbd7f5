use std::time::Duration;

use derive_setters::Setters;

use crate::BandwidthEstimator;

/// ABR mode selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbrMode {
    /// Learned variant selection.
    /// Optionally pin the variant used before the first bandwidth measurement.
    Auto(Option<usize>),
    /// Manual variant selection (learning disabled).
    /// Always use the specified variant index.
    Manual(usize),
}

impl Default for AbrMode {
    fn default() -> Self {
        Self::Auto(None)
    }
}

/// Q-learning ABR configuration. Every tuning constant of the policy lives here.
#[derive(Clone, Setters)]
#[setters(prefix = "with_", strip_option)]
pub struct AbrOptions {
    /// ABR mode: Auto (learned) or Manual (fixed variant).
    pub mode: AbrMode,
    /// Learning rate α of the Q update.
    pub learning_rate: f64,
    /// Discount γ applied to the best Q-value of the next state.
    pub discount: f64,
    /// Softmax temperature over normalized Q-values.
    pub temperature: f64,
    /// Exploration rate of a state seen for the first time.
    pub initial_exploration: f64,
    /// Lower bound of the exploration rate.
    pub min_exploration: f64,
    /// Slope of the sigmoid mapping Q movement to exploration.
    pub exploration_gain: f64,
    /// Fraction of the distance to the sigmoid target covered per update.
    pub exploration_step: f64,
    /// Bucket width below `bandwidth_fine_limit`.
    pub bandwidth_fine_step: u64,
    pub bandwidth_fine_limit: u64,
    /// Bucket width between the fine and medium limits.
    pub bandwidth_medium_step: u64,
    pub bandwidth_medium_limit: u64,
    /// Bucket width above `bandwidth_medium_limit`.
    pub bandwidth_coarse_step: u64,
    /// Width of one buffer-level bucket.
    pub buffer_bucket: Duration,
    /// Buffer levels above this share the last bucket.
    pub max_buffer: Duration,
    /// Buffer level at which the bandwidth target equals the measured bandwidth.
    pub target_buffer: Duration,
    /// Share of the measured bandwidth targeted with an empty buffer.
    pub min_buffer_factor: f64,
    pub quality_weight: f64,
    pub switch_weight: f64,
    pub freeze_weight: f64,
    /// Freeze duration that counts as much as one extra freeze.
    pub freeze_unit: Duration,
    /// Time constant of the freeze penalty decay.
    pub freeze_decay: Duration,
    /// Seed for exploration sampling; entropy-seeded when `None`.
    pub seed: Option<u64>,
}

impl Default for AbrOptions {
    fn default() -> Self {
        Self {
            mode: AbrMode::default(),
            learning_rate: 0.3,
            discount: 0.9,
            temperature: 0.1,
            initial_exploration: 1.0,
            min_exploration: 0.05,
            exploration_gain: 10.0,
            exploration_step: 0.25,
            bandwidth_fine_step: 100_000,
            bandwidth_fine_limit: 1_000_000,
            bandwidth_medium_step: 500_000,
            bandwidth_medium_limit: 5_000_000,
            bandwidth_coarse_step: 1_000_000,
            buffer_bucket: Duration::from_secs(2),
            max_buffer: Duration::from_secs(30),
            target_buffer: Duration::from_secs(10),
            min_buffer_factor: 0.5,
            quality_weight: 1.0,
            switch_weight: 0.5,
            freeze_weight: 4.0,
            freeze_unit: Duration::from_secs(1),
            freeze_decay: Duration::from_secs(10),
            seed: None,
        }
    }
}

impl std::fmt::Debug for AbrOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbrOptions")
            .field("mode", &self.mode)
            .field("learning_rate", &self.learning_rate)
            .field("discount", &self.discount)
            .field("temperature", &self.temperature)
            .field("initial_exploration", &self.initial_exploration)
            .field("min_exploration", &self.min_exploration)
            .field("target_buffer", &self.target_buffer)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl AbrOptions {
    /// Variant used before any bandwidth has been measured.
    pub fn initial_variant(&self) -> usize {
        match self.mode {
            AbrMode::Auto(Some(idx)) | AbrMode::Manual(idx) => idx,
            AbrMode::Auto(None) => 0,
        }
    }
}

/// Playback telemetry reported by the consumer with every segment request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackTelemetry {
    /// Media buffered ahead of the playhead.
    pub time_in_buffer: Duration,
    /// Accumulated stall time.
    pub total_freeze_duration: Duration,
    pub time_since_last_freeze: Duration,
    pub number_of_freezes: u32,
}

/// Raw conditions at a segment boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stage {
    /// Measured bandwidth (bits per second).
    pub bandwidth_bps: u64,
    /// Bandwidth of the previously chosen variant.
    pub previous_bps: Option<u64>,
    /// Wall-clock time of the last segment download.
    pub last_download: Duration,
    pub telemetry: PlaybackTelemetry,
}

impl Stage {
    pub fn new(bandwidth_bps: u64, telemetry: PlaybackTelemetry) -> Self {
        Self {
            bandwidth_bps,
            telemetry,
            ..Self::default()
        }
    }

    /// Stage measured by `estimator`'s smoothed bandwidth.
    pub fn from_estimator<E: BandwidthEstimator + ?Sized>(
        estimator: &E,
        telemetry: PlaybackTelemetry,
    ) -> Self {
        Self::new(estimator.average_bandwidth(), telemetry)
    }

    pub fn with_previous(mut self, previous_bps: Option<u64>) -> Self {
        self.previous_bps = previous_bps;
        self
    }

    pub fn with_last_download(mut self, last_download: Duration) -> Self {
        self.last_download = last_download;
        self
    }

    pub fn buffer(&self) -> Duration {
        self.telemetry.time_in_buffer
    }
}

/// Quantized [`Stage`]: key of the learning tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct State {
    /// Lower bound of the bandwidth bucket (bits per second).
    pub bandwidth_bucket: u64,
    /// Buffer level bucket index.
    pub buffer_bucket: u32,
    /// Bandwidth of the previous choice, 0 before the first one.
    pub previous_quality: u64,
}

/// Candidate variant, identified by its bandwidth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Action(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StateAction {
    pub state: State,
    pub action: Action,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbrReason {
    /// Auto mode without a bandwidth measurement yet.
    Initial,
    Manual,
    /// Sampled from the softmax distribution.
    Explore,
    /// Highest Q-value.
    Exploit,
    SingleVariant,
}

/// Outcome of [`AbrPolicy::choose`](crate::AbrPolicy::choose); handed back to
/// [`AbrPolicy::update`](crate::AbrPolicy::update) once the segment is fetched.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AbrDecision {
    pub variant: usize,
    pub reason: AbrReason,
    pub state: State,
    pub action: Action,
}

impl AbrDecision {
    /// Decisions that feed the learning tables.
    pub fn is_learned(&self) -> bool {
        matches!(self.reason, AbrReason::Explore | AbrReason::Exploit)
    }
}
