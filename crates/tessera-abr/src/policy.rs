use std::collections::HashMap;

use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, trace};

use crate::{
    AbrDecision, AbrMode, AbrOptions, AbrReason, Action, Stage, State, StateAction,
    reward::{RewardInput, reward},
};

/// Tabular Q-learning variant selector.
///
/// Owns the `StateAction -> Q` and `State -> exploration rate` tables for
/// the lifetime of playback. Only the download thread mutates it.
pub struct AbrPolicy {
    options: AbrOptions,
    q_values: HashMap<StateAction, f64>,
    exploration: HashMap<State, f64>,
    rng: StdRng,
}

impl std::fmt::Debug for AbrPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbrPolicy")
            .field("mode", &self.options.mode)
            .field("q_values", &self.q_values.len())
            .field("states", &self.exploration.len())
            .finish()
    }
}

impl AbrPolicy {
    pub fn new(options: AbrOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            options,
            q_values: HashMap::new(),
            exploration: HashMap::new(),
            rng,
        }
    }

    pub fn options(&self) -> &AbrOptions {
        &self.options
    }

    /// Reduce a stage to its table key.
    pub fn quantize(&self, stage: &Stage) -> State {
        let opts = &self.options;
        let bps = stage.bandwidth_bps;
        let step = if bps < opts.bandwidth_fine_limit {
            opts.bandwidth_fine_step
        } else if bps < opts.bandwidth_medium_limit {
            opts.bandwidth_medium_step
        } else {
            opts.bandwidth_coarse_step
        };
        let step = step.max(1);

        let bucket_secs = opts.buffer_bucket.as_secs_f64().max(f64::EPSILON);
        let buffer_secs = stage.buffer().min(opts.max_buffer).as_secs_f64();

        State {
            bandwidth_bucket: bps / step * step,
            buffer_bucket: (buffer_secs / bucket_secs).floor() as u32,
            previous_quality: stage.previous_bps.unwrap_or(0),
        }
    }

    pub fn q_value(&self, state: State, action: Action) -> Option<f64> {
        self.q_values.get(&StateAction { state, action }).copied()
    }

    /// Exploration rate of `state`; states never visited explore fully.
    pub fn exploration_rate(&self, state: State) -> f64 {
        self.exploration
            .get(&state)
            .copied()
            .unwrap_or(self.options.initial_exploration)
    }

    /// Number of learned state/action pairs.
    pub fn table_len(&self) -> usize {
        self.q_values.len()
    }

    /// Reward of choosing `action_bps` under `stage`.
    pub fn reward(&self, stage: &Stage, action_bps: u64, candidates: &[u64]) -> f64 {
        let lowest = candidates.iter().min().is_some_and(|&min| min == action_bps);
        let scale_bps = candidates.iter().copied().max().unwrap_or(action_bps);
        reward(
            &self.options,
            &RewardInput {
                action_bps,
                bandwidth_bps: stage.bandwidth_bps,
                previous_bps: stage.previous_bps,
                lowest,
                telemetry: stage.telemetry,
                scale_bps,
            },
        )
    }

    /// Pick the variant for the next segment. `candidates` holds the bandwidth
    /// of every variant, indexed by variant.
    pub fn choose(&mut self, stage: &Stage, candidates: &[u64]) -> AbrDecision {
        let state = self.quantize(stage);
        let pinned = |variant: usize, reason: AbrReason| {
            let variant = variant.min(candidates.len().saturating_sub(1));
            AbrDecision {
                variant,
                reason,
                state,
                action: Action(candidates.get(variant).copied().unwrap_or(0)),
            }
        };

        if candidates.len() <= 1 {
            return pinned(0, AbrReason::SingleVariant);
        }
        match self.options.mode {
            AbrMode::Manual(idx) => return pinned(idx, AbrReason::Manual),
            AbrMode::Auto(Some(idx)) if stage.bandwidth_bps == 0 => {
                return pinned(idx, AbrReason::Initial);
            }
            AbrMode::Auto(_) => {}
        }

        self.seed_state(state, stage, candidates);

        let (min, max) = self.bounds();
        let q: Vec<f64> = candidates
            .iter()
            .map(|&bps| self.q_value(state, Action(bps)).unwrap_or(0.0))
            .collect();
        let rate = *self
            .exploration
            .entry(state)
            .or_insert(self.options.initial_exploration);

        let (variant, reason) = if self.rng.r#gen::<f64>() < rate {
            let normalized: Vec<f64> = q.iter().map(|&v| normalize(v, min, max)).collect();
            (self.sample_softmax(&normalized), AbrReason::Explore)
        } else {
            (argmax(&q), AbrReason::Exploit)
        };

        debug!(
            variant,
            bandwidth = candidates[variant],
            ?reason,
            exploration = rate,
            measured_bps = stage.bandwidth_bps,
            buffer_ms = stage.buffer().as_millis() as u64,
            "abr choose"
        );

        AbrDecision {
            variant,
            reason,
            state,
            action: Action(candidates[variant]),
        }
    }

    /// Learn from the realized outcome of `decision`.
    ///
    /// `after` holds the conditions measured once the segment was fetched.
    /// Returns the realized reward; pinned decisions are not learned from and
    /// return 0.
    pub fn update(&mut self, decision: &AbrDecision, after: &Stage, candidates: &[u64]) -> f64 {
        if !decision.is_learned() {
            return 0.0;
        }

        let previous =
            Some(decision.state.previous_quality).filter(|&previous| previous > 0);
        let realized = self.reward(&after.with_previous(previous), decision.action.0, candidates);

        let next_stage = after.with_previous(Some(decision.action.0));
        let next_state = self.quantize(&next_stage);
        self.seed_state(next_state, &next_stage, candidates);
        let best_next = candidates
            .iter()
            .filter_map(|&bps| self.q_value(next_state, Action(bps)))
            .fold(f64::NEG_INFINITY, f64::max);
        let best_next = if best_next.is_finite() { best_next } else { 0.0 };

        let key = StateAction {
            state: decision.state,
            action: decision.action,
        };
        let alpha = self.options.learning_rate;
        let old = self.q_values.get(&key).copied().unwrap_or(realized);
        let new = (1.0 - alpha) * old + alpha * (realized + self.options.discount * best_next);
        self.q_values.insert(key, new);

        let (min, max) = self.bounds();
        let delta = (new - old).abs() / (max - min).max(f64::EPSILON);
        let target = 2.0 / (1.0 + (-self.options.exploration_gain * delta).exp()) - 1.0;
        let step = self.options.exploration_step;
        let floor = self.options.min_exploration.clamp(0.0, 1.0);
        let rate = self
            .exploration
            .entry(decision.state)
            .or_insert(self.options.initial_exploration);
        *rate = (*rate + step * (target - *rate)).clamp(floor, 1.0);

        trace!(
            variant = decision.variant,
            realized,
            old,
            new,
            exploration = *rate,
            "abr update"
        );
        realized
    }

    fn seed_state(&mut self, state: State, stage: &Stage, candidates: &[u64]) {
        for &bps in candidates {
            let key = StateAction {
                state,
                action: Action(bps),
            };
            if !self.q_values.contains_key(&key) {
                let seed = self.reward(stage, bps, candidates);
                self.q_values.insert(key, seed);
            }
        }
    }

    /// Min and max over the whole Q table.
    fn bounds(&self) -> (f64, f64) {
        self.q_values
            .values()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    fn sample_softmax(&mut self, normalized: &[f64]) -> usize {
        let temperature = self.options.temperature.max(1e-6);
        let peak = normalized.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = normalized
            .iter()
            .map(|&v| ((v - peak) / temperature).exp())
            .collect();
        let total: f64 = weights.iter().sum();

        let mut pick = self.rng.r#gen::<f64>() * total;
        for (idx, weight) in weights.iter().enumerate() {
            if pick < *weight {
                return idx;
            }
            pick -= weight;
        }
        weights.len() - 1
    }
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let span = max - min;
    if span.is_finite() && span > f64::EPSILON {
        (value - min) / span
    } else {
        0.5
    }
}

/// Index of the highest value; ties keep the lowest index.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (idx, &value) in values.iter().enumerate().skip(1) {
        if value > values[best] {
            best = idx;
        }
    }
    best
}
