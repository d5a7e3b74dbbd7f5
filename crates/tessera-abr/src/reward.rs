//! Reward shaping.
//!
//! `reward = quality + switch + freeze`, every term `<= 0`. Bandwidths are
//! divided by `scale` (the highest candidate bandwidth) so the terms of
//! streams with very different bitrates stay comparable.

use std::time::Duration;

use crate::{AbrOptions, PlaybackTelemetry};

/// Inputs of one reward evaluation.
#[derive(Clone, Copy, Debug)]
pub struct RewardInput {
    /// Bandwidth of the evaluated action.
    pub action_bps: u64,
    /// Measured bandwidth.
    pub bandwidth_bps: u64,
    pub previous_bps: Option<u64>,
    /// The action is the lowest-quality candidate.
    pub lowest: bool,
    pub telemetry: PlaybackTelemetry,
    /// Highest candidate bandwidth.
    pub scale_bps: u64,
}

/// Share of the measured bandwidth worth targeting at the given buffer level.
///
/// Grows linearly from `min_buffer_factor` (empty buffer) to 1
/// (`target_buffer` and above).
pub fn buffer_factor(options: &AbrOptions, buffer: Duration) -> f64 {
    let target = options.target_buffer.as_secs_f64();
    let fill = if target > 0.0 {
        (buffer.as_secs_f64() / target).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let floor = options.min_buffer_factor.clamp(0.0, 1.0);
    floor + (1.0 - floor) * fill
}

/// Buffer-aware bandwidth target (bits per second).
pub fn bandwidth_target(options: &AbrOptions, bandwidth_bps: u64, buffer: Duration) -> f64 {
    bandwidth_bps as f64 * buffer_factor(options, buffer)
}

/// Penalty for deviating from the bandwidth target.
pub fn quality_term(options: &AbrOptions, action_bps: u64, target_bps: f64, scale_bps: u64) -> f64 {
    -options.quality_weight * (action_bps as f64 - target_bps).abs() / scale(scale_bps)
}

/// Penalty for the jump from the previous choice.
pub fn switch_term(
    options: &AbrOptions,
    action_bps: u64,
    previous_bps: Option<u64>,
    scale_bps: u64,
) -> f64 {
    let Some(previous) = previous_bps else {
        return 0.0;
    };
    -options.switch_weight * action_bps.abs_diff(previous) as f64 / scale(scale_bps)
}

/// Penalty for picking the lowest variant while playback has been freezing.
///
/// Grows with the accumulated freeze duration and the freeze count, decays
/// exponentially with the time since the last freeze.
pub fn freeze_term(options: &AbrOptions, lowest: bool, telemetry: &PlaybackTelemetry) -> f64 {
    if !lowest || telemetry.number_of_freezes == 0 {
        return 0.0;
    }
    let unit = options.freeze_unit.as_secs_f64().max(f64::EPSILON);
    let severity =
        telemetry.total_freeze_duration.as_secs_f64() / unit + f64::from(telemetry.number_of_freezes);
    let decay = options.freeze_decay.as_secs_f64().max(f64::EPSILON);
    let recency = (-telemetry.time_since_last_freeze.as_secs_f64() / decay).exp();
    -options.freeze_weight * severity * recency
}

pub fn reward(options: &AbrOptions, input: &RewardInput) -> f64 {
    let target = bandwidth_target(options, input.bandwidth_bps, input.telemetry.time_in_buffer);
    quality_term(options, input.action_bps, target, input.scale_bps)
        + switch_term(options, input.action_bps, input.previous_bps, input.scale_bps)
        + freeze_term(options, input.lowest, &input.telemetry)
}

fn scale(scale_bps: u64) -> f64 {
    scale_bps.max(1) as f64
}
