//! Adaptive bitrate selection by tabular Q-learning.
//!
//! At every segment boundary the download engine describes the current
//! conditions as a [`Stage`] and asks [`AbrPolicy::choose`] for a variant.
//! Once the segment is fetched, [`AbrPolicy::update`] folds the realized
//! reward back into the Q table.
//!
//! ```rust
//! use std::time::Duration;
//! use tessera_abr::{AbrOptions, AbrPolicy, PlaybackTelemetry, Stage};
//!
//! let mut policy = AbrPolicy::new(AbrOptions::default().with_seed(7));
//! let candidates = [500_000, 1_500_000, 3_000_000];
//!
//! let before = Stage::new(1_000_000, PlaybackTelemetry::default());
//! let decision = policy.choose(&before, &candidates);
//!
//! let after = Stage::new(1_100_000, PlaybackTelemetry {
//!     time_in_buffer: Duration::from_secs(4),
//!     ..PlaybackTelemetry::default()
//! });
//! policy.update(&decision, &after, &candidates);
//! ```

#![forbid(unsafe_code)]

mod estimator;
mod policy;
pub mod reward;
mod types;

pub use estimator::{BandwidthEstimator, BandwidthMeter};
pub use policy::AbrPolicy;
pub use types::{
    AbrDecision, AbrMode, AbrOptions, AbrReason, Action, PlaybackTelemetry, Stage, State,
    StateAction,
};
