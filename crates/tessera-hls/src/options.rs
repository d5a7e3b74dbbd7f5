#![forbid(unsafe_code)]

use std::{collections::HashMap, time::Duration};

use derive_setters::Setters;
use tessera_abr::AbrOptions;
use tessera_drm::KeyProcessor;
use tessera_playlist::{DEFAULT_LIVE_START_SEGMENTS, DEFAULT_PRUNE_WINDOW};
use tessera_storage::DEFAULT_READ_TIMEOUT;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Encryption key handling configuration.
#[derive(Clone, Default)]
pub struct KeyOptions {
    /// Callback for processing (e.g. unwrapping) raw key bytes after fetch.
    pub key_processor: Option<KeyProcessor>,
    /// Query parameters to append to key URLs.
    pub query_params: Option<HashMap<String, String>>,
}

impl std::fmt::Debug for KeyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyOptions")
            .field(
                "key_processor",
                &self.key_processor.as_ref().map(|_| "KeyProcessor"),
            )
            .field("query_params", &self.query_params)
            .finish()
    }
}

impl KeyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set query parameters to append to key URLs.
    pub fn with_query_params(mut self, params: HashMap<String, String>) -> Self {
        self.query_params = Some(params);
        self
    }

    /// Set callback for processing raw key bytes after fetch.
    pub fn with_key_processor(mut self, processor: KeyProcessor) -> Self {
        self.key_processor = Some(processor);
        self
    }

    /// URL actually requested for `key_url`.
    pub fn fetch_url(&self, key_url: &Url) -> Url {
        let mut url = key_url.clone();
        if let Some(ref params) = self.query_params {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        url
    }
}

/// Configuration of a [`SegmentStorage`](crate::SegmentStorage).
#[derive(Clone, Setters)]
#[setters(prefix = "with_", strip_option)]
pub struct HlsOptions {
    /// Variant selection configuration.
    pub abr: AbrOptions,
    /// Encryption key handling.
    pub keys: KeyOptions,
    /// Readers queued ahead of the consumer, the in-flight one included.
    pub max_buffered_segments: usize,
    /// Absolute limit for one blocking `SegmentReader::read`.
    pub read_timeout: Duration,
    /// Live entries kept behind the download pointer.
    pub prune_window: u64,
    /// Distance from the live edge where playback starts.
    pub live_start_segments: usize,
    /// Reload period of the active variant, as a fraction of its target duration.
    pub active_reload_factor: f64,
    /// Reload period of the other variants, as a fraction of their target duration.
    pub inactive_reload_factor: f64,
    /// Lower bound of any reload period.
    pub min_reload_interval: Duration,
    /// Pause before a failed segment is attempted again.
    pub retry_delay: Duration,
    /// Continue the CBC chain across adjacent segments sharing a key when the
    /// playlist gives no IV.
    pub chain_iv: bool,
    /// Capacity of the events broadcast channel.
    pub events_channel_capacity: usize,
    /// Cancellation token for graceful shutdown.
    pub cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for HlsOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HlsOptions")
            .field("abr", &self.abr)
            .field("keys", &self.keys)
            .field("max_buffered_segments", &self.max_buffered_segments)
            .field("read_timeout", &self.read_timeout)
            .field("prune_window", &self.prune_window)
            .field("live_start_segments", &self.live_start_segments)
            .field("active_reload_factor", &self.active_reload_factor)
            .field("inactive_reload_factor", &self.inactive_reload_factor)
            .field("chain_iv", &self.chain_iv)
            .finish_non_exhaustive()
    }
}

impl Default for HlsOptions {
    fn default() -> Self {
        Self {
            abr: AbrOptions::default(),
            keys: KeyOptions::default(),
            max_buffered_segments: 3,
            read_timeout: DEFAULT_READ_TIMEOUT,
            prune_window: DEFAULT_PRUNE_WINDOW,
            live_start_segments: DEFAULT_LIVE_START_SEGMENTS,
            active_reload_factor: 0.5,
            inactive_reload_factor: 1.5,
            min_reload_interval: Duration::from_millis(100),
            retry_delay: Duration::from_millis(500),
            chain_iv: false,
            events_channel_capacity: 128,
            cancel: None,
        }
    }
}

impl HlsOptions {
    /// Reload period for a variant with `target_duration`.
    ///
    /// A factor that yields no representable period falls back to the
    /// target duration itself.
    pub fn reload_interval(&self, target_duration: Duration, active: bool) -> Duration {
        let factor = if active {
            self.active_reload_factor
        } else {
            self.inactive_reload_factor
        };
        Duration::try_from_secs_f64(target_duration.as_secs_f64() * factor.max(0.0))
            .unwrap_or(target_duration)
            .max(self.min_reload_interval)
    }
}
