#![forbid(unsafe_code)]

//! Per-variant playlist reload threads.
//!
//! Each variant gets its own thread that fetches, parses and merges the
//! variant's media playlist into the shared timeline. Live playlists are
//! reloaded every `target_duration * factor`, where the factor depends on
//! whether the variant is the one currently downloaded. A playlist that is no
//! longer live ends its thread after the merge.

use std::{sync::Arc, thread::JoinHandle, time::Duration};

use tracing::{debug, trace, warn};

use crate::{
    Downloader, HlsError, HlsResult, PlaylistParser,
    shared::Shared,
};

/// Parser shared by every reload thread.
pub(crate) type SharedParser = Arc<dyn PlaylistParser + Send + Sync>;

pub(crate) struct ReloadWorker {
    shared: Arc<Shared>,
    variant: usize,
    downloader: Arc<dyn Downloader>,
    parser: SharedParser,
}

impl ReloadWorker {
    pub fn new(
        shared: Arc<Shared>,
        variant: usize,
        downloader: Arc<dyn Downloader>,
        parser: SharedParser,
    ) -> Self {
        Self {
            shared,
            variant,
            downloader,
            parser,
        }
    }

    pub fn spawn(self) -> HlsResult<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(format!("tessera-reload-{}", self.variant))
            .spawn(move || self.run())
            .map_err(|e| HlsError::Fetch(format!("failed to spawn reload thread: {e}")))
    }

    fn run(self) {
        debug!(variant = self.variant, "reload: started");
        loop {
            if self.shared.cancel.is_cancelled() {
                break;
            }

            match self.reload_once() {
                Ok(()) => {}
                Err(_) if self.shared.cancel.is_cancelled() => break,
                Err(e) => {
                    warn!(variant = self.variant, error = %e, "reload: cycle skipped");
                    self.shared.events.emit_reload_failed(self.variant, &e.to_string());
                }
            }

            let Some(interval) = self.next_interval() else {
                debug!(variant = self.variant, "reload: playlist ended, stopping");
                break;
            };
            trace!(
                variant = self.variant,
                interval_ms = interval.as_millis() as u64,
                "reload: sleeping"
            );

            let guard = self.shared.state.lock();
            let (_, alive) =
                self.shared
                    .wait_while(&self.shared.reload, guard, interval, |_| true);
            if !alive {
                break;
            }
        }
        debug!(variant = self.variant, "reload: exited");
    }

    /// Fetch, parse and merge one playlist snapshot.
    fn reload_once(&self) -> HlsResult<()> {
        let url = &self.shared.variants[self.variant].url;
        let data = self.downloader.download(url)?;
        if self.shared.cancel.is_cancelled() {
            return Err(HlsError::Cancelled);
        }
        let playlist = self.parser.parse(self.variant, &data)?;
        if playlist.is_empty() {
            return Err(HlsError::PlaylistParse(format!(
                "playlist of variant {} has no segments",
                self.variant
            )));
        }

        let mut state = self.shared.state.lock();
        let outcome = state.timeline.merge(self.variant, &playlist);
        if outcome.became_ready {
            self.shared.ready.notify_all();
        }
        if outcome.added > 0 || outcome.pruned > 0 {
            self.shared.work.notify_all();
        }
        drop(state);

        self.shared.events.emit_playlist_reloaded(
            self.variant,
            outcome.added,
            outcome.pruned,
            playlist.live,
        );
        Ok(())
    }

    /// Time until the next reload, `None` once the playlist stopped being live.
    fn next_interval(&self) -> Option<Duration> {
        let state = self.shared.state.lock();
        let timeline = &state.timeline;
        if !timeline.is_variant_loaded(self.variant) {
            return Some(self.shared.options.retry_delay);
        }
        if !timeline.is_variant_live(self.variant) {
            return None;
        }
        let target = timeline.target_duration(self.variant).unwrap_or_default();
        let active = state
            .active_variant
            .unwrap_or_else(|| self.shared.options.abr.initial_variant())
            == self.variant;
        Some(self.shared.options.reload_interval(target, active))
    }
}
