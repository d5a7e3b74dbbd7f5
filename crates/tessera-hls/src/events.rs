use std::time::Duration;

use tessera_abr::AbrReason;
use tokio::sync::broadcast;

#[derive(Clone, Debug, PartialEq)]
pub enum HlsEvent {
    PlaylistReloaded {
        variant: usize,
        added: usize,
        pruned: usize,
        live: bool,
    },
    ReloadFailed {
        variant: usize,
        error: String,
    },
    VariantSelected {
        from_variant: Option<usize>,
        to_variant: usize,
        reason: AbrReason,
    },
    SegmentStart {
        variant: usize,
        media_sequence: u64,
        byte_offset: u64,
    },
    SegmentComplete {
        variant: usize,
        media_sequence: u64,
        bytes_transferred: u64,
        duration: Duration,
    },
    SegmentFailed {
        variant: usize,
        media_sequence: u64,
        error: String,
    },
    SegmentSkipped {
        media_sequence: u64,
    },
    KeyFetch {
        key_url: String,
        success: bool,
        cached: bool,
    },
    Seek {
        requested: Duration,
        position: Duration,
    },
    EndOfStream,
}

#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<HlsEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HlsEvent> {
        self.tx.subscribe()
    }

    pub fn emit_playlist_reloaded(&self, variant: usize, added: usize, pruned: usize, live: bool) {
        let _ = self.tx.send(HlsEvent::PlaylistReloaded {
            variant,
            added,
            pruned,
            live,
        });
    }

    pub fn emit_reload_failed(&self, variant: usize, error: &str) {
        let _ = self.tx.send(HlsEvent::ReloadFailed {
            variant,
            error: error.to_string(),
        });
    }

    pub fn emit_variant_selected(&self, from: Option<usize>, to: usize, reason: AbrReason) {
        let _ = self.tx.send(HlsEvent::VariantSelected {
            from_variant: from,
            to_variant: to,
            reason,
        });
    }

    pub fn emit_segment_start(&self, variant: usize, media_sequence: u64, byte_offset: u64) {
        let _ = self.tx.send(HlsEvent::SegmentStart {
            variant,
            media_sequence,
            byte_offset,
        });
    }

    pub fn emit_segment_complete(
        &self,
        variant: usize,
        media_sequence: u64,
        bytes: u64,
        duration: Duration,
    ) {
        let _ = self.tx.send(HlsEvent::SegmentComplete {
            variant,
            media_sequence,
            bytes_transferred: bytes,
            duration,
        });
    }

    pub fn emit_segment_failed(&self, variant: usize, media_sequence: u64, error: &str) {
        let _ = self.tx.send(HlsEvent::SegmentFailed {
            variant,
            media_sequence,
            error: error.to_string(),
        });
    }

    pub fn emit_segment_skipped(&self, media_sequence: u64) {
        let _ = self.tx.send(HlsEvent::SegmentSkipped { media_sequence });
    }

    pub fn emit_key_fetch(&self, key_url: &str, success: bool, cached: bool) {
        let _ = self.tx.send(HlsEvent::KeyFetch {
            key_url: key_url.to_string(),
            success,
            cached,
        });
    }

    pub fn emit_seek(&self, requested: Duration, position: Duration) {
        let _ = self.tx.send(HlsEvent::Seek {
            requested,
            position,
        });
    }

    pub fn emit_end_of_stream(&self) {
        let _ = self.tx.send(HlsEvent::EndOfStream);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(128)
    }
}
