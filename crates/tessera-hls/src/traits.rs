#![forbid(unsafe_code)]

//! Collaborators the pipeline is generic over.

use bytes::Bytes;
#[cfg(test)]
use mockall::automock;
use tessera_abr::BandwidthEstimator;
use tessera_playlist::MediaPlaylist;
use url::Url;

use crate::HlsResult;

/// Verdict of a streaming chunk callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChunkControl {
    Continue,
    Abort,
}

/// Byte transport with bandwidth bookkeeping.
///
/// Implementations are called from the reload threads and the download thread
/// concurrently and must not block indefinitely: the pipeline observes
/// cancellation only between chunks.
pub trait Downloader: BandwidthEstimator + Send + Sync {
    /// Fetch a whole resource (playlists, keys).
    fn download(&self, url: &Url) -> HlsResult<Bytes>;

    /// Stream `byte_length` bytes starting at `byte_offset` into `on_chunk`.
    ///
    /// A `byte_length` of 0 means the whole resource. Stops early once
    /// `on_chunk` returns [`ChunkControl::Abort`]. Returns the number of
    /// bytes delivered.
    fn download_range(
        &self,
        url: &Url,
        byte_offset: u64,
        byte_length: u64,
        on_chunk: &mut dyn FnMut(&[u8]) -> ChunkControl,
    ) -> HlsResult<u64>;
}

/// Media playlist text parser.
#[cfg_attr(test, automock)]
pub trait PlaylistParser {
    /// Parse the fetched bytes of `variant`'s media playlist.
    fn parse(&self, variant: usize, data: &[u8]) -> HlsResult<MediaPlaylist>;
}
