//! Cross-crate scenarios: playlists, timeline, ABR policy and download engine
//! running together over an in-memory transport.

mod common;
mod tessera_hls;
