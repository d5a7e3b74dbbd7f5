#![forbid(unsafe_code)]

//! AES-128-CBC decryption for encrypted HLS segments.
//!
//! - [`decrypt`] for a complete ciphertext
//! - [`ChunkDecryptor`] for ciphertext streamed in arbitrary pieces, with the
//!   final CBC block exposed for IV chaining into the next segment
//! - [`KeyCache`] fetching each key URI once, with an optional
//!   [`KeyProcessor`] for keys that are themselves wrapped

mod context;
mod decrypt;
mod error;
mod keys;

pub use context::DecryptContext;
pub use decrypt::{AES_BLOCK_SIZE, ChunkDecryptor, decrypt, decrypt_chunk};
pub use error::{DrmError, DrmResult};
pub use keys::{KeyCache, KeyContext, KeyProcessor};
