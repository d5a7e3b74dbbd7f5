#![forbid(unsafe_code)]

//! AES key cache keyed by key URI.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use crate::{DrmError, DrmResult};

/// What the key processor knows about the key it transforms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyContext {
    pub url: Url,
    pub iv: Option<[u8; 16]>,
}

/// Transforms raw key bytes after fetch, e.g. unwrapping a key that is itself
/// encrypted with an application-embedded key.
pub type KeyProcessor = Arc<dyn Fn(Bytes, &KeyContext) -> DrmResult<Bytes> + Send + Sync>;

/// Keys fetched once per URI and reused for every segment referencing it.
pub struct KeyCache {
    keys: Mutex<HashMap<Url, [u8; 16]>>,
    processor: Option<KeyProcessor>,
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("keys", &self.keys.lock().len())
            .field("processor", &self.processor.as_ref().map(|_| "KeyProcessor"))
            .finish()
    }
}

impl KeyCache {
    pub fn new(processor: Option<KeyProcessor>) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            processor,
        }
    }

    pub fn get(&self, url: &Url) -> Option<[u8; 16]> {
        self.keys.lock().get(url).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    /// Cached key for `url`, fetching and processing it on first use.
    ///
    /// The lock is not held while `fetch` runs; concurrent first uses of the
    /// same URI may both fetch, and the first stored key wins.
    pub fn get_or_fetch<F>(&self, url: &Url, iv: Option<[u8; 16]>, fetch: F) -> DrmResult<[u8; 16]>
    where
        F: FnOnce(&Url) -> DrmResult<Bytes>,
    {
        if let Some(key) = self.get(url) {
            return Ok(key);
        }

        let raw = fetch(url)?;
        let processed = match self.processor {
            Some(ref processor) => processor(
                raw,
                &KeyContext {
                    url: url.clone(),
                    iv,
                },
            )?,
            None => raw,
        };
        let key = <[u8; 16]>::try_from(&processed[..])
            .map_err(|_| DrmError::InvalidKeyLength(processed.len()))?;

        debug!(url = %url, processed = self.processor.is_some(), "key cached");
        Ok(*self.keys.lock().entry(url.clone()).or_insert(key))
    }
}
