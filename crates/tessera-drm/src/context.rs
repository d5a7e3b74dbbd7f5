#![forbid(unsafe_code)]

/// AES-128-CBC key and the IV of the next block to decrypt.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct DecryptContext {
    /// AES-128 key (16 bytes).
    pub key: [u8; 16],
    /// Initialization vector; advanced to the last ciphertext block after
    /// every intermediate chunk.
    pub iv: [u8; 16],
}

impl DecryptContext {
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }
}
