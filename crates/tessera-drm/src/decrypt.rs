#![forbid(unsafe_code)]

//! AES-128-CBC decryption of whole segments and of streamed chunks.

use aes::Aes128;
use cbc::{
    Decryptor,
    cipher::{
        BlockDecryptMut, KeyIvInit,
        block_padding::{NoPadding, Pkcs7},
    },
};
use tracing::trace;

use crate::{DecryptContext, DrmError, DrmResult};

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Decrypt a complete AES-128-CBC ciphertext and strip its PKCS#7 padding.
pub fn decrypt(key: &[u8; 16], iv: &[u8; 16], ciphertext: &[u8]) -> DrmResult<Vec<u8>> {
    let mut ctx = DecryptContext::new(*key, *iv);
    let mut output = vec![0u8; ciphertext.len()];
    let written = decrypt_chunk(ciphertext, &mut output, &mut ctx, true)?;
    output.truncate(written);
    Ok(output)
}

/// Decrypt one block-aligned chunk of a CBC stream into `output`.
///
/// Intermediate chunks decrypt block by block and advance `ctx.iv` to their
/// last ciphertext block. The last chunk (`is_last`) also removes PKCS#7
/// padding. Returns the number of plaintext bytes written.
pub fn decrypt_chunk(
    input: &[u8],
    output: &mut [u8],
    ctx: &mut DecryptContext,
    is_last: bool,
) -> DrmResult<usize> {
    if input.is_empty() {
        return Ok(0);
    }

    if !input.len().is_multiple_of(AES_BLOCK_SIZE) {
        return Err(DrmError::DecryptFailed(format!(
            "input length {} is not aligned to AES block size {}",
            input.len(),
            AES_BLOCK_SIZE
        )));
    }
    if output.len() < input.len() {
        return Err(DrmError::DecryptFailed(format!(
            "output buffer of {} bytes is smaller than input of {} bytes",
            output.len(),
            input.len()
        )));
    }

    let next_iv = last_block(input);
    output[..input.len()].copy_from_slice(input);
    let decryptor = Decryptor::<Aes128>::new((&ctx.key).into(), (&ctx.iv).into());

    let written = if is_last {
        decryptor
            .decrypt_padded_mut::<Pkcs7>(&mut output[..input.len()])
            .map_err(|e| DrmError::DecryptFailed(format!("PKCS7 unpad failed: {e}")))?
            .len()
    } else {
        let written = decryptor
            .decrypt_padded_mut::<NoPadding>(&mut output[..input.len()])
            .map_err(|e| DrmError::DecryptFailed(format!("CBC decrypt failed: {e}")))?
            .len();
        ctx.iv = next_iv;
        written
    };

    trace!(encrypted = input.len(), decrypted = written, is_last, "aes128_cbc: chunk");
    Ok(written)
}

fn last_block(input: &[u8]) -> [u8; AES_BLOCK_SIZE] {
    let mut block = [0u8; AES_BLOCK_SIZE];
    block.copy_from_slice(&input[input.len() - AES_BLOCK_SIZE..]);
    block
}

/// Streaming decryptor for one segment.
///
/// Ciphertext arrives in arbitrary pieces. `update` returns the plaintext of
/// every complete block except the final one, which is held back until
/// `finish` can strip the padding.
#[derive(Debug)]
pub struct ChunkDecryptor {
    ctx: DecryptContext,
    pending: Vec<u8>,
    finished: bool,
}

impl ChunkDecryptor {
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self {
            ctx: DecryptContext::new(key, iv),
            pending: Vec::with_capacity(2 * AES_BLOCK_SIZE),
            finished: false,
        }
    }

    pub fn update(&mut self, input: &[u8]) -> DrmResult<Vec<u8>> {
        if self.finished {
            return Err(DrmError::DecryptFailed("update after finish".to_string()));
        }
        self.pending.extend_from_slice(input);

        let aligned = self.pending.len() / AES_BLOCK_SIZE * AES_BLOCK_SIZE;
        let ready = if aligned == self.pending.len() {
            aligned.saturating_sub(AES_BLOCK_SIZE)
        } else {
            aligned
        };
        if ready == 0 {
            return Ok(Vec::new());
        }

        let chunk: Vec<u8> = self.pending.drain(..ready).collect();
        let mut output = vec![0u8; ready];
        let written = decrypt_chunk(&chunk, &mut output, &mut self.ctx, false)?;
        output.truncate(written);
        Ok(output)
    }

    /// Decrypt the held-back tail and strip the padding.
    ///
    /// Afterwards [`next_iv`](Self::next_iv) holds the last ciphertext block.
    pub fn finish(&mut self) -> DrmResult<Vec<u8>> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.finished = true;
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let tail = std::mem::take(&mut self.pending);
        let next_iv = if tail.len() >= AES_BLOCK_SIZE {
            Some(last_block(&tail))
        } else {
            None
        };
        let mut output = vec![0u8; tail.len()];
        let written = decrypt_chunk(&tail, &mut output, &mut self.ctx, true)?;
        output.truncate(written);
        if let Some(iv) = next_iv {
            self.ctx.iv = iv;
        }
        Ok(output)
    }

    /// IV continuing the CBC chain after everything decrypted so far.
    pub fn next_iv(&self) -> [u8; 16] {
        self.ctx.iv
    }
}

#[cfg(test)]
mod tests {
    use cbc::{
        Encryptor,
        cipher::{BlockEncryptMut, block_padding::Pkcs7},
    };
    use rstest::rstest;

    use super::*;

    fn encrypt(plaintext: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
        let encryptor = Encryptor::<Aes128>::new(key.into(), iv.into());
        let padded_len = plaintext.len() + (AES_BLOCK_SIZE - plaintext.len() % AES_BLOCK_SIZE);
        let mut buf = vec![0u8; padded_len];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        encryptor
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
            .unwrap()
            .to_vec()
    }

    #[test]
    fn whole_segment_round_trip() {
        let key = [0x42u8; 16];
        let iv = [0x13u8; 16];
        let plaintext = b"Hello, segment world! This is AES-128-CBC.";

        let ciphertext = encrypt(plaintext, &key, &iv);
        assert_eq!(decrypt(&key, &iv, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn unaligned_ciphertext_fails() {
        let result = decrypt(&[0u8; 16], &[0u8; 16], &[0u8; 15]);
        assert!(matches!(result, Err(DrmError::DecryptFailed(_))));
    }

    #[test]
    fn exact_block_plaintext_gets_full_padding_block() {
        let key = [0xAAu8; 16];
        let iv = [0xBBu8; 16];
        let plaintext = [0x55u8; 16];

        let ciphertext = encrypt(&plaintext, &key, &iv);
        assert_eq!(ciphertext.len(), 32);
        assert_eq!(decrypt(&key, &iv, &ciphertext).unwrap(), plaintext);
    }

    #[rstest]
    #[case(1)]
    #[case(7)]
    #[case(16)]
    #[case(33)]
    #[case(1000)]
    fn streamed_pieces_match_whole_decrypt(#[case] piece: usize) {
        let key = [0x77u8; 16];
        let iv = [0x33u8; 16];
        let plaintext: Vec<u8> = (0..517).map(|i| (i % 251) as u8).collect();
        let ciphertext = encrypt(&plaintext, &key, &iv);

        let mut decryptor = ChunkDecryptor::new(key, iv);
        let mut out = Vec::new();
        for chunk in ciphertext.chunks(piece) {
            out.extend(decryptor.update(chunk).unwrap());
        }
        out.extend(decryptor.finish().unwrap());

        assert_eq!(out, plaintext);
        assert_eq!(decryptor.next_iv(), last_block(&ciphertext));
    }

    #[test]
    fn chained_iv_continues_next_segment() {
        let key = [0x01u8; 16];
        let iv = [0x02u8; 16];
        let first = encrypt(&[1u8; 40], &key, &iv);
        let chained_iv = last_block(&first);
        let second = encrypt(&[2u8; 40], &key, &chained_iv);

        let mut decryptor = ChunkDecryptor::new(key, iv);
        decryptor.update(&first).unwrap();
        decryptor.finish().unwrap();

        assert_eq!(decrypt(&key, &decryptor.next_iv(), &second).unwrap(), vec![2u8; 40]);
    }

    #[test]
    fn truncated_stream_fails_on_finish() {
        let key = [0x09u8; 16];
        let iv = [0x08u8; 16];
        let ciphertext = encrypt(&[3u8; 64], &key, &iv);

        let mut decryptor = ChunkDecryptor::new(key, iv);
        decryptor.update(&ciphertext[..ciphertext.len() - 5]).unwrap();
        assert!(decryptor.finish().is_err());
    }
}
