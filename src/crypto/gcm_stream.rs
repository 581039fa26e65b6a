//! Incremental AES-256-GCM contexts for streaming file encryption
//!
//! The on-disk format carries a single nonce and a single authentication tag
//! over an arbitrarily large file, so the codec cannot buffer whole files to
//! use a one-shot AEAD. These contexts drive the same primitives AES-GCM is
//! assembled from (CTR keystream + GHASH accumulator + masked tag) and accept
//! plaintext/ciphertext in chunks of any size.
//!
//! No associated data is used; the framing is `nonce || ciphertext || tag`.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes256;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{StrongboxError, StrongboxResult};

/// AES-GCM authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// GHASH/AES block size in bytes
const BLOCK_SIZE: usize = 16;

/// Most ciphertext one nonce can carry: 2^32 - 2 counter blocks
///
/// Past this point the 32-bit counter would wrap back to J0 and reuse
/// keystream, including the tag-mask block, so both contexts refuse it.
const MAX_CIPHERTEXT_LEN: u64 = ((1u64 << 32) - 2) * BLOCK_SIZE as u64;

type Ctr32 = ctr::Ctr32BE<Aes256>;

/// Shared GCM state: keystream generator, authenticator, and tag mask
struct GcmState {
    ctr: Ctr32,
    ghash: GHash,
    tag_mask: [u8; TAG_SIZE],
    /// Partial GHASH block awaiting more ciphertext
    pending: [u8; BLOCK_SIZE],
    pending_len: usize,
    /// Total ciphertext length absorbed so far
    ct_len: u64,
}

impl GcmState {
    fn new(key: &[u8; 32], nonce: &[u8; 12]) -> Self {
        let cipher = Aes256::new(GenericArray::from_slice(key));

        // Hash subkey H = E_K(0^128)
        let mut h = GenericArray::default();
        cipher.encrypt_block(&mut h);
        let ghash = GHash::new(&h);
        h.as_mut_slice().zeroize();

        // J0 = nonce || 0x00000001 for 96-bit nonces; the first keystream
        // block E_K(J0) masks the tag, payload encryption starts at J0+1
        let mut j0 = [0u8; BLOCK_SIZE];
        j0[..12].copy_from_slice(nonce);
        j0[15] = 1;

        let mut ctr = Ctr32::new(GenericArray::from_slice(key), GenericArray::from_slice(&j0));
        let mut tag_mask = [0u8; TAG_SIZE];
        ctr.apply_keystream(&mut tag_mask);

        Self {
            ctr,
            ghash,
            tag_mask,
            pending: [0u8; BLOCK_SIZE],
            pending_len: 0,
            ct_len: 0,
        }
    }

    /// Reject chunks that would run the stream past the GCM length bound
    fn check_length(&self, additional: usize) -> StrongboxResult<()> {
        if self.ct_len.saturating_add(additional as u64) > MAX_CIPHERTEXT_LEN {
            return Err(StrongboxError::Crypto(
                "input exceeds the AES-GCM per-nonce length limit".into(),
            ));
        }
        Ok(())
    }

    /// Feed ciphertext bytes into the GHASH accumulator
    fn absorb(&mut self, data: &[u8]) {
        self.ct_len += data.len() as u64;
        let mut rest = data;

        if self.pending_len > 0 {
            let take = (BLOCK_SIZE - self.pending_len).min(rest.len());
            self.pending[self.pending_len..self.pending_len + take]
                .copy_from_slice(&rest[..take]);
            self.pending_len += take;
            rest = &rest[take..];

            if self.pending_len == BLOCK_SIZE {
                self.ghash.update(&[self.pending.into()]);
                self.pending_len = 0;
            }
        }

        let full = rest.len() - rest.len() % BLOCK_SIZE;
        for block in rest[..full].chunks_exact(BLOCK_SIZE) {
            self.ghash.update(&[GenericArray::clone_from_slice(block)]);
        }

        let tail = &rest[full..];
        self.pending[..tail.len()].copy_from_slice(tail);
        self.pending_len = tail.len();
    }

    /// Flush the partial block, absorb the length block, and produce the tag
    fn compute_tag(mut self) -> [u8; TAG_SIZE] {
        if self.pending_len > 0 {
            self.pending[self.pending_len..].fill(0);
            self.ghash.update(&[self.pending.into()]);
            self.pending_len = 0;
        }

        // len(A) || len(C), both in bits; no associated data is used
        let mut len_block = [0u8; BLOCK_SIZE];
        len_block[8..].copy_from_slice(&(self.ct_len * 8).to_be_bytes());
        self.ghash.update(&[len_block.into()]);

        let mut tag: [u8; TAG_SIZE] = self.ghash.finalize().into();
        for (t, m) in tag.iter_mut().zip(self.tag_mask.iter()) {
            *t ^= m;
        }
        tag
    }
}

/// Incremental AES-256-GCM encryption context
///
/// Encrypts chunks in place via [`StreamEncryptor::update`]; the final call to
/// [`StreamEncryptor::finalize`] yields the 16-byte authentication tag the
/// caller must append to the output.
pub struct StreamEncryptor {
    state: GcmState,
}

impl core::fmt::Debug for StreamEncryptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StreamEncryptor").finish_non_exhaustive()
    }
}

impl StreamEncryptor {
    /// Create an encryption context bound to a key and a fresh nonce
    pub(crate) fn new(key: &[u8; 32], nonce: &[u8; 12]) -> Self {
        Self {
            state: GcmState::new(key, nonce),
        }
    }

    /// Encrypt the next chunk of plaintext in place
    ///
    /// # Errors
    ///
    /// Returns [`StrongboxError::Crypto`] once the total input would pass the
    /// per-nonce GCM length limit.
    pub fn update(&mut self, chunk: &mut [u8]) -> StrongboxResult<()> {
        self.state.check_length(chunk.len())?;
        self.state.ctr.apply_keystream(chunk);
        self.state.absorb(chunk);
        Ok(())
    }

    /// Finish the stream and return the authentication tag
    pub fn finalize(self) -> [u8; TAG_SIZE] {
        self.state.compute_tag()
    }
}

/// Incremental AES-256-GCM decryption context
///
/// Decrypts chunks in place via [`StreamDecryptor::update`]. The caller must
/// invoke [`StreamDecryptor::finalize`] with the trailing tag; until it
/// succeeds, no decrypted output may be surfaced.
pub struct StreamDecryptor {
    state: GcmState,
}

impl core::fmt::Debug for StreamDecryptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StreamDecryptor").finish_non_exhaustive()
    }
}

impl StreamDecryptor {
    /// Create a decryption context bound to a key and the file's nonce
    pub(crate) fn new(key: &[u8; 32], nonce: &[u8; 12]) -> Self {
        Self {
            state: GcmState::new(key, nonce),
        }
    }

    /// Decrypt the next chunk of ciphertext in place
    ///
    /// # Errors
    ///
    /// Returns [`StrongboxError::Crypto`] once the total input would pass the
    /// per-nonce GCM length limit.
    pub fn update(&mut self, chunk: &mut [u8]) -> StrongboxResult<()> {
        self.state.check_length(chunk.len())?;
        // GHASH runs over ciphertext, so absorb before decrypting
        self.state.absorb(chunk);
        self.state.ctr.apply_keystream(chunk);
        Ok(())
    }

    /// Verify the authentication tag in constant time
    ///
    /// # Errors
    ///
    /// Returns [`StrongboxError::BadTag`] on any mismatch. The caller must
    /// discard all output produced by [`StreamDecryptor::update`] in that case.
    pub fn finalize(self, expected_tag: &[u8]) -> StrongboxResult<()> {
        if expected_tag.len() != TAG_SIZE {
            return Err(StrongboxError::BadTag);
        }
        let tag = self.state.compute_tag();
        if tag.ct_eq(expected_tag).into() {
            Ok(())
        } else {
            Err(StrongboxError::BadTag)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes_gcm::aead::{Aead, KeyInit as AeadKeyInit, Payload};
    use aes_gcm::{Aes256Gcm, Nonce};

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    /// McGrew/Viega AES-256-GCM test case 13: empty plaintext
    #[test]
    fn test_nist_vector_empty() {
        let key = [0u8; 32];
        let nonce = [0u8; 12];
        let enc = StreamEncryptor::new(&key, &nonce);
        let tag = enc.finalize();
        assert_eq!(tag.to_vec(), hex("530f8afbc74536b9a963b4f1c4cb738b"));
    }

    /// McGrew/Viega AES-256-GCM test case 14: one zero block
    #[test]
    fn test_nist_vector_one_block() {
        let key = [0u8; 32];
        let nonce = [0u8; 12];
        let mut block = [0u8; 16];

        let mut enc = StreamEncryptor::new(&key, &nonce);
        enc.update(&mut block).unwrap();
        let tag = enc.finalize();

        assert_eq!(block.to_vec(), hex("cea7403d4d606b6e074ec5d3baf39d18"));
        assert_eq!(tag.to_vec(), hex("d0d1c8a799996bf0265b98b5d48ab919"));
    }

    /// The streamed output must match the one-shot aes-gcm crate exactly,
    /// regardless of how the input is chunked.
    #[test]
    fn test_matches_one_shot_aes_gcm() {
        let mut key = [0u8; 32];
        let mut nonce = [0u8; 12];
        crate::crypto::random::fill(&mut key);
        crate::crypto::random::fill(&mut nonce);

        let plaintext: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();

        // Streamed, with deliberately awkward chunk sizes
        let mut streamed = plaintext.clone();
        let mut enc = StreamEncryptor::new(&key, &nonce);
        let mut offset = 0;
        for size in [1usize, 15, 16, 17, 64, 1000, 8887] {
            let end = (offset + size).min(streamed.len());
            enc.update(&mut streamed[offset..end]).unwrap();
            offset = end;
        }
        enc.update(&mut streamed[offset..]).unwrap();
        let tag = enc.finalize();
        streamed.extend_from_slice(&tag);

        // One-shot reference
        let cipher = Aes256Gcm::new_from_slice(&key).unwrap();
        let reference = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &[],
                },
            )
            .unwrap();

        assert_eq!(streamed, reference);
    }

    #[test]
    fn test_round_trip_chunked() {
        let key = crate::crypto::random::key_32();
        let nonce = crate::crypto::random::nonce_12();
        let plaintext: Vec<u8> = (0..4096).map(|i| (i * 7 % 256) as u8).collect();

        let mut data = plaintext.clone();
        let mut enc = StreamEncryptor::new(key.as_bytes(), &nonce);
        for chunk in data.chunks_mut(100) {
            enc.update(chunk).unwrap();
        }
        let tag = enc.finalize();

        let mut dec = StreamDecryptor::new(key.as_bytes(), &nonce);
        for chunk in data.chunks_mut(333) {
            dec.update(chunk).unwrap();
        }
        dec.finalize(&tag).unwrap();

        assert_eq!(data, plaintext);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = crate::crypto::random::key_32();
        let nonce = crate::crypto::random::nonce_12();
        let mut data = vec![42u8; 1000];

        let mut enc = StreamEncryptor::new(key.as_bytes(), &nonce);
        enc.update(&mut data).unwrap();
        let tag = enc.finalize();

        data[500] ^= 0x01;

        let mut dec = StreamDecryptor::new(key.as_bytes(), &nonce);
        dec.update(&mut data).unwrap();
        let result = dec.finalize(&tag);
        assert!(matches!(result, Err(StrongboxError::BadTag)));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = crate::crypto::random::key_32();
        let nonce = crate::crypto::random::nonce_12();
        let mut data = vec![7u8; 64];

        let mut enc = StreamEncryptor::new(key.as_bytes(), &nonce);
        enc.update(&mut data).unwrap();
        let mut tag = enc.finalize();
        tag[0] ^= 0x80;

        let mut dec = StreamDecryptor::new(key.as_bytes(), &nonce);
        dec.update(&mut data).unwrap();
        assert!(matches!(dec.finalize(&tag), Err(StrongboxError::BadTag)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let key_a = crate::crypto::random::key_32();
        let key_b = crate::crypto::random::key_32();
        let nonce = crate::crypto::random::nonce_12();
        let mut data = vec![1u8; 128];

        let mut enc = StreamEncryptor::new(key_a.as_bytes(), &nonce);
        enc.update(&mut data).unwrap();
        let tag = enc.finalize();

        let mut dec = StreamDecryptor::new(key_b.as_bytes(), &nonce);
        dec.update(&mut data).unwrap();
        assert!(matches!(dec.finalize(&tag), Err(StrongboxError::BadTag)));
    }

    #[test]
    fn test_length_limit_refuses_counter_wrap() {
        let key = crate::crypto::random::key_32();
        let nonce = crate::crypto::random::nonce_12();
        let mut chunk = [0u8; BLOCK_SIZE];

        // A chunk that lands exactly on the bound is accepted
        let mut enc = StreamEncryptor::new(key.as_bytes(), &nonce);
        enc.state.ct_len = MAX_CIPHERTEXT_LEN - BLOCK_SIZE as u64;
        enc.update(&mut chunk).unwrap();

        // One more byte would wrap the counter back onto the tag mask
        let mut one = [0u8; 1];
        assert!(matches!(
            enc.update(&mut one),
            Err(StrongboxError::Crypto(_))
        ));

        let mut dec = StreamDecryptor::new(key.as_bytes(), &nonce);
        dec.state.ct_len = MAX_CIPHERTEXT_LEN;
        assert!(matches!(
            dec.update(&mut chunk),
            Err(StrongboxError::Crypto(_))
        ));
    }

    #[test]
    fn test_truncated_tag_rejected() {
        let key = crate::crypto::random::key_32();
        let nonce = crate::crypto::random::nonce_12();
        let enc = StreamEncryptor::new(key.as_bytes(), &nonce);
        let tag = enc.finalize();

        let dec = StreamDecryptor::new(key.as_bytes(), &nonce);
        assert!(matches!(
            dec.finalize(&tag[..8]),
            Err(StrongboxError::BadTag)
        ));
    }
}
