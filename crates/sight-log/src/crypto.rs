//! AES-256-CBC encryption with a SHA-256-derived key and password
//! verification header (spec §4.8.2, §4.8.4).
//!
//! Grounded in `original_source/libs/__/core/crypto/{aes256,sha256}.cpp`:
//! key = `SHA256(password)`, a fixed (zero) IV, and a stored verification
//! value so `extract` can detect the wrong password before touching the
//! bulk ciphertext.

use aes::Aes256;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};

pub const BLOCK_SIZE: usize = 16;
type Block = cipher::Block<Aes256>;

const ZERO_IV: [u8; BLOCK_SIZE] = [0_u8; BLOCK_SIZE];

fn encryptor(password: &str) -> cbc::Encryptor<Aes256> {
    let key = derive_key(password);
    cbc::Encryptor::<Aes256>::new(GenericArray::from_slice(&key), GenericArray::from_slice(&ZERO_IV))
}

fn decryptor(password: &str) -> cbc::Decryptor<Aes256> {
    let key = derive_key(password);
    cbc::Decryptor::<Aes256>::new(GenericArray::from_slice(&key), GenericArray::from_slice(&ZERO_IV))
}

/// `SHA256(password)`, used both as the verification plaintext and as the
/// AES-256 key.
#[must_use]
pub fn derive_key(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

/// One AES-256-CBC block, encrypting the first 16 bytes of the password's
/// hash under that same hash as key, zero IV. Written at the start of an
/// encrypted log file; `verify_header` checks it on open.
#[must_use]
pub fn verification_header(password: &str) -> [u8; BLOCK_SIZE] {
    let key = derive_key(password);
    let mut block = Block::clone_from_slice(&key[..BLOCK_SIZE]);
    encryptor(password).encrypt_block_mut(&mut block);
    block.into()
}

/// Checks a header read back from a file against `password`.
#[must_use]
pub fn verify_header(password: &str, header: &[u8; BLOCK_SIZE]) -> bool {
    let key = derive_key(password);
    let mut block = Block::clone_from_slice(header);
    decryptor(password).decrypt_block_mut(&mut block);
    block.as_slice() == &key[..BLOCK_SIZE]
}

/// Streaming AES-256-CBC encryptor. Buffers input bytes that do not yet
/// fill a full block; [`Self::finish`] PKCS7-pads and encrypts the tail.
pub struct CbcStreamEncryptor {
    cipher: cbc::Encryptor<Aes256>,
    buffer: Vec<u8>,
}

impl CbcStreamEncryptor {
    #[must_use]
    pub fn new(password: &str) -> Self {
        Self {
            cipher: encryptor(password),
            buffer: Vec::with_capacity(BLOCK_SIZE),
        }
    }

    /// Encrypt as many full blocks as `data` (plus any buffered remainder)
    /// provides; returns the ciphertext produced so far.
    pub fn update(&mut self, data: &[u8]) -> Vec<u8> {
        self.buffer.extend_from_slice(data);
        let mut out = Vec::with_capacity(self.buffer.len());
        let mut offset = 0;
        while self.buffer.len() - offset >= BLOCK_SIZE {
            let mut block = Block::clone_from_slice(&self.buffer[offset..offset + BLOCK_SIZE]);
            self.cipher.encrypt_block_mut(&mut block);
            out.extend_from_slice(&block);
            offset += BLOCK_SIZE;
        }
        self.buffer.drain(..offset);
        out
    }

    /// PKCS7-pad and encrypt the final (possibly empty) block.
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        let pad = BLOCK_SIZE - self.buffer.len();
        self.buffer.resize(BLOCK_SIZE, pad as u8);
        let mut block = Block::clone_from_slice(&self.buffer);
        self.cipher.encrypt_block_mut(&mut block);
        block.to_vec()
    }
}

/// Streaming AES-256-CBC decryptor with PKCS7 unpadding. Because the pad
/// value is only known once the final block is seen, a fully-decrypted
/// block is held back one step; [`Self::finish`] strips the padding from
/// the last one.
pub struct CbcStreamDecryptor {
    cipher: cbc::Decryptor<Aes256>,
    buffer: Vec<u8>,
    pending: Option<[u8; BLOCK_SIZE]>,
}

impl CbcStreamDecryptor {
    #[must_use]
    pub fn new(password: &str) -> Self {
        Self {
            cipher: decryptor(password),
            buffer: Vec::with_capacity(BLOCK_SIZE),
            pending: None,
        }
    }

    pub fn update(&mut self, data: &[u8]) -> crate::error::Result<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        let mut out = Vec::with_capacity(self.buffer.len());
        let mut offset = 0;
        while self.buffer.len() - offset >= BLOCK_SIZE {
            let mut block = Block::clone_from_slice(&self.buffer[offset..offset + BLOCK_SIZE]);
            self.cipher.decrypt_block_mut(&mut block);
            if let Some(prev) = self.pending.replace(block.into()) {
                out.extend_from_slice(&prev);
            }
            offset += BLOCK_SIZE;
        }
        self.buffer.drain(..offset);
        Ok(out)
    }

    /// Strip PKCS7 padding from the held-back last block. A missing or
    /// malformed final block means the stream was truncated mid-cipher.
    pub fn finish(mut self) -> crate::error::Result<Vec<u8>> {
        if !self.buffer.is_empty() {
            return Err(crate::error::LogError::PrematureEnd("cipher finalization"));
        }
        let Some(last) = self.pending.take() else {
            return Err(crate::error::LogError::PrematureEnd("cipher finalization"));
        };
        let pad = *last.last().expect("block is nonempty") as usize;
        if pad == 0 || pad > BLOCK_SIZE || !last[BLOCK_SIZE - pad..].iter().all(|&b| b as usize == pad) {
            return Err(crate::error::LogError::PrematureEnd("cipher finalization"));
        }
        Ok(last[..BLOCK_SIZE - pad].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_with_correct_password() {
        let header = verification_header("hunter2");
        assert!(verify_header("hunter2", &header));
        assert!(!verify_header("wrong", &header));
    }

    #[test]
    fn stream_round_trips_arbitrary_length_payloads() {
        for len in [0, 1, 15, 16, 17, 100, 4096] {
            let plaintext: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
            let mut enc = CbcStreamEncryptor::new("secret");
            let mut cipher = enc.update(&plaintext);
            cipher.extend_from_slice(&enc.finish());

            let mut dec = CbcStreamDecryptor::new("secret");
            let mut plain = dec.update(&cipher).unwrap();
            plain.extend_from_slice(&dec.finish().unwrap());
            assert_eq!(plain, plaintext, "length {len}");
        }
    }

    #[test]
    fn truncated_stream_is_premature_end() {
        let mut enc = CbcStreamEncryptor::new("secret");
        let mut cipher = enc.update(b"hello world, this is a longer message");
        cipher.extend_from_slice(&enc.finish());
        cipher.truncate(cipher.len() - 3);

        let mut dec = CbcStreamDecryptor::new("secret");
        let _ = dec.update(&cipher).unwrap();
        assert!(matches!(dec.finish(), Err(crate::error::LogError::PrematureEnd(_))));
    }
}
