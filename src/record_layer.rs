//! The post-pair framed, per-direction-counter ChaCha20-Poly1305 record layer.
//!
//! Once a session reaches the encrypted state, every byte in either direction is a sequence of
//! `[len_lo][len_hi][ciphertext][tag]` records, `1 <= len <= 1024`. Counters are independent per
//! direction, start at zero, and never reset within a session.

use crate::error::{Error, Result, TransportError};

const MAX_RECORD_LEN: usize = 1024;
const TAG_LEN: usize = 16;

/// One direction's AEAD key plus its monotonically increasing record counter.
struct DirectionState {
    key: [u8; 32],
    counter: u64,
}

impl DirectionState {
    fn new(key: [u8; 32]) -> Self {
        Self { key, counter: 0 }
    }

    fn next_nonce(&mut self) -> Result<[u8; 12]> {
        if self.counter == u64::MAX {
            return Err(Error::Transport(TransportError::CounterExhausted));
        }
        let nonce = crate::crypto::counter_nonce(self.counter);
        self.counter += 1;
        Ok(nonce)
    }
}

/// Frames and encrypts/decrypts HAP traffic after Pair-Verify completes.
///
/// Named from the accessory's perspective: `read_key`/`read_counter` decrypt bytes arriving
/// from the controller, `write_key`/`write_counter` encrypt bytes going out to it — matching the
/// key derivation exactly (the controller derives the mirror image).
pub struct RecordLayer {
    read: DirectionState,
    write: DirectionState,
    /// Bytes received but not yet enough to decode a whole record.
    recv_buffer: Vec<u8>,
}

impl RecordLayer {
    /// Construct a record layer from the two HKDF-derived per-direction keys.
    #[must_use]
    pub fn new(read_key: [u8; 32], write_key: [u8; 32]) -> Self {
        Self {
            read: DirectionState::new(read_key),
            write: DirectionState::new(write_key),
            recv_buffer: Vec::new(),
        }
    }

    /// Derive the read/write keys from the Pair-Verify shared secret.
    #[must_use]
    pub fn derive_keys(shared_secret: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let read_key = crate::crypto::hkdf_sha512(b"Control-Salt", shared_secret, b"Control-Read-Encryption-Key", 32);
        let write_key = crate::crypto::hkdf_sha512(b"Control-Salt", shared_secret, b"Control-Write-Encryption-Key", 32);
        (read_key, write_key)
    }

    /// Encrypt `plaintext` into one or more wire records.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(plaintext.len() + (plaintext.len() / MAX_RECORD_LEN + 1) * 18);
        for chunk in plaintext.chunks(MAX_RECORD_LEN) {
            self.encrypt_record(chunk, &mut out)?;
        }
        Ok(out)
    }

    fn encrypt_record(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let len = chunk.len() as u16;
        let header = len.to_le_bytes();
        let nonce = self.write.next_nonce()?;
        let ciphertext = crate::crypto::chacha20poly1305_encrypt(&self.write.key, &nonce, &header, chunk);

        out.extend_from_slice(&header);
        out.extend_from_slice(&ciphertext);
        Ok(())
    }

    /// Feed newly-received bytes in, returning every complete plaintext record decoded so far.
    /// Incomplete trailing bytes are retained for the next call.
    ///
    /// # Errors
    /// Returns [`Error::Transport`] if any record fails AEAD authentication or declares an
    /// out-of-range length; the caller must close the session on such an error.
    pub fn decrypt(&mut self, received: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.recv_buffer.extend_from_slice(received);

        let mut plaintexts = Vec::new();
        loop {
            if self.recv_buffer.len() < 2 {
                break;
            }
            let len = u16::from_le_bytes([self.recv_buffer[0], self.recv_buffer[1]]) as usize;
            if len == 0 || len > MAX_RECORD_LEN {
                return Err(Error::Transport(TransportError::InvalidRecordLength));
            }
            let record_len = 2 + len + TAG_LEN;
            if self.recv_buffer.len() < record_len {
                break;
            }

            let header = [self.recv_buffer[0], self.recv_buffer[1]];
            let ciphertext = &self.recv_buffer[2..record_len];
            let nonce = self.read.next_nonce()?;
            let plaintext = crate::crypto::chacha20poly1305_decrypt(&self.read.key, &nonce, &header, ciphertext)
                .map_err(|_| Error::Transport(TransportError::AuthenticationFailed))?;

            plaintexts.push(plaintext);
            self.recv_buffer.drain(..record_len);
        }

        Ok(plaintexts)
    }
}
