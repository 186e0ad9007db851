//! Per-TCP-connection state: the record layer, in-flight pairing machines, and the bounded
//! outbound event queue the session loop drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::event::{CharacteristicEvent, EventBus};
use crate::http::Request;
use crate::model::SessionId;
use crate::pairing::{PairSetupMachine, PairVerifyMachine};
use crate::record_layer::RecordLayer;

/// A flag any component may set to force this session's teardown on its next loop iteration.
/// Cloning shares the same underlying flag — `RemovePairing` clones a session's flag out of the
/// server's session registry to trigger a disconnect from a different task.
#[derive(Clone, Default)]
pub struct DisconnectFlag(Arc<AtomicBool>);

impl DisconnectFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One TCP connection's protocol state, from accept through teardown.
pub struct Session {
    pub id: SessionId,
    pub pair_setup_machine: Option<PairSetupMachine>,
    pub pair_verify_machine: Option<PairVerifyMachine>,
    /// Set once `/identify` has run, purely informational (identify has no other session state).
    pub paired: bool,
    pub is_admin: bool,
    pub controller_id: Option<Vec<u8>>,
    record_layer: Option<RecordLayer>,
    /// A record layer derived by a completed Pair-Verify, held back until its plaintext M4 reply
    /// has gone out over the wire.
    pending_record_layer: Option<RecordLayer>,
    http_buffer: Vec<u8>,
    pub events: mpsc::Receiver<CharacteristicEvent>,
    pub disconnect: DisconnectFlag,
}

impl Session {
    /// Create a new session and register its event queue with `event_bus`.
    #[must_use]
    pub fn new(id: SessionId, event_bus: &EventBus) -> Self {
        Self {
            id,
            pair_setup_machine: None,
            pair_verify_machine: None,
            paired: false,
            is_admin: false,
            controller_id: None,
            record_layer: None,
            pending_record_layer: None,
            http_buffer: Vec::new(),
            events: event_bus.register(id),
            disconnect: DisconnectFlag::new(),
        }
    }

    /// `true` once Pair-Verify has completed and the record layer is active.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.record_layer.is_some()
    }

    /// Derive the record layer from a completed Pair-Verify's shared secret and bind the
    /// verified controller's identity, but hold the layer back as pending: the M4 reply that
    /// announces success must still cross the wire in plaintext, so [`Self::is_verified`] stays
    /// `false` until [`Self::activate_pending_record_layer`] runs after that reply is sent. Both
    /// record-layer counters start at zero once activated.
    pub fn establish_record_layer(&mut self, shared_secret: &[u8], controller_id: Vec<u8>) {
        let (read_key, write_key) = RecordLayer::derive_keys(shared_secret);
        let read_key: [u8; 32] = read_key.try_into().expect("HKDF output is exactly 32 bytes");
        let write_key: [u8; 32] = write_key.try_into().expect("HKDF output is exactly 32 bytes");
        self.pending_record_layer = Some(RecordLayer::new(read_key, write_key));
        self.controller_id = Some(controller_id);
    }

    /// Promote a record layer queued by [`Self::establish_record_layer`] into active use, once
    /// its M4 reply has gone out in plaintext. No-op if none is pending.
    pub fn activate_pending_record_layer(&mut self) {
        if let Some(layer) = self.pending_record_layer.take() {
            self.record_layer = Some(layer);
        }
    }

    /// Encrypt `plaintext` for the wire. Only valid once [`Self::is_verified`].
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if called before Pair-Verify completes.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.record_layer
            .as_mut()
            .ok_or(Error::Internal("attempted to encrypt before the record layer was established"))?
            .encrypt(plaintext)
    }

    /// Feed newly received ciphertext in, buffering decrypted HTTP bytes for
    /// [`Self::try_take_request`].
    ///
    /// # Errors
    /// Returns [`Error::Transport`] on record-layer authentication failure — the caller must
    /// close the connection.
    pub fn feed_ciphertext(&mut self, bytes: &[u8]) -> Result<()> {
        let layer = self
            .record_layer
            .as_mut()
            .ok_or(Error::Internal("attempted to decrypt before the record layer was established"))?;
        for plaintext in layer.decrypt(bytes)? {
            self.http_buffer.extend_from_slice(&plaintext);
        }
        Ok(())
    }

    /// Feed newly received plaintext bytes (pre-verify traffic) in directly.
    pub fn feed_plaintext(&mut self, bytes: &[u8]) {
        self.http_buffer.extend_from_slice(bytes);
    }

    /// Try to parse one complete HTTP request out of the buffered bytes, consuming them on
    /// success. Returns `Ok(None)` if more bytes are needed.
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] if the buffered bytes are malformed HTTP.
    pub fn try_take_request(&mut self) -> Result<Option<Request>> {
        match Request::try_parse(&self.http_buffer)? {
            Some((request, consumed)) => {
                self.http_buffer.drain(..consumed);
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }
}
