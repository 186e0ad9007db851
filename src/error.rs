//! Crate-wide error kinds.
//!
//! Every fallible primitive in this crate returns a [`Result<T, Error>`]. Handlers at the
//! dispatch boundary convert an [`Error`] into a [`crate::tlv::TlvError`] or a
//! [`crate::model::HapStatus`] and never let it cross between sessions.

use thiserror::Error;

/// The permission law that a request violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionError {
    /// Write attempted on a characteristic without `paired_write`.
    ReadOnly,
    /// Read attempted on a characteristic without `paired_read`.
    WriteOnly,
    /// Event subscription attempted on a characteristic without `notify`.
    NotificationsUnsupported,
    /// A non-admin controller attempted an admin-only operation.
    InsufficientPrivileges,
}

/// Why a value failed to validate against a characteristic's declared shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// Value fell below `min_value`.
    BelowMinimum,
    /// Value exceeded `max_value`.
    AboveMaximum,
    /// Value wasn't a multiple of `min_step` above `min_value`.
    NotAStepMultiple,
    /// Value wasn't one of the declared `valid_values`.
    NotInValidValues,
    /// String value exceeded `max_len`.
    StringTooLong,
    /// Data value exceeded `max_data_len`.
    DataTooLong,
    /// The JSON value's type doesn't match the characteristic's format.
    WrongType,
}

/// Why the record layer or socket layer gave up on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// AEAD authentication failed for an incoming record.
    AuthenticationFailed,
    /// A record's declared length was outside `1..=1024`.
    InvalidRecordLength,
    /// The per-direction record counter would wrap past 2^64.
    CounterExhausted,
    /// The socket read timed out (10s, per the concurrency model).
    Timeout,
    /// The peer closed the connection.
    Closed,
}

/// The single error type returned by every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed TLV, JSON, or HTTP framing; missing a required field.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// Bad SRP proof, bad Ed25519/X25519 signature, or unknown pairing identifier.
    #[error("authentication failed")]
    Authentication,

    /// A second Pair-Setup was attempted while one was already in flight.
    #[error("pair-setup is busy with another controller")]
    Busy,

    /// Pair-Setup was attempted on an already-paired accessory that doesn't allow re-pairing.
    #[error("pairing is unavailable")]
    Unavailable,

    /// The pairing store has no room for another pairing.
    #[error("maximum number of pairings reached")]
    MaxPeers,

    /// A permission law was violated.
    #[error("permission denied: {0:?}")]
    Permission(PermissionError),

    /// A characteristic write failed its range/shape validation.
    #[error("value out of range: {0:?}")]
    Range(RangeError),

    /// No accessory/characteristic with the requested `aid.iid` exists.
    #[error("no such resource")]
    NotFound,

    /// Record-layer or socket failure; the session must be torn down.
    #[error("transport error: {0:?}")]
    Transport(TransportError),

    /// Allocation or storage failure; any partial state must be rolled back.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl Error {
    /// `true` for errors that require the owning session to be disconnected rather than
    /// answered with a protocol-level reply.
    #[must_use]
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
