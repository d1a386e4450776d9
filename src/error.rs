// SPDX-License-Identifier: AGPL-3.0-or-later

//! Structured error values for the whole crate (§7 of the design spec).
//!
//! Every [`GdpError`] carries a severity, a `(registry, detail)` pair, and
//! maps losslessly onto the ack/nak wire codes of [`crate::pdu`] for the
//! `200..=699` detail range. Assertion-style invariant violations
//! (lock order, refcount, cache-list consistency) are *not* represented
//! here: per Design Notes §9 those are programmer bugs, logged and
//! recovered from (debug builds may panic), never propagated as values.

use thiserror::Error;

/// Severity attached to a [`GdpError`], mirroring the original `EP_STAT`
/// severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Ok,
    Warn,
    Error,
    Severe,
    Abort,
}

/// Module that raised an error, used as the first half of the
/// `(registry, detail)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registry {
    Protocol,
    Channel,
    Object,
    Storage,
    Crypto,
    Internal,
}

/// Exhaustive list of error kinds the core can raise, grouped the way §7
/// groups them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GdpError {
    // --- Protocol ---
    #[error("malformed message")]
    MsgFormat,
    #[error("message too short")]
    ShortMsg,
    #[error("protocol violation")]
    ProtocolFail,
    #[error("corrupt PDU")]
    PduCorrupt,
    #[error("PDU exceeds maximum length")]
    PduTooLong,
    #[error("protocol version mismatch")]
    VersionMismatch,
    #[error("unknown request id")]
    UnknownRid,

    // --- Routing / channel ---
    #[error("daemon is not responding")]
    DeadDaemon,
    #[error("channel not connected")]
    ChanNotConnected,
    #[error("invoke timed out")]
    InvokeTimeout,
    #[error("no route to destination")]
    NoRoute,

    // --- Object / name ---
    #[error("log is not open")]
    LogNotOpen,
    #[error("null log object")]
    NullGob,
    #[error("null request")]
    NullGin,
    #[error("invalid log name")]
    NameInvalid,
    #[error("unknown log name")]
    NameUnknown,
    #[error("not found")]
    NotFound,
    #[error("log is read-only")]
    ReadOnly,

    // --- Storage ---
    #[error("physical I/O error: {0}")]
    PhysioError(String),
    #[error("corrupt log file")]
    CorruptLog,
    #[error("log file version mismatch")]
    LogVersionMismatch,
    #[error("storage backend error: {0}")]
    SqliteError(String),
    #[error("record number sequencing error")]
    RecnoSeqError,
    #[error("record missing")]
    RecordMissing,
    #[error("duplicate record")]
    RecordDuplicated,
    #[error("record expired")]
    RecordExpired,
    #[error("required metadata entry missing")]
    MetadataRequired,
    #[error("log has no metadata")]
    NoMetadata,

    // --- Crypto ---
    #[error("unsupported hash algorithm")]
    HashAlg,
    #[error("unsupported key type")]
    KeyType,
    #[error("key too small")]
    KeyTooSmall,
    #[error("signature missing")]
    SigMissing,
    #[error("no public key available")]
    NoPubKey,
    #[error("no signature present")]
    NoSig,
    #[error("signature verification failed")]
    VrfyFail,
    #[error("secret key required")]
    SkeyRequired,
    #[error("secret key missing")]
    SkeyMissing,
    #[error("crypto provider error: {0}")]
    CryptoError(String),

    // --- Internal ---
    #[error("not implemented")]
    NotImplemented,
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("using a freed request")]
    UsingFreeReq,
    #[error("bad reference count")]
    BadRefcnt,
    #[error("buffer failure")]
    BufferFailure,
    #[error("response already sent")]
    ResponseSent,
}

impl GdpError {
    pub fn severity(&self) -> Severity {
        use GdpError::*;
        match self {
            SkeyMissing => Severity::Warn,
            NotFound | NameUnknown | UnknownRid => Severity::Warn,
            CorruptLog | LogVersionMismatch | PduCorrupt | BadRefcnt => Severity::Severe,
            NotImplemented | InternalError(_) | UsingFreeReq | BufferFailure => {
                Severity::Abort
            },
            _ => Severity::Error,
        }
    }

    pub fn registry(&self) -> Registry {
        use GdpError::*;
        match self {
            MsgFormat | ShortMsg | ProtocolFail | PduCorrupt | PduTooLong
            | VersionMismatch | UnknownRid => Registry::Protocol,
            DeadDaemon | ChanNotConnected | InvokeTimeout | NoRoute => Registry::Channel,
            LogNotOpen | NullGob | NullGin | NameInvalid | NameUnknown | NotFound
            | ReadOnly => Registry::Object,
            PhysioError(_) | CorruptLog | LogVersionMismatch | SqliteError(_)
            | RecnoSeqError | RecordMissing | RecordDuplicated | RecordExpired
            | MetadataRequired | NoMetadata => Registry::Storage,
            HashAlg | KeyType | KeyTooSmall | SigMissing | NoPubKey | NoSig | VrfyFail
            | SkeyRequired | SkeyMissing | CryptoError(_) => Registry::Crypto,
            NotImplemented | InternalError(_) | UsingFreeReq | BadRefcnt
            | BufferFailure | ResponseSent => Registry::Internal,
        }
    }

    /// The wire ack/nak detail code this error round-trips through,
    /// reserved range 200..=699 per §7. Returns `None` for errors that
    /// have no direct wire representation (e.g. purely-local bookkeeping
    /// errors).
    pub fn detail_code(&self) -> Option<u16> {
        use GdpError::*;
        Some(match self {
            NotFound => 404,
            ReadOnly => 403,
            NameInvalid | MsgFormat | ShortMsg => 400,
            RecnoSeqError => 409,
            RecordDuplicated => 200, // idempotent accept, not an error on the wire
            VersionMismatch => 426,
            NoRoute => 600,
            VrfyFail | SigMissing | NoSig | NoPubKey => 401,
            InvokeTimeout => 504,
            _ => return None,
        })
    }
}

impl From<rusqlite::Error> for GdpError {
    fn from(e: rusqlite::Error) -> Self {
        GdpError::SqliteError(e.to_string())
    }
}

pub type GdpResult<T> = std::result::Result<T, GdpError>;
