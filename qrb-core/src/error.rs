//! Error taxonomy for backup and restore.
//!
//! Every kind is a distinct variant so callers can map them to distinct exit
//! codes. `MalformedChunk` and `ConflictingChunk` are per-item and non-fatal
//! while collecting; everything else aborts the current run.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QrbError>;

#[derive(Error, Debug)]
pub enum QrbError {
    #[error("chunk capacity {capacity} bytes leaves no room for payload (header is {header} bytes)")]
    CapacityTooSmall { capacity: usize, header: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed chunk: {0}")]
    MalformedChunk(String),

    #[error("conflicting chunk for group {group_id} index {index}: {reason}")]
    ConflictingChunk { group_id: u32, index: u16, reason: String },

    #[error("insufficient shares for group {group_id}: have {available}, need {required}")]
    InsufficientShares { group_id: u32, available: usize, required: usize },

    #[error("group {group_id} is unrecoverable: {reason}")]
    UnrecoverableGroup { group_id: u32, reason: String },

    #[error("group {group_id} is incomplete: have {available} of {required} chunks")]
    IncompleteGroup { group_id: u32, available: usize, required: usize },

    #[error("chunks from {candidates} different backups each form a complete stream")]
    AmbiguousStream { candidates: usize },

    #[error("integrity check failed: {0}")]
    IntegrityError(String),

    #[error("decryption failed: {0}")]
    DecryptError(String),

    #[error("decompression failed: {0}")]
    DecompressError(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("compression failed: {0}")]
    Compress(String),

    #[error("erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("self-check failed: {0}")]
    SelfCheckFailed(String),
}

impl QrbError {
    /// Process exit code for this error kind. 1 is left for generic failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            QrbError::CapacityTooSmall { .. } => 10,
            QrbError::InvalidConfig(_) => 11,
            QrbError::MalformedChunk(_) => 20,
            QrbError::ConflictingChunk { .. } => 21,
            QrbError::InsufficientShares { .. } => 22,
            QrbError::UnrecoverableGroup { .. } => 23,
            QrbError::IncompleteGroup { .. } => 24,
            QrbError::AmbiguousStream { .. } => 25,
            QrbError::IntegrityError(_) => 30,
            QrbError::DecryptError(_) => 31,
            QrbError::DecompressError(_) => 32,
            QrbError::Encrypt(_) => 33,
            QrbError::Compress(_) => 34,
            QrbError::ErasureCoding(_) => 40,
            QrbError::SelfCheckFailed(_) => 41,
        }
    }
}

impl From<reed_solomon_erasure::Error> for QrbError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        QrbError::ErasureCoding(err.to_string())
    }
}
