//! Error types for the engine.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers.
///
/// Read-path problems (malformed tags, duplicate deliveries, empty relay
/// selections) are logged and absorbed; only configuration and write-path
/// failures reach this type.
#[derive(Error, Debug)]
pub enum Error {
    /// No signer has been attached to the runtime.
    #[error("no signing capability available")]
    SignerUnavailable,

    /// The signer refused or failed.
    #[error("signer error: {0}")]
    Signer(String),

    /// Reaction content is neither a single glyph nor a well-formed custom emoji.
    #[error("emoji is invalid")]
    InvalidEmoji,

    /// Deletion requests and vanish requests cannot themselves be deleted.
    #[error("cannot delete kind:{kind} record")]
    NotDeletable { kind: u16 },

    #[error("pubkey already followed: {0}")]
    AlreadyFollowing(String),

    #[error("pubkey not followed: {0}")]
    NotFollowing(String),

    /// Unmute requested but no kind:10000 record is known.
    #[error("mute list does not exist")]
    MuteListMissing,

    /// A composed tag could not be turned into a wire tag.
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
