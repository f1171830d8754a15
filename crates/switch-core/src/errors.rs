//! Error types for the switch core.

use thiserror::Error;

/// Result type for switch operations
pub type Result<T> = std::result::Result<T, SwitchError>;

/// Errors surfaced by the switch core and by channel drivers through the
/// driver contract.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("channel allocation failed: {0}")]
    Allocation(String),

    #[error("no such extension {exten}@{context}")]
    NoSuchExtension { exten: String, context: String },

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("no channel driver registered for type '{0}'")]
    NoSuchTech(String),

    #[error("channel driver type '{0}' already registered")]
    TechAlreadyRegistered(String),

    #[error("operation not supported")]
    NotSupported,

    #[error("dialplan start failed: {0}")]
    PbxStart(String),

    #[error("internal error: {0}")]
    Internal(String),
}
