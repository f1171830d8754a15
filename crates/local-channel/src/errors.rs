//! Error types for the Local channel driver.

use crosspoint_switch_core::SwitchError;
use thiserror::Error;

/// Result type for Local driver operations
pub type Result<T> = std::result::Result<T, LocalError>;

/// Errors surfaced by the Local channel driver.
///
/// The management-surface variants render exactly the texts the manager
/// interface reports to clients.
#[derive(Debug, Error)]
pub enum LocalError {
    #[error(transparent)]
    Switch(#[from] SwitchError),

    #[error("'Channel' not specified.")]
    ChannelNotSpecified,

    #[error("Channel does not exist.")]
    ChannelDoesNotExist,

    #[error("Unable to find channel")]
    ChannelNotLocal,

    /// A hangup raced with an in-flight frame forward; the forwarder tore
    /// the pair down on its way out.
    #[error("frame forward cancelled: pair hung up mid-queue")]
    ForwardCancelled,
}

impl From<LocalError> for SwitchError {
    fn from(err: LocalError) -> SwitchError {
        match err {
            LocalError::Switch(e) => e,
            other => SwitchError::Internal(other.to_string()),
        }
    }
}
