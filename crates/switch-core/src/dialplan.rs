//! Dialplan and PBX seams.
//!
//! The switch core does not interpret dialplans itself; it consumes these
//! traits. Drivers that need to validate a destination or hand a channel to
//! the dialplan execution engine go through the instances held by
//! [`crate::SwitchCore`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::Channel;
use crate::errors::Result;

/// Read-only dialplan lookups.
#[async_trait]
pub trait Dialplan: Send + Sync {
    /// Does `exten` exist at `priority` in `context`? The caller number is
    /// supplied because pattern matching may depend on it.
    async fn exists(
        &self,
        context: &str,
        exten: &str,
        priority: u32,
        caller_number: Option<&str>,
    ) -> bool;
}

/// Dialplan execution engine: runs an extension script on a channel as if
/// the channel were a freshly arrived inbound call.
#[async_trait]
pub trait PbxRunner: Send + Sync {
    /// Begin dialplan execution on `chan`. Returns once execution has been
    /// handed off; the script itself runs concurrently.
    async fn start(&self, chan: Arc<Channel>) -> Result<()>;
}
