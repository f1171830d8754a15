//! The channel driver contract.
//!
//! Every channel type the switch can carry implements [`ChannelTech`]. The
//! switch dispatches call-control operations through this trait; a driver's
//! private state rides on the channel as a weak, type-erased binding (see
//! [`crate::channel::TechBinding`]).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::errors::{Result, SwitchError};
use crate::format::FormatCap;
use crate::frame::{ControlOp, Frame};

/// Aggregate device state reported for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Unknown,
    NotInUse,
    InUse,
    Busy,
    Invalid,
    Unavailable,
    Ringing,
}

/// T.38 fax negotiation state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum T38State {
    Disabled,
    LocalReinvite,
    PeerReinvite,
    Negotiating,
    Negotiated,
    Rejected,
    Unknown,
}

/// Channel options that can be queried through a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOption {
    T38State,
    /// Whether the channel's media path is encrypted.
    SecureMedia,
}

/// Result of a [`ChannelTech::query_option`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOptionValue {
    T38(T38State),
}

/// The operations a channel driver provides to the switch.
///
/// Operations the driver does not care about keep their defaults: `read`
/// produces the null frame, `exception` mirrors `read`, `write_video`
/// mirrors `write`, and option queries are unsupported.
#[async_trait]
pub trait ChannelTech: Send + Sync {
    /// The technology name, e.g. `"Local"`. Channel names are prefixed with
    /// it.
    fn type_name(&self) -> &'static str;

    /// Human-readable driver description.
    fn description(&self) -> &'static str;

    /// Create a new channel for `dest`. Returns the channel the switch
    /// should treat as the originating leg.
    async fn requester(
        &self,
        dest: &str,
        format: FormatCap,
        requestor: Option<&Arc<Channel>>,
    ) -> Result<Arc<Channel>>;

    /// Place the call: connect the channel toward `dest`.
    async fn call(&self, chan: &Arc<Channel>, dest: &str, timeout: Duration) -> Result<()>;

    /// Tear the channel down. Called exactly once per channel by the switch.
    async fn hangup(&self, chan: &Arc<Channel>) -> Result<()>;

    /// Answer an incoming call on the channel.
    async fn answer(&self, chan: &Arc<Channel>) -> Result<()>;

    /// Produce the next frame from the channel.
    async fn read(&self, _chan: &Arc<Channel>) -> Frame {
        Frame::Null
    }

    /// Exception path; drivers that multiplex signalling over the read path
    /// override this.
    async fn exception(&self, chan: &Arc<Channel>) -> Frame {
        self.read(chan).await
    }

    /// Deliver a frame written by the switch to the channel.
    async fn write(&self, chan: &Arc<Channel>, frame: Frame) -> Result<()>;

    /// Deliver a video frame; identical to `write` unless overridden.
    async fn write_video(&self, chan: &Arc<Channel>, frame: Frame) -> Result<()> {
        self.write(chan, frame).await
    }

    /// Relay a control indication on the channel.
    async fn indicate(&self, chan: &Arc<Channel>, condition: ControlOp) -> Result<()>;

    /// The channel object carrying this driver's state changed from `old` to
    /// `new` (a masquerade); rebind any stored references.
    async fn fixup(&self, old: &Arc<Channel>, new: &Arc<Channel>) -> Result<()>;

    async fn send_text(&self, chan: &Arc<Channel>, text: &str) -> Result<()>;

    async fn send_html(&self, chan: &Arc<Channel>, subclass: i32, data: &[u8]) -> Result<()>;

    async fn send_digit_begin(&self, chan: &Arc<Channel>, digit: char) -> Result<()>;

    async fn send_digit_end(
        &self,
        chan: &Arc<Channel>,
        digit: char,
        duration: Duration,
    ) -> Result<()>;

    /// Aggregate device state for a driver destination string.
    async fn devicestate(&self, _dest: &str) -> DeviceState {
        DeviceState::Unknown
    }

    /// Resolve who `bridge` really connects `chan` to. Proxy-style drivers
    /// override this to report a peer further along the call graph; `None`
    /// means the driver cannot answer.
    async fn bridged_channel(
        &self,
        _chan: &Arc<Channel>,
        bridge: &Arc<Channel>,
    ) -> Option<Arc<Channel>> {
        Some(bridge.clone())
    }

    /// Query a channel option.
    async fn query_option(
        &self,
        _chan: &Arc<Channel>,
        _option: QueryOption,
    ) -> Result<QueryOptionValue> {
        Err(SwitchError::NotSupported)
    }
}
