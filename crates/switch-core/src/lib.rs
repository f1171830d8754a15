//! Core channel abstractions for the crosspoint soft switch.
//!
//! This crate provides the switch-facing surface that channel drivers build
//! against: channel handles with their locking discipline, media and control
//! frames, party identification records, device state, the channel driver
//! contract, and the dialplan/PBX seams the switch exposes to drivers.
//!
//! # Overview
//!
//! A [`Channel`] is one leg of a call. Channels are owned by the switch and
//! shared with drivers through `Arc`; all mutable channel state lives behind
//! the channel lock (`lock`/`try_lock` hand out owned guards so drivers can
//! express multi-channel lock dances). A driver implements [`ChannelTech`]
//! and registers it with the [`SwitchCore`], which also keeps the directory
//! of live channels.
//!
//! Drivers never reach into another driver directly: cross-channel operations
//! go through the primitives here (`queue_frame` on a locked peer, state
//! changes, [`channel::masquerade_locked`] for identity splices).

pub mod channel;
pub mod dialplan;
pub mod errors;
pub mod format;
pub mod frame;
pub mod jitter;
pub mod module;
pub mod party;
pub mod switch;
pub mod tech;

pub use channel::{
    bridged_channel, bridged_channel_from, masquerade_locked, AmaFlags, AudiohookList, CallDetail,
    CcConfig, CcPolicy, Channel, ChannelGuard, ChannelId, ChannelInner, ChannelParams,
    ChannelState, Datastore, FixupNeeded, Generator, GroupAssignment, Monitor, TechBinding,
};
pub use dialplan::{Dialplan, PbxRunner};
pub use errors::{Result, SwitchError};
pub use format::{best_codec, Format, FormatCap};
pub use frame::{ControlOp, Frame, HangupCause};
pub use jitter::JitterBufferConfig;
pub use module::{ModuleUse, ModuleUser};
pub use party::{
    connected_line_copy_from_caller, connected_line_copy_to_caller, CallerParty, ConnectedParty,
    DialedParty, PartyId, RedirectingParty,
};
pub use switch::SwitchCore;
pub use tech::{ChannelTech, DeviceState, QueryOption, QueryOptionValue, T38State};
