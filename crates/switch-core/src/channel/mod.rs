//! Channel handles and channel state.
//!
//! A [`Channel`] is one leg of a call, owned by the switch and shared with
//! drivers through `Arc`. All mutable call state lives in [`ChannelInner`]
//! behind the channel lock; `lock`/`try_lock` hand out *owned* guards so that
//! drivers can hold several channels at once and express try-then-back-off
//! acquisition dances without fighting borrow lifetimes.
//!
//! A few fields sit outside the channel lock on purpose:
//!
//! - the name (renamed during a masquerade, read constantly for logging),
//! - the driver binding ([`TechBinding`]), consulted to dispatch operations
//!   without first taking the channel lock,
//! - the generator slot, which peers probe lock-free while deciding whether
//!   to forward frames.

mod masquerade;

pub use masquerade::{masquerade_locked, FixupNeeded};

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::format::{Format, FormatCap};
use crate::frame::{ControlOp, Frame, HangupCause};
use crate::jitter::JitterBufferConfig;
use crate::party::{CallerParty, ConnectedParty, DialedParty, RedirectingParty};
use crate::tech::ChannelTech;

/// Unique identifier for a channel, stable across renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        ChannelId(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Down,
    Reserved,
    OffHook,
    Dialing,
    Ring,
    Ringing,
    Up,
    Busy,
}

/// Automatic message accounting category for billing records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmaFlags {
    #[default]
    Unset,
    Omit,
    Billing,
    Documentation,
}

/// An active call recording on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monitor {
    pub filename_base: String,
}

/// Audio tap points attached to a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudiohookList {
    pub sources: Vec<String>,
}

/// A media generator attached to a channel (tone, silence, playback).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generator {
    pub source: String,
}

/// Opaque driver/application data attached to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datastore {
    pub uid: String,
    pub data: String,
    /// Whether the datastore follows the call onto derived channels.
    pub inheritable: bool,
}

/// Channel group membership used for group counting in the dialplan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAssignment {
    pub group: String,
    pub category: Option<String>,
}

/// Call-completion configuration carried per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CcPolicy {
    #[default]
    Never,
    Generic,
    Native,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcConfig {
    pub agent_policy: CcPolicy,
    pub monitor_policy: CcPolicy,
    pub offer_timer_secs: u32,
}

impl Default for CcConfig {
    fn default() -> Self {
        CcConfig {
            agent_policy: CcPolicy::Never,
            monitor_policy: CcPolicy::Never,
            offer_timer_secs: 20,
        }
    }
}

/// Billing snapshot attached to a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallDetail {
    pub accountcode: String,
    pub src: Option<String>,
    pub dst: Option<String>,
}

/// Parameters for allocating a channel through
/// [`crate::SwitchCore::alloc_channel`].
#[derive(Debug, Clone)]
pub struct ChannelParams {
    pub name: String,
    pub state: ChannelState,
    pub exten: String,
    pub context: String,
    pub linkedid: String,
    pub accountcode: String,
    pub amaflags: AmaFlags,
}

/// The driver bound to a channel: the tech vtable plus a weak, type-erased
/// reference to the driver's private state. The reference is weak so that a
/// driver's shared records and the channels pointing at them never form a
/// strong cycle.
#[derive(Clone)]
pub struct TechBinding {
    pub tech: Arc<dyn ChannelTech>,
    pub pvt: Weak<dyn Any + Send + Sync>,
}

impl TechBinding {
    /// Upgrade and downcast the private state to a concrete driver type.
    pub fn pvt_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.pvt.upgrade()?.downcast::<T>().ok()
    }
}

impl fmt::Debug for TechBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TechBinding")
            .field("tech", &self.tech.type_name())
            .field("pvt", &self.pvt.upgrade().is_some())
            .finish()
    }
}

/// Owned guard over a channel's mutable state.
pub type ChannelGuard = OwnedMutexGuard<ChannelInner>;

/// One leg of a call.
pub struct Channel {
    id: ChannelId,
    name: RwLock<String>,
    tech: RwLock<Option<TechBinding>>,
    generator: SyncMutex<Option<Generator>>,
    inner: Arc<Mutex<ChannelInner>>,
}

/// Mutable channel state, protected by the channel lock.
pub struct ChannelInner {
    pub state: ChannelState,
    pub read_queue: VecDeque<Frame>,
    /// One-step bridge partner set by the bridging core.
    pub bridge: Option<Arc<Channel>>,
    pub monitor: Option<Monitor>,
    pub audiohooks: Option<AudiohookList>,
    pub caller: CallerParty,
    pub connected: ConnectedParty,
    pub redirecting: RedirectingParty,
    pub dialed: DialedParty,
    /// Channel variables in insertion order.
    pub variables: Vec<(String, String)>,
    pub datastores: Vec<Datastore>,
    pub groups: Vec<GroupAssignment>,
    pub context: String,
    pub exten: String,
    pub priority: u32,
    pub nativeformats: FormatCap,
    pub readformat: Option<Format>,
    pub writeformat: Option<Format>,
    pub amaflags: AmaFlags,
    pub accountcode: String,
    pub language: String,
    pub musicclass: String,
    pub linkedid: String,
    pub hangupcause: HangupCause,
    pub answered_elsewhere: bool,
    pub softhangup: bool,
    pub zombie: bool,
    /// Music-on-hold class while hold music is playing locally.
    pub moh: Option<String>,
    pub jitter: JitterBufferConfig,
    pub cc: CcConfig,
    pub cdr: CallDetail,
}

impl Channel {
    pub(crate) fn new(params: ChannelParams) -> Arc<Channel> {
        Arc::new(Channel {
            id: ChannelId::new(),
            name: RwLock::new(params.name),
            tech: RwLock::new(None),
            generator: SyncMutex::new(None),
            inner: Arc::new(Mutex::new(ChannelInner {
                state: params.state,
                read_queue: VecDeque::new(),
                bridge: None,
                monitor: None,
                audiohooks: None,
                caller: CallerParty::default(),
                connected: ConnectedParty::default(),
                redirecting: RedirectingParty::default(),
                dialed: DialedParty::default(),
                variables: Vec::new(),
                datastores: Vec::new(),
                groups: Vec::new(),
                context: params.context,
                exten: params.exten,
                priority: 1,
                nativeformats: FormatCap::NONE,
                readformat: None,
                writeformat: None,
                amaflags: params.amaflags,
                accountcode: params.accountcode,
                language: String::new(),
                musicclass: String::new(),
                linkedid: params.linkedid,
                hangupcause: HangupCause::NOT_DEFINED,
                answered_elsewhere: false,
                softhangup: false,
                zombie: false,
                moh: None,
                jitter: JitterBufferConfig::default(),
                cc: CcConfig::default(),
                cdr: CallDetail::default(),
            })),
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.write() = name;
    }

    /// Take the channel lock, waiting if necessary.
    pub async fn lock(&self) -> ChannelGuard {
        self.inner.clone().lock_owned().await
    }

    /// Take the channel lock without waiting.
    pub fn try_lock(&self) -> Option<ChannelGuard> {
        self.inner.clone().try_lock_owned().ok()
    }

    /// Bind a driver to the channel.
    pub fn bind_tech(&self, tech: Arc<dyn ChannelTech>, pvt: Weak<dyn Any + Send + Sync>) {
        *self.tech.write() = Some(TechBinding { tech, pvt });
    }

    /// Remove the driver binding, returning it if one was present.
    pub fn unbind_tech(&self) -> Option<TechBinding> {
        self.tech.write().take()
    }

    pub fn tech_binding(&self) -> Option<TechBinding> {
        self.tech.read().clone()
    }

    pub(crate) fn swap_tech(&self, binding: Option<TechBinding>) -> Option<TechBinding> {
        std::mem::replace(&mut *self.tech.write(), binding)
    }

    /// Attach or detach a media generator.
    pub fn set_generator(&self, generator: Option<Generator>) {
        *self.generator.lock() = generator;
    }

    /// Lock-free probe used by peers deciding whether to forward media.
    pub fn has_generator(&self) -> bool {
        self.generator.lock().is_some()
    }

    pub(crate) fn swap_generator_with(&self, other: &Channel) {
        let mut mine = self.generator.lock();
        let mut theirs = other.generator.lock();
        std::mem::swap(&mut *mine, &mut *theirs);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name.read().as_str())
            .finish()
    }
}

impl ChannelInner {
    /// Queue a frame onto the channel's read queue.
    pub fn queue_frame(&mut self, frame: Frame) {
        self.read_queue.push_back(frame);
    }

    /// Request a hangup: flags the channel and queues a hangup frame so the
    /// owning thread notices.
    pub fn queue_hangup(&mut self) {
        self.softhangup = true;
        let cause = self.hangupcause;
        self.read_queue.push_back(Frame::Control(ControlOp::Hangup { cause }));
    }

    pub fn set_state(&mut self, state: ChannelState) {
        self.state = state;
    }

    /// Has a hangup been requested or completed on this channel?
    pub fn is_hungup(&self) -> bool {
        self.softhangup || self.zombie
    }

    /// Look up a channel variable.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set a channel variable, replacing any existing value in place.
    pub fn set_variable(&mut self, name: &str, value: &str) {
        if let Some(slot) = self.variables.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value.to_string();
        } else {
            self.variables.push((name.to_string(), value.to_string()));
        }
    }

    /// Append clones of all of `other`'s variables, preserving their
    /// insertion order.
    pub fn copy_variables_from(&mut self, other: &ChannelInner) {
        for (name, value) in &other.variables {
            self.variables.push((name.clone(), value.clone()));
        }
    }

    /// Clone the inheritable datastores of `other` onto this channel.
    pub fn inherit_datastores_from(&mut self, other: &ChannelInner) {
        for store in other.datastores.iter().filter(|d| d.inheritable) {
            self.datastores.push(store.clone());
        }
    }

    /// Take over `other`'s group memberships.
    pub fn copy_groups_from(&mut self, other: &ChannelInner) {
        self.groups = other.groups.clone();
    }

    /// Start local music on hold.
    pub fn start_moh(&mut self, class: Option<String>) {
        self.moh = Some(class.unwrap_or_default());
    }

    /// Stop local music on hold.
    pub fn stop_moh(&mut self) {
        self.moh = None;
    }

    pub fn moh_active(&self) -> bool {
        self.moh.is_some()
    }

    /// Refresh the billing snapshot from the current channel identity.
    pub fn update_cdr(&mut self) {
        self.cdr.accountcode = self.accountcode.clone();
        self.cdr.src = self.caller.id.number.clone();
        self.cdr.dst = Some(self.exten.clone());
    }
}

/// Resolve who `chan` is really bridged to, following one driver hop past
/// the immediate partner (proxy drivers report the far side).
pub async fn bridged_channel(chan: &Arc<Channel>) -> Option<Arc<Channel>> {
    let peer = { chan.lock().await.bridge.clone() }?;
    resolve_tech_hop(chan, peer).await
}

/// Same as [`bridged_channel`] but for callers that already hold `chan`'s
/// lock.
pub async fn bridged_channel_from(
    chan: &Arc<Channel>,
    guard: &ChannelInner,
) -> Option<Arc<Channel>> {
    let peer = guard.bridge.clone()?;
    resolve_tech_hop(chan, peer).await
}

async fn resolve_tech_hop(chan: &Arc<Channel>, peer: Arc<Channel>) -> Option<Arc<Channel>> {
    match peer.tech_binding() {
        Some(binding) => binding.tech.bridged_channel(chan, &peer).await,
        None => Some(peer),
    }
}
