//! The shared record behind one Local channel pair.
//!
//! Every `Local/...` destination materializes as two back-to-back endpoints
//! sharing one [`LocalPair`]: the caller-facing side (`;1`, bridged outward)
//! and the dialplan side (`;2`, on which the extension script runs). The
//! pair owns nothing but coordination state: both endpoints belong to the
//! switch, and each endpoint carries only a weak binding back to the pair.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crosspoint_switch_core::{Channel, FormatCap, JitterBufferConfig, ModuleUser};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error};
use uuid::Uuid;

/// How long a contended lock dance sleeps before restarting.
pub(crate) const LOCK_RETRY_TICK: Duration = Duration::from_micros(1);

/// Unique identifier for a channel pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairId(Uuid);

impl PairId {
    fn new() -> Self {
        PairId(Uuid::new_v4())
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which endpoint of a pair a channel is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The `;1` endpoint: bridged outward toward the caller.
    Owner,
    /// The `;2` endpoint: the dialplan runs here.
    Outbound,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Owner => Side::Outbound,
            Side::Outbound => Side::Owner,
        }
    }
}

/// Coordination flags, all guarded by the pair mutex.
#[derive(Debug, Default, Clone, Copy)]
pub struct PairFlags {
    /// A frame forward is in flight; hangups must not free the pair.
    pub glare_detect: bool,
    /// A hangup raced with the in-flight forward; the forwarder destroys
    /// the pair on its way out. Only ever set while `glare_detect` holds.
    pub cancel_queue: bool,
    /// The pair has spliced itself out of the call graph; no more frames
    /// are forwarded.
    pub already_masqed: bool,
    /// Dialplan execution was started on the outbound endpoint.
    pub launched_pbx: bool,
    /// The pair never splices itself away. Cleared by the manager action.
    pub no_optimization: bool,
    /// Bridge queries resolve past the pair to the far peer.
    pub bridge_report: bool,
    /// Hold/unhold travel as frames instead of starting hold music locally.
    pub moh_passthru: bool,
}

/// Mutable pair state, protected by the pair mutex.
pub struct PairState {
    pub flags: PairFlags,
    /// The `;1` endpoint, cleared during teardown.
    pub owner: Option<Arc<Channel>>,
    /// The `;2` endpoint, cleared during teardown.
    pub outbound: Option<Arc<Channel>>,
    /// Module use token held on behalf of the `;1` endpoint.
    pub u_owner: Option<ModuleUser>,
    /// Module use token held on behalf of the `;2` endpoint.
    pub u_outbound: Option<ModuleUser>,
}

impl PairState {
    /// Which side of the pair is `chan`?
    pub fn side_of(&self, chan: &Arc<Channel>) -> Option<Side> {
        if self.owner.as_ref().is_some_and(|c| Arc::ptr_eq(c, chan)) {
            Some(Side::Owner)
        } else if self.outbound.as_ref().is_some_and(|c| Arc::ptr_eq(c, chan)) {
            Some(Side::Outbound)
        } else {
            None
        }
    }

    pub fn endpoint(&self, side: Side) -> Option<Arc<Channel>> {
        match side {
            Side::Owner => self.owner.clone(),
            Side::Outbound => self.outbound.clone(),
        }
    }

    /// The endpoint opposite `side`.
    pub fn partner_of(&self, side: Side) -> Option<Arc<Channel>> {
        self.endpoint(side.other())
    }
}

/// Owned guard over the pair mutex.
pub type PairGuard = OwnedMutexGuard<PairState>;

/// One Local channel pair.
pub struct LocalPair {
    id: PairId,
    exten: String,
    context: String,
    reqformat: FormatCap,
    jb_conf: JitterBufferConfig,
    state: Arc<Mutex<PairState>>,
    destroyed: AtomicBool,
}

impl LocalPair {
    pub(crate) fn new(
        parsed: &ParsedDestination,
        reqformat: FormatCap,
        jb_conf: JitterBufferConfig,
    ) -> Arc<LocalPair> {
        Arc::new(LocalPair {
            id: PairId::new(),
            exten: parsed.exten.clone(),
            context: parsed.context.clone(),
            reqformat,
            jb_conf,
            state: Arc::new(Mutex::new(PairState {
                flags: PairFlags {
                    no_optimization: parsed.no_optimization,
                    bridge_report: parsed.bridge_report,
                    moh_passthru: parsed.moh_passthru,
                    ..PairFlags::default()
                },
                owner: None,
                outbound: None,
                u_owner: None,
                u_outbound: None,
            })),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> PairId {
        self.id
    }

    pub fn exten(&self) -> &str {
        &self.exten
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn reqformat(&self) -> FormatCap {
        self.reqformat
    }

    pub fn jb_conf(&self) -> &JitterBufferConfig {
        &self.jb_conf
    }

    /// Take the pair mutex, waiting if necessary.
    pub async fn lock_state(&self) -> PairGuard {
        self.state.clone().lock_owned().await
    }

    /// Take the pair mutex without waiting.
    pub fn try_lock_state(&self) -> Option<PairGuard> {
        self.state.clone().try_lock_owned().ok()
    }

    /// Retire the pair. Must happen exactly once, after both endpoints have
    /// detached (or been abandoned during a failed allocation).
    pub(crate) fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            error!("local pair {} destroyed twice", self.id);
            return;
        }
        debug!("destroyed local pair {} ({}@{})", self.id, self.exten, self.context);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for LocalPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPair")
            .field("id", &self.id)
            .field("exten", &self.exten)
            .field("context", &self.context)
            .finish()
    }
}

/// Release the pair mutex, sleep one scheduling tick and take it again.
/// The back-off primitive for dances that hold no channel lock of their own.
pub(crate) async fn pair_backoff(pair: &LocalPair, guard: PairGuard) -> PairGuard {
    drop(guard);
    tokio::time::sleep(LOCK_RETRY_TICK).await;
    pair.lock_state().await
}

/// Fetch the pair bound to a Local endpoint, if the binding is still alive.
pub fn pair_of(chan: &Arc<Channel>) -> Option<Arc<LocalPair>> {
    chan.tech_binding()?.pvt_as::<LocalPair>()
}

/// A destination string taken apart: `EXTEN[/OPTS][@CONTEXT]`.
///
/// Options are stripped before the `@` separator is sought, so the context
/// must precede any option block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedDestination {
    pub exten: String,
    pub context: String,
    /// Whether an `@CONTEXT` was actually present, as opposed to the
    /// default applying. Device-state lookups refuse destinations without
    /// one.
    pub context_explicit: bool,
    pub no_optimization: bool,
    pub jb_enabled: bool,
    pub bridge_report: bool,
    pub moh_passthru: bool,
}

pub(crate) fn parse_destination(dest: &str) -> ParsedDestination {
    let (head, opts) = match dest.split_once('/') {
        Some((head, opts)) => (head, Some(opts)),
        None => (dest, None),
    };

    let mut no_optimization = false;
    let mut jb_enabled = false;
    let mut bridge_report = false;
    let mut moh_passthru = false;
    if let Some(opts) = opts {
        if opts.contains('n') {
            no_optimization = true;
        }
        if opts.contains('j') {
            if no_optimization {
                jb_enabled = true;
            } else {
                error!(
                    "the 'j' option requires the 'n' option to enable the jitter buffer on '{}'",
                    dest
                );
            }
        }
        if opts.contains('b') {
            bridge_report = true;
        }
        if opts.contains('m') {
            moh_passthru = true;
        }
    }

    let (exten, context, context_explicit) = match head.split_once('@') {
        Some((exten, context)) => (exten, context, true),
        None => (head, "default", false),
    };

    ParsedDestination {
        exten: exten.to_string(),
        context: context.to_string(),
        context_explicit,
        no_optimization,
        jb_enabled,
        bridge_report,
        moh_passthru,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_destination_defaults_context() {
        let parsed = parse_destination("1000");
        assert_eq!(parsed.exten, "1000");
        assert_eq!(parsed.context, "default");
        assert!(!parsed.context_explicit);
        assert!(!parsed.no_optimization);
        assert!(!parsed.jb_enabled);
    }

    #[test]
    fn test_parse_context_and_options() {
        let parsed = parse_destination("1000@internal/nbm");
        assert_eq!(parsed.exten, "1000");
        assert_eq!(parsed.context, "internal");
        assert!(parsed.context_explicit);
        assert!(parsed.no_optimization);
        assert!(parsed.bridge_report);
        assert!(parsed.moh_passthru);
    }

    #[test]
    fn test_jitter_buffer_requires_no_optimization() {
        let with_n = parse_destination("1000@internal/nj");
        assert!(with_n.jb_enabled);

        let without_n = parse_destination("1000@internal/j");
        assert!(!without_n.jb_enabled);
        assert!(!without_n.no_optimization);
    }

    #[test]
    fn test_options_are_stripped_before_context_is_sought() {
        // Options cut first, so a context after the slash is lost and the
        // default applies.
        let parsed = parse_destination("1000/n@internal");
        assert_eq!(parsed.exten, "1000");
        assert_eq!(parsed.context, "default");
        assert!(!parsed.context_explicit);
        assert!(parsed.no_optimization);
    }

    #[test]
    fn test_parse_round_trip() {
        let rebuilt = "1000@internal/nb".to_string();
        let parsed = parse_destination(&rebuilt);
        let emitted = format!(
            "{}@{}/{}{}",
            parsed.exten,
            parsed.context,
            if parsed.no_optimization { "n" } else { "" },
            if parsed.bridge_report { "b" } else { "" },
        );
        assert_eq!(emitted, rebuilt);
        let reparsed = parse_destination(&emitted);
        assert_eq!(reparsed, parsed);
    }

    #[test]
    fn test_side_other() {
        assert_eq!(Side::Owner.other(), Side::Outbound);
        assert_eq!(Side::Outbound.other(), Side::Owner);
    }
}
