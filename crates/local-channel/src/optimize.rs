//! Splicing a pair out of the call graph.
//!
//! Once the dialplan side is bridged to a concrete far peer, the pair is
//! pure overhead: every frame crosses two extra queues. On each media write
//! from the dialplan side we check whether the caller-facing endpoint can
//! simply *become* the far peer; when every condition lines up, recording,
//! audio taps, party identity and group state are pre-staged and the switch
//! masquerades the two channels, retiring the pair.
//!
//! Eligibility and the splice itself run under locks taken with `try_lock`
//! only: any contention aborts silently, because the next media write
//! reassesses from scratch.

use std::sync::Arc;

use crosspoint_switch_core::{bridged_channel_from, masquerade_locked, Channel, ChannelGuard};
use tracing::{debug, warn};

use crate::pair::{LocalPair, PairState};

/// Attempt the self-splice. The caller holds the pair mutex (as `state`)
/// and the dialplan-side endpoint's lock (as `outbound_guard`).
pub(crate) async fn check_and_splice(
    pair: &Arc<LocalPair>,
    state: &mut PairState,
    outbound: &Arc<Channel>,
    outbound_guard: &mut ChannelGuard,
) {
    if state.flags.already_masqed || state.flags.no_optimization {
        return;
    }
    let (Some(owner), Some(_)) = (state.owner.clone(), state.outbound.as_ref()) else {
        return;
    };

    // Only a real peer one hop away qualifies; if the transitive resolution
    // differs, an intermediate proxy still sits in between.
    let Some(peer) = outbound_guard.bridge.clone() else {
        return;
    };
    match bridged_channel_from(outbound, &**outbound_guard).await {
        Some(resolved) if Arc::ptr_eq(&resolved, &peer) => {}
        _ => return,
    }

    // Lock everything needed one piece at a time and give up on any
    // contention; there will be another chance shortly.
    let Some(mut peer_guard) = peer.try_lock() else {
        return;
    };
    if peer_guard.is_hungup() {
        return;
    }
    let Some(mut owner_guard) = owner.try_lock() else {
        return;
    };
    if owner_guard.is_hungup() {
        return;
    }
    // Pending frames on the caller-facing side would be transferred to the
    // wrong call during the splice.
    if !owner_guard.read_queue.is_empty() {
        return;
    }

    debug!(
        "splicing '{}' onto '{}', retiring pair {}",
        owner.name(),
        peer.name(),
        pair.id()
    );

    // A recording on the caller-facing side must survive the identity swap;
    // pre-swapping the monitor slots makes the masquerade's own swap land it
    // back where it started.
    if owner_guard.monitor.is_some() && peer_guard.monitor.is_none() {
        std::mem::swap(&mut owner_guard.monitor, &mut peer_guard.monitor);
    }
    // Audio tap points move to the side that survives.
    if outbound_guard.audiohooks.is_some() {
        let (og, ow) = (&mut **outbound_guard, &mut *owner_guard);
        std::mem::swap(&mut og.audiohooks, &mut ow.audiohooks);
    }
    // Party identity set from the dialplan lands on the caller-facing side
    // before both endpoints disappear; swap rather than copy so the far
    // peer's own data survives a later bridge resumption.
    if owner_guard.caller.is_valid() {
        std::mem::swap(&mut owner_guard.caller, &mut peer_guard.caller);
    }
    if owner_guard.redirecting.is_valid() {
        std::mem::swap(&mut owner_guard.redirecting, &mut peer_guard.redirecting);
    }
    if owner_guard.dialed.is_valid() {
        std::mem::swap(&mut owner_guard.dialed, &mut peer_guard.dialed);
    }
    {
        let og = &**outbound_guard;
        owner_guard.copy_groups_from(og);
    }

    let fixups = masquerade_locked(&owner, &mut owner_guard, &peer, &mut peer_guard);
    state.flags.already_masqed = true;
    drop(owner_guard);
    drop(peer_guard);

    for fixup in fixups {
        // Our own binding moved onto a new channel object; rebind through
        // the pair state we already hold instead of re-entering the driver.
        if let Some(owning_pair) = fixup.binding.pvt_as::<LocalPair>() {
            if Arc::ptr_eq(&owning_pair, pair) {
                if state
                    .owner
                    .as_ref()
                    .is_some_and(|c| Arc::ptr_eq(c, &fixup.old))
                {
                    state.owner = Some(fixup.new.clone());
                } else if state
                    .outbound
                    .as_ref()
                    .is_some_and(|c| Arc::ptr_eq(c, &fixup.old))
                {
                    state.outbound = Some(fixup.new.clone());
                }
                continue;
            }
        }
        if let Err(e) = fixup.binding.tech.fixup(&fixup.old, &fixup.new).await {
            warn!("driver fixup after splice failed: {}", e);
        }
    }
}
