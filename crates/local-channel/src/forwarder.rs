//! Frame forwarding between the two endpoints of a pair.
//!
//! Anything written on one endpoint surfaces as an inbound frame on the
//! other. The delicate part is lock acquisition: the caller arrives holding
//! the pair mutex (and usually its own endpoint's lock, handed to the
//! switch), while the partner endpoint may be held by a thread that is in
//! turn waiting for the pair mutex. Every partner acquisition is therefore
//! try-then-back-off, and a hangup that fires during a back-off window hands
//! the pair's destruction over to us via the `cancel_queue` flag.

use std::sync::Arc;

use crosspoint_switch_core::{
    connected_line_copy_to_caller, Channel, ChannelGuard, ChannelState, ControlOp, Frame,
};
use tracing::debug;

use crate::errors::LocalError;
use crate::pair::{LocalPair, PairGuard, Side, LOCK_RETRY_TICK};

/// Deliver `frame` from the `from` side onto the partner's read queue.
///
/// The caller must hold the pair mutex and pass it in as `state`. `us` is
/// the initiating endpoint when there is one; `us_guard` is the slot holding
/// its channel lock when the caller also owns that lock, and selects the
/// back-off flavor (briefly yielding the endpoint lock rather than just
/// sleeping).
///
/// On success the pair mutex comes back still held. On
/// [`LocalError::ForwardCancelled`] a hangup won the race: the pair has
/// already been destroyed and the caller must not touch it again.
pub(crate) async fn queue_frame(
    pair: &Arc<LocalPair>,
    mut state: PairGuard,
    from: Side,
    frame: Frame,
    us: Option<&Arc<Channel>>,
    mut us_guard: Option<&mut Option<ChannelGuard>>,
) -> Result<PairGuard, LocalError> {
    let mut other = state.partner_of(from);
    if other.is_none() {
        return Ok(state);
    }

    // Frames fed into facing generator loops would circulate forever; drop
    // them when both endpoints have one attached.
    if let (Some(us), Some(partner)) = (us, other.as_ref()) {
        if us.has_generator() && partner.has_generator() {
            return Ok(state);
        }
    }

    state.flags.glare_detect = true;

    // Pin the partner. On contention the pair mutex has to go back up for
    // grabs; whoever holds the partner may be waiting on it.
    let mut locked: Option<(Arc<Channel>, ChannelGuard)> = None;
    loop {
        let Some(target) = other.clone() else { break };
        if let Some(guard) = target.try_lock() {
            locked = Some((target, guard));
            break;
        }
        drop(state);
        match (us, us_guard.as_mut()) {
            (Some(us_chan), Some(slot)) if slot.is_some() => {
                // Yield our own endpoint lock to whoever needs it, then win
                // the pair mutex back before retrying.
                state = loop {
                    let held = slot.take();
                    drop(held);
                    tokio::task::yield_now().await;
                    **slot = Some(us_chan.lock().await);
                    if let Some(reacquired) = pair.try_lock_state() {
                        break reacquired;
                    }
                };
            }
            _ => {
                tokio::time::sleep(LOCK_RETRY_TICK).await;
                state = pair.lock_state().await;
            }
        }
        // The slots may have been cleared or rebound while the mutex was
        // released.
        other = state.partner_of(from);
    }

    // A pvt flag can only change under the pair mutex, so this is the one
    // place a queue cancellation can be observed.
    if state.flags.cancel_queue {
        debug!("pair {} hung up during forward, tearing it down", pair.id());
        drop(state);
        drop(locked);
        pair.destroy();
        return Err(LocalError::ForwardCancelled);
    }

    if let Some((_target, mut guard)) = locked {
        if matches!(frame, Frame::Control(ControlOp::Ringing)) {
            guard.set_state(ChannelState::Ringing);
        }
        // Connected-line data arriving from the dialplan side doubles as the
        // caller identity seen on the caller-facing side.
        if from == Side::Outbound {
            if let Frame::Control(ControlOp::ConnectedLine(connected)) = &frame {
                connected_line_copy_to_caller(&mut guard.caller, connected);
            }
        }
        guard.queue_frame(frame);
    }

    state.flags.glare_detect = false;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use crosspoint_switch_core::{
        AmaFlags, ChannelParams, Dialplan, FormatCap, JitterBufferConfig, PbxRunner,
        Result as SwitchResult, SwitchCore,
    };

    use crate::pair::parse_destination;

    struct EmptyDialplan;

    #[async_trait]
    impl Dialplan for EmptyDialplan {
        async fn exists(&self, _: &str, _: &str, _: u32, _: Option<&str>) -> bool {
            false
        }
    }

    struct NoopPbx;

    #[async_trait]
    impl PbxRunner for NoopPbx {
        async fn start(&self, _chan: Arc<Channel>) -> SwitchResult<()> {
            Ok(())
        }
    }

    async fn fixture() -> (Arc<LocalPair>, Arc<Channel>, Arc<Channel>) {
        let core = SwitchCore::new(Arc::new(EmptyDialplan), Arc::new(NoopPbx));
        let parsed = parse_destination("100@default");
        let pair = LocalPair::new(&parsed, FormatCap::any(), JitterBufferConfig::default());
        let alloc = |name: &str, state| {
            core.alloc_channel(ChannelParams {
                name: name.to_string(),
                state,
                exten: "100".to_string(),
                context: "default".to_string(),
                linkedid: String::new(),
                accountcode: String::new(),
                amaflags: AmaFlags::Unset,
            })
            .expect("alloc")
        };
        let owner = alloc(
            "Local/100@default-0000;1",
            crosspoint_switch_core::ChannelState::Down,
        );
        let outbound = alloc(
            "Local/100@default-0000;2",
            crosspoint_switch_core::ChannelState::Ring,
        );
        {
            let mut state = pair.lock_state().await;
            state.owner = Some(owner.clone());
            state.outbound = Some(outbound.clone());
        }
        (pair, owner, outbound)
    }

    #[tokio::test]
    async fn test_forward_success_keeps_pair_locked() {
        let (pair, owner, outbound) = fixture().await;
        let state = pair.lock_state().await;
        let state = queue_frame(
            &pair,
            state,
            Side::Owner,
            Frame::Text("hi".to_string()),
            Some(&owner),
            None,
        )
        .await
        .expect("forward");
        assert!(!state.flags.glare_detect);
        drop(state);
        assert_eq!(outbound.lock().await.read_queue.len(), 1);
        assert!(!pair.is_destroyed());
    }

    #[tokio::test]
    async fn test_forward_without_partner_is_a_noop() {
        let (pair, owner, _outbound) = fixture().await;
        {
            let mut state = pair.lock_state().await;
            state.outbound = None;
        }
        let state = pair.lock_state().await;
        let state = queue_frame(
            &pair,
            state,
            Side::Owner,
            Frame::Text("void".to_string()),
            Some(&owner),
            None,
        )
        .await
        .expect("forward");
        drop(state);
        assert!(!pair.is_destroyed());
    }

    /// A hangup that lands while the forward is parked on the partner's lock
    /// hands destruction over to the forwarder.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_queue_destroys_pair_and_fails() {
        let (pair, owner, outbound) = fixture().await;
        let blocker = outbound.lock().await;

        let task = {
            let pair = pair.clone();
            let owner = owner.clone();
            tokio::spawn(async move {
                let state = pair.lock_state().await;
                queue_frame(
                    &pair,
                    state,
                    Side::Owner,
                    Frame::Text("glare".to_string()),
                    Some(&owner),
                    None,
                )
                .await
            })
        };

        // Wait until the forward has flagged itself in flight, then model
        // the losing side of the race: both endpoints hang up and defer
        // destruction to the forwarder.
        loop {
            if let Some(mut state) = pair.try_lock_state() {
                if state.flags.glare_detect {
                    state.owner = None;
                    state.outbound = None;
                    state.flags.cancel_queue = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        drop(blocker);

        let res = task.await.expect("task");
        assert!(matches!(res, Err(LocalError::ForwardCancelled)));
        assert!(pair.is_destroyed());
    }
}
