//! The self-splice: eligibility and the identity swap.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{bridge, harness, outbound_of, pair, plain_channel, read_queue};
use crosspoint_local_channel::api;
use crosspoint_switch_core::{
    bridged_channel, CallerParty, Channel, ChannelTech, FormatCap, Format, Frame, Monitor,
    PartyId,
};

async fn voice_write(h: &common::Harness, chan: &Arc<Channel>) {
    h.driver
        .write(chan, Frame::voice(Format::Ulaw, &[0x2a; 160]))
        .await
        .expect("write");
}

/// Full happy path: caller bridged to `;1`, dialplan bridges `;2` to a far
/// peer, first media write splices the pair away.
#[tokio::test]
async fn test_media_write_splices_pair_away() {
    let h = harness(&[("internal", "1000")]);
    let owner = h
        .driver
        .request("1000@internal", FormatCap::any(), None)
        .await
        .expect("request");
    let outbound = outbound_of(&owner).await;
    let p = pair(&owner);

    let x = plain_channel(&h.core, "SIP/x");
    let y = plain_channel(&h.core, "SIP/y");
    bridge(&x, &owner).await;
    h.driver
        .call(&owner, "1000@internal", Duration::from_secs(30))
        .await
        .expect("call");
    bridge(&outbound, &y).await;

    let owner_name = owner.name();
    voice_write(&h, &outbound).await;

    // The caller-facing endpoint became the far peer.
    assert!(p.lock_state().await.flags.already_masqed);
    assert_eq!(owner.name(), "SIP/y");
    assert_eq!(y.name(), format!("{owner_name}<ZOMBIE>"));

    // The outside caller now talks straight to the far call.
    let resolved = bridged_channel(&x).await.expect("bridge resolution");
    assert!(Arc::ptr_eq(&resolved, &owner));
    assert_eq!(resolved.name(), "SIP/y");

    // The pair now holds the zombie in the caller-facing slot.
    let state = p.lock_state().await;
    assert!(state.owner.as_ref().is_some_and(|c| Arc::ptr_eq(c, &y)));
    drop(state);

    // Once spliced, writes on either endpoint go nowhere.
    let before = read_queue(&y).await.len();
    h.driver
        .write(&outbound, Frame::Text("late".to_string()))
        .await
        .expect("write");
    assert_eq!(read_queue(&y).await.len(), before);

    // Teardown: the dialplan side ends, then the zombie is reaped.
    h.core.hangup_channel(&outbound).await.expect("hangup ;2");
    assert!(!p.is_destroyed());
    h.core.hangup_channel(&y).await.expect("hangup zombie");
    assert!(p.is_destroyed());
    assert!(h.driver.registry().is_empty());
    assert_eq!(h.driver.module().users(), 0);
}

#[tokio::test]
async fn test_no_optimization_holds_until_manager_clears_it() {
    let h = harness(&[("internal", "1000")]);
    let owner = h
        .driver
        .request("1000@internal/n", FormatCap::any(), None)
        .await
        .expect("request");
    let outbound = outbound_of(&owner).await;
    let p = pair(&owner);

    let x = plain_channel(&h.core, "SIP/x");
    let y = plain_channel(&h.core, "SIP/y");
    bridge(&x, &owner).await;
    h.driver
        .call(&owner, "1000@internal/n", Duration::from_secs(30))
        .await
        .expect("call");
    bridge(&outbound, &y).await;

    // Media keeps traversing the pair.
    voice_write(&h, &outbound).await;
    assert!(!p.lock_state().await.flags.already_masqed);
    assert_eq!(read_queue(&owner).await.len(), 1);

    let response = api::optimize_away(&h.driver, Some(&owner.name()))
        .await
        .expect("manager action");
    assert_eq!(response, "Queued channel to be optimized away");

    // The switch has consumed the pending frames by the next write.
    owner.lock().await.read_queue.clear();
    voice_write(&h, &outbound).await;
    assert!(p.lock_state().await.flags.already_masqed);
    assert_eq!(owner.name(), "SIP/y");
}

#[tokio::test]
async fn test_bridge_report_resolves_past_the_pair() {
    let h = harness(&[("internal", "1000")]);
    let owner = h
        .driver
        .request("1000@internal/b", FormatCap::any(), None)
        .await
        .expect("request");
    let outbound = outbound_of(&owner).await;

    let x = plain_channel(&h.core, "SIP/x");
    let y = plain_channel(&h.core, "SIP/y");
    bridge(&x, &owner).await;
    bridge(&outbound, &y).await;

    // An external query one hop from `x` lands on the far peer, not the
    // partner endpoint.
    let reported = h
        .driver
        .bridged_channel(&x, &owner)
        .await
        .expect("bridged channel");
    assert!(Arc::ptr_eq(&reported, &y));

    let resolved = bridged_channel(&x).await.expect("resolution");
    assert!(Arc::ptr_eq(&resolved, &y));
}

#[tokio::test]
async fn test_without_bridge_report_the_pair_stays_visible() {
    let h = harness(&[("internal", "1000")]);
    let owner = h
        .driver
        .request("1000@internal", FormatCap::any(), None)
        .await
        .expect("request");
    let outbound = outbound_of(&owner).await;
    let x = plain_channel(&h.core, "SIP/x");
    let y = plain_channel(&h.core, "SIP/y");
    bridge(&x, &owner).await;
    bridge(&outbound, &y).await;

    let reported = h
        .driver
        .bridged_channel(&x, &owner)
        .await
        .expect("bridged channel");
    assert!(Arc::ptr_eq(&reported, &owner));
}

#[tokio::test]
async fn test_no_splice_without_far_peer() {
    let h = harness(&[("internal", "1000")]);
    let owner = h
        .driver
        .request("1000@internal", FormatCap::any(), None)
        .await
        .expect("request");
    let outbound = outbound_of(&owner).await;
    let x = plain_channel(&h.core, "SIP/x");
    bridge(&x, &owner).await;

    voice_write(&h, &outbound).await;

    let p = pair(&outbound);
    assert!(!p.lock_state().await.flags.already_masqed);
    assert_eq!(read_queue(&owner).await.len(), 1);
}

#[tokio::test]
async fn test_no_splice_while_caller_side_has_pending_frames() {
    let h = harness(&[("internal", "1000")]);
    let owner = h
        .driver
        .request("1000@internal", FormatCap::any(), None)
        .await
        .expect("request");
    let outbound = outbound_of(&owner).await;
    let x = plain_channel(&h.core, "SIP/x");
    let y = plain_channel(&h.core, "SIP/y");
    bridge(&x, &owner).await;
    bridge(&outbound, &y).await;

    // A frame is still waiting to be read on the caller-facing side; a
    // splice now would misroute it.
    owner.lock().await.queue_frame(Frame::Text("pending".to_string()));

    voice_write(&h, &outbound).await;
    assert!(!pair(&owner).lock_state().await.flags.already_masqed);

    owner.lock().await.read_queue.clear();
    voice_write(&h, &outbound).await;
    assert!(pair(&owner).lock_state().await.flags.already_masqed);
}

#[tokio::test]
async fn test_no_splice_through_an_intermediate_proxy() {
    let h = harness(&[("internal", "1000"), ("internal", "2000")]);
    let owner1 = h
        .driver
        .request("1000@internal", FormatCap::any(), None)
        .await
        .expect("request 1");
    let outbound1 = outbound_of(&owner1).await;

    // The second pair reports its far side on bridge queries, so the
    // one-step partner of `;2` and the transitive resolution differ.
    let owner2 = h
        .driver
        .request("2000@internal/b", FormatCap::any(), None)
        .await
        .expect("request 2");
    let outbound2 = outbound_of(&owner2).await;
    let y = plain_channel(&h.core, "SIP/y");
    bridge(&outbound1, &owner2).await;
    bridge(&outbound2, &y).await;

    voice_write(&h, &outbound1).await;
    assert!(!pair(&owner1).lock_state().await.flags.already_masqed);
}

#[tokio::test]
async fn test_monitor_survives_the_splice() {
    let h = harness(&[("internal", "1000")]);
    let owner = h
        .driver
        .request("1000@internal", FormatCap::any(), None)
        .await
        .expect("request");
    let outbound = outbound_of(&owner).await;
    let x = plain_channel(&h.core, "SIP/x");
    let y = plain_channel(&h.core, "SIP/y");
    bridge(&x, &owner).await;
    bridge(&outbound, &y).await;

    owner.lock().await.monitor = Some(Monitor {
        filename_base: "call-recording".to_string(),
    });

    voice_write(&h, &outbound).await;

    // The recording stayed with the surviving identity.
    let guard = owner.lock().await;
    assert_eq!(
        guard.monitor.as_ref().map(|m| m.filename_base.as_str()),
        Some("call-recording")
    );
    drop(guard);
    assert!(y.lock().await.monitor.is_none());
}

#[tokio::test]
async fn test_caller_identity_survives_the_splice() {
    let h = harness(&[("internal", "1000")]);
    let owner = h
        .driver
        .request("1000@internal", FormatCap::any(), None)
        .await
        .expect("request");
    let outbound = outbound_of(&owner).await;
    let x = plain_channel(&h.core, "SIP/x");
    let y = plain_channel(&h.core, "SIP/y");
    bridge(&x, &owner).await;
    bridge(&outbound, &y).await;

    let dialplan_set = CallerParty {
        id: PartyId {
            name: Some("Queue".to_string()),
            number: Some("1000".to_string()),
            subaddress: None,
        },
        ani: PartyId::default(),
    };
    owner.lock().await.caller = dialplan_set.clone();
    y.lock().await.caller = CallerParty {
        id: PartyId::number("far"),
        ani: PartyId::default(),
    };

    voice_write(&h, &outbound).await;

    // Pre-swap plus the masquerade's own swap nets out to the caller
    // identity staying on the surviving channel object.
    assert_eq!(owner.lock().await.caller, dialplan_set);
    assert_eq!(y.lock().await.caller.id.number.as_deref(), Some("far"));
}
