//! Channel identity splicing.
//!
//! A masquerade makes `original` *become* `clone`: every piece of identity
//! that external parties observe moves from the clone onto the original,
//! while the clone is left behind as a zombie carrying the original's old
//! identity and a pending hangup. Bridge pointers stay with the channel
//! objects, so whoever was bridged to `original` now talks to the clone's
//! former call, and whoever was bridged to `clone` finds a zombie and tears
//! down.
//!
//! Driver bindings move with the identities. Because a driver's stored
//! channel references go stale when its binding lands on a different object,
//! the swap reports the [`FixupNeeded`] calls the caller must dispatch. They
//! are returned rather than dispatched here since the caller may itself be
//! the driver whose state needs rebinding, already holding its own locks.

use std::sync::Arc;

use tracing::debug;

use super::{Channel, ChannelInner, TechBinding};

/// A driver whose channel object changed during a masquerade: the caller
/// must deliver `fixup(old, new)` to `binding.tech`.
pub struct FixupNeeded {
    pub binding: TechBinding,
    pub old: Arc<Channel>,
    pub new: Arc<Channel>,
}

/// Swap channel identities. Both channel locks must be held by the caller;
/// the guards passed in prove it.
pub fn masquerade_locked(
    original: &Arc<Channel>,
    og: &mut ChannelInner,
    clone: &Arc<Channel>,
    cg: &mut ChannelInner,
) -> Vec<FixupNeeded> {
    let original_name = original.name();
    let clone_name = clone.name();
    debug!(
        "masquerading '{}' into '{}'",
        clone_name, original_name
    );

    original.set_name(clone_name);
    clone.set_name(format!("{original_name}<ZOMBIE>"));

    // Driver bindings travel with the identities they manage.
    let from_original = original.swap_tech(None);
    let from_clone = clone.swap_tech(None);
    original.swap_tech(from_clone.clone());
    clone.swap_tech(from_original.clone());

    let mut fixups = Vec::new();
    if let Some(binding) = from_clone {
        fixups.push(FixupNeeded {
            binding,
            old: clone.clone(),
            new: original.clone(),
        });
    }
    if let Some(binding) = from_original {
        fixups.push(FixupNeeded {
            binding,
            old: original.clone(),
            new: clone.clone(),
        });
    }

    original.swap_generator_with(clone);

    std::mem::swap(&mut og.state, &mut cg.state);
    std::mem::swap(&mut og.caller, &mut cg.caller);
    std::mem::swap(&mut og.connected, &mut cg.connected);
    std::mem::swap(&mut og.redirecting, &mut cg.redirecting);
    std::mem::swap(&mut og.dialed, &mut cg.dialed);
    std::mem::swap(&mut og.variables, &mut cg.variables);
    std::mem::swap(&mut og.datastores, &mut cg.datastores);
    std::mem::swap(&mut og.groups, &mut cg.groups);
    std::mem::swap(&mut og.context, &mut cg.context);
    std::mem::swap(&mut og.exten, &mut cg.exten);
    std::mem::swap(&mut og.priority, &mut cg.priority);
    std::mem::swap(&mut og.nativeformats, &mut cg.nativeformats);
    std::mem::swap(&mut og.readformat, &mut cg.readformat);
    std::mem::swap(&mut og.writeformat, &mut cg.writeformat);
    std::mem::swap(&mut og.amaflags, &mut cg.amaflags);
    std::mem::swap(&mut og.accountcode, &mut cg.accountcode);
    std::mem::swap(&mut og.language, &mut cg.language);
    std::mem::swap(&mut og.musicclass, &mut cg.musicclass);
    std::mem::swap(&mut og.linkedid, &mut cg.linkedid);
    std::mem::swap(&mut og.hangupcause, &mut cg.hangupcause);
    std::mem::swap(&mut og.answered_elsewhere, &mut cg.answered_elsewhere);
    std::mem::swap(&mut og.monitor, &mut cg.monitor);
    std::mem::swap(&mut og.audiohooks, &mut cg.audiohooks);
    std::mem::swap(&mut og.moh, &mut cg.moh);
    std::mem::swap(&mut og.jitter, &mut cg.jitter);
    std::mem::swap(&mut og.cc, &mut cg.cc);
    std::mem::swap(&mut og.cdr, &mut cg.cdr);

    // Pending frames follow the surviving identity; the zombie is left with
    // nothing but its hangup.
    let pending: Vec<_> = cg.read_queue.drain(..).collect();
    og.read_queue.extend(pending);

    cg.zombie = true;
    cg.queue_hangup();

    fixups
}
