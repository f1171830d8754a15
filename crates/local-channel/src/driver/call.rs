//! Placing a call through the pair: identity propagation and dialplan start.

use std::sync::Arc;

use crosspoint_switch_core::{
    connected_line_copy_from_caller, connected_line_copy_to_caller, Channel, ChannelGuard, Result,
    SwitchError,
};
use tracing::{info, warn};

use super::{no_pvt, LocalDriver};
use crate::pair::{pair_of, Side, LOCK_RETRY_TICK};

impl LocalDriver {
    /// `call` on the caller-facing endpoint: copy everything the dialplan
    /// side needs from the caller-facing side, validate the destination and
    /// start dialplan execution on the `;2` endpoint.
    pub(crate) async fn place_call(&self, ast: &Arc<Channel>, dest: &str) -> Result<()> {
        let Some(pair) = pair_of(ast) else {
            return Err(no_pvt(ast));
        };

        // Lock order on entry mirrors every other adapter op: our own
        // endpoint, then the pair mutex, then the partner with back-off.
        let mut us_guard: Option<ChannelGuard> = Some(ast.lock().await);
        let mut state = pair.lock_state().await;
        if state.side_of(ast) != Some(Side::Owner) {
            warn!("call on '{}', which is not the caller-facing endpoint", ast.name());
            return Err(SwitchError::NotSupported);
        }
        let (outbound, mut ob_guard) = loop {
            let Some(outbound) = state.outbound.clone() else {
                return Err(SwitchError::Internal(
                    "dialplan endpoint gone before call".into(),
                ));
            };
            match outbound.try_lock() {
                Some(guard) => break (outbound, guard),
                None => {
                    drop(state);
                    drop(us_guard.take());
                    tokio::time::sleep(LOCK_RETRY_TICK).await;
                    us_guard = Some(ast.lock().await);
                    state = pair.lock_state().await;
                }
            }
        };
        let Some(owner_guard) = us_guard.as_mut() else {
            return Err(SwitchError::Internal("caller endpoint lock lost".into()));
        };

        // The dialplan side presents the caller's identity onward, and sees
        // the caller as its connected party.
        ob_guard.redirecting = owner_guard.redirecting.clone();
        ob_guard.dialed = owner_guard.dialed.clone();
        connected_line_copy_to_caller(&mut ob_guard.caller, &owner_guard.connected);
        connected_line_copy_from_caller(&mut ob_guard.connected, &owner_guard.caller);
        ob_guard.language = owner_guard.language.clone();
        ob_guard.accountcode = owner_guard.accountcode.clone();
        ob_guard.musicclass = owner_guard.musicclass.clone();
        ob_guard.cc = owner_guard.cc.clone();
        ob_guard.update_cdr();

        let caller_number = owner_guard.caller.id.number.clone();
        if !self
            .core()
            .dialplan()
            .exists(
                &ob_guard.context,
                &ob_guard.exten,
                1,
                caller_number.as_deref(),
            )
            .await
        {
            info!(
                "no such extension/context {}@{} while calling local channel",
                ob_guard.exten, ob_guard.context
            );
            return Err(SwitchError::NoSuchExtension {
                exten: ob_guard.exten.clone(),
                context: ob_guard.context.clone(),
            });
        }

        if owner_guard.answered_elsewhere {
            ob_guard.answered_elsewhere = true;
        }

        // Channel variables must arrive in their original insertion order.
        ob_guard.copy_variables_from(&**owner_guard);
        ob_guard.inherit_datastores_from(&**owner_guard);

        // Call-completion interfaces are named by the destination with any
        // trailing option block stripped.
        let reduced = match dest.rfind('/') {
            Some(idx) => &dest[..idx],
            None => dest,
        };
        ob_guard.set_variable("CC_INTERFACES", reduced);

        // Dialplan start may itself lock channels; everything has to be
        // released first.
        drop(ob_guard);
        drop(state);
        drop(us_guard);

        self.core().pbx().start(outbound).await?;

        let mut state = pair.lock_state().await;
        state.flags.launched_pbx = true;
        Ok(())
    }
}
