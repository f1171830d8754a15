//! Direction-aware teardown of one endpoint of a pair.

use std::sync::Arc;

use crosspoint_switch_core::{Channel, ChannelGuard, ControlOp, Frame, HangupCause, Result};
use tracing::{debug, warn};

use super::LocalDriver;
use crate::errors::LocalError;
use crate::forwarder::queue_frame;
use crate::pair::{pair_of, Side, LOCK_RETRY_TICK};

impl LocalDriver {
    /// `hangup` on either endpoint. The pair dies on the second of the two
    /// hangups, unless a frame forward is in flight at that instant, in
    /// which case the forwarder destroys it on its way out.
    pub(crate) async fn hangup_endpoint(&self, ast: &Arc<Channel>) -> Result<()> {
        let Some(pair) = pair_of(ast) else {
            // Already detached by an earlier hangup; nothing left to do.
            debug!("hangup on '{}' with no local state", ast.name());
            return Ok(());
        };

        let mut us_guard: Option<ChannelGuard> = Some(ast.lock().await);
        let mut state = pair.lock_state().await;
        let Some(side) = state.side_of(ast) else {
            warn!("hangup on '{}' which is no longer part of its pair", ast.name());
            ast.unbind_tech();
            return Ok(());
        };

        let answered_elsewhere = us_guard
            .as_ref()
            .map(|g| g.answered_elsewhere)
            .unwrap_or(false);
        let hangupcause = us_guard
            .as_ref()
            .map(|g| g.hangupcause)
            .unwrap_or(HangupCause::NOT_DEFINED);

        match side {
            Side::Outbound => {
                // The dialplan outcome crosses over before the endpoint
                // detaches.
                let status = us_guard
                    .as_ref()
                    .and_then(|g| g.variable("DIALSTATUS"))
                    .map(str::to_string);
                if let Some(status) = status {
                    let locked = loop {
                        let Some(owner) = state.owner.clone() else { break None };
                        match owner.try_lock() {
                            Some(guard) => break Some(guard),
                            None => {
                                drop(state);
                                drop(us_guard.take());
                                tokio::time::sleep(LOCK_RETRY_TICK).await;
                                us_guard = Some(ast.lock().await);
                                state = pair.lock_state().await;
                            }
                        }
                    };
                    if let Some(mut owner_guard) = locked {
                        owner_guard.set_variable("CHANLOCALSTATUS", &status);
                    }
                }
                state.outbound = None;
                state.flags.launched_pbx = false;
                state.u_outbound.take();
            }
            Side::Owner => {
                state.u_owner.take();
                let locked = loop {
                    let Some(outbound) = state.outbound.clone() else { break None };
                    match outbound.try_lock() {
                        Some(guard) => break Some(guard),
                        None => {
                            drop(state);
                            drop(us_guard.take());
                            tokio::time::sleep(LOCK_RETRY_TICK).await;
                            us_guard = Some(ast.lock().await);
                            state = pair.lock_state().await;
                        }
                    }
                };
                state.owner = None;
                if let Some(mut outbound_guard) = locked {
                    if answered_elsewhere {
                        outbound_guard.answered_elsewhere = true;
                    }
                    outbound_guard.queue_hangup();
                }
            }
        }

        ast.unbind_tech();

        if state.owner.is_none() && state.outbound.is_none() {
            let glare = state.flags.glare_detect;
            if glare {
                // A forward is mid-flight; it will find the flag and destroy
                // the pair itself.
                state.flags.cancel_queue = true;
            }
            self.registry().remove(pair.id());
            drop(state);
            if !glare {
                pair.destroy();
            }
            return Ok(());
        }

        let unowned_outbound = if state.outbound.is_some() && !state.flags.launched_pbx {
            state.outbound.clone()
        } else {
            None
        };

        if unowned_outbound.is_none() {
            let frame = Frame::Control(ControlOp::Hangup { cause: hangupcause });
            match queue_frame(&pair, state, side, frame, None, None).await {
                Ok(state) => drop(state),
                Err(LocalError::ForwardCancelled) => {
                    // The pair is already gone; nothing more to release.
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            drop(state);
        }
        drop(us_guard);

        if let Some(outbound) = unowned_outbound {
            // No dialplan ever ran on it, so nobody else will take it down.
            self.core().hangup_channel(&outbound).await?;
        }
        Ok(())
    }
}
