//! The switch-facing operation set, dispatched on which endpoint of the
//! pair an operation arrives on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crosspoint_switch_core::{
    bridged_channel_from, Channel, ChannelGuard, ChannelTech, ControlOp, DeviceState, FormatCap,
    Frame, QueryOption, QueryOptionValue, Result, SwitchError,
};
use tracing::{debug, warn};

use super::{no_pvt, LocalDriver, TECH_NAME};
use crate::forwarder::queue_frame;
use crate::optimize::check_and_splice;
use crate::pair::{pair_backoff, pair_of, parse_destination, LocalPair, Side};

impl LocalDriver {
    /// Forward a control indication, holding the initiating endpoint's lock
    /// through the dance.
    async fn forward_indication(
        &self,
        pair: &Arc<LocalPair>,
        ast: &Arc<Channel>,
        op: ControlOp,
    ) -> Result<()> {
        let mut us_guard: Option<ChannelGuard> = Some(ast.lock().await);
        let state = pair.lock_state().await;
        let Some(side) = state.side_of(ast) else {
            warn!("indication on '{}' which is not part of its pair", ast.name());
            return Err(no_pvt(ast));
        };
        let state = queue_frame(
            pair,
            state,
            side,
            Frame::Control(op),
            Some(ast),
            Some(&mut us_guard),
        )
        .await
        .map_err(SwitchError::from)?;
        drop(state);
        Ok(())
    }

    /// Forward a frame without holding the initiating endpoint's lock; the
    /// dance falls back to sleeping a tick on contention.
    async fn forward_frame_unlocked(&self, ast: &Arc<Channel>, frame: Frame) -> Result<()> {
        let Some(pair) = pair_of(ast) else {
            return Err(no_pvt(ast));
        };
        let state = pair.lock_state().await;
        let Some(side) = state.side_of(ast) else {
            warn!("frame for '{}' which is not part of its pair", ast.name());
            return Err(no_pvt(ast));
        };
        let state = queue_frame(&pair, state, side, frame, Some(ast), None)
            .await
            .map_err(SwitchError::from)?;
        drop(state);
        Ok(())
    }
}

#[async_trait]
impl ChannelTech for LocalDriver {
    fn type_name(&self) -> &'static str {
        TECH_NAME
    }

    fn description(&self) -> &'static str {
        "Local Proxy Channel Driver"
    }

    async fn requester(
        &self,
        dest: &str,
        format: FormatCap,
        requestor: Option<&Arc<Channel>>,
    ) -> Result<Arc<Channel>> {
        self.request(dest, format, requestor).await
    }

    async fn call(&self, chan: &Arc<Channel>, dest: &str, _timeout: Duration) -> Result<()> {
        self.place_call(chan, dest).await
    }

    async fn hangup(&self, chan: &Arc<Channel>) -> Result<()> {
        self.hangup_endpoint(chan).await
    }

    async fn answer(&self, chan: &Arc<Channel>) -> Result<()> {
        let Some(pair) = pair_of(chan) else {
            return Err(no_pvt(chan));
        };
        let mut us_guard: Option<ChannelGuard> = Some(chan.lock().await);
        let state = pair.lock_state().await;
        match state.side_of(chan) {
            Some(Side::Outbound) => {
                // Somebody answered the dialplan side; pass it along.
                let state = queue_frame(
                    &pair,
                    state,
                    Side::Outbound,
                    Frame::Control(ControlOp::Answer),
                    Some(chan),
                    Some(&mut us_guard),
                )
                .await
                .map_err(SwitchError::from)?;
                drop(state);
                Ok(())
            }
            _ => {
                warn!("huh? local channel '{}' is being asked to answer", chan.name());
                Err(SwitchError::NotSupported)
            }
        }
    }

    async fn write(&self, chan: &Arc<Channel>, frame: Frame) -> Result<()> {
        let Some(pair) = pair_of(chan) else {
            return Err(no_pvt(chan));
        };
        let mut us_guard: Option<ChannelGuard> = Some(chan.lock().await);
        let mut state = pair.lock_state().await;
        let Some(side) = state.side_of(chan) else {
            warn!("write on '{}' which is not part of its pair", chan.name());
            return Err(no_pvt(chan));
        };

        // Media flowing out of the dialplan side is the cue that the far
        // bridge may be ready to absorb the pair.
        if side == Side::Outbound && frame.is_media() {
            if let Some(guard) = us_guard.as_mut() {
                check_and_splice(&pair, &mut *state, chan, guard).await;
            }
        }

        if state.flags.already_masqed {
            debug!("not posting to queue since already masqueraded on '{}'", chan.name());
            return Ok(());
        }

        let state = queue_frame(&pair, state, side, frame, Some(chan), Some(&mut us_guard))
            .await
            .map_err(SwitchError::from)?;
        drop(state);
        Ok(())
    }

    async fn indicate(&self, chan: &Arc<Channel>, condition: ControlOp) -> Result<()> {
        let Some(pair) = pair_of(chan) else {
            return Err(no_pvt(chan));
        };
        match condition {
            // Hold handling happens on the local channel itself unless the
            // pair passes hold music through as frames.
            ControlOp::Hold(class) => {
                let passthru = pair.lock_state().await.flags.moh_passthru;
                if passthru {
                    self.forward_indication(&pair, chan, ControlOp::Hold(class)).await
                } else {
                    let mut guard = chan.lock().await;
                    guard.start_moh(class);
                    Ok(())
                }
            }
            ControlOp::Unhold => {
                let passthru = pair.lock_state().await.flags.moh_passthru;
                if passthru {
                    self.forward_indication(&pair, chan, ControlOp::Unhold).await
                } else {
                    let mut guard = chan.lock().await;
                    guard.stop_moh();
                    Ok(())
                }
            }
            // A connected-line or redirecting update may carry only partial
            // data; the accumulated state on the indicating endpoint is what
            // actually goes across.
            ControlOp::ConnectedLine(_) | ControlOp::Redirecting(_) => {
                let mut us_guard: Option<ChannelGuard> = Some(chan.lock().await);
                let state = pair.lock_state().await;
                let Some(side) = state.side_of(chan) else {
                    return Err(no_pvt(chan));
                };
                if state.partner_of(side).is_none() {
                    return Ok(());
                }
                let authoritative = match (&condition, us_guard.as_ref()) {
                    (ControlOp::ConnectedLine(_), Some(guard)) => {
                        ControlOp::ConnectedLine(guard.connected.clone())
                    }
                    (ControlOp::Redirecting(_), Some(guard)) => {
                        ControlOp::Redirecting(guard.redirecting.clone())
                    }
                    _ => return Err(SwitchError::Internal("endpoint lock missing".into())),
                };
                let state = queue_frame(
                    &pair,
                    state,
                    side,
                    Frame::Control(authoritative),
                    Some(chan),
                    Some(&mut us_guard),
                )
                .await
                .map_err(SwitchError::from)?;
                drop(state);
                Ok(())
            }
            other => self.forward_indication(&pair, chan, other).await,
        }
    }

    async fn fixup(&self, old: &Arc<Channel>, new: &Arc<Channel>) -> Result<()> {
        let Some(pair) = pair_of(new) else {
            return Err(no_pvt(new));
        };
        let mut state = pair.lock_state().await;
        if state.owner.as_ref().is_some_and(|c| Arc::ptr_eq(c, old)) {
            state.owner = Some(new.clone());
            Ok(())
        } else if state.outbound.as_ref().is_some_and(|c| Arc::ptr_eq(c, old)) {
            state.outbound = Some(new.clone());
            Ok(())
        } else {
            warn!(
                "fixup for '{}': old channel is not a member of the pair",
                new.name()
            );
            Err(SwitchError::Internal("fixup: unknown old channel".into()))
        }
    }

    async fn send_text(&self, chan: &Arc<Channel>, text: &str) -> Result<()> {
        self.forward_frame_unlocked(chan, Frame::Text(text.to_string())).await
    }

    async fn send_html(&self, chan: &Arc<Channel>, subclass: i32, data: &[u8]) -> Result<()> {
        self.forward_frame_unlocked(
            chan,
            Frame::Html {
                subclass,
                data: bytes::Bytes::copy_from_slice(data),
            },
        )
        .await
    }

    async fn send_digit_begin(&self, chan: &Arc<Channel>, digit: char) -> Result<()> {
        self.forward_frame_unlocked(chan, Frame::DtmfBegin(digit)).await
    }

    async fn send_digit_end(
        &self,
        chan: &Arc<Channel>,
        digit: char,
        duration: Duration,
    ) -> Result<()> {
        self.forward_frame_unlocked(chan, Frame::DtmfEnd { digit, duration }).await
    }

    async fn devicestate(&self, dest: &str) -> DeviceState {
        // Same parse as channel allocation, so a destination means the same
        // thing here as it does when dialed.
        let parsed = parse_destination(dest);
        if !parsed.context_explicit {
            warn!(
                "someone used Local/{} somewhere without a @context, this is bad",
                dest
            );
            return DeviceState::Invalid;
        }

        debug!(
            "checking if extension {}@{} exists (device state)",
            parsed.exten, parsed.context
        );
        if !self
            .core()
            .dialplan()
            .exists(&parsed.context, &parsed.exten, 1, None)
            .await
        {
            return DeviceState::Invalid;
        }

        for pair in self.registry().snapshot() {
            if pair.exten() == parsed.exten && pair.context() == parsed.context {
                let state = pair.lock_state().await;
                if state.owner.is_some() {
                    return DeviceState::InUse;
                }
            }
        }
        DeviceState::NotInUse
    }

    async fn bridged_channel(
        &self,
        _chan: &Arc<Channel>,
        bridge: &Arc<Channel>,
    ) -> Option<Arc<Channel>> {
        let Some(pair) = pair_of(bridge) else {
            debug!(
                "asked for bridged channel on '{}', returning none",
                bridge.name()
            );
            return None;
        };
        let state = pair.lock_state().await;
        if !state.flags.bridge_report {
            return Some(bridge.clone());
        }
        // Step through to the opposite endpoint and report whatever it is
        // bridged with, making the pair invisible to the query.
        let opposite = if state.owner.as_ref().is_some_and(|c| Arc::ptr_eq(c, bridge)) {
            state.outbound.clone()
        } else {
            state.owner.clone()
        };
        drop(state);
        match opposite {
            None => Some(bridge.clone()),
            Some(opposite) => {
                let far = { opposite.lock().await.bridge.clone() };
                Some(far.unwrap_or(opposite))
            }
        }
    }

    async fn query_option(
        &self,
        chan: &Arc<Channel>,
        option: QueryOption,
    ) -> Result<QueryOptionValue> {
        // T38 state is the only supported option at this time.
        if option != QueryOption::T38State {
            return Err(SwitchError::NotSupported);
        }
        let Some(pair) = pair_of(chan) else {
            return Err(SwitchError::NotSupported);
        };

        let mut state = pair.lock_state().await;
        let Some(side) = state.side_of(chan) else {
            return Err(SwitchError::NotSupported);
        };

        // The pair is see-through: the remote end's bridge partner answers.
        loop {
            let Some(remote) = state.partner_of(side) else {
                return Err(SwitchError::NotSupported);
            };
            let Some(remote_guard) = remote.try_lock() else {
                state = pair_backoff(&pair, state).await;
                continue;
            };
            let Some(bridged) = bridged_channel_from(&remote, &remote_guard).await else {
                // Can't query a channel unless it is bridged.
                return Err(SwitchError::NotSupported);
            };
            let Some(_bridged_guard) = bridged.try_lock() else {
                drop(remote_guard);
                state = pair_backoff(&pair, state).await;
                continue;
            };
            let res = match bridged.tech_binding() {
                Some(binding) => binding.tech.query_option(&bridged, option).await,
                None => Err(SwitchError::NotSupported),
            };
            return res;
        }
    }
}
