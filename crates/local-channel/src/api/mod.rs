//! Control surface: CLI listing and the manager action.
//!
//! Both operate on the registry snapshot and never hold the registry lock
//! while taking per-pair locks.

use crate::driver::LocalDriver;
use crate::errors::{LocalError, Result};
use crate::pair::pair_of;

/// CLI command that lists live pairs.
pub const SHOW_CHANNELS_COMMAND: &str = "local show channels";

/// Usage text for [`SHOW_CHANNELS_COMMAND`].
pub const SHOW_CHANNELS_USAGE: &str = "Usage: local show channels\n       Provides summary information on active local proxy channels.\n";

/// Name of the manager action handled by [`optimize_away`].
pub const OPTIMIZE_AWAY_ACTION: &str = "LocalOptimizeAway";

/// Render the `local show channels` listing.
pub async fn show_channels(driver: &LocalDriver) -> String {
    let pairs = driver.registry().snapshot();
    if pairs.is_empty() {
        return "No local channels in use\n".to_string();
    }
    let mut out = String::new();
    for pair in pairs {
        let state = pair.lock_state().await;
        let name = state
            .owner
            .as_ref()
            .map(|chan| chan.name())
            .unwrap_or_else(|| "<unowned>".to_string());
        out.push_str(&format!("{} -- {}@{}\n", name, pair.exten(), pair.context()));
    }
    out
}

/// Handle the `LocalOptimizeAway` manager action: clear the no-optimize
/// flag on the named channel's pair so the self-splice happens on the next
/// eligible media write.
///
/// `channel` is the action's required `Channel` header. The error variants
/// render the exact response texts.
pub async fn optimize_away(driver: &LocalDriver, channel: Option<&str>) -> Result<&'static str> {
    let channel = match channel {
        Some(name) if !name.is_empty() => name,
        _ => return Err(LocalError::ChannelNotSpecified),
    };

    let Some(chan) = driver.core().channel_by_name(channel) else {
        return Err(LocalError::ChannelDoesNotExist);
    };

    // A channel from another driver, or one whose pair is already gone, is
    // not ours to touch.
    let Some(pair) = pair_of(&chan) else {
        return Err(LocalError::ChannelNotLocal);
    };
    if !driver.registry().contains(pair.id()) {
        return Err(LocalError::ChannelNotLocal);
    }

    let mut state = pair.lock_state().await;
    state.flags.no_optimization = false;
    Ok("Queued channel to be optimized away")
}
