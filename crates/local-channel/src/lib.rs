//! Local proxy channels for the crosspoint switch.
//!
//! A `Local` channel is a virtual channel type that materializes as a *pair*
//! of back-to-back endpoints sharing one private record: whatever is written
//! on one endpoint is delivered as an inbound frame on the other. The `;1`
//! endpoint gets bridged with a real caller; the `;2` endpoint runs a
//! dialplan extension as if it were a fresh inbound call, turning any
//! extension into a dialable destination.
//!
//! # Overview
//!
//! Destinations take the form `EXTEN[/OPTS][@CONTEXT]`, where the options
//! are:
//!
//! | option | effect |
//! |--------|--------|
//! | `n` | never splice the pair out of the call graph |
//! | `j` | enable the jitter buffer (requires `n`) |
//! | `b` | report the far peer, not the pair, on bridge queries |
//! | `m` | pass hold/unhold through as frames instead of starting hold music |
//!
//! When conditions permit, the pair optimizes itself away: on a media write
//! from the dialplan side, the caller-facing endpoint is masqueraded into
//! the dialplan side's bridge peer, and the pair drops out of the call
//! graph entirely.
//!
//! ```no_run
//! use std::sync::Arc;
//! use crosspoint_local_channel::LocalDriver;
//! use crosspoint_switch_core::{ChannelTech, FormatCap, SwitchCore};
//! # use std::time::Duration;
//! # async fn example(core: Arc<SwitchCore>) -> crosspoint_switch_core::Result<()> {
//! let driver = LocalDriver::new(core.clone());
//! driver.register()?;
//!
//! // One endpoint for the caller, one for the dialplan.
//! let owner = core
//!     .request("Local", "1000@internal", FormatCap::any(), None)
//!     .await?;
//! core.tech("Local")
//!     .unwrap()
//!     .call(&owner, "1000@internal", Duration::from_secs(30))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod driver;
pub mod errors;
pub mod pair;
pub mod registry;

mod forwarder;
mod optimize;

pub use driver::{LocalDriver, TECH_NAME};
pub use errors::{LocalError, Result};
pub use pair::{pair_of, LocalPair, PairFlags, PairId, PairState, Side};
pub use registry::LocalRegistry;
