//! Party identification records.
//!
//! These carry who a channel believes it is talking to and on behalf of whom:
//! caller, connected line, redirecting and dialed information. Drivers move
//! them between channels as calls are set up, forwarded and spliced.

use serde::{Deserialize, Serialize};

/// One party identity: name, number and diversion subaddress.
///
/// A field that is `None` has never been supplied; [`PartyId::is_valid`]
/// mirrors that distinction so callers can avoid clobbering real identity
/// data with empty updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyId {
    pub name: Option<String>,
    pub number: Option<String>,
    pub subaddress: Option<String>,
}

impl PartyId {
    pub fn number(number: &str) -> PartyId {
        PartyId {
            name: None,
            number: Some(number.to_string()),
            subaddress: None,
        }
    }

    /// True when any component has been supplied.
    pub fn is_valid(&self) -> bool {
        self.name.is_some() || self.number.is_some() || self.subaddress.is_some()
    }
}

/// Caller identification: who originated the call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerParty {
    pub id: PartyId,
    /// Automatic number identification, when the network supplied it.
    pub ani: PartyId,
}

impl CallerParty {
    pub fn is_valid(&self) -> bool {
        self.id.is_valid() || self.ani.is_valid()
    }
}

/// Connected line: who the channel is actually connected to right now.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedParty {
    pub id: PartyId,
    pub ani: PartyId,
}

/// Redirecting information: where the call came from and is headed when it
/// has been diverted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectingParty {
    pub from: PartyId,
    pub to: PartyId,
    pub count: u32,
}

impl RedirectingParty {
    pub fn is_valid(&self) -> bool {
        self.from.is_valid() || self.to.is_valid()
    }
}

/// The number actually dialed to reach this channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialedParty {
    pub number: Option<String>,
    pub subaddress: Option<String>,
}

impl DialedParty {
    pub fn is_valid(&self) -> bool {
        self.number.is_some() || self.subaddress.is_some()
    }
}

/// Fill a caller record from connected-line data. Used when the far leg's
/// connected party becomes the near leg's caller.
pub fn connected_line_copy_to_caller(caller: &mut CallerParty, connected: &ConnectedParty) {
    caller.id = connected.id.clone();
    caller.ani = connected.ani.clone();
}

/// Fill a connected-line record from caller data, the reverse direction of
/// [`connected_line_copy_to_caller`].
pub fn connected_line_copy_from_caller(connected: &mut ConnectedParty, caller: &CallerParty) {
    connected.id = caller.id.clone();
    connected.ani = caller.ani.clone();
}
