//! Media and control frames.
//!
//! Frames are the unit of traffic between channels: media (voice/video),
//! DTMF edges, text, HTML, and control indications. A channel's read queue
//! holds frames other parties have queued toward it.

use std::time::Duration;

use bytes::Bytes;

use crate::format::Format;
use crate::party::{ConnectedParty, RedirectingParty};

/// ITU-T Q.850-style hangup cause code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HangupCause(pub u16);

impl HangupCause {
    pub const NOT_DEFINED: HangupCause = HangupCause(0);
    pub const UNALLOCATED: HangupCause = HangupCause(1);
    pub const NORMAL_CLEARING: HangupCause = HangupCause(16);
    pub const USER_BUSY: HangupCause = HangupCause(17);
    pub const NO_ANSWER: HangupCause = HangupCause(19);
    pub const SWITCH_CONGESTION: HangupCause = HangupCause(42);
}

/// Control indications carried in [`Frame::Control`].
#[derive(Debug, Clone, PartialEq)]
pub enum ControlOp {
    Answer,
    Ringing,
    Busy,
    Congestion,
    Progress,
    Proceeding,
    /// Place the party on hold, optionally naming a music class.
    Hold(Option<String>),
    Unhold,
    Hangup { cause: HangupCause },
    /// Connected-line update carrying the full party snapshot.
    ConnectedLine(ConnectedParty),
    /// Redirecting update carrying the full party snapshot.
    Redirecting(RedirectingParty),
}

/// One frame of traffic between channels.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Voice {
        format: Format,
        samples: u32,
        data: Bytes,
    },
    Video {
        format: Format,
        data: Bytes,
    },
    DtmfBegin(char),
    DtmfEnd {
        digit: char,
        duration: Duration,
    },
    Text(String),
    Html {
        subclass: i32,
        data: Bytes,
    },
    Control(ControlOp),
    /// The empty frame; returned by drivers that never produce media on
    /// their read path.
    Null,
}

impl Frame {
    /// True for voice and video frames.
    pub fn is_media(&self) -> bool {
        matches!(self, Frame::Voice { .. } | Frame::Video { .. })
    }

    pub fn voice(format: Format, data: &[u8]) -> Frame {
        Frame::Voice {
            format,
            samples: data.len() as u32,
            data: Bytes::copy_from_slice(data),
        }
    }
}
