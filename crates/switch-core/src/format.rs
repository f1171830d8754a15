//! Media formats and format capability sets.
//!
//! A [`FormatCap`] is a bit set of [`Format`]s, matching how channel drivers
//! advertise what they can carry natively. [`best_codec`] picks the preferred
//! member of a set when a single read/write format has to be chosen.

use serde::{Deserialize, Serialize};

/// A single media format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    Ulaw,
    Alaw,
    Gsm,
    G722,
    /// 16-bit signed linear audio
    Slin,
    H263,
    H264,
}

impl Format {
    const ALL: [Format; 7] = [
        Format::Ulaw,
        Format::Alaw,
        Format::Gsm,
        Format::G722,
        Format::Slin,
        Format::H263,
        Format::H264,
    ];

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// A set of media formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormatCap(u32);

impl FormatCap {
    /// The empty set.
    pub const NONE: FormatCap = FormatCap(0);

    /// Every format the switch knows about.
    pub fn any() -> FormatCap {
        Format::ALL
            .iter()
            .fold(FormatCap::NONE, |cap, f| cap.with(*f))
    }

    /// A set with a single member.
    pub fn only(format: Format) -> FormatCap {
        FormatCap(format.bit())
    }

    /// This set plus `format`.
    pub fn with(self, format: Format) -> FormatCap {
        FormatCap(self.0 | format.bit())
    }

    pub fn contains(self, format: Format) -> bool {
        self.0 & format.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Preference order used when a channel has to commit to one format out of a
/// capability set. Narrowband companding first, then wideband, then linear.
const PREFERENCE: [Format; 7] = [
    Format::Ulaw,
    Format::Alaw,
    Format::G722,
    Format::Slin,
    Format::Gsm,
    Format::H263,
    Format::H264,
];

/// Pick the best single format out of a capability set.
pub fn best_codec(cap: FormatCap) -> Option<Format> {
    PREFERENCE.iter().copied().find(|f| cap.contains(*f))
}
