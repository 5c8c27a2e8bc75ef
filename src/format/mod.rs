/*!
The `format` module holds the container adapters: each file format is a thin
wrapper that parses its header, then hands the embedded event stream to the
OPL or MIDI codec.  The [`all_formats`] registry lists them in the order
they should be probed.
!*/

mod cmf;
mod dro1;
mod dro2;
mod got;
mod ibk;
mod imf;
mod mid0;
mod raw;
mod sbi;
pub(crate) mod sbi_patch;
pub(crate) mod tags;

pub use cmf::FormatCmf;
pub use dro1::FormatDroV1;
pub use dro2::FormatDroV2;
pub use got::FormatGot;
pub use ibk::FormatIbk;
pub use imf::{FormatImfDuke2, FormatImfType0, FormatImfType1, FormatWlfType0, FormatWlfType1};
pub use mid0::FormatMidType0;
pub use raw::FormatRaw;
pub use sbi::FormatSbi;

use crate::core::Music;
use crate::error::Result;
use std::ops::BitOr;

/// How sure [`MusicFormat::is_instance`] is that some data belongs to a
/// format.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Certainty {
    /// The signature matched; this is the format.
    DefinitelyYes,
    /// Nothing contradicts the format, and weak structure supports it.
    PossiblyYes,
    /// Nothing to go on either way.
    Unsure,
    /// The data cannot be this format.
    DefinitelyNo,
}

/// What a format is capable of storing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Caps(u32);

impl Caps {
    /// Stores OPL register-level instruments.
    pub const INST_OPL: Caps = Caps(1);
    /// Stores OPL rhythm-mode instruments.
    pub const INST_OPL_RHYTHM: Caps = Caps(2);
    /// Stores General MIDI instruments.
    pub const INST_MIDI: Caps = Caps(4);
    /// Carries musical events (as opposed to an instrument bank).
    pub const HAS_EVENTS: Caps = Caps(8);
    /// Targets a single OPL2.
    pub const HARDWARE_OPL2: Caps = Caps(16);
    /// Targets an OPL3 (or dual OPL2).
    pub const HARDWARE_OPL3: Caps = Caps(32);

    pub fn contains(self, other: Caps) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Caps {
    type Output = Caps;
    fn bitor(self, rhs: Caps) -> Caps {
        Caps(self.0 | rhs.0)
    }
}

/// Options for [`MusicFormat::write`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct WriteFlags(u32);

impl WriteFlags {
    pub const DEFAULT: WriteFlags = WriteFlags(0);
    /// Accept the loss of sub-semitone pitch detail rather than failing.
    pub const INTEGER_NOTES_ONLY: WriteFlags = WriteFlags(1);

    pub fn contains(self, other: WriteFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for WriteFlags {
    type Output = WriteFlags;
    fn bitor(self, rhs: WriteFlags) -> WriteFlags {
        WriteFlags(self.0 | rhs.0)
    }
}

/// One supported file format.  Adapters parse and serialise their container
/// and delegate the event stream to the OPL or MIDI codec.
pub trait MusicFormat {
    /// Unique machine identifier, e.g. `"imf-idsoftware-type0"`.
    fn code(&self) -> &'static str;

    /// Human-readable name.
    fn name(&self) -> &'static str;

    /// Usual filename extensions, without dots.
    fn extensions(&self) -> &'static [&'static str];

    fn caps(&self) -> Caps;

    /// Check whether `data` could be a file of this format.
    fn is_instance(&self, data: &[u8]) -> Certainty;

    /// Parse `data` into a song.
    fn read(&self, data: &[u8]) -> Result<Music>;

    /// Serialise `music` into `out`.  On error the buffer contents are
    /// unspecified; callers discard it.
    fn write(&self, out: &mut Vec<u8>, music: &Music, flags: WriteFlags) -> Result<()>;
}

/// All supported formats, in probing order.  More specific signatures come
/// first so a generic probe cannot shadow them.
pub fn all_formats() -> Vec<Box<dyn MusicFormat>> {
    vec![
        Box::new(FormatCmf),
        Box::new(FormatDroV1),
        Box::new(FormatDroV2),
        Box::new(FormatRaw),
        Box::new(FormatMidType0),
        Box::new(FormatIbk),
        Box::new(FormatSbi),
        Box::new(FormatGot),
        Box::new(FormatImfType1),
        Box::new(FormatWlfType1),
        Box::new(FormatImfType0),
        Box::new(FormatWlfType0),
        Box::new(FormatImfDuke2),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_codes_are_unique() {
        let formats = all_formats();
        for (i, a) in formats.iter().enumerate() {
            for b in formats.iter().skip(i + 1) {
                assert_ne!(a.code(), b.code());
            }
        }
    }
}
