/*!
The `event` module defines the unit of exchange between the OPL codecs and
the container formats: one register write, delay and/or tempo change, with a
validity bitset saying which fields carry meaning on this call.
!*/

use crate::core::Tempo;
use crate::error::Result;

/// Which fields of an [`OplEvent`] are meaningful.
pub mod valid {
    /// The `delay` field is set.
    pub const DELAY: u8 = 0x01;
    /// The `chip_index`, `reg` and `val` fields are set.
    pub const REGS: u8 = 0x02;
    /// The `tempo` field carries a change.
    pub const TEMPO: u8 = 0x04;
}

/// One step of a raw OPL stream.
#[derive(Clone, Debug)]
pub struct OplEvent {
    /// Bit-or of the [`valid`] constants.
    pub valid: u8,
    /// Delay in ticks.  Whether it lands before or after the register write
    /// is the format's [`DelayType`].
    pub delay: u32,
    /// Which chip of an OPL3/dual-OPL2 pair the write goes to, 0 or 1.
    pub chip_index: u8,
    /// Register index.
    pub reg: u8,
    /// Value to store in the register.
    pub val: u8,
    /// The current song tempo.  The decoder always populates this before a
    /// read so a reader callback can modify just part of it.
    pub tempo: Tempo,
}

impl OplEvent {
    pub fn new(tempo: Tempo) -> Self {
        OplEvent {
            valid: 0,
            delay: 0,
            chip_index: 0,
            reg: 0,
            val: 0,
            tempo,
        }
    }
}

/// Where a format's stored delay sits relative to its register write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DelayType {
    /// The delay elapses before the register write takes effect.
    DelayIsPreData,
    /// The delay elapses after the register write takes effect.
    DelayIsPostData,
}

/// Supplies raw OPL data to [`crate::opl_decode`].  Implemented by each
/// container format.
pub trait OplReader {
    /// Read the next reg/val pair from the source data.
    ///
    /// `event.valid` is zero on entry and `event.tempo` holds the current
    /// song tempo.  Return `false` at end of file; the `delay` field is
    /// honoured even then, so a trailing delay on the song can be preserved.
    fn read_next_pair(&mut self, event: &mut OplEvent) -> Result<bool>;
}

/// Receives raw OPL data from [`crate::opl_encode`].  Implemented by each
/// container format; implementations buffer as needed for their delay
/// position semantics.
pub trait OplWriter {
    fn write_next_pair(&mut self, event: &OplEvent) -> Result<()>;
}
