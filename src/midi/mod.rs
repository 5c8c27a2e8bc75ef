/*!
The `midi` module contains the Standard MIDI codec: lowering SMF byte
streams into the song model and raising them back, plus the note/frequency
arithmetic shared with the rest of the library.
!*/

pub(crate) mod decode;
pub(crate) mod encode;
pub(crate) mod freq;
pub mod vlq;

pub use decode::midi_decode;
pub use encode::{midi_encode, EndOfTrackCallback};
pub use freq::{freq_to_midi, midi_to_freq};
pub(crate) use freq::{bend_to_semitones, freq_to_semitones};

use std::ops::BitOr;

/// Number of MIDI channels.
pub const MIDI_CHANNELS: usize = 16;

/// Default length of a MIDI quarter note, in microseconds (120 bpm).
pub const MIDI_DEF_US_PER_QUARTER_NOTE: u32 = 500_000;

/// Default number of ticks in a MIDI quarter note.
pub const MIDI_DEF_TICKS_PER_QUARTER_NOTE: u32 = 192;

/// Options describing variations in a body of MIDI data.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MidiFlags(u32);

impl MidiFlags {
    /// Normal MIDI data.
    pub const DEFAULT: MidiFlags = MidiFlags(0);
    /// Note aftertouch events are one byte too short; they are handled as
    /// channel aftertouch instead.
    pub const SHORT_AFTERTOUCH: MidiFlags = MidiFlags(1);
    /// Channel 10 is an ordinary melodic channel, not percussion.
    pub const CHANNEL_10_NO_PERC: MidiFlags = MidiFlags(2);
    /// Handle the Creative Labs CMF extensions: controllers 0x63/0x67-0x69
    /// and the OPL percussion channels 12-15.
    pub const CMF_EXTENSIONS: MidiFlags = MidiFlags(4);
    /// On write, program changes carry the patch bank index rather than a
    /// General MIDI program number.
    pub const USE_PATCH_INDEX: MidiFlags = MidiFlags(8);
    /// On write, start the data with a set-tempo meta event.
    pub const EMBED_TEMPO: MidiFlags = MidiFlags(16);
    /// On write, round notes to semitones and drop pitchbends.
    pub const INTEGER_NOTES_ONLY: MidiFlags = MidiFlags(32);
    /// Stick to plain MIDI commands; no sysex or sequencer-specific blocks.
    pub const BASIC_MIDI_ONLY: MidiFlags = MidiFlags(64);

    pub fn contains(self, other: MidiFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MidiFlags {
    type Output = MidiFlags;
    fn bitor(self, rhs: MidiFlags) -> MidiFlags {
        MidiFlags(self.0 | rhs.0)
    }
}
