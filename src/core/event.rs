/*!
The `event` module defines the tagged event type that tracks are made of.
The C++ ancestry of this format family used a class hierarchy here; this
library flattens it into one enum so the hot decode/encode paths never need a
downcast.
!*/

use crate::core::Tempo;

/// A note start.  Frequencies are absolute, in milliHertz, so the event
/// carries the pitchbend baked in rather than as a separate value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteOn {
    /// Frequency of the note (440000 == 440Hz == A4).
    pub milli_hertz: u32,
    /// Index into [`crate::Music::patches`].
    pub instrument: usize,
    /// Velocity, 0-255.  255 is both "full" and "unspecified"; formats that
    /// cannot store velocity write this.
    pub velocity: u8,
}

/// An effect applied to the note currently playing on the track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Effect {
    /// Bend the playing note to a new absolute frequency.
    PitchbendNote { milli_hertz: u32 },
    /// Change the playing note's velocity, 0-255.
    Volume { velocity: u8 },
}

/// An effect applied to every note on the track.  These only appear before
/// [`crate::split_polyphonic_tracks`] has run; the splitter lowers them to
/// per-note [`Effect`] events.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PolyphonicEffect {
    /// A raw 14-bit MIDI pitchbend value, 0-16383 with 8192 meaning no bend.
    PitchbendChannel { bend: u16 },
    /// Channel-wide volume, 0-255.
    VolumeChannel { velocity: u8 },
}

/// Where a [`Event::Goto`] jumps to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GotoType {
    /// Jump to the next entry in the pattern order.
    NextPattern,
    /// Jump to a specific entry in the pattern order.
    SpecificOrder { target_order: usize },
}

/// A jump within the song, used by tracker-style formats.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Goto {
    pub goto_type: GotoType,
    /// Row within the target pattern to start at.
    pub target_row: u32,
    /// How many times to take the jump; 0 means always.
    pub repeat: u32,
}

/// Global, non-note settings.  These are all OPL chip modes except for
/// `Empty`, which exists so a track can carry trailing silence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Configuration {
    /// Does nothing.  Used to preserve a trailing delay at the end of a
    /// track.
    Empty,
    /// Switch the chip between OPL2 and OPL3 mode.
    EnableOpl3(bool),
    /// Set the tremolo depth (register 0xBD bit 7) on the given chip.
    EnableDeepTremolo { enabled: bool, chip_index: u8 },
    /// Set the vibrato depth (register 0xBD bit 6) on the given chip.
    EnableDeepVibrato { enabled: bool, chip_index: u8 },
    /// Switch rhythm (percussion) mode on or off.
    EnableRhythm(bool),
    /// Allow waveform selection (register 0x01 bit 5).
    EnableWaveSel(bool),
}

/// Everything that can happen on a track.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Change the song tempo from this point on.  Global, regardless of
    /// which track carries it.
    Tempo(Tempo),
    NoteOn(NoteOn),
    /// End the note currently playing on this track.
    NoteOff,
    /// End a note identified by frequency.  Only present before the
    /// polyphonic track splitter has run.
    SpecificNoteOff { milli_hertz: u32 },
    /// An effect for a note identified by frequency.  Only present before
    /// the polyphonic track splitter has run.
    SpecificNoteEffect { milli_hertz: u32, effect: Effect },
    Effect(Effect),
    PolyphonicEffect(PolyphonicEffect),
    Goto(Goto),
    Configuration(Configuration),
}

impl Event {
    /// True for the note-off variants.  The chronological merge in the event
    /// dispatcher sorts these ahead of other events at the same instant to
    /// avoid phantom polyphony.
    pub(crate) fn is_note_off(&self) -> bool {
        matches!(self, Event::NoteOff | Event::SpecificNoteOff { .. })
    }
}
