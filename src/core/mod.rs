/*!
The `core` module holds the in-memory song model: patterns, tracks, events,
patches and the tempo algebra.  Everything here is format-independent; the
`opl`, `midi` and `format` modules lower byte streams into these types and
raise them back out.
!*/

mod dispatch;
mod event;
mod music;
mod patch;
mod tempo;

pub use dispatch::{handle_all_events, EventHandler, EventOrder};
pub use event::{Configuration, Effect, Event, Goto, GotoType, NoteOn, PolyphonicEffect};
pub use music::{
    Attribute, Music, Pattern, Track, TrackEvent, TrackInfo, ATTR_AUTHOR, ATTR_COMMENT, ATTR_TITLE,
};
pub use patch::{MidiPatch, OplOperator, OplPatch, Patch, PcmPatch, Rhythm};
pub use tempo::Tempo;

// note number and program number are 0-127, displayed to users as 1-128.
clamp!(MidiNote, u8, 0, 127, 60, pub);
clamp!(MidiProgram, u8, 0, 127, 0, pub);

// the OPL frequency octave, 3 bits of the 0xB0 register set.
clamp!(Block, u8, 0, 7, 0, pub);

/// Default velocity of a note when the source format cannot express one.
pub const DEFAULT_VELOCITY: u8 = 255;
