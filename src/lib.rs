/*!
A library for reading and writing retro game music files.

Every supported format converts to and from a single in-memory [`Music`]
model: a pattern-based arrangement of timed events driving OPL FM
synthesizer registers, General MIDI, or sampled PCM instruments.  The two
codecs at the core are format-independent:

* the OPL codec lowers a raw YMF262 register stream into note and effect
  events (and raises them back), tracking shadow chip state and rhythm-mode
  voices;
* the MIDI codec does the same for Standard MIDI byte streams, including
  running status and pitchbend arithmetic.

Each file container is then a thin adapter over one of the codecs; see
[`all_formats`] for the registry.

```no_run
use game_music::{all_formats, Certainty};

let data = std::fs::read("song.imf").unwrap();
for format in all_formats() {
    if format.is_instance(&data) != Certainty::DefinitelyNo {
        let music = format.read(&data).unwrap();
        println!("{}: {} patches", format.name(), music.patches.len());
        break;
    }
}
```
!*/

#![allow(dead_code)]

// https://moddingwiki.shikadi.net/wiki/Category:Music_formats
// https://www.music.mcgill.ca/~gary/306/week9/smf.html

#[macro_use]
mod error;
#[macro_use]
mod clamp;
#[macro_use]
mod macros;

mod byte_iter;
mod scribe;
mod split;

pub mod core;
pub mod format;
pub mod midi;
pub mod opl;

pub use crate::core::{
    handle_all_events, Attribute, Block, Configuration, Effect, Event, EventHandler, EventOrder,
    Goto, GotoType, MidiNote, MidiPatch, MidiProgram, Music, NoteOn, OplOperator, OplPatch, Patch,
    Pattern, PcmPatch, PolyphonicEffect, Rhythm, Tempo, Track, TrackEvent, TrackInfo, ATTR_AUTHOR,
    ATTR_COMMENT, ATTR_TITLE, DEFAULT_VELOCITY,
};
pub use byte_iter::ByteError;
pub use error::{Error, Result};
pub use format::{all_formats, Caps, Certainty, MusicFormat, WriteFlags};
pub use midi::{midi_decode, midi_encode, MidiFlags};
pub use opl::{
    opl_decode, opl_denormalise_perc, opl_encode, opl_normalise_perc, DelayType, NormaliseStyle,
    OplEvent, OplReader, OplWriteFlags, OplWriter,
};
pub use split::split_polyphonic_tracks;
