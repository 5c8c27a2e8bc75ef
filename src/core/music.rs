/*!
The `music` module holds the in-memory song model that every file format
decodes into and encodes from.
!*/

use crate::core::{Event, Patch, Rhythm, Tempo};

/// One timed event on a track.  `delay` is the number of ticks *before* the
/// event; the event itself is instantaneous.  The absolute time of an event
/// is the sum of all delays at and before it on its track.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackEvent {
    pub delay: u32,
    pub event: Event,
}

impl TrackEvent {
    pub fn new(delay: u32, event: Event) -> Self {
        Self { delay, event }
    }
}

/// One instrument voice inside a pattern: an ordered sequence of events.
pub type Track = Vec<TrackEvent>;

/// A fixed-length chunk of music, one [`Track`] per [`TrackInfo`] entry.
pub type Pattern = Vec<Track>;

/// Where a track's events should be played.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TrackInfo {
    /// The track is allocated but nothing plays it.
    Unused,
    /// An OPL melodic channel.  0-8 are on the first chip, 9-17 on the
    /// second chip of an OPL3 pair.
    Opl { channel: u8 },
    /// One of the five OPL rhythm-mode voices.
    OplPerc { instrument: Rhythm },
    /// A MIDI channel, 0-15.
    Midi { channel: u8 },
    /// A PCM output channel.
    Pcm { channel: u8 },
}

impl TrackInfo {
    /// The rhythm voice this track plays, `Melodic` for ordinary channels.
    pub(crate) fn rhythm(&self) -> Rhythm {
        match self {
            TrackInfo::OplPerc { instrument } => *instrument,
            _ => Rhythm::Melodic,
        }
    }
}

/// A named piece of metadata: title, author, comment.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attribute {
    /// Machine name, one of the `ATTR_*` constants.
    pub name: &'static str,
    /// Human-readable description of the field.
    pub desc: &'static str,
    /// The value.
    pub text: String,
}

/// Standard attribute name for the song title.
pub const ATTR_TITLE: &str = "title";
/// Standard attribute name for the composer/arranger/artist.
pub const ATTR_AUTHOR: &str = "author";
/// Standard attribute name for free-form comments.
pub const ATTR_COMMENT: &str = "comment";

/// An in-memory song: a pattern-based arrangement of timed events plus the
/// instruments they reference.
///
/// Invariants, maintained by the decoders and expected by the encoders:
///
/// * every entry in `pattern_order` indexes into `patterns`;
/// * every pattern has exactly `track_info.len()` tracks;
/// * the delays on every track sum to `ticks_per_track`;
/// * every `NoteOn::instrument` indexes into `patches`.
#[derive(Clone, Debug, PartialEq)]
pub struct Music {
    /// The instruments, referenced by index from note-on events.
    pub patches: Vec<Patch>,
    /// Where each track's events should be played.  Indices line up with the
    /// tracks inside each pattern.
    pub track_info: Vec<TrackInfo>,
    /// The patterns.  Each is a list of tracks, and every track in a pattern
    /// covers the same `ticks_per_track` ticks.
    pub patterns: Vec<Pattern>,
    /// The order patterns play in.  A pattern index may appear many times.
    pub pattern_order: Vec<usize>,
    /// Index into `pattern_order` to jump to when the song ends, or `None`
    /// to stop.
    pub loop_dest: Option<usize>,
    /// Tempo at the start of the song.
    pub initial_tempo: Tempo,
    /// Length of every pattern, in ticks.
    pub ticks_per_track: u32,
    /// Title/author/comment fields, where the format stores them.
    pub attributes: Vec<Attribute>,
}

impl Default for Music {
    fn default() -> Self {
        Music {
            patches: Vec::new(),
            track_info: Vec::new(),
            patterns: Vec::new(),
            pattern_order: Vec::new(),
            loop_dest: None,
            initial_tempo: Tempo::default(),
            ticks_per_track: 0,
            attributes: Vec::new(),
        }
    }
}

impl Music {
    /// Look up an attribute by its machine name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Add or replace an attribute.
    pub fn set_attribute(&mut self, name: &'static str, desc: &'static str, text: String) {
        if let Some(existing) = self.attributes.iter_mut().find(|a| a.name == name) {
            existing.text = text;
            return;
        }
        self.attributes.push(Attribute { name, desc, text });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes() {
        let mut music = Music::default();
        assert!(music.attribute(ATTR_TITLE).is_none());
        music.set_attribute(ATTR_TITLE, "Song title", String::from("one"));
        music.set_attribute(ATTR_TITLE, "Song title", String::from("two"));
        assert_eq!(music.attributes.len(), 1);
        assert_eq!(music.attribute(ATTR_TITLE).unwrap().text, "two");
    }
}
