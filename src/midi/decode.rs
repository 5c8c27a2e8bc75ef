/*!
The `decode` module lowers a Standard MIDI byte stream into the song model.
Each MIDI channel becomes one track; polyphony within a channel is moved
onto overflow tracks by the splitter at the end of the decode.
!*/

use crate::byte_iter::ByteIter;
use crate::core::{
    Configuration, Effect, Event, MidiPatch, Music, NoteOn, Patch, PolyphonicEffect, Tempo, Track,
    TrackEvent, TrackInfo,
};
use crate::error::{LibError, LibResult, Result};
use crate::midi::freq::{midi_to_freq, semitones_to_bend};
use crate::midi::MidiFlags;
use crate::opl::adlib::read_adlib_patch;
use crate::split::split_polyphonic_tracks;
use snafu::ResultExt;
use std::io::Read;

/// Number of MIDI channels.
pub(crate) const MIDI_CHANNEL_COUNT: usize = 16;

/// Number of valid MIDI notes.
const MIDI_NOTES: u8 = 128;

/// Frequency to use for percussion notes, which have no pitch of their own.
const PERC_FREQ: u32 = 440000;

/// Default to a grand piano until a patch change event arrives.
const MIDI_DEFAULT_PATCH: u8 = 0;

/// Widen a 7-bit MIDI value to the model's 8-bit range.
fn widen7(v: u8) -> u8 {
    (v << 1) | (v >> 6)
}

struct MidiDecoder<'a, R: Read> {
    iter: &'a mut ByteIter<R>,
    flags: MidiFlags,
    /// Ticks since the last event on each channel's track.
    last_delay: [u32; MIDI_CHANNEL_COUNT],
    /// Running total of all delays.
    total_delay: u64,
    /// Last status byte, for running status.
    last_event: u8,
    /// For each percussion note, which patch bank entry plays it.
    perc_map: [Option<usize>; 128],
    /// Current instrument (a patch bank index, not a program number) on
    /// each channel.
    current_instrument: [Option<usize>; MIDI_CHANNEL_COUNT],
    /// Which notes are sounding on each channel.
    active_notes: [[bool; 128]; MIDI_CHANNEL_COUNT],
    deep_tremolo: bool,
    deep_vibrato: bool,
}

/// Convert Standard MIDI data into a [`Music`] instance.
///
/// The tempo argument supplies the tick resolution; a `FF 51` meta event
/// before the first delay updates it in place.  Truncated input is treated
/// as end-of-song, since many retro files omit the final meta event.
pub fn midi_decode(data: &[u8], flags: MidiFlags, initial_tempo: Tempo) -> Result<Music> {
    let cursor = std::io::Cursor::new(data);
    let mut iter = ByteIter::new(cursor.bytes()).context(io!())?;
    let cmf = flags.contains(MidiFlags::CMF_EXTENSIONS);
    let mut decoder = MidiDecoder {
        iter: &mut iter,
        flags,
        last_delay: [0; MIDI_CHANNEL_COUNT],
        total_delay: 0,
        last_event: 0,
        perc_map: [None; 128],
        current_instrument: [None; MIDI_CHANNEL_COUNT],
        active_notes: [[false; 128]; MIDI_CHANNEL_COUNT],
        // The CMF driver boots with the deep tremolo/vibrato bits set.
        deep_tremolo: cmf,
        deep_vibrato: cmf,
    };
    decoder.decode(initial_tempo)
}

impl<'a, R: Read> MidiDecoder<'a, R> {
    fn decode(&mut self, mut initial_tempo: Tempo) -> Result<Music> {
        let mut patches: Vec<Patch> = Vec::new();
        let mut tracks: Vec<Track> = vec![Vec::new(); MIDI_CHANNEL_COUNT];
        let mut track_info: Vec<TrackInfo> = (0..MIDI_CHANNEL_COUNT as u8)
            .map(|channel| TrackInfo::Midi { channel })
            .collect();
        let mut last_tempo = initial_tempo;

        loop {
            match self.next_event(
                &mut patches,
                &mut tracks,
                &mut track_info,
                &mut initial_tempo,
                &mut last_tempo,
            ) {
                Ok(true) => {}
                Ok(false) => break,
                Err(LibError::Io { ref source, .. }) if source.is_end() => {
                    // Many files simply stop without a terminating event.
                    log::debug!("end of MIDI data without end-of-track event");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Drop channels that never carried an event, and preserve trailing
        // silence on the rest.
        for track in (0..tracks.len()).rev() {
            if tracks[track].is_empty() {
                tracks.remove(track);
                track_info.remove(track);
            } else if self.last_delay[track] != 0 {
                tracks[track].push(TrackEvent::new(
                    self.last_delay[track],
                    Event::Configuration(Configuration::Empty),
                ));
                self.last_delay[track] = 0;
            }
        }

        let mut music = Music::default();
        music.patches = patches;
        music.track_info = track_info;
        music.patterns = vec![tracks];
        music.pattern_order = vec![0];
        music.initial_tempo = initial_tempo;
        music.ticks_per_track = self.total_delay as u32;

        split_polyphonic_tracks(&mut music)?;
        Ok(music)
    }

    /// Append an event to a channel's track, consuming its accrued delay.
    fn push(&mut self, tracks: &mut [Track], track: usize, event: Event) {
        let delay = self.last_delay[track];
        self.last_delay[track] = 0;
        tracks[track].push(TrackEvent::new(delay, event));
    }

    /// Process one delta-time and event.  Returns false at end of song.
    fn next_event(
        &mut self,
        patches: &mut Vec<Patch>,
        tracks: &mut Vec<Track>,
        track_info: &mut Vec<TrackInfo>,
        initial_tempo: &mut Tempo,
        last_tempo: &mut Tempo,
    ) -> LibResult<bool> {
        let delay = self.iter.read_vlq_u32().context(io!())?;
        for d in self.last_delay.iter_mut() {
            *d += delay;
        }
        self.total_delay += u64::from(delay);

        let mut event = self.iter.read_or_die().context(io!())?;
        let evdata;
        if event & 0x80 != 0 {
            // A normal event.  0xF0 events do not change the running
            // status.
            if event & 0xF0 != 0xF0 {
                self.last_event = event;
            }
            evdata = self.iter.read_or_die().context(io!())?;
        } else {
            // The high bit is unset, so this is the first data byte of a
            // new event of the same type as the last one.
            evdata = event;
            event = self.last_event;
            if event == 0 {
                return crate::error::RunningStatusSnafu { site: site!() }.fail();
            }
        }

        // Some CMF-era files write one-byte aftertouch events; treat them
        // as channel aftertouch.
        if self.flags.contains(MidiFlags::SHORT_AFTERTOUCH) && event & 0xF0 == 0xA0 {
            event = 0xD0 | (event & 0x0F);
        }

        let channel = usize::from(event & 0x0F);
        let track = channel;
        match event & 0xF0 {
            0x80 => {
                // Note off.
                if evdata >= MIDI_NOTES {
                    invalid_file!("MIDI note {} out of range", evdata);
                }
                let note = evdata;
                let _velocity = self.iter.read_or_die().context(io!())?;
                self.emit_note_off(tracks, track, note);
            }
            0x90 => {
                // Note on; velocity zero means note off.
                if evdata >= MIDI_NOTES {
                    invalid_file!("MIDI note {} out of range", evdata);
                }
                let note = evdata;
                let velocity = self.iter.read_or_die().context(io!())?;

                if velocity == 0 || self.active_notes[channel][usize::from(note)] {
                    // A re-struck note gets an implicit note-off first.
                    self.emit_note_off(tracks, track, note);
                }

                if velocity != 0 {
                    let (milli_hertz, instrument) = if channel == 9
                        && !self.flags.contains(MidiFlags::CHANNEL_10_NO_PERC)
                    {
                        let instrument = match self.perc_map[usize::from(note)] {
                            Some(i) => i,
                            None => {
                                // Allocate a new instrument for this
                                // percussion note.
                                patches.push(Patch::Midi(MidiPatch {
                                    midi_patch: note.into(),
                                    percussion: true,
                                }));
                                let i = patches.len() - 1;
                                self.perc_map[usize::from(note)] = Some(i);
                                i
                            }
                        };
                        (PERC_FREQ, instrument)
                    } else {
                        let instrument = match self.current_instrument[channel] {
                            Some(i) => i,
                            None => {
                                // A note without any patch change event;
                                // use a default instrument.
                                self.set_instrument(patches, channel, MIDI_DEFAULT_PATCH);
                                self.current_instrument[channel].unwrap()
                            }
                        };
                        (midi_to_freq(f64::from(note)), instrument)
                    };
                    self.push(
                        tracks,
                        track,
                        Event::NoteOn(NoteOn {
                            milli_hertz,
                            instrument,
                            velocity: widen7(velocity),
                        }),
                    );
                    self.active_notes[channel][usize::from(note)] = true;
                }
            }
            0xA0 => {
                // Polyphonic key pressure.
                let note = evdata;
                let pressure = self.iter.read_or_die().context(io!())?;
                self.push(
                    tracks,
                    track,
                    Event::SpecificNoteEffect {
                        milli_hertz: midi_to_freq(f64::from(note)),
                        effect: Effect::Volume {
                            velocity: widen7(pressure),
                        },
                    },
                );
            }
            0xB0 => {
                // Controller; evdata is the controller index.
                let value = self.iter.read_or_die().context(io!())?;
                match evdata {
                    0x63 => {
                        let new_vibrato = value & 1 != 0;
                        let new_tremolo = value & 2 != 0;
                        if new_vibrato != self.deep_vibrato {
                            self.push(
                                tracks,
                                track,
                                Event::Configuration(Configuration::EnableDeepVibrato {
                                    enabled: new_vibrato,
                                    chip_index: 0,
                                }),
                            );
                            self.deep_vibrato = new_vibrato;
                        }
                        if new_tremolo != self.deep_tremolo {
                            self.push(
                                tracks,
                                track,
                                Event::Configuration(Configuration::EnableDeepTremolo {
                                    enabled: new_tremolo,
                                    chip_index: 0,
                                }),
                            );
                            self.deep_tremolo = new_tremolo;
                        }
                    }
                    0x67 => {
                        self.push(
                            tracks,
                            track,
                            Event::Configuration(Configuration::EnableRhythm(value != 0)),
                        );
                    }
                    0x68 => {
                        let bend = semitones_to_bend(f64::from(value) / 128.0);
                        self.push(
                            tracks,
                            track,
                            Event::PolyphonicEffect(PolyphonicEffect::PitchbendChannel { bend }),
                        );
                    }
                    0x69 => {
                        let bend = semitones_to_bend(-f64::from(value) / 128.0);
                        self.push(
                            tracks,
                            track,
                            Event::PolyphonicEffect(PolyphonicEffect::PitchbendChannel { bend }),
                        );
                    }
                    other => {
                        log::debug!("ignoring unknown MIDI controller {:#04x}", other);
                    }
                }
            }
            0xC0 => {
                // Instrument change.
                self.set_instrument(patches, channel, evdata);
            }
            0xD0 => {
                // Channel pressure.
                self.push(
                    tracks,
                    track,
                    Event::PolyphonicEffect(PolyphonicEffect::VolumeChannel {
                        velocity: widen7(evdata),
                    }),
                );
            }
            0xE0 => {
                // Pitch bend; only the lower seven bits of each byte count.
                let msb = self.iter.read_or_die().context(io!())?;
                let bend = (u16::from(msb & 0x7F) << 7) | u16::from(evdata & 0x7F);
                self.push(
                    tracks,
                    track,
                    Event::PolyphonicEffect(PolyphonicEffect::PitchbendChannel { bend }),
                );
            }
            0xF0 => {
                return self.system_event(
                    event,
                    evdata,
                    patches,
                    tracks,
                    track_info,
                    initial_tempo,
                    last_tempo,
                );
            }
            _ => unreachable!("masked status byte"),
        }
        Ok(true)
    }

    fn emit_note_off(&mut self, tracks: &mut [Track], track: usize, note: u8) {
        if self.flags.contains(MidiFlags::CMF_EXTENSIONS) && track >= 12 {
            // The OPL percussion channels can only play one note at a time,
            // so turn off whatever the channel is playing.
            self.push(tracks, track, Event::NoteOff);
        } else {
            self.push(
                tracks,
                track,
                Event::SpecificNoteOff {
                    milli_hertz: midi_to_freq(f64::from(note)),
                },
            );
        }
        self.active_notes[track][usize::from(note)] = false;
    }

    /// Map a MIDI program number to a patch bank entry, adding one the first
    /// time each program is seen.
    fn set_instrument(&mut self, patches: &mut Vec<Patch>, channel: usize, midi_patch: u8) {
        for (i, p) in patches.iter().enumerate() {
            if let Patch::Midi(mp) = p {
                if !mp.percussion && mp.midi_patch.get() == midi_patch {
                    self.current_instrument[channel] = Some(i);
                    return;
                }
            }
        }
        patches.push(Patch::Midi(MidiPatch {
            midi_patch: midi_patch.into(),
            percussion: false,
        }));
        self.current_instrument[channel] = Some(patches.len() - 1);
    }

    /// 0xF0-0xFF system and meta events.  Returns false at end of song.
    #[allow(clippy::too_many_arguments)]
    fn system_event(
        &mut self,
        event: u8,
        evdata: u8,
        patches: &mut Vec<Patch>,
        tracks: &mut Vec<Track>,
        track_info: &mut Vec<TrackInfo>,
        initial_tempo: &mut Tempo,
        last_tempo: &mut Tempo,
    ) -> LibResult<bool> {
        match event {
            0xF0 => {
                // Sysex: read up to and including the terminating EOX.
                let mut b = evdata;
                while b & 0x80 == 0 {
                    b = self.iter.read_or_die().context(io!())?;
                }
            }
            0xF1 | 0xF3 => {} // one data byte, already consumed
            0xF2 => {
                // Song position pointer has a second data byte.
                self.iter.read_or_die().context(io!())?;
            }
            0xF6 | 0xF7 | 0xF8 | 0xFA | 0xFB | 0xFE => {}
            0xFC => return Ok(false), // stop
            0xFF => {
                let len = self.iter.read_vlq_u32().context(io!())?;
                match evdata {
                    0x2F => return Ok(false), // end of track
                    0x51 => {
                        if len != 3 {
                            log::warn!("set-tempo event had invalid length {}", len);
                            self.iter.skip(len as usize).context(io!())?;
                        } else {
                            let bytes = self.iter.read_n(3).context(io!())?;
                            let us_per_quarter = (u32::from(bytes[0]) << 16)
                                | (u32::from(bytes[1]) << 8)
                                | u32::from(bytes[2]);
                            if us_per_quarter == 0 {
                                log::warn!("ignoring zero-length quarter note tempo");
                            } else if self.total_delay == 0 {
                                // No events yet; update the initial tempo.
                                initial_tempo.set_us_per_quarter_note(us_per_quarter);
                                *last_tempo = *initial_tempo;
                            } else {
                                let mut tempo = *last_tempo;
                                tempo.set_us_per_quarter_note(us_per_quarter);
                                self.push(tracks, 0, Event::Tempo(tempo));
                                *last_tempo = tempo;
                            }
                        }
                    }
                    0x7F if !self.flags.contains(MidiFlags::BASIC_MIDI_ONLY) => {
                        self.sequencer_event(len, patches, tracks, track_info)?;
                    }
                    other => {
                        log::debug!("skipping unknown MIDI meta-event {:#04x}", other);
                        self.iter.skip(len as usize).context(io!())?;
                    }
                }
            }
            other => {
                log::warn!("unknown MIDI system command {:#04x}", other);
            }
        }
        Ok(true)
    }

    /// Meta event 0x7F: sequencer-specific data.  Manufacturer 00 00 3F is
    /// the AdLib MDI block carrying OPL patch data.
    fn sequencer_event(
        &mut self,
        len: u32,
        patches: &mut Vec<Patch>,
        tracks: &mut Vec<Track>,
        track_info: &mut Vec<TrackInfo>,
    ) -> LibResult<()> {
        if len < 3 + 2 + 1 {
            // Too short for a manufacturer id plus an opcode.
            self.iter.skip(len as usize).context(io!())?;
            return Ok(());
        }
        let mut remaining = len - 3;
        let mfg1 = self.iter.read_or_die().context(io!())?;
        let mfg2 = self.iter.read_u16().context(io!())?;
        if mfg1 == 0 && mfg2 == 0x3F {
            let opcode = self.iter.read_u16().context(io!())?;
            remaining -= 2;
            match opcode {
                1 => {
                    // Instrument change with inline OPL patch data.
                    let channel = self.iter.read_or_die().context(io!())?;
                    remaining -= 1;
                    if remaining < 28 {
                        log::warn!(
                            "AdLib patch change carries only {} bytes of register data",
                            remaining
                        );
                    } else if channel > 15 {
                        log::warn!(
                            "AdLib patch change for out-of-range channel {}, ignoring",
                            channel
                        );
                    } else {
                        let patch = read_adlib_patch(self.iter)?;
                        remaining -= 28;
                        patches.push(Patch::Opl(patch));
                        self.current_instrument[usize::from(channel)] = Some(patches.len() - 1);
                        // This track now plays OPL instruments.
                        track_info[usize::from(channel)] = TrackInfo::Opl { channel };
                    }
                }
                2 => {
                    // Rhythm-mode change.
                    let sound_mode = self.iter.read_or_die().context(io!())?;
                    remaining -= 1;
                    self.push(
                        tracks,
                        0,
                        Event::Configuration(Configuration::EnableRhythm(sound_mode != 0)),
                    );
                }
                3 => {
                    // Pitchbend range change.
                    let range = self.iter.read_or_die().context(io!())?;
                    remaining -= 1;
                    log::warn!("AdLib pitchbend range change (to {}) unimplemented", range);
                }
                other => {
                    log::debug!("unknown AdLib MDI opcode {}", other);
                }
            }
        } else {
            log::debug!(
                "unknown manufacturer id {:#04x}/{:#06x} in sequencer meta-event",
                mfg1,
                mfg2
            );
        }
        self.iter.skip(remaining as usize).context(io!())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitchbend_read() {
        // Note-on at A4, then a pitchbend a quarter semitone down.
        let music = midi_decode(
            b"\x00\x90\x45\x7f\x00\xe0\x00\x38",
            MidiFlags::DEFAULT,
            Tempo::default(),
        )
        .unwrap();
        let track = &music.patterns[0][0];
        assert!(matches!(track[0].event, Event::NoteOn(_)));
        match &track[1].event {
            Event::Effect(Effect::PitchbendNote { milli_hertz }) => {
                let hz = f64::from(*milli_hertz) / 1000.0;
                assert!((hz - 433.700).abs() < 0.05, "{}", hz);
            }
            other => panic!("pitchbend wrongly interpreted as {:?}", other),
        }
    }

    #[test]
    fn note_on_allocates_default_patch() {
        let music = midi_decode(
            b"\x00\x90\x45\x7f",
            MidiFlags::DEFAULT,
            Tempo::default(),
        )
        .unwrap();
        assert_eq!(music.patches.len(), 1);
        match &music.patches[0] {
            Patch::Midi(p) => {
                assert_eq!(p.midi_patch.get(), 0);
                assert!(!p.percussion);
            }
            other => panic!("wrong patch {:?}", other),
        }
        // The unused channels are gone.
        assert_eq!(music.patterns[0].len(), 1);
        assert_eq!(music.track_info.len(), 1);
    }

    #[test]
    fn running_status_read() {
        // Two note-ons on channel 0, the second with the status elided,
        // then both released.
        let music = midi_decode(
            b"\x00\x90\x45\x7f\x10\x3c\x7f\x10\x45\x00\x00\x3c\x00",
            MidiFlags::DEFAULT,
            Tempo::default(),
        )
        .unwrap();
        // Polyphony became two tracks.
        assert_eq!(music.patterns[0].len(), 2);
        let main = &music.patterns[0][0];
        assert!(matches!(main[0].event, Event::NoteOn(_)));
        assert!(matches!(main[1].event, Event::NoteOff));
        assert_eq!(main[1].delay, 0x20);
        let overflow = &music.patterns[0][1];
        assert!(matches!(overflow[0].event, Event::NoteOn(_)));
        assert_eq!(overflow[0].delay, 0x10);
        assert!(matches!(overflow[1].event, Event::NoteOff));
        assert_eq!(overflow[1].delay, 0x10);
    }

    #[test]
    fn percussion_notes_get_their_own_patches() {
        // Two hits on channel 10: note 35 and note 42.
        let music = midi_decode(
            b"\x00\x99\x23\x7f\x08\x99\x23\x00\x00\x99\x2a\x7f",
            MidiFlags::DEFAULT,
            Tempo::default(),
        )
        .unwrap();
        assert_eq!(music.patches.len(), 2);
        match &music.patches[0] {
            Patch::Midi(p) => {
                assert!(p.percussion);
                assert_eq!(p.midi_patch.get(), 35);
            }
            other => panic!("wrong patch {:?}", other),
        }
    }

    #[test]
    fn tempo_before_first_event_updates_initial() {
        let mut tempo = Tempo::default();
        tempo.set_ticks_per_quarter_note(192);
        let music = midi_decode(
            b"\x00\xff\x51\x03\x0f\x42\x40\x00\x90\x45\x7f",
            MidiFlags::DEFAULT,
            tempo,
        )
        .unwrap();
        assert_eq!(music.initial_tempo.us_per_quarter_note(), 1_000_000);
        // No TempoEvent was emitted.
        assert!(music.patterns[0][0]
            .iter()
            .all(|te| !matches!(te.event, Event::Tempo(_))));
    }

    #[test]
    fn truncated_stream_is_end_of_song() {
        let music = midi_decode(
            b"\x00\x90\x45\x7f\x20",
            MidiFlags::DEFAULT,
            Tempo::default(),
        )
        .unwrap();
        assert_eq!(music.patterns[0].len(), 1);
        assert_eq!(music.ticks_per_track, 0x20);
        // Trailing delay preserved as a dummy event.
        let track = &music.patterns[0][0];
        assert!(matches!(
            track.last().unwrap().event,
            Event::Configuration(Configuration::Empty)
        ));
    }

    #[test]
    fn bad_note_number_is_rejected() {
        // A data byte with the high bit set puts the note out of range.
        let result = midi_decode(b"\x00\x90\x85\x40", MidiFlags::DEFAULT, Tempo::default());
        assert!(result.is_err());
    }
}
