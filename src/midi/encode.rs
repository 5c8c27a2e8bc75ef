/*!
The `encode` module raises a song into Standard MIDI bytes.  Tracks are
assigned MIDI channels as their first note arrives; status bytes ride the
running-status convention via [`crate::scribe::Scribe`].
!*/

use crate::core::{
    handle_all_events, Configuration, Effect, EventHandler, EventOrder, Goto, MidiNote, Music,
    NoteOn, Patch, PolyphonicEffect, Tempo,
};
use crate::error::Result;
use crate::midi::decode::MIDI_CHANNEL_COUNT;
use crate::midi::freq::{freq_to_midi, BEND_CENTRE};
use crate::midi::vlq::encode_u32;
use crate::midi::MidiFlags;
use crate::scribe::{Scribe, ScribeSettings};
use log::{debug, warn};
use snafu::ResultExt;
use std::io::Write;

/// The velocity written for a note-off when one has to be invented.
const MIDI_DEFAULT_RELEASE_VELOCITY: u8 = 64;

/// Fired between tracks when encoding in a `TrackRow` order, so type-1
/// writers can close off each MTrk.
pub type EndOfTrackCallback<'a> = &'a mut dyn FnMut();

struct MidiEncoder<'a, W: Write> {
    scribe: Scribe<W>,
    music: &'a Music,
    flags: MidiFlags,
    end_of_track: Option<EndOfTrackCallback<'a>>,
    /// Ticks accrued since the last written message.
    pending_delay: u32,
    /// Absolute time, for the channel reclaim heuristic.
    abs_time: u64,
    /// MIDI channel assigned to each track.
    channel_map: Vec<Option<u8>>,
    /// The note sounding on each track.
    active_note: Vec<Option<MidiNote>>,
    /// Patch bank index last sent as a program change, per MIDI channel.
    current_patch: [Option<usize>; MIDI_CHANNEL_COUNT],
    /// Pitchbend last written, per MIDI channel.
    current_bend: [i16; MIDI_CHANNEL_COUNT],
    /// When each MIDI channel last did something.
    last_used: [u64; MIDI_CHANNEL_COUNT],
    channels_used: [bool; MIDI_CHANNEL_COUNT],
    deep_tremolo: bool,
    deep_vibrato: bool,
    update_deep: bool,
}

/// Process a song into Standard MIDI data.
///
/// On return `channels_used`, when supplied, is set to true for each MIDI
/// channel that carried an event (the CMF header needs this).  The
/// `end_of_track` callback fires between tracks in the `TrackRow` orders.
pub fn midi_encode<'a, W: Write>(
    output: W,
    music: &'a Music,
    flags: MidiFlags,
    channels_used: Option<&mut [bool; MIDI_CHANNEL_COUNT]>,
    order: EventOrder,
    end_of_track: Option<EndOfTrackCallback<'a>>,
) -> Result<()> {
    let mut encoder = MidiEncoder {
        scribe: Scribe::new(
            output,
            ScribeSettings {
                running_status: true,
            },
        ),
        music,
        flags,
        end_of_track,
        pending_delay: 0,
        abs_time: 0,
        channel_map: vec![None; music.track_info.len()],
        active_note: vec![None; music.track_info.len()],
        current_patch: [None; MIDI_CHANNEL_COUNT],
        current_bend: [0; MIDI_CHANNEL_COUNT],
        last_used: [0; MIDI_CHANNEL_COUNT],
        channels_used: [false; MIDI_CHANNEL_COUNT],
        deep_tremolo: false,
        deep_vibrato: false,
        update_deep: false,
    };

    if flags.contains(MidiFlags::EMBED_TEMPO) {
        let tempo = music.initial_tempo;
        encoder.tempo(0, 0, 0, &tempo)?;
    }

    handle_all_events(&mut encoder, music, order)?;

    // End of song.
    encoder.write_raw_with_delay(&[0xFF, 0x2F, 0x00])?;

    if let Some(out) = channels_used {
        *out = encoder.channels_used;
    }
    Ok(())
}

impl<'a, W: Write> MidiEncoder<'a, W> {
    /// Write the pending delta-time followed by a status byte (elided under
    /// running status when possible).
    fn write_command(&mut self, command: u8) -> Result<()> {
        debug_assert!(command >= 0x80 && command < 0xF0);
        let delay = encode_u32(self.pending_delay);
        self.pending_delay = 0;
        self.scribe.write_all(&delay).context(wr!())?;
        self.scribe.write_status_byte(command)?;
        Ok(())
    }

    /// Write the pending delta-time followed by raw bytes (meta events,
    /// which cancel running status).
    fn write_raw_with_delay(&mut self, bytes: &[u8]) -> Result<()> {
        let delay = encode_u32(self.pending_delay);
        self.pending_delay = 0;
        self.scribe.write_all(&delay).context(wr!())?;
        self.scribe.write_all(bytes).context(wr!())?;
        self.scribe.clear_running_status();
        Ok(())
    }

    fn write_data(&mut self, bytes: &[u8]) -> Result<()> {
        self.scribe.write_all(bytes).context(wr!())?;
        Ok(())
    }

    fn mark_used(&mut self, channel: u8) {
        self.channels_used[usize::from(channel)] = true;
        self.last_used[usize::from(channel)] = self.abs_time;
    }

    /// The MIDI channel for a track, allocated on first use.  Channel 9 is
    /// reserved for percussion; when every channel is taken, the one idle
    /// the longest is reclaimed.
    fn midi_channel(&mut self, track: usize) -> u8 {
        if let Some(channel) = self.channel_map[track] {
            return channel;
        }
        let mut available = [true; MIDI_CHANNEL_COUNT];
        for mapped in self.channel_map.iter().flatten() {
            available[usize::from(*mapped)] = false;
        }
        let mut chosen = None;
        let mut earliest_time = u64::MAX;
        let mut earliest_channel = 0u8;
        for m in 0..MIDI_CHANNEL_COUNT {
            if m == 9 {
                continue; // skip the percussion channel
            }
            if available[m] {
                chosen = Some(m as u8);
                break;
            }
            if self.last_used[m] < earliest_time {
                earliest_time = self.last_used[m];
                earliest_channel = m as u8;
            }
        }
        let channel = match chosen {
            Some(c) => c,
            None => {
                // Every channel is in use; take over the quietest one.
                debug!(
                    "all MIDI channels in use, reclaiming channel {}",
                    earliest_channel
                );
                earliest_channel
            }
        };
        self.channel_map[track] = Some(channel);
        channel
    }

    /// Flush a pending deep tremolo/vibrato change as CMF controller 0x63.
    fn flush_deep(&mut self) -> Result<()> {
        if !self.update_deep {
            return Ok(());
        }
        let value = (self.deep_vibrato as u8) | ((self.deep_tremolo as u8) << 1);
        self.write_command(0xB0)?;
        self.write_data(&[0x63, value])?;
        self.update_deep = false;
        Ok(())
    }

    /// The program number to write for a patch bank index.
    fn program_for(&self, instrument: usize) -> Result<u8> {
        match self.music.patches.get(instrument) {
            Some(Patch::Midi(p)) => Ok(p.midi_patch.get()),
            Some(_) if self.flags.contains(MidiFlags::USE_PATCH_INDEX) => {
                if instrument >= 128 {
                    format_limitation!("patch index {} does not fit in a program change", instrument);
                }
                Ok(instrument as u8)
            }
            Some(_) => bad_patch!(
                "instrument {} is not a MIDI patch but the song is being written as MIDI",
                instrument
            ),
            None => invalid_file!("instrument {} is out of range of the patch bank", instrument),
        }
    }
}

impl<'a, W: Write> EventHandler for MidiEncoder<'a, W> {
    fn tempo(&mut self, delay: u32, _track: usize, _pattern: usize, tempo: &Tempo) -> Result<()> {
        self.pending_delay += delay;
        self.abs_time += u64::from(delay);
        let us_per_quarter = tempo.us_per_quarter_note();
        self.write_raw_with_delay(&[
            0xFF,
            0x51,
            0x03,
            (us_per_quarter >> 16) as u8,
            (us_per_quarter >> 8) as u8,
            us_per_quarter as u8,
        ])
    }

    fn note_on(&mut self, delay: u32, track: usize, _pattern: usize, note: &NoteOn) -> Result<()> {
        self.pending_delay += delay;
        self.abs_time += u64::from(delay);
        self.flush_deep()?;

        let percussion = matches!(
            self.music.patches.get(note.instrument),
            Some(Patch::Midi(p)) if p.percussion
        );

        let (channel, midi_note) = if percussion {
            let patch = match &self.music.patches[note.instrument] {
                Patch::Midi(p) => p,
                _ => unreachable!(),
            };
            self.channel_map[track] = Some(9);
            (9u8, MidiNote::new(patch.midi_patch.get()))
        } else {
            let channel = self.midi_channel(track);
            let (midi_note, bend) = freq_to_midi(note.milli_hertz, None);
            if !self.flags.contains(MidiFlags::INTEGER_NOTES_ONLY)
                && bend != self.current_bend[usize::from(channel)]
            {
                let raw = (i32::from(bend) + i32::from(BEND_CENTRE)) as u16;
                self.write_command(0xE0 | channel)?;
                self.write_data(&[(raw & 0x7F) as u8, ((raw >> 7) & 0x7F) as u8])?;
                self.current_bend[usize::from(channel)] = bend;
            }
            if self.current_patch[usize::from(channel)] != Some(note.instrument) {
                let program = self.program_for(note.instrument)?;
                self.write_command(0xC0 | channel)?;
                self.write_data(&[program])?;
                self.current_patch[usize::from(channel)] = Some(note.instrument);
            }
            (channel, midi_note)
        };

        self.write_command(0x90 | channel)?;
        let velocity = if note.velocity == 0 {
            MIDI_DEFAULT_RELEASE_VELOCITY
        } else {
            note.velocity >> 1
        };
        self.write_data(&[midi_note.get(), velocity])?;
        self.active_note[track] = Some(midi_note);
        self.mark_used(channel);
        Ok(())
    }

    fn note_off(&mut self, delay: u32, track: usize, _pattern: usize) -> Result<()> {
        self.pending_delay += delay;
        self.abs_time += u64::from(delay);
        let channel = match self.channel_map[track] {
            Some(c) => c,
            None => {
                warn!("note-off on track {} with no channel mapping", track);
                return Ok(());
            }
        };
        let note = match self.active_note[track] {
            Some(n) => n,
            None => {
                warn!("note-off on track {} but no note is playing", track);
                return Ok(());
            }
        };
        if self.scribe.running_status() == Some(0x90 | channel) {
            // The last event was a note-on, so a zero-velocity note-on is
            // cheaper: running status elides the status byte entirely.
            self.write_command(0x90 | channel)?;
            self.write_data(&[note.get(), 0])?;
        } else {
            self.write_command(0x80 | channel)?;
            self.write_data(&[note.get(), MIDI_DEFAULT_RELEASE_VELOCITY])?;
        }
        self.active_note[track] = None;
        self.mark_used(channel);
        Ok(())
    }

    fn effect(&mut self, delay: u32, track: usize, _pattern: usize, effect: &Effect) -> Result<()> {
        self.pending_delay += delay;
        self.abs_time += u64::from(delay);
        match effect {
            Effect::PitchbendNote { milli_hertz } => {
                if self.flags.contains(MidiFlags::INTEGER_NOTES_ONLY) {
                    return Ok(());
                }
                let channel = self.midi_channel(track);
                let (_note, bend) = freq_to_midi(*milli_hertz, self.active_note[track]);
                if bend != self.current_bend[usize::from(channel)] {
                    let raw = (i32::from(bend) + i32::from(BEND_CENTRE)) as u16;
                    self.write_command(0xE0 | channel)?;
                    self.write_data(&[(raw & 0x7F) as u8, ((raw >> 7) & 0x7F) as u8])?;
                    self.current_bend[usize::from(channel)] = bend;
                }
                self.mark_used(channel);
            }
            Effect::Volume { velocity } => {
                let channel = self.midi_channel(track);
                match self.active_note[track] {
                    Some(note) => {
                        // Key aftertouch.
                        self.write_command(0xA0 | channel)?;
                        self.write_data(&[note.get(), velocity >> 1])?;
                        self.mark_used(channel);
                    }
                    None => warn!("volume change on track {} with no note playing", track),
                }
            }
        }
        Ok(())
    }

    fn polyphonic_effect(
        &mut self,
        delay: u32,
        track: usize,
        _pattern: usize,
        effect: &PolyphonicEffect,
    ) -> Result<()> {
        self.pending_delay += delay;
        self.abs_time += u64::from(delay);
        let channel = self.midi_channel(track);
        match effect {
            PolyphonicEffect::PitchbendChannel { bend } => {
                self.write_command(0xE0 | channel)?;
                self.write_data(&[(bend & 0x7F) as u8, ((bend >> 7) & 0x7F) as u8])?;
                self.current_bend[usize::from(channel)] =
                    (i32::from(*bend) - i32::from(BEND_CENTRE)) as i16;
            }
            PolyphonicEffect::VolumeChannel { velocity } => {
                self.write_command(0xD0 | channel)?;
                self.write_data(&[velocity >> 1])?;
            }
        }
        self.mark_used(channel);
        Ok(())
    }

    fn goto_jump(&mut self, _delay: u32, track: usize, _pattern: usize, _goto: &Goto) -> Result<()> {
        format_limitation!(
            "track {} carries a jump, which Standard MIDI cannot express",
            track
        )
    }

    fn configuration(
        &mut self,
        delay: u32,
        _track: usize,
        _pattern: usize,
        config: &Configuration,
    ) -> Result<()> {
        self.pending_delay += delay;
        self.abs_time += u64::from(delay);
        match config {
            Configuration::Empty => {}
            Configuration::EnableRhythm(enabled) => {
                self.write_command(0xB0)?;
                self.write_data(&[0x67, *enabled as u8])?;
            }
            Configuration::EnableDeepTremolo { enabled, .. } => {
                self.deep_tremolo = *enabled;
                self.update_deep = true;
            }
            Configuration::EnableDeepVibrato { enabled, .. } => {
                self.deep_vibrato = *enabled;
                self.update_deep = true;
            }
            other => {
                debug!("configuration event {:?} has no MIDI representation", other);
            }
        }
        Ok(())
    }

    fn end_of_track(&mut self, remaining_delay: u32) -> Result<()> {
        self.abs_time += u64::from(remaining_delay);
        if let Some(cb) = self.end_of_track.as_mut() {
            cb();
        }
        // Each track starts its own time base.
        self.pending_delay = 0;
        Ok(())
    }

    fn end_of_pattern(&mut self, remaining_delay: u32) -> Result<()> {
        self.pending_delay += remaining_delay;
        self.abs_time += u64::from(remaining_delay);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Event, MidiPatch, TrackEvent, TrackInfo, DEFAULT_VELOCITY};

    fn write_music() -> Music {
        let mut music = Music::default();
        music.patches.push(Patch::Midi(MidiPatch {
            midi_patch: 20.into(), // instrument #0 is MIDI patch #20
            percussion: false,
        }));
        music.pattern_order.push(0);
        music
    }

    fn encode(music: &Music) -> Vec<u8> {
        let mut out = Vec::new();
        midi_encode(
            &mut out,
            music,
            MidiFlags::DEFAULT,
            None,
            EventOrder::OrderRowTrack,
            None,
        )
        .unwrap();
        out
    }

    fn note_on(milli_hertz: u32) -> Event {
        Event::NoteOn(NoteOn {
            milli_hertz,
            instrument: 0,
            velocity: DEFAULT_VELOCITY,
        })
    }

    #[test]
    fn pitchbend_write() {
        let mut music = write_music();
        music.track_info.push(TrackInfo::Midi { channel: 1 });
        music.patterns.push(vec![vec![
            TrackEvent::new(0, note_on(440000)),
            TrackEvent::new(
                10,
                Event::Effect(Effect::PitchbendNote {
                    milli_hertz: 433700,
                }),
            ),
        ]]);
        music.ticks_per_track = 10;

        let bytes = encode(&music);
        assert_eq!(
            bytes,
            [
                0x00, 0xc0, 0x14, // set instrument
                0x00, 0x90, 0x45, 0x7f, // note on
                0x0a, 0xe0, 0x00, 0x38, // pitchbend
                0x00, 0xff, 0x2f, 0x00, // eof
            ]
        );
    }

    #[test]
    fn running_status_write() {
        let mut music = write_music();
        music.track_info.push(TrackInfo::Midi { channel: 1 });
        music.track_info.push(TrackInfo::Midi { channel: 2 });
        music.patterns.push(vec![
            vec![
                TrackEvent::new(0, note_on(440000)),
                TrackEvent::new(10, Event::NoteOff),
            ],
            vec![
                TrackEvent::new(20, note_on(440000)),
                TrackEvent::new(10, Event::NoteOff),
                TrackEvent::new(10, note_on(440000)),
                TrackEvent::new(10, Event::NoteOff),
            ],
        ]);
        music.ticks_per_track = 50;

        let bytes = encode(&music);
        assert_eq!(
            bytes,
            [
                0x00, 0xc0, 0x14, // set instrument
                0x00, 0x90, 0x45, 0x7f, // note on
                0x0a, 0x45, 0x00, // note off (as vel-0 note on)
                0x0a, 0xc1, 0x14, // set instrument
                0x00, 0x91, 0x45, 0x7f, // note on
                0x0a, 0x45, 0x00, // note off
                0x0a, 0x45, 0x7f, // note on (running status)
                0x0a, 0x45, 0x00, // note off
                0x00, 0xff, 0x2f, 0x00, // eof
            ]
        );
    }

    #[test]
    fn embedded_tempo() {
        let mut music = write_music();
        music.track_info.push(TrackInfo::Midi { channel: 0 });
        music
            .patterns
            .push(vec![vec![TrackEvent::new(0, note_on(440000))]]);
        music.ticks_per_track = 0;
        music.initial_tempo.set_ticks_per_quarter_note(192);
        music.initial_tempo.set_us_per_quarter_note(500_000);

        let mut out = Vec::new();
        midi_encode(
            &mut out,
            &music,
            MidiFlags::EMBED_TEMPO,
            None,
            EventOrder::OrderRowTrack,
            None,
        )
        .unwrap();
        assert_eq!(&out[..7], &[0x00, 0xff, 0x51, 0x03, 0x07, 0xa1, 0x20]);
    }

    #[test]
    fn channels_used_reported() {
        let mut music = write_music();
        music.track_info.push(TrackInfo::Midi { channel: 0 });
        music
            .patterns
            .push(vec![vec![TrackEvent::new(0, note_on(440000))]]);
        music.ticks_per_track = 0;

        let mut used = [false; MIDI_CHANNEL_COUNT];
        let mut out = Vec::new();
        midi_encode(
            &mut out,
            &music,
            MidiFlags::DEFAULT,
            Some(&mut used),
            EventOrder::OrderRowTrack,
            None,
        )
        .unwrap();
        assert!(used[0]);
        assert!(!used[1]);
    }
}
