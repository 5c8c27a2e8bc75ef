/*!
The `decode` module lowers a raw OPL register stream into the song model.
The decoder mirrors the chip: it keeps a shadow copy of every register and
turns the *changes* it observes into note and effect events.
!*/

use crate::core::{
    Block, Configuration, Effect, Event, Music, NoteOn, OplPatch, Patch, Rhythm, Tempo, Track,
    TrackEvent, TrackInfo, DEFAULT_VELOCITY,
};
use crate::error::Result;
use crate::opl::event::{valid, DelayType, OplEvent, OplReader};
use crate::opl::util::{
    attenuation_to_velocity, car_offset, fnum_to_milli_hertz, mod_offset, BASE_ATCK_DCAY,
    BASE_CHAR_MULT, BASE_FEED_CONN, BASE_SCAL_LEVL, BASE_SUST_RLSE, BASE_WAVE, OPLBIT_KEYON,
    OPL_REG_RHYTHM,
};
use log::{debug, warn};

/// Tracks produced by the decoder: nine melodic channels on the first chip,
/// the five rhythm voices, then nine melodic channels on the second chip.
const OPL_TRACK_COUNT: usize = 23;

const OPL_NUM_CHIPS: usize = 2;

/// Track index of a melodic chip channel.
fn track_index_melodic(chip: u8, channel: u8) -> usize {
    usize::from(chip) * 14 + usize::from(channel)
}

/// Track index of a rhythm voice, by its keyon-bit number.
fn track_index_perc(slot: u8) -> usize {
    9 + usize::from(slot)
}

/// The channel a rhythm voice sounds on.
fn rhythm_slot_channel(slot: u8) -> u8 {
    match slot {
        0 => 7, // hi-hat
        1 => 8, // top cymbal
        2 => 8, // tom-tom
        3 => 7, // snare drum
        _ => 6, // bass drum
    }
}

struct OplDecoder<'a> {
    reader: &'a mut dyn OplReader,
    delay_type: DelayType,
    fnum_conversion: f64,
    /// Delay ticks accrued on each track since its last event.
    last_delay: [u32; OPL_TRACK_COUNT],
    /// Shadow copy of every register on both chips.
    opl_state: [[u8; 256]; OPL_NUM_CHIPS],
}

/// Convert caller-supplied raw OPL data into a [`Music`] instance.
///
/// `reader` is called repeatedly until it returns `false`.  `delay_type`
/// says whether the format's delays elapse before or after their associated
/// register write, and `fnum_conversion` is the chip clock constant for
/// frequency conversion (normally [`crate::opl::OPL_FNUM_DEFAULT`]).
pub fn opl_decode(
    reader: &mut dyn OplReader,
    delay_type: DelayType,
    fnum_conversion: f64,
    initial_tempo: Tempo,
) -> Result<Music> {
    let mut decoder = OplDecoder {
        reader,
        delay_type,
        fnum_conversion,
        last_delay: [0; OPL_TRACK_COUNT],
        opl_state: [[0; 256]; OPL_NUM_CHIPS],
    };
    decoder.decode(initial_tempo)
}

impl<'a> OplDecoder<'a> {
    fn decode(&mut self, initial_tempo: Tempo) -> Result<Music> {
        let mut patches: Vec<Patch> = Vec::new();
        let mut tracks: Vec<Track> = vec![Vec::new(); OPL_TRACK_COUNT];

        let mut track_info = Vec::with_capacity(OPL_TRACK_COUNT);
        for c in 0..OPL_TRACK_COUNT as u8 {
            track_info.push(if c < 9 {
                TrackInfo::Opl { channel: c }
            } else if c < 9 + 5 {
                TrackInfo::OplPerc {
                    instrument: Rhythm::from_perc_index(c - 9).unwrap(),
                }
            } else {
                TrackInfo::Opl { channel: c - 5 }
            });
        }

        let mut total_delay: u64 = 0;
        let mut last_tempo = initial_tempo;
        let mut opl3 = false;

        loop {
            let mut ev = OplEvent::new(last_tempo);
            let more = self.reader.read_next_pair(&mut ev)?;
            if !more {
                // ev.delay may still hold a final trailing delay.
                if ev.valid & valid::DELAY != 0 {
                    total_delay += u64::from(ev.delay);
                    for d in self.last_delay.iter_mut() {
                        *d += ev.delay;
                    }
                }
                break;
            }

            if ev.valid & valid::DELAY != 0 {
                total_delay += u64::from(ev.delay);
                if self.delay_type == DelayType::DelayIsPreData {
                    for d in self.last_delay.iter_mut() {
                        *d += ev.delay;
                    }
                }
            }

            if (ev.valid & valid::TEMPO != 0) && ev.tempo != last_tempo {
                self.push_event(&mut tracks, 0, Event::Tempo(ev.tempo));
                last_tempo = ev.tempo;
            }

            if ev.valid & valid::REGS != 0 {
                debug_assert!(ev.chip_index < 2);
                let chip = usize::from(ev.chip_index);
                let oldval = self.opl_state[chip][usize::from(ev.reg)];
                self.opl_state[chip][usize::from(ev.reg)] = ev.val;
                let bits_changed = |mask: u8| (ev.val ^ oldval) & mask != 0;
                let rhythm_on = self.opl_state[0][usize::from(OPL_REG_RHYTHM)] & 0x20 != 0;

                if ev.reg == OPL_REG_RHYTHM {
                    self.decode_rhythm_reg(&mut tracks, &mut patches, ev.chip_index, oldval, ev.val);
                } else if ev.reg < 0x20 {
                    // Global configuration registers.
                    if ev.reg == 0x01 && bits_changed(0x20) {
                        self.push_event(
                            &mut tracks,
                            0,
                            Event::Configuration(Configuration::EnableWaveSel(
                                ev.val & 0x20 != 0,
                            )),
                        );
                    } else if ev.reg == 0x05 && ev.chip_index == 1 && bits_changed(0x01) {
                        let new_state = ev.val & 0x01 != 0;
                        if new_state != opl3 {
                            self.push_event(
                                &mut tracks,
                                0,
                                Event::Configuration(Configuration::EnableOpl3(new_state)),
                            );
                            opl3 = new_state;
                        }
                    }
                } else if (0xA0..0xE0).contains(&ev.reg) {
                    // A0, B0, C0 channel registers.
                    let channel = ev.reg & 0x0F;
                    if channel > 8 {
                        warn!("invalid OPL channel in register {:#04x}", ev.reg);
                    } else if rhythm_on && ev.chip_index == 0 && channel > 5 {
                        // Melodic registers for the channels taken over by
                        // percussive mode; the shadow state still feeds the
                        // rhythm note-ons.
                    } else {
                        let track = track_index_melodic(ev.chip_index, channel);
                        let noteon =
                            self.opl_state[chip][usize::from(0xB0 | channel)] & OPLBIT_KEYON != 0;
                        match ev.reg & 0xF0 {
                            0xA0 => {
                                if noteon && bits_changed(0xFF) {
                                    // The pitch changed while a note was
                                    // playing.
                                    let b0 = self.opl_state[chip][usize::from(0xB0 | channel)];
                                    self.create_or_update_pitchbend(&mut tracks, track, ev.val, b0);
                                }
                            }
                            0xB0 => {
                                if bits_changed(OPLBIT_KEYON) {
                                    if ev.val & OPLBIT_KEYON != 0 {
                                        self.create_note_on(
                                            &mut tracks,
                                            &mut patches,
                                            track,
                                            ev.chip_index,
                                            channel,
                                            Rhythm::Melodic,
                                            ev.val,
                                        );
                                    } else {
                                        self.create_note_off(&mut tracks, track);
                                    }
                                } else if noteon && bits_changed(0x1F) {
                                    // The note is already on and the pitch
                                    // has changed.
                                    let a0 = self.opl_state[chip][usize::from(0xA0 | channel)];
                                    self.create_or_update_pitchbend(&mut tracks, track, a0, ev.val);
                                }
                            }
                            _ => {} // C0: shadow only, read back at note-on
                        }
                    }
                }
                // Operator registers (0x20-0x9F, 0xE0-0xF5) produce no
                // events of their own; their values are captured from the
                // shadow at the next note-on.
            }

            if ev.valid & valid::DELAY != 0 && self.delay_type == DelayType::DelayIsPostData {
                for d in self.last_delay.iter_mut() {
                    *d += ev.delay;
                }
            }
        }

        // Put dummy events in where necessary to preserve trailing delays.
        for (track, events) in tracks.iter_mut().enumerate() {
            if self.last_delay[track] != 0 && !events.is_empty() {
                events.push(TrackEvent::new(
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
        music.loop_dest = None;
        music.initial_tempo = initial_tempo;
        music.ticks_per_track = total_delay as u32;
        Ok(music)
    }

    /// Register 0xBD: per-voice keyon bits, rhythm enable, and the deep
    /// tremolo/vibrato switches.
    fn decode_rhythm_reg(
        &mut self,
        tracks: &mut [Track],
        patches: &mut Vec<Patch>,
        chip_index: u8,
        oldval: u8,
        val: u8,
    ) {
        let bits_changed = |mask: u8| (val ^ oldval) & mask != 0;
        if val & 0x20 != 0 {
            if bits_changed(0x20) {
                // Rhythm was off, now it's on.
                self.push_event(
                    tracks,
                    0,
                    Event::Configuration(Configuration::EnableRhythm(true)),
                );
            }
            for slot in 0..5u8 {
                let keyon_bit = 1 << slot;
                // If rhythm mode has just been enabled and this voice's
                // keyon bit is set, or rhythm mode was already on and the
                // keyon bit changed, emit a note-on or note-off.
                if (bits_changed(0x20) && (val & keyon_bit != 0)) || bits_changed(keyon_bit) {
                    let channel = rhythm_slot_channel(slot);
                    let track = track_index_perc(slot);
                    if val & keyon_bit != 0 {
                        let b0 =
                            self.opl_state[usize::from(chip_index)][usize::from(0xB0 | channel)];
                        self.create_note_on(
                            tracks,
                            patches,
                            track,
                            chip_index,
                            channel,
                            Rhythm::from_perc_index(slot).unwrap(),
                            b0,
                        );
                    } else {
                        self.create_note_off(tracks, track);
                    }
                }
            }
        } else if bits_changed(0x20) {
            // Rhythm mode just got disabled; release whatever was playing.
            for slot in 0..5u8 {
                if oldval & (1 << slot) != 0 {
                    self.create_note_off(tracks, track_index_perc(slot));
                }
            }
            self.push_event(
                tracks,
                0,
                Event::Configuration(Configuration::EnableRhythm(false)),
            );
        }
        if bits_changed(0x80) {
            self.push_event(
                tracks,
                0,
                Event::Configuration(Configuration::EnableDeepTremolo {
                    enabled: val & 0x80 != 0,
                    chip_index,
                }),
            );
        }
        if bits_changed(0x40) {
            self.push_event(
                tracks,
                0,
                Event::Configuration(Configuration::EnableDeepVibrato {
                    enabled: val & 0x40 != 0,
                    chip_index,
                }),
            );
        }
    }

    /// Append an event to a track, consuming the track's accrued delay.
    fn push_event(&mut self, tracks: &mut [Track], track: usize, event: Event) {
        let delay = self.last_delay[track];
        self.last_delay[track] = 0;
        tracks[track].push(TrackEvent::new(delay, event));
    }

    /// Snapshot the current operator state of a channel into a patch.
    fn get_current_patch(&self, chip_index: u8, channel: u8) -> OplPatch {
        let chip = usize::from(chip_index);
        let mut patch = OplPatch::default();
        let mut op = mod_offset(channel);
        for target in [false, true].iter() {
            let o = if *target { &mut patch.c } else { &mut patch.m };
            o.set_reg_20(self.opl_state[chip][usize::from(BASE_CHAR_MULT | op)]);
            o.set_reg_40(self.opl_state[chip][usize::from(BASE_SCAL_LEVL | op)]);
            o.set_reg_60(self.opl_state[chip][usize::from(BASE_ATCK_DCAY | op)]);
            o.set_reg_80(self.opl_state[chip][usize::from(BASE_SUST_RLSE | op)]);
            o.set_reg_e0(self.opl_state[chip][usize::from(BASE_WAVE | op)]);
            // Switch to the carrier for the next loop iteration.
            op = car_offset(channel);
        }
        patch.set_reg_c0(self.opl_state[chip][usize::from(BASE_FEED_CONN | channel)]);
        patch.rhythm = Rhythm::Melodic; // overridden later if needed
        patch
    }

    /// Find the patch in the bank, appending it if it is new.  Returns its
    /// index.
    fn save_patch(&self, patches: &mut Vec<Patch>, cur: OplPatch) -> usize {
        for (i, p) in patches.iter().enumerate() {
            if let Patch::Opl(existing) = p {
                if existing.same_sound(&cur) && existing.rhythm == cur.rhythm {
                    return i;
                }
            }
        }
        patches.push(Patch::Opl(cur));
        patches.len() - 1
    }

    fn create_note_on(
        &mut self,
        tracks: &mut [Track],
        patches: &mut Vec<Patch>,
        track: usize,
        chip_index: u8,
        channel: u8,
        rhythm: Rhythm,
        b0val: u8,
    ) {
        let mut patch = self.get_current_patch(chip_index, channel);
        patch.rhythm = rhythm;
        let instrument = self.save_patch(patches, patch);

        let chip = usize::from(chip_index);
        let fnum =
            (u16::from(b0val & 0x03) << 8) | u16::from(self.opl_state[chip][usize::from(0xA0 | channel)]);
        let block = Block::new((b0val >> 2) & 0x07);
        let milli_hertz = fnum_to_milli_hertz(fnum, block, self.fnum_conversion);

        // Velocity is meaningless for the modulator-only rhythm voices.
        let velocity = if rhythm.mod_only() {
            DEFAULT_VELOCITY
        } else {
            let cur_vol =
                self.opl_state[chip][usize::from(BASE_SCAL_LEVL | car_offset(channel))] & 0x3F;
            attenuation_to_velocity(cur_vol)
        };

        self.push_event(
            tracks,
            track,
            Event::NoteOn(NoteOn {
                milli_hertz,
                instrument,
                velocity,
            }),
        );
    }

    /// Switch off the note currently playing on the track.  Any zero-delay
    /// effects immediately before the note-off are discarded since they
    /// would never be heard.
    fn create_note_off(&mut self, tracks: &mut [Track], track: usize) {
        if self.last_delay[track] == 0 {
            // The note-off lands on the same instant as the preceding
            // events; any effects there will never be heard.
            while let Some(te) = tracks[track].last() {
                if !matches!(te.event, Event::Effect(_)) {
                    break;
                }
                let delay = te.delay;
                debug!(
                    "discarding inaudible effect before note-off on track {}",
                    track
                );
                tracks[track].pop();
                self.last_delay[track] += delay;
                if delay != 0 {
                    // Anything earlier happened at an earlier instant.
                    break;
                }
            }
        }
        self.push_event(tracks, track, Event::NoteOff);
    }

    fn create_or_update_pitchbend(
        &mut self,
        tracks: &mut [Track],
        track: usize,
        a0val: u8,
        b0val: u8,
    ) {
        let fnum = (u16::from(b0val & 0x03) << 8) | u16::from(a0val);
        let block = Block::new((b0val >> 2) & 0x07);
        let freq = fnum_to_milli_hertz(fnum, block, self.fnum_conversion);

        // An OPL frequency is spread across two registers, so a single pitch
        // change arrives as two writes.  If the previous event is a
        // pitchbend at the same instant, merge into it.
        if self.last_delay[track] == 0 {
            if let Some(te) = tracks[track].last_mut() {
                if te.delay == 0 {
                    if let Event::Effect(Effect::PitchbendNote { milli_hertz }) = &mut te.event {
                        *milli_hertz = freq;
                        return;
                    }
                }
            }
        }

        self.push_event(
            tracks,
            track,
            Event::Effect(Effect::PitchbendNote { milli_hertz: freq }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opl::OPL_FNUM_DEFAULT;

    /// Replays a fixed list of (delay, reg, val) triples, PostData style.
    struct VecReader {
        events: Vec<(u32, u8, u8)>,
        pos: usize,
    }

    impl OplReader for VecReader {
        fn read_next_pair(&mut self, event: &mut OplEvent) -> Result<bool> {
            if self.pos >= self.events.len() {
                return Ok(false);
            }
            let (delay, reg, val) = self.events[self.pos];
            self.pos += 1;
            event.delay = delay;
            event.reg = reg;
            event.val = val;
            event.chip_index = 0;
            event.valid = valid::DELAY | valid::REGS;
            Ok(true)
        }
    }

    fn channel0_setup() -> Vec<(u32, u8, u8)> {
        vec![
            (0, 0x20, 0x01),
            (0, 0x23, 0x01),
            (0, 0x40, 0x10),
            (0, 0x43, 0x00), // carrier at full volume
            (0, 0x60, 0xF0),
            (0, 0x63, 0xF0),
            (0, 0x80, 0x77),
            (0, 0x83, 0x77),
            (0, 0xC0, 0x0E),
        ]
    }

    #[test]
    fn note_on_off_with_trailing_delay() {
        let mut events = channel0_setup();
        events.push((0, 0xA0, 0x44));
        events.push((0x10, 0xB0, 0x32)); // key-on (block 4, fnum 0x244), then wait
        events.push((0x30, 0xB0, 0x12)); // key-off, then trailing delay
        let mut reader = VecReader { events, pos: 0 };
        let music = opl_decode(
            &mut reader,
            DelayType::DelayIsPostData,
            OPL_FNUM_DEFAULT,
            Tempo::default(),
        )
        .unwrap();

        let track = &music.patterns[0][0];
        assert_eq!(track.len(), 3);
        assert_eq!(track[0].delay, 0);
        match &track[0].event {
            Event::NoteOn(n) => {
                // fnum 0x244, block 4 is a quantisation step under A4.
                assert_eq!(n.milli_hertz, 439991);
                assert_eq!(n.instrument, 0);
                assert_eq!(n.velocity, 255);
            }
            other => panic!("wrong event: {:?}", other),
        }
        assert_eq!(track[1].delay, 0x10);
        assert!(matches!(track[1].event, Event::NoteOff));
        assert_eq!(track[2].delay, 0x30);
        assert!(matches!(
            track[2].event,
            Event::Configuration(Configuration::Empty)
        ));
        assert_eq!(music.ticks_per_track, 0x40);
        assert_eq!(music.patches.len(), 1);
    }

    #[test]
    fn fnum_split_across_registers_coalesces() {
        let mut events = channel0_setup();
        events.push((0, 0xA0, 0x44));
        events.push((0x08, 0xB0, 0x32)); // key-on, then wait
        events.push((0, 0xA0, 0x48)); // bend, LSB...
        events.push((0, 0xB0, 0x33)); // ...and MSB at the same instant
        let mut reader = VecReader { events, pos: 0 };
        let music = opl_decode(
            &mut reader,
            DelayType::DelayIsPostData,
            OPL_FNUM_DEFAULT,
            Tempo::default(),
        )
        .unwrap();
        let track = &music.patterns[0][0];
        assert_eq!(track.len(), 2);
        match &track[1].event {
            Event::Effect(Effect::PitchbendNote { milli_hertz }) => {
                assert_eq!(
                    *milli_hertz,
                    fnum_to_milli_hertz(0x348, Block::new(4), OPL_FNUM_DEFAULT)
                );
            }
            other => panic!("wrong event: {:?}", other),
        }
        assert_eq!(track[1].delay, 0x08);
    }

    #[test]
    fn inaudible_effect_discarded_before_note_off() {
        let mut events = channel0_setup();
        events.push((0, 0xA0, 0x44));
        events.push((0x08, 0xB0, 0x32)); // key-on, then wait
        events.push((0, 0xA0, 0x48)); // bend...
        events.push((0, 0xB0, 0x12)); // ...then key-off at the same instant
        let mut reader = VecReader { events, pos: 0 };
        let music = opl_decode(
            &mut reader,
            DelayType::DelayIsPostData,
            OPL_FNUM_DEFAULT,
            Tempo::default(),
        )
        .unwrap();
        let track = &music.patterns[0][0];
        assert_eq!(track.len(), 2);
        assert!(matches!(track[0].event, Event::NoteOn(_)));
        assert!(matches!(track[1].event, Event::NoteOff));
        assert_eq!(track[1].delay, 0x08);
    }

    #[test]
    fn rhythm_keyon_maps_to_perc_tracks() {
        let mut events = Vec::new();
        // Set up the snare operator (ch7 carrier, offset 0x14).
        events.push((0, 0x34, 0x01));
        events.push((0, 0x54, 0x00));
        events.push((0, 0x74, 0xF0));
        events.push((0, 0x94, 0x77));
        events.push((0, 0xA7, 0x44));
        events.push((0, 0xB7, 0x12));
        events.push((0x10, 0xBD, 0x20 | 0x08)); // rhythm on + snare keyon, then wait
        events.push((0, 0xBD, 0x20)); // snare off
        let mut reader = VecReader { events, pos: 0 };
        let music = opl_decode(
            &mut reader,
            DelayType::DelayIsPostData,
            OPL_FNUM_DEFAULT,
            Tempo::default(),
        )
        .unwrap();

        // Track 0 gets the rhythm-enable config event.
        assert!(matches!(
            music.patterns[0][0][0].event,
            Event::Configuration(Configuration::EnableRhythm(true))
        ));
        // Snare is slot 3 -> track 12.
        let snare = &music.patterns[0][12];
        assert_eq!(snare.len(), 2);
        match &snare[0].event {
            Event::NoteOn(n) => {
                assert_eq!(n.instrument, 0);
                assert_eq!(n.velocity, 255);
            }
            other => panic!("wrong event: {:?}", other),
        }
        assert!(matches!(snare[1].event, Event::NoteOff));
        assert_eq!(snare[1].delay, 0x10);
        match &music.patches[0] {
            Patch::Opl(p) => assert_eq!(p.rhythm, Rhythm::SnareDrum),
            other => panic!("wrong patch: {:?}", other),
        }
    }
}
