/*!
The `encode` module raises a song back into a raw OPL register stream.  Like
the decoder it keeps a shadow register file, and it only emits writes for
registers whose value actually changes, which is what keeps re-encoded files
byte-identical to their source.
!*/

use crate::core::{
    handle_all_events, Block, Configuration, Effect, EventHandler, EventOrder, Goto, Music,
    NoteOn, OplPatch, Patch, PolyphonicEffect, Rhythm, Tempo, TrackInfo, DEFAULT_VELOCITY,
};
use crate::error::Result;
use crate::midi::{freq_to_midi, midi_to_freq};
use crate::opl::event::{valid, DelayType, OplEvent, OplWriter};
use crate::opl::util::{
    attenuation_to_velocity, car_offset, milli_hertz_to_fnum, mod_offset, velocity_to_attenuation,
    BASE_ATCK_DCAY, BASE_CHAR_MULT, BASE_FEED_CONN, BASE_SCAL_LEVL, BASE_SUST_RLSE, BASE_WAVE,
    OPLBIT_KEYON, OPL_REG_RHYTHM,
};
use log::{debug, warn};
use std::ops::BitOr;

/// Options controlling how a song is lowered to OPL registers.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OplWriteFlags(u32);

impl OplWriteFlags {
    /// No special behaviour.
    pub const DEFAULT: OplWriteFlags = OplWriteFlags(0);
    /// Round note frequencies to the nearest semitone and skip sub-semitone
    /// pitchbends.
    pub const INTEGER_NOTES_ONLY: OplWriteFlags = OplWriteFlags(1);
    /// Refuse writes that need a second chip; the target format is OPL2
    /// only.
    pub const OPL2_ONLY: OplWriteFlags = OplWriteFlags(2);
    /// Never allocate channel 0; id engines keep it for sound effects.
    pub const RESERVE_FIRST_CHAN: OplWriteFlags = OplWriteFlags(4);

    pub fn contains(self, other: OplWriteFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OplWriteFlags {
    type Output = OplWriteFlags;
    fn bitor(self, rhs: OplWriteFlags) -> OplWriteFlags {
        OplWriteFlags(self.0 | rhs.0)
    }
}

/// Repositions delays for the target format.  The encoder always produces
/// pre-data delays; for a post-data format each register write is held back
/// one step so the following event's delay can be attached after it.
struct DelayShim<'a> {
    inner: &'a mut dyn OplWriter,
    delay_type: DelayType,
    last_tempo: Tempo,
    held: Option<(u8, u8, u8)>,
}

impl<'a> DelayShim<'a> {
    fn write(&mut self, ev: &OplEvent) -> Result<()> {
        let mut out = OplEvent::new(self.last_tempo);

        if ev.valid & valid::TEMPO != 0 {
            out.valid |= valid::TEMPO;
            self.last_tempo = ev.tempo;
        }
        out.tempo = self.last_tempo;

        if ev.valid & valid::DELAY != 0 {
            out.valid |= valid::DELAY;
            out.delay = ev.delay;
        }

        match self.delay_type {
            DelayType::DelayIsPreData => {
                if ev.valid & valid::REGS != 0 {
                    debug_assert!(ev.chip_index < 2);
                    out.valid |= valid::REGS;
                    out.chip_index = ev.chip_index;
                    out.reg = ev.reg;
                    out.val = ev.val;
                }
            }
            DelayType::DelayIsPostData => {
                if let Some((chip_index, reg, val)) = self.held.take() {
                    out.valid |= valid::REGS;
                    out.chip_index = chip_index;
                    out.reg = reg;
                    out.val = val;
                }
                if ev.valid & valid::REGS != 0 {
                    self.held = Some((ev.chip_index, ev.reg, ev.val));
                }
            }
        }

        if out.valid != 0 {
            self.inner.write_next_pair(&out)?;
        }
        Ok(())
    }

    /// Flush the register write held back by post-data repositioning.
    fn finish(&mut self) -> Result<()> {
        if let Some((chip_index, reg, val)) = self.held.take() {
            let mut out = OplEvent::new(self.last_tempo);
            out.valid = valid::REGS;
            out.chip_index = chip_index;
            out.reg = reg;
            out.val = val;
            self.inner.write_next_pair(&out)?;
        }
        Ok(())
    }
}

/// Where a track's notes land on the chip.
enum Target {
    Melodic { chip_index: u8, channel: u8 },
    Perc { slot: u8, channel: u8 },
}

struct OplEncoder<'a, 'b> {
    shim: DelayShim<'a>,
    music: &'b Music,
    fnum_conversion: f64,
    flags: OplWriteFlags,
    opl_state: [[u8; 256]; 2],
    cached_delay: u32,
    /// Melodic (chip, channel) assigned to each track, allocated on first
    /// use.
    channel_map: Vec<Option<(u8, u8)>>,
    /// Which melodic channels are taken.
    channel_used: [[bool; 9]; 2],
}

/// Process a song's instruments and events into raw OPL data, delivered to
/// `writer` one reg/val pair at a time.
pub fn opl_encode(
    writer: &mut dyn OplWriter,
    music: &Music,
    delay_type: DelayType,
    fnum_conversion: f64,
    flags: OplWriteFlags,
) -> Result<()> {
    let mut encoder = OplEncoder {
        shim: DelayShim {
            inner: writer,
            delay_type,
            last_tempo: music.initial_tempo,
            held: None,
        },
        music,
        fnum_conversion,
        flags,
        opl_state: [[0; 256]; 2],
        cached_delay: 0,
        channel_map: vec![None; music.track_info.len()],
        channel_used: [[false; 9]; 2],
    };
    handle_all_events(&mut encoder, music, EventOrder::OrderRowTrack)?;
    encoder.flush_trailing_delay()?;
    encoder.shim.finish()
}

impl<'a, 'b> OplEncoder<'a, 'b> {
    /// Emit a register write if it changes the chip state, attaching any
    /// accumulated delay.
    fn write_reg(&mut self, chip_index: u8, reg: u8, val: u8) -> Result<()> {
        if chip_index > 0 && self.flags.contains(OplWriteFlags::OPL2_ONLY) {
            format_limitation!("the song requires OPL3 but the target format is OPL2 only");
        }
        if self.opl_state[usize::from(chip_index)][usize::from(reg)] == val {
            return Ok(());
        }
        self.opl_state[usize::from(chip_index)][usize::from(reg)] = val;

        let mut ev = OplEvent::new(self.shim.last_tempo);
        ev.valid = valid::REGS;
        if self.cached_delay > 0 {
            ev.valid |= valid::DELAY;
            ev.delay = self.cached_delay;
            self.cached_delay = 0;
        }
        ev.chip_index = chip_index;
        ev.reg = reg;
        ev.val = val;
        self.shim.write(&ev)
    }

    fn flush_trailing_delay(&mut self) -> Result<()> {
        if self.cached_delay > 0 {
            let mut ev = OplEvent::new(self.shim.last_tempo);
            ev.valid = valid::DELAY;
            ev.delay = self.cached_delay;
            self.cached_delay = 0;
            self.shim.write(&ev)?;
        }
        Ok(())
    }

    /// True if the melodic channel may be handed out.
    fn channel_allowed(&self, chip_index: u8, channel: u8) -> bool {
        if chip_index == 0
            && channel == 0
            && self.flags.contains(OplWriteFlags::RESERVE_FIRST_CHAN)
        {
            return false;
        }
        if chip_index > 0 && self.flags.contains(OplWriteFlags::OPL2_ONLY) {
            return false;
        }
        true
    }

    fn target_for_track(&mut self, track: usize) -> Result<Target> {
        match self.music.track_info.get(track) {
            Some(TrackInfo::Opl { channel }) => {
                if let Some((chip_index, channel)) = self.channel_map[track] {
                    return Ok(Target::Melodic {
                        chip_index,
                        channel,
                    });
                }
                // Prefer the channel the track asks for; when it is taken
                // (or reserved for sound effects) take the next free one.
                let desired = (channel / 9, channel % 9);
                let mut chosen = None;
                if self.channel_allowed(desired.0, desired.1)
                    && !self.channel_used[usize::from(desired.0)][usize::from(desired.1)]
                {
                    chosen = Some(desired);
                } else {
                    'chips: for chip_index in 0..2u8 {
                        for channel in 0..9u8 {
                            if self.channel_allowed(chip_index, channel)
                                && !self.channel_used[usize::from(chip_index)]
                                    [usize::from(channel)]
                            {
                                chosen = Some((chip_index, channel));
                                break 'chips;
                            }
                        }
                    }
                }
                match chosen {
                    Some((chip_index, channel)) => {
                        self.channel_used[usize::from(chip_index)][usize::from(channel)] = true;
                        self.channel_map[track] = Some((chip_index, channel));
                        Ok(Target::Melodic {
                            chip_index,
                            channel,
                        })
                    }
                    None => format_limitation!(
                        "no OPL channel left for track {}",
                        track
                    ),
                }
            }
            Some(TrackInfo::OplPerc { instrument }) => {
                let slot = match instrument.perc_index() {
                    Some(slot) => slot,
                    None => format_limitation!(
                        "track {} claims to be percussive but names no rhythm voice",
                        track
                    ),
                };
                Ok(Target::Perc {
                    slot,
                    channel: match slot {
                        0 => 7,
                        1 => 8,
                        2 => 8,
                        3 => 7,
                        _ => 6,
                    },
                })
            }
            _ => format_limitation!(
                "track {} does not target the OPL and cannot be written to an OPL format",
                track
            ),
        }
    }

    fn opl_patch(&self, instrument: usize) -> Result<&'b OplPatch> {
        match self.music.patches.get(instrument) {
            Some(Patch::Opl(p)) => Ok(p),
            Some(_) => bad_patch!(
                "instrument {} is not an OPL patch but the track plays it on an OPL channel",
                instrument
            ),
            None => invalid_file!("instrument {} is out of range of the patch bank", instrument),
        }
    }

    /// Write one operator's five registers.
    fn write_operator(
        &mut self,
        chip_index: u8,
        op_offset: u8,
        op: &crate::core::OplOperator,
        reg_40_override: Option<u8>,
    ) -> Result<()> {
        self.write_reg(chip_index, BASE_CHAR_MULT | op_offset, op.reg_20())?;
        self.write_reg(
            chip_index,
            BASE_SCAL_LEVL | op_offset,
            reg_40_override.unwrap_or_else(|| op.reg_40()),
        )?;
        self.write_reg(chip_index, BASE_ATCK_DCAY | op_offset, op.reg_60())?;
        self.write_reg(chip_index, BASE_SUST_RLSE | op_offset, op.reg_80())?;
        self.write_reg(chip_index, BASE_WAVE | op_offset, op.reg_e0())?;
        Ok(())
    }

    fn note_frequency(&self, milli_hertz: u32) -> (u16, Block) {
        let milli_hertz = if self.flags.contains(OplWriteFlags::INTEGER_NOTES_ONLY) {
            let (note, _bend) = freq_to_midi(milli_hertz, None);
            midi_to_freq(f64::from(note.get()))
        } else {
            milli_hertz
        };
        milli_hertz_to_fnum(milli_hertz, self.fnum_conversion)
    }

    /// The carrier attenuation for a note.  A patch snapshotted by the OPL
    /// decoder already carries the note's level, so the patch value is
    /// preferred whenever the velocity agrees with it (or is unspecified);
    /// this is what keeps re-encoded register streams byte-identical.  An
    /// explicit foreign velocity goes through the volume curve instead.
    fn carrier_attenuation(patch: &OplPatch, velocity: u8) -> u8 {
        if velocity == DEFAULT_VELOCITY || velocity == attenuation_to_velocity(patch.c.output_level)
        {
            patch.c.output_level
        } else {
            velocity_to_attenuation(velocity)
        }
    }
}

impl<'a, 'b> EventHandler for OplEncoder<'a, 'b> {
    fn tempo(&mut self, delay: u32, _track: usize, _pattern: usize, tempo: &Tempo) -> Result<()> {
        self.cached_delay += delay;
        let mut ev = OplEvent::new(*tempo);
        ev.valid = valid::TEMPO;
        if self.cached_delay > 0 {
            ev.valid |= valid::DELAY;
            ev.delay = self.cached_delay;
            self.cached_delay = 0;
        }
        self.shim.write(&ev)
    }

    fn note_on(&mut self, delay: u32, track: usize, _pattern: usize, note: &NoteOn) -> Result<()> {
        self.cached_delay += delay;
        let patch = self.opl_patch(note.instrument)?.clone();
        let (fnum, block) = self.note_frequency(note.milli_hertz);
        let attenuation = Self::carrier_attenuation(&patch, note.velocity);

        match self.target_for_track(track)? {
            Target::Melodic {
                chip_index,
                channel,
            } => {
                let car_40 = (patch.c.scale_level << 6) | (attenuation & 0x3F);
                self.write_operator(chip_index, mod_offset(channel), &patch.m, None)?;
                self.write_operator(chip_index, car_offset(channel), &patch.c, Some(car_40))?;
                self.write_reg(chip_index, BASE_FEED_CONN | channel, patch.reg_c0())?;
                self.write_reg(chip_index, 0xA0 | channel, (fnum & 0xFF) as u8)?;
                self.write_reg(
                    chip_index,
                    0xB0 | channel,
                    OPLBIT_KEYON | (block.get() << 2) | ((fnum >> 8) as u8),
                )?;
            }
            Target::Perc { slot, channel } => {
                let rhythm = Rhythm::from_perc_index(slot).unwrap();
                if rhythm.mod_only() {
                    self.write_operator(0, mod_offset(channel), &patch.m, None)?;
                } else if rhythm.car_only() {
                    let car_40 = (patch.c.scale_level << 6) | (attenuation & 0x3F);
                    self.write_operator(0, car_offset(channel), &patch.c, Some(car_40))?;
                } else {
                    // Bass drum uses both operators.
                    let car_40 = (patch.c.scale_level << 6) | (attenuation & 0x3F);
                    self.write_operator(0, mod_offset(channel), &patch.m, None)?;
                    self.write_operator(0, car_offset(channel), &patch.c, Some(car_40))?;
                }
                self.write_reg(0, BASE_FEED_CONN | channel, patch.reg_c0())?;
                self.write_reg(0, 0xA0 | channel, (fnum & 0xFF) as u8)?;
                self.write_reg(0, 0xB0 | channel, (block.get() << 2) | ((fnum >> 8) as u8))?;
                let bd = self.opl_state[0][usize::from(OPL_REG_RHYTHM)] | 0x20 | (1 << slot);
                self.write_reg(0, OPL_REG_RHYTHM, bd)?;
            }
        }
        Ok(())
    }

    fn note_off(&mut self, delay: u32, track: usize, _pattern: usize) -> Result<()> {
        self.cached_delay += delay;
        match self.target_for_track(track)? {
            Target::Melodic {
                chip_index,
                channel,
            } => {
                let b0 = self.opl_state[usize::from(chip_index)][usize::from(0xB0 | channel)];
                self.write_reg(chip_index, 0xB0 | channel, b0 & !OPLBIT_KEYON)?;
            }
            Target::Perc { slot, .. } => {
                let bd = self.opl_state[0][usize::from(OPL_REG_RHYTHM)] & !(1 << slot);
                self.write_reg(0, OPL_REG_RHYTHM, bd)?;
            }
        }
        Ok(())
    }

    fn specific_note_off(
        &mut self,
        delay: u32,
        track: usize,
        pattern: usize,
        _milli_hertz: u32,
    ) -> Result<()> {
        // Tracks are monophonic by the time they reach the OPL, so a
        // specific note-off can only mean the one playing note.
        self.note_off(delay, track, pattern)
    }

    fn specific_note_effect(
        &mut self,
        delay: u32,
        track: usize,
        pattern: usize,
        _milli_hertz: u32,
        effect: &Effect,
    ) -> Result<()> {
        self.effect(delay, track, pattern, effect)
    }

    fn effect(
        &mut self,
        delay: u32,
        track: usize,
        _pattern: usize,
        effect: &Effect,
    ) -> Result<()> {
        self.cached_delay += delay;
        match effect {
            Effect::PitchbendNote { milli_hertz } => {
                if self.flags.contains(OplWriteFlags::INTEGER_NOTES_ONLY) {
                    debug!("skipping pitchbend (integer notes only)");
                    return Ok(());
                }
                let (fnum, block) = milli_hertz_to_fnum(*milli_hertz, self.fnum_conversion);
                match self.target_for_track(track)? {
                    Target::Melodic {
                        chip_index,
                        channel,
                    } => {
                        let keyon = self.opl_state[usize::from(chip_index)]
                            [usize::from(0xB0 | channel)]
                            & OPLBIT_KEYON;
                        self.write_reg(chip_index, 0xA0 | channel, (fnum & 0xFF) as u8)?;
                        self.write_reg(
                            chip_index,
                            0xB0 | channel,
                            keyon | (block.get() << 2) | ((fnum >> 8) as u8),
                        )?;
                    }
                    Target::Perc { channel, .. } => {
                        self.write_reg(0, 0xA0 | channel, (fnum & 0xFF) as u8)?;
                        self.write_reg(
                            0,
                            0xB0 | channel,
                            (block.get() << 2) | ((fnum >> 8) as u8),
                        )?;
                    }
                }
            }
            Effect::Volume { velocity } => {
                let attenuation = velocity_to_attenuation(*velocity);
                let (chip_index, op_offset) = match self.target_for_track(track)? {
                    Target::Melodic {
                        chip_index,
                        channel,
                    } => (chip_index, car_offset(channel)),
                    Target::Perc { slot, channel } => {
                        let rhythm = Rhythm::from_perc_index(slot).unwrap();
                        if rhythm.mod_only() {
                            warn!("ignoring volume change on a modulator-only rhythm voice");
                            return Ok(());
                        }
                        (0, car_offset(channel))
                    }
                };
                let scale = self.opl_state[usize::from(chip_index)]
                    [usize::from(BASE_SCAL_LEVL | op_offset)]
                    & 0xC0;
                self.write_reg(
                    chip_index,
                    BASE_SCAL_LEVL | op_offset,
                    scale | (attenuation & 0x3F),
                )?;
            }
        }
        Ok(())
    }

    fn polyphonic_effect(
        &mut self,
        _delay: u32,
        track: usize,
        _pattern: usize,
        _effect: &PolyphonicEffect,
    ) -> Result<()> {
        format_limitation!(
            "track {} carries polyphonic effects; split the song before OPL encoding",
            track
        )
    }

    fn goto_jump(&mut self, _delay: u32, track: usize, _pattern: usize, _goto: &Goto) -> Result<()> {
        format_limitation!(
            "track {} carries a jump, which a register stream cannot express",
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
        self.cached_delay += delay;
        match config {
            Configuration::Empty => {}
            Configuration::EnableOpl3(enabled) => {
                if *enabled && self.flags.contains(OplWriteFlags::OPL2_ONLY) {
                    format_limitation!("the song needs OPL3 mode but the target is OPL2 only");
                }
                self.write_reg(1, 0x05, *enabled as u8)?;
            }
            Configuration::EnableDeepTremolo {
                enabled,
                chip_index,
            } => {
                let bd = self.opl_state[usize::from(*chip_index)][usize::from(OPL_REG_RHYTHM)];
                let bd = if *enabled { bd | 0x80 } else { bd & !0x80 };
                self.write_reg(*chip_index, OPL_REG_RHYTHM, bd)?;
            }
            Configuration::EnableDeepVibrato {
                enabled,
                chip_index,
            } => {
                let bd = self.opl_state[usize::from(*chip_index)][usize::from(OPL_REG_RHYTHM)];
                let bd = if *enabled { bd | 0x40 } else { bd & !0x40 };
                self.write_reg(*chip_index, OPL_REG_RHYTHM, bd)?;
            }
            Configuration::EnableRhythm(enabled) => {
                let bd = self.opl_state[0][usize::from(OPL_REG_RHYTHM)];
                let bd = if *enabled { bd | 0x20 } else { bd & !0x20 };
                self.write_reg(0, OPL_REG_RHYTHM, bd)?;
            }
            Configuration::EnableWaveSel(enabled) => {
                self.write_reg(0, 0x01, if *enabled { 0x20 } else { 0x00 })?;
            }
        }
        Ok(())
    }

    fn end_of_pattern(&mut self, remaining_delay: u32) -> Result<()> {
        self.cached_delay += remaining_delay;
        Ok(())
    }
}
