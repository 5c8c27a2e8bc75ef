/*!
The `patch` module describes the instruments a song can play.  A patch is a
tagged variant covering the three instrument worlds: register-level OPL FM
settings, a General MIDI program number, and raw PCM sample data.
!*/

use crate::core::MidiProgram;

/// One of the two oscillators in an OPL voice.  The field layout follows the
/// YMF262 register set: registers 0x20/0x40/0x60/0x80/0xE0 plus the operator
/// offset for the channel.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct OplOperator {
    pub enable_tremolo: bool,
    pub enable_vibrato: bool,
    pub enable_sustain: bool,
    pub enable_ksr: bool,
    /// Frequency multiplication factor, 0-15.
    pub freq_mult: u8,
    /// Key scale level, 0-3.
    pub scale_level: u8,
    /// Output attenuation, 0-63.  0 is the loudest.
    pub output_level: u8,
    /// Attack rate, 0-15.
    pub attack_rate: u8,
    /// Decay rate, 0-15.
    pub decay_rate: u8,
    /// Sustain level, 0-15.
    pub sustain_rate: u8,
    /// Release rate, 0-15.
    pub release_rate: u8,
    /// Waveform selection, 0-7.
    pub wave_select: u8,
}

impl OplOperator {
    /// Pack the tremolo/vibrato/sustain/KSR/multiplier fields into the 0x20
    /// register byte.
    pub(crate) fn reg_20(&self) -> u8 {
        ((self.enable_tremolo as u8) << 7)
            | ((self.enable_vibrato as u8) << 6)
            | ((self.enable_sustain as u8) << 5)
            | ((self.enable_ksr as u8) << 4)
            | (self.freq_mult & 0x0F)
    }

    /// Pack the key-scale/output-level fields into the 0x40 register byte.
    pub(crate) fn reg_40(&self) -> u8 {
        (self.scale_level << 6) | (self.output_level & 0x3F)
    }

    /// Pack the attack/decay fields into the 0x60 register byte.
    pub(crate) fn reg_60(&self) -> u8 {
        (self.attack_rate << 4) | (self.decay_rate & 0x0F)
    }

    /// Pack the sustain/release fields into the 0x80 register byte.
    pub(crate) fn reg_80(&self) -> u8 {
        (self.sustain_rate << 4) | (self.release_rate & 0x0F)
    }

    /// Pack the waveform selection into the 0xE0 register byte.
    pub(crate) fn reg_e0(&self) -> u8 {
        self.wave_select & 0x07
    }

    pub(crate) fn set_reg_20(&mut self, val: u8) {
        self.enable_tremolo = (val >> 7) & 1 != 0;
        self.enable_vibrato = (val >> 6) & 1 != 0;
        self.enable_sustain = (val >> 5) & 1 != 0;
        self.enable_ksr = (val >> 4) & 1 != 0;
        self.freq_mult = val & 0x0F;
    }

    pub(crate) fn set_reg_40(&mut self, val: u8) {
        self.scale_level = val >> 6;
        self.output_level = val & 0x3F;
    }

    pub(crate) fn set_reg_60(&mut self, val: u8) {
        self.attack_rate = val >> 4;
        self.decay_rate = val & 0x0F;
    }

    pub(crate) fn set_reg_80(&mut self, val: u8) {
        self.sustain_rate = val >> 4;
        self.release_rate = val & 0x0F;
    }

    pub(crate) fn set_reg_e0(&mut self, val: u8) {
        self.wave_select = val & 0x07;
    }
}

/// Which rhythm-mode voice an OPL patch is intended for.  `Melodic` covers
/// the ordinary nine channels; the other five are the fixed percussion
/// voices that channels 6-8 become when rhythm mode is enabled.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Rhythm {
    Melodic = 0,
    HiHat = 1,
    TopCymbal = 2,
    TomTom = 3,
    SnareDrum = 4,
    BassDrum = 5,
}

impl Default for Rhythm {
    fn default() -> Self {
        Rhythm::Melodic
    }
}

impl Rhythm {
    /// The percussion slot number (0-4) for the five rhythm voices, matching
    /// the keyon bit in register 0xBD.  `None` for `Melodic`.
    pub(crate) fn perc_index(&self) -> Option<u8> {
        match self {
            Rhythm::Melodic => None,
            other => Some(*other as u8 - 1),
        }
    }

    /// The inverse of [`Rhythm::perc_index`].
    pub(crate) fn from_perc_index(index: u8) -> Option<Rhythm> {
        match index {
            0 => Some(Rhythm::HiHat),
            1 => Some(Rhythm::TopCymbal),
            2 => Some(Rhythm::TomTom),
            3 => Some(Rhythm::SnareDrum),
            4 => Some(Rhythm::BassDrum),
            _ => None,
        }
    }

    /// True for rhythm voices driven by the modulator operator only.
    pub(crate) fn mod_only(&self) -> bool {
        matches!(self, Rhythm::HiHat | Rhythm::TomTom)
    }

    /// True for rhythm voices driven by the carrier operator only.
    pub(crate) fn car_only(&self) -> bool {
        matches!(self, Rhythm::SnareDrum | Rhythm::TopCymbal)
    }
}

/// A register-level OPL instrument: two operators plus the per-channel
/// feedback/connection byte, and a tag saying which voice it was written for.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct OplPatch {
    /// The modulator operator.
    pub m: OplOperator,
    /// The carrier operator.
    pub c: OplOperator,
    /// Feedback modulation factor, 0-7.
    pub feedback: u8,
    /// False for frequency modulation, true for additive synthesis.
    pub connection: bool,
    /// Which voice this patch plays.
    pub rhythm: Rhythm,
    /// Instrument name, where the format stores one (IBK, SBI).
    pub name: String,
}

impl OplPatch {
    /// Pack the feedback/connection fields into the 0xC0 register byte.
    pub(crate) fn reg_c0(&self) -> u8 {
        ((self.feedback & 0x07) << 1) | (self.connection as u8)
    }

    pub(crate) fn set_reg_c0(&mut self, val: u8) {
        self.feedback = (val >> 1) & 0x07;
        self.connection = val & 1 != 0;
    }

    /// True if `other` produces the same sound: everything except the rhythm
    /// tag and the name.
    pub fn same_sound(&self, other: &OplPatch) -> bool {
        self.m == other.m
            && self.c == other.c
            && self.feedback == other.feedback
            && self.connection == other.connection
    }
}

/// A General MIDI instrument.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct MidiPatch {
    /// The MIDI program number, or for percussion the note number on
    /// channel 10.
    pub midi_patch: MidiProgram,
    /// True if this patch is a channel-10 percussion instrument.
    pub percussion: bool,
}

/// A sampled PCM instrument.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct PcmPatch {
    /// Playback rate of the sample, in Hertz.
    pub sample_rate: u32,
    /// Bits per sample, 8 or 16.
    pub bit_depth: u8,
    /// Number of channels, 1 or 2.
    pub channels: u8,
    /// Loop start position, in samples.  Zero with `loop_end` zero means no
    /// loop.
    pub loop_start: u32,
    /// Loop end position, in samples.
    pub loop_end: u32,
    /// Default volume, 0-255.
    pub default_volume: u8,
    /// Raw sample data.
    pub data: Vec<u8>,
}

/// An instrument as referenced by [`crate::NoteOn::instrument`].
#[derive(Clone, Debug, PartialEq)]
pub enum Patch {
    Opl(OplPatch),
    Midi(MidiPatch),
    Pcm(PcmPatch),
    /// A placeholder keeping patch indices stable when a bank has gaps.
    Empty,
}

impl Patch {
    pub fn as_opl(&self) -> Option<&OplPatch> {
        match self {
            Patch::Opl(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_opl_mut(&mut self) -> Option<&mut OplPatch> {
        match self {
            Patch::Opl(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_midi(&self) -> Option<&MidiPatch> {
        match self {
            Patch::Midi(p) => Some(p),
            _ => None,
        }
    }
}
