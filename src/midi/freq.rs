/*!
The `freq` module converts between MIDI note numbers and the absolute
milliHertz frequencies used by the song model, including the fractional
offsets expressed by pitchbend.
!*/

use crate::core::MidiNote;
use log::warn;

/// The amount a full pitchbend moves a note, in semitones, on either side of
/// centre.  8192 raw steps cover two semitones, so one semitone is 4096.
const BEND_STEPS_PER_SEMITONE: f64 = 4096.0;

/// Centre (no bend) value of the raw 14-bit pitchbend range.
pub(crate) const BEND_CENTRE: u16 = 8192;

/// Convert a (possibly fractional) MIDI note number into milliHertz.
/// `midi_to_freq(69.0)` is A4, 440000.
pub fn midi_to_freq(midi: f64) -> u32 {
    (440000.0 * 2f64.powf((midi - 69.0) / 12.0)) as u32
}

/// Convert milliHertz into a MIDI note number plus a pitchbend correction.
///
/// When `cur_note` is given, that note number is kept and the entire offset
/// goes into the bend, so a pitch change can be expressed without re-keying
/// the note.  The bend is clamped to the −8192..8191 range of a 14-bit
/// pitchbend message.
pub fn freq_to_midi(milli_hertz: u32, cur_note: Option<MidiNote>) -> (MidiNote, i16) {
    // The lower bound is clamped to MIDI note #0.  Could get lower with a
    // pitchbend but 8Hz is below human hearing anyway.
    if milli_hertz <= 8175 {
        return (MidiNote::new(0), 0);
    }
    let mut val = 12.0 * (f64::from(milli_hertz) / 440000.0).log2() + 69.0;
    // round to three decimal places
    val = (val * 1000.0).round() / 1000.0;
    let note_signed = match cur_note {
        Some(n) => i32::from(n.get()),
        None => val.round() as i32,
    };
    let mut bend = ((val - f64::from(note_signed)) * BEND_STEPS_PER_SEMITONE) as i32;

    if bend < -8192 {
        bend = -8192;
    }
    if bend > 8191 {
        bend = 8191;
    }

    if note_signed > 0x7F {
        warn!(
            "frequency {} mHz is too high (requires MIDI note {})",
            milli_hertz, note_signed
        );
    }
    (MidiNote::new(note_signed.max(0) as u8), bend as i16)
}

/// The fractional MIDI note number of a frequency, without rounding.  Used
/// when a pitchbend has to be combined with a note before re-quantising.
pub(crate) fn freq_to_semitones(milli_hertz: u32) -> f64 {
    12.0 * (f64::from(milli_hertz) / 440000.0).log2() + 69.0
}

/// Convert a raw 14-bit pitchbend value into signed semitones.
pub(crate) fn bend_to_semitones(bend: u16) -> f64 {
    (f64::from(bend) - f64::from(BEND_CENTRE)) / BEND_STEPS_PER_SEMITONE
}

/// Convert signed semitones into a raw 14-bit pitchbend value.
pub(crate) fn semitones_to_bend(semitones: f64) -> u16 {
    let raw = (semitones * BEND_STEPS_PER_SEMITONE + f64::from(BEND_CENTRE)).round();
    if raw < 0.0 {
        0
    } else if raw > 16383.0 {
        16383
    } else {
        raw as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_to_freq() {
        assert_eq!(midi_to_freq(0.0), 8175);
        assert_eq!(midi_to_freq(1.0), 8661);
        assert_eq!(midi_to_freq(45.0), 110000);
        assert_eq!(midi_to_freq(57.0), 220000);
        assert_eq!(midi_to_freq(69.0), 440000);
        assert_eq!(midi_to_freq(93.0), 1760000);
        assert_eq!(midi_to_freq(117.0), 7040000);
        assert_eq!(midi_to_freq(123.0), 9956063);
        assert_eq!(midi_to_freq(127.0), 12543853);
    }

    #[test]
    fn freq_to_note() {
        fn check(freq: u32, note: u8, bend: i16) {
            let (n, b) = freq_to_midi(freq, None);
            assert_eq!(n.get(), note, "note for {} mHz", freq);
            assert_eq!(b, bend, "bend for {} mHz", freq);
        }
        check(8175, 0, 0);
        check(8661, 1, -8);
        check(110000, 45, 0);
        check(220000, 57, 0);
        check(440000, 69, 0);
        check(1760000, 93, 0);
        check(7040000, 117, 0);
        check(9956063, 123, 0);
        check(12543853, 127, 0);
    }

    #[test]
    fn over_range_frequency_clamps_to_the_top_note() {
        let (note, _bend) = freq_to_midi(13_000_000, None);
        assert_eq!(note.get(), 127);
    }

    #[test]
    fn held_note_goes_into_bend() {
        // 466164 mHz is A#4; against a held A4 the whole semitone must be
        // expressed as a bend.
        let (note, bend) = freq_to_midi(466164, Some(MidiNote::new(69)));
        assert_eq!(note.get(), 69);
        assert_eq!(bend, 4096);
    }

    #[test]
    fn bend_semitone_conversions() {
        assert_eq!(bend_to_semitones(8192), 0.0);
        assert_eq!(bend_to_semitones(12288), 1.0);
        assert_eq!(semitones_to_bend(0.0), 8192);
        assert_eq!(semitones_to_bend(-2.0), 0);
        assert_eq!(semitones_to_bend(2.0), 16383);
    }
}
