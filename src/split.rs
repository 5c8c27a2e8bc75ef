/*!
The `split` module turns tracks carrying several simultaneous notes into a
set of monophonic tracks, which is what hardware channels need.  It runs
once after MIDI decoding; frequency-addressed ("specific") note events only
exist before this pass.
!*/

use crate::core::{Effect, Event, Music, PolyphonicEffect, TrackEvent};
use crate::error::Result;
use crate::midi::{bend_to_semitones, freq_to_semitones, midi_to_freq};

/// Move concurrent notes off each track onto parallel overflow tracks.
///
/// Every produced track plays at most one note at a time, and the
/// frequency-addressed events are lowered to their plain per-track forms.
/// Overflow tracks are inserted directly after the track they came from,
/// with the matching track-info entry duplicated so channel routing is
/// preserved.
pub fn split_polyphonic_tracks(music: &mut Music) -> Result<()> {
    if music.patterns.len() > 1 {
        format_limitation!("polyphony can only be split in single-pattern songs");
    }
    let Music {
        patterns,
        track_info,
        ..
    } = music;
    let pattern = match patterns.first_mut() {
        Some(p) => p,
        None => return Ok(()),
    };

    let mut t = 0;
    while t < pattern.len() {
        debug_assert_eq!(pattern.len(), track_info.len());
        let source = std::mem::take(&mut pattern[t]);

        let mut main = Vec::new();
        let mut overflow = Vec::new();
        let mut moved_notes = false;
        let mut cur_note_freq: Option<u32> = None;
        let mut delay_main = 0u32;
        let mut delay_overflow = 0u32;
        let mut cur_bend = 0f64; // current channel pitchbend in semitones

        for mut te in source {
            delay_main += te.delay;
            delay_overflow += te.delay;

            match te.event {
                Event::NoteOn(ref mut note) => {
                    if cur_note_freq.is_some() {
                        // A note is already playing; this one overflows.
                        te.delay = delay_overflow;
                        delay_overflow = 0;
                        overflow.push(te);
                        moved_notes = true;
                    } else {
                        cur_note_freq = Some(note.milli_hertz);
                        if cur_bend != 0.0 {
                            // Bake the channel pitchbend into the note.
                            let target = cur_bend + freq_to_semitones(note.milli_hertz);
                            note.milli_hertz = midi_to_freq(target);
                        }
                        te.delay = delay_main;
                        delay_main = 0;
                        main.push(te);
                    }
                }
                Event::SpecificNoteOff { milli_hertz } => {
                    if Some(milli_hertz) == cur_note_freq {
                        main.push(TrackEvent::new(delay_main, Event::NoteOff));
                        delay_main = 0;
                        cur_note_freq = None;
                    } else {
                        // Belongs to one of the overflow notes.
                        te.delay = delay_overflow;
                        delay_overflow = 0;
                        overflow.push(te);
                    }
                }
                Event::SpecificNoteEffect {
                    milli_hertz,
                    effect,
                } => {
                    if Some(milli_hertz) == cur_note_freq {
                        main.push(TrackEvent::new(delay_main, Event::Effect(effect)));
                        delay_main = 0;
                    } else {
                        te.delay = delay_overflow;
                        delay_overflow = 0;
                        overflow.push(te);
                    }
                }
                Event::NoteOff => {
                    cur_note_freq = None;
                    te.delay = delay_main;
                    delay_main = 0;
                    main.push(te);
                }
                Event::PolyphonicEffect(effect) => {
                    match effect {
                        PolyphonicEffect::PitchbendChannel { bend } => {
                            cur_bend = bend_to_semitones(bend);
                            if let Some(freq) = cur_note_freq {
                                let target = cur_bend + freq_to_semitones(freq);
                                main.push(TrackEvent::new(
                                    delay_main,
                                    Event::Effect(Effect::PitchbendNote {
                                        milli_hertz: midi_to_freq(target),
                                    }),
                                ));
                                delay_main = 0;
                            }
                        }
                        PolyphonicEffect::VolumeChannel { velocity } => {
                            main.push(TrackEvent::new(
                                delay_main,
                                Event::Effect(Effect::Volume { velocity }),
                            ));
                            delay_main = 0;
                        }
                    }
                    // Forward the polyphonic event so it keeps affecting
                    // whatever plays on the overflow track.  (If nothing
                    // does, no harm done.)
                    te.delay = delay_overflow;
                    delay_overflow = 0;
                    overflow.push(te);
                }
                _ => {
                    // Everything else stays on the main track.
                    te.delay = delay_main;
                    delay_main = 0;
                    main.push(te);
                }
            }
        }

        pattern[t] = main;
        if moved_notes {
            // Process the overflow in the next loop iteration; each pass
            // strictly reduces polyphony, so this terminates.
            pattern.insert(t + 1, overflow);
            let info = track_info[t];
            track_info.insert(t + 1, info);
        } else {
            t += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NoteOn, TrackInfo};

    fn note_on(delay: u32, milli_hertz: u32) -> TrackEvent {
        TrackEvent::new(
            delay,
            Event::NoteOn(NoteOn {
                milli_hertz,
                instrument: 0,
                velocity: 255,
            }),
        )
    }

    fn specific_off(delay: u32, milli_hertz: u32) -> TrackEvent {
        TrackEvent::new(delay, Event::SpecificNoteOff { milli_hertz })
    }

    fn assert_note(te: &TrackEvent, delay: u32, milli_hertz: u32) {
        assert_eq!(te.delay, delay);
        match &te.event {
            Event::NoteOn(n) => assert_eq!(n.milli_hertz, milli_hertz),
            other => panic!("expected note-on, got {:?}", other),
        }
    }

    fn assert_off(te: &TrackEvent, delay: u32) {
        assert_eq!(te.delay, delay);
        assert!(matches!(te.event, Event::NoteOff));
    }

    #[test]
    fn split() {
        let mut music = Music::default();
        music.pattern_order.push(0);
        for channel in 0..3u8 {
            music.track_info.push(TrackInfo::Midi { channel });
        }

        // A 'normal' track that requires no overflow.
        let track1 = vec![note_on(0, 330000), specific_off(10, 330000)];

        // Three simultaneous phases of polyphony.
        let track2 = vec![
            note_on(0, 440000),
            note_on(0, 550000),
            // note-offs in reverse order, at the same instant
            specific_off(10, 550000),
            specific_off(0, 440000),
            note_on(10, 441000),
            note_on(0, 442000),
            note_on(0, 443000),
            specific_off(10, 442000),
            specific_off(0, 443000),
            specific_off(0, 441000),
        ];

        // Another overflowing track, to prove insertion lands in the right
        // place.
        let track3 = vec![
            note_on(0, 660000),
            note_on(0, 770000),
            specific_off(10, 660000),
            specific_off(0, 770000),
        ];

        music.patterns.push(vec![track1, track2, track3]);
        music.ticks_per_track = 30;

        split_polyphonic_tracks(&mut music).unwrap();

        let pattern = &music.patterns[0];
        assert_eq!(pattern.len(), 6);
        assert_eq!(music.track_info.len(), 6);

        let track = &pattern[0];
        assert_eq!(track.len(), 2);
        assert_note(&track[0], 0, 330000);
        assert_off(&track[1], 10);

        let track = &pattern[1];
        assert_eq!(track.len(), 4);
        assert_note(&track[0], 0, 440000);
        assert_off(&track[1], 10);
        assert_note(&track[2], 10, 441000);
        assert_off(&track[3], 10);

        let track = &pattern[2];
        assert_eq!(track.len(), 4);
        assert_note(&track[0], 0, 550000);
        assert_off(&track[1], 10);
        assert_note(&track[2], 10, 442000);
        assert_off(&track[3], 10);

        let track = &pattern[3];
        assert_eq!(track.len(), 2);
        assert_note(&track[0], 20, 443000);
        assert_off(&track[1], 10);

        let track = &pattern[4];
        assert_eq!(track.len(), 2);
        assert_note(&track[0], 0, 660000);
        assert_off(&track[1], 10);

        let track = &pattern[5];
        assert_eq!(track.len(), 2);
        assert_note(&track[0], 0, 770000);
        assert_off(&track[1], 10);

        let channels: Vec<u8> = music
            .track_info
            .iter()
            .map(|ti| match ti {
                TrackInfo::Midi { channel } => *channel,
                other => panic!("unexpected track info {:?}", other),
            })
            .collect();
        assert_eq!(channels, vec![0, 1, 1, 1, 2, 2]);
    }

    #[test]
    fn channel_pitchbend_becomes_note_pitchbend() {
        let mut music = Music::default();
        music.pattern_order.push(0);
        music.track_info.push(TrackInfo::Midi { channel: 0 });
        music.patterns.push(vec![vec![
            note_on(0, 440000),
            TrackEvent::new(
                0,
                Event::PolyphonicEffect(PolyphonicEffect::PitchbendChannel { bend: 7168 }),
            ),
        ]]);
        music.ticks_per_track = 0;

        split_polyphonic_tracks(&mut music).unwrap();
        let track = &music.patterns[0][0];
        assert_eq!(track.len(), 2);
        match &track[1].event {
            Event::Effect(Effect::PitchbendNote { milli_hertz }) => {
                // 7168 raw is a quarter-semitone down from A4.
                assert!((*milli_hertz as i64 - 433700).abs() < 50, "{}", milli_hertz);
            }
            other => panic!("expected pitchbend, got {:?}", other),
        }
    }

    #[test]
    fn later_notes_pick_up_the_channel_bend() {
        let mut music = Music::default();
        music.pattern_order.push(0);
        music.track_info.push(TrackInfo::Midi { channel: 0 });
        music.patterns.push(vec![vec![
            TrackEvent::new(
                0,
                Event::PolyphonicEffect(PolyphonicEffect::PitchbendChannel { bend: 12288 }),
            ),
            note_on(5, 440000),
        ]]);
        music.ticks_per_track = 5;

        split_polyphonic_tracks(&mut music).unwrap();
        let track = &music.patterns[0][0];
        assert_eq!(track.len(), 1);
        match &track[0].event {
            Event::NoteOn(n) => {
                // A4 bent up a whole semitone.
                assert_eq!(n.milli_hertz, midi_to_freq(70.0));
                assert_eq!(track[0].delay, 5);
            }
            other => panic!("expected note-on, got {:?}", other),
        }
    }
}
