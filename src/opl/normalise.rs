/*!
The `normalise` module converts OPL patch banks between the storage
conventions files use for rhythm-mode instruments and the layout the chip
actually needs.

Rhythm voices use one operator each (bass drum uses both), but formats
disagree about *which* operator slot holds the data for a single-operator
voice.  Denormalising rewrites the bank into chip order and tags every patch
with the voice that plays it, duplicating patches that are shared between
different voices; normalising produces a bank back in the storage convention.
!*/

use crate::core::{Event, Music, OplPatch, Patch, Rhythm};
use std::collections::HashMap;

/// How a file stores single-operator rhythm patches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NormaliseStyle {
    /// Both operators hold the active values; nothing needs swapping.
    MatchingOps,
    /// Single-operator patches store their values in the modulator, so
    /// carrier-only voices (snare drum, top cymbal) must be swapped.
    CarFromMod,
    /// Single-operator patches store their values in the carrier, so
    /// modulator-only voices (hi-hat, tom-tom) must be swapped.
    ModFromCar,
}

fn needs_swap(style: NormaliseStyle, rhythm: Rhythm) -> bool {
    match style {
        NormaliseStyle::MatchingOps => false,
        NormaliseStyle::CarFromMod => rhythm.car_only(),
        NormaliseStyle::ModFromCar => rhythm.mod_only(),
    }
}

fn swap_operators(patch: &mut OplPatch) {
    std::mem::swap(&mut patch.m, &mut patch.c);
}

/// Rewrite the patch bank into chip convention, assigning each patch the
/// rhythm voice of the track that plays it.
///
/// A patch used by tracks with different voices is duplicated, the copies
/// tagged with the correct voice and the note-on events re-pointed at them.
/// The first use of a patch (in track order) decides which copy keeps the
/// original index.
pub fn opl_denormalise_perc(music: &mut Music, style: NormaliseStyle) {
    let Music {
        patches,
        patterns,
        track_info,
        ..
    } = music;

    let mut assigned: Vec<Option<Rhythm>> = vec![None; patches.len()];
    let mut duplicates: HashMap<(usize, Rhythm), usize> = HashMap::new();

    for pattern in patterns.iter_mut() {
        for (track_index, track) in pattern.iter_mut().enumerate() {
            let required = track_info[track_index].rhythm();
            for te in track.iter_mut() {
                let note = match &mut te.event {
                    Event::NoteOn(n) => n,
                    _ => continue,
                };
                let p = note.instrument;
                if p >= patches.len() || !matches!(patches[p], Patch::Opl(_)) {
                    continue;
                }
                match assigned[p] {
                    None => {
                        assigned[p] = Some(required);
                        if let Patch::Opl(op) = &mut patches[p] {
                            op.rhythm = required;
                            if needs_swap(style, required) {
                                swap_operators(op);
                            }
                        }
                    }
                    Some(current) if current == required => {}
                    Some(current) => {
                        // Same patch, different voice: duplicate it.
                        let key = (p, required);
                        let index = match duplicates.get(&key) {
                            Some(i) => *i,
                            None => {
                                let mut copy = match &patches[p] {
                                    Patch::Opl(op) => op.clone(),
                                    _ => unreachable!(),
                                };
                                // Undo the swap the first assignment may
                                // have applied, then apply this voice's.
                                if needs_swap(style, current) {
                                    swap_operators(&mut copy);
                                }
                                copy.rhythm = required;
                                if needs_swap(style, required) {
                                    swap_operators(&mut copy);
                                }
                                patches.push(Patch::Opl(copy));
                                assigned.push(Some(required));
                                let i = patches.len() - 1;
                                duplicates.insert(key, i);
                                i
                            }
                        };
                        note.instrument = index;
                    }
                }
            }
        }
    }
}

/// Produce a copy of the patch bank in the given storage convention,
/// leaving the song's own (chip convention) bank untouched.
pub fn opl_normalise_perc(music: &Music, style: NormaliseStyle) -> Vec<Patch> {
    music
        .patches
        .iter()
        .map(|p| match p {
            Patch::Opl(op) => {
                let mut copy = op.clone();
                if needs_swap(style, copy.rhythm) {
                    swap_operators(&mut copy);
                }
                Patch::Opl(copy)
            }
            other => other.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NoteOn, TrackEvent, TrackInfo};

    /// One melodic track plus the five percussion tracks, six patches, and
    /// a few cross-uses: melodic patches played on percussion tracks and
    /// percussion patches played melodically.
    fn default_music() -> Music {
        let mut music = Music::default();
        music.pattern_order.push(0);
        let mut pattern = Vec::new();

        for c in 0..6u8 {
            music.track_info.push(if c < 1 {
                TrackInfo::Opl { channel: c }
            } else {
                TrackInfo::OplPerc {
                    instrument: Rhythm::from_perc_index(c - 1).unwrap(),
                }
            });
            pattern.push(vec![TrackEvent::new(
                1,
                Event::NoteOn(NoteOn {
                    milli_hertz: 440000,
                    instrument: c as usize,
                    velocity: 255,
                }),
            )]);
        }

        let note = |instrument: usize| {
            TrackEvent::new(
                1,
                Event::NoteOn(NoteOn {
                    milli_hertz: 440000,
                    instrument,
                    velocity: 255,
                }),
            )
        };
        // Play perc patches (hihat's and topcym's) on the normal channel.
        pattern[0].push(note(1));
        pattern[0].push(note(2));
        // Play the normal patch on the hihat and topcym tracks.
        pattern[1].push(note(0));
        pattern[2].push(note(0));

        music.patterns.push(pattern);

        for i in 0..6u8 {
            let mut p = OplPatch::default();
            p.c.attack_rate = i * 2 + 1;
            p.m.attack_rate = i * 2 + 2;
            music.patches.push(Patch::Opl(p));
        }
        music
    }

    fn check_bank(patches: &[Patch], expected: &[(u8, u8, Rhythm)]) {
        assert_eq!(patches.len(), expected.len());
        for (i, (car, module, rhythm)) in expected.iter().enumerate() {
            match &patches[i] {
                Patch::Opl(p) => {
                    assert_eq!(p.c.attack_rate, *car, "carrier of patch {}", i);
                    assert_eq!(p.m.attack_rate, *module, "modulator of patch {}", i);
                    assert_eq!(p.rhythm, *rhythm, "rhythm of patch {}", i);
                }
                other => panic!("patch {} is not OPL: {:?}", i, other),
            }
        }
    }

    #[test]
    fn denormalise_matching_ops() {
        let mut music = default_music();
        opl_denormalise_perc(&mut music, NormaliseStyle::MatchingOps);
        check_bank(
            &music.patches,
            &[
                (1, 2, Rhythm::Melodic),
                (3, 4, Rhythm::Melodic),
                (5, 6, Rhythm::Melodic),
                (7, 8, Rhythm::TomTom),
                (9, 10, Rhythm::SnareDrum),
                (11, 12, Rhythm::BassDrum),
                (3, 4, Rhythm::HiHat),      // copied from (1)
                (1, 2, Rhythm::HiHat),      // normal inst played as hihat
                (5, 6, Rhythm::TopCymbal),  // copied from (2)
                (1, 2, Rhythm::TopCymbal),  // normal inst played as topcym
            ],
        );
    }

    #[test]
    fn denormalise_car_from_mod() {
        let mut music = default_music();
        opl_denormalise_perc(&mut music, NormaliseStyle::CarFromMod);
        check_bank(
            &music.patches,
            &[
                (1, 2, Rhythm::Melodic),
                (3, 4, Rhythm::Melodic),
                (5, 6, Rhythm::Melodic),
                (7, 8, Rhythm::TomTom),
                (10, 9, Rhythm::SnareDrum), // swapped
                (11, 12, Rhythm::BassDrum),
                (3, 4, Rhythm::HiHat),
                (1, 2, Rhythm::HiHat),
                (6, 5, Rhythm::TopCymbal), // swapped
                (2, 1, Rhythm::TopCymbal), // swapped
            ],
        );
    }

    #[test]
    fn denormalise_mod_from_car() {
        let mut music = default_music();
        opl_denormalise_perc(&mut music, NormaliseStyle::ModFromCar);
        check_bank(
            &music.patches,
            &[
                (1, 2, Rhythm::Melodic),
                (3, 4, Rhythm::Melodic),
                (5, 6, Rhythm::Melodic),
                (8, 7, Rhythm::TomTom), // swapped
                (9, 10, Rhythm::SnareDrum),
                (11, 12, Rhythm::BassDrum),
                (4, 3, Rhythm::HiHat), // swapped
                (2, 1, Rhythm::HiHat), // swapped
                (5, 6, Rhythm::TopCymbal),
                (1, 2, Rhythm::TopCymbal),
            ],
        );
    }

    #[test]
    fn normalise_undoes_the_swaps() {
        for style in [
            NormaliseStyle::MatchingOps,
            NormaliseStyle::CarFromMod,
            NormaliseStyle::ModFromCar,
        ]
        .iter()
        {
            let mut music = default_music();
            opl_denormalise_perc(&mut music, *style);
            let bank = opl_normalise_perc(&music, *style);
            // Every patch in the normalised bank carries the original,
            // unswapped operator data.
            let unswapped = [
                (1, 2),
                (3, 4),
                (5, 6),
                (7, 8),
                (9, 10),
                (11, 12),
                (3, 4),
                (1, 2),
                (5, 6),
                (1, 2),
            ];
            assert_eq!(bank.len(), unswapped.len());
            for (i, (car, module)) in unswapped.iter().enumerate() {
                match &bank[i] {
                    Patch::Opl(p) => {
                        assert_eq!(p.c.attack_rate, *car, "style {:?} patch {}", style, i);
                        assert_eq!(p.m.attack_rate, *module, "style {:?} patch {}", style, i);
                    }
                    other => panic!("patch {} is not OPL: {:?}", i, other),
                }
            }
        }
    }

    #[test]
    fn events_point_at_the_duplicates() {
        let mut music = default_music();
        opl_denormalise_perc(&mut music, NormaliseStyle::MatchingOps);
        let pattern = &music.patterns[0];
        // hihat track: own patch then the re-pointed copies.
        let instruments: Vec<usize> = pattern[1]
            .iter()
            .map(|te| match &te.event {
                Event::NoteOn(n) => n.instrument,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(instruments, vec![6, 7]);
        // melodic track keeps patch 0 and gets the Melodic re-tags of 1, 2.
        let instruments: Vec<usize> = pattern[0]
            .iter()
            .map(|te| match &te.event {
                Event::NoteOn(n) => n.instrument,
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(instruments, vec![0, 1, 2]);
    }
}
