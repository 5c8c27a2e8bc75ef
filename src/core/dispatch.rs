/*!
The `dispatch` module walks a song's events in one of four orders and feeds
them to a typed handler.  The encoders are all built on top of this: they
implement [`EventHandler`] and let [`handle_all_events`] drive them.
!*/

use crate::core::{
    Configuration, Effect, Event, Goto, Music, NoteOn, Pattern, PolyphonicEffect, Tempo,
};
use crate::error::Result;

/// The order in which [`handle_all_events`] visits a song's events.
///
/// `Row` orders merge all tracks of a pattern into one chronological stream;
/// `Track` orders deliver each track separately, with an end-of-track
/// callback between them.  `Pattern` orders visit each stored pattern once;
/// `Order` orders follow `pattern_order`, so a repeated pattern is visited
/// repeatedly.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventOrder {
    PatternRowTrack,
    PatternTrackRow,
    OrderRowTrack,
    OrderTrackRow,
}

/// Receives a song's events, one typed callback per event kind.  Every
/// method gets the delay in ticks since the previous delivered event, plus
/// the track and pattern the event came from.
///
/// All methods default to doing nothing so implementations only write the
/// callbacks they care about.
#[allow(unused_variables)]
pub trait EventHandler {
    fn tempo(&mut self, delay: u32, track: usize, pattern: usize, tempo: &Tempo) -> Result<()> {
        Ok(())
    }

    fn note_on(&mut self, delay: u32, track: usize, pattern: usize, note: &NoteOn) -> Result<()> {
        Ok(())
    }

    fn note_off(&mut self, delay: u32, track: usize, pattern: usize) -> Result<()> {
        Ok(())
    }

    fn specific_note_off(
        &mut self,
        delay: u32,
        track: usize,
        pattern: usize,
        milli_hertz: u32,
    ) -> Result<()> {
        Ok(())
    }

    fn specific_note_effect(
        &mut self,
        delay: u32,
        track: usize,
        pattern: usize,
        milli_hertz: u32,
        effect: &Effect,
    ) -> Result<()> {
        Ok(())
    }

    fn effect(&mut self, delay: u32, track: usize, pattern: usize, effect: &Effect) -> Result<()> {
        Ok(())
    }

    fn polyphonic_effect(
        &mut self,
        delay: u32,
        track: usize,
        pattern: usize,
        effect: &PolyphonicEffect,
    ) -> Result<()> {
        Ok(())
    }

    fn goto_jump(&mut self, delay: u32, track: usize, pattern: usize, goto: &Goto) -> Result<()> {
        Ok(())
    }

    fn configuration(
        &mut self,
        delay: u32,
        track: usize,
        pattern: usize,
        config: &Configuration,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after each track in the `TrackRow` orders, with the silence
    /// remaining between the track's last event and the end of the pattern.
    fn end_of_track(&mut self, remaining_delay: u32) -> Result<()> {
        Ok(())
    }

    /// Called after each pattern, with the silence remaining after the last
    /// delivered event.
    fn end_of_pattern(&mut self, remaining_delay: u32) -> Result<()> {
        Ok(())
    }
}

fn dispatch(
    handler: &mut dyn EventHandler,
    delay: u32,
    track: usize,
    pattern: usize,
    event: &Event,
) -> Result<()> {
    match event {
        Event::Tempo(t) => handler.tempo(delay, track, pattern, t),
        Event::NoteOn(n) => handler.note_on(delay, track, pattern, n),
        Event::NoteOff => handler.note_off(delay, track, pattern),
        Event::SpecificNoteOff { milli_hertz } => {
            handler.specific_note_off(delay, track, pattern, *milli_hertz)
        }
        Event::SpecificNoteEffect {
            milli_hertz,
            effect,
        } => handler.specific_note_effect(delay, track, pattern, *milli_hertz, effect),
        Event::Effect(e) => handler.effect(delay, track, pattern, e),
        Event::PolyphonicEffect(e) => handler.polyphonic_effect(delay, track, pattern, e),
        Event::Goto(g) => handler.goto_jump(delay, track, pattern, g),
        Event::Configuration(c) => handler.configuration(delay, track, pattern, c),
    }
}

/// Merge the pattern's tracks into one chronological stream and deliver it.
/// Note-offs sort ahead of anything else happening on the same tick so a
/// reused channel is released before it is re-keyed.
fn process_pattern_merged(
    handler: &mut dyn EventHandler,
    music: &Music,
    pattern: &Pattern,
    pattern_index: usize,
) -> Result<()> {
    struct Merged<'a> {
        abs_time: u64,
        track_index: usize,
        event: &'a Event,
    }

    let mut merged = Vec::new();
    for (track_index, track) in pattern.iter().enumerate() {
        let mut track_time = 0u64;
        for te in track {
            track_time += u64::from(te.delay);
            merged.push(Merged {
                abs_time: track_time,
                track_index,
                event: &te.event,
            });
        }
    }
    // Stable, so events at the same instant keep their track order apart
    // from the note-off promotion.
    merged.sort_by_key(|m| (m.abs_time, !m.event.is_note_off()));

    let mut current_time = 0u64;
    for m in &merged {
        let delta = (m.abs_time - current_time) as u32;
        current_time = m.abs_time;
        dispatch(handler, delta, m.track_index, pattern_index, m.event)?;
    }
    debug_assert!(current_time <= u64::from(music.ticks_per_track));
    handler.end_of_pattern(u64::from(music.ticks_per_track).saturating_sub(current_time) as u32)
}

/// Deliver each track of the pattern in turn, with its original delays.
fn process_pattern_separate(
    handler: &mut dyn EventHandler,
    music: &Music,
    pattern: &Pattern,
    pattern_index: usize,
) -> Result<()> {
    let mut max_track_time = 0u64;
    for (track_index, track) in pattern.iter().enumerate() {
        let mut track_time = 0u64;
        for te in track {
            track_time += u64::from(te.delay);
            dispatch(handler, te.delay, track_index, pattern_index, &te.event)?;
        }
        if track_time > max_track_time {
            max_track_time = track_time;
        }
        handler.end_of_track(u64::from(music.ticks_per_track).saturating_sub(track_time) as u32)?;
    }
    handler.end_of_pattern(u64::from(music.ticks_per_track).saturating_sub(max_track_time) as u32)
}

/// Walk all of the song's events in the given order, delivering them to the
/// handler with inter-event delays.
pub fn handle_all_events(
    handler: &mut dyn EventHandler,
    music: &Music,
    order: EventOrder,
) -> Result<()> {
    match order {
        EventOrder::PatternRowTrack => {
            for (pattern_index, pattern) in music.patterns.iter().enumerate() {
                process_pattern_merged(handler, music, pattern, pattern_index)?;
            }
        }
        EventOrder::PatternTrackRow => {
            for (pattern_index, pattern) in music.patterns.iter().enumerate() {
                process_pattern_separate(handler, music, pattern, pattern_index)?;
            }
        }
        EventOrder::OrderRowTrack => {
            for pattern_index in &music.pattern_order {
                let pattern = &music.patterns[*pattern_index];
                process_pattern_merged(handler, music, pattern, *pattern_index)?;
            }
        }
        EventOrder::OrderTrackRow => {
            for pattern_index in &music.pattern_order {
                let pattern = &music.patterns[*pattern_index];
                process_pattern_separate(handler, music, pattern, *pattern_index)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TrackEvent, TrackInfo};

    #[derive(Default)]
    struct Collector {
        seen: Vec<(u32, usize, String)>,
        ends: Vec<u32>,
    }

    impl EventHandler for Collector {
        fn note_on(
            &mut self,
            delay: u32,
            track: usize,
            _pattern: usize,
            note: &NoteOn,
        ) -> Result<()> {
            self.seen
                .push((delay, track, format!("on {}", note.milli_hertz)));
            Ok(())
        }

        fn note_off(&mut self, delay: u32, track: usize, _pattern: usize) -> Result<()> {
            self.seen.push((delay, track, String::from("off")));
            Ok(())
        }

        fn end_of_pattern(&mut self, remaining_delay: u32) -> Result<()> {
            self.ends.push(remaining_delay);
            Ok(())
        }
    }

    fn note_on(milli_hertz: u32) -> Event {
        Event::NoteOn(NoteOn {
            milli_hertz,
            instrument: 0,
            velocity: 255,
        })
    }

    fn two_track_music() -> Music {
        let mut music = Music::default();
        music.track_info = vec![TrackInfo::Midi { channel: 0 }, TrackInfo::Midi { channel: 1 }];
        music.patterns.push(vec![
            vec![
                TrackEvent::new(0, note_on(100)),
                TrackEvent::new(10, Event::NoteOff),
            ],
            vec![
                TrackEvent::new(10, note_on(200)),
                TrackEvent::new(5, Event::NoteOff),
            ],
        ]);
        music.pattern_order.push(0);
        music.ticks_per_track = 20;
        music
    }

    #[test]
    fn merged_order_puts_note_offs_first() {
        let music = two_track_music();
        let mut collector = Collector::default();
        handle_all_events(&mut collector, &music, EventOrder::OrderRowTrack).unwrap();
        // At tick 10 the note-off on track 0 must precede the note-on on
        // track 1, even though track 0 comes first anyway; the delta chain
        // proves the merge.
        let descriptions: Vec<&str> = collector.seen.iter().map(|e| e.2.as_str()).collect();
        assert_eq!(descriptions, vec!["on 100", "off", "on 200", "off"]);
        assert_eq!(collector.seen[1].0, 10);
        assert_eq!(collector.seen[2].0, 0);
        assert_eq!(collector.seen[3].0, 5);
        assert_eq!(collector.ends, vec![5]);
    }

    #[test]
    fn tie_break_prefers_note_off() {
        let mut music = Music::default();
        music.track_info = vec![TrackInfo::Midi { channel: 0 }, TrackInfo::Midi { channel: 1 }];
        // Track 0 keys a note at tick 10; track 1 releases one at tick 10.
        music.patterns.push(vec![
            vec![TrackEvent::new(10, note_on(100))],
            vec![
                TrackEvent::new(0, note_on(200)),
                TrackEvent::new(10, Event::NoteOff),
            ],
        ]);
        music.pattern_order.push(0);
        music.ticks_per_track = 10;
        let mut collector = Collector::default();
        handle_all_events(&mut collector, &music, EventOrder::PatternRowTrack).unwrap();
        let descriptions: Vec<&str> = collector.seen.iter().map(|e| e.2.as_str()).collect();
        assert_eq!(descriptions, vec!["on 200", "off", "on 100"]);
    }

    #[test]
    fn separate_order_reports_track_ends() {
        #[derive(Default)]
        struct TrackEnds {
            ends: Vec<u32>,
        }
        impl EventHandler for TrackEnds {
            fn end_of_track(&mut self, remaining_delay: u32) -> Result<()> {
                self.ends.push(remaining_delay);
                Ok(())
            }
        }
        let music = two_track_music();
        let mut handler = TrackEnds::default();
        handle_all_events(&mut handler, &music, EventOrder::OrderTrackRow).unwrap();
        assert_eq!(handler.ends, vec![10, 5]);
    }
}
