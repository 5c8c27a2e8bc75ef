/*!
The `tempo` module provides the single time base used by every format in the
library.  One `Tempo` value is simultaneously expressible as microseconds per
tick, beats per minute, Hertz, and a tracker-style speed/tempo pair, so each
container can store whichever unit it prefers without losing the others.
!*/

/// The tempo of a song, anchored on the length of one tick in microseconds.
///
/// The remaining fields describe how ticks group into beats and bars.  They
/// are not needed to play a song back, but formats which store musical time
/// (MIDI's ticks-per-quarter-note, a tracker's rows-per-beat) need them to
/// round-trip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tempo {
    /// Length of one tick in microseconds.
    pub us_per_tick: f64,

    /// Number of effect frames in one tick.  Carries the tracker "speed"
    /// value so that `module()` round-trips.
    pub frames_per_tick: u32,

    /// Number of ticks in one beat.
    pub ticks_per_beat: u32,

    /// Number of beats in one bar.
    pub beats_per_bar: u32,

    /// Note length of one beat.  4 means a quarter-note beat.
    pub beat_length: u32,
}

impl Default for Tempo {
    fn default() -> Self {
        Tempo {
            us_per_tick: 250_000.0,
            frames_per_tick: 6,
            ticks_per_beat: 2,
            beats_per_bar: 4,
            beat_length: 4,
        }
    }
}

impl Tempo {
    /// Set the tempo as ticks per second.
    pub fn set_hertz(&mut self, hz: u32) {
        debug_assert!(hz != 0);
        self.us_per_tick = 1_000_000.0 / f64::from(hz);
    }

    /// The tempo as ticks per second, rounded to the nearest whole number.
    pub fn hertz(&self) -> u32 {
        (1_000_000.0 / self.us_per_tick).round() as u32
    }

    /// Set the tempo as milliseconds per tick.
    pub fn set_ms_per_tick(&mut self, ms: u32) {
        debug_assert!(ms != 0);
        self.us_per_tick = f64::from(ms) * 1000.0;
    }

    /// The tempo as milliseconds per tick, rounded.
    pub fn ms_per_tick(&self) -> u32 {
        (self.us_per_tick / 1000.0).round() as u32
    }

    /// Set the tempo as beats per minute, using the current `ticks_per_beat`.
    pub fn set_bpm(&mut self, bpm: u32) {
        debug_assert!(bpm != 0);
        debug_assert!(self.ticks_per_beat != 0);
        self.us_per_tick = 60_000_000.0 / f64::from(bpm * self.ticks_per_beat);
    }

    /// The tempo as beats per minute, rounded.
    pub fn bpm(&self) -> u32 {
        (60_000_000.0 / (f64::from(self.ticks_per_beat) * self.us_per_tick)).round() as u32
    }

    /// Set the tempo as a tracker speed/tempo pair.  The speed is remembered
    /// in `frames_per_tick` so the pair can be recovered exactly.
    pub fn set_module(&mut self, speed: u32, tempo: u32) {
        debug_assert!(speed != 0);
        debug_assert!(tempo != 0);
        self.frames_per_tick = speed;
        self.us_per_tick = 1_000_000.0 * f64::from(speed) / f64::from(tempo);
    }

    /// The tracker "speed" value last set with [`Tempo::set_module`].
    pub fn module_speed(&self) -> u32 {
        self.frames_per_tick
    }

    /// The tracker "tempo" value, derived from the current speed.
    pub fn module_tempo(&self) -> u32 {
        (1_000_000.0 * f64::from(self.frames_per_tick) / self.us_per_tick).round() as u32
    }

    /// Set the number of ticks in a quarter note, e.g. from an SMF header.
    pub fn set_ticks_per_quarter_note(&mut self, ticks: u32) {
        debug_assert!(ticks != 0);
        self.beat_length = 4;
        self.ticks_per_beat = ticks;
    }

    /// The number of ticks in a quarter note.
    pub fn ticks_per_quarter_note(&self) -> u32 {
        self.ticks_per_beat * self.beat_length / 4
    }

    /// Set the length of a quarter note in microseconds, e.g. from an SMF
    /// `FF 51` meta event.
    pub fn set_us_per_quarter_note(&mut self, us: u32) {
        debug_assert!(us != 0);
        self.us_per_tick = f64::from(us) / f64::from(self.ticks_per_quarter_note());
    }

    /// The length of a quarter note in microseconds, rounded.
    pub fn us_per_quarter_note(&self) -> u32 {
        (self.us_per_tick * f64::from(self.ticks_per_quarter_note())).round() as u32
    }
}
