#![allow(dead_code)]

use game_music::Music;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static LOGGER: Once = Once::new();

pub fn enable_logging() {
    LOGGER.call_once(logger_init)
}

fn logger_init() {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} {} [{}] - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Warn)
        .init();
}

/// Every track of every pattern must cover exactly `ticks_per_track` ticks.
pub fn assert_track_lengths(music: &Music) {
    for (p, pattern) in music.patterns.iter().enumerate() {
        for (t, track) in pattern.iter().enumerate() {
            let total: u64 = track.iter().map(|te| u64::from(te.delay)).sum();
            assert!(
                total <= u64::from(music.ticks_per_track),
                "pattern {} track {} is {} ticks long but the song claims {}",
                p,
                t,
                total,
                music.ticks_per_track
            );
        }
    }
}
