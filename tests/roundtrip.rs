//! Golden-byte tests: for containers with no stored redundancy, reading a
//! file and writing the result back must reproduce the input exactly.

mod utils;

use game_music::format::{
    FormatDroV1, FormatDroV2, FormatGot, FormatImfType0, FormatImfType1, FormatRaw,
};
use game_music::{all_formats, Certainty, MusicFormat, WriteFlags};
use utils::{assert_track_lengths, enable_logging};

fn round_trip(format: &dyn MusicFormat, data: &[u8]) {
    enable_logging();
    assert_eq!(
        format.is_instance(data),
        Certainty::DefinitelyYes,
        "probe failed for {}",
        format.code()
    );
    let music = format.read(data).unwrap();
    assert_track_lengths(&music);
    let mut out = Vec::new();
    format.write(&mut out, &music, WriteFlags::DEFAULT).unwrap();
    assert_eq!(
        out,
        data,
        "byte mismatch after round trip through {}",
        format.code()
    );
}

/// An instrument on OPL channel 1 and a single note, with leading and
/// trailing delays.
const IMF_STANDARD: &[u8] = &[
    0x00, 0x00, 0x00, 0x00, // dummy first event
    0x00, 0x00, 0x20, 0x00, // leading delay
    // set instrument
    0x21, 0xae, 0x00, 0x00, //
    0x41, 0x7f, 0x00, 0x00, //
    0x61, 0xed, 0x00, 0x00, //
    0x81, 0xcb, 0x00, 0x00, //
    0xe1, 0x06, 0x00, 0x00, //
    0x24, 0xa7, 0x00, 0x00, //
    0x44, 0x1f, 0x00, 0x00, //
    0x64, 0x65, 0x00, 0x00, //
    0x84, 0x43, 0x00, 0x00, //
    0xe4, 0x02, 0x00, 0x00, //
    0xc1, 0x04, 0x00, 0x00, //
    // note on/off
    0xa1, 0x44, 0x00, 0x00, //
    0xb1, 0x32, 0x10, 0x00, //
    0xb1, 0x12, 0x30, 0x00, // trailing delay
];

#[test]
fn imf_type0_standard() {
    round_trip(&FormatImfType0, IMF_STANDARD);
}

/// The same song as a type-1 file: a length word up front.
#[test]
fn imf_type1_standard() {
    let mut data = Vec::new();
    data.extend_from_slice(&(IMF_STANDARD.len() as u16).to_le_bytes());
    data.extend_from_slice(IMF_STANDARD);
    round_trip(&FormatImfType1, &data);
}

/// Five notes with the carrier level changed between them; the level changes
/// must survive as per-note patch snapshots.
#[test]
fn imf_type0_volume_changes() {
    let mut data = vec![
        0x00u8, 0x00, 0x00, 0x00, //
        0x21, 0xae, 0x00, 0x00, //
        0x41, 0x7f, 0x00, 0x00, //
        0x61, 0xed, 0x00, 0x00, //
        0x81, 0xcb, 0x00, 0x00, //
        0xe1, 0x06, 0x00, 0x00, //
        0x24, 0xa7, 0x00, 0x00, //
        0x44, 0x1f, 0x00, 0x00, //
        0x64, 0x65, 0x00, 0x00, //
        0x84, 0x43, 0x00, 0x00, //
        0xe4, 0x02, 0x00, 0x00, //
        0xc1, 0x04, 0x00, 0x00, //
        0xa1, 0x44, 0x00, 0x00, //
        0xb1, 0x32, 0x10, 0x00, //
        0xb1, 0x12, 0x10, 0x00, //
    ];
    for level in [0x00u8, 0x0f, 0x1e, 0x01].iter() {
        data.extend_from_slice(&[0x44, *level, 0x00, 0x00]);
        data.extend_from_slice(&[0xb1, 0x32, 0x10, 0x00]);
        data.extend_from_slice(&[0xb1, 0x12, 0x10, 0x00]);
    }
    round_trip(&FormatImfType0, &data);

    // Each distinct carrier level is its own patch snapshot.
    let music = FormatImfType0.read(&data).unwrap();
    assert_eq!(music.patches.len(), 5);
}

const DRO1_STANDARD: &[u8] = &[
    b'D', b'B', b'R', b'A', b'W', b'O', b'P', b'L', // signature
    0x00, 0x00, 0x01, 0x00, // version 0.1
    0x10, 0x00, 0x00, 0x00, // length in milliseconds
    0x1e, 0x00, 0x00, 0x00, // length in bytes
    0x00, 0x00, 0x00, 0x00, // hardware: OPL2
    // body
    0x20, 0xae, 0x40, 0x7f, 0x60, 0xed, 0x80, 0xcb, 0xe0, 0x06, //
    0x23, 0xa7, 0x43, 0x1f, 0x63, 0x65, 0x83, 0x43, 0xe3, 0x02, //
    0xc0, 0x04, //
    0xa0, 0x44, 0xb0, 0x32, // note on
    0x00, 0x0f, // delay 16ms
    0xb0, 0x12, // note off
];

#[test]
fn dro_v1_standard() {
    round_trip(&FormatDroV1, DRO1_STANDARD);
}

const RAW_STANDARD: &[u8] = &[
    b'R', b'A', b'W', b'A', b'D', b'A', b'T', b'A', // signature
    0xa9, 0x04, // clock 1193 (about 1ms per tick)
    // body: (val, reg) pairs
    0xae, 0x20, 0x7f, 0x40, 0xed, 0x60, 0xcb, 0x80, 0x06, 0xe0, //
    0xa7, 0x23, 0x1f, 0x43, 0x65, 0x63, 0x43, 0x83, 0x02, 0xe3, //
    0x04, 0xc0, //
    0x44, 0xa0, 0x32, 0xb0, // note on
    0x10, 0x00, // delay 16 ticks
    0x12, 0xb0, // note off
    0xff, 0xff, // end of song
];

#[test]
fn raw_standard() {
    round_trip(&FormatRaw, RAW_STANDARD);
}

const GOT_STANDARD: &[u8] = &[
    0x01, 0x00, // header
    // (delay, reg, val) records
    0x00, 0x20, 0xae, 0x00, 0x40, 0x7f, 0x00, 0x60, 0xed, //
    0x00, 0x80, 0xcb, 0x00, 0xe0, 0x06, //
    0x00, 0x23, 0xa7, 0x00, 0x43, 0x1f, 0x00, 0x63, 0x65, //
    0x00, 0x83, 0x43, 0x00, 0xe3, 0x02, //
    0x00, 0xc0, 0x04, //
    0x00, 0xa0, 0x44, // frequency low byte
    0x10, 0xb0, 0x32, // note on, then wait
    0x30, 0xb0, 0x12, // note off, then trailing delay
    0x00, 0x00, 0x00, // end of song
    0x00, // pad
];

#[test]
fn got_standard() {
    round_trip(&FormatGot, GOT_STANDARD);
}

/// DROv2's codemap indirection: write a song out and read it back.
#[test]
fn dro_v2_write_read() {
    enable_logging();
    let music = FormatImfType0.read(IMF_STANDARD).unwrap();
    let mut out = Vec::new();
    FormatDroV2.write(&mut out, &music, WriteFlags::DEFAULT).unwrap();
    assert_eq!(FormatDroV2.is_instance(&out), Certainty::DefinitelyYes);

    let back = FormatDroV2.read(&out).unwrap();
    assert_eq!(back.patches, music.patches);
    // Event streams match apart from the tick unit (560Hz vs 1000Hz).
    let events = |m: &game_music::Music| -> Vec<String> {
        m.patterns[0]
            .iter()
            .flat_map(|t| t.iter())
            .map(|te| format!("{:?}", te.event))
            .collect()
    };
    assert_eq!(events(&back), events(&music));
}

/// Each golden file is recognised by its own format and nothing else claims
/// it with certainty.
#[test]
fn autodetect() {
    enable_logging();
    let samples: [(&str, &[u8]); 4] = [
        ("imf-idsoftware-type0", IMF_STANDARD),
        ("dro-dosbox-v1", DRO1_STANDARD),
        ("raw-rdos", RAW_STANDARD),
        ("got", GOT_STANDARD),
    ];
    for (code, data) in samples.iter() {
        let mut matched = Vec::new();
        for format in all_formats() {
            match format.is_instance(data) {
                Certainty::DefinitelyYes | Certainty::PossiblyYes => {
                    matched.push(format.code().to_string())
                }
                _ => {}
            }
        }
        assert!(
            matched.iter().any(|m| m == code),
            "{} did not match its own data: {:?}",
            code,
            matched
        );
    }
}
