//! Cross-format conversions: a song decoded from one container should carry
//! its musical content into any other container that can hold it.

mod utils;

use game_music::format::{
    FormatCmf, FormatDroV1, FormatGot, FormatImfType0, FormatMidType0, FormatRaw,
};
use game_music::{Event, Music, MusicFormat, Patch, Rhythm, WriteFlags};
use utils::{assert_track_lengths, enable_logging};

fn count_notes(music: &Music) -> usize {
    music
        .patterns
        .iter()
        .flat_map(|p| p.iter())
        .flat_map(|t| t.iter())
        .filter(|te| matches!(te.event, Event::NoteOn(_)))
        .count()
}

/// One note on OPL channel 1, as IMF bytes.
fn imf_song() -> Vec<u8> {
    vec![
        0x00, 0x00, 0x00, 0x00, //
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
        0xb1, 0x12, 0x00, 0x00, //
    ]
}

#[test]
fn imf_to_other_opl_formats() {
    enable_logging();
    let music = FormatImfType0.read(&imf_song()).unwrap();
    assert_track_lengths(&music);
    assert_eq!(count_notes(&music), 1);

    let targets: Vec<Box<dyn MusicFormat>> = vec![
        Box::new(FormatDroV1),
        Box::new(FormatRaw),
        Box::new(FormatGot),
    ];
    for target in targets {
        let mut out = Vec::new();
        target
            .write(&mut out, &music, WriteFlags::DEFAULT)
            .unwrap_or_else(|e| panic!("{} write failed: {}", target.code(), e));
        let back = target
            .read(&out)
            .unwrap_or_else(|e| panic!("{} read failed: {}", target.code(), e));
        assert_eq!(
            count_notes(&back),
            1,
            "note lost converting to {}",
            target.code()
        );
        assert_eq!(back.patches, music.patches, "patch lost in {}", target.code());
    }
}

/// A MIDI song survives the trip into a type-0 file and back.
#[test]
fn midi_write_read() {
    enable_logging();
    let source = {
        let mut data = Vec::new();
        data.extend_from_slice(b"MThd\x00\x00\x00\x06\x00\x00\x00\x01\x00\xc0");
        let body: &[u8] =
            b"\x00\xc0\x16\x00\x90\x45\x60\x40\x3c\x60\x20\x45\x00\x00\x3c\x00\x00\xff\x2f\x00";
        data.extend_from_slice(b"MTrk");
        data.extend_from_slice(&(body.len() as u32).to_be_bytes());
        data.extend_from_slice(body);
        data
    };
    let music = FormatMidType0.read(&source).unwrap();
    assert_track_lengths(&music);
    // Two overlapping notes were split onto two tracks.
    assert_eq!(music.patterns[0].len(), 2);
    assert_eq!(count_notes(&music), 2);

    let mut out = Vec::new();
    FormatMidType0
        .write(&mut out, &music, WriteFlags::DEFAULT)
        .unwrap();
    let back = FormatMidType0.read(&out).unwrap();
    assert_eq!(count_notes(&back), 2);
    assert_eq!(back.ticks_per_track, music.ticks_per_track);
}

/// A CMF using both a melodic channel and a rhythm channel ends up with the
/// patch bank split per voice.
#[test]
fn cmf_rhythm_patches() {
    enable_logging();
    let mut data = Vec::new();
    data.extend_from_slice(b"CTMF\x01\x01");
    data.extend_from_slice(&40u16.to_le_bytes()); // instruments at 40
    data.extend_from_slice(&56u16.to_le_bytes()); // music at 56
    data.extend_from_slice(&192u16.to_le_bytes());
    data.extend_from_slice(&96u16.to_le_bytes());
    data.extend_from_slice(&[0; 6]); // no metadata
    data.extend_from_slice(&[0; 16]);
    data.extend_from_slice(&1u16.to_le_bytes()); // one instrument
    data.extend_from_slice(&120u16.to_le_bytes());
    data.extend_from_slice(&[
        0x01, 0x11, 0x4F, 0x00, 0xF1, 0xD2, 0x53, 0x74, 0x00, 0x00, 0x06, 0, 0, 0, 0, 0,
    ]);
    assert_eq!(data.len(), 56);
    // Program 0 on channel 0 (melodic) and channel 15 (hi-hat), one note
    // each.
    data.extend_from_slice(b"\x00\xc0\x00"); // program change ch0
    data.extend_from_slice(b"\x00\xcf\x00"); // program change ch15
    data.extend_from_slice(b"\x00\x90\x45\x7f"); // note on ch0
    data.extend_from_slice(b"\x00\x9f\x30\x7f"); // note on ch15
    data.extend_from_slice(b"\x60\x90\x45\x00"); // note off ch0
    data.extend_from_slice(b"\x00\x9f\x30\x00"); // note off ch15
    data.extend_from_slice(b"\x00\xff\x2f\x00");

    let music = FormatCmf.read(&data).unwrap();
    // The shared program was split into a melodic and a hi-hat patch with
    // identical operator settings.
    assert_eq!(music.patches.len(), 2);
    let rhythms: Vec<Rhythm> = music
        .patches
        .iter()
        .map(|p| match p {
            Patch::Opl(op) => op.rhythm,
            other => panic!("unexpected patch {:?}", other),
        })
        .collect();
    assert!(rhythms.contains(&Rhythm::Melodic));
    assert!(rhythms.contains(&Rhythm::HiHat));
    match (&music.patches[0], &music.patches[1]) {
        (Patch::Opl(a), Patch::Opl(b)) => assert!(a.same_sound(b)),
        _ => unreachable!(),
    }
    assert_eq!(count_notes(&music), 2);
}
