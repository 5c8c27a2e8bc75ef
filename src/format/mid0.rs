/*!
The `mid0` module supports type-0 Standard MIDI Files: a single MTrk chunk
holding every channel.
!*/

use crate::core::{EventOrder, Music, Tempo};
use crate::error::Result;
use crate::format::{Caps, Certainty, MusicFormat, WriteFlags};
use crate::midi::{
    midi_decode, midi_encode, MidiFlags, MIDI_DEF_TICKS_PER_QUARTER_NOTE,
    MIDI_DEF_US_PER_QUARTER_NOTE,
};

fn read_u16_be(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn read_u32_be(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

pub struct FormatMidType0;

impl MusicFormat for FormatMidType0 {
    fn code(&self) -> &'static str {
        "mid-type0"
    }

    fn name(&self) -> &'static str {
        "Standard MIDI File (type-0/single track)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["mdi", "mid"]
    }

    fn caps(&self) -> Caps {
        Caps::INST_MIDI | Caps::HAS_EVENTS
    }

    fn is_instance(&self, data: &[u8]) -> Certainty {
        if data.len() < 10 {
            return Certainty::DefinitelyNo;
        }
        if !data.starts_with(b"MThd") {
            return Certainty::DefinitelyNo;
        }
        if read_u16_be(data, 8) != 0 {
            return Certainty::DefinitelyNo;
        }
        Certainty::DefinitelyYes
    }

    fn read(&self, data: &[u8]) -> Result<Music> {
        if data.len() < 14 {
            invalid_file!("MThd header truncated");
        }
        if !data.starts_with(b"MThd") {
            invalid_file!("missing MThd signature");
        }
        let header_len = read_u32_be(data, 4) as usize;
        if header_len < 6 || data.len() < 8 + header_len {
            invalid_file!("bad MThd length {}", header_len);
        }
        let division = read_u16_be(data, 12);
        if division & 0x8000 != 0 {
            invalid_file!("SMPTE time division is not supported");
        }

        // The MTrk header; assume it's fine and use its length to clip the
        // event data.
        let track_offset = 8 + header_len;
        if data.len() < track_offset + 8 {
            invalid_file!("MTrk header truncated");
        }
        let track_len = read_u32_be(data, track_offset + 4) as usize;
        let start = track_offset + 8;
        let end = (start + track_len).min(data.len());

        let mut initial_tempo = Tempo::default();
        initial_tempo.set_ticks_per_quarter_note(if division == 0 {
            MIDI_DEF_TICKS_PER_QUARTER_NOTE
        } else {
            u32::from(division)
        });
        initial_tempo.set_us_per_quarter_note(MIDI_DEF_US_PER_QUARTER_NOTE);

        midi_decode(&data[start..end], MidiFlags::DEFAULT, initial_tempo)
    }

    fn write(&self, out: &mut Vec<u8>, music: &Music, flags: WriteFlags) -> Result<()> {
        out.extend_from_slice(b"MThd\x00\x00\x00\x06");
        out.extend_from_slice(&0u16.to_be_bytes()); // type-0
        out.extend_from_slice(&1u16.to_be_bytes()); // one track
        let division = music.initial_tempo.ticks_per_quarter_note();
        if division > 0x7FFF {
            format_limitation!("tick resolution {} does not fit in an SMF header", division);
        }
        out.extend_from_slice(&(division as u16).to_be_bytes());

        out.extend_from_slice(b"MTrk\x00\x00\x00\x00");
        let body_start = out.len();

        let mut midi_flags = MidiFlags::EMBED_TEMPO;
        if flags.contains(WriteFlags::INTEGER_NOTES_ONLY) {
            midi_flags = midi_flags | MidiFlags::INTEGER_NOTES_ONLY;
        }
        midi_encode(
            &mut *out,
            music,
            midi_flags,
            None,
            EventOrder::OrderRowTrack,
            None,
        )?;

        let track_len = (out.len() - body_start) as u32;
        out[body_start - 4..body_start].copy_from_slice(&track_len.to_be_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Event;

    fn small_mid() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"MThd\x00\x00\x00\x06\x00\x00\x00\x01\x00\xc0");
        let body: &[u8] = b"\x00\x90\x45\x7f\x60\x45\x00\x00\xff\x2f\x00";
        data.extend_from_slice(b"MTrk");
        data.extend_from_slice(&(body.len() as u32).to_be_bytes());
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn probe() {
        assert_eq!(
            FormatMidType0.is_instance(&small_mid()),
            Certainty::DefinitelyYes
        );
        // A type-1 file is not ours.
        let mut type1 = small_mid();
        type1[9] = 1;
        assert_eq!(FormatMidType0.is_instance(&type1), Certainty::DefinitelyNo);
    }

    #[test]
    fn read_small_file() {
        let music = FormatMidType0.read(&small_mid()).unwrap();
        assert_eq!(music.initial_tempo.ticks_per_quarter_note(), 192);
        assert_eq!(music.ticks_per_track, 0x60);
        let track = &music.patterns[0][0];
        assert!(matches!(track[0].event, Event::NoteOn(_)));
        assert!(matches!(track[1].event, Event::NoteOff));
        assert_eq!(track[1].delay, 0x60);
    }

    #[test]
    fn write_read_round_trip() {
        let music = FormatMidType0.read(&small_mid()).unwrap();
        let mut out = Vec::new();
        FormatMidType0
            .write(&mut out, &music, WriteFlags::DEFAULT)
            .unwrap();
        assert_eq!(&out[0..4], b"MThd");
        let back = FormatMidType0.read(&out).unwrap();
        assert_eq!(back.ticks_per_track, music.ticks_per_track);
        assert_eq!(back.patterns, music.patterns);
    }
}
