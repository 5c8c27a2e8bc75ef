/*!
The `cmf` module supports the Creative Labs Music File: a MIDI event stream
with CMF controller extensions, an embedded SBI instrument block, and the
last five channels mapped onto the OPL rhythm voices.
!*/

use crate::core::{
    Configuration, Event, Music, Patch, Rhythm, Tempo, TrackEvent, TrackInfo, ATTR_AUTHOR,
    ATTR_COMMENT, ATTR_TITLE,
};
use crate::error::Result;
use crate::format::sbi_patch::{read_sbi_instrument, write_sbi_instrument, SBI_INST_LEN};
use crate::format::{Caps, Certainty, MusicFormat, WriteFlags};
use crate::byte_iter::ByteIter;
use crate::core::EventOrder;
use crate::midi::{midi_decode, midi_encode, MidiFlags};
use crate::opl::util::{lin_velocity_to_log_volume, log_volume_to_lin_velocity};
use crate::opl::{opl_denormalise_perc, opl_normalise_perc, NormaliseStyle};
use log::warn;
use snafu::ResultExt;
use std::io::{Read, Write};

/// Number of preset instruments (reused modulo 16 above the custom bank).
const CMF_NUM_DEFAULT_INSTRUMENTS: usize = 16;

/// Maximum number of bytes in each title/composer/remarks field.
const CMF_ATTR_MAXLEN: usize = 32767;

/// The factory instrument set shipped with SBFMDRV, as 16-byte SBI records.
const CMF_DEFAULT_PATCHES: [[u8; 16]; CMF_NUM_DEFAULT_INSTRUMENTS] = [
    [0x01, 0x11, 0x4F, 0x00, 0xF1, 0xD2, 0x53, 0x74, 0x00, 0x00, 0x06, 0, 0, 0, 0, 0],
    [0x07, 0x12, 0x4F, 0x00, 0xF2, 0xF2, 0x60, 0x72, 0x00, 0x00, 0x08, 0, 0, 0, 0, 0],
    [0x31, 0xA1, 0x1C, 0x80, 0x51, 0x54, 0x03, 0x67, 0x00, 0x00, 0x0E, 0, 0, 0, 0, 0],
    [0x31, 0xA1, 0x1C, 0x80, 0x41, 0x92, 0x0B, 0x3B, 0x00, 0x00, 0x0E, 0, 0, 0, 0, 0],
    [0x31, 0x16, 0x87, 0x80, 0xA1, 0x7D, 0x11, 0x43, 0x00, 0x00, 0x08, 0, 0, 0, 0, 0],
    [0x30, 0xB1, 0xC8, 0x80, 0xD5, 0x61, 0x19, 0x1B, 0x00, 0x00, 0x0C, 0, 0, 0, 0, 0],
    [0xF1, 0x21, 0x01, 0x00, 0x97, 0xF1, 0x17, 0x18, 0x00, 0x00, 0x08, 0, 0, 0, 0, 0],
    [0x32, 0x16, 0x87, 0x80, 0xA1, 0x7D, 0x10, 0x33, 0x00, 0x00, 0x08, 0, 0, 0, 0, 0],
    [0x01, 0x12, 0x4F, 0x00, 0x71, 0x52, 0x53, 0x7C, 0x00, 0x00, 0x0A, 0, 0, 0, 0, 0],
    [0x02, 0x03, 0x8D, 0x00, 0xD7, 0xF5, 0x37, 0x18, 0x00, 0x00, 0x04, 0, 0, 0, 0, 0],
    [0x21, 0x21, 0xD1, 0x00, 0xA3, 0xA4, 0x46, 0x25, 0x00, 0x00, 0x0A, 0, 0, 0, 0, 0],
    [0x22, 0x22, 0x0F, 0x00, 0xF6, 0xF6, 0x95, 0x36, 0x00, 0x00, 0x0A, 0, 0, 0, 0, 0],
    [0xE1, 0xE1, 0x00, 0x00, 0x44, 0x54, 0x24, 0x34, 0x02, 0x02, 0x07, 0, 0, 0, 0, 0],
    [0xA5, 0xB1, 0xD2, 0x80, 0x81, 0xF1, 0x03, 0x05, 0x00, 0x00, 0x02, 0, 0, 0, 0, 0],
    [0x71, 0x22, 0xC5, 0x00, 0x6E, 0x8B, 0x17, 0x0E, 0x00, 0x00, 0x02, 0, 0, 0, 0, 0],
    [0x32, 0x21, 0x16, 0x80, 0x73, 0x75, 0x24, 0x57, 0x00, 0x00, 0x0E, 0, 0, 0, 0, 0],
];

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Read a null-terminated string at `offset`; zero means the field is
/// absent.
fn read_cstring(data: &[u8], offset: usize) -> String {
    if offset == 0 {
        return String::new();
    }
    let start = offset.min(data.len());
    let mut end = start;
    while end < data.len() && end - start < CMF_ATTR_MAXLEN && data[end] != 0 {
        end += 1;
    }
    String::from_utf8_lossy(&data[start..end]).into_owned()
}

pub struct FormatCmf;

impl MusicFormat for FormatCmf {
    fn code(&self) -> &'static str {
        "cmf-creativelabs"
    }

    fn name(&self) -> &'static str {
        "Creative Labs Music File"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["cmf"]
    }

    fn caps(&self) -> Caps {
        Caps::INST_OPL | Caps::INST_OPL_RHYTHM | Caps::HAS_EVENTS
    }

    fn is_instance(&self, data: &[u8]) -> Certainty {
        if data.len() < 20 {
            return Certainty::DefinitelyNo;
        }
        if !data.starts_with(b"CTMF") {
            return Certainty::DefinitelyNo;
        }
        let ver = read_u16(data, 4);
        if ver != 0x100 && ver != 0x101 {
            return Certainty::DefinitelyNo;
        }
        Certainty::DefinitelyYes
    }

    fn read(&self, data: &[u8]) -> Result<Music> {
        if data.len() < 36 {
            invalid_file!("CMF header truncated");
        }
        let ver = read_u16(data, 4);
        let off_inst = read_u16(data, 6) as usize;
        let off_music = read_u16(data, 8) as usize;
        let ticks_per_quarter = read_u16(data, 10);
        let ticks_per_second = read_u16(data, 12);
        let mut off_title = read_u16(data, 14) as usize;
        let mut off_composer = read_u16(data, 16) as usize;
        let mut off_remarks = read_u16(data, 18) as usize;

        // Some games ship CMF files with garbage metadata offsets.
        if off_title > data.len() {
            warn!("CMF 'title' field starts past EOF, ignoring");
            off_title = 0;
        }
        if off_composer > data.len() {
            warn!("CMF 'composer' field starts past EOF, ignoring");
            off_composer = 0;
        }
        if off_remarks > data.len() {
            warn!("CMF 'remarks' field starts past EOF, ignoring");
            off_remarks = 0;
        }

        // Bytes 20-35 are the channel-in-use table, which we don't need.
        let num_instruments = match ver {
            0x100 => {
                if data.len() < 37 {
                    invalid_file!("CMF header truncated");
                }
                usize::from(data[36])
            }
            other => {
                if other != 0x101 {
                    warn!(
                        "unknown CMF version {}.{}, proceeding as if 1.1",
                        other >> 8,
                        other & 0xFF
                    );
                }
                if data.len() < 40 {
                    invalid_file!("CMF header truncated");
                }
                // A u16le tempo value of unknown use follows the count.
                read_u16(data, 36) as usize
            }
        };

        if off_music > data.len() {
            invalid_file!("CMF music data starts past EOF");
        }

        let mut initial_tempo = Tempo::default();
        if ticks_per_second == 0 {
            invalid_file!("CMF tick rate is zero");
        }
        initial_tempo.set_hertz(u32::from(ticks_per_second));
        if ticks_per_quarter != 0 {
            initial_tempo.set_ticks_per_quarter_note(u32::from(ticks_per_quarter));
        }

        let mut music = midi_decode(
            &data[off_music..],
            MidiFlags::USE_PATCH_INDEX | MidiFlags::CMF_EXTENSIONS,
            initial_tempo,
        )?;

        // Channels 11-15 are the OPL rhythm voices; the rest take melodic
        // channels in order, stepping over the rhythm block to the second
        // chip when they run out.
        let mut opl_channel: u8 = 0;
        let mut opl3 = false;
        for ti in music.track_info.iter_mut() {
            let midi_channel = match ti {
                TrackInfo::Midi { channel } => *channel,
                TrackInfo::Opl { channel } => *channel, // AdLib MDI switch-over
                _ => continue,
            };
            if midi_channel >= 11 {
                *ti = TrackInfo::OplPerc {
                    instrument: Rhythm::from_perc_index(15 - midi_channel).unwrap(),
                };
            } else {
                *ti = TrackInfo::Opl {
                    channel: opl_channel,
                };
                opl_channel += 1;
                if opl_channel == 6 {
                    opl_channel = 9;
                    opl3 = true;
                }
                opl_channel %= 18;
            }
        }

        // Standard CMF playback settings.
        if music.patterns[0].is_empty() {
            // A song with no events still needs somewhere to hang the
            // configuration.
            music.patterns[0].push(Vec::new());
            music.track_info.push(TrackInfo::Unused);
        }
        {
            let config_track = &mut music.patterns[0][0];
            config_track.insert(
                0,
                TrackEvent::new(
                    0,
                    Event::Configuration(Configuration::EnableDeepTremolo {
                        enabled: true,
                        chip_index: 0,
                    }),
                ),
            );
            config_track.insert(
                1,
                TrackEvent::new(
                    0,
                    Event::Configuration(Configuration::EnableDeepVibrato {
                        enabled: true,
                        chip_index: 0,
                    }),
                ),
            );
            config_track.insert(
                2,
                TrackEvent::new(0, Event::Configuration(Configuration::EnableWaveSel(true))),
            );
            if opl3 {
                config_track.insert(
                    0,
                    TrackEvent::new(0, Event::Configuration(Configuration::EnableOpl3(true))),
                );
            }
        }

        // The custom instrument block.
        let mut opl_bank: Vec<Patch> = Vec::with_capacity(num_instruments);
        {
            if off_inst > data.len() {
                invalid_file!("CMF instrument block starts past EOF");
            }
            let cursor = std::io::Cursor::new(&data[off_inst..]);
            let mut iter = ByteIter::new(cursor.bytes()).context(io!())?;
            for _ in 0..num_instruments {
                opl_bank.push(Patch::Opl(read_sbi_instrument(&mut iter)?));
            }
        }

        // The factory set, pulled in lazily when the song plays a program
        // past the custom block.
        let mut generic_mapping: [i32; CMF_NUM_DEFAULT_INSTRUMENTS] =
            [-1; CMF_NUM_DEFAULT_INSTRUMENTS];

        // Lower MIDI-style program numbers to tightly packed bank indices,
        // one mapping per rhythm voice so shared programs get split.
        let midi_patches = std::mem::take(&mut music.patches);
        let track_rhythms: Vec<usize> = music
            .track_info
            .iter()
            .map(|ti| ti.rhythm() as usize)
            .collect();
        let mut inst_mapping = [[-1i32; 128]; 6];
        for pattern in music.patterns.iter_mut() {
            for (track_index, track) in pattern.iter_mut().enumerate() {
                let target_rhythm = track_rhythms[track_index];
                for te in track.iter_mut() {
                    let note = match &mut te.event {
                        Event::NoteOn(n) => n,
                        _ => continue,
                    };

                    // The velocity drives the OPL's logarithmic attenuation
                    // directly; convert to the model's linear scale.
                    note.velocity =
                        (255 - log_volume_to_lin_velocity(255 - u32::from(note.velocity), 255))
                            as u8;

                    let program = match midi_patches.get(note.instrument) {
                        Some(Patch::Midi(p)) => usize::from(p.midi_patch.get()),
                        _ => continue, // AdLib MDI patches pass through
                    };
                    let mapping = &mut inst_mapping[target_rhythm][program];
                    if *mapping == -1 {
                        let mut opl_index = program;
                        if opl_index >= num_instruments {
                            // One of the factory instruments.
                            let real = opl_index % CMF_NUM_DEFAULT_INSTRUMENTS;
                            if generic_mapping[real] < 0 {
                                generic_mapping[real] = opl_bank.len() as i32;
                                let cursor = std::io::Cursor::new(&CMF_DEFAULT_PATCHES[real][..]);
                                let mut iter = ByteIter::new(cursor.bytes()).context(io!())?;
                                opl_bank.push(Patch::Opl(read_sbi_instrument(&mut iter)?));
                            }
                            opl_index = generic_mapping[real] as usize;
                        }
                        *mapping = opl_index as i32;
                    }
                    note.instrument = *mapping as usize;
                }
            }
        }

        // Disregard the MIDI patches and use the OPL ones.
        music.patches = opl_bank;

        music.set_attribute(ATTR_TITLE, "Song title", read_cstring(data, off_title));
        music.set_attribute(
            ATTR_AUTHOR,
            "Song composer",
            read_cstring(data, off_composer),
        );
        music.set_attribute(ATTR_COMMENT, "Song remarks", read_cstring(data, off_remarks));

        // Swap operators for the percussive patches.
        opl_denormalise_perc(&mut music, NormaliseStyle::CarFromMod);

        Ok(music)
    }

    fn write(&self, out: &mut Vec<u8>, music: &Music, flags: WriteFlags) -> Result<()> {
        for (i, patch) in music.patches.iter().enumerate() {
            if !matches!(patch, Patch::Opl(_)) {
                bad_patch!("CMF files can only store OPL instruments (patch {})", i);
            }
        }
        if music.patches.len() >= 128 {
            format_limitation!("CMF files have a maximum of 128 instruments");
        }

        // Swap operators back into the storage convention.
        let patches = opl_normalise_perc(music, NormaliseStyle::CarFromMod);

        let title = music
            .attribute(ATTR_TITLE)
            .map(|a| a.text.clone())
            .unwrap_or_default();
        let composer = music
            .attribute(ATTR_AUTHOR)
            .map(|a| a.text.clone())
            .unwrap_or_default();
        let remarks = music
            .attribute(ATTR_COMMENT)
            .map(|a| a.text.clone())
            .unwrap_or_default();

        let mut off_next: u16 = 20 + 16 + 4;
        let mut off_text = [0u16; 3];
        for (i, text) in [&title, &composer, &remarks].iter().enumerate() {
            if !text.is_empty() {
                off_text[i] = off_next;
                off_next += text.len() as u16 + 1;
            }
        }
        let off_inst = off_next;
        let num_instruments = patches.len() as u16;
        off_next += SBI_INST_LEN as u16 * num_instruments;
        let off_music = off_next;

        out.extend_from_slice(b"CTMF\x01\x01");
        write_u16_le!(out, off_inst)?;
        write_u16_le!(out, off_music)?;
        write_u16_le!(out, music.initial_tempo.ticks_per_quarter_note() as u16)?;
        write_u16_le!(out, music.initial_tempo.hertz() as u16)?;
        for off in off_text.iter() {
            write_u16_le!(out, *off)?;
        }
        // Channel-in-use table, patched once the events have been written.
        out.extend_from_slice(&[0u8; 16]);
        write_u16_le!(out, num_instruments)?;
        write_u16_le!(out, music.initial_tempo.bpm() as u16)?;

        for text in [&title, &composer, &remarks].iter() {
            if !text.is_empty() {
                out.extend_from_slice(text.as_bytes());
                out.push(0);
            }
        }

        for patch in &patches {
            if let Patch::Opl(p) = patch {
                write_sbi_instrument(out, p)?;
            }
        }

        // Re-point every track at the MIDI channel the CMF layout demands,
        // and map the velocities back onto the OPL's logarithmic scale.
        let mut music_midi = music.clone();
        for ti in music_midi.track_info.iter_mut() {
            let channel = match ti {
                TrackInfo::OplPerc { instrument } => match instrument.perc_index() {
                    Some(slot) => 15 - slot,
                    None => format_limitation!("a percussive track names no rhythm voice"),
                },
                TrackInfo::Opl { channel } => *channel,
                TrackInfo::Midi { channel } => *channel,
                other => {
                    format_limitation!("CMF cannot store a {:?} track", other);
                }
            };
            if channel > 15 {
                format_limitation!("CMF files can only have up to 16 channels");
            }
            *ti = TrackInfo::Midi { channel };
        }
        for pattern in music_midi.patterns.iter_mut() {
            for track in pattern.iter_mut() {
                for te in track.iter_mut() {
                    if let Event::NoteOn(note) = &mut te.event {
                        note.velocity = (255
                            - lin_velocity_to_log_volume(255 - u32::from(note.velocity), 255))
                            as u8;
                    }
                }
            }
        }

        let mut midi_flags = MidiFlags::USE_PATCH_INDEX;
        if flags.contains(WriteFlags::INTEGER_NOTES_ONLY) {
            midi_flags = midi_flags | MidiFlags::INTEGER_NOTES_ONLY;
        }
        let mut channels_used = [false; 16];
        midi_encode(
            &mut *out,
            &music_midi,
            midi_flags,
            Some(&mut channels_used),
            EventOrder::OrderRowTrack,
            None,
        )?;

        for (i, used) in channels_used.iter().enumerate() {
            out[20 + i] = *used as u8;
        }
        Ok(())
    }
}
