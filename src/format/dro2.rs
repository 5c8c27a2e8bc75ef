/*!
The `dro2` module supports version 2.0 of the DOSBox Raw OPL capture
format.  Register numbers are indirected through a codemap in the header,
and two reserved codes carry short and long delays.
!*/

use crate::byte_iter::ByteIter;
use crate::core::{Music, Tempo};
use crate::error::{LibResult, Result};
use crate::format::tags::{read_tags, write_tags};
use crate::format::{Caps, Certainty, MusicFormat, WriteFlags};
use crate::opl::event::{valid, DelayType, OplEvent, OplReader, OplWriter};
use crate::opl::{opl_decode, opl_encode, OplWriteFlags, OPL_FNUM_DEFAULT};
use log::warn;
use snafu::ResultExt;
use std::io::{Read, Write};

/// Length of each tick in microseconds.
const DRO_CLOCK_US: f64 = 1000.0;

/// Command byte used for a short delay when writing.
const DRO2_CMD_SHORTDELAY: u8 = 0xFF;
/// Command byte used for a long delay when writing.
const DRO2_CMD_LONGDELAY: u8 = 0xFE;

const DRO2_OPLTYPE_OPL2: u8 = 0;
const DRO2_OPLTYPE_DUALOPL2: u8 = 1;
const DRO2_OPLTYPE_OPL3: u8 = 2;

struct DroV2Reader<'a, R: Read> {
    iter: &'a mut ByteIter<R>,
    remaining_pairs: u32,
    code_short_delay: u8,
    code_long_delay: u8,
    codemap_length: u8,
    codemap: [u8; 128],
}

impl<'a, R: Read> DroV2Reader<'a, R> {
    fn next_pair(&mut self) -> LibResult<Option<(u8, u8)>> {
        if self.remaining_pairs == 0 {
            return Ok(None);
        }
        self.remaining_pairs -= 1;
        let code = match self.iter.read().context(io!())? {
            Some(b) => b,
            None => return Ok(None),
        };
        let arg = match self.iter.read().context(io!())? {
            Some(b) => b,
            None => return Ok(None),
        };
        Ok(Some((code, arg)))
    }
}

impl<'a, R: Read> OplReader for DroV2Reader<'a, R> {
    fn read_next_pair(&mut self, event: &mut OplEvent) -> Result<bool> {
        loop {
            let (code, arg) = match self.next_pair()? {
                Some(pair) => pair,
                None => return Ok(false),
            };
            if code == self.code_short_delay {
                event.delay += u32::from(arg) + 1;
                event.valid |= valid::DELAY;
            } else if code == self.code_long_delay {
                event.delay += (u32::from(arg) + 1) << 8;
                event.valid |= valid::DELAY;
            } else {
                // The high bit selects the chip.
                event.chip_index = code >> 7;
                if (code & 0x7F) >= self.codemap_length {
                    warn!("DRO file uses codes past the end of the code map");
                    // Carry on; the map is primed with 0xFF for these.
                }
                event.reg = self.codemap[usize::from(code & 0x7F)];
                event.val = arg;
                event.valid |= valid::REGS;
                return Ok(true);
            }
        }
    }
}

/// Registers a DROv2 file can carry.  Anything else has no codemap slot.
fn is_mappable_register(reg: u8) -> bool {
    matches!(reg,
        0x01 | 0x04 | 0x05 | 0x08 | 0xBD
        | 0x20..=0x35
        | 0x40..=0x55
        | 0x60..=0x75
        | 0x80..=0x95
        | 0xE0..=0xF5
        | 0xA0..=0xA8
        | 0xB0..=0xB8
        | 0xC0..=0xC8)
}

struct DroV2Writer<'a> {
    buffer: &'a mut Vec<u8>,
    codemap: [u8; 256],
    codemap_length: u8,
    num_pairs: u32,
    ms_song_length: u32,
    opl_type: u8,
}

impl<'a> DroV2Writer<'a> {
    fn code_for(&mut self, reg: u8) -> Option<u8> {
        if self.codemap[usize::from(reg)] == 0xFF {
            // Codes 0x7E/0x7F would collide with the delay commands once
            // the chip-select bit is set.
            if self.codemap_length >= 0x7E {
                return None;
            }
            self.codemap[usize::from(reg)] = self.codemap_length;
            self.codemap_length += 1;
        }
        Some(self.codemap[usize::from(reg)])
    }
}

impl<'a> OplWriter for DroV2Writer<'a> {
    fn write_next_pair(&mut self, event: &OplEvent) -> Result<()> {
        if event.valid & valid::DELAY != 0 {
            let mut delay =
                (f64::from(event.delay) * event.tempo.us_per_tick / DRO_CLOCK_US).round() as u64;
            self.ms_song_length += delay as u32;
            while delay > 0 {
                if delay > 256 {
                    let mut big = (delay >> 8) - 1;
                    if big > 0xFF {
                        big = 0xFF;
                    }
                    self.buffer.push(DRO2_CMD_LONGDELAY);
                    self.buffer.push(big as u8);
                    delay -= (big + 1) << 8;
                    self.num_pairs += 1;
                    continue;
                }
                self.buffer.push(DRO2_CMD_SHORTDELAY);
                self.buffer.push((delay - 1) as u8);
                self.num_pairs += 1;
                break;
            }
        }

        if event.valid & valid::REGS != 0 {
            debug_assert!(event.chip_index < 2);
            if !is_mappable_register(event.reg) {
                // Skipped rather than wasting a codemap slot on it.
                warn!(
                    "unused OPL register {:#04x} cannot be written to a DROv2 file",
                    event.reg
                );
                return Ok(());
            }
            if event.chip_index == 1 {
                if event.reg == 0x05 && event.val & 1 != 0 {
                    self.opl_type = DRO2_OPLTYPE_OPL3;
                } else if self.opl_type == DRO2_OPLTYPE_OPL2 {
                    self.opl_type = DRO2_OPLTYPE_DUALOPL2;
                }
            }
            let code = match self.code_for(event.reg) {
                Some(code) => code | (event.chip_index << 7),
                None => {
                    warn!("DROv2 code map full; dropping write to register {:#04x}", event.reg);
                    return Ok(());
                }
            };
            self.buffer.push(code);
            self.buffer.push(event.val);
            self.num_pairs += 1;
        }
        Ok(())
    }
}

pub struct FormatDroV2;

impl MusicFormat for FormatDroV2 {
    fn code(&self) -> &'static str {
        "dro-dosbox-v2"
    }

    fn name(&self) -> &'static str {
        "DOSBox Raw OPL version 2"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["dro"]
    }

    fn caps(&self) -> Caps {
        Caps::INST_OPL | Caps::HAS_EVENTS | Caps::HARDWARE_OPL3
    }

    fn is_instance(&self, data: &[u8]) -> Certainty {
        if data.len() < 12 {
            return Certainty::DefinitelyNo;
        }
        if !data.starts_with(b"DBRAWOPL") {
            return Certainty::DefinitelyNo;
        }
        let ver_major = u16::from_le_bytes([data[8], data[9]]);
        let ver_minor = u16::from_le_bytes([data[10], data[11]]);
        if ver_major != 2 || ver_minor != 0 {
            return Certainty::DefinitelyNo;
        }
        Certainty::DefinitelyYes
    }

    fn read(&self, data: &[u8]) -> Result<Music> {
        if data.len() < 26 {
            invalid_file!("DRO header truncated");
        }
        let len_pairs = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        // Bytes 16-21: length in milliseconds and the hardware type.
        let compression = data[22];
        let code_short_delay = data[23];
        let code_long_delay = data[24];
        let codemap_length = data[25];
        if compression != 0 {
            invalid_file!("compressed DRO files are not supported");
        }
        if codemap_length > 127 {
            invalid_file!("DRO code map too large");
        }
        let map_end = 26 + usize::from(codemap_length);
        if data.len() < map_end {
            invalid_file!("DRO code map truncated");
        }
        let mut codemap = [0xFFu8; 128];
        codemap[..usize::from(codemap_length)].copy_from_slice(&data[26..map_end]);

        let mut initial_tempo = Tempo::default();
        initial_tempo.us_per_tick = DRO_CLOCK_US;

        let cursor = std::io::Cursor::new(&data[map_end..]);
        let mut iter = ByteIter::new(cursor.bytes()).context(io!())?;
        let mut reader = DroV2Reader {
            iter: &mut iter,
            remaining_pairs: len_pairs,
            code_short_delay,
            code_long_delay,
            codemap_length,
            codemap,
        };
        let mut music = opl_decode(
            &mut reader,
            DelayType::DelayIsPreData,
            OPL_FNUM_DEFAULT,
            initial_tempo,
        )?;

        let tag_offset = (map_end + 2 * len_pairs as usize).min(data.len());
        read_tags(&data[tag_offset..], &mut music);

        Ok(music)
    }

    fn write(&self, out: &mut Vec<u8>, music: &Music, flags: WriteFlags) -> Result<()> {
        let mut opl_flags = OplWriteFlags::DEFAULT;
        if flags.contains(WriteFlags::INTEGER_NOTES_ONLY) {
            opl_flags = opl_flags | OplWriteFlags::INTEGER_NOTES_ONLY;
        }

        // The codemap lands in the header, before the data that defines it,
        // so the song body goes through a scratch buffer first.
        let mut body = Vec::new();
        let mut writer = DroV2Writer {
            buffer: &mut body,
            codemap: [0xFF; 256],
            codemap_length: 0,
            num_pairs: 0,
            ms_song_length: 0,
            opl_type: DRO2_OPLTYPE_OPL2,
        };
        opl_encode(
            &mut writer,
            music,
            DelayType::DelayIsPreData,
            OPL_FNUM_DEFAULT,
            opl_flags,
        )?;

        let num_pairs = writer.num_pairs;
        let ms_song_length = writer.ms_song_length;
        let opl_type = writer.opl_type;
        let codemap_length = writer.codemap_length;
        // Invert reg -> code into the header's code -> reg table.
        let mut header_map = vec![0u8; usize::from(codemap_length)];
        for reg in 0..=255u8 {
            let code = writer.codemap[usize::from(reg)];
            if code != 0xFF {
                header_map[usize::from(code)] = reg;
            }
        }

        out.extend_from_slice(b"DBRAWOPL\x02\x00\x00\x00");
        write_u32_le!(out, num_pairs)?;
        write_u32_le!(out, ms_song_length)?;
        out.push(opl_type);
        out.push(0); // format: interleaved commands and data
        out.push(0); // compression: none
        out.push(DRO2_CMD_SHORTDELAY);
        out.push(DRO2_CMD_LONGDELAY);
        out.push(codemap_length);
        out.extend_from_slice(&header_map);
        out.extend_from_slice(&body);

        write_tags(out, music)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe() {
        assert_eq!(
            FormatDroV2.is_instance(b"DBRAWOPL\x02\x00\x00\x00"),
            Certainty::DefinitelyYes
        );
        assert_eq!(
            FormatDroV2.is_instance(b"DBRAWOPL\x00\x00\x01\x00"),
            Certainty::DefinitelyNo
        );
    }
}
