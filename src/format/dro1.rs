/*!
The `dro1` module supports version 0.1 of the DOSBox Raw OPL capture
format: a stream of reg/val pairs at 1000Hz with escape codes for delays,
chip selection, and low register numbers.
!*/

use crate::byte_iter::ByteIter;
use crate::core::{Music, Tempo};
use crate::error::{LibResult, Result};
use crate::format::tags::{read_tags, write_tags};
use crate::format::{Caps, Certainty, MusicFormat, WriteFlags};
use crate::opl::event::{valid, DelayType, OplEvent, OplReader, OplWriter};
use crate::opl::{opl_decode, opl_encode, OplWriteFlags, OPL_FNUM_DEFAULT};
use snafu::ResultExt;
use std::io::{Read, Write};

/// Length of each tick in microseconds.
const DRO_CLOCK_US: f64 = 1000.0;

/// Header value for a single OPL2 chip.
const DRO_OPLTYPE_OPL2: u32 = 0;
/// Header value for a single OPL3 chip.
const DRO_OPLTYPE_OPL3: u32 = 1;
/// Header value for two OPL2 chips.
const DRO_OPLTYPE_DUALOPL2: u32 = 2;

struct DroV1Reader<'a, R: Read> {
    iter: &'a mut ByteIter<R>,
    remaining: u32,
    chip_index: u8,
}

impl<'a, R: Read> DroV1Reader<'a, R> {
    fn read_byte(&mut self) -> LibResult<Option<u8>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.iter.read().context(io!())
    }
}

impl<'a, R: Read> OplReader for DroV1Reader<'a, R> {
    fn read_next_pair(&mut self, event: &mut OplEvent) -> Result<bool> {
        loop {
            let code = match self.read_byte()? {
                Some(b) => b,
                None => return Ok(false),
            };
            match code {
                0x00 => {
                    // Short delay.
                    let amount = match self.read_byte()? {
                        Some(b) => b,
                        None => return Ok(false),
                    };
                    event.delay += u32::from(amount) + 1;
                    event.valid |= valid::DELAY;
                }
                0x01 => {
                    // Long delay.
                    let lo = match self.read_byte()? {
                        Some(b) => b,
                        None => return Ok(false),
                    };
                    let hi = match self.read_byte()? {
                        Some(b) => b,
                        None => return Ok(false),
                    };
                    event.delay += u32::from(u16::from_le_bytes([lo, hi])) + 1;
                    event.valid |= valid::DELAY;
                }
                0x02 => self.chip_index = 0,
                0x03 => self.chip_index = 1,
                0x04 => {
                    // Escape: the next byte is a register regardless of its
                    // value.
                    let reg = match self.read_byte()? {
                        Some(b) => b,
                        None => return Ok(false),
                    };
                    let val = match self.read_byte()? {
                        Some(b) => b,
                        None => return Ok(false),
                    };
                    event.chip_index = self.chip_index;
                    event.reg = reg;
                    event.val = val;
                    event.valid |= valid::REGS;
                    return Ok(true);
                }
                reg => {
                    let val = match self.read_byte()? {
                        Some(b) => b,
                        None => return Ok(false),
                    };
                    event.chip_index = self.chip_index;
                    event.reg = reg;
                    event.val = val;
                    event.valid |= valid::REGS;
                    return Ok(true);
                }
            }
        }
    }
}

struct DroV1Writer<'a> {
    out: &'a mut Vec<u8>,
    last_chip_index: u8,
    ms_song_length: u32,
    opl_type: u32,
}

impl<'a> OplWriter for DroV1Writer<'a> {
    fn write_next_pair(&mut self, event: &OplEvent) -> Result<()> {
        if event.valid & valid::DELAY != 0 {
            // Ticks to milliseconds.
            let mut delay =
                (f64::from(event.delay) * event.tempo.us_per_tick / DRO_CLOCK_US).round() as u64;
            while delay > 0 {
                if delay > 256 {
                    let ld: u16 = if delay > 65536 {
                        65535
                    } else {
                        (delay - 1) as u16
                    };
                    self.out.push(1);
                    write_u16_le!(self.out, ld)?;
                    delay -= u64::from(ld) + 1;
                    self.ms_song_length += u32::from(ld) + 1;
                    continue;
                }
                self.out.push(0);
                self.out.push((delay - 1) as u8);
                self.ms_song_length += delay as u32;
                break;
            }
        }

        if event.valid & valid::REGS != 0 {
            if event.chip_index != self.last_chip_index {
                debug_assert!(event.chip_index < 2);
                self.out.push(0x02 + event.chip_index);
                self.last_chip_index = event.chip_index;
            }
            if event.chip_index == 1 {
                if event.reg == 0x05 && event.val & 1 != 0 {
                    self.opl_type = DRO_OPLTYPE_OPL3;
                } else if self.opl_type == DRO_OPLTYPE_OPL2 {
                    self.opl_type = DRO_OPLTYPE_DUALOPL2;
                }
            }
            if event.reg < 0x05 {
                // Low registers collide with the control codes and need the
                // escape.
                self.out.push(0x04);
            }
            self.out.push(event.reg);
            self.out.push(event.val);
        }
        Ok(())
    }
}

pub struct FormatDroV1;

impl MusicFormat for FormatDroV1 {
    fn code(&self) -> &'static str {
        "dro-dosbox-v1"
    }

    fn name(&self) -> &'static str {
        "DOSBox Raw OPL version 1"
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
        if ver_major != 0 || ver_minor != 1 {
            return Certainty::DefinitelyNo;
        }
        Certainty::DefinitelyYes
    }

    fn read(&self, data: &[u8]) -> Result<Music> {
        let cursor = std::io::Cursor::new(data);
        let mut iter = ByteIter::new(cursor.bytes()).context(io!())?;
        // The signature and version were checked by the probe.
        iter.skip(12).context(io!())?;
        let _ms_length = iter.read_u32_le().context(io!())?;
        let len_data = iter.read_u32_le().context(io!())?;
        let _hardware = iter.read_u32_le().context(io!())?;

        let mut initial_tempo = Tempo::default();
        initial_tempo.us_per_tick = DRO_CLOCK_US;

        let mut reader = DroV1Reader {
            iter: &mut iter,
            remaining: len_data,
            chip_index: 0,
        };
        let mut music = opl_decode(
            &mut reader,
            DelayType::DelayIsPreData,
            OPL_FNUM_DEFAULT,
            initial_tempo,
        )?;

        let tag_offset = (24 + len_data as usize).min(data.len());
        read_tags(&data[tag_offset..], &mut music);

        Ok(music)
    }

    fn write(&self, out: &mut Vec<u8>, music: &Music, flags: WriteFlags) -> Result<()> {
        out.extend_from_slice(b"DBRAWOPL\x00\x00\x01\x00");
        // Placeholders for length in milliseconds, length in bytes, and the
        // hardware type.
        out.extend_from_slice(&[0; 12]);

        let mut opl_flags = OplWriteFlags::DEFAULT;
        if flags.contains(WriteFlags::INTEGER_NOTES_ONLY) {
            opl_flags = opl_flags | OplWriteFlags::INTEGER_NOTES_ONLY;
        }

        let (ms_song_length, opl_type) = {
            let mut writer = DroV1Writer {
                out: &mut *out,
                last_chip_index: 0,
                ms_song_length: 0,
                opl_type: DRO_OPLTYPE_OPL2,
            };
            opl_encode(
                &mut writer,
                music,
                DelayType::DelayIsPreData,
                OPL_FNUM_DEFAULT,
                opl_flags,
            )?;
            (writer.ms_song_length, writer.opl_type)
        };

        let size = (out.len() - 24) as u32;
        write_tags(out, music)?;

        out[12..16].copy_from_slice(&ms_song_length.to_le_bytes());
        out[16..20].copy_from_slice(&size.to_le_bytes());
        out[20..24].copy_from_slice(&opl_type.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe() {
        assert_eq!(
            FormatDroV1.is_instance(b"DBRAWOPL\x00\x00\x01\x00"),
            Certainty::DefinitelyYes
        );
        assert_eq!(
            FormatDroV1.is_instance(b"DBRAWOPL\x02\x00\x00\x00"),
            Certainty::DefinitelyNo
        );
        assert_eq!(FormatDroV1.is_instance(b"short"), Certainty::DefinitelyNo);
    }
}
