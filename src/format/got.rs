/*!
The `got` module supports the God of Thunder music format: fixed three-byte
delay/reg/val records at 120Hz with an all-zero record marking the end.
!*/

use crate::byte_iter::ByteIter;
use crate::core::{Music, Tempo};
use crate::error::Result;
use crate::format::{Caps, Certainty, MusicFormat, WriteFlags};
use crate::opl::event::{valid, DelayType, OplEvent, OplReader, OplWriter};
use crate::opl::{opl_decode, opl_encode, OplWriteFlags, OPL_FNUM_DEFAULT};
use snafu::ResultExt;
use std::io::{Read, Write};

/// Tick rate of the format, in Hertz.
const GOT_TEMPO_HZ: u32 = 120;

struct GotReader<'a, R: Read> {
    iter: &'a mut ByteIter<R>,
}

impl<'a, R: Read> OplReader for GotReader<'a, R> {
    fn read_next_pair(&mut self, event: &mut OplEvent) -> Result<bool> {
        let delay = match self.iter.read().context(io!())? {
            Some(b) => b,
            None => return Ok(false),
        };
        let reg = match self.iter.read().context(io!())? {
            Some(b) => b,
            None => return Ok(false),
        };
        let val = match self.iter.read().context(io!())? {
            Some(b) => b,
            None => return Ok(false),
        };

        if delay == 0 && reg == 0 && val == 0 {
            // End of song.
            return Ok(false);
        }
        event.delay = u32::from(delay);
        event.reg = reg;
        event.val = val;
        event.chip_index = 0; // this format only supports one OPL2
        event.valid |= valid::DELAY | valid::REGS;
        Ok(true)
    }
}

struct GotWriter<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> OplWriter for GotWriter<'a> {
    fn write_next_pair(&mut self, event: &OplEvent) -> Result<()> {
        let mut delay: u64 = if event.valid & valid::DELAY != 0 {
            (f64::from(event.delay) * event.tempo.us_per_tick * f64::from(GOT_TEMPO_HZ)
                / 1_000_000.0)
                .round() as u64
        } else {
            0
        };

        // Spread long delays over dummy writes to an unused port.
        while delay > 0xFF {
            self.out.extend_from_slice(&[0xFF, 0x00, 0x00]);
            delay -= 0xFF;
        }

        if event.valid & valid::REGS != 0 {
            debug_assert_eq!(event.chip_index, 0);
            self.out.push(delay as u8);
            self.out.push(event.reg);
            self.out.push(event.val);
        } else if delay > 0 {
            // Trailing delay with no register write.
            self.out.push(delay as u8);
            self.out.push(0);
            self.out.push(0);
        }
        Ok(())
    }
}

pub struct FormatGot;

impl MusicFormat for FormatGot {
    fn code(&self) -> &'static str {
        "got"
    }

    fn name(&self) -> &'static str {
        "God of Thunder"
    }

    fn extensions(&self) -> &'static [&'static str] {
        // No filename extension for this format.
        &[]
    }

    fn caps(&self) -> Caps {
        Caps::INST_OPL | Caps::HAS_EVENTS | Caps::HARDWARE_OPL2
    }

    fn is_instance(&self, data: &[u8]) -> Certainty {
        // Must have room for the header and the end marker.
        if data.len() < 6 {
            return Certainty::DefinitelyNo;
        }
        if data.len() % 3 != 0 {
            return Certainty::DefinitelyNo;
        }
        if u16::from_le_bytes([data[0], data[1]]) != 0x0001 {
            return Certainty::DefinitelyNo;
        }
        // Ends with a loop-to-start marker.
        if data[data.len() - 4..].iter().any(|b| *b != 0) {
            return Certainty::DefinitelyNo;
        }
        Certainty::PossiblyYes
    }

    fn read(&self, data: &[u8]) -> Result<Music> {
        let cursor = std::io::Cursor::new(data);
        let mut iter = ByteIter::new(cursor.bytes()).context(io!())?;
        let sig = iter.read_u16_le().context(io!())?;
        if sig != 0x0001 {
            invalid_file!("bad header value {:#06x}", sig);
        }

        let mut initial_tempo = Tempo::default();
        initial_tempo.set_hertz(GOT_TEMPO_HZ);

        let mut reader = GotReader { iter: &mut iter };
        opl_decode(
            &mut reader,
            DelayType::DelayIsPostData,
            OPL_FNUM_DEFAULT,
            initial_tempo,
        )
    }

    fn write(&self, out: &mut Vec<u8>, music: &Music, flags: WriteFlags) -> Result<()> {
        write_u16_le!(out, 1u16)?;

        let mut opl_flags = OplWriteFlags::OPL2_ONLY;
        if flags.contains(WriteFlags::INTEGER_NOTES_ONLY) {
            opl_flags = opl_flags | OplWriteFlags::INTEGER_NOTES_ONLY;
        }

        {
            let mut writer = GotWriter { out: &mut *out };
            opl_encode(
                &mut writer,
                music,
                DelayType::DelayIsPostData,
                OPL_FNUM_DEFAULT,
                opl_flags,
            )?;
        }

        // End-of-song marker, padded so the file stays a multiple of three
        // bytes and ends with four zero bytes.
        out.extend_from_slice(&[0, 0, 0]);
        while out.len() % 3 != 0
            || out.len() < 4
            || out[out.len() - 4..].iter().any(|b| *b != 0)
        {
            out.push(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe() {
        // Header, one record, end marker, pad.
        let data = [
            0x01, 0x00, // header
            0x00, 0xB0, 0x20, // one record
            0x00, 0x00, 0x00, 0x00, // end marker + pad
        ];
        assert_eq!(FormatGot.is_instance(&data), Certainty::PossiblyYes);
        assert_eq!(FormatGot.is_instance(&data[..6]), Certainty::DefinitelyNo);
    }
}
