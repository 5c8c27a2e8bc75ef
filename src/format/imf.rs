/*!
The `imf` module supports id Software's IMF format: a bare list of
reg/val/delay16 records played at a fixed rate.  Type-0 files are raw
records; type-1 files carry a leading data-length word and an optional tag
trailer.  The WLF and Duke Nukem II variants are the same container at a
different clock rate.
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

/// Delays longer than this cause a file to be rejected by the probe; real
/// songs do not sit silent this long.
const IMF_MAX_DELAY: u16 = 0x4000;

/// Reads reg/val/delay16 records off the data slice.
struct ImfReader<'a, R: Read> {
    iter: &'a mut ByteIter<R>,
}

impl<'a, R: Read> ImfReader<'a, R> {
    fn next_record(&mut self) -> LibResult<Option<(u8, u8, u16)>> {
        let reg = match self.iter.read().context(io!())? {
            Some(b) => b,
            None => return Ok(None),
        };
        let val = match self.iter.read().context(io!())? {
            Some(b) => b,
            None => return Ok(None),
        };
        let lo = match self.iter.read().context(io!())? {
            Some(b) => b,
            None => return Ok(None),
        };
        let hi = match self.iter.read().context(io!())? {
            Some(b) => b,
            None => return Ok(None),
        };
        Ok(Some((reg, val, u16::from_le_bytes([lo, hi]))))
    }
}

impl<'a, R: Read> OplReader for ImfReader<'a, R> {
    fn read_next_pair(&mut self, event: &mut OplEvent) -> Result<bool> {
        let (reg, val, delay) = match self.next_record()? {
            Some(record) => record,
            None => return Ok(false),
        };
        event.reg = reg;
        event.val = val;
        event.delay = u32::from(delay);
        event.chip_index = 0; // only one OPL2 supported
        event.valid |= valid::DELAY | valid::REGS;
        Ok(true)
    }
}

/// Encodes reg/val pairs into IMF records at the format's clock rate.
struct ImfWriter<'a> {
    out: &'a mut Vec<u8>,
    speed: u32,
}

impl<'a> OplWriter for ImfWriter<'a> {
    fn write_next_pair(&mut self, event: &OplEvent) -> Result<()> {
        let mut delay: u64 = if event.valid & valid::DELAY != 0 {
            // Convert ticks into IMF clock periods.
            (f64::from(event.delay) * event.tempo.us_per_tick * f64::from(self.speed)
                / 1_000_000.0)
                .round() as u64
        } else {
            0
        };

        // Spread very long delays over dummy writes to an unused port.
        while delay > 0xFFFF {
            self.out.push(0);
            self.out.push(0);
            write_u16_le!(self.out, 0xFFFF)?;
            delay -= 0xFFFF;
        }

        if event.valid & valid::REGS != 0 {
            debug_assert_eq!(event.chip_index, 0);
            self.out.push(event.reg);
            self.out.push(event.val);
            write_u16_le!(self.out, delay as u16)?;
        } else if delay > 0 {
            // A trailing delay with no register write.
            self.out.push(0);
            self.out.push(0);
            write_u16_le!(self.out, delay as u16)?;
        }
        Ok(())
    }
}

/// Is `reg` a hole in the OPL2 register map?  Used by the content probe.
fn invalid_opl_register(reg: u8) -> bool {
    matches!(reg,
        0x06 | 0x07
        | 0x09..=0x1F
        | 0x36..=0x3F
        | 0x56..=0x5F
        | 0x76..=0x7F
        | 0x96..=0x9F
        | 0xA9..=0xAF
        | 0xB9..=0xBC
        | 0xBE..=0xBF
        | 0xC9..=0xDF
        | 0xF6..=0xFF)
}

fn is_instance(data: &[u8], imf_type: u8) -> Certainty {
    if data.len() < 4 {
        return Certainty::DefinitelyNo;
    }

    // The first two bytes are the data length in a type-1 file and part of
    // the first (always dummy) event in a type-0 file.
    let data_len = u16::from_le_bytes([data[0], data[1]]) as usize;
    if data_len > data.len() {
        return Certainty::DefinitelyNo;
    }
    let (mut records, len) = if data_len == 0 {
        if imf_type != 0 {
            return Certainty::DefinitelyNo;
        }
        (&data[..], data.len())
    } else {
        if imf_type != 1 {
            return Certainty::DefinitelyNo;
        }
        (&data[2..], data_len)
    };

    // Incomplete data sections aren't this format.
    if len % 4 != 0 {
        return Certainty::DefinitelyNo;
    }

    let mut remaining = len;
    while remaining > 3 {
        if records.len() < 4 {
            return Certainty::DefinitelyNo;
        }
        let reg = records[0];
        let delay = u16::from_le_bytes([records[2], records[3]]);
        if invalid_opl_register(reg) {
            return Certainty::DefinitelyNo;
        }
        if delay > IMF_MAX_DELAY {
            return Certainty::DefinitelyNo;
        }
        records = &records[4..];
        remaining -= 4;
    }

    Certainty::DefinitelyYes
}

fn read(data: &[u8], imf_type: u8, speed: u32) -> Result<Music> {
    let (song, trailer) = if imf_type == 1 {
        if data.len() < 2 {
            invalid_file!("file too short for a type-1 length field");
        }
        let len = u16::from_le_bytes([data[0], data[1]]) as usize;
        let end = (2 + len).min(data.len());
        (&data[2..end], &data[end..])
    } else {
        (data, &data[data.len()..])
    };

    let mut initial_tempo = Tempo::default();
    initial_tempo.set_hertz(speed);
    // Not meaningful for a hardware log, but better than the default.
    initial_tempo.ticks_per_beat = speed / 4;

    let cursor = std::io::Cursor::new(song);
    let mut iter = ByteIter::new(cursor.bytes()).context(io!())?;
    let mut reader = ImfReader { iter: &mut iter };
    let mut music = opl_decode(
        &mut reader,
        DelayType::DelayIsPostData,
        OPL_FNUM_DEFAULT,
        initial_tempo,
    )?;

    if imf_type == 1 {
        read_tags(trailer, &mut music);
    }

    Ok(music)
}

fn write(out: &mut Vec<u8>, music: &Music, flags: WriteFlags, imf_type: u8, speed: u32) -> Result<()> {
    if imf_type == 1 {
        // Placeholder for the song length, filled in below.
        out.extend_from_slice(&[0, 0]);
    }

    // Most files start with a dummy event; it also makes type-0 and type-1
    // files easy to tell apart.
    out.extend_from_slice(&[0, 0, 0, 0]);

    let mut opl_flags = OplWriteFlags::RESERVE_FIRST_CHAN | OplWriteFlags::OPL2_ONLY;
    if flags.contains(WriteFlags::INTEGER_NOTES_ONLY) {
        opl_flags = opl_flags | OplWriteFlags::INTEGER_NOTES_ONLY;
    }

    {
        let mut writer = ImfWriter {
            out: &mut *out,
            speed,
        };
        opl_encode(
            &mut writer,
            music,
            DelayType::DelayIsPostData,
            OPL_FNUM_DEFAULT,
            opl_flags,
        )?;
    }

    if imf_type == 1 {
        let size = out.len() - 2;
        if size > 0xFFFF {
            format_limitation!("the song is too long for a type-1 length field");
        }
        write_tags(out, music)?;
        out[0..2].copy_from_slice(&(size as u16).to_le_bytes());
    }

    Ok(())
}

macro_rules! imf_format {
    ($symbol:ident, $code:expr, $name:expr, $exts:expr, $imf_type:expr, $speed:expr) => {
        pub struct $symbol;

        impl MusicFormat for $symbol {
            fn code(&self) -> &'static str {
                $code
            }

            fn name(&self) -> &'static str {
                $name
            }

            fn extensions(&self) -> &'static [&'static str] {
                $exts
            }

            fn caps(&self) -> Caps {
                Caps::INST_OPL | Caps::HAS_EVENTS | Caps::HARDWARE_OPL2
            }

            fn is_instance(&self, data: &[u8]) -> Certainty {
                is_instance(data, $imf_type)
            }

            fn read(&self, data: &[u8]) -> Result<Music> {
                read(data, $imf_type, $speed)
            }

            fn write(&self, out: &mut Vec<u8>, music: &Music, flags: WriteFlags) -> Result<()> {
                write(out, music, flags, $imf_type, $speed)
            }
        }
    };
}

imf_format!(
    FormatImfType0,
    "imf-idsoftware-type0",
    "id Software Music Format (type-0, 560Hz)",
    &["imf", "mni"],
    0,
    560
);
imf_format!(
    FormatImfType1,
    "imf-idsoftware-type1",
    "id Software Music Format (type-1, 560Hz)",
    &["imf", "mni"],
    1,
    560
);
imf_format!(
    FormatWlfType0,
    "wlf-idsoftware-type0",
    "id Software Music Format (type-0, 700Hz)",
    &["wlf"],
    0,
    700
);
imf_format!(
    FormatWlfType1,
    "wlf-idsoftware-type1",
    "id Software Music Format (type-1, 700Hz)",
    &["wlf"],
    1,
    700
);
imf_format!(
    FormatImfDuke2,
    "imf-idsoftware-duke2",
    "id Software Music Format (type-0, 280Hz)",
    &["imf"],
    0,
    280
);
