/*!
The `raw` module supports Rdos RAW OPL captures: val/reg pairs (in that
order) with control codes for delays, chip selection and clock changes.
The clock runs at 1.193180MHz, so tempo changes travel in the stream
itself.
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

/// PIT ticks per microsecond.
const RAW_CLOCK_RATE: f64 = 1.193180;

fn us_to_raw_clock(us: f64) -> u16 {
    (us * RAW_CLOCK_RATE).round() as u16
}

fn raw_clock_to_us(clock: u16) -> f64 {
    f64::from(clock) / RAW_CLOCK_RATE
}

struct RawReader<'a, R: Read> {
    iter: &'a mut ByteIter<R>,
    chip_index: u8,
    /// Bytes consumed, so the caller can locate the tag trailer.
    consumed: usize,
}

impl<'a, R: Read> RawReader<'a, R> {
    fn read_byte(&mut self) -> LibResult<Option<u8>> {
        let b = self.iter.read().context(io!())?;
        if b.is_some() {
            self.consumed += 1;
        }
        Ok(b)
    }

    fn next_pair(&mut self) -> LibResult<Option<(u8, u8)>> {
        let val = match self.read_byte()? {
            Some(b) => b,
            None => return Ok(None),
        };
        let reg = match self.read_byte()? {
            Some(b) => b,
            None => return Ok(None),
        };
        Ok(Some((val, reg)))
    }
}

impl<'a, R: Read> OplReader for RawReader<'a, R> {
    fn read_next_pair(&mut self, event: &mut OplEvent) -> Result<bool> {
        loop {
            let (val, reg) = match self.next_pair()? {
                Some(pair) => pair,
                None => return Ok(false),
            };
            match reg {
                0x00 => {
                    // Delay in clock ticks.
                    event.delay += u32::from(val);
                    event.valid |= valid::DELAY;
                }
                0x02 => match val {
                    0x00 => {
                        // Clock change.
                        let lo = match self.read_byte()? {
                            Some(b) => b,
                            None => return Ok(false),
                        };
                        let hi = match self.read_byte()? {
                            Some(b) => b,
                            None => return Ok(false),
                        };
                        let mut clock = u16::from_le_bytes([lo, hi]);
                        if clock == 0 {
                            clock = 0xFFFF;
                        }
                        event.tempo.us_per_tick = raw_clock_to_us(clock);
                        event.valid |= valid::TEMPO;
                        return Ok(true);
                    }
                    0x01 => self.chip_index = 0,
                    0x02 => self.chip_index = 1,
                    other => warn!("unknown RAW control code {:#04x}", other),
                },
                0xFF if val == 0xFF => {
                    // End of song marker.
                    return Ok(false);
                }
                reg => {
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

struct RawWriter<'a> {
    out: &'a mut Vec<u8>,
    last_chip_index: u8,
    last_clock: u16,
}

impl<'a> OplWriter for RawWriter<'a> {
    fn write_next_pair(&mut self, event: &OplEvent) -> Result<()> {
        if event.valid & valid::TEMPO != 0 {
            let clock = us_to_raw_clock(event.tempo.us_per_tick);
            if clock != self.last_clock {
                self.out.push(0x00); // control: clock change
                self.out.push(0x02);
                write_u16_le!(self.out, clock)?;
                self.last_clock = clock;
            }
        }

        if event.valid & valid::DELAY != 0 {
            // Delays are byte-sized; split long ones.
            let mut delay = event.delay;
            while delay > 0 {
                let d = delay.min(255) as u8;
                self.out.push(d);
                self.out.push(0x00);
                delay -= u32::from(d);
            }
        }

        if event.valid & valid::REGS != 0 {
            if event.chip_index != self.last_chip_index {
                debug_assert!(event.chip_index < 2);
                self.out.push(0x01 + event.chip_index);
                self.out.push(0x02);
                self.last_chip_index = event.chip_index;
            }
            if event.reg == 0x00 || event.reg == 0x02 {
                // These register numbers are control codes on the wire and
                // cannot be escaped.
                warn!(
                    "Rdos RAW cannot store writes to OPL register {:#04x}; dropped",
                    event.reg
                );
            } else {
                self.out.push(event.val);
                self.out.push(event.reg);
            }
        }
        Ok(())
    }
}

pub struct FormatRaw;

impl MusicFormat for FormatRaw {
    fn code(&self) -> &'static str {
        "raw-rdos"
    }

    fn name(&self) -> &'static str {
        "Rdos raw OPL capture"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["raw"]
    }

    fn caps(&self) -> Caps {
        Caps::INST_OPL | Caps::HAS_EVENTS | Caps::HARDWARE_OPL3
    }

    fn is_instance(&self, data: &[u8]) -> Certainty {
        if data.len() < 10 {
            return Certainty::DefinitelyNo;
        }
        if !data.starts_with(b"RAWADATA") {
            return Certainty::DefinitelyNo;
        }
        Certainty::DefinitelyYes
    }

    fn read(&self, data: &[u8]) -> Result<Music> {
        let cursor = std::io::Cursor::new(data);
        let mut iter = ByteIter::new(cursor.bytes()).context(io!())?;
        let sig = iter.read_n(8).context(io!())?;
        if sig[..] != b"RAWADATA"[..] {
            invalid_file!("missing RAWADATA signature");
        }
        let mut clock = iter.read_u16_le().context(io!())?;
        if clock == 0 {
            clock = 0xFFFF;
        }

        let mut initial_tempo = Tempo::default();
        initial_tempo.us_per_tick = raw_clock_to_us(clock);

        let mut reader = RawReader {
            iter: &mut iter,
            chip_index: 0,
            consumed: 0,
        };
        let mut music = opl_decode(
            &mut reader,
            DelayType::DelayIsPreData,
            OPL_FNUM_DEFAULT,
            initial_tempo,
        )?;

        // Anything after the end-of-song marker is the tag trailer.
        let tag_offset = (10 + reader.consumed).min(data.len());
        read_tags(&data[tag_offset..], &mut music);

        Ok(music)
    }

    fn write(&self, out: &mut Vec<u8>, music: &Music, flags: WriteFlags) -> Result<()> {
        let clock = us_to_raw_clock(music.initial_tempo.us_per_tick);
        out.extend_from_slice(b"RAWADATA");
        write_u16_le!(out, clock)?;

        let mut opl_flags = OplWriteFlags::DEFAULT;
        if flags.contains(WriteFlags::INTEGER_NOTES_ONLY) {
            opl_flags = opl_flags | OplWriteFlags::INTEGER_NOTES_ONLY;
        }

        {
            let mut writer = RawWriter {
                out: &mut *out,
                last_chip_index: 0,
                last_clock: clock,
            };
            opl_encode(
                &mut writer,
                music,
                DelayType::DelayIsPreData,
                OPL_FNUM_DEFAULT,
                opl_flags,
            )?;
        }

        // End of song marker.
        out.push(0xFF);
        out.push(0xFF);

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
            FormatRaw.is_instance(b"RAWADATA\xff\xff"),
            Certainty::DefinitelyYes
        );
        assert_eq!(FormatRaw.is_instance(b"RAWADATX\xff\xff"), Certainty::DefinitelyNo);
    }
}
