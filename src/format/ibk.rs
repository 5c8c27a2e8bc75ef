/*!
The `ibk` module supports Creative Labs IBK instrument banks: exactly 128
SBI instrument records followed by 128 nine-byte names.  There are no
events; the result is a song with a patch bank and nothing else.
!*/

use crate::byte_iter::ByteIter;
use crate::core::{Music, Patch};
use crate::error::Result;
use crate::format::sbi_patch::{read_sbi_instrument, write_sbi_instrument, SBI_INST_LEN};
use crate::format::{Caps, Certainty, MusicFormat, WriteFlags};
use crate::core::OplPatch;
use snafu::ResultExt;
use std::io::Read;

/// Number of instruments in a bank.
const IBK_INST_COUNT: usize = 128;

/// Length of each instrument name, in bytes.
const IBK_NAME_LEN: usize = 9;

/// Length of a whole .ibk file.
const IBK_LENGTH: usize = 4 + IBK_INST_COUNT * (SBI_INST_LEN + IBK_NAME_LEN);

pub struct FormatIbk;

impl MusicFormat for FormatIbk {
    fn code(&self) -> &'static str {
        "ibk-instrumentbank"
    }

    fn name(&self) -> &'static str {
        "IBK Instrument Bank"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ibk"]
    }

    fn caps(&self) -> Caps {
        Caps::INST_OPL
    }

    fn is_instance(&self, data: &[u8]) -> Certainty {
        // All banks are the same size.
        if data.len() != IBK_LENGTH {
            return Certainty::DefinitelyNo;
        }
        if !data.starts_with(b"IBK\x1A") {
            return Certainty::DefinitelyNo;
        }
        Certainty::DefinitelyYes
    }

    fn read(&self, data: &[u8]) -> Result<Music> {
        if data.len() < IBK_LENGTH {
            invalid_file!("IBK bank truncated");
        }
        let names = &data[4 + IBK_INST_COUNT * SBI_INST_LEN..];

        let mut music = Music::default();
        music.patches.reserve(IBK_INST_COUNT);
        let cursor = std::io::Cursor::new(&data[4..]);
        let mut iter = ByteIter::new(cursor.bytes()).context(io!())?;
        for i in 0..IBK_INST_COUNT {
            let mut patch = read_sbi_instrument(&mut iter)?;
            let name = &names[i * IBK_NAME_LEN..(i + 1) * IBK_NAME_LEN];
            let len = name.iter().position(|b| *b == 0).unwrap_or(IBK_NAME_LEN);
            patch.name = String::from_utf8_lossy(&name[..len]).into_owned();
            music.patches.push(Patch::Opl(patch));
        }

        Ok(music)
    }

    fn write(&self, out: &mut Vec<u8>, music: &Music, _flags: WriteFlags) -> Result<()> {
        if music.patches.len() > IBK_INST_COUNT {
            format_limitation!("IBK banks hold a maximum of 128 instruments");
        }
        for (i, patch) in music.patches.iter().enumerate() {
            if !matches!(patch, Patch::Opl(_)) {
                bad_patch!("IBK banks can only store OPL instruments (patch {})", i);
            }
        }

        out.extend_from_slice(b"IBK\x1A");

        let blank = OplPatch::default();
        let mut names = vec![0u8; IBK_INST_COUNT * IBK_NAME_LEN];
        for i in 0..IBK_INST_COUNT {
            let patch = match music.patches.get(i) {
                Some(Patch::Opl(p)) => p,
                _ => &blank,
            };
            write_sbi_instrument(out, patch)?;
            let name = patch.name.as_bytes();
            let len = name.len().min(IBK_NAME_LEN - 1);
            names[i * IBK_NAME_LEN..i * IBK_NAME_LEN + len].copy_from_slice(&name[..len]);
        }
        out.extend_from_slice(&names);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_round_trip() {
        let mut music = Music::default();
        let mut patch = OplPatch::default();
        patch.m.set_reg_20(0x31);
        patch.c.set_reg_40(0x54);
        patch.name = String::from("EPIANO");
        music.patches.push(Patch::Opl(patch));

        let mut out = Vec::new();
        FormatIbk.write(&mut out, &music, WriteFlags::DEFAULT).unwrap();
        assert_eq!(out.len(), IBK_LENGTH);
        assert_eq!(FormatIbk.is_instance(&out), Certainty::DefinitelyYes);

        let back = FormatIbk.read(&out).unwrap();
        assert_eq!(back.patches.len(), IBK_INST_COUNT);
        match &back.patches[0] {
            Patch::Opl(p) => {
                assert_eq!(p.name, "EPIANO");
                assert_eq!(p.m.reg_20(), 0x31);
                assert_eq!(p.c.reg_40(), 0x54);
            }
            other => panic!("wrong patch {:?}", other),
        }
    }
}
