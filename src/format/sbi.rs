/*!
The `sbi` module supports the single-instrument SBI file: a signature, a
32-byte instrument name, and one 16-byte instrument record.
!*/

use crate::byte_iter::ByteIter;
use crate::core::{Music, OplPatch, Patch};
use crate::error::Result;
use crate::format::sbi_patch::{read_sbi_instrument, write_sbi_instrument, SBI_INST_LEN};
use crate::format::{Caps, Certainty, MusicFormat, WriteFlags};
use snafu::ResultExt;
use std::io::Read;

/// Length of the name field, in bytes.
const SBI_NAME_LEN: usize = 32;

/// Length of a whole .sbi file.
const SBI_LENGTH: usize = 4 + SBI_NAME_LEN + SBI_INST_LEN;

pub struct FormatSbi;

impl MusicFormat for FormatSbi {
    fn code(&self) -> &'static str {
        "sbi-creativelabs"
    }

    fn name(&self) -> &'static str {
        "SBI Instrument"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["sbi"]
    }

    fn caps(&self) -> Caps {
        Caps::INST_OPL
    }

    fn is_instance(&self, data: &[u8]) -> Certainty {
        if data.len() != SBI_LENGTH {
            return Certainty::DefinitelyNo;
        }
        if !data.starts_with(b"SBI\x1A") {
            return Certainty::DefinitelyNo;
        }
        Certainty::DefinitelyYes
    }

    fn read(&self, data: &[u8]) -> Result<Music> {
        if data.len() < SBI_LENGTH {
            invalid_file!("SBI file truncated");
        }
        let name = &data[4..4 + SBI_NAME_LEN];
        let len = name.iter().position(|b| *b == 0).unwrap_or(SBI_NAME_LEN);

        let cursor = std::io::Cursor::new(&data[4 + SBI_NAME_LEN..]);
        let mut iter = ByteIter::new(cursor.bytes()).context(io!())?;
        let mut patch = read_sbi_instrument(&mut iter)?;
        patch.name = String::from_utf8_lossy(&name[..len]).into_owned();

        let mut music = Music::default();
        music.patches.push(Patch::Opl(patch));
        Ok(music)
    }

    fn write(&self, out: &mut Vec<u8>, music: &Music, _flags: WriteFlags) -> Result<()> {
        let patch: &OplPatch = match music.patches.first() {
            Some(Patch::Opl(p)) => p,
            Some(_) => bad_patch!("SBI files can only store an OPL instrument"),
            None => invalid_file!("no instrument to write"),
        };

        out.extend_from_slice(b"SBI\x1A");
        let mut name = [0u8; SBI_NAME_LEN];
        let bytes = patch.name.as_bytes();
        let len = bytes.len().min(SBI_NAME_LEN - 1);
        name[..len].copy_from_slice(&bytes[..len]);
        out.extend_from_slice(&name);
        write_sbi_instrument(out, patch)?;
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
        patch.m.set_reg_20(0xE1);
        patch.set_reg_c0(0x0A);
        patch.name = String::from("Strings");
        music.patches.push(Patch::Opl(patch));

        let mut out = Vec::new();
        FormatSbi.write(&mut out, &music, WriteFlags::DEFAULT).unwrap();
        assert_eq!(out.len(), SBI_LENGTH);
        assert_eq!(FormatSbi.is_instance(&out), Certainty::DefinitelyYes);

        let back = FormatSbi.read(&out).unwrap();
        match &back.patches[0] {
            Patch::Opl(p) => {
                assert_eq!(p.name, "Strings");
                assert_eq!(p.m.reg_20(), 0xE1);
                assert_eq!(p.reg_c0(), 0x0A);
            }
            other => panic!("wrong patch {:?}", other),
        }
    }
}
