/*!
The `sbi_patch` module packs and unpacks the 16-byte SBI instrument record
shared by the SBI, IBK and CMF formats.
!*/

use crate::byte_iter::ByteIter;
use crate::core::{OplOperator, OplPatch, Rhythm};
use crate::error::LibResult;
use snafu::ResultExt;
use std::io::{Read, Write};

/// Length of one instrument record, in bytes.
pub(crate) const SBI_INST_LEN: usize = 16;

fn unpack_operator(op: &mut OplOperator, inst: &[u8], offset: usize) {
    op.set_reg_20(inst[offset]);
    op.set_reg_40(inst[2 + offset]);
    op.set_reg_60(inst[4 + offset]);
    op.set_reg_80(inst[6 + offset]);
    op.set_reg_e0(inst[8 + offset]);
}

fn pack_operator(op: &OplOperator, inst: &mut [u8], offset: usize) {
    inst[offset] = op.reg_20();
    inst[2 + offset] = op.reg_40();
    inst[4 + offset] = op.reg_60();
    inst[6 + offset] = op.reg_80();
    inst[8 + offset] = op.reg_e0();
}

/// Read one 16-byte SBI instrument record.
pub(crate) fn read_sbi_instrument<R: Read>(iter: &mut ByteIter<R>) -> LibResult<OplPatch> {
    let inst = iter.read_n(SBI_INST_LEN).context(io!())?;
    let mut patch = OplPatch::default();
    unpack_operator(&mut patch.m, &inst, 0);
    unpack_operator(&mut patch.c, &inst, 1);
    patch.set_reg_c0(inst[10]);
    patch.rhythm = Rhythm::Melodic;
    Ok(patch)
}

/// Write one 16-byte SBI instrument record.  The five trailing bytes are
/// reserved and written as zero.
pub(crate) fn write_sbi_instrument<W: Write>(w: &mut W, patch: &OplPatch) -> LibResult<()> {
    let mut inst = [0u8; SBI_INST_LEN];
    pack_operator(&patch.m, &mut inst, 0);
    pack_operator(&patch.c, &mut inst, 1);
    inst[10] = patch.reg_c0();
    w.write_all(&inst).context(wr!())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip() {
        let mut patch = OplPatch::default();
        patch.m.set_reg_20(0x31);
        patch.m.set_reg_40(0xA1);
        patch.m.set_reg_60(0x1C);
        patch.m.set_reg_80(0x80);
        patch.c.set_reg_20(0x51);
        patch.c.set_reg_40(0x54);
        patch.c.set_reg_60(0x03);
        patch.c.set_reg_80(0x67);
        patch.set_reg_c0(0x0E);

        let mut bytes = Vec::new();
        write_sbi_instrument(&mut bytes, &patch).unwrap();
        assert_eq!(bytes.len(), SBI_INST_LEN);
        assert_eq!(bytes[0], 0x31);
        assert_eq!(bytes[1], 0x51);
        assert_eq!(bytes[10], 0x0E);

        let cursor = Cursor::new(bytes);
        let mut iter = ByteIter::new(cursor.bytes()).unwrap();
        let back = read_sbi_instrument(&mut iter).unwrap();
        assert!(back.same_sound(&patch));
    }
}
