/*!
The `adlib` module reads the 28-field instrument layout used by AdLib's own
tools (MDI meta events, BNK-style banks): one byte per register field, both
operators, with the waveform selects trailing at the end.
!*/

use crate::byte_iter::ByteIter;
use crate::core::{OplOperator, OplPatch, Rhythm};
use crate::error::LibResult;
use snafu::ResultExt;
use std::io::Read;

fn read_operator<R: Read>(
    iter: &mut ByteIter<R>,
) -> LibResult<(OplOperator, u8, bool)> {
    let bytes = iter.read_n(13).context(io!())?;
    let mut o = OplOperator::default();
    o.scale_level = bytes[0] & 0x03;
    o.freq_mult = bytes[1] & 0x0F;
    let feedback = bytes[2] & 0x07;
    o.attack_rate = bytes[3] & 0x0F;
    o.sustain_rate = bytes[4] & 0x0F;
    o.enable_sustain = bytes[5] != 0;
    o.decay_rate = bytes[6] & 0x0F;
    o.release_rate = bytes[7] & 0x0F;
    o.output_level = bytes[8] & 0x3F;
    o.enable_tremolo = bytes[9] != 0;
    o.enable_vibrato = bytes[10] != 0;
    o.enable_ksr = bytes[11] != 0;
    // The connection field is an "is additive" flag, the inverse of the
    // register bit.
    let connection = bytes[12] == 0;
    Ok((o, feedback, connection))
}

/// Read a 28-byte AdLib instrument definition.  Each operator stores its own
/// feedback/connection copy; the official docs say to use the modulator's
/// and ignore the carrier's.
pub(crate) fn read_adlib_patch<R: Read>(iter: &mut ByteIter<R>) -> LibResult<OplPatch> {
    let mut patch = OplPatch::default();
    let (m, feedback, connection) = read_operator(iter)?;
    let (c, _feedback, _connection) = read_operator(iter)?;
    patch.m = m;
    patch.c = c;
    patch.feedback = feedback;
    patch.connection = connection;
    patch.m.wave_select = iter.read_or_die().context(io!())? & 0x07;
    patch.c.wave_select = iter.read_or_die().context(io!())? & 0x07;
    patch.rhythm = Rhythm::Melodic;
    Ok(patch)
}
