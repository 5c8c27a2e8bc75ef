/*!
The `opl` module contains the register-level codec for the Yamaha OPL2/OPL3
family: lowering a raw register stream into the song model and raising it
back, plus the rhythm-patch normalisation that bridges the operator-layout
conventions different files use.
!*/

pub(crate) mod adlib;
pub(crate) mod decode;
pub(crate) mod encode;
pub(crate) mod event;
mod normalise;
pub(crate) mod util;

pub use decode::opl_decode;
pub use encode::{opl_encode, OplWriteFlags};
pub use event::{valid, DelayType, OplEvent, OplReader, OplWriter};
pub use normalise::{opl_denormalise_perc, opl_normalise_perc, NormaliseStyle};
pub use util::{fnum_to_milli_hertz, milli_hertz_to_fnum, OPL_FNUM_DEFAULT};
