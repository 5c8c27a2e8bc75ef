/*!
The `macros` module provides macros for internal use.
!*/

///
macro_rules! write_u8 {
    ($w:expr, $val:expr) => {
        $w.write_all(&[$val]).context(wr!())
    };
}

/// The DOS-era containers store their multi-byte fields little-endian.
macro_rules! write_u16_le {
    ($w:expr, $val:expr) => {
        $w.write_all(&u16::to_le_bytes($val)).context(wr!())
    };
}

macro_rules! write_u32_le {
    ($w:expr, $val:expr) => {
        $w.write_all(&u32::to_le_bytes($val)).context(wr!())
    };
}
