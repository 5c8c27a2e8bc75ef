use snafu::Snafu;

/// The public Error type for this library.
#[derive(Debug, Snafu)]
pub struct Error(LibError);

/// The public Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

/// The internal Result type for this library.
pub(crate) type LibResult<T> = std::result::Result<T, LibError>;

/// The internal Error type for this library.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum LibError {
    #[snafu(display("Error while reading bytes: {}", source))]
    Io {
        site: String,
        source: crate::byte_iter::ByteError,
    },

    #[snafu(display("{}: Error while writing bytes: {}", site, source))]
    Write {
        site: String,
        source: std::io::Error,
    },

    #[snafu(display("{}: The music file is invalid: {}", site, description))]
    InvalidFile { site: String, description: String },

    #[snafu(display(
        "{}: The song cannot be expressed in the target format: {}",
        site,
        description
    ))]
    FormatLimitation { site: String, description: String },

    #[snafu(display(
        "{}: A track referenced a patch of the wrong type: {}",
        site,
        description
    ))]
    BadPatchType { site: String, description: String },

    #[snafu(display(
        "{}: A running status byte was encountered before any status byte",
        site
    ))]
    RunningStatus { site: String },

    #[snafu(display("{}: The track data is too long to be written", site))]
    TrackTooLong { site: String },

    #[snafu(display("{} unknown error", site))]
    Other { site: String },
}

impl LibError {
    /// Returns true if the failure means the target format cannot hold the
    /// song, as opposed to the song itself being broken.  Callers use this to
    /// fall back to a different format.
    pub(crate) fn is_format_limitation(&self) -> bool {
        matches!(self, LibError::FormatLimitation { .. })
    }
}

impl Error {
    /// Returns true if the failure was a format limitation on write.
    pub fn is_format_limitation(&self) -> bool {
        self.0.is_format_limitation()
    }
}

macro_rules! site {
    () => {
        format!("{}:{}", file!(), line!())
    };
}

macro_rules! io {
    () => {
        crate::error::IoSnafu { site: site!() }
    };
}

macro_rules! wr {
    () => {
        crate::error::WriteSnafu { site: site!() }
    };
}

macro_rules! invalid_file_s {
    () => {
        crate::error::InvalidFileSnafu {
            site: site!(),
            description: "[no description]",
        }
    };
    ($msg:expr) => {
        crate::error::InvalidFileSnafu {
            site: site!(),
            description: $msg,
        }
    };
    ($fmt:expr, $($arg:expr),+) => {
        crate::error::InvalidFileSnafu {
            site: site!(),
            description: format!($fmt, $($arg),+),
        }
    };
}

macro_rules! invalid_file_e {
    () => {
        invalid_file_s!().build()
    };
    ($msg:expr) => {
        invalid_file_s!($msg).build()
    };
    ($fmt:expr, $($arg:expr),+) => {
        invalid_file_s!($fmt, $($arg),+).build()
    };
}

// The Err payload converts with `into` so the macros work in functions
// returning either the internal or the public error type.
macro_rules! invalid_file_r {
    () => {
        Err(invalid_file_e!().into())
    };
    ($msg:expr) => {
        Err(invalid_file_e!($msg).into())
    };
    ($fmt:expr, $($arg:expr),+) => {
        Err(invalid_file_e!($fmt, $($arg),+).into())
    };
}

macro_rules! invalid_file {
    () => {
        return invalid_file_r!();
    };
    ($msg:expr) => {
        return invalid_file_r!($msg)
    };
    ($fmt:expr, $($arg:expr),+) => {
        return invalid_file_r!($fmt, $($arg),+)
    };
}

macro_rules! format_limitation {
    ($msg:expr) => {
        return Err(crate::error::FormatLimitationSnafu {
            site: site!(),
            description: $msg,
        }
        .build()
        .into())
    };
    ($fmt:expr, $($arg:expr),+) => {
        return Err(crate::error::FormatLimitationSnafu {
            site: site!(),
            description: format!($fmt, $($arg),+),
        }
        .build()
        .into())
    };
}

macro_rules! bad_patch {
    ($msg:expr) => {
        return Err(crate::error::BadPatchTypeSnafu {
            site: site!(),
            description: $msg,
        }
        .build()
        .into())
    };
    ($fmt:expr, $($arg:expr),+) => {
        return Err(crate::error::BadPatchTypeSnafu {
            site: site!(),
            description: format!($fmt, $($arg),+),
        }
        .build()
        .into())
    };
}

#[test]
fn site_test() {
    let line = line!() + 1;
    let site = site!();
    assert!(site.contains("error.rs"));
    assert!(site.contains(format!("{}", line).as_str()));
}

#[test]
fn invalid_file_macros_test_no_message() {
    fn foo() -> LibResult<u64> {
        invalid_file!();
    }
    let result = foo();
    assert!(result.is_err());
    let message = format!("{}", result.err().unwrap());
    assert!(message.as_str().contains("The music file is invalid"));
}

#[test]
fn invalid_file_macros_test_message() {
    fn foo() -> LibResult<u64> {
        let flerbin = String::from("flerbin");
        invalid_file!(flerbin);
    }
    let result = foo();
    assert!(result.is_err());
    let message = format!("{}", result.err().unwrap());
    assert!(message.as_str().contains("flerbin"));
}

#[test]
fn invalid_file_macros_test_fmt() {
    fn foo() -> LibResult<u64> {
        invalid_file!("hello {}, {}", "world", String::from("foo"));
    }
    let result = foo();
    assert!(result.is_err());
    let message = format!("{}", result.err().unwrap());
    assert!(message.as_str().contains("hello world, foo"));
}

#[test]
fn format_limitation_macro_test() {
    fn foo() -> LibResult<u64> {
        format_limitation!("too many {}", "channels");
    }
    let result = foo();
    assert!(result.is_err());
    let e = result.err().unwrap();
    assert!(e.is_format_limitation());
    let message = format!("{}", e);
    assert!(message.as_str().contains("too many channels"));
}
