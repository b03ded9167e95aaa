//! Error types for intel-gpu-top

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for intel-gpu-top operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while sampling Intel GPU telemetry
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The requested device filter matched no card
    #[error("Requested device {filter} not found!")]
    DeviceNotFound {
        /// The filter expression that matched nothing
        filter: String,
    },

    /// No card was found at all (no filter given)
    #[error("No device filter specified and no discrete/integrated i915 devices found")]
    NoDevice,

    /// The per-device events directory is missing or empty
    #[error(
        "Failed to detect engines on {device}! \
         (Kernel 4.16 or newer is required for i915 PMU support.)"
    )]
    PmuUnsupported {
        /// The PMU sysfs unit that was probed
        device: String,
    },

    /// The kernel rejected a perf event open
    #[error("Failed to open perf event {event}: {source}")]
    CounterOpenRefused {
        /// Human-readable event name
        event: String,
        /// The underlying OS error
        source: io::Error,
    },

    /// A grouped read returned an unexpected number of bytes
    #[error("Short read on counter group: expected {expected} bytes, got {got}")]
    ShortRead {
        /// Bytes the group layout requires
        expected: usize,
        /// Bytes the kernel returned
        got: usize,
    },

    /// A sysfs metadata file was missing or did not parse
    #[error("Failed to parse sysfs data at {path}: {message}")]
    Parse {
        /// The sysfs path that failed
        path: PathBuf,
        /// Description of the failure
        message: String,
    },

    /// An event scale file held a zero or non-finite multiplier
    #[error("Bad scale {value} for event at {path}")]
    BadScale {
        /// The `.scale` file that was read
        path: PathBuf,
        /// The offending value
        value: f64,
    },

    /// A sysfs event file name exceeded the supported length
    #[error("Event name too long: {name}")]
    NameTooLong {
        /// The offending file name
        name: String,
    },

    /// Terminal setup or teardown failed
    #[error("Terminal I/O error: {0}")]
    TerminalIo(io::Error),

    /// Any other I/O failure
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns true if this error leaves sampling impossible
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::TerminalIo(_))
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Parse {
            path: path.into(),
            message: message.into(),
        }
    }
}
