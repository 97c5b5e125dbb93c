use std::path::PathBuf;

use snafu::{Location, Snafu};

use crate::status::Status;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The compute API reported a non-success status.
    #[snafu(display("{operation} failed: {status} at {location}"))]
    Api {
        operation: &'static str,
        status: Status,
        #[snafu(implicit)]
        location: Location,
    },

    /// Platform enumeration succeeded but returned nothing.
    #[snafu(display("no compute platforms available"))]
    NoPlatforms,

    /// No (context, device) pair survived platform selection.
    #[snafu(display("no compute device matched the selection policy ({platforms} platforms scanned)"))]
    NoDevices { platforms: usize },

    /// Execution target index past the retained targets.
    #[snafu(display("execution target {index} out of range ({count} available)"))]
    TargetIndex { index: usize, count: usize },

    /// Program source could not be read.
    #[snafu(display("failed to read program source {}: {source}", path.display()))]
    ReadSource { path: PathBuf, source: std::io::Error },

    /// An include directory or definition would split into several option tokens.
    #[snafu(display("build option {option:?} contains whitespace"))]
    InvalidBuildOption { option: String },

    /// Device compiler rejected the program; `log` holds its diagnostics.
    #[snafu(display("program {} failed to build:\n{log}", path.display()))]
    BuildFailed { path: PathBuf, log: String },

    /// Transfer range does not fit the buffer.
    #[snafu(display("transfer out of bounds: offset {offset} + size {size} exceeds buffer size {buffer_size}"))]
    OutOfBounds { offset: usize, size: usize, buffer_size: usize },

    /// Buffer was moved from and no longer has a host or device region.
    #[snafu(display("buffer has been moved from"))]
    Detached,

    /// Environment configuration could not be parsed.
    #[snafu(display("invalid value for {key}: {value:?}"))]
    InvalidConfig { key: &'static str, value: String },
}

impl Error {
    /// Underlying compute API status, if this error came from the API.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Lifts a raw backend status into [`Error::Api`], recording the caller's location.
pub(crate) trait StatusResultExt<T> {
    fn api(self, operation: &'static str) -> Result<T>;
}

impl<T> StatusResultExt<T> for std::result::Result<T, Status> {
    #[track_caller]
    fn api(self, operation: &'static str) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(status) => ApiSnafu { operation, status }.fail(),
        }
    }
}
