use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Emberdb errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An offset or slice fell outside the region it is confined to: a header
    /// shorter than expected, an index address outside the index band, or a
    /// record slice past the end of a buffer.
    OutOfBounds(String),
    /// Every probe block for the given key's (or prefix's) hash slot is
    /// occupied by records belonging to other keys.
    CollisionSaturation(String),
    /// The store was opened without the capability this operation needs.
    Unsupported(String),
    /// An IO error.
    IO(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::OutOfBounds(msg) => write!(f, "out of bounds: {msg}"),
            Error::CollisionSaturation(msg) => write!(f, "collision saturation: {msg}"),
            Error::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl Error {
    /// All probe slots for this key's (or prefix's) hash are taken.
    pub(crate) fn collision_saturation(key: &[u8]) -> Self {
        Error::CollisionSaturation(format!("no free slot for {}", String::from_utf8_lossy(key)))
    }
}

/// Constructs an Error::OutOfBounds for the given format string.
#[macro_export]
macro_rules! errbounds {
    ($($args:tt)*) => { $crate::error::Error::OutOfBounds(format!($($args)*)).into() };
}

/// An emberdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}
