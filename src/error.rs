use crate::handle::Kind;
use std::{fmt, io};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid {0} handle (null, destroyed or issued elsewhere)")]
    InvalidHandle(Kind),
    #[error("unsupported hint: {0}")]
    UnsupportedHint(String),
    #[error("unsupported value `{value}` for {property}")]
    UnsupportedValue {
        property: &'static str,
        value: String,
    },
    #[error("`{0}` is not supported by this driver")]
    NotSupported(&'static str),
    #[error("no graphics context is current on this thread")]
    NoCurrentContext,
    #[error("the surface was replaced or destroyed")]
    StaleSurface,
    #[error("graphics context lost")]
    ContextLost,
    #[error("{call} failed with {code}")]
    Native {
        call: &'static str,
        code: NativeError,
    },
    #[error("the event queue consumer is gone")]
    Disconnected,
    #[error("IO error")]
    IO(#[from] io::Error),
    #[error("`{0}`")]
    Other(String),
}

impl Error {
    /// Whether a render thread can keep going after seeing this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::ContextLost | Error::Disconnected)
    }
}

/// Error codes reported by the native graphics layer through its "last error" slot.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum NativeError {
    Success,
    NotInitialized,
    BadAccess,
    BadAlloc,
    BadConfig,
    BadContext,
    BadSurface,
    BadNativeWindow,
    BadMatch,
    BadParameter,
    ContextLost,
}

impl NativeError {
    pub fn code(self) -> u32 {
        match self {
            NativeError::Success => 0x3000,
            NativeError::NotInitialized => 0x3001,
            NativeError::BadAccess => 0x3002,
            NativeError::BadAlloc => 0x3003,
            NativeError::BadConfig => 0x3005,
            NativeError::BadContext => 0x3006,
            NativeError::BadMatch => 0x3009,
            NativeError::BadNativeWindow => 0x300B,
            NativeError::BadParameter => 0x300C,
            NativeError::BadSurface => 0x300D,
            NativeError::ContextLost => 0x300E,
        }
    }
}

impl Default for NativeError {
    fn default() -> Self {
        NativeError::Success
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:#06x})", self, self.code())
    }
}
