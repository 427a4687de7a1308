use crate::error::Error;
use x11rb::errors::*;

impl From<ConnectError> for Error {
    fn from(e: ConnectError) -> Self {
        Error::Other(format!("cannot connect to the X11 server: {}", e))
    }
}

impl From<ConnectionError> for Error {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::MaximumRequestLengthExceeded => Error::Other(
                "a request larger than the maximum X11 server request length was sent".to_owned(),
            ),
            ConnectionError::FDPassingFailed => {
                Error::Other("failed to pass file descriptor to the X11 server".to_owned())
            }
            ConnectionError::IOError(io) => Error::IO(io),
            e => Error::Other(format!("X11 connection error: {:?}", e)),
        }
    }
}

impl From<ReplyError> for Error {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::ConnectionError(e) => Self::from(e),
            ReplyError::X11Error(e) => Error::Other(format!("{:?}", e)),
        }
    }
}

impl From<ReplyOrIdError> for Error {
    fn from(e: ReplyOrIdError) -> Self {
        match e {
            ReplyOrIdError::ConnectionError(e) => Self::from(e),
            e => Error::Other(format!("{:?}", e)),
        }
    }
}
