use std::fmt::{self, Debug, Display, Formatter};
use std::io;

use static_assertions::assert_impl_all;

use crate::error::Error;

/// ErrorKind categorizes possible errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    InvalidArgument,
    NoRuntime,

    Deleted,
    Finished,
    Overflow,
    NoSpace,
    OutOfResources,

    Cancelled,
    BackendFailure,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match *self {
            InvalidArgument => "invalid argument",
            NoRuntime => "no tokio runtime in current context",

            Deleted => "message digest deleted",
            Finished => "message digest already fed with last chunk",
            Overflow => "accumulated feed size overflow",
            NoSpace => "feed size exceeded",
            OutOfResources => "out of resources",

            Cancelled => "cancelled",
            BackendFailure => "digest backend failure",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::result::Result<(), fmt::Error> {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorKind {}

assert_impl_all!(ErrorKind: Display, std::error::Error, Send, Sync);

pub type DigestError = Error<ErrorKind>;
pub type Result<T> = std::result::Result<T, DigestError>;

assert_impl_all!(DigestError: Clone, std::error::Error, Send, Sync);

impl DigestError {
    pub(crate) fn from_backend(err: io::Error) -> DigestError {
        DigestError::new(ErrorKind::BackendFailure).cause_by(err)
    }
}

/// Transient backend errors ask for a retry at next scheduling opportunity.
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}
