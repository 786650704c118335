use std::{error, fmt, result};

/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the error
/// location, and a message describing the error.
#[derive(Clone, Debug)]
pub enum Error {
    Fatal(String, String),
    FailConvert(String, String),
    FailCbor(String, String),
    FailJson(String, String),
    FailScript(String, String),
    IOError(String, String),
    IPCFail(String, String),
    ThreadFail(String, String),
    InvalidInput(String, String),
    InvalidFile(String, String),
    KeyNotFound(String, String),
    InvalidCAS(String, String),
    QuotaExceeded(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            Fatal(p, msg) => write!(f, "Fatal:{} {}", p, msg),
            FailConvert(p, msg) => write!(f, "FailConvert:{} {}", p, msg),
            FailCbor(p, msg) => write!(f, "FailCbor:{} {}", p, msg),
            FailJson(p, msg) => write!(f, "FailJson:{} {}", p, msg),
            FailScript(p, msg) => write!(f, "FailScript:{} {}", p, msg),
            IOError(p, msg) => write!(f, "IOError:{} {}", p, msg),
            IPCFail(p, msg) => write!(f, "IPCFail:{} {}", p, msg),
            ThreadFail(p, msg) => write!(f, "ThreadFail:{} {}", p, msg),
            InvalidInput(p, msg) => write!(f, "InvalidInput:{} {}", p, msg),
            InvalidFile(p, msg) => write!(f, "InvalidFile:{} {}", p, msg),
            KeyNotFound(p, msg) => write!(f, "KeyNotFound:{} {}", p, msg),
            InvalidCAS(p, msg) => write!(f, "InvalidCAS:{} {}", p, msg),
            QuotaExceeded(p, msg) => write!(f, "QuotaExceeded:{} {}", p, msg),
        }
    }
}

impl error::Error for Error {}

// Equality is on the variant alone, the payload only locates the error.
impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
