use std::fmt::Display;
use std::{fmt, io, result};
use std::net::AddrParseError;
use std::sync::PoisonError;

#[derive(Debug, PartialEq, Eq)]
pub struct Error {
    err: Box<ErrorKind>, // use a Box to keep the Result type smaller
}

#[derive(Debug)]
pub enum ErrorKind {
    /// the durable buffer's backing store rejected or lost an operation
    BufferError(String),
    /// a single event exceeded `max_payload_bytes` and was dropped
    PayloadTooLarge { len: usize, max: usize },
    /// the transport closed, timed out, or failed a handshake
    TransportError(String),
    Timeout,
    PoisonError,
    ClosedError,
    StringError(String),
    IOError(io::Error),
    YamlError(serde_yaml::Error),
    SqliteError(rusqlite::Error),
    TlsError(rustls::Error),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn new<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(s.to_string())),
        }
    }

    pub fn buffer<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::BufferError(s.to_string())),
        }
    }

    pub fn transport<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::TransportError(s.to_string())),
        }
    }

    pub fn payload_too_large(len: usize, max: usize) -> Self {
        Error {
            err: Box::new(ErrorKind::PayloadTooLarge { len, max }),
        }
    }

    pub fn timeout() -> Self {
        Error {
            err: Box::new(ErrorKind::Timeout),
        }
    }

    pub fn closed() -> Self {
        Error {
            err: Box::new(ErrorKind::ClosedError),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(String::from(err))),
        }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(err)),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error {
            err: Box::new(ErrorKind::IOError(err)),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error {
            err: Box::new(ErrorKind::YamlError(err)),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error {
            err: Box::new(ErrorKind::SqliteError(err)),
        }
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error {
            err: Box::new(ErrorKind::TlsError(err)),
        }
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::new(err)
    }
}

impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(_err: PoisonError<Guard>) -> Self {
        Error {
            err: Box::new(ErrorKind::PoisonError),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.err, f)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::BufferError(s) => write!(f, "durable buffer error: {}", s),
            ErrorKind::PayloadTooLarge { len, max } => {
                write!(f, "event payload of {} bytes exceeds max_payload_bytes ({})", len, max)
            }
            ErrorKind::TransportError(s) => write!(f, "transport error: {}", s),
            ErrorKind::ClosedError => f.write_str("socket/file is closed"),
            ErrorKind::PoisonError => f.write_str("another thread panicked while holding the lock"),
            ErrorKind::StringError(s) => f.write_str(s),
            ErrorKind::IOError(e) => Display::fmt(&e, f),
            ErrorKind::YamlError(e) => Display::fmt(&e, f),
            ErrorKind::SqliteError(e) => Display::fmt(&e, f),
            ErrorKind::TlsError(e) => Display::fmt(&e, f),
            ErrorKind::Timeout => f.write_str("operation timed out"),
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for ErrorKind {}
