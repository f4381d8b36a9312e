use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    /// No metadata record exists for the named file.
    NotFound(String),
    /// The backing store could not complete the call. Never retried here.
    Backend(String),
    /// A translation-based copy was requested between incompatible stores.
    InvalidFastCopy(String),
    InvalidData(String),
    InvalidState(String),
    InvalidConfig(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::IoError(err) => err,
            Error::NotFound(name) => io::Error::new(io::ErrorKind::NotFound, name),
            other => io::Error::other(other),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::NotFound(key) => write!(f, "No such file: {}", key),
            Error::Backend(msg) => write!(f, "Backend unavailable: {}", msg),
            Error::InvalidFastCopy(msg) => write!(f, "Fast copy not possible: {}", msg),
            Error::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
