use std::{fmt, io};

/// Errors that can occur while managing the dispatch thread.
#[derive(Debug)]
pub enum MuxError {
    /// The dispatch thread could not be spawned.
    Spawn(io::Error),
}

impl fmt::Display for MuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuxError::Spawn(err) => {
                write!(f, "could not spawn dispatch thread: {}", err)
            }
        }
    }
}

impl std::error::Error for MuxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MuxError::Spawn(err) => Some(err),
        }
    }
}
