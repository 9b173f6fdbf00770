use std::{fmt, io};

use crate::backend::{Direction, Edge};

/// Errors surfaced by the pin layer.
#[derive(Debug, derive_more::From)]
pub enum PinError {
    /// The backend failed to export, configure, or transfer.
    #[from]
    Io(io::Error),
    /// The pin has not been initialized.
    NotInitialized,
    /// Operation requires a direction the pin is not configured for.
    Direction {
        required: Direction,
        actual: Direction,
    },
    /// A pin cannot be configured as `Undefined`.
    UndefinedDirection,
    /// The pin is armed; its value descriptor is dedicated to edge polling.
    Armed,
    /// The pin is already armed with a different edge selection.
    EdgeConflict { armed: Edge, requested: Edge },
    /// Arming requires a dispatcher, and none was supplied at construction.
    NoDispatcher,
    /// The listener token is not registered on this pin.
    UnknownListener,
}

impl fmt::Display for PinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinError::Io(err) => write!(f, "line I/O failed: {}", err),
            PinError::NotInitialized => write!(f, "pin is not initialized"),
            PinError::Direction { required, actual } => write!(
                f,
                "operation requires direction {:?} but pin is {:?}",
                required, actual
            ),
            PinError::UndefinedDirection => {
                write!(f, "cannot configure a pin as Undefined")
            }
            PinError::Armed => {
                write!(f, "operation unavailable while armed for interrupts")
            }
            PinError::EdgeConflict { armed, requested } => write!(
                f,
                "pin already armed for {:?} edges, {:?} requested",
                armed, requested
            ),
            PinError::NoDispatcher => {
                write!(f, "pin was constructed without a dispatcher")
            }
            PinError::UnknownListener => {
                write!(f, "listener is not registered on this pin")
            }
        }
    }
}

impl std::error::Error for PinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PinError::Io(err) => Some(err),
            _ => None,
        }
    }
}
