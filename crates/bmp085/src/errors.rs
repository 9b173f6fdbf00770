use std::fmt;

use millibar_gpio::PinError;

/// Driver errors. Configuration and usage mistakes surface here; register
/// transfer failures are logged where they happen and read back as zero so
/// the conversion cycle keeps running.
#[derive(Debug, derive_more::From)]
pub enum Error {
    /// Interrupt-driven acquisition needs an end-of-conversion pin.
    MissingEocPin,
    /// Blocking reads are unavailable while interrupt-driven acquisition
    /// is active.
    AsyncActive,
    /// Operation requires a successful `init` first.
    NotInitialized,
    /// Configuring one of the sensor's pins failed.
    #[from]
    Pin(PinError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingEocPin => {
                write!(f, "interrupt mode requires an end-of-conversion pin")
            }
            Error::AsyncActive => {
                write!(f, "blocking read while interrupt acquisition is active")
            }
            Error::NotInitialized => write!(f, "sensor is not initialized"),
            Error::Pin(err) => write!(f, "pin configuration failed: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Pin(err) => Some(err),
            _ => None,
        }
    }
}
