use std::{fmt, io};

/// Byte-wide register access on an addressed bus peripheral.
pub trait RegisterBus {
    fn read_reg(&mut self, addr: u8, reg: u8) -> Result<u8, BusError>;
    fn write_reg(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), BusError>;
}

/// Errors from a register transaction.
#[derive(Debug)]
pub enum BusError {
    /// Opening the adapter device node failed.
    Open(io::Error),
    /// Selecting the target peripheral failed.
    Select(io::Error),
    /// The register transfer failed or transferred short.
    Transfer(io::Error),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Open(err) => write!(f, "could not open bus adapter: {}", err),
            BusError::Select(err) => {
                write!(f, "could not select bus peripheral: {}", err)
            }
            BusError::Transfer(err) => write!(f, "register transfer failed: {}", err),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BusError::Open(err) | BusError::Select(err) | BusError::Transfer(err) => {
                Some(err)
            }
        }
    }
}
