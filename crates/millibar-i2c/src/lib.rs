//! Register-oriented serial bus access.
//!
//! Peripherals on the board expose byte-wide registers behind a bus
//! address. The [`RegisterBus`] trait captures exactly that surface so
//! drivers stay independent of the transport; [`I2cDevBus`] is the
//! on-target implementation over a `/dev/i2c-N` adapter node.

mod bus;
mod i2cdev;

pub use bus::{BusError, RegisterBus};
pub use i2cdev::I2cDevBus;
