use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;

use tracing::debug;

use crate::bus::{BusError, RegisterBus};

// From <linux/i2c-dev.h>: selects the peripheral that subsequent plain
// read()/write() transfers talk to.
nix::ioctl_write_int_bad!(i2c_slave, 0x0703);

/// Register access over a Linux `/dev/i2c-N` adapter node.
///
/// Reads are the usual write-register-index-then-read sequence; writes send
/// index and value in one transfer. The selected peripheral address is
/// cached so back-to-back transfers to the same device skip the ioctl.
#[derive(Debug)]
pub struct I2cDevBus {
    dev: File,
    selected: Option<u8>,
}

impl I2cDevBus {
    /// Open adapter `bus`, i.e. `/dev/i2c-<bus>`.
    pub fn open(bus: u8) -> Result<Self, BusError> {
        let path = format!("/dev/i2c-{}", bus);
        let dev = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(BusError::Open)?;
        debug!(path = %path, "bus adapter open");
        Ok(Self {
            dev,
            selected: None,
        })
    }

    fn select(&mut self, addr: u8) -> Result<(), BusError> {
        if self.selected == Some(addr) {
            return Ok(());
        }
        // SAFETY: `dev` is a live, owned i2c-dev node and I2C_SLAVE takes
        // the peripheral address by value.
        unsafe { i2c_slave(self.dev.as_raw_fd(), addr as i32) }
            .map_err(|errno| BusError::Select(io::Error::from(errno)))?;
        self.selected = Some(addr);
        Ok(())
    }
}

impl RegisterBus for I2cDevBus {
    fn read_reg(&mut self, addr: u8, reg: u8) -> Result<u8, BusError> {
        self.select(addr)?;
        self.dev.write_all(&[reg]).map_err(BusError::Transfer)?;
        let mut value = [0u8; 1];
        self.dev.read_exact(&mut value).map_err(BusError::Transfer)?;
        Ok(value[0])
    }

    fn write_reg(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), BusError> {
        self.select(addr)?;
        self.dev
            .write_all(&[reg, value])
            .map_err(BusError::Transfer)
    }
}
