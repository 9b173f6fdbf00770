use std::fs::{self, OpenOptions};
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use crate::backend::{Direction, Edge, PinBackend};

const GPIO_CLASS: &str = "/sys/class/gpio";

/// Pin I/O over the sysfs GPIO class interface.
#[derive(Debug, Clone)]
pub struct SysfsBackend {
    root: PathBuf,
}

impl SysfsBackend {
    pub fn new() -> Self {
        Self {
            root: GPIO_CLASS.into(),
        }
    }

    /// Override the class directory (bind-mounted or containerized sysfs).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn attr(&self, line: u16, name: &str) -> PathBuf {
        self.root.join(format!("gpio{}", line)).join(name)
    }
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PinBackend for SysfsBackend {
    fn export(&mut self, line: u16) -> io::Result<()> {
        match fs::write(self.root.join("export"), line.to_string()) {
            // EBUSY: the line is already exported, which is what we want.
            Err(err) if err.raw_os_error() == Some(libc::EBUSY) => Ok(()),
            other => other,
        }
    }

    fn unexport(&mut self, line: u16) -> io::Result<()> {
        fs::write(self.root.join("unexport"), line.to_string())
    }

    fn direction(&mut self, line: u16) -> io::Result<Direction> {
        let text = fs::read_to_string(self.attr(line, "direction"))?;
        match text.trim() {
            "in" => Ok(Direction::Input),
            "out" => Ok(Direction::Output),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected direction {:?}", other),
            )),
        }
    }

    fn set_direction(&mut self, line: u16, direction: Direction) -> io::Result<()> {
        let token = match direction {
            Direction::Input => "in",
            Direction::Output => "out",
            Direction::Undefined => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "no sysfs token for Undefined",
                ))
            }
        };
        fs::write(self.attr(line, "direction"), token)
    }

    fn value(&mut self, line: u16) -> io::Result<u8> {
        let text = fs::read_to_string(self.attr(line, "value"))?;
        text.trim().parse::<u8>().map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected value: {}", err),
            )
        })
    }

    fn set_value(&mut self, line: u16, value: u8) -> io::Result<()> {
        fs::write(self.attr(line, "value"), if value == 0 { "0" } else { "1" })
    }

    fn set_edge(&mut self, line: u16, edge: Edge) -> io::Result<()> {
        let token = match edge {
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        };
        fs::write(self.attr(line, "edge"), token)
    }

    fn clear_edge(&mut self, line: u16) -> io::Result<()> {
        fs::write(self.attr(line, "edge"), "none")
    }

    fn open_value_fd(&mut self, line: u16) -> io::Result<OwnedFd> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(self.attr(line, "value"))?;
        Ok(OwnedFd::from(file))
    }
}
