use std::io;
use std::os::fd::OwnedFd;

/// Configured direction of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Not yet read from or written to the hardware.
    #[default]
    Undefined,
    Input,
    Output,
}

/// Which signal transition raises an edge event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

/// Raw line-I/O collaborator.
///
/// Covers exactly the textual line manipulation the platform exposes:
/// export/unexport, direction, value, edge selection, and opening a
/// non-blocking value descriptor for edge polling. [`DigitalPin`] layers
/// the state machine and listener bookkeeping on top.
///
/// [`DigitalPin`]: crate::DigitalPin
pub trait PinBackend {
    fn export(&mut self, line: u16) -> io::Result<()>;
    fn unexport(&mut self, line: u16) -> io::Result<()>;

    fn direction(&mut self, line: u16) -> io::Result<Direction>;
    fn set_direction(&mut self, line: u16, direction: Direction) -> io::Result<()>;

    fn value(&mut self, line: u16) -> io::Result<u8>;
    fn set_value(&mut self, line: u16, value: u8) -> io::Result<()>;

    fn set_edge(&mut self, line: u16, edge: Edge) -> io::Result<()>;
    fn clear_edge(&mut self, line: u16) -> io::Result<()>;

    /// Open the line's value descriptor non-blocking, for edge polling.
    fn open_value_fd(&mut self, line: u16) -> io::Result<OwnedFd>;
}
