//! Digital pin layer for an embedded Linux board.
//!
//! A [`DigitalPin`] is one exported line: a direction, plain value I/O, and
//! optional edge-interrupt arming. Arming opens the line's value descriptor
//! non-blocking, selects an edge, and registers a single trampoline with an
//! [`irq_mux::IrqMux`]; any number of pin-level listeners share that one
//! registration and are fanned out in registration order on the dispatch
//! thread.
//!
//! All textual sysfs manipulation sits behind the [`PinBackend`] trait so
//! the pin logic is testable without hardware; [`SysfsBackend`] is the
//! on-target implementation.

mod backend;
mod error;
mod pin;
mod sysfs;

pub use backend::{Direction, Edge, PinBackend};
pub use error::PinError;
pub use pin::{DigitalPin, EdgeHandler, PinListener};
pub use sysfs::SysfsBackend;
