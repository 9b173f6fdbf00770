//! Edge-event multiplexing for descriptor-backed interrupts.
//!
//! Edge notifications on embedded Linux arrive as exceptional-condition
//! readiness on a descriptor, not as a real interrupt vector. One
//! [`IrqMux`] owns a single background thread that waits on every
//! registered descriptor with `poll(2)` and a bounded timeout, then fans
//! each readiness event out to the listeners bound to that descriptor, in
//! registration order.
//!
//! Listeners are owned closures identified by an opaque [`ListenerToken`];
//! registration and unregistration are safe while the thread is running.
//! Shutdown is cooperative: [`IrqMux::shutdown`] raises a stop flag and
//! joins the thread, which notices the flag within one poll timeout.

mod error;
mod mux;

pub use error::MuxError;
pub use mux::{Handler, IrqMux, ListenerToken};

// Dependents select their watched event mask without importing nix.
pub use nix::poll::PollFlags;
