use std::fs::File;
use std::io::Read;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use irq_mux::{IrqMux, ListenerToken};
use tracing::{debug, warn};

use crate::backend::{Direction, Edge, PinBackend};
use crate::error::PinError;

/// Handler invoked on the dispatch thread for every edge event on the pin.
/// No payload is delivered; re-query whatever state is needed.
pub type EdgeHandler = Box<dyn FnMut() + Send>;

/// Token for one pin-level listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinListener(u64);

type ListenerTable = Vec<(PinListener, EdgeHandler)>;

/// Interrupt state of an armed pin: the edge selection, the open value
/// descriptor the dispatcher polls, the dispatcher registration, and the
/// listener table shared with the trampoline.
struct Armed {
    edge: Edge,
    value_fd: OwnedFd,
    mux_token: ListenerToken,
    listeners: Arc<Mutex<ListenerTable>>,
}

/// One exported digital line.
///
/// Direction changes and plain value I/O are rejected while the pin is
/// armed: the value descriptor is held open for edge polling. The first
/// [`attach_interrupt`](Self::attach_interrupt) arms the pin, the last
/// [`detach_interrupt`](Self::detach_interrupt) disarms it.
pub struct DigitalPin<B: PinBackend> {
    line: u16,
    backend: B,
    dispatcher: Option<Arc<IrqMux>>,
    direction: Direction,
    initialized: bool,
    next_listener: u64,
    armed: Option<Armed>,
}

impl<B: PinBackend> DigitalPin<B> {
    /// A pin without interrupt capability (output lines, plain inputs).
    pub fn new(line: u16, backend: B) -> Self {
        Self {
            line,
            backend,
            dispatcher: None,
            direction: Direction::Undefined,
            initialized: false,
            next_listener: 0,
            armed: None,
        }
    }

    /// A pin whose edge events will be delivered through `dispatcher`.
    pub fn with_dispatcher(
        line: u16,
        backend: B,
        dispatcher: Arc<IrqMux>,
    ) -> Self {
        let mut pin = Self::new(line, backend);
        pin.dispatcher = Some(dispatcher);
        pin
    }

    pub fn line(&self) -> u16 {
        self.line
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The edge the pin is currently armed for, if any.
    pub fn armed_edge(&self) -> Option<Edge> {
        self.armed.as_ref().map(|armed| armed.edge)
    }

    /// Export the line and adopt whatever direction the kernel reports.
    /// Idempotent.
    pub fn init(&mut self) -> Result<(), PinError> {
        if self.initialized {
            return Ok(());
        }

        self.backend.export(self.line)?;
        match self.backend.direction(self.line) {
            Ok(direction) => self.direction = direction,
            Err(err) => {
                // Leave no half-exported line behind.
                if let Err(err) = self.backend.unexport(self.line) {
                    warn!(line = self.line, "unexport failed: {}", err);
                }
                return Err(err.into());
            }
        }
        self.initialized = true;
        Ok(())
    }

    /// Detach everything, close the value descriptor, unexport the line.
    /// Idempotent and safe on a partially initialized pin; failures are
    /// logged, never escalated.
    pub fn release(&mut self) {
        if let Some(armed) = &self.armed {
            lock(&armed.listeners).clear();
        }
        self.disarm();

        if self.initialized {
            if let Err(err) = self.backend.unexport(self.line) {
                warn!(line = self.line, "unexport failed: {}", err);
            }
        }
        self.direction = Direction::Undefined;
        self.initialized = false;
    }

    /// Configure the line direction. Rejected while the pin is armed.
    pub fn set_direction(&mut self, direction: Direction) -> Result<(), PinError> {
        self.ensure_init()?;
        if direction == Direction::Undefined {
            return Err(PinError::UndefinedDirection);
        }
        if self.armed.is_some() {
            warn!(line = self.line, "direction change rejected while armed");
            return Err(PinError::Armed);
        }
        self.backend.set_direction(self.line, direction)?;
        self.direction = direction;
        Ok(())
    }

    /// Read the line level. Requires input direction and a disarmed pin.
    pub fn get_value(&mut self) -> Result<u8, PinError> {
        self.ensure_init()?;
        if self.armed.is_some() {
            return Err(PinError::Armed);
        }
        if self.direction != Direction::Input {
            return Err(PinError::Direction {
                required: Direction::Input,
                actual: self.direction,
            });
        }
        Ok(self.backend.value(self.line)?)
    }

    /// Drive the line level. Requires output direction and a disarmed pin.
    pub fn set_value(&mut self, value: u8) -> Result<(), PinError> {
        self.ensure_init()?;
        if self.armed.is_some() {
            return Err(PinError::Armed);
        }
        if self.direction != Direction::Output {
            return Err(PinError::Direction {
                required: Direction::Output,
                actual: self.direction,
            });
        }
        Ok(self.backend.set_value(self.line, value)?)
    }

    /// Bind `handler` to edge events on this pin.
    ///
    /// The first registration selects `edge`, opens the value descriptor and
    /// registers the pin's trampoline with the dispatcher; later
    /// registrations must request the same edge. Handlers run on the
    /// dispatch thread and must not block.
    pub fn attach_interrupt(
        &mut self,
        edge: Edge,
        handler: EdgeHandler,
    ) -> Result<PinListener, PinError> {
        self.ensure_init()?;

        if let Some(armed) = &self.armed {
            if armed.edge != edge {
                warn!(
                    line = self.line,
                    "attach rejected: armed for {:?}, {:?} requested",
                    armed.edge,
                    edge
                );
                return Err(PinError::EdgeConflict {
                    armed: armed.edge,
                    requested: edge,
                });
            }
            let token = PinListener(self.next_listener);
            self.next_listener += 1;
            lock(&armed.listeners).push((token, handler));
            return Ok(token);
        }

        let Some(dispatcher) = self.dispatcher.clone() else {
            return Err(PinError::NoDispatcher);
        };
        if self.direction != Direction::Input {
            return Err(PinError::Direction {
                required: Direction::Input,
                actual: self.direction,
            });
        }

        self.backend.set_edge(self.line, edge)?;
        let value_fd = match self.backend.open_value_fd(self.line) {
            Ok(fd) => fd,
            Err(err) => {
                if let Err(err) = self.backend.clear_edge(self.line) {
                    warn!(line = self.line, "edge rollback failed: {}", err);
                }
                return Err(err.into());
            }
        };
        // A fresh value descriptor reports one exceptional condition
        // immediately; drain it so the first dispatch is a real edge.
        let value_fd = drain_initial(value_fd);

        let token = PinListener(self.next_listener);
        self.next_listener += 1;
        let listeners: Arc<Mutex<ListenerTable>> =
            Arc::new(Mutex::new(vec![(token, handler)]));

        let fanout = Arc::clone(&listeners);
        let mux_token = dispatcher.register(
            value_fd.as_raw_fd(),
            Box::new(move || {
                // Runs with the dispatcher table locked; never call back
                // into the dispatcher from here.
                for (_, handler) in lock(&fanout).iter_mut() {
                    handler();
                }
            }),
        );

        debug!(line = self.line, "armed for {:?} edges", edge);
        self.armed = Some(Armed {
            edge,
            value_fd,
            mux_token,
            listeners,
        });
        Ok(token)
    }

    /// Remove one listener. The last removal disarms the pin: the
    /// trampoline is unregistered, the edge selection cleared, and the
    /// value descriptor closed.
    pub fn detach_interrupt(&mut self, listener: PinListener) -> Result<(), PinError> {
        let Some(armed) = &self.armed else {
            return Err(PinError::UnknownListener);
        };

        let now_empty = {
            let mut table = lock(&armed.listeners);
            let before = table.len();
            table.retain(|(token, _)| *token != listener);
            if table.len() == before {
                return Err(PinError::UnknownListener);
            }
            table.is_empty()
        };
        // The listener lock is released before touching the dispatcher;
        // the trampoline takes the two in the opposite order.
        if now_empty {
            self.disarm();
        }
        Ok(())
    }

    fn disarm(&mut self) {
        if let Some(armed) = self.armed.take() {
            if let Some(dispatcher) = &self.dispatcher {
                dispatcher.unregister(armed.mux_token);
            }
            if let Err(err) = self.backend.clear_edge(self.line) {
                warn!(line = self.line, "could not clear edge selection: {}", err);
            }
            // Closed only after the dispatcher registration is gone.
            drop(armed.value_fd);
            debug!(line = self.line, "disarmed");
        }
    }

    fn ensure_init(&self) -> Result<(), PinError> {
        if self.initialized {
            Ok(())
        } else {
            Err(PinError::NotInitialized)
        }
    }
}

impl<B: PinBackend> Drop for DigitalPin<B> {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read and discard whatever the descriptor currently reports. The
/// descriptor is non-blocking, so an empty source is a no-op.
fn drain_initial(fd: OwnedFd) -> OwnedFd {
    let mut file = File::from(fd);
    let mut buf = [0u8; 8];
    let _ = file.read(&mut buf);
    OwnedFd::from(file)
}
