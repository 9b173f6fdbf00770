use std::os::fd::{BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, error, warn};

use crate::error::MuxError;

/// How long one wait may block before the stop flag is rechecked.
const POLL_TIMEOUT_MS: u16 = 100;

/// Scratch size for draining a ready descriptor.
const DRAIN_BUF: usize = 64;

/// Handler invoked on the dispatch thread when its descriptor reports the
/// watched event. No event payload is delivered; a handler re-queries
/// whatever state it needs.
pub type Handler = Box<dyn FnMut() + Send>;

/// Opaque token identifying one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

struct Registration {
    token: ListenerToken,
    handler: Handler,
}

/// One watched descriptor with its listeners in registration order.
struct FdEntry {
    fd: RawFd,
    listeners: Vec<Registration>,
}

/// Invariant: a descriptor has an entry iff it has at least one listener.
#[derive(Default)]
struct WatchTable {
    entries: Vec<FdEntry>,
    next_token: u64,
}

impl WatchTable {
    fn register(&mut self, fd: RawFd, handler: Handler) -> ListenerToken {
        let token = ListenerToken(self.next_token);
        self.next_token += 1;
        let registration = Registration { token, handler };
        match self.entries.iter_mut().find(|entry| entry.fd == fd) {
            Some(entry) => entry.listeners.push(registration),
            None => self.entries.push(FdEntry {
                fd,
                listeners: vec![registration],
            }),
        }
        token
    }

    fn unregister(&mut self, token: ListenerToken) -> bool {
        let mut removed = false;
        for entry in self.entries.iter_mut() {
            let before = entry.listeners.len();
            entry.listeners.retain(|reg| reg.token != token);
            if entry.listeners.len() != before {
                removed = true;
                break;
            }
        }
        if removed {
            // Keep the invariant: no listeners, no wait-set entry.
            self.entries.retain(|entry| !entry.listeners.is_empty());
        }
        removed
    }
}

/// State shared between the handle and the dispatch thread.
struct Shared {
    table: Mutex<WatchTable>,
    stop: AtomicBool,
    events: PollFlags,
}

/// Multiplexes edge-triggered descriptors onto one dispatch thread.
///
/// Registered descriptors must remain open until their last listener is
/// unregistered; the mux borrows them for polling but never owns them.
pub struct IrqMux {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IrqMux {
    /// A mux watching `POLLPRI`, the readiness event sysfs edge descriptors
    /// report.
    pub fn new() -> Self {
        Self::with_event_mask(PollFlags::POLLPRI)
    }

    /// A mux watching an arbitrary readiness event, e.g. `POLLIN` for
    /// pipe- or socket-backed descriptors.
    pub fn with_event_mask(events: PollFlags) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(WatchTable::default()),
                stop: AtomicBool::new(false),
                events,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the dispatch thread. Idempotent; a mux that was shut down can
    /// be started again.
    pub fn start(&self) -> Result<(), MuxError> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        self.shared.stop.store(false, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("irq-mux".into())
            .spawn(move || {
                raise_priority();
                dispatch_loop(&shared);
            })
            .map_err(MuxError::Spawn)?;
        *worker = Some(handle);
        Ok(())
    }

    /// Raise the stop flag and join the dispatch thread. The thread never
    /// cancels a handler mid-flight; it finishes the current cycle and
    /// exits within one poll timeout. No-op if not running.
    pub fn shutdown(&self) {
        let mut worker = lock(&self.worker);
        if let Some(handle) = worker.take() {
            self.shared.stop.store(true, Ordering::SeqCst);
            if handle.join().is_err() {
                error!("dispatch thread panicked");
            }
        }
    }

    /// Bind `handler` to readiness events on `fd`. The descriptor joins the
    /// wait set if this is its first listener.
    ///
    /// The caller must keep `fd` open until the registration is removed.
    /// Handlers run with the registration table locked, so they must not
    /// call [`register`](Self::register) or
    /// [`unregister`](Self::unregister) on the same mux.
    pub fn register(&self, fd: RawFd, handler: Handler) -> ListenerToken {
        lock(&self.shared.table).register(fd, handler)
    }

    /// Remove one registration. When the descriptor's last listener goes,
    /// the descriptor leaves the wait set. Returns `false` if the token is
    /// not registered.
    pub fn unregister(&self, token: ListenerToken) -> bool {
        lock(&self.shared.table).unregister(token)
    }

    /// Number of descriptors currently in the wait set.
    pub fn watch_count(&self) -> usize {
        lock(&self.shared.table).entries.len()
    }

    /// Whether `fd` currently has at least one listener.
    pub fn is_watched(&self, fd: RawFd) -> bool {
        lock(&self.shared.table)
            .entries
            .iter()
            .any(|entry| entry.fd == fd)
    }
}

impl Default for IrqMux {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqMux {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking handler must not wedge dispatch; the table is plain data.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dispatch_loop(shared: &Shared) {
    let mut drain = [0u8; DRAIN_BUF];

    loop {
        // Snapshot the wait set so register/unregister stay responsive
        // while the wait below is blocked.
        let fds: Vec<RawFd> = {
            let table = lock(&shared.table);
            table.entries.iter().map(|entry| entry.fd).collect()
        };

        // SAFETY: registration contract: descriptors stay open until
        // unregistered. A descriptor closed out from under us at worst
        // reports POLLNVAL, which the event mask filters out below.
        let mut poll_fds: Vec<PollFd> = fds
            .iter()
            .map(|&fd| {
                PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, shared.events)
            })
            .collect();

        match poll(&mut poll_fds, PollTimeout::from(POLL_TIMEOUT_MS)) {
            Ok(0) => {}
            Ok(_) => {
                let ready: Vec<RawFd> = poll_fds
                    .iter()
                    .zip(&fds)
                    .filter(|(poll_fd, _)| {
                        poll_fd
                            .revents()
                            .unwrap_or_else(PollFlags::empty)
                            .intersects(shared.events)
                    })
                    .map(|(_, &fd)| fd)
                    .collect();

                // Holding the table mutex here excludes register/unregister
                // for the whole fan-out, so listener lists cannot shift
                // under the iteration.
                let mut table = lock(&shared.table);
                for fd in ready {
                    // The registration may have disappeared while we waited.
                    let Some(entry) =
                        table.entries.iter_mut().find(|entry| entry.fd == fd)
                    else {
                        continue;
                    };
                    drain_descriptor(fd, &mut drain);
                    for registration in entry.listeners.iter_mut() {
                        (registration.handler)();
                    }
                }
            }
            Err(err) => {
                error!("poll failed, dispatch thread exiting: {}", err);
                return;
            }
        }

        if shared.stop.load(Ordering::SeqCst) {
            debug!("dispatch thread stopping");
            return;
        }
    }
}

/// Acknowledge a ready descriptor by reading and discarding its content.
/// Sysfs value descriptors report the edge at file offset zero, so rewind
/// first; descriptors without a cursor (pipes, sockets) refuse the seek and
/// the read alone drains them.
fn drain_descriptor(fd: RawFd, buf: &mut [u8]) {
    // SAFETY: same open-until-unregistered contract as the poll above, and
    // the buffer pointer is valid for the full length.
    unsafe {
        libc::lseek(fd, 0, libc::SEEK_SET);
        libc::read(fd, buf.as_mut_ptr().cast(), buf.len());
    }
}

/// Best-effort bump to realtime round-robin scheduling so edge latency is
/// not at the mercy of the default scheduler. Needs CAP_SYS_NICE; failure
/// is logged and ignored.
fn raise_priority() {
    // SAFETY: plain libc calls against the current thread; the parameter
    // struct lives on the stack for the duration of the call.
    unsafe {
        let priority = libc::sched_get_priority_max(libc::SCHED_RR);
        if priority < 0 {
            warn!("could not query SCHED_RR priority range");
            return;
        }
        let param = libc::sched_param {
            sched_priority: priority,
        };
        let rc = libc::pthread_setschedparam(
            libc::pthread_self(),
            libc::SCHED_RR,
            &param,
        );
        if rc != 0 {
            warn!(
                "could not raise dispatch thread priority: {}",
                std::io::Error::from_raw_os_error(rc)
            );
        }
    }
}
