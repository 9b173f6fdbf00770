use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex};

use irq_mux::IrqMux;
use millibar_gpio::{DigitalPin, Direction, Edge, PinBackend, PinError};

// ---------------------------------------------------------------------------
// Mock backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct State {
    exports: usize,
    unexports: usize,
    direction: Direction,
    value: u8,
    edge: Option<Edge>,
}

/// Records every backend operation; value descriptors come from /dev/null.
#[derive(Clone, Default)]
struct MockBackend(Arc<Mutex<State>>);

impl MockBackend {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.0.lock().unwrap()
    }
}

impl PinBackend for MockBackend {
    fn export(&mut self, _line: u16) -> io::Result<()> {
        self.state().exports += 1;
        Ok(())
    }

    fn unexport(&mut self, _line: u16) -> io::Result<()> {
        self.state().unexports += 1;
        Ok(())
    }

    fn direction(&mut self, _line: u16) -> io::Result<Direction> {
        Ok(self.state().direction)
    }

    fn set_direction(&mut self, _line: u16, direction: Direction) -> io::Result<()> {
        self.state().direction = direction;
        Ok(())
    }

    fn value(&mut self, _line: u16) -> io::Result<u8> {
        Ok(self.state().value)
    }

    fn set_value(&mut self, _line: u16, value: u8) -> io::Result<()> {
        self.state().value = value;
        Ok(())
    }

    fn set_edge(&mut self, _line: u16, edge: Edge) -> io::Result<()> {
        self.state().edge = Some(edge);
        Ok(())
    }

    fn clear_edge(&mut self, _line: u16) -> io::Result<()> {
        self.state().edge = None;
        Ok(())
    }

    fn open_value_fd(&mut self, _line: u16) -> io::Result<OwnedFd> {
        Ok(OwnedFd::from(File::open("/dev/null")?))
    }
}

fn input_pin(backend: &MockBackend) -> DigitalPin<MockBackend> {
    backend.state().direction = Direction::Input;
    let mut pin =
        DigitalPin::with_dispatcher(60, backend.clone(), Arc::new(IrqMux::new()));
    pin.init().unwrap();
    pin
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn init_and_release_are_idempotent() {
    let backend = MockBackend::default();
    let mut pin = DigitalPin::new(48, backend.clone());

    // Release before init is a safe no-op.
    pin.release();
    assert_eq!(backend.state().unexports, 0);

    pin.init().unwrap();
    pin.init().unwrap();
    assert_eq!(backend.state().exports, 1);

    pin.release();
    pin.release();
    assert_eq!(backend.state().unexports, 1);
    assert_eq!(pin.direction(), Direction::Undefined);
}

#[test]
fn init_adopts_reported_direction() {
    let backend = MockBackend::default();
    backend.state().direction = Direction::Output;

    let mut pin = DigitalPin::new(48, backend);
    pin.init().unwrap();
    assert_eq!(pin.direction(), Direction::Output);
}

#[test]
fn operations_before_init_fail() {
    let backend = MockBackend::default();
    let mut pin = DigitalPin::new(48, backend);

    assert!(matches!(pin.get_value(), Err(PinError::NotInitialized)));
    assert!(matches!(
        pin.set_direction(Direction::Input),
        Err(PinError::NotInitialized)
    ));
}

// ---------------------------------------------------------------------------
// Direction rules
// ---------------------------------------------------------------------------

#[test]
fn value_io_requires_matching_direction() {
    let backend = MockBackend::default();
    backend.state().direction = Direction::Input;
    let mut pin = DigitalPin::new(60, backend.clone());
    pin.init().unwrap();

    backend.state().value = 1;
    assert_eq!(pin.get_value().unwrap(), 1);
    assert!(matches!(
        pin.set_value(1),
        Err(PinError::Direction { required: Direction::Output, .. })
    ));

    pin.set_direction(Direction::Output).unwrap();
    pin.set_value(0).unwrap();
    assert!(matches!(
        pin.get_value(),
        Err(PinError::Direction { required: Direction::Input, .. })
    ));
}

#[test]
fn undefined_direction_is_rejected() {
    let backend = MockBackend::default();
    let mut pin = DigitalPin::new(60, backend);
    pin.init().unwrap();

    assert!(matches!(
        pin.set_direction(Direction::Undefined),
        Err(PinError::UndefinedDirection)
    ));
}

// ---------------------------------------------------------------------------
// Arming
// ---------------------------------------------------------------------------

#[test]
fn armed_pin_rejects_direction_change_and_value_io() {
    let backend = MockBackend::default();
    let mut pin = input_pin(&backend);

    pin.attach_interrupt(Edge::Rising, Box::new(|| {})).unwrap();

    assert!(matches!(
        pin.set_direction(Direction::Output),
        Err(PinError::Armed)
    ));
    assert!(matches!(pin.get_value(), Err(PinError::Armed)));
    assert!(matches!(pin.set_value(1), Err(PinError::Armed)));
    // The direction survives the rejected change.
    assert_eq!(pin.direction(), Direction::Input);
}

#[test]
fn edge_conflict_keeps_first_registration() {
    let backend = MockBackend::default();
    let mut pin = input_pin(&backend);

    pin.attach_interrupt(Edge::Rising, Box::new(|| {})).unwrap();
    assert!(matches!(
        pin.attach_interrupt(Edge::Falling, Box::new(|| {})),
        Err(PinError::EdgeConflict {
            armed: Edge::Rising,
            requested: Edge::Falling,
        })
    ));

    // Still armed with the first edge; same-edge attach still works.
    assert_eq!(pin.armed_edge(), Some(Edge::Rising));
    assert_eq!(backend.state().edge, Some(Edge::Rising));
    pin.attach_interrupt(Edge::Rising, Box::new(|| {})).unwrap();
}

#[test]
fn last_detach_disarms() {
    let backend = MockBackend::default();
    let mut pin = input_pin(&backend);

    let first = pin.attach_interrupt(Edge::Both, Box::new(|| {})).unwrap();
    let second = pin.attach_interrupt(Edge::Both, Box::new(|| {})).unwrap();

    pin.detach_interrupt(first).unwrap();
    assert_eq!(pin.armed_edge(), Some(Edge::Both));

    pin.detach_interrupt(second).unwrap();
    assert_eq!(pin.armed_edge(), None);
    assert_eq!(backend.state().edge, None);

    // Disarmed: plain value I/O is available again.
    pin.get_value().unwrap();
    // Tokens are single-use.
    assert!(matches!(
        pin.detach_interrupt(second),
        Err(PinError::UnknownListener)
    ));
}

#[test]
fn attach_requires_dispatcher_and_input_direction() {
    let backend = MockBackend::default();
    backend.state().direction = Direction::Input;
    let mut plain = DigitalPin::new(60, backend.clone());
    plain.init().unwrap();
    assert!(matches!(
        plain.attach_interrupt(Edge::Rising, Box::new(|| {})),
        Err(PinError::NoDispatcher)
    ));

    let mut pin = input_pin(&backend);
    pin.set_direction(Direction::Output).unwrap();
    assert!(matches!(
        pin.attach_interrupt(Edge::Rising, Box::new(|| {})),
        Err(PinError::Direction { required: Direction::Input, .. })
    ));
}

#[test]
fn release_while_armed_cleans_up_dispatcher_registration() {
    let backend = MockBackend::default();
    backend.state().direction = Direction::Input;
    let mux = Arc::new(IrqMux::new());
    let mut pin = DigitalPin::with_dispatcher(60, backend.clone(), Arc::clone(&mux));
    pin.init().unwrap();

    pin.attach_interrupt(Edge::Rising, Box::new(|| {})).unwrap();
    assert_eq!(mux.watch_count(), 1);

    pin.release();
    assert_eq!(mux.watch_count(), 0);
    assert_eq!(backend.state().edge, None);
    assert_eq!(backend.state().unexports, 1);
}
