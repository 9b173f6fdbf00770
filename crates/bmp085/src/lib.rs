//! BMP085 barometric pressure / temperature driver.
//!
//! The device converts on demand: software writes a conversion command to
//! the control register, waits out the conversion, then reads the data-out
//! registers. Two acquisition modes:
//!
//! - **Blocking**: [`Bmp085::read_raw_temperature`] and
//!   [`Bmp085::read_raw_pressure`] issue a command and sleep for the
//!   documented worst-case conversion time before reading back.
//! - **Interrupt**: the end-of-conversion line drives a state machine that
//!   alternates temperature and pressure conversions forever, delivering
//!   each completed `(raw temperature, raw pressure)` pair to registered
//!   result listeners on the dispatch thread.
//!
//! Raw readings are compensated into physical units with the device's
//! eleven EEPROM coefficients, see [`compensate`] and [`Bmp085::compute`].

pub mod errors;
pub mod registers;

pub use errors::Error;
pub use registers::{Command, Oversampling, ADDRESS};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use byteorder::{BigEndian, ByteOrder};
use millibar_gpio::{DigitalPin, Edge, PinBackend, PinListener, SysfsBackend};
use millibar_i2c::RegisterBus;
use tracing::{debug, error, warn};

use registers::CoeffReg;

/// Mean sea-level pressure, hPa.
const SEA_LEVEL_HPA: f64 = 1013.25;

/// Acquisition mode chosen at [`Bmp085::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Conversions block the calling thread for the conversion time.
    Blocking,
    /// Conversions run back-to-back, driven by the end-of-conversion line.
    Interrupt,
}

/// The eleven compensation coefficients from the device EEPROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    pub ac1: i16,
    pub ac2: i16,
    pub ac3: i16,
    pub ac4: u16,
    pub ac5: u16,
    pub ac6: u16,
    pub b1: i16,
    pub b2: i16,
    pub mb: i16,
    pub mc: i16,
    pub md: i16,
}

/// One compensated reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Degrees Celsius.
    pub temperature_c: f64,
    /// Hectopascal.
    pub pressure_hpa: f64,
}

/// Token for one result-listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultListener(u64);

/// Called on the dispatch thread with each completed
/// `(raw temperature, raw pressure)` pair. Must not block and must not
/// unregister listeners on the same sensor.
pub type ResultHandler = Box<dyn FnMut(i16, i32) + Send>;

/// Conversion currently awaited in interrupt mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingTemperature,
    AwaitingPressure,
}

#[derive(Default)]
struct ListenerTable {
    entries: Vec<(ResultListener, ResultHandler)>,
    next: u64,
}

impl ListenerTable {
    fn add(&mut self, handler: ResultHandler) -> ResultListener {
        let token = ResultListener(self.next);
        self.next += 1;
        self.entries.push((token, handler));
        token
    }

    fn remove(&mut self, token: ResultListener) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(t, _)| *t != token);
        self.entries.len() != before
    }
}

/// Bus, coefficients and conversion state, under one mutex. The result
/// listeners live under their own lock so the fan-out can run with this
/// one released.
struct Shared<B> {
    bus: B,
    calib: Option<Calibration>,
    oss: Oversampling,
    phase: Phase,
    pending_temp: i16,
}

impl<B: RegisterBus> Shared<B> {
    /// Transfer failures are logged and read back as zero; the conversion
    /// cycle must keep running when a transfer glitches.
    fn read_reg(&mut self, reg: u8) -> u8 {
        match self.bus.read_reg(ADDRESS, reg) {
            Ok(value) => value,
            Err(err) => {
                error!(reg, "register read failed: {}", err);
                0
            }
        }
    }

    fn write_reg(&mut self, reg: u8, value: u8) {
        if let Err(err) = self.bus.write_reg(ADDRESS, reg, value) {
            error!(reg, value, "register write failed: {}", err);
        }
    }

    fn start_conversion(&mut self, command: Command) {
        self.write_reg(registers::CTRL_MEAS, command.into());
    }

    fn read_coeff(&mut self, reg: CoeffReg) -> [u8; 2] {
        [self.read_reg(reg as u8), self.read_reg(reg as u8 + 1)]
    }

    fn read_calibration(&mut self) -> Calibration {
        Calibration {
            ac1: BigEndian::read_i16(&self.read_coeff(CoeffReg::Ac1)),
            ac2: BigEndian::read_i16(&self.read_coeff(CoeffReg::Ac2)),
            ac3: BigEndian::read_i16(&self.read_coeff(CoeffReg::Ac3)),
            ac4: BigEndian::read_u16(&self.read_coeff(CoeffReg::Ac4)),
            ac5: BigEndian::read_u16(&self.read_coeff(CoeffReg::Ac5)),
            ac6: BigEndian::read_u16(&self.read_coeff(CoeffReg::Ac6)),
            b1: BigEndian::read_i16(&self.read_coeff(CoeffReg::B1)),
            b2: BigEndian::read_i16(&self.read_coeff(CoeffReg::B2)),
            mb: BigEndian::read_i16(&self.read_coeff(CoeffReg::Mb)),
            mc: BigEndian::read_i16(&self.read_coeff(CoeffReg::Mc)),
            md: BigEndian::read_i16(&self.read_coeff(CoeffReg::Md)),
        }
    }

    fn read_raw_temperature(&mut self) -> i16 {
        let word = [self.read_reg(registers::OUT_MSB), self.read_reg(registers::OUT_LSB)];
        BigEndian::read_i16(&word)
    }

    fn read_raw_pressure(&mut self) -> i32 {
        let word = [
            0,
            self.read_reg(registers::OUT_MSB),
            self.read_reg(registers::OUT_LSB),
            self.read_reg(registers::OUT_XLSB),
        ];
        (BigEndian::read_u32(&word) as i32) >> self.oss.shift()
    }
}

/// BMP085 driver, generic over the register bus and the pin backend.
pub struct Bmp085<B, P: PinBackend = SysfsBackend> {
    shared: Arc<Mutex<Shared<B>>>,
    listeners: Arc<Mutex<ListenerTable>>,
    eoc: Option<DigitalPin<P>>,
    xclr: Option<DigitalPin<P>>,
    eoc_listener: Option<PinListener>,
    initialized: bool,
    async_active: bool,
}

impl<B, P> Bmp085<B, P>
where
    B: RegisterBus + Send + 'static,
    P: PinBackend,
{
    pub fn new(bus: B) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                bus,
                calib: None,
                oss: Oversampling::default(),
                phase: Phase::AwaitingTemperature,
                pending_temp: 0,
            })),
            listeners: Arc::new(Mutex::new(ListenerTable::default())),
            eoc: None,
            xclr: None,
            eoc_listener: None,
            initialized: false,
            async_active: false,
        }
    }

    /// Attach the end-of-conversion line. Required for [`Mode::Interrupt`];
    /// the pin must be initialized and configured as an input.
    pub fn with_eoc(mut self, pin: DigitalPin<P>) -> Self {
        self.eoc = Some(pin);
        self
    }

    /// Attach the XCLR reset line (active low); the pin must be initialized
    /// and configured as an output.
    pub fn with_xclr(mut self, pin: DigitalPin<P>) -> Self {
        self.xclr = Some(pin);
        self
    }

    /// Load the calibration coefficients and, in interrupt mode, arm the
    /// end-of-conversion line and start the first conversion. Idempotent
    /// after success.
    ///
    /// Interrupt mode without an EOC pin fails with
    /// [`Error::MissingEocPin`] before any hardware is touched.
    pub fn init(&mut self, mode: Mode) -> Result<(), Error> {
        if self.initialized {
            return Ok(());
        }
        if mode == Mode::Interrupt && self.eoc.is_none() {
            return Err(Error::MissingEocPin);
        }

        // Release the reset and load coefficients before the line can raise
        // its first edge.
        take_out_of_reset(&mut self.xclr)?;
        load_calibration(&self.shared);

        if mode == Mode::Interrupt {
            let shared = Arc::clone(&self.shared);
            let listeners = Arc::clone(&self.listeners);
            let Some(eoc) = self.eoc.as_mut() else {
                return Err(Error::MissingEocPin);
            };
            let token = eoc.attach_interrupt(
                Edge::Rising,
                Box::new(move || on_eoc(&shared, &listeners)),
            )?;
            self.eoc_listener = Some(token);

            let mut shared = lock(&self.shared);
            shared.phase = Phase::AwaitingTemperature;
            shared.start_conversion(Command::Temperature);
            self.async_active = true;
        }

        self.initialized = true;
        Ok(())
    }

    /// Tear the sensor down: detach the end-of-conversion listener first,
    /// then put the device back into reset. Idempotent and safe before
    /// `init`; failures are logged, never escalated.
    pub fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }

        if self.async_active {
            if let (Some(eoc), Some(token)) =
                (self.eoc.as_mut(), self.eoc_listener.take())
            {
                if let Err(err) = eoc.detach_interrupt(token) {
                    warn!("could not detach end-of-conversion listener: {}", err);
                }
            }
            self.async_active = false;
        }

        // XCLR is active low: drive it low to hold the device in reset.
        if let Some(xclr) = &mut self.xclr {
            if let Err(err) = xclr.set_value(0) {
                warn!("could not assert reset line: {}", err);
            }
        }

        self.initialized = false;
    }

    pub fn oversampling(&self) -> Oversampling {
        lock(&self.shared).oss
    }

    /// Takes effect from the next pressure conversion.
    pub fn set_oversampling(&mut self, oss: Oversampling) {
        lock(&self.shared).oss = oss;
    }

    /// Issue a temperature conversion and block for its worst-case
    /// duration. Unavailable while interrupt acquisition is active.
    pub fn read_raw_temperature(&mut self) -> Result<i16, Error> {
        self.ensure_blocking()?;
        let mut shared = lock(&self.shared);
        shared.start_conversion(Command::Temperature);
        // The state lock is held across the delay so concurrent callers
        // cannot interleave their command streams.
        thread::sleep(registers::TEMP_CONVERSION_DELAY);
        Ok(shared.read_raw_temperature())
    }

    /// Issue a pressure conversion at the current oversampling level and
    /// block for its worst-case duration. Unavailable while interrupt
    /// acquisition is active.
    pub fn read_raw_pressure(&mut self) -> Result<i32, Error> {
        self.ensure_blocking()?;
        let mut shared = lock(&self.shared);
        let oss = shared.oss;
        shared.start_conversion(Command::Pressure(oss));
        thread::sleep(oss.conversion_delay());
        Ok(shared.read_raw_pressure())
    }

    /// Register a result listener for interrupt acquisition. Listeners run
    /// on the dispatch thread once per completed temperature/pressure
    /// cycle, in registration order.
    pub fn register_listener(&self, handler: ResultHandler) -> ResultListener {
        lock(&self.listeners).add(handler)
    }

    /// Remove a result listener. Returns `false` for an unknown token.
    /// Must not be called from inside a listener.
    pub fn unregister_listener(&self, listener: ResultListener) -> bool {
        lock(&self.listeners).remove(listener)
    }

    /// Compensate one raw pair with the loaded coefficients at the current
    /// oversampling level.
    pub fn compute(&self, raw_temp: i16, raw_pressure: i32) -> Result<Measurement, Error> {
        let shared = lock(&self.shared);
        let Some(calib) = shared.calib else {
            return Err(Error::NotInitialized);
        };
        Ok(compensate(&calib, shared.oss, raw_temp, raw_pressure))
    }

    fn ensure_blocking(&self) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        if self.async_active {
            return Err(Error::AsyncActive);
        }
        Ok(())
    }
}

impl<B, P: PinBackend> Drop for Bmp085<B, P> {
    fn drop(&mut self) {
        // Pin teardown only; `shutdown` needs bus bounds Drop cannot carry.
        if self.async_active {
            if let (Some(eoc), Some(token)) =
                (self.eoc.as_mut(), self.eoc_listener.take())
            {
                let _ = eoc.detach_interrupt(token);
            }
        }
        if self.initialized {
            if let Some(xclr) = &mut self.xclr {
                let _ = xclr.set_value(0);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take_out_of_reset<P: PinBackend>(
    xclr: &mut Option<DigitalPin<P>>,
) -> Result<(), Error> {
    if let Some(xclr) = xclr {
        xclr.set_value(1)?;
    }
    Ok(())
}

fn load_calibration<B: RegisterBus>(shared: &Mutex<Shared<B>>) {
    let mut shared = lock(shared);
    let calib = shared.read_calibration();
    debug!(?calib, "coefficients loaded");
    shared.calib = Some(calib);
}

/// End-of-conversion edge handler; runs on the dispatch thread.
///
/// Strictly alternates the two conversion phases: a temperature completion
/// starts a pressure conversion, a pressure completion publishes the pair
/// to the listeners and starts the next temperature conversion.
fn on_eoc<B: RegisterBus>(shared: &Mutex<Shared<B>>, listeners: &Mutex<ListenerTable>) {
    let published = {
        let mut shared = lock(shared);
        match shared.phase {
            Phase::AwaitingTemperature => {
                shared.pending_temp = shared.read_raw_temperature();
                let oss = shared.oss;
                shared.start_conversion(Command::Pressure(oss));
                shared.phase = Phase::AwaitingPressure;
                None
            }
            Phase::AwaitingPressure => {
                Some((shared.pending_temp, shared.read_raw_pressure()))
            }
        }
    };

    if let Some((raw_temp, raw_pressure)) = published {
        // Fan out with the state lock released so a listener may call
        // `compute`; unregistering from inside a listener stays forbidden.
        for (_, handler) in lock(listeners).entries.iter_mut() {
            handler(raw_temp, raw_pressure);
        }

        let mut shared = lock(shared);
        shared.start_conversion(Command::Temperature);
        shared.phase = Phase::AwaitingTemperature;
    }
}

/// Apply the documented coefficient compensation pipeline to one raw pair.
///
/// Pure: identical inputs always produce identical output. Temperature
/// comes out in degrees Celsius, pressure in hectopascal.
pub fn compensate(
    calib: &Calibration,
    oss: Oversampling,
    raw_temp: i16,
    raw_pressure: i32,
) -> Measurement {
    let x1 = ((raw_temp as i32 - calib.ac6 as i32) * calib.ac5 as i32) >> 15;
    let divisor = x1 + calib.md as i32;
    if divisor == 0 {
        // Blank coefficients (unprogrammed or unreachable device) divide by
        // zero here; NaN beats panicking on the dispatch thread.
        warn!("degenerate calibration coefficients");
        return Measurement {
            temperature_c: f64::NAN,
            pressure_hpa: f64::NAN,
        };
    }
    let x2 = ((calib.mc as i32) << 11) / divisor;
    let b5 = x1 + x2;
    let t = (b5 + 8) >> 4;

    let b6 = b5 - 4000;
    let x1 = ((calib.b2 as i32) * ((b6 * b6) >> 12)) >> 11;
    let x2 = ((calib.ac2 as i32) * b6) >> 11;
    let x3 = x1 + x2;
    let b3 = ((((calib.ac1 as i32) * 4 + x3) << (oss as u32)) + 2) >> 2;
    let x1 = ((calib.ac3 as i32) * b6) >> 13;
    let x2 = ((calib.b1 as i32) * ((b6 * b6) >> 12)) >> 16;
    let x3 = (x1 + x2 + 2) >> 2;
    let b4 = ((calib.ac4 as u32) * ((x3 + 32768) as u32)) >> 15;
    if b4 == 0 {
        warn!("degenerate calibration coefficients");
        return Measurement {
            temperature_c: t as f64 * 0.1,
            pressure_hpa: f64::NAN,
        };
    }
    let b7 = ((raw_pressure - b3) as u32) * (50_000u32 >> (oss as u32));
    let p = if b7 < 0x8000_0000 {
        ((b7 << 1) / b4) as i32
    } else {
        ((b7 / b4) << 1) as i32
    };
    let x1 = (p >> 8) * (p >> 8);
    let x1 = (x1 * 3038) >> 16;
    let x2 = (-7357 * p) >> 16;
    let p = p + ((x1 + x2 + 3791) >> 4);

    Measurement {
        temperature_c: t as f64 * 0.1,
        pressure_hpa: p as f64 / 100.0,
    }
}

/// Altitude above mean sea level approximated from pressure via the
/// barometric formula, metres.
pub fn approx_altitude(pressure_hpa: f64) -> f64 {
    44330.0 * (1.0 - (pressure_hpa / SEA_LEVEL_HPA).powf(1.0 / 5.255))
}

#[cfg(test)]
mod tests {
    use super::*;
    use millibar_i2c::BusError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves reads from a register map, records control writes.
    #[derive(Default)]
    struct ScriptBus {
        regs: HashMap<u8, u8>,
        writes: Vec<(u8, u8)>,
    }

    impl RegisterBus for ScriptBus {
        fn read_reg(&mut self, _addr: u8, reg: u8) -> Result<u8, BusError> {
            Ok(self.regs.get(&reg).copied().unwrap_or(0))
        }

        fn write_reg(&mut self, _addr: u8, reg: u8, value: u8) -> Result<(), BusError> {
            self.writes.push((reg, value));
            Ok(())
        }
    }

    fn shared_with(bus: ScriptBus) -> Mutex<Shared<ScriptBus>> {
        Mutex::new(Shared {
            bus,
            calib: None,
            oss: Oversampling::Standard,
            phase: Phase::AwaitingTemperature,
            pending_temp: 0,
        })
    }

    #[test]
    fn eoc_events_strictly_alternate_phases() {
        let mut bus = ScriptBus::default();
        bus.regs.insert(registers::OUT_MSB, 0x6C);
        bus.regs.insert(registers::OUT_LSB, 0xFA);
        bus.regs.insert(registers::OUT_XLSB, 0x00);

        let shared = shared_with(bus);
        let listeners = Mutex::new(ListenerTable::default());
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            listeners.lock().unwrap().add(Box::new(move |_, _| {
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }

        for _ in 0..5 {
            on_eoc(&shared, &listeners);
        }

        // Five events complete two full cycles and leave a pressure
        // conversion pending.
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        let guard = lock(&shared);
        assert_eq!(guard.phase, Phase::AwaitingPressure);
        let expected: Vec<(u8, u8)> = vec![
            (registers::CTRL_MEAS, 0x74), // pressure, standard oversampling
            (registers::CTRL_MEAS, 0x2E), // temperature
            (registers::CTRL_MEAS, 0x74),
            (registers::CTRL_MEAS, 0x2E),
            (registers::CTRL_MEAS, 0x74),
        ];
        assert_eq!(guard.bus.writes, expected);
    }

    #[test]
    fn published_pair_is_the_saved_temperature_and_shifted_pressure() {
        let mut bus = ScriptBus::default();
        bus.regs.insert(registers::OUT_MSB, 0x6C);
        bus.regs.insert(registers::OUT_LSB, 0xFA);
        bus.regs.insert(registers::OUT_XLSB, 0xC0);

        let shared = shared_with(bus);
        let listeners = Mutex::new(ListenerTable::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            listeners.lock().unwrap().add(Box::new(move |t, p| {
                seen.lock().unwrap().push((t, p));
            }));
        }

        on_eoc(&shared, &listeners);
        on_eoc(&shared, &listeners);

        // Raw temperature 0x6CFA; raw pressure (0x6CFAC0 >> (8 - 1)).
        assert_eq!(*seen.lock().unwrap(), vec![(0x6CFA, 0x6CFAC0 >> 7)]);
    }

    #[test]
    fn oversampling_change_tags_the_next_pressure_command() {
        let shared = shared_with(ScriptBus::default());
        let listeners = Mutex::new(ListenerTable::default());

        on_eoc(&shared, &listeners); // temperature done, pressure issued
        lock(&shared).oss = Oversampling::UltraHighResolution;
        on_eoc(&shared, &listeners); // pressure done, temperature issued
        on_eoc(&shared, &listeners); // temperature done, pressure issued

        let guard = lock(&shared);
        assert_eq!(guard.bus.writes[0], (registers::CTRL_MEAS, 0x74));
        assert_eq!(guard.bus.writes[1], (registers::CTRL_MEAS, 0x2E));
        assert_eq!(guard.bus.writes[2], (registers::CTRL_MEAS, 0xF4));
    }
}
