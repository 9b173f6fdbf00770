//! Register map and command encodings.

use std::time::Duration;

use num_enum::TryFromPrimitive;

/// Fixed peripheral address on the bus.
pub const ADDRESS: u8 = 0x77;

/// Measurement control register; writing a command starts a conversion.
pub const CTRL_MEAS: u8 = 0xF4;

/// Conversion result, most significant byte first.
pub const OUT_MSB: u8 = 0xF6;
pub const OUT_LSB: u8 = 0xF7;
pub const OUT_XLSB: u8 = 0xF8;

/// A temperature conversion always takes at most this long.
pub const TEMP_CONVERSION_DELAY: Duration = Duration::from_micros(4_500);

/// Calibration EEPROM coefficients: big-endian 16-bit words, MSB at the
/// listed address, LSB one past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoeffReg {
    Ac1 = 0xAA,
    Ac2 = 0xAC,
    Ac3 = 0xAE,
    Ac4 = 0xB0,
    Ac5 = 0xB2,
    Ac6 = 0xB4,
    B1 = 0xB6,
    B2 = 0xB8,
    Mb = 0xBA,
    Mc = 0xBC,
    Md = 0xBE,
}

/// Pressure oversampling level: longer conversions buy finer resolution.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive,
)]
#[repr(u8)]
pub enum Oversampling {
    UltraLowPower = 0,
    #[default]
    Standard = 1,
    HighResolution = 2,
    UltraHighResolution = 3,
}

impl Oversampling {
    /// Worst-case pressure conversion time at this level.
    pub fn conversion_delay(self) -> Duration {
        match self {
            Oversampling::UltraLowPower => Duration::from_micros(4_500),
            Oversampling::Standard => Duration::from_micros(7_500),
            Oversampling::HighResolution => Duration::from_micros(13_500),
            Oversampling::UltraHighResolution => Duration::from_micros(25_500),
        }
    }

    /// Bits to drop from the 19-bit pressure word at this level.
    pub fn shift(self) -> u32 {
        8 - self as u32
    }
}

/// Conversion start commands for [`CTRL_MEAS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Temperature,
    Pressure(Oversampling),
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        match command {
            Command::Temperature => 0x2E,
            Command::Pressure(oss) => 0x34 | ((oss as u8) << 6),
        }
    }
}
