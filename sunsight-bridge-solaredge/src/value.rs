//! Raw holding-register contents and their typed interpretations.

use std::fmt;

/// A contiguous block of holding registers to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterDescriptor {
    /// Starting address.
    pub address: u16,
    /// Number of consecutive 16-bit registers.
    pub count: u16,
}

impl RegisterDescriptor {
    /// Create a new descriptor.
    pub const fn new(address: u16, count: u16) -> Self {
        Self { address, count }
    }
}

/// The raw content of one 16-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegisterValue(u16);

impl RegisterValue {
    /// Wrap a raw register word.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Interpret as an unsigned 16-bit integer.
    pub const fn as_unsigned(self) -> u16 {
        self.0
    }

    /// Interpret the bit pattern as a signed 16-bit integer.
    pub const fn as_signed(self) -> i16 {
        self.0 as i16
    }

    /// Combine with `low` into a big-endian IEEE-754 single.
    ///
    /// `self` supplies the high word.
    pub fn combine_to_f32(self, low: RegisterValue) -> f32 {
        f32::from_bits(((self.0 as u32) << 16) | low.0 as u32)
    }

    /// Apply a SunSpec decimal scale factor: `self * 10^scale_factor`.
    pub fn scaled_magnitude(self, scale_factor: RegisterValue) -> f64 {
        let raw = f64::from(self.0);
        let exponent = i32::from(scale_factor.as_signed());

        // Dividing keeps results like 1500 * 10^-1 exact
        if exponent < 0 {
            raw / 10f64.powi(-exponent)
        } else {
            raw * 10f64.powi(exponent)
        }
    }
}

impl From<u16> for RegisterValue {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<i16> for RegisterValue {
    fn from(raw: i16) -> Self {
        Self(raw as u16)
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}
