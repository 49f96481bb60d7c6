//! # Checksum
//!
//! Additive modulo-256 checksum over the logical (unescaped) field bytes of a
//! frame. The sender appends the byte that brings the total to zero; the
//! receiver sums everything including that byte and checks for zero.
//!
//! This only catches accidental corruption. It is not a MAC.

/// Add one logical byte to a running sum.
#[inline]
pub fn accumulate(sum: u32, value: u8) -> u32 {
    sum.wrapping_add(u32::from(value))
}

/// Checksum byte that closes `sum` to zero modulo 256.
#[inline]
pub fn finalize(sum: u32) -> u8 {
    ((256 - (sum % 256)) % 256) as u8
}

/// True when `sum` (checksum byte included) is zero modulo 256.
#[inline]
pub fn verify(sum: u32) -> bool {
    sum % 256 == 0
}

/// Running checksum carried by value through an encode or decode pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum {
    sum: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the accumulator with `value` added
    #[inline]
    #[must_use]
    pub fn add(self, value: u8) -> Self {
        Self {
            sum: accumulate(self.sum, value),
        }
    }

    /// Returns the accumulator with every byte of `values` added
    #[must_use]
    pub fn extend(self, values: &[u8]) -> Self {
        values.iter().fold(self, |acc, &v| acc.add(v))
    }

    pub fn sum(&self) -> u32 {
        self.sum
    }

    /// Residual `sum mod 256`; zero for a valid frame
    pub fn residual(&self) -> u8 {
        (self.sum % 256) as u8
    }

    pub fn finalize(&self) -> u8 {
        finalize(self.sum)
    }

    pub fn verify(&self) -> bool {
        verify(self.sum)
    }
}
