//! Seams for the hardware collaborators: non-volatile memory, the pulse
//! timers, and the DAC.
//!
//! The control core never touches registers itself; drivers implement these
//! traits.  [MemNvm] is an in-memory implementation suitable for tests and
//! host-side tooling.

use crate::Channel;

/// Base offset of the ramp-code calibration table in non-volatile memory.
pub const RAMP_TABLE_NVM_BASE: u32 = 0x0000;

/// Base offset of the quantizer configuration in non-volatile memory.
pub const QUANTIZER_NVM_BASE: u32 = 0x0400;

/// Byte-addressed non-volatile memory.
pub trait Nvm {
    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&mut self, offset: u32, buf: &mut [u8]);
    /// Write `data` starting at `offset`.
    fn write(&mut self, offset: u32, data: &[u8]);
}

/// The per-channel pulse (PWM) timers.
pub trait PulseOut {
    /// Set one channel's timer period, in counter ticks.
    fn set_period(&mut self, channel: Channel, period: u32);

    /// Set both channels' periods as one atomic pair.
    ///
    /// In hard-sync mode the master timer's overflow interrupt retriggers
    /// the slave timer, so implementations must write the two period
    /// registers with that interrupt masked; servicing it between the two
    /// writes would leave the timers' phase relationship nondeterministic.
    fn set_periods(&mut self, castor: u32, pollux: u32);

    /// Enable or disable the master-to-slave hard-sync retrigger.
    fn set_hard_sync(&mut self, enabled: bool);
}

/// The DAC driving each voice's analog control inputs.
pub trait DacOut {
    /// Write one channel's ramp charge-compensation code and pulse-width
    /// code, each 12 bits.
    fn write(&mut self, channel: Channel, ramp_code: u16, pulse_width: u16);
}

/// Why a persisted calibration block could not be loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadError {
    /// The version marker did not match any known schema version (0xFF is
    /// the erased state).
    InvalidMarker(u8),
    /// The marker was valid but the contents were not usable.
    Malformed,
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LoadError::InvalidMarker(m) => write!(f, "invalid table marker {:#04x}", m),
            LoadError::Malformed => write!(f, "malformed table contents"),
        }
    }
}

/// A fixed-size memory block implementing [Nvm], erased to 0xFF like real
/// flash.
pub struct MemNvm<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> MemNvm<N> {
    /// A fully erased memory.
    pub const fn new() -> Self {
        Self { data: [0xFF; N] }
    }

    /// The raw contents, for assertions.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl<const N: usize> Default for MemNvm<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Nvm for MemNvm<N> {
    fn read(&mut self, offset: u32, buf: &mut [u8]) {
        let offset = offset as usize;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
    }

    fn write(&mut self, offset: u32, data: &[u8]) {
        let offset = offset as usize;
        self.data[offset..offset + data.len()].copy_from_slice(data);
    }
}
