//! The DAC ramp-code calibration table and its non-volatile persistence.
//!
//! The analog ramp cores lose amplitude as frequency rises, so each voice's
//! DAC gets a charge-compensation code looked up by timer period.  The
//! period grid mirrors [crate::pitch_table] (descending period, ascending
//! pitch); the per-channel codes are measured per device during factory
//! calibration, written entry-by-entry over the SysEx channel, and saved to
//! non-volatile memory on an explicit save command.
//!
//! The persisted block is versioned by a single marker byte in its last
//! position.  An unknown or erased marker leaves the compiled-in defaults
//! (all-zero codes) in place: the module keeps tracking pitch, just without
//! amplitude compensation, the same audible-but-safe state as an
//! uncalibrated device.

use crate::io::{LoadError, Nvm};
use crate::pack::{pack_u16, unpack_u16};
use crate::pitch_table::PITCH_TABLE;
use crate::Channel;

/// Number of entries in the ramp table; one per pitch-table entry.
pub const RAMP_TABLE_LEN: usize = crate::pitch_table::PITCH_TABLE_LEN;

/// Size of the persisted NVM block, marker byte included.
pub const RAMP_BLOCK_LEN: usize = 512;

const ENTRY_SIZE: usize = 4;

// The persisted layout must fit the block or the save would scribble over
// whatever follows it in NVM.
const _: () = assert!(RAMP_BLOCK_LEN >= RAMP_TABLE_LEN * ENTRY_SIZE + 1);

/// Known versions of the persisted block, tagged by the marker byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Version {
    V1,
}

impl Version {
    const CURRENT: Version = Version::V1;

    const fn marker(self) -> u8 {
        match self {
            Version::V1 => 0x43,
        }
    }

    fn from_marker(marker: u8) -> Option<Version> {
        match marker {
            0x43 => Some(Version::V1),
            _ => None,
        }
    }
}

/// One calibration point: a timer period and the DAC code for each channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RampEntry {
    /// Timer period in counter ticks; descends through the table.
    pub period: u32,
    /// Castor's charge-compensation DAC code.
    pub castor: u16,
    /// Pollux's charge-compensation DAC code.
    pub pollux: u16,
}

impl RampEntry {
    /// The DAC code column for `channel`.
    pub const fn code(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Castor => self.castor,
            Channel::Pollux => self.pollux,
        }
    }
}

/// The mutable ramp calibration table.
#[derive(Clone)]
pub struct RampTable {
    entries: [RampEntry; RAMP_TABLE_LEN],
}

impl RampTable {
    /// The compiled-in default: the pitch table's period grid with all
    /// codes zero.
    pub fn new() -> Self {
        let mut entries = [RampEntry {
            period: 0,
            castor: 0,
            pollux: 0,
        }; RAMP_TABLE_LEN];
        for (entry, pitch) in entries.iter_mut().zip(PITCH_TABLE.iter()) {
            entry.period = pitch.period;
        }
        Self { entries }
    }

    /// The table contents, sorted by descending period.
    pub fn entries(&self) -> &[RampEntry] {
        &self.entries
    }

    /// Overwrite one channel's code in one entry.  Returns false when the
    /// index is out of range (a garbled calibration command), leaving the
    /// table untouched.
    pub fn set_code(&mut self, index: usize, channel: Channel, code: u16) -> bool {
        let Some(entry) = self.entries.get_mut(index) else {
            return false;
        };
        match channel {
            Channel::Castor => entry.castor = code,
            Channel::Pollux => entry.pollux = code,
        }
        true
    }

    /// Load the calibrated codes from `nvm` at `base`.
    ///
    /// On any error the table keeps its current contents and a diagnostic is
    /// logged; the caller does not need to do anything beyond noting that
    /// the device is running uncalibrated.
    pub fn load<N: Nvm>(&mut self, nvm: &mut N, base: u32) -> Result<(), LoadError> {
        let mut block = [0u8; RAMP_BLOCK_LEN];
        nvm.read(base, &mut block);

        let marker = block[RAMP_BLOCK_LEN - 1];
        let version = Version::from_marker(marker).ok_or_else(|| {
            log::warn!("no valid ramp table in NVM (marker {:#04x}), using defaults", marker);
            LoadError::InvalidMarker(marker)
        })?;

        match version {
            Version::V1 => {
                let mut checksum = 0u16;
                for (i, entry) in self.entries.iter_mut().enumerate() {
                    entry.castor = unpack_u16(&block, i * ENTRY_SIZE);
                    entry.pollux = unpack_u16(&block, i * ENTRY_SIZE + 2);
                    checksum ^= entry.castor;
                }
                log::info!("ramp table loaded from NVM, checksum {:04x}", checksum);
            }
        }
        Ok(())
    }

    /// Save the calibrated codes to `nvm` at `base`, stamping the current
    /// version marker.
    pub fn save<N: Nvm>(&self, nvm: &mut N, base: u32) {
        let mut block = [0u8; RAMP_BLOCK_LEN];
        for (i, entry) in self.entries.iter().enumerate() {
            pack_u16(&mut block, i * ENTRY_SIZE, entry.castor);
            pack_u16(&mut block, i * ENTRY_SIZE + 2, entry.pollux);
        }
        block[RAMP_BLOCK_LEN - 1] = Version::CURRENT.marker();
        nvm.write(base, &block);
        log::info!("ramp table saved to NVM");
    }

    /// Erase the persisted block, so the next boot falls back to defaults.
    pub fn erase<N: Nvm>(nvm: &mut N, base: u32) {
        let block = [0xFFu8; RAMP_BLOCK_LEN];
        nvm.write(base, &block);
        log::info!("ramp table erased");
    }
}

impl Default for RampTable {
    fn default() -> Self {
        Self::new()
    }
}
