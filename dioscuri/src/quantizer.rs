//! The optional pitch quantizer.
//!
//! The quantizer operates on a user-replaceable scale, defaulting to 12-tone
//! equal temperament.  The scale is a table of (threshold, output) voltage
//! pairs: any input CV at or above a bin's threshold and below the next
//! bin's threshold quantizes to that bin's output.  Separating thresholds
//! from outputs supports scales with uneven spacing or non-octave layouts,
//! and lets thresholds sit between a controller's actual output steps so a
//! slightly miscalibrated source still lands mid-bin.
//!
//! Replacement tables travel over the SysEx channel in a fixed big-endian
//! layout and persist to non-volatile memory behind a version marker, with
//! the same fall-back-to-default policy as the ramp table.

use arrayvec::ArrayVec;

use crate::io::{LoadError, Nvm};
use crate::pack::{pack_u32, unpack_u32};
use crate::Volts;

/// Maximum number of note entries in a scale; chosen so the entry count
/// packs into one byte.
pub const MAX_NOTES: usize = 255;

/// Packed size of a full-size table: 4 bytes hysteresis, 1 byte count, and
/// 8 bytes per entry.
pub const PACKED_SIZE: usize = 5 + MAX_NOTES * 8;

/// Size of the persisted NVM block, leading marker byte included.
pub const QUANTIZER_BLOCK_LEN: usize = PACKED_SIZE + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Version {
    V1,
}

impl Version {
    const CURRENT: Version = Version::V1;

    const fn marker(self) -> u8 {
        match self {
            Version::V1 => 0xA1,
        }
    }

    fn from_marker(marker: u8) -> Option<Version> {
        match marker {
            0xA1 => Some(Version::V1),
            _ => None,
        }
    }
}

/// One scale degree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Note {
    /// Minimum input voltage for this bin.
    pub threshold: Volts,
    /// Output voltage when the input falls into this bin.
    pub output: Volts,
}

/// A quantizer scale: an ascending threshold table plus a hysteresis width.
///
/// Hysteresis is carried through the transfer format for table authors and
/// future use, but the lookup itself is a stateless search; the default
/// table's thresholds already center each calibrated source mid-bin.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuantizerConfig {
    /// Width of the hysteresis band around bin boundaries.
    pub hysteresis: Volts,
    /// The scale degrees, ascending by threshold.  Never empty.
    pub notes: ArrayVec<Note, MAX_NOTES>,
}

impl QuantizerConfig {
    /// The note's position in 12-tone equal temperament: output `n/12`
    /// volts, threshold half a semitone below so calibrated sources land
    /// mid-bin.
    fn twelve_tet(n: i32) -> Note {
        let twelfth = Volts::ONE / Volts::from_num(12);
        let output = twelfth * Volts::from_num(n);
        Note {
            threshold: output - twelfth / Volts::from_num(2),
            output,
        }
    }

    /// Find the bin `pitch_cv` falls into by binary search.
    ///
    /// Inputs below the first threshold map to bin 0; inputs at or above the
    /// last threshold map to the last bin.
    pub fn search(&self, pitch_cv: Volts) -> usize {
        let notes = &self.notes;
        if pitch_cv < notes[0].threshold {
            return 0;
        }
        if pitch_cv >= notes[notes.len() - 1].threshold {
            return notes.len() - 1;
        }

        let mut lo = 0usize;
        let mut hi = notes.len() - 1;
        while hi != lo {
            // Since hi > lo, mid > lo as well, so the range always shrinks.
            let mid = (lo + hi + 1) >> 1;
            if pitch_cv >= notes[mid].threshold {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        lo
    }

    /// Quantize `pitch_cv` to the selected bin's output voltage.
    pub fn quantize(&self, pitch_cv: Volts) -> Volts {
        self.notes[self.search(pitch_cv)].output
    }

    /// Pack into the transfer format.  Bytes past the last entry are
    /// zeroed; `buf` must hold [PACKED_SIZE] bytes.
    pub fn pack(&self, buf: &mut [u8]) {
        buf[..PACKED_SIZE].fill(0);
        pack_u32(buf, 0, self.hysteresis.to_bits() as u32);
        buf[4] = self.notes.len() as u8;
        for (i, note) in self.notes.iter().enumerate() {
            pack_u32(buf, 5 + 8 * i, note.threshold.to_bits() as u32);
            pack_u32(buf, 5 + 8 * i + 4, note.output.to_bits() as u32);
        }
    }

    /// Unpack from the transfer format.
    ///
    /// Only structural validity is checked (a non-empty table); threshold
    /// ordering is the table author's responsibility, as the search assumes
    /// it rather than re-validating on every load.
    pub fn unpack(buf: &[u8]) -> Result<Self, LoadError> {
        let len = buf[4] as usize;
        if len == 0 {
            return Err(LoadError::Malformed);
        }
        let mut notes = ArrayVec::new();
        for i in 0..len {
            notes.push(Note {
                threshold: Volts::from_bits(unpack_u32(buf, 5 + 8 * i) as i32),
                output: Volts::from_bits(unpack_u32(buf, 5 + 8 * i + 4) as i32),
            });
        }
        Ok(Self {
            hysteresis: Volts::from_bits(unpack_u32(buf, 0) as i32),
            notes,
        })
    }

    /// Load a replacement scale from `nvm` at `base`, falling back to the
    /// current contents (and logging) when no valid block exists.
    pub fn load<N: Nvm>(&mut self, nvm: &mut N, base: u32) -> Result<(), LoadError> {
        let mut block = [0u8; QUANTIZER_BLOCK_LEN];
        nvm.read(base, &mut block);

        let marker = block[0];
        let version = Version::from_marker(marker).ok_or_else(|| {
            log::warn!("no valid quantizer table in NVM (marker {:#04x}), using defaults", marker);
            LoadError::InvalidMarker(marker)
        })?;

        match version {
            Version::V1 => match Self::unpack(&block[1..]) {
                Ok(config) => {
                    *self = config;
                    log::info!("quantizer table loaded, {} notes", self.notes.len());
                    Ok(())
                }
                Err(e) => {
                    log::warn!("failed to unpack quantizer table: {}", e);
                    Err(e)
                }
            },
        }
    }

    /// Save the scale to `nvm` at `base`, stamping the current version
    /// marker.
    pub fn save<N: Nvm>(&self, nvm: &mut N, base: u32) {
        let mut block = [0u8; QUANTIZER_BLOCK_LEN];
        block[0] = Version::CURRENT.marker();
        self.pack(&mut block[1..]);
        nvm.write(base, &block);
        log::info!("quantizer table saved, {} notes", self.notes.len());
    }

    /// Erase just the marker byte, invalidating the persisted scale.
    pub fn erase<N: Nvm>(nvm: &mut N, base: u32) {
        nvm.write(base, &[0xFF]);
        log::info!("quantizer table erased");
    }
}

impl Default for QuantizerConfig {
    /// 12-tone equal temperament: 7 octaves of 12 notes plus one fencepost
    /// entry, with a 5 mV hysteresis width.
    fn default() -> Self {
        let mut notes = ArrayVec::new();
        for n in 0..85 {
            notes.push(Self::twelve_tet(n));
        }
        Self {
            hysteresis: Volts::from_num(0.005),
            notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemNvm;

    #[test]
    fn default_table_shape() {
        let q = QuantizerConfig::default();
        assert_eq!(q.notes.len(), 85);
        assert_eq!(q.notes[12].output, Volts::ONE);
        for pair in q.notes.windows(2) {
            assert!(pair[0].threshold < pair[1].threshold);
            assert!(pair[0].output < pair[1].output);
        }
    }

    #[test]
    fn boundary_bins() {
        let q = QuantizerConfig::default();
        assert_eq!(q.search(Volts::from_num(-5)), 0);
        assert_eq!(q.search(Volts::from_num(99)), q.notes.len() - 1);
        // Exactly at a threshold selects the bin whose threshold it is.
        let t = q.notes[40].threshold;
        assert_eq!(q.search(t), 40);
    }

    #[test]
    fn every_bin_is_reachable_and_consistent() {
        let q = QuantizerConfig::default();
        let mut v = Volts::from_num(-0.5);
        let mut last_bin = 0usize;
        while v < Volts::from_num(7.5) {
            let bin = q.search(v);
            assert!(bin >= last_bin);
            assert!(q.notes[bin].threshold <= v || bin == 0);
            last_bin = bin;
            v += Volts::from_num(0.001);
        }
        assert_eq!(last_bin, q.notes.len() - 1);
    }

    #[test]
    fn snaps_to_the_nearest_semitone() {
        let q = QuantizerConfig::default();
        let semitone = Volts::ONE / Volts::from_num(12);
        // 3.01 V sits closest to semitone 36 (3.0 V).
        assert_eq!(q.quantize(Volts::from_num(3.01)), semitone * Volts::from_num(36));
        // 3.05 V is past the halfway point to semitone 37.
        assert_eq!(q.quantize(Volts::from_num(3.05)), semitone * Volts::from_num(37));
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let q = QuantizerConfig::default();
        let mut buf = [0u8; PACKED_SIZE];
        q.pack(&mut buf);
        let unpacked = QuantizerConfig::unpack(&buf).unwrap();
        assert_eq!(unpacked, q);
    }

    #[test]
    fn packed_layout_is_big_endian_at_fixed_offsets() {
        let mut q = QuantizerConfig::default();
        q.notes.truncate(2);
        q.notes[0] = Note {
            threshold: Volts::from_bits(0x0102_0304),
            output: Volts::from_bits(0x0506_0708),
        };
        let mut buf = [0u8; PACKED_SIZE];
        q.pack(&mut buf);
        assert_eq!(buf[4], 2);
        assert_eq!(&buf[5..13], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn unpack_rejects_an_empty_table() {
        let buf = [0u8; PACKED_SIZE];
        assert_eq!(QuantizerConfig::unpack(&buf), Err(LoadError::Malformed));
    }

    #[test]
    fn nvm_roundtrip_and_erase() {
        let mut nvm = MemNvm::<QUANTIZER_BLOCK_LEN>::new();
        let mut custom = QuantizerConfig::default();
        custom.notes.truncate(13);
        custom.save(&mut nvm, 0);

        let mut loaded = QuantizerConfig::default();
        assert_eq!(loaded.load(&mut nvm, 0), Ok(()));
        assert_eq!(loaded.notes.len(), 13);

        QuantizerConfig::erase(&mut nvm, 0);
        let mut fallback = QuantizerConfig::default();
        assert_eq!(
            fallback.load(&mut nvm, 0),
            Err(LoadError::InvalidMarker(0xFF))
        );
        assert_eq!(fallback, QuantizerConfig::default());
    }
}
