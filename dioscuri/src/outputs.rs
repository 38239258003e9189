//! The voice lookup engine: pitch voltage in, timer period and DAC ramp
//! code out.
//!
//! Computing the period from a voltage directly needs a power function;
//! walking the calibration tables with linear interpolation is both faster
//! and matches the device's measured behavior.  The lookup runs in two
//! stages: the compiled-in pitch table maps voltage to period, then the
//! calibrated ramp table maps that period to the channel's DAC code.

use crate::fixedmath::{frac_between, lerp_u16, lerp_u32};
use crate::pitch_table::{PitchEntry, PITCH_TABLE};
use crate::ramp_table::{RampEntry, RampTable};
use crate::{Channel, Volts};

/// A voice's computed actuation values for one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VoiceOutputs {
    /// The pitch voltage the outputs were computed from.
    pub pitch_cv: Volts,
    /// Pulse timer period, in counter ticks.
    pub period: u32,
    /// DAC ramp charge-compensation code.
    pub ramp_code: u16,
}

impl VoiceOutputs {
    /// Calculate the period and ramp code for `pitch_cv` on `channel`.
    ///
    /// `pitch_cv` must already be clamped to the table range ([0, 7] volts);
    /// inputs at or beyond either edge collapse to the edge entry rather
    /// than extrapolating, so the result is always a point within the
    /// calibrated range.
    pub fn calculate(channel: Channel, pitch_cv: Volts, ramp_table: &RampTable) -> VoiceOutputs {
        let (low, high) = nearest_pitch_pair(pitch_cv);

        // The fractional position between the bracketing voltages, as a
        // 16-bit weight.  Adjacent table voltages are less than a volt
        // apart, so plain integer division is enough (see
        // [frac_between]); collapsed bounds count as fully "high".
        let frac = frac_between(low.pitch_cv, high.pitch_cv, pitch_cv);
        let period = lerp_u32(low.period, high.period, frac);

        // Second stage: the ramp table is keyed by the period we just
        // computed.  Period descends as pitch ascends, so the comparisons
        // run inverted relative to the pitch table scan.
        let (low, high) = nearest_ramp_pair(ramp_table, period);

        let frac = if low.period == high.period {
            0xFFFF
        } else {
            // Drop two LSBs so the scaled dividend fits a 32-bit division;
            // adjacent periods differ by hundreds of ticks, so there is
            // plenty of resolution left.
            let dividend = ((low.period - period) >> 2) << 16;
            let divisor = (low.period - high.period) >> 2;
            (dividend / divisor) as u16
        };
        let ramp_code = lerp_u16(low.code(channel), high.code(channel), frac);

        VoiceOutputs {
            pitch_cv,
            period,
            ramp_code,
        }
    }
}

/// Find the entries bracketing `pitch_cv`: the greatest table voltage at or
/// below it and the least above it.  Off either end of the table both
/// bounds collapse to the nearest edge.
fn nearest_pitch_pair(pitch_cv: Volts) -> (&'static PitchEntry, &'static PitchEntry) {
    let mut low = &PITCH_TABLE[0];
    let mut high = &PITCH_TABLE[0];
    let mut found = false;
    for entry in PITCH_TABLE.iter() {
        if entry.pitch_cv <= pitch_cv && entry.pitch_cv >= low.pitch_cv {
            low = entry;
        }
        if entry.pitch_cv > pitch_cv {
            high = entry;
            found = true;
            break;
        }
    }
    if !found {
        high = low;
    }
    (low, high)
}

/// Find the ramp entries bracketing `period`.  The table is sorted by
/// descending period, so "low" is the entry with the smallest period still
/// at or above the input.
fn nearest_ramp_pair(table: &RampTable, period: u32) -> (&RampEntry, &RampEntry) {
    let entries = table.entries();
    let mut low = &entries[0];
    let mut high = &entries[0];
    let mut found = false;
    for entry in entries.iter() {
        if entry.period >= period {
            low = entry;
        }
        if entry.period < period && entry.period <= low.period {
            high = entry;
            found = true;
            break;
        }
    }
    if !found {
        high = low;
    }
    (low, high)
}
