//! One-dimensional cubic Bézier evaluation and a precomputed lookup table.
//!
//! The pitch knobs use this to trade the potentiometer's linear response for
//! an S-shaped curve: with the interior control points set symmetrically the
//! slope flattens around the knob's center, giving much finer control near
//! zero volts where fine tuning happens.  Evaluating the cubic per sample is
//! needlessly expensive, so the curve is sampled once into a table at init
//! and looked up with linear interpolation afterwards.

use crate::fixedmath::lerp8;
use crate::Volts;

/// Number of samples in a generated curve table.
pub const LUT_LEN: usize = 256;

/// Evaluate the cubic Bézier with endpoints fixed at 0 and 1 and interior
/// control points `c1` and `c2`, at `t` in [0, 1]:
///
/// `B(t) = 3·c1·t·(1−t)² + 3·c2·(1−t)·t² + t³`
pub fn evaluate(c1: Volts, c2: Volts, t: Volts) -> Volts {
    let one_minus = Volts::ONE - t;
    let three = Volts::from_num(3);
    let p0 = three * c1 * t * one_minus * one_minus;
    let p1 = three * c2 * one_minus * t * t;
    let p2 = t * t * t;
    p0 + p1 + p2
}

/// A sampled Bézier curve with interpolated lookup.
#[derive(Clone)]
pub struct Lut {
    samples: [Volts; LUT_LEN],
}

impl Lut {
    /// Sample `evaluate(c1, c2, _)` at [LUT_LEN] equally spaced points.
    pub fn generate(c1: Volts, c2: Volts) -> Self {
        let mut samples = [Volts::ZERO; LUT_LEN];
        let len = Volts::from_num(LUT_LEN as i32);
        for (i, sample) in samples.iter_mut().enumerate() {
            let t = Volts::from_num(i as i32) / len;
            *sample = evaluate(c1, c2, t);
        }
        Self { samples }
    }

    /// Look up the curve value for `t`, clamped to [0, 1], interpolating
    /// linearly between the two bracketing samples.
    ///
    /// The fractional position between samples is reduced to an 8-bit
    /// weight; a weight within 1/256 of either sample returns that sample
    /// directly rather than interpolating.
    pub fn lookup(&self, t: Volts) -> Volts {
        let t = t.clamp(Volts::ZERO, Volts::ONE);
        let len = Volts::from_num(LUT_LEN as i32);
        let scaled = len * t;
        let floored = scaled.floor();
        let frac = ((scaled - floored).to_bits() as u32 & 0xFFFF) >> 8;
        let low_idx: usize = floored.to_num();
        let high_idx: usize = scaled.ceil().to_num();
        if low_idx >= LUT_LEN {
            return Volts::ONE;
        }
        let low = self.samples[low_idx.min(LUT_LEN - 1)];
        let high = self.samples[high_idx.min(LUT_LEN - 1)];
        if low_idx == high_idx || frac <= 1 {
            return low;
        }
        if frac >= 254 {
            return high;
        }
        lerp8(low, high, frac as u8)
    }
}
