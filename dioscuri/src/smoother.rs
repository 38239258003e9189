//! Self-modulated two-pole lowpass filter for control-voltage smoothing.
//!
//! Implementation of "Dynamic Smoothing Using Self Modulated Filter"
//! (<https://cytomic.com/files/dsp/DynamicSmoothing.pdf>).
//!
//! The pitch CV path must reject ADC sampling noise at a steady voltage
//! without audibly lagging a deliberate pitch change.  A fixed-cutoff
//! lowpass can't do both, so this filter modulates its own gain: the
//! difference between its two internal stages measures how fast the input
//! is moving, and large transitions push the effective gain toward 1
//! (bypassing the filter) while small jitter is averaged away.

use crate::Volts;

/// Dynamic smoothing filter state.
#[derive(Clone, Debug)]
pub struct DynamicSmoother {
    /// Base gain in 0.0 - 1.0, with 0.0 preventing any change and 1.0
    /// bypassing the filter entirely.
    initial_gain: Volts,
    /// Gain added per volt of band difference; highly dependent on the scale
    /// of the input.
    sensitivity: Volts,
    lowpass1: Volts,
    lowpass2: Volts,
}

impl DynamicSmoother {
    /// Create a filter with the given base gain and sensitivity.
    pub fn new(initial_gain: Volts, sensitivity: Volts) -> Self {
        Self {
            initial_gain,
            sensitivity,
            lowpass1: Volts::ZERO,
            lowpass2: Volts::ZERO,
        }
    }

    /// Advance the filter by one sample and return the smoothed output.
    pub fn step(&mut self, value: Volts) -> Volts {
        let band = (self.lowpass1 - self.lowpass2).abs();
        let g = (self.initial_gain + self.sensitivity.saturating_mul(band)).min(Volts::ONE);
        self.lowpass1 = g * value + (Volts::ONE - g) * self.lowpass1;
        self.lowpass2 = g * self.lowpass1 + (Volts::ONE - g) * self.lowpass2;
        self.lowpass2
    }

    /// Reset both stages to zero.
    pub fn reset(&mut self) {
        self.lowpass1 = Volts::ZERO;
        self.lowpass2 = Volts::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smoother() -> DynamicSmoother {
        // The values the device settings default to.
        DynamicSmoother::new(Volts::from_num(0.1), Volts::from_num(30.0))
    }

    #[test]
    fn converges_to_a_constant_input() {
        let mut s = smoother();
        let target = Volts::from_num(3.0);
        let mut out = Volts::ZERO;
        for _ in 0..200 {
            out = s.step(target);
        }
        assert!((out - target).abs() < Volts::from_num(0.001));
    }

    #[test]
    fn large_steps_pass_with_little_lag() {
        let mut s = smoother();
        for _ in 0..50 {
            s.step(Volts::ZERO);
        }
        // A 2 volt jump should get through almost immediately because the
        // band term drives the gain to 1.
        let mut out = Volts::ZERO;
        for _ in 0..3 {
            out = s.step(Volts::from_num(2.0));
        }
        assert!((out - Volts::from_num(2.0)).abs() < Volts::from_num(0.05));
    }

    #[test]
    fn small_jitter_is_attenuated() {
        let mut s = smoother();
        for _ in 0..100 {
            s.step(Volts::from_num(2.0));
        }
        // Alternate one ADC step (~1.5 mV) around the resting value; the
        // output should move far less than the input wiggle.
        let jitter = Volts::from_num(0.0015);
        let mut min = Volts::MAX;
        let mut max = Volts::MIN;
        for i in 0..100 {
            let input = if i % 2 == 0 {
                Volts::from_num(2.0) + jitter
            } else {
                Volts::from_num(2.0) - jitter
            };
            let out = s.step(input);
            min = min.min(out);
            max = max.max(out);
        }
        assert!(max - min < jitter);
    }

    #[test]
    fn reset_clears_state() {
        let mut s = smoother();
        for _ in 0..10 {
            s.step(Volts::from_num(5.0));
        }
        s.reset();
        assert_eq!(s.step(Volts::ZERO), Volts::ZERO);
    }
}
