//! The persisted device settings this core consumes.
//!
//! Settings are stored, versioned, and migrated by an external collaborator
//! (they are editable over the SysEx channel and from the web editor); this
//! module only defines the snapshot handed to [crate::engine::Engine::new]
//! at startup, with the defaults a factory-fresh device ships with.

use crate::Volts;

/// A snapshot of the device settings relevant to the oscillator pipeline.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Settings {
    /// The hardware ADC's own gain correction, in the converter's 1.11
    /// fixed-point register format (2048 = unity).
    pub adc_gain_corr: u16,
    /// The hardware ADC's own offset correction, in code points.
    pub adc_offset_corr: u16,
    /// Offset term of the shared pitch-CV error correction, in code points.
    pub cv_offset_error: Volts,
    /// Gain term of the shared pitch-CV error correction.
    pub cv_gain_error: Volts,
    /// Castor's pitch knob voltage at full counter-clockwise.
    pub castor_knob_min: Volts,
    /// Castor's pitch knob voltage at full clockwise.
    pub castor_knob_max: Volts,
    /// Pollux's pitch knob voltage at full counter-clockwise.
    pub pollux_knob_min: Volts,
    /// Pollux's pitch knob voltage at full clockwise.
    pub pollux_knob_max: Volts,
    /// Smoothing filter base gain.
    pub smooth_initial_gain: Volts,
    /// Smoothing filter sensitivity.
    pub smooth_sensitivity: Volts,
    /// Corrected-code threshold below which Pollux's pitch input counts as
    /// unpatched.
    pub pollux_follower_threshold: u16,
    /// Whether unpatched-input detection (and with it the follower) is
    /// active.
    pub zero_detection_enabled: bool,
    /// Nonlinearity of the pitch knobs' response curve; 0.5 is linear.
    pub pitch_knob_nonlinearity: Volts,
    /// Base offset added to every pitch CV, in volts.
    pub base_cv_offset: Volts,
    /// Castor's pitch modulation depth in LFO-FM mode.
    pub castor_lfo_pitch_factor: Volts,
    /// Pollux's pitch modulation depth in LFO-FM mode.
    pub pollux_lfo_pitch_factor: Volts,
    /// Whether Castor's pitch is quantized.
    pub castor_quantize: bool,
    /// Whether Pollux's pitch is quantized.
    pub pollux_quantize: bool,
    /// Bitmask applied to the final pulse-width codes.
    pub pulse_width_bitmask: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adc_gain_corr: 2048,
            adc_offset_corr: 0,
            cv_offset_error: Volts::ZERO,
            cv_gain_error: Volts::ONE,
            castor_knob_min: Volts::lit("-1.2"),
            castor_knob_max: Volts::lit("1.2"),
            pollux_knob_min: Volts::lit("-1.2"),
            pollux_knob_max: Volts::lit("1.2"),
            smooth_initial_gain: Volts::lit("0.1"),
            smooth_sensitivity: Volts::lit("30"),
            pollux_follower_threshold: 100,
            zero_detection_enabled: true,
            pitch_knob_nonlinearity: Volts::lit("0.6"),
            base_cv_offset: Volts::lit("1.0"),
            castor_lfo_pitch_factor: Volts::ZERO,
            pollux_lfo_pitch_factor: Volts::ONE,
            castor_quantize: false,
            pollux_quantize: false,
            pulse_width_bitmask: 0x0FFF,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_defaults() {
        let s = Settings::default();
        assert_eq!(s.base_cv_offset, Volts::ONE);
        assert_eq!(s.pollux_follower_threshold, 100);
        assert_eq!(s.cv_gain_error, Volts::ONE);
        assert!(s.zero_detection_enabled);
        // Only Pollux receives FM by default.
        assert_eq!(s.castor_lfo_pitch_factor, Volts::ZERO);
        assert!(s.pollux_lfo_pitch_factor > Volts::ZERO);
    }
}
