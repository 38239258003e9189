//! The per-channel oscillator state machine.
//!
//! Each cycle an [Oscillator] turns the raw ADC snapshot into a pitch
//! voltage and a pulse-width code, then resolves them through the voice
//! lookup engine into actuation values.  The update runs in two stages so
//! the channels' same-cycle dependency is explicit: [Oscillator::update]
//! computes everything derivable from a channel's own inputs, and
//! [Oscillator::post_update] (called after *both* channels' `update`)
//! resolves the follower path against the other channel's fresh pitch,
//! applies smoothing, and performs the table lookup.
//!
//! The four performance modes share this pipeline; each mode's specific
//! pitch and pulse-width combination rules live in one `ModeRules`
//! implementation per mode rather than in scattered mode branches.

use crate::bezier::Lut;
use crate::correction::ErrorCorrection;
use crate::outputs::VoiceOutputs;
use crate::quantizer::QuantizerConfig;
use crate::ramp_table::RampTable;
use crate::settings::Settings;
use crate::smoother::DynamicSmoother;
use crate::{Channel, Volts, ADC_CODE_MAX, DAC_CODE_MAX, PITCH_CV_MAX, PITCH_CV_MIN};

/// Fixed 50% duty midpoint for LFO pulse-width modulation.
const DUTY_MIDPOINT: i32 = 2048;

/// Upper end of the hard-sync interval knob's range, in volts above the
/// reference pitch.  The slaved voice must run above the master for sync to
/// produce its timbral effect rather than unison.
const SYNC_INTERVAL_MAX: Volts = Volts::lit("3");

/// The global performance mode, cycled by the front-panel button.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// Both voices free-run from their own CV and knobs.
    #[default]
    Normal,
    /// The LFO modulates pulse width; the pulse CV and knob set the depth.
    LfoPwm,
    /// The LFO modulates the FM channel's pitch; the pulse CV and knob set
    /// the depth.
    LfoFm,
    /// The master voice's timer retriggers the slaved voice each cycle; the
    /// slaved voice's pitch knob selects the sync interval.
    HardSync,
}

impl Mode {
    /// The next mode in the front-panel cycling order.
    pub const fn next(self) -> Mode {
        match self {
            Mode::Normal => Mode::LfoPwm,
            Mode::LfoPwm => Mode::LfoFm,
            Mode::LfoFm => Mode::HardSync,
            Mode::HardSync => Mode::Normal,
        }
    }

    fn rules(self) -> &'static dyn ModeRules {
        match self {
            Mode::Normal => &Normal,
            Mode::LfoPwm => &LfoPwm,
            Mode::LfoFm => &LfoFm,
            Mode::HardSync => &HardSync,
        }
    }
}

/// How a channel's pitch is being derived this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PitchBehavior {
    /// Pitch comes from the channel's own CV input and knob.
    Coarse,
    /// The CV input is unpatched; pitch tracks the other channel plus the
    /// knob.
    Follow,
    /// The CV input is unpatched in hard-sync mode; pitch tracks the other
    /// channel plus the sync interval knob.
    Multiply,
}

/// One channel's per-cycle input snapshot.
///
/// `reference_pitch` carries the other channel's pitch and must be written
/// with that channel's fresh stage-one value before [Oscillator::post_update]
/// runs; everything else comes straight from the ADC scan and the LFO.
#[derive(Clone, Copy, Debug, Default)]
pub struct OscillatorInputs {
    /// The active performance mode.
    pub mode: Mode,
    /// Raw pitch CV code.
    pub pitch_cv_code: u16,
    /// Raw pitch knob code.
    pub pitch_knob_code: u16,
    /// Raw alternate ("tweak") pitch knob code, latched by the panel.
    pub tweak_pitch_knob_code: u16,
    /// Raw pulse-width CV code.
    pub pulse_cv_code: u16,
    /// Raw pulse-width knob code.
    pub pulse_knob_code: u16,
    /// Raw alternate pulse-width knob code, latched by the panel.
    pub tweak_pulse_knob_code: u16,
    /// Raw LFO knob code; consumed by the LFO collaborator, carried in the
    /// snapshot so mode rules can scale LFO response.
    pub lfo_knob_code: u16,
    /// The LFO's computed amplitude for this cycle, in [-1, 1].
    pub lfo_amplitude: Volts,
    /// The other channel's freshly computed pitch.
    pub reference_pitch: Volts,
}

/// A channel's static configuration, assembled from the hardware revision
/// and the persisted device settings at startup.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OscillatorConfig {
    /// Which voice this is.
    pub channel: Channel,
    /// Base pitch offset added to the CV input, in volts.
    pub pitch_offset: Volts,
    /// Bottom of the pitch CV input range.
    pub pitch_cv_min: Volts,
    /// Top of the pitch CV input range.
    pub pitch_cv_max: Volts,
    /// Knob voltage at full counter-clockwise.
    pub knob_min: Volts,
    /// Knob voltage at full clockwise.
    pub knob_max: Volts,
    /// Pitch modulation depth in LFO-FM mode; zero for a channel that does
    /// not receive FM.
    pub lfo_pitch_factor: Volts,
    /// Bitmask applied to the final pulse-width code.
    pub pulse_width_bitmask: u16,
    /// Whether this channel may follow the other when unpatched.
    pub can_follow: bool,
    /// Whether unpatched-input detection is active.
    pub zero_detection_enabled: bool,
    /// Corrected-code threshold below which the pitch input counts as
    /// unpatched.
    pub zero_detection_threshold: u16,
    /// Whether the pitch quantizer is applied to this channel.
    pub quantize: bool,
    /// Smoothing filter base gain.
    pub smooth_initial_gain: Volts,
    /// Smoothing filter sensitivity.
    pub smooth_sensitivity: Volts,
}

impl OscillatorConfig {
    /// The configuration for `channel` under the given device settings.
    pub fn for_channel(channel: Channel, settings: &Settings) -> Self {
        let (knob_min, knob_max, quantize, lfo_pitch_factor) = match channel {
            Channel::Castor => (
                settings.castor_knob_min,
                settings.castor_knob_max,
                settings.castor_quantize,
                settings.castor_lfo_pitch_factor,
            ),
            Channel::Pollux => (
                settings.pollux_knob_min,
                settings.pollux_knob_max,
                settings.pollux_quantize,
                settings.pollux_lfo_pitch_factor,
            ),
        };
        Self {
            channel,
            pitch_offset: settings.base_cv_offset,
            pitch_cv_min: Volts::ZERO,
            pitch_cv_max: Volts::from_num(6),
            knob_min,
            knob_max,
            lfo_pitch_factor,
            pulse_width_bitmask: settings.pulse_width_bitmask,
            // Only Pollux follows; Castor is the reference.
            can_follow: channel == Channel::Pollux,
            zero_detection_enabled: settings.zero_detection_enabled,
            zero_detection_threshold: settings.pollux_follower_threshold,
            quantize,
            smooth_initial_gain: settings.smooth_initial_gain,
            smooth_sensitivity: settings.smooth_sensitivity,
        }
    }
}

/// One voice's control state, updated every sample cycle for the lifetime
/// of the device.
pub struct Oscillator {
    config: OscillatorConfig,
    correction: ErrorCorrection,
    smooth: DynamicSmoother,
    behavior: PitchBehavior,
    fm_intensity: Volts,
    pitch_fine: Volts,
    /// Pitch contribution of the CV input (or the reference pitch when
    /// following).
    pub pitch_cv: Volts,
    /// Pitch contribution of the knob.
    pub pitch_knob: Volts,
    /// The combined pitch, in volts; final after [Oscillator::post_update].
    pub pitch: Volts,
    /// The pulse-width DAC code, 0..=4095.
    pub pulse_width: u16,
    /// Corrected, inverted pulse CV code.
    pub pulse_cv: u16,
    /// Corrected, inverted pulse knob code.
    pub pulse_knob: u16,
    /// The timer period and ramp code from the most recent lookup.
    pub outputs: VoiceOutputs,
}

impl Oscillator {
    /// Construct a voice from its configuration and the shared pitch-CV
    /// error correction record.
    pub fn new(config: OscillatorConfig, correction: ErrorCorrection) -> Self {
        let smooth = DynamicSmoother::new(config.smooth_initial_gain, config.smooth_sensitivity);
        Self {
            config,
            correction,
            smooth,
            behavior: PitchBehavior::Coarse,
            fm_intensity: Volts::ZERO,
            pitch_fine: Volts::ZERO,
            pitch_cv: Volts::ZERO,
            pitch_knob: Volts::ZERO,
            pitch: Volts::ZERO,
            pulse_width: DUTY_MIDPOINT as u16,
            pulse_cv: 0,
            pulse_knob: 0,
            outputs: VoiceOutputs::default(),
        }
    }

    /// This channel's static configuration.
    pub fn config(&self) -> &OscillatorConfig {
        &self.config
    }

    /// How this channel's pitch is being derived this cycle.
    pub fn behavior(&self) -> PitchBehavior {
        self.behavior
    }

    /// Stage one: derive everything that depends only on this channel's own
    /// inputs.
    pub fn update(&mut self, inputs: &OscillatorInputs, quantizer: &QuantizerConfig, shaper: &Lut) {
        let rules = inputs.mode.rules();
        self.update_pitch(inputs, quantizer, rules, shaper);
        self.update_pulse_width(inputs, rules);
    }

    /// Stage two: resolve the follower path against the other channel's
    /// fresh pitch, apply LFO pitch modulation and smoothing, clamp, and
    /// run the voice lookup.
    pub fn post_update(&mut self, inputs: &OscillatorInputs, ramp_table: &RampTable) {
        let rules = inputs.mode.rules();

        if self.behavior != PitchBehavior::Coarse {
            self.pitch_cv = inputs.reference_pitch;
            self.pitch = inputs.reference_pitch + self.pitch_knob + self.pitch_fine;
        }

        self.pitch = self.pitch.saturating_add(rules.pitch_modulation(
            &self.config,
            inputs.lfo_amplitude,
            self.fm_intensity,
        ));

        // The quantizer already removes small jitter, and smoothing a
        // stair-stepped signal only delays the step edges.
        if !self.config.quantize {
            self.pitch = self.smooth.step(self.pitch);
        }

        self.pitch = self.pitch.clamp(PITCH_CV_MIN, PITCH_CV_MAX);
        self.outputs = VoiceOutputs::calculate(self.config.channel, self.pitch, ramp_table);
    }

    fn update_pitch(
        &mut self,
        inputs: &OscillatorInputs,
        quantizer: &QuantizerConfig,
        rules: &dyn ModeRules,
        shaper: &Lut,
    ) {
        // Error correction is calibrated against the uninverted code, so it
        // is applied before undoing the inverting input stage.
        let corrected = self
            .correction
            .correct(Volts::saturating_from_num(inputs.pitch_cv_code));
        let code = Volts::from_num(ADC_CODE_MAX as i32) - corrected;

        let unpatched = self.config.can_follow
            && self.config.zero_detection_enabled
            && code < Volts::from_num(self.config.zero_detection_threshold as i32);

        self.behavior = if unpatched {
            if inputs.mode == Mode::HardSync {
                PitchBehavior::Multiply
            } else {
                PitchBehavior::Follow
            }
        } else {
            PitchBehavior::Coarse
        };

        let knob_value = invert_normalize(inputs.pitch_knob_code);
        self.pitch_knob = if self.behavior == PitchBehavior::Coarse {
            coarse_knob(&self.config, knob_value, shaper)
        } else {
            rules.follower_knob(&self.config, knob_value, shaper)
        };

        // The alternate knob trims ±1 semitone around center.
        let tweak_value = invert_normalize(inputs.tweak_pitch_knob_code);
        self.pitch_fine = (tweak_value - Volts::lit("0.5")) / Volts::from_num(6);

        if self.behavior == PitchBehavior::Coarse {
            let range = self.config.pitch_cv_max - self.config.pitch_cv_min;
            let normalized = code / Volts::from_num(ADC_CODE_MAX as i32);
            let mut pitch_cv = self.config.pitch_offset
                + self.config.pitch_cv_min
                + range.saturating_mul(normalized);
            if self.config.quantize {
                // Snap the CV before the knob term: external sources
                // calibrated against this device land mid-bin, so boundary
                // flapping needs a full half-semitone of noise.
                pitch_cv = quantizer.quantize(pitch_cv);
            }
            self.pitch_cv = pitch_cv;
            self.pitch = pitch_cv + self.pitch_knob + self.pitch_fine;
        }
    }

    fn update_pulse_width(&mut self, inputs: &OscillatorInputs, rules: &dyn ModeRules) {
        self.pulse_cv = invert_code(self.correction.correct_code(inputs.pulse_cv_code));
        self.pulse_knob = invert_code(self.correction.correct_code(inputs.pulse_knob_code));

        // The pulse controls double as the modulation depth in both LFO
        // modes.
        self.fm_intensity = Volts::from_num(self.pulse_cv as i32 + self.pulse_knob as i32)
            / Volts::from_num(ADC_CODE_MAX as i32);

        // The inverted code range tops out at 4095, so its midpoint is 2047.
        let trim = invert_code(inputs.tweak_pulse_knob_code) as i32 - (ADC_CODE_MAX as i32) / 2;
        let width = rules.pulse_width(self.pulse_cv, self.pulse_knob, inputs.lfo_amplitude) + trim;
        self.pulse_width =
            (width.clamp(0, DAC_CODE_MAX as i32) as u16) & self.config.pulse_width_bitmask;
    }
}

/// Undo the inverting input stage: full clockwise reads as code 0.
fn invert_code(code: u16) -> u16 {
    ADC_CODE_MAX - code.min(ADC_CODE_MAX)
}

/// Normalize an inverted knob code to [0, 1].
fn invert_normalize(code: u16) -> Volts {
    Volts::ONE - Volts::from_num(code.min(ADC_CODE_MAX)) / Volts::from_num(ADC_CODE_MAX as i32)
}

/// Map a normalized knob position into the configured voltage range,
/// reshaping through the Bézier curve inside the fine-control window.
///
/// The shaper's domain is the [-1, +1] volt window centered on zero; mapped
/// voltages outside it pass through linearly, and the curve meets the
/// linear mapping at both window edges.
fn coarse_knob(config: &OscillatorConfig, value: Volts, shaper: &Lut) -> Volts {
    let range = config.knob_max - config.knob_min;
    let mapped = config.knob_min + range.saturating_mul(value);
    if mapped >= -Volts::ONE && mapped <= Volts::ONE {
        let t = (mapped + Volts::ONE).unwrapped_shr(1);
        shaper.lookup(t).unwrapped_shl(1) - Volts::ONE
    } else {
        mapped
    }
}

/// The mode-specific combination rules.  One implementation per performance
/// mode; everything not overridden falls back to the free-running behavior.
trait ModeRules {
    /// Map the knob for a channel whose pitch input is unpatched and
    /// following the other channel.
    fn follower_knob(&self, config: &OscillatorConfig, value: Volts, shaper: &Lut) -> Volts {
        coarse_knob(config, value, shaper)
    }

    /// Extra pitch applied after follower resolution.
    fn pitch_modulation(&self, _config: &OscillatorConfig, _lfo: Volts, _intensity: Volts) -> Volts {
        Volts::ZERO
    }

    /// Combine the corrected pulse CV and knob codes into a pulse width.
    fn pulse_width(&self, cv: u16, knob: u16, _lfo: Volts) -> i32 {
        cv as i32 + knob as i32
    }
}

struct Normal;
impl ModeRules for Normal {}

struct LfoPwm;
impl ModeRules for LfoPwm {
    fn pulse_width(&self, cv: u16, knob: u16, lfo: Volts) -> i32 {
        let intensity =
            Volts::from_num(cv as i32 + knob as i32) / Volts::from_num(ADC_CODE_MAX as i32);
        let swing = Volts::from_num(DUTY_MIDPOINT) * intensity * lfo;
        DUTY_MIDPOINT + swing.round().to_num::<i32>()
    }
}

struct LfoFm;
impl ModeRules for LfoFm {
    fn pitch_modulation(&self, config: &OscillatorConfig, lfo: Volts, intensity: Volts) -> Volts {
        config.lfo_pitch_factor * lfo * intensity
    }
}

struct HardSync;
impl ModeRules for HardSync {
    fn follower_knob(&self, _config: &OscillatorConfig, value: Volts, _shaper: &Lut) -> Volts {
        // A coarse interval selector above the reference; the fine-control
        // S-curve has no meaning here.
        SYNC_INTERVAL_MAX * value
    }
}
