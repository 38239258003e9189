//! The two-voice pipeline: one object owning both oscillators, the shared
//! calibration tables, and the per-cycle sequencing.
//!
//! The main loop polls the scan queue and hands each fresh [AdcSnapshot] to
//! [Engine::tick].  The tick runs both channels' first update stage, then
//! both second stages with each channel's fresh pitch as the other's
//! reference, so a following Pollux tracks Castor's value from *this*
//! cycle rather than the previous one, and finally hands the results to the
//! timer and DAC seams.  Both timer periods go out as one atomic pair to
//! keep the hard-sync phase relationship deterministic.

use crate::bezier::Lut;
use crate::correction::ErrorCorrection;
use crate::io::{DacOut, Nvm, PulseOut, QUANTIZER_NVM_BASE, RAMP_TABLE_NVM_BASE};
use crate::oscillator::{Mode, Oscillator, OscillatorConfig, OscillatorInputs};
use crate::quantizer::QuantizerConfig;
use crate::ramp_table::RampTable;
use crate::scan::{AdcSnapshot, ScanChannel};
use crate::settings::Settings;
use crate::{Channel, Volts};

/// The latched alternate ("tweak") knob codes.
#[derive(Clone, Copy, Debug)]
struct TweakCodes {
    pitch: [u16; 2],
    pulse: [u16; 2],
}

impl Default for TweakCodes {
    fn default() -> Self {
        // Centered: no fine offset, no pulse trim.
        Self {
            pitch: [2048; 2],
            pulse: [2048; 2],
        }
    }
}

/// Both voices and everything they share.
pub struct Engine {
    mode: Mode,
    /// The first voice.
    pub castor: Oscillator,
    /// The second voice.
    pub pollux: Oscillator,
    /// The shared quantizer scale.
    pub quantizer: QuantizerConfig,
    /// The shared ramp calibration table.
    pub ramp_table: RampTable,
    knob_shape: Lut,
    tweak_held: bool,
    held: TweakCodes,
    tweaks: TweakCodes,
}

impl Engine {
    /// Build the pipeline from the device settings.
    pub fn new(settings: &Settings) -> Self {
        let correction = ErrorCorrection {
            offset: settings.cv_offset_error,
            gain: settings.cv_gain_error,
        };
        let k = settings.pitch_knob_nonlinearity;
        Self {
            mode: Mode::Normal,
            castor: Oscillator::new(
                OscillatorConfig::for_channel(Channel::Castor, settings),
                correction,
            ),
            pollux: Oscillator::new(
                OscillatorConfig::for_channel(Channel::Pollux, settings),
                correction,
            ),
            quantizer: QuantizerConfig::default(),
            ramp_table: RampTable::new(),
            knob_shape: Lut::generate(k, Volts::ONE - k),
            tweak_held: false,
            held: TweakCodes::default(),
            tweaks: TweakCodes::default(),
        }
    }

    /// Load both persisted calibration tables, falling back to defaults for
    /// any block that is missing or invalid.
    pub fn load_calibration<N: Nvm>(&mut self, nvm: &mut N) {
        // Errors are logged at the source; the defaults are always safe to
        // run with.
        let _ = self.ramp_table.load(nvm, RAMP_TABLE_NVM_BASE);
        let _ = self.quantizer.load(nvm, QUANTIZER_NVM_BASE);
    }

    /// The active performance mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switch performance modes, keeping the timer's hard-sync retrigger in
    /// step.
    pub fn set_mode<P: PulseOut>(&mut self, mode: Mode, pulse: &mut P) {
        self.mode = mode;
        pulse.set_hard_sync(mode == Mode::HardSync);
    }

    /// Advance to the next mode in the front-panel cycling order.
    pub fn cycle_mode<P: PulseOut>(&mut self, pulse: &mut P) -> Mode {
        self.set_mode(self.mode.next(), pulse);
        self.mode
    }

    /// Report whether the panel's tweak button is held.
    ///
    /// While held, the physical knobs steer the alternate parameter set:
    /// the main knob codes freeze at their last values and the live codes
    /// are latched as tweak codes instead.
    pub fn set_tweak(&mut self, held: bool, snapshot: &AdcSnapshot) {
        if held && !self.tweak_held {
            self.held = TweakCodes {
                pitch: [
                    snapshot.get(ScanChannel::CastorPitchKnob),
                    snapshot.get(ScanChannel::PolluxPitchKnob),
                ],
                pulse: [
                    snapshot.get(ScanChannel::CastorPulseKnob),
                    snapshot.get(ScanChannel::PolluxPulseKnob),
                ],
            };
        }
        self.tweak_held = held;
    }

    /// Run one full sample cycle and write the results to the drivers.
    pub fn tick<P: PulseOut, D: DacOut>(
        &mut self,
        snapshot: &AdcSnapshot,
        lfo_amplitude: Volts,
        pulse: &mut P,
        dac: &mut D,
    ) {
        if self.tweak_held {
            self.tweaks = TweakCodes {
                pitch: [
                    snapshot.get(ScanChannel::CastorPitchKnob),
                    snapshot.get(ScanChannel::PolluxPitchKnob),
                ],
                pulse: [
                    snapshot.get(ScanChannel::CastorPulseKnob),
                    snapshot.get(ScanChannel::PolluxPulseKnob),
                ],
            };
        }

        let mut castor_inputs = self.inputs_for(Channel::Castor, snapshot, lfo_amplitude);
        let mut pollux_inputs = self.inputs_for(Channel::Pollux, snapshot, lfo_amplitude);

        self.castor.update(&castor_inputs, &self.quantizer, &self.knob_shape);
        self.pollux.update(&pollux_inputs, &self.quantizer, &self.knob_shape);

        // Cross the fresh stage-one pitches over before stage two; a
        // follower sees this cycle's reference, not last cycle's.
        castor_inputs.reference_pitch = self.pollux.pitch;
        pollux_inputs.reference_pitch = self.castor.pitch;

        self.castor.post_update(&castor_inputs, &self.ramp_table);
        self.pollux.post_update(&pollux_inputs, &self.ramp_table);

        pulse.set_periods(self.castor.outputs.period, self.pollux.outputs.period);
        dac.write(
            Channel::Castor,
            self.castor.outputs.ramp_code,
            self.castor.pulse_width,
        );
        dac.write(
            Channel::Pollux,
            self.pollux.outputs.ramp_code,
            self.pollux.pulse_width,
        );
    }

    fn inputs_for(
        &self,
        channel: Channel,
        snapshot: &AdcSnapshot,
        lfo_amplitude: Volts,
    ) -> OscillatorInputs {
        let (pitch_cv, pitch_knob, pulse_cv, pulse_knob) = match channel {
            Channel::Castor => (
                ScanChannel::CastorPitchCv,
                ScanChannel::CastorPitchKnob,
                ScanChannel::CastorPulseCv,
                ScanChannel::CastorPulseKnob,
            ),
            Channel::Pollux => (
                ScanChannel::PolluxPitchCv,
                ScanChannel::PolluxPitchKnob,
                ScanChannel::PolluxPulseCv,
                ScanChannel::PolluxPulseKnob,
            ),
        };
        let idx = channel.index();
        let (pitch_knob_code, pulse_knob_code) = if self.tweak_held {
            (self.held.pitch[idx], self.held.pulse[idx])
        } else {
            (snapshot.get(pitch_knob), snapshot.get(pulse_knob))
        };
        OscillatorInputs {
            mode: self.mode,
            pitch_cv_code: snapshot.get(pitch_cv),
            pitch_knob_code,
            tweak_pitch_knob_code: self.tweaks.pitch[idx],
            pulse_cv_code: snapshot.get(pulse_cv),
            pulse_knob_code,
            tweak_pulse_knob_code: self.tweaks.pulse[idx],
            lfo_knob_code: snapshot.get(ScanChannel::LfoKnob),
            lfo_amplitude,
            reference_pitch: Volts::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::SCAN_CHANNEL_COUNT;

    struct TestPulse {
        periods: Option<(u32, u32)>,
        hard_sync: bool,
    }

    impl TestPulse {
        fn new() -> Self {
            Self {
                periods: None,
                hard_sync: false,
            }
        }
    }

    impl PulseOut for TestPulse {
        fn set_period(&mut self, channel: Channel, period: u32) {
            let (castor, pollux) = self.periods.unwrap_or((0, 0));
            self.periods = Some(match channel {
                Channel::Castor => (period, pollux),
                Channel::Pollux => (castor, period),
            });
        }
        fn set_periods(&mut self, castor: u32, pollux: u32) {
            self.periods = Some((castor, pollux));
        }
        fn set_hard_sync(&mut self, enabled: bool) {
            self.hard_sync = enabled;
        }
    }

    struct TestDac {
        writes: Vec<(Channel, u16, u16)>,
    }

    impl DacOut for TestDac {
        fn write(&mut self, channel: Channel, ramp_code: u16, pulse_width: u16) {
            self.writes.push((channel, ramp_code, pulse_width));
        }
    }

    fn engine() -> Engine {
        let mut settings = Settings::default();
        settings.smooth_initial_gain = Volts::ONE;
        Engine::new(&settings)
    }

    /// All CVs unpatched (4095), all knobs centered.
    fn snapshot() -> AdcSnapshot {
        AdcSnapshot::new([4095, 2048, 4095, 2048, 2048, 2048, 2048, 4095, 4095])
    }

    fn set(snapshot: &mut [u16; SCAN_CHANNEL_COUNT], channel: ScanChannel, code: u16) {
        snapshot[channel as usize] = code;
    }

    #[test]
    fn tick_writes_both_channels() {
        let mut engine = engine();
        let mut pulse = TestPulse::new();
        let mut dac = TestDac { writes: Vec::new() };

        engine.tick(&snapshot(), Volts::ZERO, &mut pulse, &mut dac);

        let (castor_period, pollux_period) = pulse.periods.expect("periods written");
        assert_eq!(castor_period, engine.castor.outputs.period);
        assert_eq!(pollux_period, engine.pollux.outputs.period);
        assert_eq!(dac.writes.len(), 2);
        assert_eq!(dac.writes[0].0, Channel::Castor);
        assert_eq!(dac.writes[1].0, Channel::Pollux);
    }

    #[test]
    fn unpatched_pollux_follows_castor_in_the_same_cycle() {
        let mut engine = engine();
        let mut pulse = TestPulse::new();
        let mut dac = TestDac { writes: Vec::new() };

        let mut codes = [4095u16, 2048, 4095, 2048, 2048, 2048, 2048, 4095, 4095];
        // Castor's CV patched to mid-range; Pollux's CV left unpatched.
        set(&mut codes, ScanChannel::CastorPitchCv, 2047);
        engine.tick(&AdcSnapshot::new(codes), Volts::ZERO, &mut pulse, &mut dac);

        let diff = (engine.pollux.pitch - engine.castor.pitch).abs();
        assert!(diff < Volts::from_num(0.01), "diff {}", diff);
        // The centered knob's residual is a fraction of a millivolt, so the
        // two periods land within a few timer ticks of each other.
        let castor_period = engine.castor.outputs.period as i64;
        let pollux_period = engine.pollux.outputs.period as i64;
        assert!((castor_period - pollux_period).abs() < 16);
    }

    #[test]
    fn patched_pollux_runs_free() {
        let mut engine = engine();
        let mut pulse = TestPulse::new();
        let mut dac = TestDac { writes: Vec::new() };

        let mut codes = [4095u16, 2048, 4095, 2048, 2048, 2048, 2048, 4095, 4095];
        set(&mut codes, ScanChannel::PolluxPitchCv, 1024);
        engine.tick(&AdcSnapshot::new(codes), Volts::ZERO, &mut pulse, &mut dac);

        // Castor rests at 1 V; Pollux's own CV puts it far away.
        assert!((engine.pollux.pitch - engine.castor.pitch).abs() > Volts::ONE);
    }

    #[test]
    fn hard_sync_mode_drives_the_timer_flag() {
        let mut engine = engine();
        let mut pulse = TestPulse::new();

        engine.set_mode(Mode::HardSync, &mut pulse);
        assert!(pulse.hard_sync);
        assert_eq!(engine.mode(), Mode::HardSync);

        engine.set_mode(Mode::Normal, &mut pulse);
        assert!(!pulse.hard_sync);
    }

    #[test]
    fn cycle_mode_walks_the_panel_order() {
        let mut engine = engine();
        let mut pulse = TestPulse::new();
        assert_eq!(engine.cycle_mode(&mut pulse), Mode::LfoPwm);
        assert_eq!(engine.cycle_mode(&mut pulse), Mode::LfoFm);
        assert_eq!(engine.cycle_mode(&mut pulse), Mode::HardSync);
        assert!(pulse.hard_sync);
        assert_eq!(engine.cycle_mode(&mut pulse), Mode::Normal);
        assert!(!pulse.hard_sync);
    }

    #[test]
    fn load_calibration_picks_up_saved_tables_and_survives_erased_nvm() {
        use crate::io::{MemNvm, RAMP_TABLE_NVM_BASE};

        let mut nvm = MemNvm::<4096>::new();

        // Erased NVM: everything stays at defaults.
        let mut engine = engine();
        engine.load_calibration(&mut nvm);
        assert_eq!(engine.ramp_table.entries()[0].castor, 0);
        assert_eq!(engine.quantizer, QuantizerConfig::default());

        // A calibrated device finds its codes again on the next boot.
        engine.ramp_table.set_code(0, Channel::Castor, 321);
        engine.ramp_table.save(&mut nvm, RAMP_TABLE_NVM_BASE);
        let mut fresh = self::engine();
        fresh.load_calibration(&mut nvm);
        assert_eq!(fresh.ramp_table.entries()[0].castor, 321);
    }

    #[test]
    fn holding_tweak_freezes_the_main_knobs() {
        let mut engine = engine();
        let mut pulse = TestPulse::new();
        let mut dac = TestDac { writes: Vec::new() };

        let codes = [4095u16, 2048, 4095, 2048, 2048, 2048, 2048, 4095, 4095];
        engine.tick(&AdcSnapshot::new(codes), Volts::ZERO, &mut pulse, &mut dac);
        let resting_pitch = engine.castor.pitch;

        // Button goes down, then the pitch knob turns full clockwise.
        engine.set_tweak(true, &AdcSnapshot::new(codes));
        let mut turned = codes;
        set(&mut turned, ScanChannel::CastorPitchKnob, 0);
        engine.tick(&AdcSnapshot::new(turned), Volts::ZERO, &mut pulse, &mut dac);

        // The main knob is frozen; only the fine tweak offset (at most a
        // semitone) moves the pitch.
        assert!((engine.castor.pitch - resting_pitch).abs() < Volts::from_num(0.1));

        // Released: the knob's new position takes effect.
        engine.set_tweak(false, &AdcSnapshot::new(turned));
        engine.tick(&AdcSnapshot::new(turned), Volts::ZERO, &mut pulse, &mut dac);
        assert!(engine.castor.pitch > resting_pitch + Volts::ONE);
    }
}
