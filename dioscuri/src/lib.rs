//! Control core for a two-voice analog oscillator module.
//!
//! Each of the module's two analog voices ("Castor" and "Pollux") is driven
//! by a timer period (frequency) and a pair of DAC codes (ramp charge
//! compensation and pulse width).  Every sample cycle this crate turns raw
//! ADC codes, device calibration data, and the active performance mode into
//! those actuation values:
//!
//! 1. The [scan] module hands the main loop a consistent snapshot of the
//!    continuously-scanned ADC inputs.
//! 2. Each [oscillator::Oscillator] computes its pitch and pulse width from
//!    the snapshot, applying error correction ([correction]), the knob
//!    response curve ([bezier]), the optional pitch quantizer ([quantizer])
//!    and the dynamic smoothing filter ([smoother]).
//! 3. The voice lookup engine ([outputs]) interpolates the pitch voltage
//!    through the compiled-in [pitch_table] and the calibrated, persisted
//!    [ramp_table] to produce the timer period and DAC ramp code.
//! 4. The [engine] module sequences both channels (including the same-cycle
//!    pitch dependency between them) and hands the results to the timer and
//!    DAC driver seams in [io].
//!
//! All arithmetic is 32-bit signed fixed point with 16 fractional bits
//! ([Volts]), provided by the [`fixed`] crate.  The crate is `no_std` and
//! never allocates; hardware drivers, the SysEx transport, and settings
//! persistence are collaborators behind the traits in [io].

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

use fixed::types::I16F16;

pub mod bezier;
pub mod correction;
pub mod engine;
pub mod fixedmath;
pub mod io;
pub mod oscillator;
pub mod outputs;
mod pack;
pub mod pitch_table;
pub mod quantizer;
pub mod ramp_table;
pub mod scan;
pub mod settings;
pub mod smoother;

/// A control voltage in volts, as a 32-bit signed fixed point number with 16
/// integer and 16 fractional bits.  Pitch voltages follow the 1 volt/octave
/// convention (12 semitones per volt); the lookup tables are defined over
/// exactly 0 to 7 volts.
pub type Volts = I16F16;

/// Highest code produced by the 12-bit ADC inputs.
pub const ADC_CODE_MAX: u16 = 4095;

/// Highest code accepted by the 12-bit DAC outputs.
pub const DAC_CODE_MAX: u16 = 4095;

/// Lowest pitch voltage covered by the lookup tables.
pub const PITCH_CV_MIN: Volts = Volts::lit("0");

/// Highest pitch voltage covered by the lookup tables.
pub const PITCH_CV_MAX: Volts = Volts::lit("7");

/// One of the module's two analog voices.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Channel {
    /// The first (master) voice.
    Castor = 0,
    /// The second voice, which may follow Castor.
    Pollux = 1,
}

impl Channel {
    /// The channel's index into per-channel arrays and calibration columns.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The other channel.
    pub const fn other(self) -> Channel {
        match self {
            Channel::Castor => Channel::Pollux,
            Channel::Pollux => Channel::Castor,
        }
    }
}
