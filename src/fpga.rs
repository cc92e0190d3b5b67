//! FPGA interface.
//!
//! This module contains the typed configurations of the instrument subsystems,
//! which are decoded from the parameter table, and the [`Fpga`] trait that
//! gives access to the oscilloscope acquisition, the signal generators and the
//! PID controllers.

use crate::{
    error::ConfigurationError,
    params::{schema::*, ParameterTable},
};
use anyhow::Result;

pub mod sim;

/// ADC sample rate in samples per second.
pub const ADC_SAMPLE_RATE: f64 = 125e6;
/// Number of samples captured per channel in one acquisition.
pub const ACQ_BUFFER_SAMPLES: usize = 16384;
/// Decimation factor for each time range selector value.
pub const DECIMATIONS: [u32; 6] = [1, 8, 64, 1024, 8192, 65536];

// Outputs are limited to the DAC full scale. Allow for the rounding of values
// that went through the UI.
const OUTPUT_FULL_SCALE: f32 = 1.0 + 1e-6;

macro_rules! selector {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
        pub enum $name {
            #[default]
            $($(#[$vmeta])* $variant),*
        }

        impl $name {
            const VARIANTS: &'static [$name] = &[$($name::$variant),*];

            /// Decodes the selector stored in a parameter slot.
            pub fn from_params(
                params: &ParameterTable,
                index: usize,
            ) -> Result<$name, ConfigurationError> {
                let value = params.value(index);
                let n = value.round();
                if n >= 0.0 && (n as usize) < Self::VARIANTS.len() {
                    Ok(Self::VARIANTS[n as usize])
                } else {
                    Err(ConfigurationError::InvalidSelector {
                        name: params[index].name,
                        value,
                    })
                }
            }
        }
    };
}

// The first variant of each selector is its default.
selector!(
    /// Oscilloscope trigger mode.
    TriggerMode {
        /// Acquire continuously, triggering on timeout if no edge is found.
        Auto,
        /// Acquire only on trigger edges.
        Normal,
        /// Acquire once on the next trigger edge.
        Single,
    }
);

selector!(
    /// Oscilloscope trigger source.
    TriggerSource {
        /// Input channel 1.
        Ch1,
        /// Input channel 2.
        Ch2,
        /// External trigger input.
        External,
    }
);

selector!(
    /// Trigger edge.
    Edge {
        /// Rising edge.
        Rising,
        /// Falling edge.
        Falling,
    }
);

selector!(
    /// Generator waveform.
    Waveform {
        /// Sine wave.
        Sine,
        /// Square wave.
        Square,
        /// Triangle wave.
        Triangle,
        /// Sawtooth wave.
        Sawtooth,
    }
);

selector!(
    /// Generator trigger.
    GeneratorTrigger {
        /// Free running.
        Internal,
        /// External trigger, rising edge.
        ExternalRising,
        /// External trigger, falling edge.
        ExternalFalling,
    }
);

selector!(
    /// Bode sweep frequency scale.
    FrequencyScale {
        /// Linearly spaced points.
        Linear,
        /// Logarithmically spaced points.
        Logarithmic,
    }
);

impl TriggerSource {
    /// Returns the input channel used as trigger source, if any.
    pub fn channel(self) -> Option<Channel> {
        match self {
            TriggerSource::Ch1 => Some(Channel::Ch1),
            TriggerSource::Ch2 => Some(Channel::Ch2),
            TriggerSource::External => None,
        }
    }
}

/// Oscilloscope configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct OscilloscopeConfig {
    /// Trigger mode.
    pub trigger_mode: TriggerMode,
    /// Trigger source.
    pub trigger_source: TriggerSource,
    /// Trigger edge.
    pub trigger_edge: Edge,
    /// Trigger delay in us.
    pub trigger_delay: f32,
    /// Trigger level as a fraction of the ADC full scale.
    pub trigger_level: f32,
    /// Single acquisition requested.
    pub single: bool,
    /// Decimation factor.
    pub decimation: u32,
    /// Average samples when decimating.
    pub average: bool,
    /// High voltage front-end range for each input channel.
    pub high_voltage: [bool; 2],
    /// Time window start in us.
    pub xmin: f32,
    /// Time window end in us.
    pub xmax: f32,
}

impl Default for OscilloscopeConfig {
    fn default() -> OscilloscopeConfig {
        OscilloscopeConfig {
            trigger_mode: TriggerMode::default(),
            trigger_source: TriggerSource::default(),
            trigger_edge: Edge::default(),
            trigger_delay: 0.0,
            trigger_level: 0.0,
            single: false,
            decimation: DECIMATIONS[0],
            average: true,
            high_voltage: [false; 2],
            xmin: 0.0,
            xmax: 131.072,
        }
    }
}

impl OscilloscopeConfig {
    /// Decodes the oscilloscope configuration from a table in internal units.
    pub fn from_params(params: &ParameterTable) -> Result<OscilloscopeConfig, ConfigurationError> {
        let range = params.value(TIME_RANGE).round();
        let decimation = DECIMATIONS
            .get(range as usize)
            .filter(|_| range >= 0.0)
            .copied()
            .ok_or(ConfigurationError::InvalidSelector {
                name: params[TIME_RANGE].name,
                value: params.value(TIME_RANGE),
            })?;
        let (xmin, xmax) = (params.value(XMIN), params.value(XMAX));
        if xmin >= xmax {
            return Err(ConfigurationError::EmptyTimeWindow { xmin, xmax });
        }
        Ok(OscilloscopeConfig {
            trigger_mode: TriggerMode::from_params(params, TRIG_MODE)?,
            trigger_source: TriggerSource::from_params(params, TRIG_SOURCE)?,
            trigger_edge: Edge::from_params(params, TRIG_EDGE)?,
            trigger_delay: params.value(TRIG_DELAY),
            trigger_level: params.value(TRIG_LEVEL),
            single: params.flag(SINGLE_BUTTON),
            decimation,
            average: params.flag(AVG_AT_DEC),
            high_voltage: [params.flag(GAIN_CH1), params.flag(GAIN_CH2)],
            xmin,
            xmax,
        })
    }

    /// Returns `true` if the configuration requests a single acquisition.
    pub fn single_shot(&self) -> bool {
        self.single || self.trigger_mode == TriggerMode::Single
    }

    /// Returns the sample rate after decimation, in samples per second.
    pub fn sample_rate(&self) -> f64 {
        ADC_SAMPLE_RATE / f64::from(self.decimation)
    }

    /// Returns the full scale of an input channel in V, at the ADC input.
    pub fn full_scale(&self, channel: Channel) -> f32 {
        if self.high_voltage[channel.index()] {
            crate::units::HV_FULL_SCALE
        } else {
            crate::units::LV_FULL_SCALE
        }
    }
}

/// Signal generator channel configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Trigger.
    pub trigger: GeneratorTrigger,
    /// Waveform.
    pub waveform: Waveform,
    /// Output enable.
    pub enable: bool,
    /// Generate a single period instead of a continuous signal.
    pub single: bool,
    /// Amplitude in V.
    pub amplitude: f32,
    /// Frequency in Hz.
    pub frequency: f32,
    /// DC offset in V.
    pub offset: f32,
}

impl Default for GeneratorConfig {
    fn default() -> GeneratorConfig {
        GeneratorConfig {
            trigger: GeneratorTrigger::default(),
            waveform: Waveform::default(),
            enable: false,
            single: false,
            amplitude: 0.5,
            frequency: 1000.0,
            offset: 0.0,
        }
    }
}

impl GeneratorConfig {
    /// Decodes the configuration of a generator channel from a table in
    /// internal units.
    pub fn from_params(
        params: &ParameterTable,
        channel: Channel,
    ) -> Result<GeneratorConfig, ConfigurationError> {
        let base = channel.generator_base();
        let config = GeneratorConfig {
            trigger: GeneratorTrigger::from_params(params, base + GEN_TRIG_MODE)?,
            waveform: Waveform::from_params(params, base + GEN_WAVEFORM)?,
            enable: params.flag(base + GEN_ENABLE),
            single: params.flag(base + GEN_SINGLE),
            amplitude: params.value(base + GEN_AMPLITUDE),
            frequency: params.value(base + GEN_FREQUENCY),
            offset: params.value(base + GEN_OFFSET),
        };
        config.check_output(match channel {
            Channel::Ch1 => "generator channel 1",
            Channel::Ch2 => "generator channel 2",
        })?;
        Ok(config)
    }

    /// Returns the configuration used to excite the device under test during a
    /// Bode sweep point.
    pub fn bode_excitation(bode: &BodeConfig, frequency: f32) -> GeneratorConfig {
        GeneratorConfig {
            trigger: GeneratorTrigger::Internal,
            waveform: Waveform::Sine,
            enable: true,
            single: false,
            amplitude: bode.amplitude,
            frequency,
            offset: bode.dc_bias,
        }
    }

    fn check_output(&self, output: &'static str) -> Result<(), ConfigurationError> {
        if self.amplitude + self.offset.abs() > OUTPUT_FULL_SCALE {
            return Err(ConfigurationError::OutputSaturation {
                output,
                amplitude: self.amplitude,
                offset: self.offset,
            });
        }
        Ok(())
    }
}

/// PID controller configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PidConfig {
    /// Controller enable.
    pub enable: bool,
    /// Hold the integrator in reset.
    pub reset: bool,
    /// Setpoint in ADC counts.
    pub setpoint: i16,
    /// Proportional gain.
    pub kp: i16,
    /// Integral gain.
    pub ki: i16,
    /// Derivative gain.
    pub kd: i16,
}

impl PidConfig {
    /// Decodes the configuration of a PID block from a table in internal units.
    pub fn from_params(params: &ParameterTable, block: PidBlock) -> PidConfig {
        let base = block.base();
        // Slot bounds match the 14-bit register range.
        let register = |offset: usize| params.value(base + offset).round() as i16;
        PidConfig {
            enable: params.flag(base + PID_ENABLE),
            reset: params.flag(base + PID_RESET),
            setpoint: register(PID_SETPOINT),
            kp: register(PID_KP),
            ki: register(PID_KI),
            kd: register(PID_KD),
        }
    }
}

/// Bode sweep configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BodeConfig {
    /// Sweep requested.
    pub start: bool,
    /// Excitation amplitude in V.
    pub amplitude: f32,
    /// Number of acquisitions averaged per point.
    pub averaging: u32,
    /// Excitation DC bias in V.
    pub dc_bias: f32,
    /// Start frequency in Hz.
    pub start_freq: f32,
    /// End frequency in Hz.
    pub end_freq: f32,
    /// Number of points.
    pub points: usize,
    /// Frequency scale.
    pub scale: FrequencyScale,
}

impl Default for BodeConfig {
    fn default() -> BodeConfig {
        BodeConfig {
            start: false,
            amplitude: 0.5,
            averaging: 1,
            dc_bias: 0.0,
            start_freq: 1000.0,
            end_freq: 1e6,
            points: 101,
            scale: FrequencyScale::Logarithmic,
        }
    }
}

impl BodeConfig {
    /// Decodes the Bode sweep configuration from a table in internal units.
    pub fn from_params(params: &ParameterTable) -> Result<BodeConfig, ConfigurationError> {
        let config = BodeConfig {
            start: params.flag(BODE_START),
            amplitude: params.value(BODE_AMPLITUDE),
            averaging: params.value(BODE_AVERAGING).round().max(1.0) as u32,
            dc_bias: params.value(BODE_DC_BIAS),
            start_freq: params.value(BODE_START_FREQ),
            end_freq: params.value(BODE_END_FREQ),
            points: params.value(BODE_POINTS).round().max(2.0) as usize,
            scale: FrequencyScale::from_params(params, BODE_SCALE)?,
        };
        if config.start_freq >= config.end_freq {
            return Err(ConfigurationError::EmptySweep {
                start: config.start_freq,
                end: config.end_freq,
            });
        }
        GeneratorConfig::bode_excitation(&config, config.start_freq)
            .check_output("Bode excitation")?;
        Ok(config)
    }
}

/// FPGA.
///
/// This trait gives access to the instrument hardware. Sample values are given
/// as fractions of the ADC full scale.
pub trait Fpga: Send + std::fmt::Debug {
    /// Configures the oscilloscope acquisition and trigger.
    fn configure_oscilloscope(&mut self, config: &OscilloscopeConfig) -> Result<()>;

    /// Configures a signal generator channel.
    fn configure_generator(&mut self, channel: Channel, config: &GeneratorConfig) -> Result<()>;

    /// Configures a PID controller block.
    fn configure_pid(&mut self, block: PidBlock, config: &PidConfig) -> Result<()>;

    /// Arms an acquisition.
    fn start_acquisition(&mut self) -> Result<()>;

    /// Disarms the current acquisition, if any.
    fn stop_acquisition(&mut self) -> Result<()>;

    /// Returns `true` if the armed acquisition has been triggered and its
    /// buffer is full.
    fn acquisition_done(&mut self) -> Result<bool>;

    /// Reads the samples of the last acquisition of an input channel.
    ///
    /// The first `samples.len()` samples, starting at the trigger position,
    /// are written to `samples`.
    fn read_samples(&mut self, channel: Channel, samples: &mut [f32]) -> Result<()>;
}
