//! Parameter index schema.
//!
//! The parameter table is a fixed sequence of [`PARAMS_NUM`] slots. The index
//! of a slot is its identity and is shared with the remote UI, so indices must
//! never be renumbered. The index space is partitioned into contiguous ranges,
//! one per reconfiguration target. Both validation and update dispatch consult
//! this module, and no other module hardcodes slot indices.

use super::Parameter;
use bitflags::bitflags;
use std::ops::Range;

/// Number of parameter slots.
pub const PARAMS_NUM: usize = 89;

/// Oscilloscope, trigger and display slots.
pub const OSCILLOSCOPE_PARAMS: Range<usize> = 0..42;
/// Bode sweep slots.
pub const BODE_PARAMS: Range<usize> = 42..50;
/// Signal generator slots.
pub const GENERATOR_PARAMS: Range<usize> = 50..65;
/// PID controller slots.
pub const PID_PARAMS: Range<usize> = 65..89;

const _: () = assert!(OSCILLOSCOPE_PARAMS.start == 0);
const _: () = assert!(OSCILLOSCOPE_PARAMS.end == BODE_PARAMS.start);
const _: () = assert!(BODE_PARAMS.end == GENERATOR_PARAMS.start);
const _: () = assert!(GENERATOR_PARAMS.end == PID_PARAMS.start);
const _: () = assert!(PID_PARAMS.end == PARAMS_NUM);
const _: () = assert!(PID_PARAMS.end - PID_PARAMS.start == 4 * PARAMS_PER_PID);
const _: () = assert!(GEN_CH2 + GEN_PARAMS_PER_CHANNEL == GEN_AWG_REFRESH);
const _: () = assert!(GEN_AWG_REFRESH + 1 == GENERATOR_PARAMS.end);

// Oscilloscope time window, in us.
/// Start of the requested time window.
pub const XMIN: usize = 0;
/// End of the requested time window.
pub const XMAX: usize = 1;
/// Trigger mode: 0 auto, 1 normal, 2 single.
pub const TRIG_MODE: usize = 2;
/// Trigger source: 0 channel 1, 1 channel 2, 2 external.
pub const TRIG_SOURCE: usize = 3;
/// Trigger edge: 0 rising, 1 falling.
pub const TRIG_EDGE: usize = 4;
/// Trigger delay in us.
pub const TRIG_DELAY: usize = 5;
/// Trigger level.
///
/// Stored as a fraction of the ADC full scale, presented in V.
pub const TRIG_LEVEL: usize = 6;
/// Single acquisition button.
pub const SINGLE_BUTTON: usize = 7;
/// Time range selector, indexes the decimation table.
pub const TIME_RANGE: usize = 8;
/// Display time unit (read-only): 0 us, 1 ms, 2 s.
pub const TIME_UNIT: usize = 9;
/// Average samples when decimating.
pub const AVG_AT_DEC: usize = 10;
/// Automatic settings request.
pub const AUTO_FLAG: usize = 11;
/// Displayed Y range minimum in V.
pub const MIN_Y: usize = 12;
/// Displayed Y range maximum in V.
pub const MAX_Y: usize = 13;
/// Force the displayed X range.
pub const FORCE_X: usize = 14;
/// First measurement slot of input channel 1.
pub const MEAS_CH1: usize = 15;
/// First measurement slot of input channel 2.
pub const MEAS_CH2: usize = 21;
/// Number of measurement slots per channel: min, max, amp, avg, freq, period.
pub const MEAS_FIELDS: usize = 6;
/// Probe attenuation of channel 1: 0 x1, 1 x10.
pub const PROBE_ATT_CH1: usize = 27;
/// Front-end range of channel 1: 0 LV, 1 HV.
pub const GAIN_CH1: usize = 28;
/// Probe attenuation of channel 2: 0 x1, 1 x10.
pub const PROBE_ATT_CH2: usize = 29;
/// Front-end range of channel 2: 0 LV, 1 HV.
pub const GAIN_CH2: usize = 30;
/// Y range reset request.
pub const RESET_Y_RANGE: usize = 31;
/// Displayed trace offset of channel 1 in V.
pub const TRACE_OFFSET_CH1: usize = 32;
/// Displayed trace offset of channel 2 in V.
pub const TRACE_OFFSET_CH2: usize = 33;
/// Time window start in the display time unit (read-only).
pub const GUI_XMIN: usize = 34;
/// Time window end in the display time unit (read-only).
pub const GUI_XMAX: usize = 35;
/// Y range minimum normalized to the maximum scale (read-only).
pub const MIN_Y_NORM: usize = 36;
/// Y range maximum normalized to the maximum scale (read-only).
pub const MAX_Y_NORM: usize = 37;
/// Trace offset of channel 1 normalized to the maximum scale (read-only).
pub const TRACE_OFFSET_NORM_CH1: usize = 38;
/// Trace offset of channel 2 normalized to the maximum scale (read-only).
pub const TRACE_OFFSET_NORM_CH2: usize = 39;
/// Volts per ADC full scale of channel 1 (read-only).
pub const SCALE_CH1: usize = 40;
/// Volts per ADC full scale of channel 2 (read-only).
pub const SCALE_CH2: usize = 41;

/// Bode sweep start request.
pub const BODE_START: usize = 42;
/// Bode excitation amplitude in V.
pub const BODE_AMPLITUDE: usize = 43;
/// Number of acquisitions averaged per Bode point.
pub const BODE_AVERAGING: usize = 44;
/// Bode excitation DC bias in V.
pub const BODE_DC_BIAS: usize = 45;
/// Bode sweep start frequency in Hz.
pub const BODE_START_FREQ: usize = 46;
/// Bode sweep end frequency in Hz.
pub const BODE_END_FREQ: usize = 47;
/// Number of Bode sweep points.
pub const BODE_POINTS: usize = 48;
/// Bode frequency scale: 0 linear, 1 logarithmic.
pub const BODE_SCALE: usize = 49;

/// First slot of generator channel 1.
pub const GEN_CH1: usize = 50;
/// First slot of generator channel 2.
pub const GEN_CH2: usize = 57;
/// Number of slots per generator channel.
pub const GEN_PARAMS_PER_CHANNEL: usize = 7;
/// Generator trigger mode offset: 0 internal, 1 external rising, 2 external falling.
pub const GEN_TRIG_MODE: usize = 0;
/// Generator waveform offset: 0 sine, 1 square, 2 triangle, 3 sawtooth.
pub const GEN_WAVEFORM: usize = 1;
/// Generator output enable offset.
pub const GEN_ENABLE: usize = 2;
/// Generator single burst offset.
pub const GEN_SINGLE: usize = 3;
/// Generator amplitude offset, in V.
pub const GEN_AMPLITUDE: usize = 4;
/// Generator frequency offset, in Hz.
pub const GEN_FREQUENCY: usize = 5;
/// Generator DC offset offset, in V.
pub const GEN_OFFSET: usize = 6;
/// Reload the waveform tables of both generator channels.
pub const GEN_AWG_REFRESH: usize = 64;

/// Number of slots per PID block.
pub const PARAMS_PER_PID: usize = 6;
/// PID enable offset.
pub const PID_ENABLE: usize = 0;
/// PID integrator reset offset.
pub const PID_RESET: usize = 1;
/// PID setpoint offset.
pub const PID_SETPOINT: usize = 2;
/// PID proportional gain offset.
pub const PID_KP: usize = 3;
/// PID integral gain offset.
pub const PID_KI: usize = 4;
/// PID derivative gain offset.
pub const PID_KD: usize = 5;

macro_rules! pid_params {
    ($($block:literal => $base:expr),*) => {
        paste::paste! {
            $(
                #[doc = concat!("PID ", stringify!($block), " enable.")]
                pub const [<PID_ $block _ENABLE>]: usize = $base + PID_ENABLE;
                #[doc = concat!("PID ", stringify!($block), " integrator reset.")]
                pub const [<PID_ $block _RESET>]: usize = $base + PID_RESET;
                #[doc = concat!("PID ", stringify!($block), " setpoint.")]
                pub const [<PID_ $block _SP>]: usize = $base + PID_SETPOINT;
                #[doc = concat!("PID ", stringify!($block), " proportional gain.")]
                pub const [<PID_ $block _KP>]: usize = $base + PID_KP;
                #[doc = concat!("PID ", stringify!($block), " integral gain.")]
                pub const [<PID_ $block _KI>]: usize = $base + PID_KI;
                #[doc = concat!("PID ", stringify!($block), " derivative gain.")]
                pub const [<PID_ $block _KD>]: usize = $base + PID_KD;
            )*
        }
    };
}

pid_params!(
    11 => PID_PARAMS.start,
    12 => PID_PARAMS.start + PARAMS_PER_PID,
    21 => PID_PARAMS.start + 2 * PARAMS_PER_PID,
    22 => PID_PARAMS.start + 3 * PARAMS_PER_PID
);

bitflags! {
    /// Set of subsystems that can be reconfigured independently.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Subsystems: u8 {
        /// Oscilloscope acquisition and trigger.
        const OSCILLOSCOPE = 1 << 0;
        /// Bode sweep.
        const BODE = 1 << 1;
        /// Generator channel 1.
        const GEN_CH1 = 1 << 2;
        /// Generator channel 2.
        const GEN_CH2 = 1 << 3;
        /// PID 11.
        const PID_11 = 1 << 4;
        /// PID 12.
        const PID_12 = 1 << 5;
        /// PID 21.
        const PID_21 = 1 << 6;
        /// PID 22.
        const PID_22 = 1 << 7;
    }
}

/// Input or output channel.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Channel {
    /// Channel 1.
    Ch1,
    /// Channel 2.
    Ch2,
}

impl Channel {
    /// Both channels, in order.
    pub const ALL: [Channel; 2] = [Channel::Ch1, Channel::Ch2];

    /// Index of the channel (0 or 1).
    pub fn index(self) -> usize {
        match self {
            Channel::Ch1 => 0,
            Channel::Ch2 => 1,
        }
    }

    /// First slot of the generator block of this channel.
    pub fn generator_base(self) -> usize {
        match self {
            Channel::Ch1 => GEN_CH1,
            Channel::Ch2 => GEN_CH2,
        }
    }

    /// First measurement slot of this channel.
    pub fn measurement_base(self) -> usize {
        match self {
            Channel::Ch1 => MEAS_CH1,
            Channel::Ch2 => MEAS_CH2,
        }
    }

    /// Generator subsystem of this channel.
    pub fn generator_subsystem(self) -> Subsystems {
        match self {
            Channel::Ch1 => Subsystems::GEN_CH1,
            Channel::Ch2 => Subsystems::GEN_CH2,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "channel {}", self.index() + 1)
    }
}

/// PID controller block.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PidBlock {
    /// PID 11.
    Pid11,
    /// PID 12.
    Pid12,
    /// PID 21.
    Pid21,
    /// PID 22.
    Pid22,
}

impl PidBlock {
    /// All PID blocks, in index order.
    pub const ALL: [PidBlock; 4] = [
        PidBlock::Pid11,
        PidBlock::Pid12,
        PidBlock::Pid21,
        PidBlock::Pid22,
    ];

    /// Index of the block (0 to 3).
    pub fn index(self) -> usize {
        match self {
            PidBlock::Pid11 => 0,
            PidBlock::Pid12 => 1,
            PidBlock::Pid21 => 2,
            PidBlock::Pid22 => 3,
        }
    }

    /// First slot of this block.
    pub fn base(self) -> usize {
        PID_PARAMS.start + PARAMS_PER_PID * self.index()
    }

    /// Subsystem flag of this block.
    pub fn subsystem(self) -> Subsystems {
        match self {
            PidBlock::Pid11 => Subsystems::PID_11,
            PidBlock::Pid12 => Subsystems::PID_12,
            PidBlock::Pid21 => Subsystems::PID_21,
            PidBlock::Pid22 => Subsystems::PID_22,
        }
    }
}

impl std::fmt::Display for PidBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        let name = match self {
            PidBlock::Pid11 => "PID 11",
            PidBlock::Pid12 => "PID 12",
            PidBlock::Pid21 => "PID 21",
            PidBlock::Pid22 => "PID 22",
        };
        f.write_str(name)
    }
}

/// Returns the subsystems that must be reconfigured when the slot at `index`
/// changes.
///
/// Bode slots also name generator channel 1, because the sweep drives that
/// output. The waveform refresh slot names both generator channels. Indices
/// outside the table give an empty set.
pub fn classify(index: usize) -> Subsystems {
    if OSCILLOSCOPE_PARAMS.contains(&index) {
        Subsystems::OSCILLOSCOPE
    } else if BODE_PARAMS.contains(&index) {
        Subsystems::BODE | Subsystems::GEN_CH1
    } else if index == GEN_AWG_REFRESH {
        Subsystems::GEN_CH1 | Subsystems::GEN_CH2
    } else if (GEN_CH1..GEN_CH2).contains(&index) {
        Subsystems::GEN_CH1
    } else if GENERATOR_PARAMS.contains(&index) {
        Subsystems::GEN_CH2
    } else if PID_PARAMS.contains(&index) {
        PidBlock::ALL[(index - PID_PARAMS.start) / PARAMS_PER_PID].subsystem()
    } else {
        Subsystems::empty()
    }
}

const fn rw(name: &'static str, value: f32, fpga_update: bool, min: f32, max: f32) -> Parameter {
    Parameter {
        name,
        value,
        fpga_update,
        read_only: false,
        min_val: min,
        max_val: max,
    }
}

const fn ro(name: &'static str, value: f32) -> Parameter {
    Parameter {
        name,
        value,
        fpga_update: false,
        read_only: true,
        min_val: f32::MIN,
        max_val: f32::MAX,
    }
}

macro_rules! generator_params {
    ($ch:literal) => {
        [
            rw(concat!("gen_trig_mode_ch", $ch), 0.0, true, 0.0, 2.0),
            rw(concat!("gen_sig_type_ch", $ch), 0.0, true, 0.0, 3.0),
            rw(concat!("gen_enable_ch", $ch), 0.0, true, 0.0, 1.0),
            rw(concat!("gen_single_ch", $ch), 0.0, true, 0.0, 1.0),
            rw(concat!("gen_sig_amp_ch", $ch), 0.5, true, 0.0, 1.0),
            rw(concat!("gen_sig_freq_ch", $ch), 1000.0, true, 0.0, 125e6),
            rw(concat!("gen_sig_dcoff_ch", $ch), 0.0, true, -1.0, 1.0),
        ]
    };
}

macro_rules! pid_block_params {
    ($block:literal) => {
        [
            rw(concat!("pid_", $block, "_enable"), 0.0, true, 0.0, 1.0),
            rw(concat!("pid_", $block, "_rst"), 0.0, true, 0.0, 1.0),
            rw(concat!("pid_", $block, "_sp"), 0.0, true, -8192.0, 8191.0),
            rw(concat!("pid_", $block, "_kp"), 0.0, true, -8192.0, 8191.0),
            rw(concat!("pid_", $block, "_ki"), 0.0, true, -8192.0, 8191.0),
            rw(concat!("pid_", $block, "_kd"), 0.0, true, -8192.0, 8191.0),
        ]
    };
}

const GEN_CH1_DEFAULTS: [Parameter; GEN_PARAMS_PER_CHANNEL] = generator_params!("1");
const GEN_CH2_DEFAULTS: [Parameter; GEN_PARAMS_PER_CHANNEL] = generator_params!("2");
const PID_DEFAULTS: [[Parameter; PARAMS_PER_PID]; 4] = [
    pid_block_params!("11"),
    pid_block_params!("12"),
    pid_block_params!("21"),
    pid_block_params!("22"),
];

/// Default parameter table, in internal units.
pub const DEFAULT_PARAMS: [Parameter; PARAMS_NUM] = [
    rw("xmin", 0.0, true, -1e7, 1e7),
    rw("xmax", 131.072, true, -1e7, 1e7),
    rw("trig_mode", 0.0, true, 0.0, 2.0),
    rw("trig_source", 0.0, true, 0.0, 2.0),
    rw("trig_edge", 0.0, true, 0.0, 1.0),
    rw("trig_delay", 0.0, true, -1e7, 1e7),
    rw("trig_level", 0.0, true, -1.0, 1.0),
    rw("single_btn", 0.0, true, 0.0, 1.0),
    rw("time_range", 0.0, true, 0.0, 5.0),
    ro("time_units", 0.0),
    rw("en_avg_at_dec", 1.0, true, 0.0, 1.0),
    rw("auto_flag", 0.0, true, 0.0, 1.0),
    rw("min_y", -1.0, false, -1000.0, 1000.0),
    rw("max_y", 1.0, false, -1000.0, 1000.0),
    rw("forcex_flag", 0.0, false, 0.0, 1.0),
    ro("meas_min_ch1", 0.0),
    ro("meas_max_ch1", 0.0),
    ro("meas_amp_ch1", 0.0),
    ro("meas_avg_ch1", 0.0),
    ro("meas_freq_ch1", 0.0),
    ro("meas_per_ch1", 0.0),
    ro("meas_min_ch2", 0.0),
    ro("meas_max_ch2", 0.0),
    ro("meas_amp_ch2", 0.0),
    ro("meas_avg_ch2", 0.0),
    ro("meas_freq_ch2", 0.0),
    ro("meas_per_ch2", 0.0),
    rw("prb_att_ch1", 0.0, false, 0.0, 1.0),
    rw("gain_ch1", 0.0, true, 0.0, 1.0),
    rw("prb_att_ch2", 0.0, false, 0.0, 1.0),
    rw("gain_ch2", 0.0, true, 0.0, 1.0),
    rw("gui_reset_y_range", 0.0, false, 0.0, 1.0),
    rw("gen_DC_offs_1", 0.0, false, -100.0, 100.0),
    rw("gen_DC_offs_2", 0.0, false, -100.0, 100.0),
    ro("gui_xmin", 0.0),
    ro("gui_xmax", 131.072),
    ro("min_y_norm", -1.0),
    ro("max_y_norm", 1.0),
    ro("gen_DC_norm_1", 0.0),
    ro("gen_DC_norm_2", 0.0),
    ro("scale_ch1", 1.0),
    ro("scale_ch2", 1.0),
    rw("bode_start_measure", 0.0, true, 0.0, 1.0),
    rw("bode_gen_amp", 0.5, true, 0.0, 1.0),
    rw("bode_gen_avg", 1.0, true, 1.0, 10.0),
    rw("bode_gen_dc_bias", 0.0, true, -1.0, 1.0),
    rw("bode_start_freq", 1000.0, true, 1.0, 62.5e6),
    rw("bode_end_freq", 1e6, true, 1.0, 62.5e6),
    rw("bode_points", 101.0, true, 2.0, 1024.0),
    rw("bode_scale_type", 1.0, true, 0.0, 1.0),
    GEN_CH1_DEFAULTS[0],
    GEN_CH1_DEFAULTS[1],
    GEN_CH1_DEFAULTS[2],
    GEN_CH1_DEFAULTS[3],
    GEN_CH1_DEFAULTS[4],
    GEN_CH1_DEFAULTS[5],
    GEN_CH1_DEFAULTS[6],
    GEN_CH2_DEFAULTS[0],
    GEN_CH2_DEFAULTS[1],
    GEN_CH2_DEFAULTS[2],
    GEN_CH2_DEFAULTS[3],
    GEN_CH2_DEFAULTS[4],
    GEN_CH2_DEFAULTS[5],
    GEN_CH2_DEFAULTS[6],
    rw("gen_awg_refresh", 0.0, true, 0.0, 1.0),
    PID_DEFAULTS[0][0],
    PID_DEFAULTS[0][1],
    PID_DEFAULTS[0][2],
    PID_DEFAULTS[0][3],
    PID_DEFAULTS[0][4],
    PID_DEFAULTS[0][5],
    PID_DEFAULTS[1][0],
    PID_DEFAULTS[1][1],
    PID_DEFAULTS[1][2],
    PID_DEFAULTS[1][3],
    PID_DEFAULTS[1][4],
    PID_DEFAULTS[1][5],
    PID_DEFAULTS[2][0],
    PID_DEFAULTS[2][1],
    PID_DEFAULTS[2][2],
    PID_DEFAULTS[2][3],
    PID_DEFAULTS[2][4],
    PID_DEFAULTS[2][5],
    PID_DEFAULTS[3][0],
    PID_DEFAULTS[3][1],
    PID_DEFAULTS[3][2],
    PID_DEFAULTS[3][3],
    PID_DEFAULTS[3][4],
    PID_DEFAULTS[3][5],
];
