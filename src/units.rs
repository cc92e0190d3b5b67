//! Unit transforms.
//!
//! This module converts the parameter table between internal units, which are
//! the ones consumed by the worker and the FPGA, and interface units, which are
//! the ones presented to the remote UI. The conversion depends on the probe
//! attenuation and front-end range of each input channel.
//!
//! Only the slots listed in [`SCALED_PARAMS`] change representation. The
//! derived display slots are recomputed by [`to_interface`] and left untouched
//! by [`to_internal`], so that `to_interface(to_internal(x)) == x` for every
//! table `x` produced by [`to_interface`].

use crate::params::{
    schema::{
        Channel, GAIN_CH1, GAIN_CH2, GUI_XMAX, GUI_XMIN, MAX_Y, MAX_Y_NORM, MIN_Y, MIN_Y_NORM,
        PROBE_ATT_CH1, PROBE_ATT_CH2, SCALE_CH1, SCALE_CH2, TIME_UNIT, TRACE_OFFSET_CH1,
        TRACE_OFFSET_CH2, TRACE_OFFSET_NORM_CH1, TRACE_OFFSET_NORM_CH2, TRIG_LEVEL, TRIG_SOURCE,
        XMAX, XMIN,
    },
    ParameterTable,
};

/// Input full scale in V with the LV front-end range.
pub const LV_FULL_SCALE: f32 = 1.0;
/// Input full scale in V with the HV front-end range.
pub const HV_FULL_SCALE: f32 = 20.0;
/// Attenuation of a x10 probe.
pub const PROBE_X10: f32 = 10.0;

/// Slots whose value is stored in internal units and presented in volts.
pub const SCALED_PARAMS: [usize; 1] = [TRIG_LEVEL];

/// Display scales of the input channels.
///
/// Each scale is the number of volts at the probe tip that corresponds to the
/// ADC full scale.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Scales {
    /// Channel 1 scale.
    pub ch1: f32,
    /// Channel 2 scale.
    pub ch2: f32,
    /// Largest of both scales.
    pub max: f32,
}

impl Scales {
    /// Returns the scale of a channel.
    pub fn channel(&self, channel: Channel) -> f32 {
        match channel {
            Channel::Ch1 => self.ch1,
            Channel::Ch2 => self.ch2,
        }
    }
}

/// Computes the scale of one channel from its probe attenuation and front-end
/// range selectors.
pub fn channel_scale(probe_att: f32, gain: f32) -> f32 {
    let probe = if probe_att >= 0.5 { PROBE_X10 } else { 1.0 };
    let front_end = if gain >= 0.5 {
        HV_FULL_SCALE
    } else {
        LV_FULL_SCALE
    };
    probe * front_end
}

/// Computes the display scales of both channels.
pub fn get_scales(params: &ParameterTable) -> Scales {
    let ch1 = channel_scale(params.value(PROBE_ATT_CH1), params.value(GAIN_CH1));
    let ch2 = channel_scale(params.value(PROBE_ATT_CH2), params.value(GAIN_CH2));
    Scales {
        ch1,
        ch2,
        max: ch1.max(ch2),
    }
}

/// Returns the factor that converts the slot at `index` from internal to
/// interface units.
///
/// The factor is 1 for slots that are not in [`SCALED_PARAMS`]. The trigger
/// level uses the scale of the trigger source; the external trigger input is
/// not scaled.
pub fn scale_of(params: &ParameterTable, index: usize) -> f32 {
    match index {
        TRIG_LEVEL => {
            let scales = get_scales(params);
            match params.value(TRIG_SOURCE).round() as i32 {
                0 => scales.ch1,
                1 => scales.ch2,
                _ => 1.0,
            }
        }
        _ => 1.0,
    }
}

/// Converts a table from internal to interface units.
///
/// Scaled slots are multiplied by their scale, together with their bounds, and
/// the derived display slots are recomputed.
pub fn to_interface(params: &mut ParameterTable) {
    for index in SCALED_PARAMS {
        let scale = scale_of(params, index);
        let param = &mut params[index];
        param.value *= scale;
        param.min_val *= scale;
        param.max_val *= scale;
    }
    update_display(params);
}

/// Converts a table from interface to internal units.
///
/// This is the inverse of [`to_interface`] for the scaled slots. Derived
/// display slots are not modified.
pub fn to_internal(params: &mut ParameterTable) {
    for index in SCALED_PARAMS {
        let scale = scale_of(params, index);
        let param = &mut params[index];
        param.value /= scale;
        param.min_val /= scale;
        param.max_val /= scale;
    }
}

fn update_display(params: &mut ParameterTable) {
    let scales = get_scales(params);
    params.set_value(SCALE_CH1, scales.ch1);
    params.set_value(SCALE_CH2, scales.ch2);
    params.set_value(MIN_Y_NORM, params.value(MIN_Y) / scales.max);
    params.set_value(MAX_Y_NORM, params.value(MAX_Y) / scales.max);
    params.set_value(
        TRACE_OFFSET_NORM_CH1,
        params.value(TRACE_OFFSET_CH1) / scales.max,
    );
    params.set_value(
        TRACE_OFFSET_NORM_CH2,
        params.value(TRACE_OFFSET_CH2) / scales.max,
    );

    let (xmin, xmax) = (params.value(XMIN), params.value(XMAX));
    let (unit, factor) = time_unit(xmax - xmin);
    params.set_value(TIME_UNIT, unit);
    params.set_value(GUI_XMIN, xmin / factor);
    params.set_value(GUI_XMAX, xmax / factor);
}

// Display unit for a time span given in us: (selector, us per unit).
fn time_unit(span_us: f32) -> (f32, f32) {
    let span = span_us.abs();
    if span < 1e3 {
        (0.0, 1.0)
    } else if span < 1e6 {
        (1.0, 1e3)
    } else {
        (2.0, 1e6)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn table(probe1: f32, gain1: f32, probe2: f32, gain2: f32, source: f32) -> ParameterTable {
        let mut params = ParameterTable::default();
        params.set_value(PROBE_ATT_CH1, probe1);
        params.set_value(GAIN_CH1, gain1);
        params.set_value(PROBE_ATT_CH2, probe2);
        params.set_value(GAIN_CH2, gain2);
        params.set_value(TRIG_SOURCE, source);
        params
    }

    #[rstest::rstest]
    #[test]
    #[case(1.0, 0.0, 0.0)]
    #[case(10.0, 1.0, 0.0)]
    #[case(20.0, 0.0, 1.0)]
    #[case(200.0, 1.0, 1.0)]
    fn channel_scales(#[case] expect: f32, #[case] probe_att: f32, #[case] gain: f32) {
        assert_eq!(expect, channel_scale(probe_att, gain));
    }

    #[test]
    fn scales() {
        let params = table(1.0, 0.0, 0.0, 1.0, 0.0);
        assert_eq!(
            Scales {
                ch1: 10.0,
                ch2: 20.0,
                max: 20.0
            },
            get_scales(&params)
        );
    }

    #[rstest::rstest]
    #[test]
    #[case(0.5, 0.0, 0.0, 0.0, 0.0, 0.0)]
    #[case(-0.3, 1.0, 0.0, 0.0, 0.0, 0.0)]
    #[case(0.7, 0.0, 1.0, 1.0, 1.0, 1.0)]
    #[case(0.123, 1.0, 1.0, 0.0, 1.0, 1.0)]
    #[case(0.9, 1.0, 1.0, 1.0, 1.0, 2.0)]
    fn round_trip(
        #[case] level: f32,
        #[case] probe1: f32,
        #[case] gain1: f32,
        #[case] probe2: f32,
        #[case] gain2: f32,
        #[case] source: f32,
    ) {
        let mut internal = table(probe1, gain1, probe2, gain2, source);
        internal.set_value(TRIG_LEVEL, level);
        let mut iface = internal.clone();
        to_interface(&mut iface);

        let mut back = iface.clone();
        to_internal(&mut back);
        to_interface(&mut back);
        for index in 0..iface.len() {
            assert_relative_eq!(
                iface.value(index),
                back.value(index),
                max_relative = 1e-6
            );
            assert_relative_eq!(iface[index].min_val, back[index].min_val, max_relative = 1e-6);
            assert_relative_eq!(iface[index].max_val, back[index].max_val, max_relative = 1e-6);
        }
    }

    #[test]
    fn trigger_level_follows_source_scale() {
        let mut params = table(0.0, 1.0, 1.0, 0.0, 1.0);
        params.set_value(TRIG_LEVEL, 0.25);
        to_interface(&mut params);
        assert_relative_eq!(params.value(TRIG_LEVEL), 2.5);
        assert_relative_eq!(params[TRIG_LEVEL].min_val, -10.0);
        assert_relative_eq!(params[TRIG_LEVEL].max_val, 10.0);
    }

    #[test]
    fn display_slots() {
        let mut params = table(0.0, 1.0, 0.0, 0.0, 0.0);
        params.set_value(MIN_Y, -5.0);
        params.set_value(MAX_Y, 10.0);
        params.set_value(TRACE_OFFSET_CH2, 2.0);
        params.set_value(XMIN, 0.0);
        params.set_value(XMAX, 2500.0);
        to_interface(&mut params);
        assert_eq!(params.value(SCALE_CH1), 20.0);
        assert_eq!(params.value(SCALE_CH2), 1.0);
        assert_relative_eq!(params.value(MIN_Y_NORM), -0.25);
        assert_relative_eq!(params.value(MAX_Y_NORM), 0.5);
        assert_relative_eq!(params.value(TRACE_OFFSET_NORM_CH2), 0.1);
        assert_eq!(params.value(TIME_UNIT), 1.0);
        assert_relative_eq!(params.value(GUI_XMAX), 2.5);
    }

    #[rstest::rstest]
    #[test]
    #[case((0.0, 1.0), 131.072)]
    #[case((1.0, 1e3), 1e3)]
    #[case((1.0, 1e3), -5e4)]
    #[case((2.0, 1e6), 2e6)]
    fn time_units(#[case] expect: (f32, f32), #[case] span: f32) {
        assert_eq!(expect, time_unit(span));
    }
}
