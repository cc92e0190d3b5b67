//! Bode sweep.
//!
//! A sweep excites the device under test with a sine wave from generator
//! output 1, stepping through a list of frequencies. At each frequency, the
//! amplitude and phase of the input (channel 1) and output (channel 2) of the
//! device are estimated, and the gain and phase shift are recorded.

use crate::{
    dsp,
    fpga::{BodeConfig, FrequencyScale, ADC_SAMPLE_RATE, DECIMATIONS},
};

// Minimum number of samples per period of the excitation.
const MIN_SAMPLES_PER_PERIOD: f64 = 4.0;

/// Returns the frequencies of the sweep points, in Hz.
pub fn frequencies(config: &BodeConfig) -> Vec<f32> {
    let (start, end) = (f64::from(config.start_freq), f64::from(config.end_freq));
    let steps = config.points.saturating_sub(1).max(1) as f64;
    (0..config.points)
        .map(|n| {
            let x = n as f64 / steps;
            let freq = match config.scale {
                FrequencyScale::Linear => start + x * (end - start),
                FrequencyScale::Logarithmic => start * (end / start).powf(x),
            };
            freq as f32
        })
        .collect()
}

/// Returns the decimation used to measure a sweep point.
///
/// This is the largest decimation that still gives enough samples per period
/// of the excitation, so that the acquisition spans as many periods as
/// possible.
pub fn decimation(freq: f32) -> u32 {
    DECIMATIONS
        .iter()
        .copied()
        .filter(|&d| ADC_SAMPLE_RATE / f64::from(d) >= MIN_SAMPLES_PER_PERIOD * f64::from(freq))
        .max()
        .unwrap_or(DECIMATIONS[0])
}

/// Gain and phase shift of one sweep point.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Response {
    /// Gain in dB.
    pub gain: f32,
    /// Phase shift in degrees, in the interval (-180, 180].
    pub phase: f32,
}

/// Measures the response of the device under test at `freq`, given the
/// waveforms of its input and output.
pub fn response(input: &[f32], output: &[f32], freq: f32, samp_rate: f64) -> Response {
    let (a_in, p_in) = dsp::tone(input, f64::from(freq), samp_rate);
    let (a_out, p_out) = dsp::tone(output, f64::from(freq), samp_rate);
    let gain = if a_in > 0.0 && a_out > 0.0 {
        20.0 * (a_out / a_in).log10()
    } else {
        f32::NEG_INFINITY
    };
    Response {
        gain,
        phase: wrap_degrees((p_out - p_in).to_degrees()),
    }
}

/// Averages the responses of several acquisitions of the same point.
///
/// Phases are averaged as unit vectors, so that values close to ±180 degrees
/// do not cancel.
pub fn average(responses: &[Response]) -> Response {
    if responses.is_empty() {
        return Response::default();
    }
    let n = responses.len() as f32;
    let gain = responses.iter().map(|r| r.gain).sum::<f32>() / n;
    let (sin, cos) = responses.iter().fold((0.0f32, 0.0f32), |(s, c), r| {
        let (sin, cos) = r.phase.to_radians().sin_cos();
        (s + sin, c + cos)
    });
    Response {
        gain,
        phase: wrap_degrees(sin.atan2(cos).to_degrees()),
    }
}

/// Wraps a phase in degrees to the interval (-180, 180].
pub fn wrap_degrees(phase: f32) -> f32 {
    let wrapped = (phase + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

/// Pads a sweep trace to `length` samples by repeating its last value.
///
/// Traces longer than `length` are truncated.
pub fn pad(values: &[f32], length: usize) -> Vec<f32> {
    let last = values.last().copied().unwrap_or_default();
    values
        .iter()
        .copied()
        .chain(std::iter::repeat(last))
        .take(length)
        .collect()
}
