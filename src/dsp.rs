//! Signal measurements.
//!
//! This module contains the computations done on the acquired waveforms: the
//! oscilloscope measurements and the single tone amplitude and phase
//! estimation used by the Bode sweep.

use crate::measure::MeasurementResult;
use std::f64::consts::PI;

// Crossings of the mean are only counted once the signal has moved away from
// it by this fraction of the amplitude.
const HYSTERESIS: f32 = 0.1;
// Signals with a smaller peak to peak amplitude have no frequency.
const MIN_AMPLITUDE: f32 = 1e-4;

/// Measures a waveform.
///
/// `samples` are in V and `samp_rate` is in samples per second. The frequency
/// is estimated from the spacing of the rising crossings of the mean value. If
/// fewer than two crossings are found, the frequency and period are zero.
pub fn measure(samples: &[f32], samp_rate: f64) -> MeasurementResult {
    if samples.is_empty() {
        return MeasurementResult::default();
    }
    let (min, max) = samples
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &x| {
            (min.min(x), max.max(x))
        });
    let avg = (samples.iter().map(|&x| f64::from(x)).sum::<f64>() / samples.len() as f64) as f32;
    let amp = (max - min) / 2.0;
    let freq = if max - min > MIN_AMPLITUDE {
        crossing_frequency(samples, avg, amp * HYSTERESIS, samp_rate)
    } else {
        0.0
    };
    MeasurementResult {
        min,
        max,
        amp,
        avg,
        freq,
        period: if freq > 0.0 { 1.0 / freq } else { 0.0 },
    }
}

fn crossing_frequency(samples: &[f32], mean: f32, hysteresis: f32, samp_rate: f64) -> f32 {
    let mut below = false;
    let mut first = None;
    let mut last = 0;
    let mut count = 0usize;
    for (k, &x) in samples.iter().enumerate() {
        if x < mean - hysteresis {
            below = true;
        } else if below && x >= mean + hysteresis {
            below = false;
            first.get_or_insert(k);
            last = k;
            count += 1;
        }
    }
    match first {
        Some(first) if count >= 2 && last > first => {
            ((count - 1) as f64 * samp_rate / (last - first) as f64) as f32
        }
        _ => 0.0,
    }
}

/// Estimates the amplitude and phase of a tone of known frequency.
///
/// The estimate uses the largest whole number of periods that fits in
/// `samples`, after removing the mean. The phase is in radians and refers to a
/// cosine that starts at the first sample.
pub fn tone(samples: &[f32], freq: f64, samp_rate: f64) -> (f32, f32) {
    let period = samp_rate / freq;
    let periods = (samples.len() as f64 / period).floor();
    let len = if periods >= 1.0 {
        ((periods * period).round() as usize).min(samples.len())
    } else {
        samples.len()
    };
    if len == 0 {
        return (0.0, 0.0);
    }
    let samples = &samples[..len];
    let mean = samples.iter().map(|&x| f64::from(x)).sum::<f64>() / len as f64;
    let omega = 2.0 * PI * freq / samp_rate;
    let (i, q) = samples
        .iter()
        .enumerate()
        .fold((0.0f64, 0.0f64), |(i, q), (k, &x)| {
            let x = f64::from(x) - mean;
            let (sin, cos) = (omega * k as f64).sin_cos();
            (i + x * cos, q + x * sin)
        });
    let amplitude = 2.0 * i.hypot(q) / len as f64;
    (amplitude as f32, (-q).atan2(i) as f32)
}
