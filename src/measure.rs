//! Oscilloscope measurements.
//!
//! Measurements are stored in the read-only measurement slots of the parameter
//! table, so that clients read them together with the rest of the parameters.

use crate::params::{
    schema::{Channel, MEAS_FIELDS},
    ParameterStore, ParameterTable,
};

/// Measurements of one input channel.
///
/// All the values are in V, except `freq`, in Hz, and `period`, in s.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct MeasurementResult {
    /// Minimum value.
    pub min: f32,
    /// Maximum value.
    pub max: f32,
    /// Amplitude, as half of the peak to peak value.
    pub amp: f32,
    /// Average value.
    pub avg: f32,
    /// Frequency.
    pub freq: f32,
    /// Period.
    pub period: f32,
}

impl MeasurementResult {
    fn fields(&self) -> [f32; MEAS_FIELDS] {
        [self.min, self.max, self.amp, self.avg, self.freq, self.period]
    }

    /// Reads the measurements of a channel from a parameter table.
    pub fn from_params(params: &ParameterTable, channel: Channel) -> MeasurementResult {
        let base = channel.measurement_base();
        let field = |n: usize| params.value(base + n);
        MeasurementResult {
            min: field(0),
            max: field(1),
            amp: field(2),
            avg: field(3),
            freq: field(4),
            period: field(5),
        }
    }

    fn write(&self, params: &mut ParameterTable, channel: Channel) {
        let base = channel.measurement_base();
        for (n, value) in self.fields().into_iter().enumerate() {
            params.set_value(base + n, value);
        }
    }
}

impl From<MeasurementResult> for bode_json::Measurement {
    fn from(m: MeasurementResult) -> bode_json::Measurement {
        bode_json::Measurement {
            min: m.min,
            max: m.max,
            amp: m.amp,
            avg: m.avg,
            freq: m.freq,
            period: m.period,
        }
    }
}

/// Measurement merger.
///
/// Writes the measurements produced by the worker into the shared parameter
/// table.
#[derive(Debug, Clone)]
pub struct MeasurementMerger {
    params: ParameterStore,
}

impl MeasurementMerger {
    /// Creates a merger that writes into `params`.
    pub fn new(params: ParameterStore) -> MeasurementMerger {
        MeasurementMerger { params }
    }

    /// Merges the measurements of both channels.
    ///
    /// Only the measurement slots are replaced, and both channels are published
    /// together, so readers never see the measurements of one channel from a
    /// different acquisition than the other.
    pub fn merge(&self, ch1: &MeasurementResult, ch2: &MeasurementResult) {
        self.params.publish_with(|params| {
            ch1.write(params, Channel::Ch1);
            ch2.write(params, Channel::Ch2);
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::params::schema::{MEAS_CH1, MEAS_CH2, PID_12_KP};

    #[test]
    fn merge() {
        let store = ParameterStore::default();
        let merger = MeasurementMerger::new(store.clone());
        let before = store.load();
        let ch1 = MeasurementResult {
            min: -0.5,
            max: 0.5,
            amp: 0.5,
            avg: 0.0,
            freq: 1e3,
            period: 1e-3,
        };
        let ch2 = MeasurementResult {
            avg: 0.2,
            ..MeasurementResult::default()
        };
        merger.merge(&ch1, &ch2);

        let params = store.load();
        assert_eq!(params.value(MEAS_CH1), -0.5);
        assert_eq!(params.value(MEAS_CH2 + 3), 0.2);
        assert_eq!(MeasurementResult::from_params(&params, Channel::Ch1), ch1);
        assert_eq!(MeasurementResult::from_params(&params, Channel::Ch2), ch2);
        // only measurement slots change
        for index in 0..params.len() {
            if !(MEAS_CH1..MEAS_CH2 + MEAS_FIELDS).contains(&index) {
                assert_eq!(params[index], before[index]);
            }
        }
        assert_eq!(params.value(PID_12_KP), 0.0);
        // the snapshot used by clients is not affected
        assert_eq!(before.value(MEAS_CH1), 0.0);
    }
}
