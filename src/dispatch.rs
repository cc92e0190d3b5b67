//! Update dispatch.
//!
//! This module decides which subsystems need to be reconfigured after a
//! parameter update and sends the corresponding requests to the worker. It
//! also contains the generator frequency limiter, which is applied to every
//! update before the changes are classified.

use crate::{
    error::ConfigurationError,
    fpga::{BodeConfig, GeneratorConfig, OscilloscopeConfig, PidConfig},
    params::{
        schema::{classify, Channel, PidBlock, Subsystems, GEN_FREQUENCY, GEN_WAVEFORM},
        ParameterTable,
    },
};
use tokio::sync::mpsc;

/// Maximum generator frequency for the sine waveform, in Hz.
pub const SINE_MAX_FREQUENCY: f32 = 62.5e6;
/// Maximum generator frequency for the other waveforms, in Hz.
pub const MAX_FREQUENCY: f32 = 10e6;

/// Reconfiguration request.
///
/// Each request carries the complete configuration of one subsystem, decoded
/// from the table that was published together with the request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Oscilloscope configuration.
    Oscilloscope(OscilloscopeConfig),
    /// Bode sweep configuration.
    Bode(BodeConfig),
    /// Generator channel configuration.
    Generator(Channel, GeneratorConfig),
    /// PID block configuration.
    Pid(PidBlock, PidConfig),
}

impl Request {
    /// Returns the subsystem that this request reconfigures.
    pub fn subsystem(&self) -> Subsystems {
        match self {
            Request::Oscilloscope(_) => Subsystems::OSCILLOSCOPE,
            Request::Bode(_) => Subsystems::BODE,
            Request::Generator(channel, _) => channel.generator_subsystem(),
            Request::Pid(block, _) => block.subsystem(),
        }
    }
}

/// Limits a generator frequency according to its waveform selector.
pub fn limit_frequency(freq: f32, waveform: f32) -> f32 {
    let ceiling = if waveform.round() == 0.0 {
        SINE_MAX_FREQUENCY
    } else {
        MAX_FREQUENCY
    };
    freq.min(ceiling)
}

/// Limits the frequencies of both generator channels of a table.
pub fn limit_generators(params: &mut ParameterTable) {
    for channel in Channel::ALL {
        let base = channel.generator_base();
        let freq = params.value(base + GEN_FREQUENCY);
        let limited = limit_frequency(freq, params.value(base + GEN_WAVEFORM));
        if limited != freq {
            tracing::info!(%channel, freq, limited, "generator frequency limited");
            params.set_value(base + GEN_FREQUENCY, limited);
        }
    }
}

/// Returns the subsystems affected by the differences between two tables.
///
/// Only slots that require an FPGA update are considered.
pub fn changed_subsystems(old: &ParameterTable, new: &ParameterTable) -> Subsystems {
    old.iter()
        .zip(new.iter())
        .enumerate()
        .filter(|(_, (a, b))| a.fpga_update && a.value != b.value)
        .fold(Subsystems::empty(), |acc, (index, _)| acc | classify(index))
}

/// Builds the requests that reconfigure `subsystems` from a table in internal
/// units.
///
/// Fails if the configuration of any of the subsystems is inconsistent.
pub fn requests(
    params: &ParameterTable,
    subsystems: Subsystems,
) -> Result<Vec<Request>, ConfigurationError> {
    let mut requests = Vec::new();
    if subsystems.contains(Subsystems::OSCILLOSCOPE) {
        requests.push(Request::Oscilloscope(OscilloscopeConfig::from_params(
            params,
        )?));
    }
    for channel in Channel::ALL {
        if subsystems.contains(channel.generator_subsystem()) {
            requests.push(Request::Generator(
                channel,
                GeneratorConfig::from_params(params, channel)?,
            ));
        }
    }
    for block in PidBlock::ALL {
        if subsystems.contains(block.subsystem()) {
            requests.push(Request::Pid(block, PidConfig::from_params(params, block)));
        }
    }
    if subsystems.contains(Subsystems::BODE) {
        requests.push(Request::Bode(BodeConfig::from_params(params)?));
    }
    Ok(requests)
}

/// Update dispatcher.
///
/// Sends reconfiguration requests to the worker. The dispatcher can be cloned
/// and all the clones feed the same worker.
#[derive(Debug, Clone)]
pub struct UpdateDispatcher {
    sender: mpsc::UnboundedSender<Request>,
}

impl UpdateDispatcher {
    /// Creates a dispatcher, returning also the receiver that the worker
    /// drains.
    pub fn new() -> (UpdateDispatcher, mpsc::UnboundedReceiver<Request>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (UpdateDispatcher { sender }, receiver)
    }

    /// Sends requests to the worker.
    ///
    /// Fails with [`ConfigurationError::WorkerUnavailable`] if the worker has
    /// stopped.
    pub fn send(&self, requests: Vec<Request>) -> Result<(), ConfigurationError> {
        for request in requests {
            tracing::debug!(subsystem = ?request.subsystem(), "dispatching reconfiguration");
            self.sender
                .send(request)
                .map_err(|_| ConfigurationError::WorkerUnavailable)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        error::Error,
        params::{schema::*, ParameterStore},
    };
    use bode_json::ParameterWrite;

    fn write(index: usize, value: f32) -> ParameterWrite {
        ParameterWrite { index, value }
    }

    fn drain(receiver: &mut mpsc::UnboundedReceiver<Request>) -> Vec<Request> {
        std::iter::from_fn(|| receiver.try_recv().ok()).collect()
    }

    #[rstest::rstest]
    #[test]
    #[case(62.5e6, 100e6, 0.0)]
    #[case(62.5e6, 62.5e6, 0.0)]
    #[case(10e6, 20e6, 1.0)]
    #[case(10e6, 20e6, 3.0)]
    #[case(5e6, 5e6, 2.0)]
    fn frequency_limits(#[case] expect: f32, #[case] freq: f32, #[case] waveform: f32) {
        assert_eq!(expect, limit_frequency(freq, waveform));
    }

    #[test]
    fn only_fpga_slots_count() {
        let old = ParameterTable::default();
        let mut new = old.clone();
        new.set_value(MIN_Y, -3.0);
        new.set_value(PROBE_ATT_CH2, 1.0);
        new.set_value(MEAS_CH1, 1.0);
        assert_eq!(changed_subsystems(&old, &new), Subsystems::empty());
        new.set_value(PID_22_KI, 5.0);
        new.set_value(BODE_POINTS, 50.0);
        assert_eq!(
            changed_subsystems(&old, &new),
            Subsystems::PID_22 | Subsystems::BODE | Subsystems::GEN_CH1
        );
    }

    #[test]
    fn requests_follow_subsystems() {
        let params = ParameterTable::default();
        let requests = requests(&params, Subsystems::all()).unwrap();
        assert_eq!(requests.len(), 8);
        let subsystems = requests
            .iter()
            .fold(Subsystems::empty(), |acc, r| acc | r.subsystem());
        assert_eq!(subsystems, Subsystems::all());
        assert_eq!(
            requests[1],
            Request::Generator(Channel::Ch1, GeneratorConfig::default())
        );
    }

    #[test]
    fn sequential_updates() {
        let (dispatcher, mut receiver) = UpdateDispatcher::new();
        let store = ParameterStore::default();
        store
            .apply(&[write(GEN_CH2 + GEN_ENABLE, 1.0)], &dispatcher)
            .unwrap();
        store
            .apply(&[write(GEN_CH2 + GEN_AMPLITUDE, 0.2)], &dispatcher)
            .unwrap();
        let requests = drain(&mut receiver);
        assert_eq!(requests.len(), 2);
        let Request::Generator(Channel::Ch2, last) = &requests[1] else {
            panic!("unexpected request {:?}", requests[1]);
        };
        assert!(last.enable);
        assert_eq!(last.amplitude, 0.2);
    }

    #[test]
    fn one_request_per_changed_subsystem() {
        let (dispatcher, mut receiver) = UpdateDispatcher::new();
        let store = ParameterStore::default();
        let cases = [
            (write(PID_11_KI, 7.0), Subsystems::PID_11),
            (write(PID_21_SP, 100.0), Subsystems::PID_21),
            (write(GEN_CH1 + GEN_FREQUENCY, 5e3), Subsystems::GEN_CH1),
            (write(GEN_CH2 + GEN_AMPLITUDE, 0.3), Subsystems::GEN_CH2),
        ];
        for (write, subsystem) in cases {
            assert_eq!(store.apply(&[write], &dispatcher), Ok(subsystem));
            let requests = drain(&mut receiver);
            assert_eq!(requests.len(), 1, "{write:?}");
            assert_eq!(requests[0].subsystem(), subsystem);
        }
    }

    #[test]
    fn limiter_applies_on_waveform_change() {
        let (dispatcher, mut receiver) = UpdateDispatcher::new();
        let store = ParameterStore::default();
        store
            .apply(&[write(GEN_CH1 + GEN_FREQUENCY, 30e6)], &dispatcher)
            .unwrap();
        assert_eq!(store.snapshot().value(GEN_CH1 + GEN_FREQUENCY), 30e6);
        store
            .apply(&[write(GEN_CH1 + GEN_WAVEFORM, 2.0)], &dispatcher)
            .unwrap();
        assert_eq!(store.snapshot().value(GEN_CH1 + GEN_FREQUENCY), 10e6);
        let requests = drain(&mut receiver);
        assert_eq!(requests.len(), 2);
        assert!(matches!(
            &requests[1],
            Request::Generator(Channel::Ch1, config) if config.frequency == 10e6
        ));
    }

    #[test]
    fn stopped_worker() {
        let (dispatcher, receiver) = UpdateDispatcher::new();
        drop(receiver);
        let store = ParameterStore::default();
        assert_eq!(
            store.apply(&[write(PID_11_ENABLE, 1.0)], &dispatcher),
            Err(Error::Configuration(ConfigurationError::WorkerUnavailable))
        );
    }
}
