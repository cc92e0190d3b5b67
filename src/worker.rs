//! Acquisition worker.
//!
//! The worker owns the FPGA. It applies the reconfiguration requests sent by
//! the [`UpdateDispatcher`](crate::dispatch::UpdateDispatcher), runs the
//! oscilloscope acquisition cycles and the Bode sweeps, and publishes the
//! resulting signals and measurements.
//!
//! Requests are only handled at safe points: before each acquisition and while
//! waiting for a trigger. Requests that arrive together are coalesced, so that
//! each subsystem is configured once with its latest configuration.

use crate::{
    bode::{self, Response},
    dispatch::Request,
    dsp,
    error::ConfigurationError,
    fpga::{
        BodeConfig, Fpga, GeneratorConfig, OscilloscopeConfig, PidConfig, TriggerMode,
        TriggerSource, ACQ_BUFFER_SAMPLES,
    },
    measure::MeasurementMerger,
    params::{
        schema::{Channel, PidBlock, Subsystems, BODE_PARAMS, BODE_START},
        ParameterStore, ParameterTable,
    },
    signals::SignalPool,
    units,
};
use anyhow::{Context, Result};
use bytes::Bytes;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Worker state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for requests.
    Idle,
    /// Applying requests to the given subsystems.
    Configuring(Subsystems),
    /// Running continuous acquisitions.
    Acquiring,
    /// Running one acquisition.
    SingleShot,
    /// Measuring a point of a Bode sweep.
    Sweeping {
        /// Index of the point.
        point: usize,
    },
}

impl From<WorkerState> for bode_json::WorkerState {
    fn from(state: WorkerState) -> bode_json::WorkerState {
        match state {
            WorkerState::Idle => bode_json::WorkerState::Idle,
            WorkerState::Configuring(_) => bode_json::WorkerState::Configuring,
            WorkerState::Acquiring => bode_json::WorkerState::Acquiring,
            WorkerState::SingleShot => bode_json::WorkerState::SingleShot,
            WorkerState::Sweeping { .. } => bode_json::WorkerState::Sweeping,
        }
    }
}

/// Worker status.
///
/// This struct gives shared access to the state of the worker, the number of
/// acquisition cycles completed, and the last error. It behaves as an
/// `Arc<...>`.
#[derive(Debug, Clone)]
pub struct WorkerStatus(Arc<Mutex<Status>>);

#[derive(Debug, Clone)]
struct Status {
    state: WorkerState,
    cycles: u64,
    last_error: Option<ConfigurationError>,
}

impl WorkerStatus {
    fn new() -> WorkerStatus {
        WorkerStatus(Arc::new(Mutex::new(Status {
            state: WorkerState::Idle,
            cycles: 0,
            last_error: None,
        })))
    }

    /// Returns the worker state.
    pub fn state(&self) -> WorkerState {
        self.0.lock().unwrap().state
    }

    /// Returns the number of acquisition cycles completed.
    pub fn cycles(&self) -> u64 {
        self.0.lock().unwrap().cycles
    }

    /// Returns the error of the last configuration or acquisition, if it
    /// failed.
    pub fn last_error(&self) -> Option<ConfigurationError> {
        self.0.lock().unwrap().last_error.clone()
    }

    /// Converts the status to its JSON representation.
    pub fn to_json(&self) -> bode_json::WorkerStatus {
        let status = self.0.lock().unwrap();
        bode_json::WorkerStatus {
            state: status.state.into(),
            cycles: status.cycles,
            last_error: status.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.0.lock().unwrap().state = state;
    }

    fn add_cycle(&self) {
        self.0.lock().unwrap().cycles += 1;
    }

    fn set_error(&self, error: Option<ConfigurationError>) {
        self.0.lock().unwrap().last_error = error;
    }
}

// Configuration last applied to the FPGA.
#[derive(Debug, Clone, Default)]
struct HardwareConfig {
    oscilloscope: OscilloscopeConfig,
    generators: [GeneratorConfig; 2],
    pids: [PidConfig; 4],
    bode: BodeConfig,
}

impl HardwareConfig {
    fn update(&mut self, request: Request) {
        match request {
            Request::Oscilloscope(config) => self.oscilloscope = config,
            Request::Bode(config) => self.bode = config,
            Request::Generator(channel, config) => self.generators[channel.index()] = config,
            Request::Pid(block, config) => self.pids[block.index()] = config,
        }
    }

    fn apply(&self, fpga: &mut dyn Fpga, subsystems: Subsystems) -> Result<()> {
        if subsystems.intersects(Subsystems::OSCILLOSCOPE | Subsystems::BODE) {
            fpga.stop_acquisition()?;
        }
        if subsystems.contains(Subsystems::OSCILLOSCOPE) {
            fpga.configure_oscilloscope(&self.oscilloscope)
                .context("failed to configure oscilloscope")?;
        }
        for channel in Channel::ALL {
            if subsystems.contains(channel.generator_subsystem()) {
                fpga.configure_generator(channel, &self.generators[channel.index()])
                    .with_context(|| format!("failed to configure generator {channel}"))?;
            }
        }
        for block in PidBlock::ALL {
            if subsystems.contains(block.subsystem()) {
                fpga.configure_pid(block, &self.pids[block.index()])
                    .with_context(|| format!("failed to configure {block}"))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Sweep {
    frequencies: Vec<f32>,
    responses: Vec<Response>,
}

/// Acquisition worker.
#[derive(Debug)]
pub struct Worker {
    fpga: Box<dyn Fpga>,
    requests: mpsc::UnboundedReceiver<Request>,
    pending: Vec<Request>,
    closed: bool,
    params: ParameterStore,
    table: Option<Box<ParameterTable>>,
    merger: MeasurementMerger,
    signals: SignalPool,
    sender: broadcast::Sender<Bytes>,
    status: WorkerStatus,
    cancel: CancellationToken,
    poll_interval: Duration,
    state: WorkerState,
    config: HardwareConfig,
    sweep: Option<Sweep>,
}

impl Worker {
    /// Creates a new worker.
    ///
    /// The worker drives `fpga` according to the requests received through
    /// `requests`. Measurements are merged into `params`, and signals are
    /// published into `signals` and sent, serialized into [`Bytes`], to the
    /// `sender`. While an acquisition is armed, the FPGA is polled every
    /// `poll_interval`.
    pub fn new(
        fpga: Box<dyn Fpga>,
        requests: mpsc::UnboundedReceiver<Request>,
        params: ParameterStore,
        signals: SignalPool,
        sender: broadcast::Sender<Bytes>,
        poll_interval: Duration,
    ) -> Worker {
        Worker {
            fpga,
            requests,
            pending: Vec::new(),
            closed: false,
            merger: MeasurementMerger::new(params.clone()),
            params,
            table: None,
            signals,
            sender,
            status: WorkerStatus::new(),
            cancel: CancellationToken::new(),
            poll_interval,
            state: WorkerState::Idle,
            config: HardwareConfig::default(),
            sweep: None,
        }
    }

    /// Returns a [`WorkerStatus`] giving shared access to the worker status.
    pub fn status(&self) -> WorkerStatus {
        self.status.clone()
    }

    /// Returns the token that stops the worker when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns the worker state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Runs the worker.
    ///
    /// This function returns once the cancellation token is cancelled. Before
    /// returning, the acquisition is stopped, the generator outputs are
    /// disabled and the signal buffers are released.
    #[tracing::instrument(name = "worker", skip_all)]
    pub async fn run(mut self) -> Result<()> {
        while !self.cancel.is_cancelled() {
            self.step().await;
        }
        self.shutdown()
    }

    /// Runs one step of the state machine.
    ///
    /// Pending requests are applied first. Then, depending on the state, the
    /// worker waits for requests, runs one acquisition cycle, or measures one
    /// Bode sweep point. Errors are recorded in the [`WorkerStatus`].
    pub async fn step(&mut self) {
        self.drain();
        if !self.pending.is_empty() {
            let requests = std::mem::take(&mut self.pending);
            self.configure(requests);
        }
        let result = match self.state {
            WorkerState::Idle | WorkerState::Configuring(_) => {
                self.wait(None).await;
                Ok(())
            }
            WorkerState::Acquiring | WorkerState::SingleShot => self.acquisition_cycle().await,
            WorkerState::Sweeping { point } => self.sweep_point(point).await,
        };
        if let Err(err) = result {
            tracing::error!("acquisition failed: {err:#}");
            self.status
                .set_error(Some(ConfigurationError::Hardware(format!("{err:#}"))));
            self.sweep = None;
            if let Err(err) = self.fpga.stop_acquisition() {
                tracing::error!("error stopping acquisition: {err:#}");
            }
            self.set_state(WorkerState::Idle);
        }
    }

    fn set_state(&mut self, state: WorkerState) {
        if state != self.state {
            tracing::debug!(?state, "worker state");
        }
        self.state = state;
        self.status.set_state(state);
    }

    fn drain(&mut self) {
        loop {
            match self.requests.try_recv() {
                Ok(request) => self.pending.push(request),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
    }

    // Waits until a request arrives, the worker is cancelled, or the timeout
    // expires.
    async fn wait(&mut self, timeout: Option<Duration>) {
        let sleep = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            request = self.requests.recv(), if !self.closed => match request {
                Some(request) => self.pending.push(request),
                None => self.closed = true,
            },
            _ = self.cancel.cancelled() => {}
            _ = sleep => {}
        }
    }

    fn interrupted(&self) -> bool {
        self.cancel.is_cancelled() || !self.pending.is_empty()
    }

    fn configure(&mut self, requests: Vec<Request>) {
        let prior = self.state;
        let subsystems = requests
            .iter()
            .fold(Subsystems::empty(), |acc, r| acc | r.subsystem());
        self.set_state(WorkerState::Configuring(subsystems));
        let mut config = self.config.clone();
        for request in requests {
            config.update(request);
        }
        if let Err(err) = config.apply(self.fpga.as_mut(), subsystems) {
            tracing::error!(?subsystems, "configuration failed: {err:#}");
            // revert; this should not fail, since the previous configuration
            // was applied successfully
            if let Err(err) = self.config.apply(self.fpga.as_mut(), subsystems) {
                tracing::error!("error reverting configuration: {err:#}");
            }
            self.status
                .set_error(Some(ConfigurationError::Hardware(format!("{err:#}"))));
            self.set_state(prior);
            return;
        }
        tracing::info!(?subsystems, "configuration applied");
        self.config = config;
        self.status.set_error(None);

        let next = if subsystems.contains(Subsystems::BODE) && self.config.bode.start {
            let frequencies = bode::frequencies(&self.config.bode);
            tracing::info!(points = frequencies.len(), "starting Bode sweep");
            self.sweep = Some(Sweep {
                responses: Vec::with_capacity(frequencies.len()),
                frequencies,
            });
            WorkerState::Sweeping { point: 0 }
        } else if subsystems.contains(Subsystems::BODE) && self.sweep.take().is_some() {
            tracing::info!("Bode sweep cancelled");
            if let Err(err) = self.restore() {
                self.status
                    .set_error(Some(ConfigurationError::Hardware(format!("{err:#}"))));
            }
            self.acquisition_state()
        } else {
            match prior {
                WorkerState::Sweeping { .. } => prior,
                _ if subsystems.contains(Subsystems::OSCILLOSCOPE) => self.acquisition_state(),
                _ => prior,
            }
        };
        self.set_state(next);
    }

    fn acquisition_state(&self) -> WorkerState {
        if self.config.oscilloscope.single_shot() {
            WorkerState::SingleShot
        } else {
            WorkerState::Acquiring
        }
    }

    // Restores the configuration of the subsystems used by a Bode sweep.
    fn restore(&mut self) -> Result<()> {
        self.config.apply(
            self.fpga.as_mut(),
            Subsystems::OSCILLOSCOPE | Subsystems::GEN_CH1,
        )
    }

    // Arms an acquisition and waits for it to finish. Returns None if it was
    // interrupted by a request or by cancellation.
    async fn capture(&mut self) -> Result<Option<[Vec<f32>; 2]>> {
        self.fpga.start_acquisition()?;
        loop {
            self.wait(Some(self.poll_interval)).await;
            if self.interrupted() {
                self.fpga.stop_acquisition()?;
                return Ok(None);
            }
            if self.fpga.acquisition_done()? {
                break;
            }
        }
        let mut samples = [vec![0.0; ACQ_BUFFER_SAMPLES], vec![0.0; ACQ_BUFFER_SAMPLES]];
        for channel in Channel::ALL {
            self.fpga
                .read_samples(channel, &mut samples[channel.index()])
                .with_context(|| format!("failed to read samples of {channel}"))?;
        }
        Ok(Some(samples))
    }

    fn refresh_params(&mut self) -> &ParameterTable {
        self.params.load().copy_to(&mut self.table);
        self.table.get_or_insert_with(Default::default)
    }

    fn signal_length(&self) -> Result<usize> {
        Ok(self
            .signals
            .read()
            .context("signal buffers are not allocated")?
            .length())
    }

    fn publish(&self, frame: &[Vec<f32>]) -> Result<()> {
        let signals = self.signals.publish_all(frame)?;
        if self.sender.receiver_count() > 0 {
            // It is ok if send returns Err, because there might be no receiver
            // handles in this moment.
            let _ = self.sender.send(signals.to_bytes());
        }
        Ok(())
    }

    async fn acquisition_cycle(&mut self) -> Result<()> {
        let Some(mut samples) = self.capture().await? else {
            return Ok(());
        };
        let scales = units::get_scales(self.refresh_params());
        for channel in Channel::ALL {
            let scale = scales.channel(channel);
            for x in samples[channel.index()].iter_mut() {
                *x *= scale;
            }
        }

        let oscilloscope = &self.config.oscilloscope;
        let samp_rate = oscilloscope.sample_rate();
        let ch1 = dsp::measure(&samples[0], samp_rate);
        let ch2 = dsp::measure(&samples[1], samp_rate);
        self.merger.merge(&ch1, &ch2);

        let length = self.signal_length()?;
        let step = (ACQ_BUFFER_SAMPLES / length).max(1);
        let dt = step as f64 / samp_rate * 1e6;
        let delay = f64::from(oscilloscope.trigger_delay);
        let time: Vec<f32> = (0..length)
            .map(|k| (delay + k as f64 * dt) as f32)
            .collect();
        let decimate = |samples: &[f32]| {
            let decimated: Vec<f32> = samples.iter().step_by(step).copied().collect();
            bode::pad(&decimated, length)
        };
        self.publish(&[time, decimate(&samples[0]), decimate(&samples[1])])?;

        self.status.add_cycle();
        tracing::trace!(
            cycles = self.status.cycles(),
            ch1_amp = ch1.amp,
            ch2_amp = ch2.amp
        );
        if self.state == WorkerState::SingleShot {
            self.set_state(WorkerState::Idle);
        }
        Ok(())
    }

    async fn sweep_point(&mut self, point: usize) -> Result<()> {
        let Some(freq) = self
            .sweep
            .as_ref()
            .and_then(|sweep| sweep.frequencies.get(point).copied())
        else {
            return self.finish_sweep();
        };
        let bode = self.config.bode.clone();
        self.fpga
            .configure_generator(Channel::Ch1, &GeneratorConfig::bode_excitation(&bode, freq))
            .context("failed to configure Bode excitation")?;
        let oscilloscope = OscilloscopeConfig {
            trigger_mode: TriggerMode::Auto,
            trigger_source: TriggerSource::Ch1,
            trigger_delay: 0.0,
            single: false,
            decimation: bode::decimation(freq),
            ..self.config.oscilloscope.clone()
        };
        self.fpga.configure_oscilloscope(&oscilloscope)?;
        let samp_rate = oscilloscope.sample_rate();

        let mut responses = Vec::with_capacity(bode.averaging as usize);
        for _ in 0..bode.averaging {
            let Some(samples) = self.capture().await? else {
                // the point is measured again unless the sweep is cancelled
                return Ok(());
            };
            responses.push(bode::response(&samples[0], &samples[1], freq, samp_rate));
        }
        let response = bode::average(&responses);
        tracing::debug!(point, freq, gain = response.gain, phase = response.phase);
        if let Some(sweep) = self.sweep.as_mut() {
            sweep.responses.truncate(point);
            sweep.responses.push(response);
        }
        self.set_state(WorkerState::Sweeping { point: point + 1 });
        Ok(())
    }

    fn finish_sweep(&mut self) -> Result<()> {
        let sweep = self.sweep.take().context("no Bode sweep in progress")?;
        let length = self.signal_length()?;
        let gain: Vec<f32> = sweep.responses.iter().map(|r| r.gain).collect();
        let phase: Vec<f32> = sweep.responses.iter().map(|r| r.phase).collect();
        self.publish(&[
            bode::pad(&sweep.frequencies, length),
            bode::pad(&gain, length),
            bode::pad(&phase, length),
        ])?;
        self.params
            .set_bode_param(BODE_START - BODE_PARAMS.start, 0.0)?;
        self.config.bode.start = false;
        self.restore()?;
        tracing::info!(points = sweep.frequencies.len(), "Bode sweep finished");
        let next = self.acquisition_state();
        self.set_state(next);
        Ok(())
    }

    fn shutdown(mut self) -> Result<()> {
        tracing::info!("stopping worker");
        let result = (|| {
            self.fpga.stop_acquisition()?;
            for channel in Channel::ALL {
                let config = GeneratorConfig {
                    enable: false,
                    ..self.config.generators[channel.index()].clone()
                };
                self.fpga.configure_generator(channel, &config)?;
            }
            anyhow::Ok(())
        })();
        self.signals.release();
        self.set_state(WorkerState::Idle);
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        dispatch::{self, UpdateDispatcher},
        fpga::sim::Simulator,
        measure::MeasurementResult,
        params::schema::*,
        signals::{SIGNALS_NUM, SIGNAL_LENGTH},
    };
    use approx::assert_abs_diff_eq;
    use bode_json::ParameterWrite;

    struct Setup {
        worker: Worker,
        params: ParameterStore,
        dispatcher: UpdateDispatcher,
        signals: SignalPool,
    }

    impl Setup {
        fn new(fpga: Box<dyn Fpga>) -> Setup {
            let params = ParameterStore::default();
            let (dispatcher, receiver) = UpdateDispatcher::new();
            let signals = SignalPool::new();
            signals.allocate(SIGNALS_NUM, SIGNAL_LENGTH).unwrap();
            let (sender, _) = broadcast::channel(4);
            let worker = Worker::new(
                fpga,
                receiver,
                params.clone(),
                signals.clone(),
                sender,
                Duration::from_millis(1),
            );
            dispatcher
                .send(dispatch::requests(&params.load(), Subsystems::all()).unwrap())
                .unwrap();
            Setup {
                worker,
                params,
                dispatcher,
                signals,
            }
        }

        fn simulator() -> Setup {
            Setup::new(Box::new(Simulator::new(10e3)))
        }

        fn apply(&self, writes: &[(usize, f32)]) {
            let writes: Vec<ParameterWrite> = writes
                .iter()
                .map(|&(index, value)| ParameterWrite { index, value })
                .collect();
            self.params.apply(&writes, &self.dispatcher).unwrap();
        }
    }

    #[tokio::test]
    async fn acquisition() {
        let mut setup = Setup::simulator();
        setup.apply(&[(GEN_CH1 + GEN_ENABLE, 1.0), (TIME_RANGE, 2.0)]);
        setup.worker.step().await;
        assert_eq!(setup.worker.state(), WorkerState::Acquiring);
        let status = setup.worker.status();
        assert_eq!(status.cycles(), 1);
        assert_eq!(status.last_error(), None);

        let params = setup.params.load();
        let ch1 = MeasurementResult::from_params(&params, Channel::Ch1);
        assert_abs_diff_eq!(ch1.amp, 0.5, epsilon = 1e-3);
        assert_abs_diff_eq!(ch1.freq, 1e3, epsilon = 1.0);
        let ch2 = MeasurementResult::from_params(&params, Channel::Ch2);
        assert!(ch2.amp < ch1.amp && ch2.amp > 0.45, "{}", ch2.amp);

        let signals = setup.signals.read().unwrap();
        assert_abs_diff_eq!(signals.buffer(0).unwrap()[1], 8.192, epsilon = 1e-4);
        let trace = signals.buffer(1).unwrap();
        assert_abs_diff_eq!(
            trace.iter().copied().fold(f32::MIN, f32::max),
            0.5,
            epsilon = 1e-2
        );
    }

    #[tokio::test]
    async fn probe_attenuation_scales_traces() {
        let mut setup = Setup::simulator();
        setup.apply(&[
            (GEN_CH1 + GEN_ENABLE, 1.0),
            (TIME_RANGE, 2.0),
            (PROBE_ATT_CH1, 1.0),
        ]);
        setup.worker.step().await;
        let ch1 = MeasurementResult::from_params(&setup.params.load(), Channel::Ch1);
        assert_abs_diff_eq!(ch1.amp, 5.0, epsilon = 1e-2);
    }

    #[tokio::test]
    async fn single_shot() {
        let mut setup = Setup::simulator();
        setup.worker.step().await;
        assert_eq!(setup.worker.status().cycles(), 1);
        setup.apply(&[(SINGLE_BUTTON, 1.0)]);
        setup.worker.step().await;
        assert_eq!(setup.worker.state(), WorkerState::Idle);
        assert_eq!(setup.worker.status().state(), WorkerState::Idle);
        assert_eq!(setup.worker.status().cycles(), 2);

        // unrelated requests do not trigger a new acquisition
        setup.apply(&[(PID_11_KP, 3.0)]);
        setup.worker.drain();
        let requests = std::mem::take(&mut setup.worker.pending);
        setup.worker.configure(requests);
        assert_eq!(setup.worker.state(), WorkerState::Idle);

        setup.apply(&[(SINGLE_BUTTON, 0.0)]);
        setup.worker.step().await;
        assert_eq!(setup.worker.state(), WorkerState::Acquiring);
        assert_eq!(setup.worker.status().cycles(), 3);
    }

    #[tokio::test]
    async fn pending_request_aborts_armed_acquisition() {
        let mut setup = Setup::simulator();
        setup.apply(&[(TRIG_MODE, 1.0), (TRIG_LEVEL, 0.5)]);
        let params = setup.params.clone();
        let dispatcher = setup.dispatcher.clone();
        let update = async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            params
                .apply(&[ParameterWrite { index: TRIG_MODE, value: 0.0 }], &dispatcher)
                .unwrap();
        };
        tokio::join!(setup.worker.step(), update);
        assert_eq!(setup.worker.status().cycles(), 0);
        assert_eq!(setup.worker.state(), WorkerState::Acquiring);

        setup.worker.step().await;
        assert_eq!(setup.worker.status().cycles(), 1);
    }

    #[tokio::test]
    async fn bode_sweep() {
        let mut setup = Setup::simulator();
        setup.worker.step().await;
        setup.apply(&[
            (BODE_START_FREQ, 1e3),
            (BODE_END_FREQ, 100e3),
            (BODE_POINTS, 3.0),
            (BODE_START, 1.0),
        ]);
        for point in 0..3 {
            setup.worker.step().await;
            assert_eq!(setup.worker.state(), WorkerState::Sweeping { point: point + 1 });
        }
        setup.worker.step().await;
        assert_eq!(setup.worker.state(), WorkerState::Acquiring);
        assert_eq!(setup.params.load().value(BODE_START), 0.0);
        assert_eq!(setup.worker.status().last_error(), None);

        let signals = setup.signals.read().unwrap();
        let freq = signals.buffer(0).unwrap();
        for (f, expect) in freq.iter().zip([1e3, 1e4, 1e5]) {
            assert_abs_diff_eq!(*f, expect, epsilon = expect * 1e-4);
        }
        assert_eq!(freq[SIGNAL_LENGTH - 1], freq[2]);
        let gain = signals.buffer(1).unwrap();
        assert!(gain[0] > gain[1] && gain[1] > gain[2], "{:?}", &gain[..3]);
        assert_abs_diff_eq!(gain[2], -20.0, epsilon = 1.0);
        let phase = signals.buffer(2).unwrap();
        assert_abs_diff_eq!(phase[2], -75.1, epsilon = 2.0);
    }

    #[tokio::test]
    async fn bode_sweep_cancel() {
        let mut setup = Setup::simulator();
        setup.apply(&[(BODE_POINTS, 10.0), (BODE_START, 1.0)]);
        setup.worker.step().await;
        assert_eq!(setup.worker.state(), WorkerState::Sweeping { point: 1 });
        setup.apply(&[(BODE_START, 0.0)]);
        setup.worker.step().await;
        assert_eq!(setup.worker.state(), WorkerState::Acquiring);
        assert!(setup.worker.sweep.is_none());
    }

    #[derive(Debug)]
    struct BrokenGenerator(Simulator);

    impl Fpga for BrokenGenerator {
        fn configure_oscilloscope(&mut self, config: &OscilloscopeConfig) -> Result<()> {
            self.0.configure_oscilloscope(config)
        }

        fn configure_generator(&mut self, channel: Channel, config: &GeneratorConfig) -> Result<()> {
            anyhow::ensure!(!config.enable, "{channel} output stage fault");
            self.0.configure_generator(channel, config)
        }

        fn configure_pid(&mut self, block: PidBlock, config: &PidConfig) -> Result<()> {
            self.0.configure_pid(block, config)
        }

        fn start_acquisition(&mut self) -> Result<()> {
            self.0.start_acquisition()
        }

        fn stop_acquisition(&mut self) -> Result<()> {
            self.0.stop_acquisition()
        }

        fn acquisition_done(&mut self) -> Result<bool> {
            self.0.acquisition_done()
        }

        fn read_samples(&mut self, channel: Channel, samples: &mut [f32]) -> Result<()> {
            self.0.read_samples(channel, samples)
        }
    }

    #[tokio::test]
    async fn hardware_failure() {
        let mut setup = Setup::new(Box::new(BrokenGenerator(Simulator::new(10e3))));
        setup.worker.step().await;
        assert_eq!(setup.worker.status().cycles(), 1);
        setup.apply(&[(GEN_CH2 + GEN_ENABLE, 1.0)]);
        setup.worker.step().await;
        // acquisition continues with the previous configuration
        assert_eq!(setup.worker.state(), WorkerState::Acquiring);
        assert_eq!(setup.worker.status().cycles(), 2);
        assert!(matches!(
            setup.worker.status().last_error(),
            Some(ConfigurationError::Hardware(message)) if message.contains("output stage fault")
        ));
        assert!(!setup.worker.config.generators[1].enable);
        let json = setup.worker.status().to_json();
        assert_eq!(json.state, bode_json::WorkerState::Acquiring);
        assert!(json.last_error.is_some());
    }

    #[tokio::test]
    async fn shutdown() {
        let mut setup = Setup::simulator();
        setup.apply(&[(GEN_CH1 + GEN_ENABLE, 1.0)]);
        setup.worker.step().await;
        let status = setup.worker.status();
        setup.worker.cancellation_token().cancel();
        setup.worker.run().await.unwrap();
        assert_eq!(setup.signals.read(), None);
        assert_eq!(status.state(), WorkerState::Idle);
        assert!(status.cycles() >= 1);
    }
}
