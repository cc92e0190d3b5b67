//! bode-httpd application.
//!
//! This module contains a top-level structure [`App`] that represents the whole
//! bode-httpd application and a structure [`AppState`] that contains the
//! application state.

use crate::{
    args::Args,
    dispatch::{self, UpdateDispatcher},
    error::Error,
    fpga::{sim::Simulator, Fpga, ACQ_BUFFER_SAMPLES},
    httpd,
    measure::MeasurementResult,
    params::{
        schema::{Channel, Subsystems},
        ParameterStore, ParameterTable,
    },
    signals::{SignalPool, Signals, SIGNALS_NUM},
    worker::{Worker, WorkerStatus},
};
use anyhow::Result;
use bode_json::ParameterWrite;
use bytes::Bytes;
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// bode-httpd application.
///
/// This struct represents the bode-httpd application. It owns the different
/// objects of which the application is formed, and runs them concurrently.
#[derive(Debug)]
pub struct App {
    httpd: httpd::Server,
    worker: Worker,
    state: AppState,
}

impl App {
    /// Creates a new application.
    #[tracing::instrument(name = "App::new", level = "debug")]
    pub async fn new(args: &Args) -> Result<App> {
        let fpga = Box::new(Simulator::new(args.dut_cutoff));
        let (state, worker) = init(args, fpga)?;
        let httpd = httpd::Server::new(&args.listen, state.clone()).await?;
        Ok(App {
            httpd,
            worker,
            state,
        })
    }

    /// Runs the application.
    ///
    /// This returns when the worker stops after an interrupt signal, or if the
    /// HTTP server fails.
    #[tracing::instrument(name = "App::run", level = "debug", skip_all)]
    pub async fn run(self) -> Result<()> {
        let state = self.state.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("interrupt received; shutting down");
                    state.shutdown();
                }
                Err(err) => tracing::error!("unable to listen for interrupt signal: {err}"),
            }
        });
        tokio::select! {
            ret = self.httpd.run() => ret,
            ret = self.worker.run() => ret,
        }
    }
}

/// Initializes the application state and the worker.
///
/// The parameter table is set to its defaults, the signal buffers are
/// allocated, and the initial configuration of every subsystem is queued for
/// the worker. The worker must be run for the configuration to reach the
/// `fpga`.
pub fn init(args: &Args, fpga: Box<dyn Fpga>) -> Result<(AppState, Worker)> {
    anyhow::ensure!(
        args.signal_length <= ACQ_BUFFER_SAMPLES,
        "signal length {} is larger than the acquisition buffer ({ACQ_BUFFER_SAMPLES} samples)",
        args.signal_length
    );
    let params = ParameterStore::default();
    let signals = SignalPool::new();
    signals.allocate(SIGNALS_NUM, args.signal_length)?;
    let (dispatcher, requests) = UpdateDispatcher::new();
    let (signals_sender, _) = broadcast::channel(16);
    let worker = Worker::new(
        fpga,
        requests,
        params.clone(),
        signals.clone(),
        signals_sender.clone(),
        Duration::from_millis(args.poll_interval_ms),
    );
    dispatcher.send(dispatch::requests(&params.load(), Subsystems::all())?)?;
    let state = AppState(Arc::new(State {
        params,
        dispatcher,
        signals,
        signals_sender,
        worker_status: worker.status(),
        cancel: worker.cancellation_token(),
    }));
    Ok((state, worker))
}

/// Application state.
///
/// This struct contains the application state that needs to be shared between
/// different modules, such as different Axum handlers in the HTTP server. The
/// struct behaves as an `Arc<...>`. It is cheaply clonable and clones represent
/// a reference to a shared object.
#[derive(Debug, Clone)]
pub struct AppState(Arc<State>);

#[derive(Debug)]
struct State {
    params: ParameterStore,
    dispatcher: UpdateDispatcher,
    signals: SignalPool,
    signals_sender: broadcast::Sender<Bytes>,
    worker_status: WorkerStatus,
    cancel: CancellationToken,
}

impl AppState {
    /// Gives access to the [`ParameterStore`] of the application.
    pub fn params(&self) -> &ParameterStore {
        &self.0.params
    }

    /// Gives access to the [`SignalPool`] of the application.
    pub fn signals(&self) -> &SignalPool {
        &self.0.signals
    }

    /// Gives access to the sender that streams serialized signals.
    pub fn signals_sender(&self) -> &broadcast::Sender<Bytes> {
        &self.0.signals_sender
    }

    /// Gives access to the [`WorkerStatus`] of the application.
    pub fn worker_status(&self) -> &WorkerStatus {
        &self.0.worker_status
    }

    /// Applies a batch of parameter writes given in interface units.
    ///
    /// See [`ParameterStore::apply`].
    pub fn apply_parameters(&self, writes: &[ParameterWrite]) -> Result<Subsystems, Error> {
        let subsystems = self.0.params.apply(writes, &self.0.dispatcher)?;
        tracing::debug!(writes = writes.len(), ?subsystems, "parameters applied");
        Ok(subsystems)
    }

    /// Returns a snapshot of the parameter table in interface units.
    pub fn read_parameters(&self) -> ParameterTable {
        self.0.params.snapshot()
    }

    /// Returns the latest published signals, or `None` if the signal buffers
    /// are not allocated.
    pub fn read_signals(&self) -> Option<Arc<Signals>> {
        self.0.signals.read()
    }

    /// Returns the state, cycle count and last error of the worker.
    pub fn read_status(&self) -> bode_json::WorkerStatus {
        self.0.worker_status.to_json()
    }

    /// Returns the latest measurements of an input channel.
    pub fn read_measurement(&self, channel: Channel) -> MeasurementResult {
        MeasurementResult::from_params(&self.0.params.load(), channel)
    }

    /// Requests the worker to stop.
    ///
    /// The worker stops at its next safe point, leaving the FPGA with the
    /// acquisition stopped and the generator outputs disabled. Requesting the
    /// stop cannot fail. Errors that happen while the worker stops are
    /// returned by [`Worker::run`], and therefore by [`App::run`].
    pub fn shutdown(&self) {
        self.0.cancel.cancel();
    }
}
