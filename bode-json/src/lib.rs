//! bode-json contains the JSON schemas used by bode-httpd and its remote UI.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};

/// API JSON schema.
///
/// This JSON schema corresponds to GET requests on `/api`. It contains the
/// full parameter table and the state of the acquisition worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Api {
    /// Parameter table, in interface units.
    pub parameters: Vec<Parameter>,
    /// Acquisition worker status.
    pub worker: WorkerStatus,
}

/// Parameter JSON schema.
///
/// One slot of the parameter table. The position of the slot in the
/// [`Api::parameters`] list is its index, which is the identity of the
/// parameter. The name is only a label.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: f32,
    /// Whether changing this parameter reconfigures the FPGA.
    pub fpga_update: bool,
    /// Whether this parameter can only be written by the instrument.
    pub read_only: bool,
    /// Minimum accepted value.
    pub min_val: f32,
    /// Maximum accepted value.
    pub max_val: f32,
}

/// Parameter write JSON schema.
///
/// PATCH requests on `/api/parameters` contain a list of these. The whole list
/// is applied atomically or rejected as a whole.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct ParameterWrite {
    /// Parameter index.
    pub index: usize,
    /// New value, in interface units.
    pub value: f32,
}

/// Signals JSON schema.
///
/// This JSON schema corresponds to GET requests on `/api/signals`. It contains
/// the most recently published signal buffers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Signals {
    /// Number of signal buffers.
    pub count: usize,
    /// Number of samples in each buffer.
    pub length: usize,
    /// Signal buffers.
    ///
    /// This list is empty if the signal buffers are not allocated.
    pub signals: Vec<Vec<f32>>,
}

/// Channel measurement JSON schema.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Default)]
pub struct Measurement {
    /// Minimum value in V.
    pub min: f32,
    /// Maximum value in V.
    pub max: f32,
    /// Amplitude (half of peak to peak) in V.
    pub amp: f32,
    /// Average value in V.
    pub avg: f32,
    /// Frequency in Hz.
    pub freq: f32,
    /// Period in s.
    pub period: f32,
}

/// Measurements JSON schema.
///
/// This JSON schema corresponds to GET requests on `/api/measurements`.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Default)]
pub struct Measurements {
    /// Input channel 1 measurement.
    pub ch1: Measurement,
    /// Input channel 2 measurement.
    pub ch2: Measurement,
}

/// Worker status JSON schema.
///
/// This JSON schema corresponds to GET requests on `/api/worker`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkerStatus {
    /// Current worker state.
    pub state: WorkerState,
    /// Number of completed acquisition cycles.
    pub cycles: u64,
    /// Description of the last configuration error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Worker state.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WorkerState {
    /// Nothing is being acquired.
    Idle,
    /// Subsystems are being reconfigured.
    Configuring,
    /// Continuous acquisition.
    Acquiring,
    /// Single acquisition; returns to idle when done.
    SingleShot,
    /// Bode sweep in progress.
    Sweeping,
}

macro_rules! impl_str_conv {
    ($ty:ty, $($s:expr => $v:ident),*) => {
        impl std::str::FromStr for $ty {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, ()> {
                Ok(match s {
                    $(
                        $s => <$ty>::$v,
                    )*
                        _ => return Err(()),
                })
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
                write!(f, "{}", match self {
                    $(
                        <$ty>::$v => $s,
                    )*
                })
            }
        }
    }
}

impl_str_conv!(WorkerState,
               "Idle" => Idle,
               "Configuring" => Configuring,
               "Acquiring" => Acquiring,
               "Single shot" => SingleShot,
               "Sweeping" => Sweeping);
