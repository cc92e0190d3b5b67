//! Error types.
//!
//! The control plane distinguishes between errors caused by the values that a
//! client writes ([`ValidationError`]), by combinations of values that the
//! instrument cannot run ([`ConfigurationError`]), and by failures to reserve
//! memory for signal buffers ([`AllocationError`]).

use thiserror::Error;

/// An error produced when a batch of parameter writes is rejected.
///
/// When this error is returned, the parameter table has not been modified.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The parameter index does not exist.
    #[error("parameter index {0} does not exist")]
    UnknownIndex(usize),
    /// The parameter can only be written by the instrument.
    #[error("parameter {name} (index {index}) is read-only")]
    ReadOnly {
        /// Parameter index.
        index: usize,
        /// Parameter name.
        name: &'static str,
    },
    /// The value is NaN or infinite.
    #[error("value of parameter {name} (index {index}) is not finite")]
    NotFinite {
        /// Parameter index.
        index: usize,
        /// Parameter name.
        name: &'static str,
    },
    /// The value is outside the parameter bounds.
    #[error("value {value} of parameter {name} (index {index}) is out of range ([{min}, {max}])")]
    OutOfRange {
        /// Parameter index.
        index: usize,
        /// Parameter name.
        name: &'static str,
        /// Rejected value.
        value: f32,
        /// Minimum value.
        min: f32,
        /// Maximum value.
        max: f32,
    },
}

/// An error produced when a subsystem configuration is rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// A mode selector holds a value that does not name any mode.
    #[error("parameter {name} has invalid selector value {value}")]
    InvalidSelector {
        /// Parameter name.
        name: &'static str,
        /// Selector value.
        value: f32,
    },
    /// The oscilloscope time window is empty.
    #[error("time window [{xmin}, {xmax}] is empty")]
    EmptyTimeWindow {
        /// Window start.
        xmin: f32,
        /// Window end.
        xmax: f32,
    },
    /// Amplitude plus offset exceeds the output full scale.
    #[error("{output}: amplitude {amplitude} V with offset {offset} V exceeds the 1 V full scale")]
    OutputSaturation {
        /// Output that would saturate.
        output: &'static str,
        /// Requested amplitude.
        amplitude: f32,
        /// Requested offset.
        offset: f32,
    },
    /// The Bode sweep frequency range is empty.
    #[error("Bode sweep start frequency {start} Hz is not below end frequency {end} Hz")]
    EmptySweep {
        /// Start frequency.
        start: f32,
        /// End frequency.
        end: f32,
    },
    /// The FPGA rejected the configuration.
    #[error("FPGA rejected the configuration: {0}")]
    Hardware(String),
    /// The worker is not running, so the configuration cannot be delivered.
    #[error("acquisition worker is not running")]
    WorkerUnavailable,
}

/// An error produced when signal buffers cannot be reserved or used.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationError {
    /// The buffer length is not a power of two.
    #[error("signal length {0} is not a power of two")]
    InvalidLength(usize),
    /// Memory for the buffers could not be reserved.
    #[error("cannot reserve {count} signal buffers of {length} samples")]
    OutOfMemory {
        /// Number of buffers.
        count: usize,
        /// Samples per buffer.
        length: usize,
    },
    /// The signal buffers have been released or were never allocated.
    #[error("signal buffers are not allocated")]
    NotAllocated,
    /// The buffer index does not exist.
    #[error("signal buffer index {index} is out of range (count {count})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of buffers.
        count: usize,
    },
    /// The published samples do not have the buffer length.
    #[error("published {got} samples into a buffer of {expected} samples")]
    LengthMismatch {
        /// Buffer length.
        expected: usize,
        /// Number of samples published.
        got: usize,
    },
}

/// Control plane error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Validation error.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Configuration error.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Allocation error.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}
