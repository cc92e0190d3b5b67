//! Signal buffers.
//!
//! The worker publishes the traces shown by the remote UI into a
//! [`SignalPool`]. In oscilloscope mode the traces are the time axis and both
//! input channels. After a Bode sweep they are the frequency axis, the gain and
//! the phase.

use crate::error::AllocationError;
use bytes::Bytes;
use std::sync::{Arc, Mutex};

/// Number of signal buffers.
pub const SIGNALS_NUM: usize = 3;
/// Default number of samples per signal buffer.
pub const SIGNAL_LENGTH: usize = 1024;

const _: () = assert!(SIGNAL_LENGTH.is_power_of_two());

/// Set of signal buffers.
///
/// All the buffers have the same length. A `Signals` is immutable once
/// published, so readers can hold it for as long as they need.
#[derive(Debug, Clone, PartialEq)]
pub struct Signals {
    length: usize,
    buffers: Vec<Arc<[f32]>>,
}

impl Signals {
    /// Returns the number of buffers.
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Returns the number of samples per buffer.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Returns a buffer.
    pub fn buffer(&self, index: usize) -> Option<&[f32]> {
        self.buffers.get(index).map(|b| &b[..])
    }

    /// Serializes the buffers one after another, as little-endian `f32`.
    pub fn to_bytes(&self) -> Bytes {
        self.buffers
            .iter()
            .flat_map(|buffer| buffer.iter())
            .flat_map(|x| x.to_le_bytes())
            .collect()
    }

    /// Converts the buffers to their JSON representation.
    pub fn to_json(&self) -> bode_json::Signals {
        bode_json::Signals {
            count: self.count(),
            length: self.length,
            signals: self.buffers.iter().map(|b| b.to_vec()).collect(),
        }
    }

    fn check(&self, samples: &[f32]) -> Result<(), AllocationError> {
        if samples.len() != self.length {
            return Err(AllocationError::LengthMismatch {
                expected: self.length,
                got: samples.len(),
            });
        }
        Ok(())
    }
}

/// Signal buffer pool.
///
/// This struct gives shared access to the latest published [`Signals`]. It
/// behaves as an `Arc<...>`: clones refer to the same pool. Publishing builds
/// the new buffers before taking the lock, so the lock is only held to swap a
/// pointer.
#[derive(Debug, Clone, Default)]
pub struct SignalPool(Arc<Mutex<Option<Arc<Signals>>>>);

impl SignalPool {
    /// Creates a pool with no buffers allocated.
    pub fn new() -> SignalPool {
        SignalPool::default()
    }

    /// Allocates `count` zeroed buffers of `length` samples.
    ///
    /// The length must be a power of two. Any previously allocated buffers are
    /// replaced.
    pub fn allocate(&self, count: usize, length: usize) -> Result<(), AllocationError> {
        if !length.is_power_of_two() {
            return Err(AllocationError::InvalidLength(length));
        }
        let out_of_memory = |_| AllocationError::OutOfMemory { count, length };
        let mut buffers = Vec::new();
        buffers.try_reserve_exact(count).map_err(out_of_memory)?;
        for _ in 0..count {
            let mut buffer: Vec<f32> = Vec::new();
            buffer.try_reserve_exact(length).map_err(out_of_memory)?;
            buffer.resize(length, 0.0);
            buffers.push(Arc::from(buffer));
        }
        tracing::debug!(count, length, "allocated signal buffers");
        *self.0.lock().unwrap() = Some(Arc::new(Signals { length, buffers }));
        Ok(())
    }

    /// Releases the buffers.
    pub fn release(&self) {
        self.0.lock().unwrap().take();
    }

    /// Returns the latest published signals, or `None` if the buffers are not
    /// allocated.
    pub fn read(&self) -> Option<Arc<Signals>> {
        self.0.lock().unwrap().clone()
    }

    /// Publishes the samples of one buffer.
    ///
    /// The other buffers keep their contents.
    pub fn publish(&self, index: usize, samples: &[f32]) -> Result<(), AllocationError> {
        let current = self.read().ok_or(AllocationError::NotAllocated)?;
        if index >= current.count() {
            return Err(AllocationError::IndexOutOfRange {
                index,
                count: current.count(),
            });
        }
        current.check(samples)?;
        let buffer: Arc<[f32]> = Arc::from(samples);
        let mut guard = self.0.lock().unwrap();
        let signals = guard.as_mut().ok_or(AllocationError::NotAllocated)?;
        if signals.length != current.length {
            return Err(AllocationError::LengthMismatch {
                expected: signals.length,
                got: samples.len(),
            });
        }
        Arc::make_mut(signals).buffers[index] = buffer;
        Ok(())
    }

    /// Publishes all the buffers at once.
    ///
    /// Readers see either the previous or the new contents of all the buffers.
    pub fn publish_all(&self, frame: &[Vec<f32>]) -> Result<Arc<Signals>, AllocationError> {
        let current = self.read().ok_or(AllocationError::NotAllocated)?;
        if frame.len() != current.count() {
            return Err(AllocationError::IndexOutOfRange {
                index: frame.len(),
                count: current.count(),
            });
        }
        for samples in frame {
            current.check(samples)?;
        }
        let signals = Arc::new(Signals {
            length: current.length,
            buffers: frame.iter().map(|s| Arc::from(&s[..])).collect(),
        });
        let mut guard = self.0.lock().unwrap();
        if guard.is_none() {
            return Err(AllocationError::NotAllocated);
        }
        *guard = Some(Arc::clone(&signals));
        Ok(signals)
    }
}
