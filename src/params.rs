//! Parameter table.
//!
//! This module contains the [`ParameterTable`], a fixed array of typed
//! parameter slots, and the [`ParameterStore`], which shares the current table
//! between the client-facing side of the application and the worker.
//!
//! The store always holds the table in internal units. Readers get immutable
//! snapshots, and writers publish a new table by swapping the shared pointer,
//! so a reader never observes a partially applied update.

use crate::{
    dispatch::{self, Request, UpdateDispatcher},
    error::{ConfigurationError, Error, ValidationError},
    units,
};
use bode_json::ParameterWrite;
use schema::{Subsystems, BODE_PARAMS, DEFAULT_PARAMS, PARAMS_NUM};
use std::sync::{Arc, Mutex};

pub mod schema;

/// Parameter slot.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Parameter {
    /// Name of the parameter. Only used as a label.
    pub name: &'static str,
    /// Current value.
    pub value: f32,
    /// Whether a change of this value requires reconfiguring the FPGA.
    pub fpga_update: bool,
    /// Whether the value is produced by the instrument rather than the client.
    pub read_only: bool,
    /// Minimum value.
    pub min_val: f32,
    /// Maximum value.
    pub max_val: f32,
}

impl From<&Parameter> for bode_json::Parameter {
    fn from(param: &Parameter) -> bode_json::Parameter {
        bode_json::Parameter {
            name: param.name.to_string(),
            value: param.value,
            fpga_update: param.fpga_update,
            read_only: param.read_only,
            min_val: param.min_val,
            max_val: param.max_val,
        }
    }
}

/// Parameter table.
///
/// The table has one slot per index of the [schema](schema). Whether the
/// values are in internal or interface units depends on where the table comes
/// from: [`ParameterStore::load`] gives internal units and
/// [`ParameterStore::snapshot`] gives interface units.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTable([Parameter; PARAMS_NUM]);

impl Default for ParameterTable {
    fn default() -> ParameterTable {
        ParameterTable(DEFAULT_PARAMS)
    }
}

impl std::ops::Index<usize> for ParameterTable {
    type Output = Parameter;

    fn index(&self, index: usize) -> &Parameter {
        &self.0[index]
    }
}

impl std::ops::IndexMut<usize> for ParameterTable {
    fn index_mut(&mut self, index: usize) -> &mut Parameter {
        &mut self.0[index]
    }
}

impl ParameterTable {
    /// Returns the number of slots.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the table has no slots.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over the slots, in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.0.iter()
    }

    /// Returns the value of a slot.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not smaller than [`PARAMS_NUM`].
    pub fn value(&self, index: usize) -> f32 {
        self.0[index].value
    }

    /// Sets the value of a slot, without any validation.
    pub fn set_value(&mut self, index: usize, value: f32) {
        self.0[index].value = value;
    }

    /// Returns the value of an on/off slot.
    pub fn flag(&self, index: usize) -> bool {
        self.value(index) >= 0.5
    }

    /// Copies this table into `dst`, allocating it if it does not exist yet.
    pub fn copy_to(&self, dst: &mut Option<Box<ParameterTable>>) {
        match dst {
            Some(table) => (**table).clone_from(self),
            None => *dst = Some(Box::new(self.clone())),
        }
    }

    /// Returns `true` if all the writable slots of both tables hold the same
    /// values.
    pub fn writable_eq(&self, other: &ParameterTable) -> bool {
        self.iter()
            .zip(other.iter())
            .all(|(a, b)| a.read_only || a.value == b.value)
    }

    fn copy_writable_from(&mut self, other: &ParameterTable) {
        for (dst, src) in self.0.iter_mut().zip(other.iter()) {
            if !dst.read_only {
                dst.value = src.value;
            }
        }
    }

    /// Returns a copy of this table with a batch of client writes applied.
    ///
    /// `self` must be in internal units, and the values in `writes` are in
    /// interface units. Every write is checked before anything is applied: the
    /// index must exist, the slot must be writable, and the value must be
    /// finite and within the slot bounds expressed in interface units. The
    /// returned table is in internal units. Read-only slots are copied from
    /// `self` unchanged.
    pub fn with_writes(&self, writes: &[ParameterWrite]) -> Result<ParameterTable, ValidationError> {
        let mut current = self.clone();
        units::to_interface(&mut current);
        let mut wanted = current.clone();
        for write in writes {
            let param = self
                .0
                .get(write.index)
                .ok_or(ValidationError::UnknownIndex(write.index))?;
            if param.read_only {
                return Err(ValidationError::ReadOnly {
                    index: write.index,
                    name: param.name,
                });
            }
            if !write.value.is_finite() {
                return Err(ValidationError::NotFinite {
                    index: write.index,
                    name: param.name,
                });
            }
            wanted.set_value(write.index, write.value);
        }
        // Bounds are checked once all the writes are in place, because the
        // scale of a slot can depend on other slots in the same batch.
        for write in writes {
            let param = &self[write.index];
            let scale = units::scale_of(&wanted, write.index);
            let (min, max) = (param.min_val * scale, param.max_val * scale);
            if !(min..=max).contains(&write.value) {
                return Err(ValidationError::OutOfRange {
                    index: write.index,
                    name: param.name,
                    value: write.value,
                    min,
                    max,
                });
            }
        }

        let mut converted = wanted.clone();
        units::to_internal(&mut converted);
        let mut next = self.clone();
        for index in 0..PARAMS_NUM {
            if self[index].read_only {
                continue;
            }
            // Keep the exact internal value of scaled slots whose presentation
            // has not changed, so that a no-op write is not seen as a change.
            let unchanged = units::SCALED_PARAMS.contains(&index)
                && wanted.value(index) == current.value(index)
                && units::scale_of(&wanted, index) == units::scale_of(&current, index);
            if !unchanged {
                let param = &self[index];
                let value = converted.value(index).clamp(param.min_val, param.max_val);
                next.set_value(index, value);
            }
        }
        Ok(next)
    }

    /// Converts the table to its JSON representation.
    pub fn to_json(&self) -> Vec<bode_json::Parameter> {
        self.iter().map(bode_json::Parameter::from).collect()
    }
}

/// Parameter store.
///
/// This struct gives shared access to the current parameter table. It behaves
/// as an `Arc<...>`: it is cheaply clonable and clones refer to the same
/// table. The mutex only guards the publication of a new table, and it is
/// never held while unit transforms or dispatch decisions run.
#[derive(Debug, Clone)]
pub struct ParameterStore(Arc<Mutex<Arc<ParameterTable>>>);

impl Default for ParameterStore {
    fn default() -> ParameterStore {
        ParameterStore::new(ParameterTable::default())
    }
}

impl ParameterStore {
    /// Creates a new store holding `params`, which must be in internal units.
    pub fn new(params: ParameterTable) -> ParameterStore {
        ParameterStore(Arc::new(Mutex::new(Arc::new(params))))
    }

    /// Returns the current table, in internal units.
    pub fn load(&self) -> Arc<ParameterTable> {
        Arc::clone(&self.0.lock().unwrap())
    }

    /// Returns a copy of the current table, in interface units.
    pub fn snapshot(&self) -> ParameterTable {
        let mut params = (*self.load()).clone();
        units::to_interface(&mut params);
        params
    }

    /// Applies a batch of client writes.
    ///
    /// The batch is validated (see [`ParameterTable::with_writes`]), generator
    /// frequencies are limited, and the configurations of the subsystems that
    /// change are checked. If any of these steps fails, the table is left
    /// unchanged and the error is returned. Otherwise the new table is
    /// published and one reconfiguration request per changed subsystem is sent
    /// through the `dispatcher`.
    ///
    /// Returns the set of subsystems that were reconfigured.
    pub fn apply(
        &self,
        writes: &[ParameterWrite],
        dispatcher: &UpdateDispatcher,
    ) -> Result<Subsystems, Error> {
        loop {
            let base = self.load();
            let mut next = base.with_writes(writes)?;
            dispatch::limit_generators(&mut next);
            if next.writable_eq(&base) {
                return Ok(Subsystems::empty());
            }
            let changed = dispatch::changed_subsystems(&base, &next);
            let requests = dispatch::requests(&next, changed)?;
            if let Some(sent) = self.publish_writable(&base, next, requests, dispatcher) {
                sent?;
                return Ok(changed);
            }
            tracing::debug!("parameter table changed during update; retrying");
        }
    }

    // Publishes the writable slots of `next` if no other writer has changed
    // any writable slot since `base` was loaded. Read-only slots keep whatever
    // value is current. Returns None on conflict.
    //
    // The requests are enqueued before the lock is released, so the worker
    // receives them in publication order.
    fn publish_writable(
        &self,
        base: &Arc<ParameterTable>,
        next: ParameterTable,
        requests: Vec<Request>,
        dispatcher: &UpdateDispatcher,
    ) -> Option<Result<(), ConfigurationError>> {
        let mut current = self.0.lock().unwrap();
        if Arc::ptr_eq(&current, base) {
            *current = Arc::new(next);
        } else if current.writable_eq(base) {
            let mut params = (**current).clone();
            params.copy_writable_from(&next);
            *current = Arc::new(params);
        } else {
            return None;
        }
        Some(dispatcher.send(requests))
    }

    /// Publishes a new table obtained by modifying the current one.
    ///
    /// `update` runs with the publication lock held, so it must only copy
    /// values into the table.
    pub(crate) fn publish_with(&self, update: impl FnOnce(&mut ParameterTable)) {
        let mut current = self.0.lock().unwrap();
        let mut params = (**current).clone();
        update(&mut params);
        *current = Arc::new(params);
    }

    /// Returns the Bode slot at position `pos` within the Bode block.
    pub fn bode_param(&self, pos: usize) -> Option<f32> {
        let index = BODE_PARAMS.start.checked_add(pos)?;
        BODE_PARAMS
            .contains(&index)
            .then(|| self.load().value(index))
    }

    /// Sets the Bode slot at position `pos` within the Bode block.
    ///
    /// This is used by the worker to update the Bode block, so it does not
    /// dispatch any reconfiguration.
    pub fn set_bode_param(&self, pos: usize, value: f32) -> Result<(), ValidationError> {
        let index = BODE_PARAMS
            .start
            .checked_add(pos)
            .filter(|index| BODE_PARAMS.contains(index))
            .ok_or(ValidationError::UnknownIndex(BODE_PARAMS.start.saturating_add(pos)))?;
        let param = self.load()[index];
        if !(param.min_val..=param.max_val).contains(&value) {
            return Err(ValidationError::OutOfRange {
                index,
                name: param.name,
                value,
                min: param.min_val,
                max: param.max_val,
            });
        }
        self.publish_with(|params| params.set_value(index, value));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use schema::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn write(index: usize, value: f32) -> ParameterWrite {
        ParameterWrite { index, value }
    }

    fn setup() -> (ParameterStore, UpdateDispatcher, UnboundedReceiver<Request>) {
        let (dispatcher, receiver) = UpdateDispatcher::new();
        (ParameterStore::default(), dispatcher, receiver)
    }

    fn drain(receiver: &mut UnboundedReceiver<Request>) -> Vec<Request> {
        std::iter::from_fn(|| receiver.try_recv().ok()).collect()
    }

    #[test]
    fn trigger_level_scenario() {
        let (store, dispatcher, mut receiver) = setup();
        assert_eq!(store.snapshot().value(TRIG_LEVEL), 0.0);

        let before = store.load();
        assert_eq!(
            store.apply(&[write(TRIG_LEVEL, 2.0)], &dispatcher),
            Err(Error::Validation(ValidationError::OutOfRange {
                index: TRIG_LEVEL,
                name: "trig_level",
                value: 2.0,
                min: -1.0,
                max: 1.0,
            }))
        );
        assert!(Arc::ptr_eq(&before, &store.load()));
        assert!(drain(&mut receiver).is_empty());

        assert_eq!(
            store.apply(&[write(TRIG_LEVEL, 0.5)], &dispatcher),
            Ok(Subsystems::OSCILLOSCOPE)
        );
        assert_eq!(store.snapshot().value(TRIG_LEVEL), 0.5);
        let requests = drain(&mut receiver);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].subsystem(), Subsystems::OSCILLOSCOPE);
    }

    #[test]
    fn rejected_batch_leaves_table_unchanged() {
        let (store, dispatcher, mut receiver) = setup();
        let before = store.snapshot();
        let batches = [
            vec![write(PID_11_KP, 10.0), write(GEN_CH1 + GEN_AMPLITUDE, 1.5)],
            vec![write(MIN_Y, -2.0), write(MEAS_CH1, 1.0)],
            vec![write(XMAX, 10.0), write(PARAMS_NUM, 0.0)],
            vec![write(PID_22_SP, f32::NAN)],
        ];
        for batch in batches {
            assert!(store.apply(&batch, &dispatcher).is_err());
            assert_eq!(before, store.snapshot());
        }
        assert!(drain(&mut receiver).is_empty());
    }

    #[test]
    fn read_only_write() {
        let (store, dispatcher, _receiver) = setup();
        assert_eq!(
            store.apply(&[write(SCALE_CH1, 1.0)], &dispatcher),
            Err(Error::Validation(ValidationError::ReadOnly {
                index: SCALE_CH1,
                name: "scale_ch1",
            }))
        );
    }

    #[test]
    fn inconsistent_configuration_is_rejected() {
        let (store, dispatcher, mut receiver) = setup();
        let before = store.snapshot();
        assert_eq!(
            store.apply(
                &[
                    write(GEN_CH2 + GEN_AMPLITUDE, 0.8),
                    write(GEN_CH2 + GEN_OFFSET, 0.5)
                ],
                &dispatcher
            ),
            Err(Error::Configuration(ConfigurationError::OutputSaturation {
                output: "generator channel 2",
                amplitude: 0.8,
                offset: 0.5,
            }))
        );
        assert_eq!(before, store.snapshot());
        assert!(drain(&mut receiver).is_empty());
    }

    #[test]
    fn writable_slots_round_trip() {
        let (store, dispatcher, _receiver) = setup();
        let defaults = ParameterTable::default();
        for index in 0..PARAMS_NUM {
            let param = defaults[index];
            if param.read_only {
                continue;
            }
            for fraction in [0.25, 0.75] {
                let value = param.min_val + fraction * (param.max_val - param.min_val);
                let before = store.snapshot();
                match store.apply(&[write(index, value)], &dispatcher) {
                    Ok(_) => {
                        let after = store.snapshot();
                        let expected = if index == GEN_CH1 + GEN_FREQUENCY {
                            dispatch::limit_frequency(value, after.value(GEN_CH1 + GEN_WAVEFORM))
                        } else if index == GEN_CH2 + GEN_FREQUENCY {
                            dispatch::limit_frequency(value, after.value(GEN_CH2 + GEN_WAVEFORM))
                        } else {
                            value
                        };
                        assert_relative_eq!(after.value(index), expected, max_relative = 1e-6);
                    }
                    Err(Error::Configuration(_)) => assert_eq!(before, store.snapshot()),
                    Err(err) => panic!("{} rejected: {err}", param.name),
                }
            }
        }
    }

    #[test]
    fn trigger_level_is_scaled() {
        let (store, dispatcher, _receiver) = setup();
        store
            .apply(&[write(GAIN_CH1, 1.0), write(TRIG_LEVEL, 5.0)], &dispatcher)
            .unwrap();
        assert_relative_eq!(store.load().value(TRIG_LEVEL), 0.25);
        let snapshot = store.snapshot();
        assert_relative_eq!(snapshot.value(TRIG_LEVEL), 5.0);
        assert_relative_eq!(snapshot[TRIG_LEVEL].max_val, 20.0);

        // changing the range keeps the level in volts
        store.apply(&[write(PROBE_ATT_CH1, 1.0)], &dispatcher).unwrap();
        assert_relative_eq!(store.snapshot().value(TRIG_LEVEL), 5.0);
        assert_relative_eq!(store.load().value(TRIG_LEVEL), 0.025);

        // the level saturates at the full scale of the new range
        store
            .apply(&[write(PROBE_ATT_CH1, 0.0), write(GAIN_CH1, 0.0)], &dispatcher)
            .unwrap();
        assert_eq!(store.load().value(TRIG_LEVEL), 1.0);
        assert_eq!(store.snapshot().value(TRIG_LEVEL), 1.0);
    }

    #[test]
    fn no_change_is_not_an_error() {
        let (store, dispatcher, mut receiver) = setup();
        let before = store.load();
        assert_eq!(
            store.apply(&[write(TRIG_LEVEL, 0.0), write(PID_12_KI, 0.0)], &dispatcher),
            Ok(Subsystems::empty())
        );
        assert!(Arc::ptr_eq(&before, &store.load()));
        assert!(drain(&mut receiver).is_empty());
    }

    #[test]
    fn display_only_change_is_published_without_requests() {
        let (store, dispatcher, mut receiver) = setup();
        assert_eq!(
            store.apply(&[write(MAX_Y, 4.0)], &dispatcher),
            Ok(Subsystems::empty())
        );
        let snapshot = store.snapshot();
        assert_eq!(snapshot.value(MAX_Y), 4.0);
        assert_eq!(snapshot.value(MAX_Y_NORM), 4.0);
        assert!(drain(&mut receiver).is_empty());
    }

    #[test]
    fn writes_survive_concurrent_read_only_updates() {
        let (store, dispatcher, _receiver) = setup();
        let base = store.load();
        let next = base.with_writes(&[write(PID_21_KD, 3.0)]).unwrap();
        store.publish_with(|params| params.set_value(MEAS_CH2, -1.0));
        assert!(store.publish_writable(&base, next, Vec::new(), &dispatcher).is_some());
        let params = store.load();
        assert_eq!(params.value(PID_21_KD), 3.0);
        assert_eq!(params.value(MEAS_CH2), -1.0);

        // a concurrent writable change forces a retry
        let base = store.load();
        let next = base.with_writes(&[write(PID_21_KD, 4.0)]).unwrap();
        store.publish_with(|params| params.set_value(BODE_START, 1.0));
        assert!(store.publish_writable(&base, next, Vec::new(), &dispatcher).is_none());
    }

    #[test]
    fn bode_params() {
        let store = ParameterStore::default();
        assert_eq!(store.bode_param(BODE_POINTS - BODE_START), Some(101.0));
        assert_eq!(store.bode_param(8), None);
        store.set_bode_param(0, 1.0).unwrap();
        assert_eq!(store.load().value(BODE_START), 1.0);
        assert!(store.set_bode_param(0, 2.0).is_err());
        assert_eq!(
            store.set_bode_param(8, 0.0),
            Err(ValidationError::UnknownIndex(50))
        );
        assert_eq!(
            store.set_bode_param(usize::MAX, 0.0),
            Err(ValidationError::UnknownIndex(usize::MAX))
        );
        assert_eq!(store.bode_param(usize::MAX), None);
    }

    #[test]
    fn concurrent_writers_dispatch_in_publication_order() {
        let (store, dispatcher, mut receiver) = setup();
        for trial in 0..500 {
            let barrier = std::sync::Barrier::new(2);
            let delays = [2.0 * trial as f32 + 1.0, 2.0 * trial as f32 + 2.0];
            std::thread::scope(|s| {
                for delay in delays {
                    let (store, dispatcher, barrier) = (&store, &dispatcher, &barrier);
                    s.spawn(move || {
                        barrier.wait();
                        store
                            .apply(&[write(TRIG_DELAY, delay)], dispatcher)
                            .unwrap();
                    });
                }
            });
            let last = drain(&mut receiver)
                .into_iter()
                .filter_map(|request| match request {
                    Request::Oscilloscope(config) => Some(config.trigger_delay),
                    _ => None,
                })
                .last();
            assert_eq!(last, Some(store.load().value(TRIG_DELAY)), "trial {trial}");
        }
    }

    #[test]
    fn copy_to_allocates() {
        let params = ParameterTable::default();
        let mut dst = None;
        params.copy_to(&mut dst);
        assert_eq!(dst.as_deref(), Some(&params));

        let mut other = params.clone();
        other.set_value(PID_11_SP, 12.0);
        other.copy_to(&mut dst);
        assert_eq!(dst.as_deref().map(|p| p.value(PID_11_SP)), Some(12.0));
    }
}
