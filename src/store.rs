//! Experiment Store - the persistence context every operation runs against
//!
//! Experiments live in a `DashMap` keyed by experiment ID. Each experiment
//! sits behind its own `RwLock`:
//!
//! - readers (views, plans, status) share it
//! - every check-and-set (lock, unlock, token check + completion) runs under
//!   one write guard, so it is a single critical section
//!
//! Removal empties the slot under its write guard before unlinking it, so a
//! caller still holding the slot sees the experiment as gone.
//!
//! The store is passed explicitly to whoever needs it; there is no global.
//! Its state can be written to and replayed from a JSON snapshot.

use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::experiment::Experiment;
use crate::{Error, Result};

/// Experiment slot; `None` once the experiment has been removed.
type Cell = Arc<RwLock<Option<Experiment>>>;

fn read_guard(cell: &Cell) -> RwLockReadGuard<'_, Option<Experiment>> {
    cell.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_guard(cell: &Cell) -> RwLockWriteGuard<'_, Option<Experiment>> {
    cell.write().unwrap_or_else(PoisonError::into_inner)
}

fn read_cell<R>(cell: &Cell, experiment_id: &str, f: impl FnOnce(&Experiment) -> R) -> Result<R> {
    let guard = read_guard(cell);
    let experiment = guard
        .as_ref()
        .ok_or_else(|| Error::unknown("experiment", experiment_id))?;
    Ok(f(experiment))
}

fn write_cell<R>(
    cell: &Cell,
    experiment_id: &str,
    f: impl FnOnce(&mut Experiment) -> Result<R>,
) -> Result<R> {
    let mut guard = write_guard(cell);
    let experiment = guard
        .as_mut()
        .ok_or_else(|| Error::unknown("experiment", experiment_id))?;
    f(experiment)
}

/// Serialized state of a whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Experiments in ID order
    pub experiments: Vec<Experiment>,
}

/// Concurrent in-memory store of experiments.
///
/// # Example
///
/// ```rust
/// use lightmill_core::experiment::Experiment;
/// use lightmill_core::store::ExperimentStore;
///
/// # fn main() -> lightmill_core::Result<()> {
/// let store = ExperimentStore::new();
/// store.insert(Experiment::new("E1", "Pointing"))?;
/// assert!(store.insert(Experiment::new("E1", "Again")).is_err());
///
/// let name = store.read("E1", |xp| xp.name().to_string())?;
/// assert_eq!(name, "Pointing");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ExperimentStore {
    experiments: DashMap<String, Cell>,
}

impl ExperimentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            experiments: DashMap::new(),
        }
    }

    /// Check if the store holds no experiment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// Number of experiments.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Experiment IDs, sorted.
    #[must_use]
    pub fn experiment_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.experiments.iter().map(|e| e.key().clone()).collect();
        ids.sort_unstable();
        ids
    }

    /// Check if an experiment is stored.
    #[must_use]
    pub fn contains(&self, experiment_id: &str) -> bool {
        self.experiments.contains_key(experiment_id)
    }

    /// Validate and insert an experiment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDesign`] if validation fails and
    /// [`Error::DuplicateExperiment`] if the ID is taken.
    pub fn insert(&self, experiment: Experiment) -> Result<()> {
        experiment.validate()?;
        match self.experiments.entry(experiment.id().to_string()) {
            Entry::Occupied(entry) => Err(Error::DuplicateExperiment(entry.key().clone())),
            Entry::Vacant(entry) => {
                info!(
                    experiment = experiment.id(),
                    runs = experiment.run_count(),
                    "experiment imported"
                );
                entry.insert(Arc::new(RwLock::new(Some(experiment))));
                Ok(())
            }
        }
    }

    /// Remove an experiment with its whole subtree and return it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if no such experiment exists.
    pub fn remove(&self, experiment_id: &str) -> Result<Experiment> {
        self.remove_with(experiment_id, |_| ()).map(|(experiment, ())| experiment)
    }

    /// Remove an experiment and run `f` on it before any other caller can
    /// observe the removal.
    ///
    /// Reads and writes that were waiting on the experiment fail with
    /// [`Error::UnknownElement`] once this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if no such experiment exists.
    pub fn remove_with<R>(
        &self,
        experiment_id: &str,
        f: impl FnOnce(&Experiment) -> R,
    ) -> Result<(Experiment, R)> {
        let cell = self.cell(experiment_id)?;
        let mut guard = write_guard(&cell);
        let experiment = guard
            .take()
            .ok_or_else(|| Error::unknown("experiment", experiment_id))?;
        self.experiments
            .remove_if(experiment_id, |_, stored| Arc::ptr_eq(stored, &cell));
        let output = f(&experiment);
        drop(guard);
        info!(experiment = experiment_id, "experiment removed");
        Ok((experiment, output))
    }

    fn cell(&self, experiment_id: &str) -> Result<Cell> {
        self.experiments
            .get(experiment_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::unknown("experiment", experiment_id))
    }

    /// Run `f` with shared access to an experiment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if no such experiment exists.
    pub fn read<R>(&self, experiment_id: &str, f: impl FnOnce(&Experiment) -> R) -> Result<R> {
        read_cell(&self.cell(experiment_id)?, experiment_id, f)
    }

    /// Run `f` with exclusive access to an experiment.
    ///
    /// Everything `f` does is one critical section for that experiment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownElement`] if no such experiment exists, or
    /// whatever `f` returns.
    pub fn write<R>(
        &self,
        experiment_id: &str,
        f: impl FnOnce(&mut Experiment) -> Result<R>,
    ) -> Result<R> {
        write_cell(&self.cell(experiment_id)?, experiment_id, f)
    }

    /// Copy the state of every experiment.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let cells: Vec<Cell> = self
            .experiments
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut experiments: Vec<Experiment> = cells
            .iter()
            .filter_map(|cell| read_guard(cell).clone())
            .collect();
        experiments.sort_by(|a, b| a.id().cmp(b.id()));
        StoreSnapshot { experiments }
    }

    /// Rebuild a store from a snapshot.
    ///
    /// # Errors
    ///
    /// Fails like [`ExperimentStore::insert`] on an invalid or repeated experiment.
    pub fn restore(snapshot: StoreSnapshot) -> Result<Self> {
        let store = Self::new();
        for experiment in snapshot.experiments {
            store.insert(experiment)?;
        }
        Ok(store)
    }

    /// Serialize the store to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Snapshot`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Rebuild a store from JSON produced by [`ExperimentStore::to_json`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Snapshot`] on malformed input, or fails like
    /// [`ExperimentStore::restore`].
    pub fn from_json(json: &str) -> Result<Self> {
        Self::restore(serde_json::from_str(json)?)
    }

    /// Write a snapshot to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Snapshot`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), experiments = self.experiment_count(), "store saved");
        Ok(())
    }

    /// Load a store from a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] or [`Error::Snapshot`], or fails like
    /// [`ExperimentStore::restore`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let store = Self::from_json(&fs::read_to_string(path)?)?;
        info!(path = %path.display(), experiments = store.experiment_count(), "store loaded");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{Block, Run, Trial};

    fn experiment(id: &str) -> Experiment {
        let block = Block::new(0).with_trial(Trial::new(0)).unwrap();
        Experiment::builder(id, "Pointing")
            .run(Run::new("S0").with_block(block).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_store_default() {
        let store = ExperimentStore::new();
        assert!(store.is_empty());
        assert_eq!(store.experiment_count(), 0);
        assert!(store.experiment_ids().is_empty());
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let store = ExperimentStore::new();
        store.insert(experiment("E1")).unwrap();
        let err = store.insert(experiment("E1")).unwrap_err();
        assert!(matches!(err, Error::DuplicateExperiment(ref id) if id == "E1"));
        assert_eq!(store.experiment_count(), 1);
    }

    #[test]
    fn test_read_write_unknown() {
        let store = ExperimentStore::new();
        assert!(matches!(
            store.read("nope", |_| ()),
            Err(Error::UnknownElement { element: "experiment", .. })
        ));
        assert!(store.write("nope", |_| Ok(())).is_err());
    }

    #[test]
    fn test_write_error_propagates() {
        let store = ExperimentStore::new();
        store.insert(experiment("E1")).unwrap();
        let err = store
            .write("E1", |xp| xp.require_run_mut("S9").map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownElement { element: "run", .. }));
    }

    #[test]
    fn test_remove_cascades() {
        let store = ExperimentStore::new();
        store.insert(experiment("E1")).unwrap();
        store.insert(experiment("E2")).unwrap();
        let removed = store.remove("E1").unwrap();
        assert_eq!(removed.run_count(), 1);
        assert_eq!(store.experiment_ids(), vec!["E2".to_string()]);
        assert!(store.remove("E1").is_err());
    }

    #[test]
    fn test_removed_slot_refuses_late_callers() {
        let store = ExperimentStore::new();
        store.insert(experiment("E1")).unwrap();
        // A caller that looked the slot up before the removal
        let cell = store.cell("E1").unwrap();

        let (removed, seen) = store.remove_with("E1", |xp| xp.run_count()).unwrap();
        assert_eq!(removed.id(), "E1");
        assert_eq!(seen, 1);
        assert!(!store.contains("E1"));

        let err = write_cell(&cell, "E1", |xp| {
            xp.require_run_mut("S0")?.replace_token(Some("late".into()));
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, Error::UnknownElement { element: "experiment", .. }));
        assert!(read_cell(&cell, "E1", |_| ()).is_err());

        // Re-import under the same ID gets a fresh slot
        store.insert(experiment("E1")).unwrap();
        let token = store
            .read("E1", |xp| xp.run("S0").and_then(Run::token).map(String::from))
            .unwrap();
        assert!(token.is_none());
        assert_eq!(store.snapshot().experiments.len(), 1);
    }

    #[test]
    fn test_json_round_trip_keeps_tokens() {
        let store = ExperimentStore::new();
        store.insert(experiment("E2")).unwrap();
        store.insert(experiment("E1")).unwrap();
        store
            .write("E1", |xp| {
                xp.require_run_mut("S0")?.replace_token(Some("tok".into()));
                Ok(())
            })
            .unwrap();

        let restored = ExperimentStore::from_json(&store.to_json().unwrap()).unwrap();
        assert_eq!(restored.snapshot(), store.snapshot());
        let token = restored
            .read("E1", |xp| xp.run("S0").and_then(Run::token).map(String::from))
            .unwrap();
        assert_eq!(token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_from_json_malformed() {
        let err = ExperimentStore::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Snapshot(_)));
    }
}
