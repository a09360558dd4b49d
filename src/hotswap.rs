//! Snapshot registry and hot-swap coordination.
//!
//! Three generation atomics announce changes: layout (artifact shapes
//! changed), data (same shapes, new content) and timestamp (metadata
//! only). Queries take a shared lock just long enough to clone the
//! current snapshot Arc; a stale snapshot is replaced under the exclusive
//! lock by whichever worker notices first. The old snapshot drops once
//! the last in-flight request releases its Arc, so artifacts are never
//! unmapped under a running query.

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{EngineError, EngineResult};
use crate::facade::{ArtifactPaths, DataFacade, MappedFacade, OwnedFacade};
use crate::spatial::EdgeIndex;

/// The generation triple a snapshot was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generations {
    pub layout: u64,
    pub data: u64,
    pub timestamp: u64,
}

/// One immutable graph snapshot plus its derived spatial index.
pub struct Snapshot {
    pub facade: Arc<dyn DataFacade>,
    pub index: Arc<EdgeIndex>,
    pub generations: Generations,
}

/// How artifacts are brought into the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Parse everything into process memory.
    InProcess,
    /// Memory-map the large tables read-only.
    Mapped,
}

pub struct SnapshotRegistry {
    paths: ArtifactPaths,
    mode: LoadMode,
    layout_generation: AtomicU64,
    data_generation: AtomicU64,
    timestamp_generation: AtomicU64,
    current: RwLock<Arc<Snapshot>>,
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SnapshotRegistry {
    /// Load the initial snapshot and start at generation zero.
    pub fn open(paths: ArtifactPaths, mode: LoadMode) -> Result<Self> {
        let generations = Generations {
            layout: 0,
            data: 0,
            timestamp: 0,
        };
        let snapshot = Arc::new(load_snapshot(&paths, mode, generations)?);
        Ok(Self {
            paths,
            mode,
            layout_generation: AtomicU64::new(0),
            data_generation: AtomicU64::new(0),
            timestamp_generation: AtomicU64::new(0),
            current: RwLock::new(snapshot),
        })
    }

    pub fn generations(&self) -> Generations {
        Generations {
            layout: self.layout_generation.load(Ordering::Acquire),
            data: self.data_generation.load(Ordering::Acquire),
            timestamp: self.timestamp_generation.load(Ordering::Acquire),
        }
    }

    /// The swap daemon's entry point: artifacts have been replaced on
    /// disk, tell the workers. Data implies timestamp; layout implies
    /// both.
    pub fn announce(&self, layout: bool, data: bool) {
        if layout {
            self.layout_generation.fetch_add(1, Ordering::AcqRel);
        }
        if layout || data {
            self.data_generation.fetch_add(1, Ordering::AcqRel);
        }
        self.timestamp_generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Current snapshot; reloads first when the generations moved on.
    /// A swap landing while the reload is in progress surfaces as
    /// [`EngineError::SnapshotReloadRace`], which callers retry once.
    pub fn current(&self) -> EngineResult<Arc<Snapshot>> {
        let announced = self.generations();
        {
            let guard = read_lock(&self.current);
            if guard.generations == announced {
                return Ok(guard.clone());
            }
        }

        let mut guard = write_lock(&self.current);
        // somebody else may have finished the reload while we waited
        if guard.generations == announced {
            return Ok(guard.clone());
        }

        let stale = guard.clone();
        let fresh = if announced.layout != stale.generations.layout
            || announced.data != stale.generations.data
        {
            // full reload: new regions are loaded before the pointer swap
            load_snapshot(&self.paths, self.mode, announced).map_err(|e| {
                EngineError::IncompatibleVersion(format!("snapshot reload failed: {e:#}"))
            })?
        } else {
            // metadata-only change: keep the mapped regions, rebind
            Snapshot {
                facade: stale.facade.clone(),
                index: stale.index.clone(),
                generations: announced,
            }
        };

        *guard = Arc::new(fresh);
        drop(guard);

        if self.generations() != announced {
            return Err(EngineError::SnapshotReloadRace);
        }
        Ok(read_lock(&self.current).clone())
    }
}

fn load_snapshot(
    paths: &ArtifactPaths,
    mode: LoadMode,
    generations: Generations,
) -> Result<Snapshot> {
    let facade: Arc<dyn DataFacade> = match mode {
        LoadMode::InProcess => Arc::new(OwnedFacade::load(paths)?),
        LoadMode::Mapped => Arc::new(MappedFacade::load(paths)?),
    };
    let index = Arc::new(EdgeIndex::build(facade.as_ref()));
    tracing::info!(
        timestamp = %facade.timestamp(),
        checksum = facade.checksum(),
        "snapshot published"
    );
    Ok(Snapshot {
        facade,
        index,
        generations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::tests_support::write_fixture_artifacts;
    use tempfile::tempdir;

    #[test]
    fn timestamp_swap_keeps_the_mapped_regions() {
        let dir = tempdir().unwrap();
        let paths = write_fixture_artifacts(dir.path());
        let registry = SnapshotRegistry::open(paths, LoadMode::InProcess).unwrap();

        let before = registry.current().unwrap();
        registry.announce(false, false);
        let after = registry.current().unwrap();

        // metadata-only: same facade, new generation
        assert!(Arc::ptr_eq(&before.facade, &after.facade));
        assert_ne!(before.generations, after.generations);
    }

    #[test]
    fn data_swap_reloads_the_facade() {
        let dir = tempdir().unwrap();
        let paths = write_fixture_artifacts(dir.path());
        let registry = SnapshotRegistry::open(paths, LoadMode::InProcess).unwrap();

        let before = registry.current().unwrap();
        registry.announce(false, true);
        let after = registry.current().unwrap();

        assert!(!Arc::ptr_eq(&before.facade, &after.facade));
        // a query started before the swap still holds its old snapshot
        assert_eq!(before.generations.data, 0);
        assert_eq!(after.generations.data, 1);
    }

    #[test]
    fn stale_workers_converge_without_double_reload() {
        let dir = tempdir().unwrap();
        let paths = write_fixture_artifacts(dir.path());
        let registry = SnapshotRegistry::open(paths, LoadMode::InProcess).unwrap();

        registry.announce(false, true);
        let first = registry.current().unwrap();
        let second = registry.current().unwrap();
        assert!(Arc::ptr_eq(&first.facade, &second.facade));
    }
}
