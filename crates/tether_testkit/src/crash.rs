//! Crash recovery testing for Tether stores.
//!
//! This module provides utilities for testing crash recovery behavior.
//! It simulates crashes at each step of a file store save and verifies
//! that reopening the store yields either the old or the new state, never a
//! mix and never an error.
//!
//! ## Test Strategy
//!
//! 1. **Crash before the save starts** - nothing new on disk
//! 2. **Crash during the blob write** - a torn blob beside a valid HEAD
//! 3. **Crash before HEAD.tmp is written** - a complete orphan blob
//! 4. **Crash during the HEAD.tmp write** - a torn temporary HEAD
//! 5. **Crash before the rename** - a complete but uncommitted save
//! 6. **Crash after the rename** - the new state must survive
//!
//! ## Usage
//!
//! ```rust
//! use tether_testkit::crash::CrashRecoveryHarness;
//! use tether_testkit::fixtures::{sample_state, state_with_pending};
//!
//! let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
//! harness.run_all(&sample_state("old"), &state_with_pending("old", "new"));
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tether_store::{FileStore, LocalStore, StoreError, StoreResult, StoredState};

/// Points at which a crash can be simulated during a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash before anything is written.
    BeforeSave,
    /// Crash partway through writing the new blob.
    DuringBlobWrite,
    /// Crash after the blob is written, before the temporary HEAD.
    AfterBlobWrite,
    /// Crash partway through writing the temporary HEAD.
    DuringHeadWrite,
    /// Crash after staging, before the rename that commits.
    BeforeRename,
    /// Crash right after the rename.
    AfterRename,
}

impl CrashPoint {
    /// Every crash point, in save order.
    pub const ALL: [CrashPoint; 6] = [
        CrashPoint::BeforeSave,
        CrashPoint::DuringBlobWrite,
        CrashPoint::AfterBlobWrite,
        CrashPoint::DuringHeadWrite,
        CrashPoint::BeforeRename,
        CrashPoint::AfterRename,
    ];

    /// Returns true if a crash at this point must keep the new state.
    pub fn is_committed(&self) -> bool {
        matches!(self, CrashPoint::AfterRename)
    }

    /// Leaves `store`'s directory as a crash at this point would while
    /// saving `next`.
    pub fn inject(&self, store: &mut FileStore, next: &StoredState) -> StoreResult<()> {
        let layout = store.layout().clone();
        match self {
            CrashPoint::BeforeSave => {}
            CrashPoint::DuringBlobWrite => {
                fs::write(layout.blob_path(store.generation() + 1), [0xa5; 17])?;
            }
            CrashPoint::AfterBlobWrite => {
                drop(store.stage(next)?);
                fs::remove_file(layout.head_temp_path())?;
            }
            CrashPoint::DuringHeadWrite => {
                drop(store.stage(next)?);
                let staged = fs::read(layout.head_temp_path())?;
                fs::write(layout.head_temp_path(), &staged[..staged.len() / 2])?;
            }
            CrashPoint::BeforeRename => drop(store.stage(next)?),
            CrashPoint::AfterRename => store.stage(next)?.commit()?,
        }
        Ok(())
    }
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Where the crash was injected.
    pub point: CrashPoint,
    /// Whether the test passed.
    pub passed: bool,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(point: CrashPoint) -> Self {
        Self {
            point,
            passed: true,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(point: CrashPoint, error: impl Into<String>) -> Self {
        Self {
            point,
            passed: false,
            error: Some(error.into()),
        }
    }
}

/// Test harness for crash recovery scenarios.
///
/// Each run uses its own subdirectory, so results do not leak between
/// crash points.
pub struct CrashRecoveryHarness {
    /// Directory the per-run stores are created under.
    pub root: PathBuf,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
    _temp_dir: Option<TempDir>,
}

impl CrashRecoveryHarness {
    /// Creates a new crash recovery harness.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            results: Vec::new(),
            _temp_dir: None,
        }
    }

    /// Creates a new harness with a temporary directory, removed on drop.
    pub fn with_temp_dir() -> io::Result<Self> {
        let temp_dir = TempDir::new()?;
        let mut harness = Self::new(temp_dir.path());
        harness._temp_dir = Some(temp_dir);
        Ok(harness)
    }

    /// Saves `previous`, crashes at `point` while saving `next`, then checks
    /// what a reopened store recovers.
    pub fn run(
        &mut self,
        point: CrashPoint,
        previous: &StoredState,
        next: &StoredState,
    ) -> CrashRecoveryResult {
        self.record(point, Some(previous), next)
    }

    /// Crashes at `point` during the first save a fresh store ever makes.
    /// Unless the crash comes after the commit, the store must read as empty.
    pub fn run_first_save(&mut self, point: CrashPoint, next: &StoredState) -> CrashRecoveryResult {
        self.record(point, None, next)
    }

    /// Runs every crash point.
    pub fn run_all(
        &mut self,
        previous: &StoredState,
        next: &StoredState,
    ) -> Vec<CrashRecoveryResult> {
        CrashPoint::ALL
            .iter()
            .map(|point| self.run(*point, previous, next))
            .collect()
    }

    /// Runs every crash point against a fresh store.
    pub fn run_all_first_save(&mut self, next: &StoredState) -> Vec<CrashRecoveryResult> {
        CrashPoint::ALL
            .iter()
            .map(|point| self.run_first_save(*point, next))
            .collect()
    }

    fn record(
        &mut self,
        point: CrashPoint,
        previous: Option<&StoredState>,
        next: &StoredState,
    ) -> CrashRecoveryResult {
        let dir = self.root.join(format!("{point:?}-{}", self.results.len()));
        let result = match exercise(&dir, point, previous, next) {
            Ok(()) => CrashRecoveryResult::pass(point),
            Err(e) => CrashRecoveryResult::fail(point, e),
        };
        self.results.push(result.clone());
        result
    }

    /// Returns a summary of test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut summary = format!(
            "=== Crash Recovery Summary ===\nPassed: {}/{}\n",
            passed,
            self.results.len()
        );
        for result in &self.results {
            let status = if result.passed { "ok" } else { "FAILED" };
            summary.push_str(&format!("{:?}: {}\n", result.point, status));
            if let Some(ref error) = result.error {
                summary.push_str(&format!("  {error}\n"));
            }
        }
        summary
    }

    /// Returns whether all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

fn exercise(
    dir: &Path,
    point: CrashPoint,
    previous: Option<&StoredState>,
    next: &StoredState,
) -> Result<(), String> {
    let _ = fs::remove_dir_all(dir);

    let mut store = FileStore::open(dir).map_err(describe("open"))?;
    if let Some(previous) = previous {
        store.save(previous).map_err(describe("initial save"))?;
    }
    point.inject(&mut store, next).map_err(describe("inject"))?;
    drop(store);

    let mut store = FileStore::open(dir).map_err(describe("reopen"))?;
    let recovered = store.load().map_err(describe("recover"))?;
    let expected = if point.is_committed() { Some(next) } else { previous };
    if recovered.as_ref() != expected {
        return Err(format!(
            "recovered {:?}, expected {:?}",
            recovered.map(|s| s.commit_ref.to_string()),
            expected.map(|s| s.commit_ref.to_string())
        ));
    }

    // Leftovers from the crash must not get in the way of the next save.
    store.save(next).map_err(describe("save after recovery"))?;
    drop(store);
    let store = FileStore::open(dir).map_err(describe("second reopen"))?;
    match store.load().map_err(describe("final load"))? {
        Some(state) if &state == next => Ok(()),
        _ => Err("save after recovery did not persist".to_string()),
    }
}

fn describe(stage: &'static str) -> impl Fn(StoreError) -> String {
    move |e| format!("{stage}: {e}")
}

/// Shared switch controlling a [`CrashableStore`].
///
/// Clones share state, so a test can keep one while the store is moved into
/// an engine.
#[derive(Debug, Clone, Default)]
pub struct CrashSwitch {
    armed: Arc<AtomicBool>,
    saves_left: Arc<AtomicUsize>,
    crashed: Arc<AtomicBool>,
}

impl CrashSwitch {
    /// Lets `saves` more saves through, then fails every save.
    pub fn crash_after(&self, saves: usize) {
        self.saves_left.store(saves, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Returns whether a save has been refused.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Disarms the switch.
    pub fn reset(&self) {
        self.armed.store(false, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    fn allow_save(&self) -> bool {
        if !self.armed.load(Ordering::SeqCst) {
            return true;
        }
        let allowed = self
            .saves_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !allowed {
            self.crashed.store(true, Ordering::SeqCst);
        }
        allowed
    }
}

/// A store wrapper that can simulate a crash before a save reaches disk.
pub struct CrashableStore<S> {
    inner: S,
    switch: CrashSwitch,
}

impl<S: LocalStore> CrashableStore<S> {
    /// Wraps `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            switch: CrashSwitch::default(),
        }
    }

    /// Returns the switch controlling this store.
    pub fn switch(&self) -> CrashSwitch {
        self.switch.clone()
    }

    /// Unwraps the inner store.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: LocalStore> LocalStore for CrashableStore<S> {
    fn load(&self) -> StoreResult<Option<StoredState>> {
        self.inner.load()
    }

    fn save(&mut self, state: &StoredState) -> StoreResult<()> {
        if !self.switch.allow_save() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated crash during save",
            )));
        }
        self.inner.save(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{sample_state, state_with_pending};
    use tether_store::MemoryStore;

    #[test]
    fn test_crashable_store_normal_operation() {
        let mut store = CrashableStore::new(MemoryStore::new());
        store.save(&sample_state("a")).unwrap();
        assert_eq!(store.load().unwrap(), Some(sample_state("a")));
        assert!(!store.switch().has_crashed());
    }

    #[test]
    fn test_crashable_store_crash_after_saves() {
        let mut store = CrashableStore::new(MemoryStore::new());
        let switch = store.switch();
        switch.crash_after(1);

        store.save(&sample_state("a")).unwrap();
        assert!(store.save(&sample_state("bb")).is_err());
        assert!(switch.has_crashed());
        assert_eq!(store.load().unwrap(), Some(sample_state("a")));

        switch.reset();
        store.save(&sample_state("bb")).unwrap();
    }

    #[test]
    fn test_uncommitted_save_discarded() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        let result = harness.run(
            CrashPoint::BeforeRename,
            &sample_state("old"),
            &sample_state("newer"),
        );
        assert!(result.passed, "{}", harness.summary());
    }

    #[test]
    fn test_all_crash_recovery_scenarios() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        harness.run_all(&sample_state("old"), &state_with_pending("old", "new"));
        assert_eq!(harness.results.len(), CrashPoint::ALL.len());
        assert!(harness.all_passed(), "{}", harness.summary());
    }

    #[test]
    fn test_crash_during_first_save() {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        harness.run_all_first_save(&state_with_pending("", "first"));
        assert_eq!(harness.results.len(), CrashPoint::ALL.len());
        assert!(harness.all_passed(), "{}", harness.summary());
    }
}
