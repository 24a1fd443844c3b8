//! File-based store for persistent storage.
//!
//! Directory layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                  # Advisory lock for single-owner access
//! ├─ HEAD                  # Commit point: ref + blob name + checksum
//! └─ state-00000042.bin    # Snapshot and pending mutation
//! ```

use crate::error::{StoreError, StoreResult};
use crate::format::{checksum, decode_blob, encode_blob, Head, FORMAT_VERSION};
use crate::state::{LocalStore, StoredState};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File names within the store directory.
const HEAD_FILE: &str = "HEAD";
const LOCK_FILE: &str = "LOCK";
/// Temporary file for atomic HEAD writes.
const HEAD_TEMP: &str = "HEAD.tmp";
const BLOB_PREFIX: &str = "state-";
const BLOB_SUFFIX: &str = ".bin";

/// Paths within a store directory.
///
/// Exposed so that tooling (the CLI, crash tests) can reason about the files a
/// [`FileStore`] manages without holding its lock.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path to the HEAD file.
    #[must_use]
    pub fn head_path(&self) -> PathBuf {
        self.root.join(HEAD_FILE)
    }

    /// Returns the path to the temporary HEAD file.
    #[must_use]
    pub fn head_temp_path(&self) -> PathBuf {
        self.root.join(HEAD_TEMP)
    }

    /// Returns the path to the LOCK file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Returns the path of the blob for a generation.
    #[must_use]
    pub fn blob_path(&self, generation: u64) -> PathBuf {
        self.root
            .join(format!("{BLOB_PREFIX}{generation:08}{BLOB_SUFFIX}"))
    }

    /// Lists the generations that have a blob on disk, in ascending order.
    pub fn blob_generations(&self) -> StoreResult<Vec<u64>> {
        let mut generations = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(generation) = name
                .strip_prefix(BLOB_PREFIX)
                .and_then(|rest| rest.strip_suffix(BLOB_SUFFIX))
                .and_then(|digits| digits.parse::<u64>().ok())
            {
                generations.push(generation);
            }
        }
        generations.sort_unstable();
        Ok(generations)
    }

    /// Reads the HEAD record, if present.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if HEAD exists but cannot be decoded.
    pub fn read_head(&self) -> StoreResult<Option<Head>> {
        match read_file(&self.head_path())? {
            None => Ok(None),
            Some(bytes) => Head::decode(&bytes).map(Some),
        }
    }

    /// Reads and fully verifies the stored state without taking the lock.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if HEAD is damaged, or if its blob is missing,
    /// damaged or does not match it.
    ///
    /// Without HEAD nothing was ever committed. Blobs or `HEAD.tmp` left by
    /// an interrupted first save are ignored here and swept by the next save.
    pub fn read_state(&self) -> StoreResult<Option<(Head, StoredState)>> {
        let Some(head) = self.read_head()? else {
            return Ok(None);
        };

        let blob_path = self.blob_path(head.generation);
        let blob = read_file(&blob_path)?.ok_or_else(|| {
            StoreError::corrupted(format!(
                "HEAD points at missing blob {}",
                blob_path.display()
            ))
        })?;
        head.verify_blob(&blob)?;
        let state = decode_blob(&head, &blob)?;
        Ok(Some((head, state)))
    }

    /// Syncs the store directory so renames and removals are durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        let dir = File::open(&self.root)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        // NTFS journals metadata; directories cannot be fsynced on Windows
        Ok(())
    }
}

/// A persistent store kept in a directory.
///
/// # Durability
///
/// Saving follows a write-then-rename discipline:
/// 1. Write the new generation's blob and fsync it
/// 2. Write `HEAD.tmp` pointing at the blob and fsync it
/// 3. Rename `HEAD.tmp` to `HEAD` (the commit point)
/// 4. Fsync the directory, then remove superseded blobs
///
/// A crash before step 3 leaves the previous HEAD, and therefore the previous
/// state, in place. If there was no previous HEAD the store still reads as
/// empty.
///
/// # Thread Safety
///
/// A `FileStore` holds an exclusive lock on its directory. Only one
/// `FileStore` can exist per directory at a time, across processes.
///
/// # Example
///
/// ```no_run
/// use tether_store::{FileStore, LocalStore};
/// use std::path::Path;
///
/// let mut store = FileStore::open(Path::new("sync-data")).unwrap();
/// let state = store.load_or_init().unwrap();
/// println!("synchronized at {}", state.commit_ref);
/// ```
#[derive(Debug)]
pub struct FileStore {
    layout: StoreLayout,
    generation: u64,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists but is not a directory
    /// - Another owner holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("store path is not a directory: {}", path.display()),
            )));
        }

        let layout = StoreLayout::new(path);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(layout.lock_path())?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        // Corruption is reported by `load`, not here, so that a damaged store
        // can still be opened and inspected.
        let generation = match layout.read_head() {
            Ok(Some(head)) => head.generation,
            Ok(None) | Err(StoreError::Corrupted(_)) => {
                layout.blob_generations()?.last().copied().unwrap_or(0)
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            layout,
            generation,
            _lock_file: lock_file,
        })
    }

    /// Returns the layout of this store's directory.
    #[must_use]
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Returns the generation of the last committed save.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Writes the blob and temporary HEAD for `state` without committing.
    ///
    /// Nothing a reader can observe changes until [`StagedSave::commit`].
    /// Dropping the stage instead models a crash between the write and the
    /// rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the staged files could not be written.
    pub fn stage(&mut self, state: &StoredState) -> StoreResult<StagedSave<'_>> {
        let generation = self.generation + 1;
        let blob = encode_blob(state)?;

        let blob_path = self.layout.blob_path(generation);
        write_synced(&blob_path, &blob)?;

        let head = Head {
            format_version: FORMAT_VERSION,
            generation,
            commit_ref: state.commit_ref.clone(),
            blob_len: blob.len() as u64,
            blob_sha256: checksum(&blob),
        };
        write_synced(&self.layout.head_temp_path(), &head.encode()?)?;

        Ok(StagedSave {
            store: self,
            generation,
        })
    }

    /// Removes blobs other than the current generation's.
    fn sweep(&self) {
        let generations = match self.layout.blob_generations() {
            Ok(generations) => generations,
            Err(e) => {
                warn!(error = %e, "Failed to list state blobs for cleanup");
                return;
            }
        };
        for generation in generations {
            if generation == self.generation {
                continue;
            }
            let path = self.layout.blob_path(generation);
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove stale state blob");
            }
        }
    }
}

impl LocalStore for FileStore {
    fn load(&self) -> StoreResult<Option<StoredState>> {
        Ok(self.layout.read_state()?.map(|(_, state)| state))
    }

    fn save(&mut self, state: &StoredState) -> StoreResult<()> {
        self.stage(state)?.commit()
    }
}

/// A save that has been written but not yet committed.
///
/// See [`FileStore::stage`].
#[must_use = "a staged save has no effect until committed"]
#[derive(Debug)]
pub struct StagedSave<'a> {
    store: &'a mut FileStore,
    generation: u64,
}

impl StagedSave<'_> {
    /// Returns the generation this save will commit.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Commits the staged save by renaming the temporary HEAD into place.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails, in which case the previous state
    /// is still current. Once the rename succeeds the save is committed: a
    /// failed directory sync after it is logged, not returned.
    pub fn commit(self) -> StoreResult<()> {
        let store = self.store;
        fs::rename(store.layout.head_temp_path(), store.layout.head_path())?;
        store.generation = self.generation;
        if let Err(e) = store.layout.sync_directory() {
            warn!(generation = self.generation, error = %e, "Failed to sync store directory after commit");
            return Ok(());
        }
        debug!(generation = self.generation, "Committed store generation");
        store.sweep();
        Ok(())
    }
}

/// Writes `data` to `path` and fsyncs the file.
fn write_synced(path: &Path, data: &[u8]) -> StoreResult<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

/// Reads a whole file, returning `None` if it does not exist.
fn read_file(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    Ok(Some(data))
}
