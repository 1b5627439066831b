//! A content-addressed cache of files and directories shared between
//! builds.
//!
//! Every entry lives in `<cache>/<key>/`, where the key is a hash of the
//! [`Inputs`] that produced it. The entry holds the cached `output` and an
//! `inputs` file written last, so an entry without it was interrupted and is
//! treated as corrupted.
//!
//! At most one writer works on a key at a time. Threads of this process
//! synchronize on an in-memory lock per key; with
//! [`LockingScope::MultiProcess`] they additionally hold an OS file lock on
//! `<cache>/<key>.lock`, so separate builds on the same machine wait for each
//! other instead of unpacking the same archive twice.

mod library;
mod unzip;

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::fs::{self, File, OpenOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::UNIX_EPOCH;

use camino::{Utf8Path, Utf8PathBuf};

use crate::core::Hash32;
use crate::error::CacheError;
use crate::io::{copy_path, delete_path};

pub use library::LibraryCache;
pub use unzip::{FD_JARS, unzip_aar};

const CACHED_FILE: &str = "output";
const INPUTS_FILE: &str = "inputs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockingScope {
    /// Lock across processes with lock files, for caches shared by builds.
    MultiProcess,
    /// Lock within this process only.
    SingleProcess,
}

/// What produced a cache entry. Part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Test,
    PredexLibrary,
    PrepareLibrary,
    ExtractAar,
}

impl Command {
    fn as_str(self) -> &'static str {
        match self {
            Command::Test => "TEST",
            Command::PredexLibrary => "PREDEX_LIBRARY",
            Command::PrepareLibrary => "PREPARE_LIBRARY",
            Command::ExtractAar => "EXTRACT_AAR",
        }
    }
}

/// Ordered parameters identifying a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inputs {
    command: Command,
    parameters: Vec<(String, String)>,
}

impl Inputs {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            parameters: Vec::new(),
        }
    }

    pub fn put_string(mut self, name: &str, value: impl Into<String>) -> Self {
        self.parameters.push((name.to_string(), value.into()));
        self
    }

    pub fn put_bool(self, name: &str, value: bool) -> Self {
        self.put_string(name, value.to_string())
    }

    pub fn put_long(self, name: &str, value: i64) -> Self {
        self.put_string(name, value.to_string())
    }

    pub fn put_file_path(self, name: &str, file: &Utf8Path) -> Self {
        self.put_string(name, file.as_str())
    }

    /// Records the content hash of `file`.
    pub fn put_file_hash(self, name: &str, file: &Utf8Path) -> Result<Self, CacheError> {
        let hash = Hash32::hash_file(file)?;
        Ok(self.put_string(name, hash.to_hex()))
    }

    /// Records path, size and modification time of `file`, a cheaper
    /// identity than its content hash.
    pub fn put_file_path_length_timestamp(
        self,
        name: &str,
        file: &Utf8Path,
    ) -> Result<Self, CacheError> {
        let meta = fs::metadata(file)?;
        let timestamp = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_millis() as i64)
            .unwrap_or_default();

        Ok(self
            .put_file_path(&format!("{name}.path"), file)
            .put_long(&format!("{name}.length"), meta.len() as i64)
            .put_long(&format!("{name}.timestamp"), timestamp))
    }

    /// Hex digest of the canonical text form.
    pub fn key(&self) -> String {
        Hash32::hash(self.to_string()).to_hex()
    }
}

impl Display for Inputs {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "COMMAND={}", self.command.as_str())?;
        for (name, value) in &self.parameters {
            write!(f, "\n{name}={value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEvent {
    Hit,
    Missed,
    Corrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    pub event: QueryEvent,
    /// Why the entry was considered corrupted.
    pub cause: Option<String>,
    /// The cached file or directory inside the entry.
    pub cached: Utf8PathBuf,
}

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub struct FileCache {
    dir: Utf8PathBuf,
    scope: LockingScope,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl FileCache {
    pub fn new(dir: impl Into<Utf8PathBuf>, scope: LockingScope) -> Self {
        Self {
            dir: dir.into(),
            scope,
            locks: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    /// Location of the cached output for `inputs`, whether it exists or not.
    pub fn file_in_cache(&self, inputs: &Inputs) -> Utf8PathBuf {
        self.dir.join(inputs.key()).join(CACHED_FILE)
    }

    pub fn check_entry(&self, inputs: &Inputs) -> QueryResult {
        check_entry(inputs, &self.dir.join(inputs.key()))
    }

    pub fn cache_entry_exists(&self, inputs: &Inputs) -> Result<bool, CacheError> {
        let key = inputs.key();
        fs::create_dir_all(&self.dir)?;

        self.locked(&key, LockMode::Shared, || {
            Ok(self.check_entry(inputs).event == QueryEvent::Hit)
        })
    }

    /// Creates the cached output with `creator` unless a valid entry exists.
    /// The creator receives the path to write and may leave it absent.
    pub fn create_file_in_cache_if_absent(
        &self,
        inputs: &Inputs,
        creator: impl FnOnce(&Utf8Path) -> anyhow::Result<()>,
    ) -> Result<QueryResult, CacheError> {
        let key = inputs.key();

        self.query_entry(inputs, |_| Ok(()), |cached| {
            creator(cached).map_err(|source| CacheError::Creator { key, source })
        })
    }

    /// Produces `output`, from the cache when possible. On a miss `creator`
    /// writes `output`, which is then copied into the cache.
    pub fn create_file(
        &self,
        output: &Utf8Path,
        inputs: &Inputs,
        creator: impl FnOnce(&Utf8Path) -> anyhow::Result<()>,
    ) -> Result<QueryResult, CacheError> {
        if output.starts_with(&self.dir) || self.dir.starts_with(output) {
            return Err(CacheError::OutputInCache {
                output: output.to_owned(),
                cache: self.dir.clone(),
            });
        }

        let key = inputs.key();

        self.query_entry(
            inputs,
            |cached| {
                delete_path(output)?;
                if cached.exists() {
                    copy_path(cached, output)?;
                }
                Ok(())
            },
            |cached| {
                delete_path(output)?;
                if let Some(parent) = output.parent() {
                    fs::create_dir_all(parent)?;
                }
                creator(output).map_err(|source| CacheError::Creator { key, source })?;
                if output.exists() {
                    copy_path(output, cached)?;
                }
                Ok(())
            },
        )
    }

    /// Deletes the whole cache.
    pub fn delete(&self) -> Result<(), CacheError> {
        Ok(delete_path(&self.dir)?)
    }

    fn query_entry(
        &self,
        inputs: &Inputs,
        on_hit: impl FnOnce(&Utf8Path) -> Result<(), CacheError>,
        on_miss: impl FnOnce(&Utf8Path) -> Result<(), CacheError>,
    ) -> Result<QueryResult, CacheError> {
        let key = inputs.key();
        let entry = self.dir.join(&key);
        let mut on_hit = Some(on_hit);

        fs::create_dir_all(&self.dir)?;

        let result = self.locked(&key, LockMode::Shared, || {
            let result = check_entry(inputs, &entry);
            if result.event == QueryEvent::Hit {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Some(action) = on_hit.take() {
                    action(&result.cached)?;
                }
            }
            Ok(result)
        })?;

        if result.event == QueryEvent::Hit {
            return Ok(result);
        }

        self.locked(&key, LockMode::Exclusive, || {
            // Another writer may have finished in the meantime.
            let result = check_entry(inputs, &entry);
            if result.event == QueryEvent::Hit {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Some(action) = on_hit.take() {
                    action(&result.cached)?;
                }
                return Ok(result);
            }

            if result.event == QueryEvent::Corrupted {
                tracing::warn!(
                    entry = %entry,
                    cause = result.cause.as_deref().unwrap_or_default(),
                    "recreating corrupted build cache entry"
                );
                delete_path(&entry)?;
            }

            self.misses.fetch_add(1, Ordering::Relaxed);
            fs::create_dir_all(&entry)?;

            on_miss(&result.cached)?;
            fs::write(entry.join(INPUTS_FILE), inputs.to_string())?;

            Ok(result)
        })
    }

    fn key_lock(&self, key: &str) -> Result<Arc<RwLock<()>>, CacheError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| CacheError::Poisoned(key.to_string()))?;

        Ok(locks.entry(key.to_string()).or_default().clone())
    }

    fn lock_file(&self, key: &str, mode: LockMode) -> Result<File, CacheError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.dir.join(format!("{key}.lock")))?;

        match mode {
            LockMode::Shared => file.lock_shared()?,
            LockMode::Exclusive => file.lock()?,
        }

        Ok(file)
    }

    /// Runs `action` holding the lock of `key`. The file lock is released
    /// when the handle is dropped.
    fn locked<R>(
        &self,
        key: &str,
        mode: LockMode,
        action: impl FnOnce() -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let lock = self.key_lock(key)?;
        let poisoned = || CacheError::Poisoned(key.to_string());

        match mode {
            LockMode::Shared => {
                let _guard = lock.read().map_err(|_| poisoned())?;
                let _file = self.process_lock(key, mode)?;
                action()
            }
            LockMode::Exclusive => {
                let _guard = lock.write().map_err(|_| poisoned())?;
                let _file = self.process_lock(key, mode)?;
                action()
            }
        }
    }

    fn process_lock(&self, key: &str, mode: LockMode) -> Result<Option<File>, CacheError> {
        match self.scope {
            LockingScope::MultiProcess => self.lock_file(key, mode).map(Some),
            LockingScope::SingleProcess => Ok(None),
        }
    }
}

fn check_entry(inputs: &Inputs, entry: &Utf8Path) -> QueryResult {
    let cached = entry.join(CACHED_FILE);

    if !entry.exists() {
        return QueryResult {
            event: QueryEvent::Missed,
            cause: None,
            cached,
        };
    }

    let inputs_file = entry.join(INPUTS_FILE);
    let cause = match fs::read_to_string(&inputs_file) {
        Err(err) => Some(format!("Inputs file '{inputs_file}' could not be read: {err}")),
        Ok(found) if found != inputs.to_string() => Some(format!(
            "Expected contents '{inputs}' but found '{found}' in inputs file '{inputs_file}'"
        )),
        Ok(_) => None,
    };

    let event = match cause {
        Some(_) => QueryEvent::Corrupted,
        None => QueryEvent::Hit,
    };

    QueryResult { event, cause, cached }
}
