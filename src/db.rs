use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Mutex;

use crate::model::{Store, UrlRecord};

#[derive(Clone, Debug)]
pub struct DbError {
    pub message: String,
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DbError {}

impl DbError {
    pub fn new(message: String) -> Self {
        Self { message }
    }
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::new(format!("snapshot io: {e}"))
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::new(format!("snapshot json: {e}"))
    }
}

/// What to do with a snapshot that exists but cannot be parsed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum CorruptPolicy {
    /// report the snapshot as an error
    #[default]
    Fail,
    /// start over from an empty mapping; the next save overwrites the file
    Reset,
}

#[derive(Debug)]
enum Snapshot {
    File { path: PathBuf, policy: CorruptPolicy },
    Memory(Store),
}

impl Snapshot {
    fn load(&self) -> Result<Store, DbError> {
        match self {
            Snapshot::Memory(store) => Ok(store.clone()),
            Snapshot::File { path, policy } => {
                let raw = match fs::read_to_string(path) {
                    Ok(raw) => raw,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        initialize(path)?;
                        return Ok(Store::new());
                    }
                    Err(e) => return Err(e.into()),
                };
                match serde_json::from_str::<Store>(&raw) {
                    Ok(store) => Ok(store),
                    Err(e) => match policy {
                        CorruptPolicy::Fail => Err(DbError::new(format!(
                            "snapshot {} is not a valid url mapping: {e}",
                            path.display()
                        ))),
                        CorruptPolicy::Reset => {
                            tracing::warn!("discarding unreadable snapshot {}: {e}", path.display());
                            Ok(Store::new())
                        }
                    },
                }
            }
        }
    }

    fn save(&mut self, store: &Store) -> Result<(), DbError> {
        match self {
            Snapshot::Memory(held) => {
                *held = store.clone();
                Ok(())
            }
            Snapshot::File { path, .. } => write_atomic(path, &serde_json::to_string_pretty(store)?),
        }
    }
}

fn initialize(path: &Path) -> Result<(), DbError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    tracing::info!("creating empty snapshot at {}", path.display());
    write_atomic(path, "{}")
}

// Written beside the target and renamed over it, so readers never see a partial file.
fn write_atomic(path: &Path, contents: &str) -> Result<(), DbError> {
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let written = write_synced(&tmp_path, contents).and_then(|()| fs::rename(&tmp_path, path));
    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            tracing::debug!("could not remove {}: {cleanup}", tmp_path.display());
        }
        return Err(e.into());
    }
    Ok(())
}

fn write_synced(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

/// Record-level operations over the snapshot. Each call holds the lock for its
/// whole load, mutate, save cycle so concurrent requests cannot lose updates.
#[derive(Clone, Debug)]
pub struct UrlDAO {
    snapshot: Arc<Mutex<Snapshot>>,
}

impl UrlDAO {
    fn new(snapshot: Arc<Mutex<Snapshot>>) -> Self {
        Self { snapshot }
    }

    pub async fn list(&self) -> Result<Store, Box<DbError>> {
        let snapshot = self.snapshot.lock().await;
        Ok(snapshot.load()?)
    }

    pub async fn get(&self, code: &str) -> Result<Option<UrlRecord>, Box<DbError>> {
        let snapshot = self.snapshot.lock().await;
        Ok(snapshot.load()?.swap_remove(code))
    }

    /// Inserts `record` under `code`. Returns false, leaving the store untouched,
    /// when the code is already taken.
    pub async fn insert(&self, code: &str, record: &UrlRecord) -> Result<bool, Box<DbError>> {
        let mut snapshot = self.snapshot.lock().await;
        let mut store = snapshot.load()?;
        if store.contains_key(code) {
            return Ok(false);
        }
        store.insert(code.to_string(), record.clone());
        snapshot.save(&store)?;
        Ok(true)
    }

    /// Asks `pick` for a code given the current store and inserts `record` under it,
    /// all under one lock. `pick` returning None aborts without writing.
    pub async fn insert_with<F>(&self, record: &UrlRecord, pick: F) -> Result<Option<String>, Box<DbError>>
    where
        F: FnOnce(&Store) -> Option<String>,
    {
        let mut snapshot = self.snapshot.lock().await;
        let mut store = snapshot.load()?;
        let Some(code) = pick(&store) else {
            return Ok(None);
        };
        if store.contains_key(&code) {
            return Ok(None);
        }
        store.insert(code.clone(), record.clone());
        snapshot.save(&store)?;
        Ok(Some(code))
    }

    /// Removes `code`. Returns false when there was nothing to remove.
    pub async fn delete(&self, code: &str) -> Result<bool, Box<DbError>> {
        let mut snapshot = self.snapshot.lock().await;
        let mut store = snapshot.load()?;
        if store.shift_remove(code).is_none() {
            return Ok(false);
        }
        snapshot.save(&store)?;
        Ok(true)
    }

    /// Adds one click to `code` and returns the updated record.
    pub async fn incr(&self, code: &str) -> Result<Option<UrlRecord>, Box<DbError>> {
        let mut snapshot = self.snapshot.lock().await;
        let mut store = snapshot.load()?;
        let updated = match store.get_mut(code) {
            Some(record) => {
                record.clicks = record.clicks.saturating_add(1);
                record.clone()
            }
            None => return Ok(None),
        };
        snapshot.save(&store)?;
        Ok(Some(updated))
    }
}

fn boxed(snapshot: Snapshot) -> Arc<Mutex<Snapshot>> {
    Arc::new(Mutex::new(snapshot))
}

#[derive(Clone, Debug)]
pub struct Db {
    pub urls: UrlDAO,
    snapshot: Arc<Mutex<Snapshot>>,
}

impl Db {
    /// Opens the snapshot file at `path`, creating `{}` there if it does not exist.
    /// The file is read once up front so a bad snapshot fails here.
    pub fn open(path: impl AsRef<Path>, policy: CorruptPolicy) -> Result<Self, DbError> {
        let snapshot = Snapshot::File {
            path: path.as_ref().to_path_buf(),
            policy,
        };
        let store = snapshot.load()?;
        tracing::debug!("loaded {} records from {}", store.len(), path.as_ref().display());
        Ok(Self::with_snapshot(snapshot))
    }

    pub fn in_memory() -> Self {
        Self::with_snapshot(Snapshot::Memory(Store::new()))
    }

    fn with_snapshot(snapshot: Snapshot) -> Self {
        let boxed_snapshot = boxed(snapshot);
        Self {
            urls: UrlDAO::new(Arc::clone(&boxed_snapshot)),
            snapshot: boxed_snapshot,
        }
    }

    /// Reads the entire snapshot.
    pub async fn load(&self) -> Result<Store, Box<DbError>> {
        let snapshot = self.snapshot.lock().await;
        Ok(snapshot.load()?)
    }

    /// Replaces the entire snapshot with `store`.
    pub async fn save(&self, store: &Store) -> Result<(), Box<DbError>> {
        let mut snapshot = self.snapshot.lock().await;
        Ok(snapshot.save(store)?)
    }
}
