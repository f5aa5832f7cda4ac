use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::CoreError;

use super::format;
use super::traits::KeyValueStore;

/// Store backed by a single JSON document on disk.
///
/// Every operation re-reads the file under an exclusive advisory lock on a
/// sibling `<name>.lock` file, so any number of handles and processes
/// sharing one file see each other's writes and `compare_and_swap` is
/// atomic across them. Mutations are written through immediately via a
/// uniquely named temp file + rename.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    /// Open (or lazily create) a store at `path`. Fails if an existing file
    /// is not a valid store document.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref().to_path_buf();
        let lock_path = path.with_file_name(format!("{}.lock", file_name(&path)));
        let store = Self { path, lock_path };
        store.with_entries(|_| ((), false))?;
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_lock_file(&self) -> Result<File, CoreError> {
        if let Some(parent) = self.lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        Ok(file)
    }

    fn load(&self) -> Result<BTreeMap<String, String>, CoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => format::read_document(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Caller must hold the lock.
    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), CoreError> {
        let bytes = format::write_document(entries)?;
        let tmp = self.path.with_file_name(format!(
            "{}.{}.tmp",
            file_name(&self.path),
            Uuid::new_v4().simple()
        ));
        std::fs::write(&tmp, bytes)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            if let Err(cleanup) = std::fs::remove_file(&tmp) {
                warn!(path = %tmp.display(), error = %cleanup, "could not remove temp store file");
            }
            return Err(e.into());
        }
        debug!(path = %self.path.display(), entries = entries.len(), "store written");
        Ok(())
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> (T, bool),
    ) -> Result<T, CoreError> {
        let mut lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock.write()?;
        let mut entries = self.load()?;
        let (out, dirty) = f(&mut entries);
        if dirty {
            self.persist(&entries)?;
        }
        Ok(out)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| "store".to_string(), |n| n.to_string_lossy().into_owned())
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        self.with_entries(|entries| (entries.get(key).cloned(), false))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), value.to_string());
            ((), true)
        })
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.with_entries(|entries| {
            let removed = entries.remove(key).is_some();
            ((), removed)
        })
    }

    fn keys(&self) -> Result<Vec<String>, CoreError> {
        self.with_entries(|entries| (entries.keys().cloned().collect(), false))
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, CoreError> {
        self.with_entries(|entries| {
            if entries.get(key).map(String::as_str) != expected {
                return (false, false);
            }
            entries.insert(key.to_string(), new.to_string());
            (true, true)
        })
    }
}
