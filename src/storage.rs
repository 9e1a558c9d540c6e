// src/storage.rs

use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Локальное персистентное хранилище ключ → значение.
/// Очищается целиком, а не по ключам.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Хранилище в JSON-файле: кэш в памяти, запись на диск при каждом изменении
pub struct FileStore {
    path: PathBuf,
    cache: RwLock<HashMap<String, Value>>,
}

impl FileStore {
    /// Открыть хранилище; отсутствующий файл = пустое хранилище
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        };
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<(), StorageError> {
        if !self.path.exists() {
            return Ok(());
        }

        let mut file = OpenOptions::new().read(true).open(&self.path)?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)?;
        if raw.trim().is_empty() {
            return Ok(());
        }

        let data: HashMap<String, Value> = serde_json::from_str(&raw)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        *write_lock(&self.cache) = data;
        Ok(())
    }

    fn persist(&self) -> Result<(), StorageError> {
        let content = {
            let cache = read_lock(&self.cache);
            serde_json::to_string_pretty(&*cache)
                .map_err(|e| StorageError::Serialization(e.to_string()))?
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        read_lock(&self.cache).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        write_lock(&self.cache).insert(key.to_string(), value);
        self.persist()
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let removed = write_lock(&self.cache).remove(key).is_some();
        if removed {
            self.persist()?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        write_lock(&self.cache).clear();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        if read_lock(&self.cache).is_empty() {
            return Ok(());
        }
        self.persist()
    }
}

/// Хранилище только в памяти: тесты и одноразовые сессии
#[derive(Default)]
pub struct MemoryStore {
    cache: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.cache).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        read_lock(&self.cache).get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        write_lock(&self.cache).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        write_lock(&self.cache).remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        write_lock(&self.cache).clear();
        Ok(())
    }
}
