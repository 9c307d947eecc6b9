//! Durable mapping from database name to connection configuration.
//!
//! The whole mapping lives in one pretty-printed JSON object. Every upsert
//! re-reads the file, applies the change and rewrites it through a uniquely
//! named sibling temp file. The read-modify-write runs under an async mutex
//! (tasks in this process) and an exclusive OS lock on `<path>.lock`
//! (other processes sharing the file).

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::database_config::DatabaseConfig;

pub type Registry = BTreeMap<String, DatabaseConfig>;

/// How long to wait for another process to release the registry.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

pub struct ConfigRegistry {
    path: PathBuf,
    write_lock: Mutex<()>,
    lock_timeout: Duration,
}

/// Holds the OS lock until dropped; closing the file releases it.
struct FileLock {
    _file: File,
}

impl ConfigRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every entry. A missing store is bootstrapped to `{}` first.
    pub async fn load_all(&self) -> Result<Registry, StorageError> {
        let _guard = self.write_lock.lock().await;
        let _file_lock = self.lock_file().await?;
        match self.read().await? {
            Some(registry) => Ok(registry),
            None => {
                let empty = Registry::new();
                self.write(&empty).await?;
                info!(path = %self.path.display(), "initialized empty database registry");
                Ok(empty)
            }
        }
    }

    /// Connection config for one database, used by the runtime connection layer.
    pub async fn get(&self, db_name: &str) -> Result<Option<DatabaseConfig>, StorageError> {
        let _guard = self.write_lock.lock().await;
        let _file_lock = self.lock_file().await?;
        Ok(self
            .read()
            .await?
            .and_then(|mut registry| registry.remove(db_name)))
    }

    /// Writes or overwrites the entry for `db_name` and persists the full
    /// registry before returning.
    pub async fn upsert(&self, db_name: &str, config: DatabaseConfig) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let _file_lock = self.lock_file().await?;
        let mut registry = self.read().await?.unwrap_or_default();
        let replaced = registry.insert(db_name.to_string(), config).is_some();
        self.write(&registry).await?;
        debug!(db_name, replaced, entries = registry.len(), "registry entry stored");
        Ok(())
    }

    /// Takes the exclusive lock on `<path>.lock`, polling until it is free
    /// or `lock_timeout` has passed.
    async fn lock_file(&self) -> Result<FileLock, StorageError> {
        use fs4::fs_std::FileExt;

        let lock_path = self.sibling_path(".lock");
        let io_err = |source| StorageError::Io {
            path: lock_path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(io_err)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(true) => return Ok(FileLock { _file: file }),
                Ok(false) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(source) => return Err(io_err(source)),
            }
            if started.elapsed() >= self.lock_timeout {
                return Err(StorageError::Locked {
                    path: lock_path.clone(),
                    waited: self.lock_timeout,
                });
            }
            debug!(lock_path = %lock_path.display(), "registry locked by another process, waiting");
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn read(&self) -> Result<Option<Registry>, StorageError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    async fn write(&self, registry: &Registry) -> Result<(), StorageError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        registry
            .serialize(&mut ser)
            .map_err(|source| StorageError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        let tmp = self.sibling_path(&format!(".{}.tmp", Uuid::new_v4().simple()));
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };
        tokio::fs::write(&tmp, &buf).await.map_err(io_err)?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(e));
        }
        Ok(())
    }

    fn sibling_path(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.path.with_file_name(name)
    }
}
