use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use core_types::{ClientError, ClientResult, SecretRef, SessionStorage};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

mod memory;
mod sealed;

pub use memory::MemoryStorage;
use sealed::Sealed;

const SCHEMA_VERSION: u32 = 1;
const PLAIN_FILE: &str = "secrets.json";
const SEALED_FILE: &str = "secrets.enc.json";

/// Namespace the session slots live under inside the secrets file.
pub const SESSION_NAMESPACE: &str = "session";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secrets are sealed and no password was provided")]
    Locked,
    #[error("failed to parse {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

type Table = BTreeMap<String, String>;

#[derive(Debug, Serialize, Deserialize)]
struct PlainFile {
    schema_version: u32,
    values: Table,
}

/// File-backed key-value store, optionally sealed with a password.
///
/// Entries are addressed as `namespace:key`. Every change replaces the whole
/// file through a rename, so a returned write or removal survives a restart.
/// With a password set, a plain file left from before is read once and
/// replaced by a sealed one on the next write.
#[derive(Debug)]
pub struct SecretStore {
    root: PathBuf,
    password: Option<String>,
    write_lock: Mutex<()>,
}

impl SecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            password: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn is_encrypted_mode(&self) -> bool {
        self.password.is_some()
    }

    pub fn put(
        &self,
        namespace: impl AsRef<str>,
        key: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Result<()> {
        let entry = entry_key(namespace.as_ref(), key.as_ref());
        let value = value.into();
        self.update(|table| table.insert(entry, value.clone()).as_ref() != Some(&value))
    }

    pub fn get(&self, namespace: impl AsRef<str>, key: impl AsRef<str>) -> Result<Option<String>> {
        let mut table = self.read_table()?;
        Ok(table.remove(&entry_key(namespace.as_ref(), key.as_ref())))
    }

    /// Removing from a file that no longer parses moves the file aside, so
    /// the entry is gone either way and later writes start from empty.
    pub fn remove(&self, namespace: impl AsRef<str>, key: impl AsRef<str>) -> Result<()> {
        let entry = entry_key(namespace.as_ref(), key.as_ref());
        let err = match self.update(|table| table.remove(&entry).is_some()) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        match err.downcast_ref::<SecretError>() {
            Some(SecretError::Corrupt { path, .. }) => self.quarantine(path),
            _ => Err(err),
        }
    }

    pub fn resolve(&self, secret: &SecretRef) -> Result<Option<String>> {
        self.get(&secret.namespace, &secret.key)
    }

    /// Read-modify-write under the store lock; `change` reports whether the
    /// table needs writing back.
    fn update(&self, change: impl FnOnce(&mut Table) -> bool) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut table = self.read_table()?;
        if change(&mut table) {
            self.write_table(&table)?;
        }
        Ok(())
    }

    fn read_table(&self) -> Result<Table> {
        let plain = self.path(PLAIN_FILE);
        let sealed = self.path(SEALED_FILE);
        match self.password.as_deref() {
            Some(password) if sealed.exists() => {
                let envelope: Sealed = read_json(&sealed)?;
                let bytes = envelope.open(password)?;
                serde_json::from_slice(&bytes).context("sealed secrets hold an invalid table")
            }
            None if sealed.exists() && !plain.exists() => Err(SecretError::Locked.into()),
            _ if plain.exists() => Ok(read_json::<PlainFile>(&plain)?.values),
            _ => Ok(Table::new()),
        }
    }

    fn write_table(&self, table: &Table) -> Result<()> {
        let (target, stale) = match self.password.as_deref() {
            Some(password) => {
                let bytes = serde_json::to_vec(table)?;
                let envelope = Sealed::seal(SCHEMA_VERSION, password, &bytes)?;
                write_json(&self.path(SEALED_FILE), &envelope)?;
                (SEALED_FILE, PLAIN_FILE)
            }
            None => {
                let doc = PlainFile {
                    schema_version: SCHEMA_VERSION,
                    values: table.clone(),
                };
                write_json(&self.path(PLAIN_FILE), &doc)?;
                (PLAIN_FILE, SEALED_FILE)
            }
        };
        let stale = self.path(stale);
        if stale.exists() {
            fs::remove_file(&stale)
                .with_context(|| format!("failed to remove {}", stale.display()))?;
        }
        debug!(file = target, entries = table.len(), "secrets written");
        Ok(())
    }

    fn quarantine(&self, path: &Path) -> Result<()> {
        let _guard = self.write_lock.lock();
        if !path.exists() {
            return Ok(());
        }
        let aside = path.with_extension("corrupt");
        fs::rename(path, &aside)
            .with_context(|| format!("failed to move aside {}", path.display()))?;
        warn!(file = %path.display(), moved_to = %aside.display(), "unparsable secrets file moved aside");
        Ok(())
    }

    fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }
}

impl SessionStorage for SecretStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> {
        SecretStore::get(self, SESSION_NAMESPACE, key).map_err(storage_error)
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.put(SESSION_NAMESPACE, key, value)
            .map_err(storage_error)
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        SecretStore::remove(self, SESSION_NAMESPACE, key).map_err(storage_error)
    }
}

fn storage_error(err: anyhow::Error) -> ClientError {
    ClientError::storage(format!("{err:#}"))
}

fn entry_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).map_err(|err| {
        anyhow::Error::from(SecretError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let staging = path.with_extension("tmp");
    fs::write(&staging, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("failed to write {}", staging.display()))?;
    fs::rename(&staging, path).with_context(|| format!("failed to replace {}", path.display()))
}

pub fn default_secret_dir_from(base_dir: &Path) -> PathBuf {
    base_dir.join("secrets")
}
