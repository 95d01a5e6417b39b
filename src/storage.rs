use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{Settings, Task, TaskList};
use crate::scheduler::NotificationRecord;
use crate::sync::PendingChange;
use crate::workflow::WorkflowRule;

pub const KEY_TASKS: &str = "tasks";
pub const KEY_LISTS: &str = "lists";
pub const KEY_TAGS: &str = "tags";
pub const KEY_PENDING: &str = "pending-sync-data";
pub const KEY_NOTIFICATIONS: &str = "notifications";
pub const KEY_WORKFLOW_RULES: &str = "workflow-rules";
pub const KEY_SETTINGS: &str = "settings";

#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(err) => write!(f, "io error: {err}"),
            StorageError::Json(err) => write!(f, "json error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        StorageError::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        StorageError::Json(value)
    }
}

/// Everything the store keeps on disk, loaded in one go on startup.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub tasks: Vec<Task>,
    pub lists: Vec<TaskList>,
    pub tags: Vec<String>,
    pub pending: Vec<PendingChange>,
    pub rules: Vec<WorkflowRule>,
    pub settings: Settings,
}

/// Key/value storage: one JSON document per key inside `root`.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Reads a key. A missing document yields `T::default()`.
    pub fn load_key<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, StorageError> {
        match self.load_json(self.key_path(key)) {
            Err(StorageError::Io(io)) if io.kind() == std::io::ErrorKind::NotFound => {
                Ok(T::default())
            }
            other => other,
        }
    }

    pub fn save_key<T: Serialize + ?Sized>(&self, key: &str, data: &T) -> Result<(), StorageError> {
        self.write_atomic(self.key_path(key), data)
    }

    /// Loads every key, logging and dropping documents that fail to parse.
    pub fn load_snapshot(&self) -> Snapshot {
        Snapshot {
            tasks: self.load_or_log(KEY_TASKS),
            lists: self.load_or_log(KEY_LISTS),
            tags: self.load_or_log(KEY_TAGS),
            pending: self.load_or_log(KEY_PENDING),
            rules: self.load_or_log(KEY_WORKFLOW_RULES),
            settings: self.load_or_log(KEY_SETTINGS),
        }
    }

    fn load_or_log<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.load_key(key).unwrap_or_else(|err| {
            log::warn!("storage load failed key={key} err={err}; using defaults");
            T::default()
        })
    }

    pub fn load_notifications(&self) -> Result<Vec<NotificationRecord>, StorageError> {
        self.load_key(KEY_NOTIFICATIONS)
    }

    pub fn save_notifications(&self, history: &[NotificationRecord]) -> Result<(), StorageError> {
        self.save_key(KEY_NOTIFICATIONS, history)
    }

    fn load_json<T: DeserializeOwned>(&self, path: PathBuf) -> Result<T, StorageError> {
        let mut file = File::open(path)?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        Ok(serde_json::from_str(&buf)?)
    }

    fn write_atomic<T: Serialize + ?Sized>(
        &self,
        path: PathBuf,
        data: &T,
    ) -> Result<(), StorageError> {
        let temp_path = path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(data)?;
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(temp_path, path)?;
        Ok(())
    }
}
