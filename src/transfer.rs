use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::{Task, TaskList, Timestamp};

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug)]
pub enum ImportError {
    /// The document is not an object with `tasks` and `lists` arrays.
    InvalidFormat(String),
    Json(serde_json::Error),
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::InvalidFormat(message) => write!(f, "invalid import file: {message}"),
            ImportError::Json(err) => write!(f, "json error: {err}"),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<serde_json::Error> for ImportError {
    fn from(value: serde_json::Error) -> Self {
        ImportError::Json(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub tasks: Vec<Task>,
    pub lists: Vec<TaskList>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub export_date: Timestamp,
}

fn default_version() -> u32 {
    EXPORT_VERSION
}

impl ExportDocument {
    pub fn new(tasks: Vec<Task>, lists: Vec<TaskList>, tags: Vec<String>) -> Self {
        Self {
            tasks,
            lists,
            tags,
            version: EXPORT_VERSION,
            export_date: Utc::now(),
        }
    }
}

pub fn export_json(document: &ExportDocument) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(document)
}

/// Parses an export document. Only the presence of `tasks` and `lists` arrays is checked
/// up front; anything malformed inside them is reported as a JSON error.
pub fn parse_import(text: &str) -> Result<ExportDocument, ImportError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let Some(object) = value.as_object() else {
        return Err(ImportError::InvalidFormat("expected a JSON object".into()));
    };
    for key in ["tasks", "lists"] {
        if !object.get(key).is_some_and(|v| v.is_array()) {
            return Err(ImportError::InvalidFormat(format!("`{key}` must be an array")));
        }
    }
    let document = ExportDocument::deserialize(value)?;
    if document.version > EXPORT_VERSION {
        log::warn!(
            "import document version={} is newer than supported={EXPORT_VERSION}",
            document.version
        );
    }
    Ok(document)
}
