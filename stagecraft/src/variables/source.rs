//! External data sources and sinks bound to variable slots.

use crate::errors::SourceError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Which operations a source permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Load only.
    Read,
    /// Save only.
    Write,
    /// Load and save.
    #[default]
    ReadWrite,
}

impl SourceMode {
    /// Returns true if loading is permitted.
    #[must_use]
    pub fn can_read(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Returns true if saving is permitted.
    #[must_use]
    pub fn can_write(&self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Trait for data sources and sinks.
///
/// The resolver loads from a source when a consume or transform slot finds
/// no value in the context, and saves to it when a produce or transform slot
/// is written back.
pub trait DataSource: Send + Sync + Debug {
    /// Returns a human-readable description, used in errors and logs.
    fn describe(&self) -> String;

    /// Returns the permitted operations.
    fn mode(&self) -> SourceMode {
        SourceMode::ReadWrite
    }

    /// Loads the data.
    fn load(&self) -> Result<Value, SourceError>;

    /// Saves the data.
    fn save(&self, data: &Value) -> Result<(), SourceError>;
}

/// An in-process source backed by a single value cell.
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    mode: SourceMode,
    data: RwLock<Option<Value>>,
}

impl MemorySource {
    /// Creates an empty memory source.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: SourceMode::ReadWrite,
            data: RwLock::new(None),
        }
    }

    /// Creates a memory source holding initial data.
    #[must_use]
    pub fn with_data(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            mode: SourceMode::ReadWrite,
            data: RwLock::new(Some(data)),
        }
    }

    /// Restricts the source to loading.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.mode = SourceMode::Read;
        self
    }

    /// Restricts the source to saving.
    #[must_use]
    pub fn write_only(mut self) -> Self {
        self.mode = SourceMode::Write;
        self
    }

    /// Returns a copy of the stored data.
    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.data.read().clone()
    }
}

impl DataSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn mode(&self) -> SourceMode {
        self.mode
    }

    fn load(&self) -> Result<Value, SourceError> {
        if !self.mode.can_read() {
            return Err(SourceError::Unsupported {
                name: self.describe(),
                operation: "load",
            });
        }
        self.data.read().clone().ok_or_else(|| SourceError::Empty {
            name: self.describe(),
        })
    }

    fn save(&self, data: &Value) -> Result<(), SourceError> {
        if !self.mode.can_write() {
            return Err(SourceError::Unsupported {
                name: self.describe(),
                operation: "save",
            });
        }
        *self.data.write() = Some(data.clone());
        Ok(())
    }
}

/// A source that reads and writes a JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    mode: SourceMode,
    pretty: bool,
}

impl JsonFileSource {
    /// Creates a source for loading and saving a JSON file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: SourceMode::ReadWrite,
            pretty: true,
        }
    }

    /// Creates a load-only source.
    #[must_use]
    pub fn reader(path: impl Into<PathBuf>) -> Self {
        Self::new(path).with_mode(SourceMode::Read)
    }

    /// Creates a save-only sink.
    #[must_use]
    pub fn writer(path: impl Into<PathBuf>) -> Self {
        Self::new(path).with_mode(SourceMode::Write)
    }

    /// Sets the mode.
    #[must_use]
    pub fn with_mode(mut self, mode: SourceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Writes compact JSON instead of pretty-printed JSON.
    #[must_use]
    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn path_string(&self) -> String {
        self.path.display().to_string()
    }
}

impl DataSource for JsonFileSource {
    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }

    fn mode(&self) -> SourceMode {
        self.mode
    }

    fn load(&self) -> Result<Value, SourceError> {
        if !self.mode.can_read() {
            return Err(SourceError::Unsupported {
                name: self.describe(),
                operation: "load",
            });
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| SourceError::Io {
            path: self.path_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SourceError::Json {
            path: self.path_string(),
            source,
        })
    }

    fn save(&self, data: &Value) -> Result<(), SourceError> {
        if !self.mode.can_write() {
            return Err(SourceError::Unsupported {
                name: self.describe(),
                operation: "save",
            });
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SourceError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let encoded = if self.pretty {
            serde_json::to_string_pretty(data)
        } else {
            serde_json::to_string(data)
        }
        .map_err(|source| SourceError::Json {
            path: self.path_string(),
            source,
        })?;
        fs::write(&self.path, encoded).map_err(|source| SourceError::Io {
            path: self.path_string(),
            source,
        })
    }
}
