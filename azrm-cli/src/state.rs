//! State file and lock handling
//!
//! State is stored as pretty-printed JSON (default: azrm.state.json) next to
//! a `.lock` file that guards it while a mutating command runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use azrm_core::resource::{ResourceId, State, Value};

/// Default lock timeout in seconds (15 minutes)
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 900;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("State is locked by {who} (lock ID: {lock_id}, operation: {operation})")]
    Locked {
        lock_id: String,
        who: String,
        operation: String,
    },

    #[error("Lock ID mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    #[error("Unsupported state file version {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid state file: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type StateResult<T> = Result<T, StateError>;

// =============================================================================
// State File
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    /// Unique identifier of this state's history
    pub lineage: String,
    /// Version of azrm that last wrote this state
    pub azrm_version: String,
    /// Managed resources, in creation order
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            azrm_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.azrm_version = env!("CARGO_PKG_VERSION").to_string();
    }

    pub fn find(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == id.resource_type && r.name == id.name)
    }

    /// Record a state returned by the provider; states without an ARM ID are dropped
    pub fn record(&mut self, state: &State) {
        let Some(entry) = ResourceState::from_state(state) else {
            self.remove(&state.id);
            return;
        };
        match self
            .resources
            .iter_mut()
            .find(|r| r.resource_type == entry.resource_type && r.name == entry.name)
        {
            Some(existing) => *existing = entry,
            None => self.resources.push(entry),
        }
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<ResourceState> {
        let pos = self
            .resources
            .iter()
            .position(|r| r.resource_type == id.resource_type && r.name == id.name)?;
        Some(self.resources.remove(pos))
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource_type: String,
    pub name: String,
    /// ARM resource ID
    pub identifier: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl ResourceState {
    pub fn from_state(state: &State) -> Option<Self> {
        if !state.exists {
            return None;
        }
        Some(Self {
            resource_type: state.id.resource_type.clone(),
            name: state.id.name.clone(),
            identifier: state.identifier.clone()?,
            attributes: state.attributes.clone(),
        })
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.resource_type, &self.name)
    }
}

/// Keep the last known value of attributes a read does not return
///
/// Write-only inputs (an API import document, a proxy password) are never
/// echoed back by ARM; without this they would show as changed on every plan.
pub fn carry_unread(state: &mut State, known: &HashMap<String, Value>) {
    if !state.exists {
        return;
    }
    for (key, value) in known {
        if !state.attributes.contains_key(key) {
            state.attributes.insert(key.clone(), value.clone());
        }
    }
}

// =============================================================================
// Locking
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    /// Command holding the lock (e.g. "apply", "destroy")
    pub operation: String,
    /// username@hostname
    pub who: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(operation: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            who: lock_owner(),
            created: now,
            expires: now + Duration::seconds(DEFAULT_LOCK_TIMEOUT_SECS),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires
    }
}

fn lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}

// =============================================================================
// Local Backend
// =============================================================================

/// State file on the local filesystem
pub struct LocalState {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalState {
    pub const DEFAULT_STATE_FILE: &'static str = "azrm.state.json";

    /// State file stored next to the given configuration file
    pub fn beside(config_file: &Path) -> Self {
        let dir = config_file.parent().unwrap_or(Path::new("."));
        Self::with_path(dir.join(Self::DEFAULT_STATE_FILE))
    }

    pub fn with_path(state_path: PathBuf) -> Self {
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
        }
    }

    /// Read the state file, or start a fresh one if none exists
    pub fn read(&self) -> StateResult<StateFile> {
        if !self.state_path.exists() {
            return Ok(StateFile::new());
        }

        let content = std::fs::read_to_string(&self.state_path)
            .map_err(|e| StateError::Io(format!("Failed to read state file: {}", e)))?;

        let state: StateFile = serde_json::from_str(&content)
            .map_err(|e| StateError::InvalidState(format!("Failed to parse state file: {}", e)))?;

        if state.version > StateFile::CURRENT_VERSION {
            return Err(StateError::UnsupportedVersion(state.version));
        }

        Ok(state)
    }

    pub fn write(&self, state: &StateFile) -> StateResult<()> {
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::InvalidState(format!("Failed to serialize state: {}", e)))?;

        std::fs::write(&self.state_path, content)
            .map_err(|e| StateError::Io(format!("Failed to write state file: {}", e)))
    }

    pub fn acquire_lock(&self, operation: &str) -> StateResult<LockInfo> {
        if self.lock_path.exists() {
            let content = std::fs::read_to_string(&self.lock_path)
                .map_err(|e| StateError::Io(format!("Failed to read lock file: {}", e)))?;

            if let Ok(existing) = serde_json::from_str::<LockInfo>(&content)
                && !existing.is_expired()
            {
                return Err(StateError::Locked {
                    lock_id: existing.id,
                    who: existing.who,
                    operation: existing.operation,
                });
            }
        }

        let lock = LockInfo::new(operation);
        let content = serde_json::to_string_pretty(&lock)
            .map_err(|e| StateError::InvalidState(format!("Failed to serialize lock: {}", e)))?;

        std::fs::write(&self.lock_path, content)
            .map_err(|e| StateError::Io(format!("Failed to write lock file: {}", e)))?;

        Ok(lock)
    }

    pub fn release_lock(&self, lock: &LockInfo) -> StateResult<()> {
        if !self.lock_path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.lock_path)
            .map_err(|e| StateError::Io(format!("Failed to read lock file: {}", e)))?;

        let existing: LockInfo = serde_json::from_str(&content)
            .map_err(|e| StateError::InvalidState(format!("Failed to parse lock file: {}", e)))?;

        if existing.id != lock.id {
            return Err(StateError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            });
        }

        std::fs::remove_file(&self.lock_path)
            .map_err(|e| StateError::Io(format!("Failed to remove lock file: {}", e)))
    }
}
