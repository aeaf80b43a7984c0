//! Session identity of the signed-in user.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("user record has no usable `id` field")]
    MissingId,
    #[error("credential store io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("credential store holds invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where the opaque user record survives between runs.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Value>, SessionError>;
    fn store(&self, record: &Value) -> Result<(), SessionError>;
    fn clear(&self) -> Result<(), SessionError>;
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<Value>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: Value) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Value>, SessionError> {
        Ok(self.record.lock().clone())
    }

    fn store(&self, record: &Value) -> Result<(), SessionError> {
        *self.record.lock() = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        self.record.lock().take();
        Ok(())
    }
}

/// JSON file holding the last signed-in user record.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Value>, SessionError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn store(&self, record: &Value) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let text = serde_json::to_string_pretty(record)?;
        fs::write(&self.path, text).map_err(|err| self.io_error(err))
    }

    fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionIdentity {
    pub user_id: String,
    pub record: Value,
}

impl SessionIdentity {
    /// Reads the `id` field; numeric ids are stringified.
    pub fn from_record(record: Value) -> Result<Self, SessionError> {
        let user_id = match record.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(SessionError::MissingId),
        };
        Ok(Self { user_id, record })
    }
}

/// Shared handle on the current identity. Starts empty; clones see the same state.
#[derive(Clone)]
pub struct SessionContext {
    identity: Arc<RwLock<Option<SessionIdentity>>>,
    store: Arc<dyn CredentialStore>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("user_id", &self.user_id())
            .finish()
    }
}

impl SessionContext {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            identity: Arc::new(RwLock::new(None)),
            store,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCredentialStore::new()))
    }

    /// Signed-in context that is not persisted anywhere.
    pub fn for_user(user_id: &str) -> Self {
        let session = Self::in_memory();
        *session.identity.write() = Some(SessionIdentity {
            user_id: user_id.to_owned(),
            record: serde_json::json!({ "id": user_id }),
        });
        session
    }

    /// Loads a previously stored identity. A corrupt record is discarded.
    pub fn restore(&self) -> Result<Option<String>, SessionError> {
        let Some(record) = self.store.load()? else {
            return Ok(None);
        };
        match SessionIdentity::from_record(record) {
            Ok(identity) => {
                let user_id = identity.user_id.clone();
                debug!(target: "agora::session", %user_id, "restored session");
                *self.identity.write() = Some(identity);
                Ok(Some(user_id))
            }
            Err(err) => {
                warn!(target: "agora::session", error = %err, "discarding stored credentials");
                self.store.clear()?;
                Ok(None)
            }
        }
    }

    pub fn sign_in(&self, record: Value) -> Result<String, SessionError> {
        let identity = SessionIdentity::from_record(record)?;
        self.store.store(&identity.record)?;
        let user_id = identity.user_id.clone();
        *self.identity.write() = Some(identity);
        debug!(target: "agora::session", %user_id, "signed in");
        Ok(user_id)
    }

    /// Replaces the stored record of the current user; ignored when the ids differ.
    pub fn refresh(&self, record: Value) -> Result<(), SessionError> {
        let identity = SessionIdentity::from_record(record)?;
        let mut guard = self.identity.write();
        match guard.as_ref() {
            Some(current) if current.user_id == identity.user_id => {
                self.store.store(&identity.record)?;
                *guard = Some(identity);
            }
            _ => {
                debug!(target: "agora::session", user_id = %identity.user_id, "ignoring refresh for another user");
            }
        }
        Ok(())
    }

    /// Drops the identity and the stored record; returns the id that was cleared.
    pub fn clear(&self) -> Option<String> {
        let previous = self.identity.write().take();
        if let Err(err) = self.store.clear() {
            warn!(target: "agora::session", error = %err, "failed to clear stored credentials");
        }
        previous.map(|identity| identity.user_id)
    }

    pub fn user_id(&self) -> Option<String> {
        self.identity.read().as_ref().map(|id| id.user_id.clone())
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.identity.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.read().is_some()
    }
}
