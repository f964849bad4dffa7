//! Signed-in username, persisted across runs in a small JSON key-value file.

use std::path::PathBuf;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

/// Key the username is stored under.
pub const USERNAME_KEY: &str = "backchannel_username";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Username cannot be empty")]
    EmptyName,

    #[error("Session file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session file is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct SessionStore {
    path: Option<PathBuf>,
    values: Map<String, Value>,
}

impl SessionStore {
    /// Load the store at `path`; a missing file is an empty session.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        let values = match std::fs::read(&path) {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)?,
            Ok(_) => Map::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Session loaded from {}", path.display());
        Ok(Self {
            path: Some(path),
            values,
        })
    }

    /// A session that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Map::new(),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.values.get(USERNAME_KEY).and_then(Value::as_str)
    }

    pub fn sign_in(&mut self, name: &str) -> Result<String, SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyName);
        }
        self.values
            .insert(USERNAME_KEY.to_string(), Value::String(name.to_string()));
        self.save()?;
        info!("Signed in as {}", name);
        Ok(name.to_string())
    }

    pub fn sign_out(&mut self) -> Result<(), SessionError> {
        if self.values.remove(USERNAME_KEY).is_some() {
            self.save()?;
            info!("Signed out");
        }
        Ok(())
    }

    fn save(&self) -> Result<(), SessionError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(&self.values)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut session = SessionStore::open(&path).unwrap();
        assert_eq!(session.username(), None);
        assert_eq!(session.sign_in("  ada  ").unwrap(), "ada");

        let reopened = SessionStore::open(&path).unwrap();
        assert_eq!(reopened.username(), Some("ada"));

        let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw[USERNAME_KEY], "ada");
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut session = SessionStore::in_memory();
        assert!(matches!(session.sign_in("   "), Err(SessionError::EmptyName)));
        assert_eq!(session.username(), None);
    }

    #[test]
    fn sign_out_removes_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let mut session = SessionStore::open(&path).unwrap();
        session.sign_in("ada").unwrap();
        session.sign_out().unwrap();

        assert_eq!(SessionStore::open(&path).unwrap().username(), None);
    }
}
