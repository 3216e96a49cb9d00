use crate::error::{DetectorError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const PLACEHOLDER_KEY: &str = "YOUR_OPENAI_API_KEY_HERE";

/// An API key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Present and not the placeholder shipped in sample configs.
    pub fn is_usable(&self) -> bool {
        let key = self.0.trim();
        !key.is_empty() && !key.eq_ignore_ascii_case(PLACEHOLDER_KEY)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

pub trait CredentialStore: Send + Sync {
    fn get_credential(&self) -> Result<Option<Secret>>;
    fn set_credential(&self, value: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    key: Mutex<Option<Secret>>,
}

impl MemoryCredentialStore {
    pub fn new(key: Option<&str>) -> Self {
        Self {
            key: Mutex::new(key.map(Secret::new)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_credential(&self) -> Result<Option<Secret>> {
        Ok(self.key.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn set_credential(&self, value: &str) -> Result<()> {
        *self.key.lock().unwrap_or_else(|e| e.into_inner()) = Some(Secret::new(value.trim()));
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Default)]
struct CredentialFile {
    #[serde(default)]
    api_key: Option<String>,
}

/// Stores the key as JSON, e.g. `~/.config/ai-detector/credentials.json`.
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
}

impl CredentialStore for FileCredentialStore {
    fn get_credential(&self) -> Result<Option<Secret>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| DetectorError::Credential {
            message: format!("Failed to read {}: {}", self.path.display(), e),
        })?;
        let file: CredentialFile = serde_json::from_str(&content).map_err(|e| DetectorError::Credential {
            message: format!("Failed to parse {}: {}", self.path.display(), e),
        })?;
        Ok(file.api_key.map(Secret::new))
    }

    fn set_credential(&self, value: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DetectorError::Credential {
                message: format!("Failed to create {}: {}", parent.display(), e),
            })?;
        }
        let file = CredentialFile {
            api_key: Some(value.trim().to_string()),
        };
        let content = serde_json::to_string_pretty(&file).map_err(|e| DetectorError::Credential {
            message: e.to_string(),
        })?;
        std::fs::write(&self.path, content).map_err(|e| DetectorError::Credential {
            message: format!("Failed to write {}: {}", self.path.display(), e),
        })
    }
}
