//! Credentials at rest
//!
//! Target configs keep their `password` and `key_file` values encrypted. The
//! check executor decrypts a copy right before probing; the decrypted map is
//! never logged and never written back.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use fernet::Fernet;
use serde_json::Value;
use tracing::{debug, info};

use crate::target::TargetConfig;

/// Config fields holding secrets
pub const SENSITIVE_FIELDS: [&str; 2] = ["password", "key_file"];

#[derive(Debug)]
pub enum CipherError {
    /// Key file missing, unreadable or not writable
    KeyFile(PathBuf, std::io::Error),

    /// Key file exists but does not hold a usable key
    InvalidKey(String),
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherError::KeyFile(path, e) => write!(f, "key file {}: {}", path.display(), e),
            CipherError::InvalidKey(msg) => write!(f, "invalid key: {}", msg),
        }
    }
}

impl std::error::Error for CipherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CipherError::KeyFile(_, e) => Some(e),
            CipherError::InvalidKey(_) => None,
        }
    }
}

/// Encrypts and decrypts the sensitive fields of a target config.
pub trait CredentialCipher: Send + Sync {
    /// Write path only. Non-string, empty and already sealed values are left
    /// as they are.
    fn encrypt(&self, config: &TargetConfig) -> TargetConfig;

    /// Values that do not decrypt are returned unchanged, so rows written
    /// before encryption was enabled keep working.
    fn decrypt(&self, config: &TargetConfig) -> TargetConfig;
}

/// Identity cipher for plaintext deployments and tests
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl CredentialCipher for PlaintextCipher {
    fn encrypt(&self, config: &TargetConfig) -> TargetConfig {
        config.clone()
    }

    fn decrypt(&self, config: &TargetConfig) -> TargetConfig {
        config.clone()
    }
}

/// Fernet over a key kept in a local file.
///
/// The key file holds a standard Fernet key (URL-safe base64 of 32 bytes).
/// Stored values are the standard base64 encoding of the Fernet token, the
/// format the web layer writes.
pub struct SecretBox {
    fernet: Fernet,
}

impl SecretBox {
    pub fn new(key: &str) -> Result<Self, CipherError> {
        Fernet::new(key.trim())
            .map(|fernet| Self { fernet })
            .ok_or_else(|| CipherError::InvalidKey("not a Fernet key".to_string()))
    }

    /// Load the key at `path`, generating one (mode 0600) when it does not
    /// exist yet.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, CipherError> {
        let path = path.as_ref();
        if path.exists() {
            let key =
                fs::read_to_string(path).map_err(|e| CipherError::KeyFile(path.into(), e))?;
            let secret_box = Self::new(&key)?;
            debug!("loaded credential key from {}", path.display());
            return Ok(secret_box);
        }

        let key = Fernet::generate_key();
        write_private(path, key.as_bytes()).map_err(|e| CipherError::KeyFile(path.into(), e))?;
        info!("generated new credential key at {}", path.display());
        Self::new(&key)
    }

    pub fn seal(&self, plaintext: &str) -> String {
        STANDARD.encode(self.fernet.encrypt(plaintext.as_bytes()))
    }

    /// `None` when the value is not something this key sealed.
    pub fn open(&self, sealed: &str) -> Option<String> {
        let token = String::from_utf8(STANDARD.decode(sealed.trim()).ok()?).ok()?;
        let plaintext = self.fernet.decrypt(&token).ok()?;
        String::from_utf8(plaintext).ok()
    }
}

impl CredentialCipher for SecretBox {
    fn encrypt(&self, config: &TargetConfig) -> TargetConfig {
        let mut sealed = config.clone();
        for field in SENSITIVE_FIELDS {
            if let Some(Value::String(value)) = config.get(field)
                && !value.is_empty()
                && self.open(value).is_none()
            {
                sealed.insert(field.to_string(), Value::String(self.seal(value)));
            }
        }
        sealed
    }

    fn decrypt(&self, config: &TargetConfig) -> TargetConfig {
        let mut opened = config.clone();
        for field in SENSITIVE_FIELDS {
            if let Some(Value::String(value)) = config.get(field)
                && let Some(plain) = self.open(value)
            {
                opened.insert(field.to_string(), Value::String(plain));
            }
        }
        opened
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(contents)
}
