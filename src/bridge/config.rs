//! Bridge session configuration.
//!
//! One `BridgeConfig` wires one mini-app identity to one bridge session.
//! Validation happens once, up front: a config that passes `validate` can
//! be wired without further runtime checks.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::protocol::DEFAULT_JS_NAMESPACE;

/// Default secure-storage quota per app identity.
pub const DEFAULT_MAX_STORAGE_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("app_id must not be blank")]
    BlankAppId,
    #[error("max_storage_bytes must be greater than zero")]
    ZeroStorageQuota,
    #[error("js_namespace {0:?} is not a valid JS identifier")]
    InvalidJsNamespace(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Identity of the embedded app; scopes the secure storage.
    pub app_id: String,

    /// Directory holding per-app secure storage snapshots.
    pub storage_dir: PathBuf,

    /// Secure-storage quota in bytes (sum of key + value sizes).
    pub max_storage_bytes: u64,

    /// Web-side namespace object receiving injected callbacks.
    pub js_namespace: String,
}

impl BridgeConfig {
    #[must_use]
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    /// Check the wiring invariants. Call once before handing the config to
    /// [`crate::bridge::MessageBridge::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_id.trim().is_empty() {
            return Err(ConfigError::BlankAppId);
        }
        if self.max_storage_bytes == 0 {
            return Err(ConfigError::ZeroStorageQuota);
        }
        if !is_js_identifier(&self.js_namespace) {
            return Err(ConfigError::InvalidJsNamespace(self.js_namespace.clone()));
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            storage_dir: default_storage_dir(),
            max_storage_bytes: DEFAULT_MAX_STORAGE_BYTES,
            js_namespace: DEFAULT_JS_NAMESPACE.to_string(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("minibridge")
        .join("storage")
}

fn is_js_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
