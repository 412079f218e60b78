// src/config.rs

//! Configuration & Settings (C10): `appsettings.json`, loaded once and
//! cached by the engine handle, plus the operation-password record used by
//! the (out-of-scope) GUI hard-delete gate. The core persists this record
//! faithfully but never verifies it.

use crate::error::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
pub const DEFAULT_LAN_PORT: u16 = 5123;

/// A PBKDF2-HMAC-SHA256 password record: salt, hash, and iteration count,
/// all base64-encoded for JSON storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRecord {
    pub salt_base64: String,
    pub hash_base64: String,
    pub iterations: u32,
}

impl PasswordRecord {
    /// Derive a fresh record for `password`. Persisted verbatim by the core;
    /// verification is a GUI-side concern (out of scope, §1).
    pub fn derive(password: &str, iterations: u32) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        let mut hash = [0u8; HASH_LEN];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut hash);

        Self {
            salt_base64: BASE64.encode(salt),
            hash_base64: BASE64.encode(hash),
            iterations,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanSettings {
    #[serde(default = "default_lan_port")]
    pub port: u16,
    pub shared_key: Option<String>,
}

fn default_lan_port() -> u16 {
    DEFAULT_LAN_PORT
}

impl Default for LanSettings {
    fn default() -> Self {
        Self { port: DEFAULT_LAN_PORT, shared_key: None }
    }
}

/// `<config-dir>/appsettings.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub lan: LanSettings,
    pub operation_password: Option<PasswordRecord>,
}

impl Settings {
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Settings::default());
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Caller-supplied key/value overrides (§6: "collaborators provide config
/// values via a key/value map"), applied over the file-backed settings.
/// Only the LAN settings are exposed through this override layer; anything
/// else in `Settings` is file-only.
pub fn apply_overrides(settings: &mut Settings, overrides: &HashMap<String, String>) {
    if let Some(port) = overrides.get("lan.port").and_then(|v| v.parse().ok()) {
        settings.lan.port = port;
    }
    if let Some(key) = overrides.get("lan.sharedKey") {
        settings.lan.shared_key = Some(key.clone());
    }
}

/// A settings handle that caches the loaded file in-process and exposes an
/// explicit `reload` to re-read it, per the engine's read-mostly settings
/// contract (C10).
pub struct SettingsStore {
    path: std::path::PathBuf,
    cached: Settings,
}

impl SettingsStore {
    pub fn load(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        let path = path.into();
        let cached = Settings::load_or_default(&path)?;
        Ok(Self { path, cached })
    }

    pub fn current(&self) -> &Settings {
        &self.cached
    }

    pub fn reload(&mut self) -> Result<()> {
        self.cached = Settings::load_or_default(&self.path)?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        self.cached.save(&self.path)
    }

    pub fn update(&mut self, f: impl FnOnce(&mut Settings)) -> Result<()> {
        f(&mut self.cached);
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_or_default_when_missing() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_or_default(&dir.path().join("appsettings.json")).unwrap();
        assert_eq!(settings.lan.port, DEFAULT_LAN_PORT);
        assert!(settings.operation_password.is_none());
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("appsettings.json");

        let mut store = SettingsStore::load(&path).unwrap();
        store.update(|s| s.lan.port = 6000).unwrap();

        let mut reloaded = SettingsStore::load(&path).unwrap();
        assert_eq!(reloaded.current().lan.port, 6000);
        reloaded.reload().unwrap();
        assert_eq!(reloaded.current().lan.port, 6000);
    }

    #[test]
    fn test_overrides_apply_over_file_settings() {
        let mut settings = Settings::default();
        let mut overrides = HashMap::new();
        overrides.insert("lan.port".to_string(), "7000".to_string());
        overrides.insert("lan.sharedKey".to_string(), "secret".to_string());

        apply_overrides(&mut settings, &overrides);
        assert_eq!(settings.lan.port, 7000);
        assert_eq!(settings.lan.shared_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_password_record_derives_distinct_salts() {
        let a = PasswordRecord::derive("hunter2", DEFAULT_PBKDF2_ITERATIONS);
        let b = PasswordRecord::derive("hunter2", DEFAULT_PBKDF2_ITERATIONS);
        assert_ne!(a.salt_base64, b.salt_base64, "salts must be freshly randomized");
        assert_eq!(a.iterations, DEFAULT_PBKDF2_ITERATIONS);
    }
}
