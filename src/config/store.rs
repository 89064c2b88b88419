//! OCPP Configuration (1.6 `GetConfiguration`/`ChangeConfiguration`) and
//! Variable (2.0.1 `GetVariables`/`SetVariables`) store, unified behind
//! one typed key/value surface persisted to `ocpp-config.jsn` (spec.md
//! §6 "Config / variable surface").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::filesystem::{load_json, save_json, FilesystemAdapter};

const STORE_FILE: &str = "ocpp-config.jsn";

/// 2.0.1 variable accessibility (spec.md §6). 1.6's simpler
/// readonly/read-write is modeled as `ReadWrite`/`ReadOnly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accessibility {
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub key: String,
    pub value: String,
    pub accessibility: Accessibility,
    /// Changing this key only takes effect after a reboot (spec.md §6).
    pub reboot_required: bool,
    /// Declared by the crate at startup; `false` for anything the CSMS
    /// invented that this charge point doesn't recognize.
    pub known: bool,
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedStore {
    values: BTreeMap<String, String>,
    /// Keys changed since boot that require a reboot to take effect.
    pending_reboot: Vec<String>,
}

/// The live configuration/variable store. `declare` registers a key's
/// shape (accessibility, reboot requirement); `get`/`set` operate on
/// values. Declaring a key is idempotent and does not itself persist —
/// only `set` (and its result written through `commit`) touches disk.
pub struct ConfigStore {
    declared: BTreeMap<String, (Accessibility, bool)>,
    values: BTreeMap<String, String>,
    pending_reboot: Vec<String>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            declared: BTreeMap::new(),
            values: BTreeMap::new(),
            pending_reboot: Vec::new(),
        }
    }

    pub fn load(fs: &dyn FilesystemAdapter) -> Result<Self, ConfigError> {
        let persisted: PersistedStore = load_json(fs, STORE_FILE)?.unwrap_or_default();
        Ok(Self {
            declared: BTreeMap::new(),
            values: persisted.values,
            pending_reboot: persisted.pending_reboot,
        })
    }

    pub fn commit(&self, fs: &dyn FilesystemAdapter) -> Result<(), ConfigError> {
        save_json(
            fs,
            STORE_FILE,
            &PersistedStore {
                values: self.values.clone(),
                pending_reboot: self.pending_reboot.clone(),
            },
        )?;
        Ok(())
    }

    /// Declare a key with its default value and shape. Declaring a key
    /// that already has a persisted value keeps the persisted value.
    pub fn declare(&mut self, key: &str, default: &str, accessibility: Accessibility, reboot_required: bool) {
        self.declared.insert(key.to_string(), (accessibility, reboot_required));
        self.values.entry(key.to_string()).or_insert_with(|| default.to_string());
    }

    pub fn get(&self, key: &str) -> Result<&str, ConfigError> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::UnknownVariable(key.to_string()))
    }

    /// `ChangeConfiguration`/`SetVariables` (spec.md §6). Rejects unknown
    /// keys, read-only keys, and values the caller-supplied `validate`
    /// rejects; accepts everything else, queuing a reboot flag if the key
    /// requires one.
    pub fn set(
        &mut self,
        key: &str,
        value: &str,
        validate: impl FnOnce(&str, &str) -> Result<(), String>,
    ) -> Result<(), ConfigError> {
        let (accessibility, reboot_required) = self
            .declared
            .get(key)
            .copied()
            .ok_or_else(|| ConfigError::NotSupported(key.to_string()))?;
        if accessibility == Accessibility::ReadOnly {
            return Err(ConfigError::ReadOnly(key.to_string()));
        }
        validate(key, value).map_err(|reason| ConfigError::Rejected {
            key: key.to_string(),
            reason,
        })?;
        self.values.insert(key.to_string(), value.to_string());
        if reboot_required && !self.pending_reboot.iter().any(|k| k == key) {
            self.pending_reboot.push(key.to_string());
            info!(key, "configuration change queued, reboot required");
        }
        Ok(())
    }

    pub fn pending_reboot(&self) -> &[String] {
        &self.pending_reboot
    }

    pub fn clear_pending_reboot(&mut self) {
        self.pending_reboot.clear();
    }

    pub fn descriptors(&self) -> Vec<VariableDescriptor> {
        self.values
            .iter()
            .map(|(key, value)| {
                let (accessibility, reboot_required) = self
                    .declared
                    .get(key)
                    .copied()
                    .unwrap_or((Accessibility::ReadOnly, false));
                VariableDescriptor {
                    key: key.clone(),
                    value: value.clone(),
                    accessibility,
                    reboot_required,
                    known: self.declared.contains_key(key),
                }
            })
            .collect()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemFilesystem;

    #[test]
    fn set_rejects_unknown_key() {
        let mut store = ConfigStore::new();
        let err = store.set("Bogus", "1", |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, ConfigError::NotSupported(_)));
    }

    #[test]
    fn set_rejects_read_only_key() {
        let mut store = ConfigStore::new();
        store.declare("NumberOfConnectors", "1", Accessibility::ReadOnly, false);
        let err = store.set("NumberOfConnectors", "2", |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, ConfigError::ReadOnly(_)));
    }

    #[test]
    fn set_queues_reboot_when_required() {
        let mut store = ConfigStore::new();
        store.declare("HeartbeatInterval", "300", Accessibility::ReadWrite, true);
        store.set("HeartbeatInterval", "60", |_, _| Ok(())).unwrap();
        assert_eq!(store.pending_reboot(), &["HeartbeatInterval".to_string()]);
    }

    #[test]
    fn persists_and_reloads_values() {
        let fs = MemFilesystem::new();
        let mut store = ConfigStore::new();
        store.declare("HeartbeatInterval", "300", Accessibility::ReadWrite, false);
        store.set("HeartbeatInterval", "45", |_, _| Ok(())).unwrap();
        store.commit(&fs).unwrap();

        let reloaded = ConfigStore::load(&fs).unwrap();
        assert_eq!(reloaded.get("HeartbeatInterval").unwrap(), "45");
    }

    #[test]
    fn validator_rejection_leaves_value_unchanged() {
        let mut store = ConfigStore::new();
        store.declare("MeterValueSampleInterval", "60", Accessibility::ReadWrite, false);
        let err = store
            .set("MeterValueSampleInterval", "-1", |_, v| {
                if v.parse::<u32>().is_ok() {
                    Ok(())
                } else {
                    Err("must be non-negative".to_string())
                }
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::Rejected { .. }));
        assert_eq!(store.get("MeterValueSampleInterval").unwrap(), "60");
    }
}
