use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::DeviceConfig;

/// Record filename, versioned by name: a schema change bumps the version and
/// old records are simply ignored rather than migrated.
pub const CONFIG_FILE: &str = "config-v1.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("config storage unavailable: {0}")]
    Unavailable(#[source] std::io::Error),
    #[error("config record write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("config record serialized to zero bytes")]
    EmptyRecord,
    #[error("could not serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// File-backed store for the one [`DeviceConfig`] record.
///
/// `Err(StoreError)` from any operation means the backing medium itself is
/// misbehaving; callers treat that as fatal. A missing or unparseable record
/// is an ordinary `Ok(None)` from [`ConfigStore::load`].
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    /// Open the store rooted at `root`, creating the directory if needed.
    /// Failure to create or access the root is the host-side equivalent of a
    /// filesystem that will not mount.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(StoreError::Unavailable)?;
        Ok(Self { root })
    }

    pub fn record_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn load(&self) -> Result<Option<DeviceConfig>, StoreError> {
        let raw = match fs::read(self.record_path()) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Unavailable(err)),
        };

        // A record that does not parse is treated the same as no record:
        // the provisioning flow regenerates it.
        Ok(serde_json::from_slice::<DeviceConfig>(&raw).ok())
    }

    /// Persist the record. Fields are truncated to their bounds here, on the
    /// write side, so a load never sees an over-long value. The payload goes
    /// to a sibling temp file first and is renamed over the record, leaving
    /// the previous record readable if the write dies partway.
    pub fn save(&self, config: &DeviceConfig) -> Result<(), StoreError> {
        let mut bounded = config.clone();
        bounded.sanitize();

        let payload = serde_json::to_vec_pretty(&bounded)?;
        if payload.is_empty() {
            return Err(StoreError::EmptyRecord);
        }

        let staged = self.root.join(format!("{CONFIG_FILE}.new"));
        fs::write(&staged, &payload).map_err(StoreError::Write)?;
        fs::rename(&staged, self.record_path()).map_err(StoreError::Write)?;
        Ok(())
    }

    /// Remove the record. Absence is not an error.
    pub fn delete(&self) -> Result<(), StoreError> {
        match fs::remove_file(self.record_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Unavailable(err)),
        }
    }
}

/// Convenience for binaries: the store root, overridable for development.
pub fn default_data_dir(env_var: &str, fallback: &str) -> PathBuf {
    std::env::var(env_var)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FieldNames, MAX_NAME_LEN, MAX_URL_LEN};
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("data")).unwrap();
        (dir, store)
    }

    #[test]
    fn load_on_empty_store_returns_none() {
        let (_dir, store) = store();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_dir, store) = store();
        let config = DeviceConfig {
            influx_url: "https://db.example".to_string(),
            influx_org: "home".to_string(),
            influx_token: "abc".to_string(),
            location: "Kitchen".to_string(),
            setup_pin: "8675309".to_string(),
            fields: FieldNames {
                temperature: "tempC".to_string(),
                ..FieldNames::default()
            },
            ..DeviceConfig::default()
        };

        store.save(&config).unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn over_long_values_are_truncated_on_save_not_load() {
        let (_dir, store) = store();
        let config = DeviceConfig {
            influx_url: "u".repeat(MAX_URL_LEN + 30),
            location: "l".repeat(MAX_NAME_LEN + 10),
            ..DeviceConfig::default()
        };

        store.save(&config).unwrap();

        // The record on disk already holds the bounded value.
        let raw = std::fs::read_to_string(store.record_path()).unwrap();
        let on_disk: DeviceConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk.influx_url.len(), MAX_URL_LEN);
        assert_eq!(on_disk.location.len(), MAX_NAME_LEN);

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.influx_url, "u".repeat(MAX_URL_LEN));
    }

    #[test]
    fn unparseable_record_loads_as_none() {
        let (_dir, store) = store();
        std::fs::write(store.record_path(), b"{not json").unwrap();

        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn record_with_missing_keys_falls_back_per_field() {
        let (_dir, store) = store();
        std::fs::write(
            store.record_path(),
            br#"{"influxToken": "abc", "location": ""}"#,
        )
        .unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.influx_token, "abc");
        assert_eq!(loaded.location, "");
        assert_eq!(loaded.influx_bucket, "data");
    }

    #[test]
    fn save_replaces_rather_than_appends() {
        let (_dir, store) = store();
        let mut config = DeviceConfig::default();
        config.location = "Attic".to_string();
        store.save(&config).unwrap();

        config.location = "Cellar".to_string();
        store.save(&config).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.location, "Cellar");
        // No staged temp file left behind.
        assert!(!store.root.join(format!("{CONFIG_FILE}.new")).exists());
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.delete().unwrap();

        store.save(&DeviceConfig::default()).unwrap();
        store.delete().unwrap();
        assert!(store.load().unwrap().is_none());

        store.delete().unwrap();
    }
}
