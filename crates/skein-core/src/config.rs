// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine configuration and its storage port.
//!
//! Hosts load an [`EngineConfig`] at startup through a
//! [`ConfigService`] and hand it to the engine; the engine never writes
//! config back. `GET_ENGINE_CONFIG` echoes the running values plus the
//! build capabilities as JSON.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Thin service that serializes config values and delegates storage to
/// a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize a config value for `key`. Returns `Ok(None)`
    /// if missing.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                let value = serde_json::from_slice(&bytes)?;
                Ok(Some(value))
            }
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist a config value for `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }
}

fn default_thread_num() -> usize {
    1
}

/// Worker tunables. Unset fields fall back to a single-threaded,
/// store-less worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Threads available to parallel fragment work.
    #[serde(default = "default_thread_num")]
    pub thread_num: usize,
    /// Endpoint of the external object store, when one is attached.
    #[serde(default)]
    pub store_endpoint: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_num: default_thread_num(),
            store_endpoint: None,
        }
    }
}

impl EngineConfig {
    /// The `GET_ENGINE_CONFIG` payload: running values plus whether this
    /// build carries dynamic-graph support, rendered `ON`/`OFF` the way
    /// build flags read.
    pub fn report_json(&self) -> String {
        let dynamic_graph = if cfg!(feature = "dynamic") {
            "ON"
        } else {
            "OFF"
        };
        serde_json::json!({
            "dynamic_graph": dynamic_graph,
            "thread_num": self.thread_num,
            "store_endpoint": self.store_endpoint,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct MemoryConfigStore {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl ConfigStore for MemoryConfigStore {
        fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
            self.blobs
                .lock()
                .map_err(|_| ConfigError::Other("poisoned".into()))?
                .get(key)
                .cloned()
                .ok_or(ConfigError::NotFound)
        }

        fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
            self.blobs
                .lock()
                .map_err(|_| ConfigError::Other("poisoned".into()))?
                .insert(key.to_owned(), data.to_vec());
            Ok(())
        }
    }

    #[test]
    fn load_returns_none_for_missing_or_empty() {
        let service = ConfigService::new(MemoryConfigStore::default());
        let loaded: Option<EngineConfig> = service.load("engine").unwrap();
        assert!(loaded.is_none());

        let store = service.into_inner();
        store.save_raw("engine", &[]).unwrap();
        let service = ConfigService::new(store);
        let loaded: Option<EngineConfig> = service.load("engine").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn config_round_trips_through_the_service() {
        let service = ConfigService::new(MemoryConfigStore::default());
        let config = EngineConfig {
            thread_num: 4,
            store_endpoint: Some("ipc:///tmp/skein.sock".to_owned()),
        };
        service.save("engine", &config).unwrap();
        let loaded: Option<EngineConfig> = service.load("engine").unwrap();
        assert_eq!(loaded, Some(config));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.thread_num, 1);
    }

    #[test]
    fn report_carries_the_build_capabilities() {
        let report = EngineConfig::default().report_json();
        let parsed: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(parsed["thread_num"], 1);
        assert!(parsed["store_endpoint"].is_null());
        let flag = parsed["dynamic_graph"].as_str().unwrap();
        assert!(flag == "ON" || flag == "OFF");
        assert_eq!(flag == "ON", cfg!(feature = "dynamic"));
    }
}
