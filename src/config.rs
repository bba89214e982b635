use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::address::Amount;
use crate::error::StoreError;

pub const DEFAULT_STATE_FILE: &str = "stimulus-state.json";

/// Deployment parameters of a ledger.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub initial_supply: Amount,
}

/// Deployment parameters of a stimulus: index 0 is the enrollment bonus,
/// indices 1..=4 pay the submission types.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StimulusConfig {
    pub rewards: [Amount; 5],
}

impl LedgerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        read_json(path.as_ref())
    }
}

impl StimulusConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        read_json(path.as_ref())
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let data = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
    }
    std::fs::write(path, json).map_err(|source| StoreError::Io {
        path: path.display().to_string(),
        source,
    })
}
