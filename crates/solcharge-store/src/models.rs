//! Data models for stored configurations.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use solcharge_types::{ChargerSettings, Chemistry};

use crate::backend::BackendKind;

/// A named configuration as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredConfiguration {
    /// Name chosen by the operator.
    pub name: String,
    /// The charger parameters.
    #[serde(flatten)]
    pub settings: ChargerSettings,
    /// When the name was first saved.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the record was last saved.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl StoredConfiguration {
    /// Whether this record was created by the save that returned it.
    pub fn is_new(&self) -> bool {
        self.created_at == self.updated_at
    }
}

/// List entry for a stored configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSummary {
    pub battery_capacity: f64,
    pub chemistry: Chemistry,
    pub bulk_voltage: f64,
    pub absorption_voltage: f64,
    pub float_voltage: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&StoredConfiguration> for ConfigurationSummary {
    fn from(record: &StoredConfiguration) -> Self {
        let s = &record.settings;
        Self {
            battery_capacity: s.battery_capacity,
            chemistry: s.chemistry(),
            bulk_voltage: s.bulk_voltage,
            absorption_voltage: s.absorption_voltage,
            float_voltage: s.float_voltage,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Store metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    /// Number of stored configurations.
    pub count: usize,
    /// Backend medium.
    pub backend: BackendKind,
    /// Where the data lives.
    pub location: String,
}
