//! HTTP REST API for storing and applying solar charge-controller profiles.
//!
//! This crate provides a service that:
//! - Validates charger profiles before they are stored
//! - Keeps named profiles in a durable store
//! - Applies a stored profile to the charge controller, group by group,
//!   under a hard deadline, and reports exactly what reached the device
//! - Serializes device writes so one controller never sees interleaved applies
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Device, in-flight writes and last apply
//! - `GET /config/custom/configurations` - Summaries of all profiles
//! - `GET /config/custom/configurations/info` - Store metadata
//! - `GET /config/configurations` - Export every profile as `{"data": {...}}`
//! - `POST /config/configurations` - Import profiles from `{"data": {...}}`
//! - `POST /config/custom/configurations/validate` - Dry-run validation
//! - `GET /config/custom/configurations/{name}` - Get a profile
//! - `POST /config/custom/configurations/{name}` - Save a profile
//! - `DELETE /config/custom/configurations/{name}` - Delete a profile
//! - `POST /config/custom/configurations/{name}/apply` - Apply a profile
//! - `GET /config/` - Device parameters with their limits
//! - `PUT /config/{parameter}` - Set one parameter on the device
//! - `POST /config/validate` - Check one parameter value
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/solcharge/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [storage]
//! backend = "sqlite"          # or "files"
//! path = "~/.local/share/solcharge/configurations.db"
//!
//! [device]
//! kind = "http"               # or "mock"
//! url = "http://192.168.4.1"
//! apply_deadline_secs = 30
//! group_timeout_secs = 10
//! concurrent_access = false
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod gate;
pub mod service;
pub mod state;

pub use config::{Config, ConfigError, DeviceConfig, DeviceKind, ServerConfig, StorageConfig};
pub use error::{Result, ServiceError};
pub use gate::{ApplyGate, ApplyPermit, ApplyTarget, GateBusy};
pub use service::{
    ApplyCause, ApplyPhase, ApplySummary, ConfigurationService, ImportSummary, ParameterInfo,
    SavedConfiguration, ServiceOptions,
};
pub use state::AppState;
