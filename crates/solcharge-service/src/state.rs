//! Application state shared across handlers.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;

use solcharge_core::{HttpChannel, MockChannel, SharedChannel, ValidatorConfig};
use solcharge_store::ConfigStore;

use crate::config::{Config, DeviceKind};
use crate::service::{ConfigurationService, ServiceOptions};

/// Shared application state.
pub struct AppState {
    /// The configuration service.
    pub service: Arc<ConfigurationService>,
    /// Configuration the server was started with.
    pub config: Config,
    /// Server start time.
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create application state around an existing service.
    pub fn new(service: ConfigurationService, config: Config) -> Arc<Self> {
        Arc::new(Self {
            service: Arc::new(service),
            config,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// Open the store and device channel described by `config`.
    pub fn open(config: Config) -> anyhow::Result<Arc<Self>> {
        let store = ConfigStore::open(config.storage.backend, &config.storage.path)?;
        info!(
            backend = %config.storage.backend,
            path = %config.storage.path.display(),
            "Opened configuration store"
        );

        let channel: SharedChannel = match config.device.kind {
            DeviceKind::Mock => Arc::new(
                MockChannel::builder()
                    .concurrent(config.device.concurrent_access)
                    .build(),
            ),
            DeviceKind::Http => Arc::new(HttpChannel::new(config.device.url.as_str())?),
        };

        let options = ServiceOptions {
            apply_deadline: config.device.apply_deadline(),
            group_timeout: config.device.group_timeout(),
            concurrent_access: config.device.concurrent_access,
            validator: ValidatorConfig::default(),
        };
        let service = ConfigurationService::new(Arc::new(store), channel, options);
        Ok(Self::new(service, config))
    }
}
