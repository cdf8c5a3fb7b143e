//! HTTP bridge to the charge controller.
//!
//! The controller's firmware exposes one endpoint per parameter:
//! `PUT {base}/config/{parameter}` with a JSON body `{"value": ...}`.
//! A group is sent one parameter at a time; if a later parameter fails,
//! the error carries the parameters that were already accepted.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use solcharge_types::{GroupPayload, ParameterId};

use crate::error::{Error, Result};
use crate::traits::DeviceChannel;

/// Connect timeout for the bridge.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`DeviceChannel`] that talks to the controller's HTTP bridge.
#[derive(Debug, Clone)]
pub struct HttpChannel {
    client: Client,
    base_url: String,
}

impl HttpChannel {
    /// Create a channel for the bridge at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a channel with a preconfigured client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Base URL of the bridge.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn parameter_url(&self, id: ParameterId) -> String {
        format!("{}/config/{}", self.base_url, id.name())
    }
}

fn with_progress(acknowledged: Vec<ParameterId>, err: Error) -> Error {
    if acknowledged.is_empty() {
        err
    } else {
        Error::PartialGroup {
            acknowledged,
            source: Box::new(err),
        }
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> Error {
    if err.is_connect() {
        Error::unreachable(err.to_string())
    } else if err.is_timeout() {
        Error::timeout("device request", timeout)
    } else {
        Error::Http(err)
    }
}

#[async_trait]
impl DeviceChannel for HttpChannel {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn send_parameter_group(
        &self,
        payload: &GroupPayload,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut acknowledged = Vec::with_capacity(payload.parameters.len());

        for parameter in &payload.parameters {
            let url = self.parameter_url(parameter.id);
            debug!(%url, value = %parameter.value, "PUT parameter");

            let request = self
                .client
                .put(&url)
                .timeout(timeout)
                .json(&json!({ "value": parameter.value }))
                .send();

            let response = tokio::select! {
                r = request => r,
                _ = cancel.cancelled() => return Err(with_progress(acknowledged, Error::Cancelled)),
            };
            let response = match response {
                Ok(r) => r,
                Err(e) => return Err(with_progress(acknowledged, transport_error(e, timeout))),
            };

            let status = response.status();
            if status.is_success() {
                acknowledged.push(parameter.id);
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            let reason = if body.trim().is_empty() {
                status.to_string()
            } else {
                body
            };
            let err = match status {
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY | StatusCode::CONFLICT => {
                    Error::rejected(parameter.id.name(), reason)
                }
                _ => Error::InvalidResponse(format!("{}: {}", status, reason)),
            };
            return Err(with_progress(acknowledged, err));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solcharge_types::{ChargerSettings, ParameterGroup};

    #[test]
    fn test_parameter_url() {
        let channel = HttpChannel::new("http://192.168.4.1/").unwrap();
        assert_eq!(channel.base_url(), "http://192.168.4.1");
        assert_eq!(
            channel.parameter_url(ParameterId::FuenteDcAmps),
            "http://192.168.4.1/config/fuenteDC_Amps"
        );
        assert_eq!(channel.describe(), "http://192.168.4.1");
        assert!(!channel.supports_concurrent_access());
    }

    #[test]
    fn test_with_progress() {
        let err = with_progress(Vec::new(), Error::Cancelled);
        assert!(matches!(err, Error::Cancelled));

        let err = with_progress(vec![ParameterId::BulkVoltage], Error::Cancelled);
        assert_eq!(err.acknowledged(), &[ParameterId::BulkVoltage]);
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        // Nothing listens on the discard port.
        let channel = HttpChannel::new("http://127.0.0.1:9").unwrap();
        let payload = GroupPayload::from_settings(ParameterGroup::Battery, &ChargerSettings::default());
        let err = channel
            .send_parameter_group(&payload, Duration::from_secs(2), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_unreachable(), "{err:?}");
        assert!(err.acknowledged().is_empty());
    }
}
