//! Trait abstraction over the charge controller's control channel.
//!
//! This module provides the [`DeviceChannel`] trait that abstracts over the
//! real device bridge and the mock channel used in tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use solcharge_types::GroupPayload;

use crate::error::Result;

/// A channel that can push parameter groups to the charge controller.
///
/// Implementations send one [`GroupPayload`] per call and resolve once the
/// device has acknowledged every parameter in it. The caller enforces the
/// timeout as well; `timeout` is passed so transports can bound their own
/// requests.
///
/// # Example
///
/// ```ignore
/// use solcharge_core::{DeviceChannel, Result};
/// use solcharge_types::{ChargerSettings, GroupPayload, ParameterGroup};
///
/// async fn push_voltages<C: DeviceChannel>(channel: &C, settings: &ChargerSettings) -> Result<()> {
///     let payload = GroupPayload::from_settings(ParameterGroup::Voltages, settings);
///     channel
///         .send_parameter_group(&payload, Duration::from_secs(5), &CancellationToken::new())
///         .await
/// }
/// ```
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    /// Human-readable description of where this channel points.
    fn describe(&self) -> String;

    /// Whether the channel can serve overlapping calls safely.
    ///
    /// When `false` (the default) the service serializes every apply.
    fn supports_concurrent_access(&self) -> bool {
        false
    }

    /// Send one parameter group and wait for the device's acknowledgment.
    ///
    /// `cancel` is triggered when the caller abandons the call; channels
    /// should stop work promptly when it fires.
    async fn send_parameter_group(
        &self,
        payload: &GroupPayload,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Best-effort notification that an outstanding call was abandoned.
    async fn cancel(&self) {}
}
