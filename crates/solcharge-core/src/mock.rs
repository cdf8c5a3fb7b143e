//! Mock device channel for testing.
//!
//! [`MockChannel`] implements [`DeviceChannel`] without any hardware, so the
//! applier and the service can be exercised end to end in tests and in the
//! service's `--mock-device` mode.
//!
//! # Features
//!
//! - **Per-group behavior**: acknowledge, reject, hang, or fail as unreachable
//! - **Mid-group rejection**: acknowledge some parameters, then refuse one
//! - **Mid-group stall**: acknowledge some parameters, then stop answering
//! - **Latency simulation**: delay every call to mimic a slow bridge
//! - **Recording**: every payload sent and every value the device accepted

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use solcharge_types::{GroupPayload, ParameterGroup, ParameterId, ParameterValue};

use crate::error::{Error, Result};
use crate::traits::DeviceChannel;

/// How the mock device answers a parameter group.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MockBehavior {
    /// Accept every parameter.
    #[default]
    Ack,
    /// Refuse the first parameter of the group.
    Reject(String),
    /// Accept parameters up to `parameter`, then refuse it.
    RejectAt {
        parameter: ParameterId,
        reason: String,
    },
    /// Never answer; the call only ends when cancelled or dropped.
    Hang,
    /// Accept parameters up to `parameter`, then stop answering. A cancelled
    /// call reports the accepted ones.
    HangAt(ParameterId),
    /// Fail without reaching the device.
    Unreachable,
}

/// A mock charge controller reachable through [`DeviceChannel`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use solcharge_core::{DeviceApplier, MockBehavior, MockChannel};
/// use solcharge_types::{ChargerSettings, ParameterGroup};
///
/// #[tokio::main]
/// async fn main() {
///     let channel = Arc::new(
///         MockChannel::builder()
///             .behavior(ParameterGroup::CurrentLimits, MockBehavior::Hang)
///             .build(),
///     );
///     let applier = DeviceApplier::new(channel.clone(), Duration::from_millis(50));
///     let report = applier
///         .apply(&ChargerSettings::default(), Duration::from_secs(5))
///         .await;
///     assert_eq!(report.applied.len(), 2);
///     assert_eq!(channel.cancel_count(), 1);
/// }
/// ```
pub struct MockChannel {
    name: String,
    concurrent: bool,
    behaviors: RwLock<HashMap<ParameterGroup, MockBehavior>>,
    /// Simulated latency per call in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
    send_count: AtomicU32,
    cancel_count: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    sent: RwLock<Vec<GroupPayload>>,
    acknowledged: RwLock<Vec<ParameterGroup>>,
    applied: RwLock<BTreeMap<ParameterId, ParameterValue>>,
}

impl std::fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChannel")
            .field("name", &self.name)
            .field("concurrent", &self.concurrent)
            .field("send_count", &self.send_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new("mock-charger")
    }
}

impl MockChannel {
    /// Create a mock device that acknowledges everything.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            concurrent: false,
            behaviors: RwLock::new(HashMap::new()),
            latency_ms: AtomicU64::new(0),
            send_count: AtomicU32::new(0),
            cancel_count: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            sent: RwLock::new(Vec::new()),
            acknowledged: RwLock::new(Vec::new()),
            applied: RwLock::new(BTreeMap::new()),
        }
    }

    /// Start building a mock channel.
    pub fn builder() -> MockChannelBuilder {
        MockChannelBuilder::new()
    }

    /// Set how the device answers `group`.
    pub async fn set_behavior(&self, group: ParameterGroup, behavior: MockBehavior) {
        self.behaviors.write().await.insert(group, behavior);
    }

    /// Restore the acknowledge-everything behavior for every group.
    pub async fn reset_behaviors(&self) {
        self.behaviors.write().await.clear();
    }

    /// Set simulated latency for every call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of `send_parameter_group` calls received.
    pub fn send_count(&self) -> u32 {
        self.send_count.load(Ordering::Relaxed)
    }

    /// Number of cancellation notices received.
    pub fn cancel_count(&self) -> u32 {
        self.cancel_count.load(Ordering::Relaxed)
    }

    /// Calls currently in flight.
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in flight at once.
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::Relaxed)
    }

    /// Every payload received, in order.
    pub async fn sent_payloads(&self) -> Vec<GroupPayload> {
        self.sent.read().await.clone()
    }

    /// Groups the device acknowledged in full, in order.
    pub async fn acknowledged_groups(&self) -> Vec<ParameterGroup> {
        self.acknowledged.read().await.clone()
    }

    /// Current value of every parameter the device has accepted.
    pub async fn applied_values(&self) -> BTreeMap<ParameterId, ParameterValue> {
        self.applied.read().await.clone()
    }

    async fn behavior_for(&self, group: ParameterGroup) -> MockBehavior {
        self.behaviors
            .read()
            .await
            .get(&group)
            .cloned()
            .unwrap_or_default()
    }

    async fn store_values(&self, payload: &GroupPayload, up_to: usize) {
        let mut applied = self.applied.write().await;
        for parameter in payload.parameters.iter().take(up_to) {
            applied.insert(parameter.id, parameter.value);
        }
    }

    async fn answer(&self, payload: &GroupPayload, cancel: &CancellationToken) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(latency)) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }

        let first = payload
            .parameters
            .first()
            .map(|p| p.id.name())
            .unwrap_or_else(|| payload.group.as_str());

        match self.behavior_for(payload.group).await {
            MockBehavior::Ack => {
                self.store_values(payload, payload.parameters.len()).await;
                self.acknowledged.write().await.push(payload.group);
                Ok(())
            }
            MockBehavior::Reject(reason) => Err(Error::rejected(first, reason)),
            MockBehavior::RejectAt { parameter, reason } => {
                let position = payload
                    .parameters
                    .iter()
                    .position(|p| p.id == parameter)
                    .unwrap_or(payload.parameters.len());
                self.store_values(payload, position).await;
                let err = Error::rejected(parameter.name(), reason);
                if position == 0 {
                    Err(err)
                } else {
                    Err(Error::PartialGroup {
                        acknowledged: payload.ids().take(position).collect(),
                        source: Box::new(err),
                    })
                }
            }
            MockBehavior::Hang => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
            MockBehavior::HangAt(parameter) => {
                let position = payload
                    .parameters
                    .iter()
                    .position(|p| p.id == parameter)
                    .unwrap_or(payload.parameters.len());
                self.store_values(payload, position).await;
                cancel.cancelled().await;
                if position == 0 {
                    Err(Error::Cancelled)
                } else {
                    Err(Error::PartialGroup {
                        acknowledged: payload.ids().take(position).collect(),
                        source: Box::new(Error::Cancelled),
                    })
                }
            }
            MockBehavior::Unreachable => Err(Error::unreachable(format!(
                "{} is not answering",
                self.name
            ))),
        }
    }
}

#[async_trait]
impl DeviceChannel for MockChannel {
    fn describe(&self) -> String {
        format!("mock://{}", self.name)
    }

    fn supports_concurrent_access(&self) -> bool {
        self.concurrent
    }

    async fn send_parameter_group(
        &self,
        payload: &GroupPayload,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.send_count.fetch_add(1, Ordering::Relaxed);
        self.sent.write().await.push(payload.clone());

        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);
        self.answer(payload, cancel).await
    }

    async fn cancel(&self) {
        self.cancel_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counts one call in flight until dropped, including when the call's
/// future is dropped mid-answer.
struct InFlight<'a>(&'a AtomicU32);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU32, max: &AtomicU32) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builder for [`MockChannel`].
#[derive(Debug, Clone, Default)]
pub struct MockChannelBuilder {
    name: Option<String>,
    concurrent: bool,
    latency: Duration,
    behaviors: HashMap<ParameterGroup, MockBehavior>,
}

impl MockChannelBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Report support for concurrent access.
    #[must_use]
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Set simulated latency for every call.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set how the device answers `group`.
    #[must_use]
    pub fn behavior(mut self, group: ParameterGroup, behavior: MockBehavior) -> Self {
        self.behaviors.insert(group, behavior);
        self
    }

    /// Build the mock channel.
    #[must_use]
    pub fn build(self) -> MockChannel {
        let mut channel = MockChannel::new(self.name.as_deref().unwrap_or("mock-charger"));
        channel.concurrent = self.concurrent;
        channel.set_latency(self.latency);
        channel.behaviors = RwLock::new(self.behaviors);
        channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use solcharge_types::ChargerSettings;

    fn payload(group: ParameterGroup) -> GroupPayload {
        GroupPayload::from_settings(group, &ChargerSettings::default())
    }

    #[tokio::test]
    async fn test_mock_acknowledges_by_default() {
        let channel = MockChannel::default();
        let token = CancellationToken::new();
        channel
            .send_parameter_group(&payload(ParameterGroup::Voltages), Duration::from_secs(1), &token)
            .await
            .unwrap();

        assert_eq!(channel.send_count(), 1);
        assert_eq!(channel.acknowledged_groups().await, vec![ParameterGroup::Voltages]);
        let values = channel.applied_values().await;
        assert_eq!(values.len(), 3);
        assert_eq!(values[&ParameterId::BulkVoltage], ParameterValue::Real(14.4));
        assert_eq!(channel.describe(), "mock://mock-charger");
    }

    #[tokio::test]
    async fn test_mock_reject() {
        let channel = MockChannel::builder()
            .behavior(ParameterGroup::Battery, MockBehavior::Reject("locked".into()))
            .build();
        let err = channel
            .send_parameter_group(
                &payload(ParameterGroup::Battery),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Rejected { ref parameter, .. } if parameter == "batteryCapacity"));
        assert!(channel.applied_values().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_reject_at_reports_partial_group() {
        let channel = MockChannel::builder()
            .behavior(
                ParameterGroup::Voltages,
                MockBehavior::RejectAt {
                    parameter: ParameterId::FloatVoltage,
                    reason: "out of range".into(),
                },
            )
            .build();
        let err = channel
            .send_parameter_group(
                &payload(ParameterGroup::Voltages),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err.acknowledged(),
            &[ParameterId::BulkVoltage, ParameterId::AbsorptionVoltage]
        );
        assert_eq!(channel.applied_values().await.len(), 2);
        assert!(channel.acknowledged_groups().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_unreachable() {
        let channel = MockChannel::builder()
            .name("bridge")
            .behavior(ParameterGroup::Battery, MockBehavior::Unreachable)
            .build();
        let err = channel
            .send_parameter_group(
                &payload(ParameterGroup::Battery),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
        assert!(err.to_string().contains("bridge"));
    }

    #[tokio::test]
    async fn test_mock_hang_ends_on_cancel() {
        let channel = MockChannel::builder()
            .behavior(ParameterGroup::CurrentLimits, MockBehavior::Hang)
            .build();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = channel
            .send_parameter_group(
                &payload(ParameterGroup::CurrentLimits),
                Duration::from_secs(1),
                &token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_mock_hang_at_reports_accepted_on_cancel() {
        let channel = MockChannel::builder()
            .behavior(
                ParameterGroup::CurrentLimits,
                MockBehavior::HangAt(ParameterId::UseFuenteDc),
            )
            .build();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = channel
            .send_parameter_group(
                &payload(ParameterGroup::CurrentLimits),
                Duration::from_secs(1),
                &token,
            )
            .await
            .unwrap_err();
        assert_eq!(err.acknowledged(), &[ParameterId::MaxAllowedCurrent]);
        assert_eq!(channel.applied_values().await.len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_survives_cancel_and_drop() {
        let channel = Arc::new(
            MockChannel::builder()
                .concurrent(true)
                .behavior(ParameterGroup::Voltages, MockBehavior::Hang)
                .build(),
        );
        let hung = {
            let channel = channel.clone();
            tokio::spawn(async move {
                channel
                    .send_parameter_group(
                        &payload(ParameterGroup::Voltages),
                        Duration::from_secs(1),
                        &CancellationToken::new(),
                    )
                    .await
            })
        };
        while channel.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        channel.cancel().await;
        assert_eq!(channel.in_flight(), 1);

        channel
            .send_parameter_group(
                &payload(ParameterGroup::Battery),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(channel.max_in_flight(), 2);

        hung.abort();
        let _ = hung.await;
        assert_eq!(channel.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_latency() {
        let channel = MockChannel::builder()
            .latency(Duration::from_millis(200))
            .build();
        let started = tokio::time::Instant::now();
        channel
            .send_parameter_group(
                &payload(ParameterGroup::Battery),
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_mock_behavior_changes() {
        let channel = MockChannel::default();
        channel
            .set_behavior(ParameterGroup::Battery, MockBehavior::Unreachable)
            .await;
        let token = CancellationToken::new();
        assert!(
            channel
                .send_parameter_group(&payload(ParameterGroup::Battery), Duration::from_secs(1), &token)
                .await
                .is_err()
        );

        channel.reset_behaviors().await;
        assert!(
            channel
                .send_parameter_group(&payload(ParameterGroup::Battery), Duration::from_secs(1), &token)
                .await
                .is_ok()
        );
        assert_eq!(channel.sent_payloads().await.len(), 2);
    }

    #[test]
    fn test_builder_concurrency_flag() {
        assert!(!MockChannel::default().supports_concurrent_access());
        assert!(MockChannel::builder().concurrent(true).build().supports_concurrent_access());
    }
}
