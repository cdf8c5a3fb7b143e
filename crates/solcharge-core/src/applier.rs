//! Pushes charger settings to the device one parameter group at a time.
//!
//! Groups go out in [`ParameterGroup::APPLY_ORDER`]: battery chemistry and
//! capacity first, then the stage voltages, then the current limits, so the
//! device never interprets thresholds under a stale chemistry.
//!
//! Each group gets a sub-timeout of `min(group_timeout, time left before the
//! deadline)`. When it runs out the call is cancelled and given
//! [`CANCEL_GRACE`] to report what it already set. The first failure stops
//! the sequence. Nothing is rolled back:
//! groups acknowledged before the failure stay on the device, and the
//! [`ApplyReport`] lists them along with every individual parameter that
//! reached the device.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use solcharge_types::{ChargerSettings, GroupPayload, Parameter, ParameterGroup, ParameterId};

use crate::error::Error;
use crate::traits::DeviceChannel;

/// Default per-group timeout.
pub const DEFAULT_GROUP_TIMEOUT: Duration = Duration::from_secs(10);

/// After a group times out, how long the cancelled call may take to report
/// the parameters it already set, and separately how long `cancel` may take.
pub const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Terminal outcome of one apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Every group was acknowledged.
    Completed,
    /// The sequence stopped on a refusal or a group timeout.
    PartiallyApplied,
    /// The overall deadline ran out.
    TimedOut,
    /// The device could not be reached and nothing was sent.
    DeviceUnreachable,
}

impl ApplyOutcome {
    /// Wire name of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Completed => "completed",
            ApplyOutcome::PartiallyApplied => "partially_applied",
            ApplyOutcome::TimedOut => "timed_out",
            ApplyOutcome::DeviceUnreachable => "device_unreachable",
        }
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a group failed.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    /// The group did not answer within its own sub-timeout.
    Timeout { after: Duration },
    /// The overall apply deadline ran out.
    DeadlineExceeded { deadline: Duration },
    /// The device refused a parameter.
    Rejected(String),
    /// The channel could not reach the device.
    Unreachable(String),
    /// Any other channel error.
    Error(String),
}

impl FailureCause {
    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureCause::Timeout { .. } => "timeout",
            FailureCause::DeadlineExceeded { .. } => "deadline_exceeded",
            FailureCause::Rejected(_) => "rejected",
            FailureCause::Unreachable(_) => "unreachable",
            FailureCause::Error(_) => "error",
        }
    }

    fn from_error(err: &Error) -> Self {
        match err {
            Error::PartialGroup { source, .. } => Self::from_error(source),
            Error::Rejected { .. } => FailureCause::Rejected(err.to_string()),
            Error::Timeout { duration, .. } => FailureCause::Timeout { after: *duration },
            e if e.is_unreachable() => FailureCause::Unreachable(e.to_string()),
            e => FailureCause::Error(e.to_string()),
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Timeout { after } => {
                write!(f, "device did not acknowledge within {:?}", after)
            }
            FailureCause::DeadlineExceeded { deadline } => {
                write!(f, "apply deadline of {:?} exceeded", deadline)
            }
            FailureCause::Rejected(msg)
            | FailureCause::Unreachable(msg)
            | FailureCause::Error(msg) => f.write_str(msg),
        }
    }
}

/// The group that stopped an apply and why.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyFailure {
    pub group: ParameterGroup,
    pub cause: FailureCause,
}

/// What an apply actually did to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    /// Groups acknowledged in full, in send order.
    pub applied: Vec<ParameterGroup>,
    /// The failing group, if the sequence stopped early.
    pub failure: Option<ApplyFailure>,
    /// Groups never sent because of the failure.
    pub skipped: Vec<ParameterGroup>,
    /// Every parameter that reached the device, including those from a
    /// partially acknowledged group.
    pub applied_parameters: Vec<ParameterId>,
    /// Wall time spent.
    pub elapsed: Duration,
}

impl ApplyReport {
    /// Classify the report.
    pub fn outcome(&self) -> ApplyOutcome {
        match &self.failure {
            None => ApplyOutcome::Completed,
            Some(ApplyFailure {
                cause: FailureCause::DeadlineExceeded { .. },
                ..
            }) => ApplyOutcome::TimedOut,
            Some(ApplyFailure {
                cause: FailureCause::Unreachable(_),
                ..
            }) if self.applied_parameters.is_empty() => ApplyOutcome::DeviceUnreachable,
            Some(_) => ApplyOutcome::PartiallyApplied,
        }
    }

    /// Groups that did not fully reach the device: the failing one, then the
    /// skipped ones.
    pub fn unapplied(&self) -> Vec<ParameterGroup> {
        self.failure
            .iter()
            .map(|f| f.group)
            .chain(self.skipped.iter().copied())
            .collect()
    }

    /// Cause of the failure, if any.
    pub fn cause(&self) -> Option<&FailureCause> {
        self.failure.as_ref().map(|f| &f.cause)
    }
}

/// Sends settings to a [`DeviceChannel`] under a hard deadline.
#[derive(Clone)]
pub struct DeviceApplier {
    channel: Arc<dyn DeviceChannel>,
    group_timeout: Duration,
}

impl fmt::Debug for DeviceApplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceApplier")
            .field("channel", &self.channel.describe())
            .field("group_timeout", &self.group_timeout)
            .finish()
    }
}

impl DeviceApplier {
    /// Create an applier over `channel`.
    pub fn new(channel: Arc<dyn DeviceChannel>, group_timeout: Duration) -> Self {
        Self {
            channel,
            group_timeout,
        }
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Arc<dyn DeviceChannel> {
        &self.channel
    }

    /// Per-group timeout.
    pub fn group_timeout(&self) -> Duration {
        self.group_timeout
    }

    /// Apply every group of `settings`, in order, within `deadline`.
    ///
    /// The settings are assumed to be valid; callers validate first.
    pub async fn apply(&self, settings: &ChargerSettings, deadline: Duration) -> ApplyReport {
        let payloads = ParameterGroup::APPLY_ORDER
            .iter()
            .map(|group| GroupPayload::from_settings(*group, settings))
            .collect();
        self.run(payloads, deadline).await
    }

    /// Apply a single parameter within `deadline`.
    pub async fn apply_parameter(&self, parameter: Parameter, deadline: Duration) -> ApplyReport {
        self.run(vec![GroupPayload::single(parameter)], deadline)
            .await
    }

    async fn run(&self, payloads: Vec<GroupPayload>, deadline: Duration) -> ApplyReport {
        let started = Instant::now();
        let deadline_at = started + deadline;
        let cancel = CancellationToken::new();

        let mut applied = Vec::new();
        let mut applied_parameters = Vec::new();
        let mut failure = None;
        let mut failed_at = payloads.len();

        for (index, payload) in payloads.iter().enumerate() {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                failure = Some(ApplyFailure {
                    group: payload.group,
                    cause: FailureCause::DeadlineExceeded { deadline },
                });
                failed_at = index;
                break;
            }
            let bounded_by_deadline = remaining <= self.group_timeout;
            let budget = remaining.min(self.group_timeout);

            debug!(
                group = %payload.group,
                parameters = payload.parameters.len(),
                budget_ms = budget.as_millis() as u64,
                "Sending parameter group"
            );

            let send = self.channel.send_parameter_group(payload, budget, &cancel);
            tokio::pin!(send);
            let result = tokio::select! {
                biased;
                result = &mut send => Some(result),
                _ = tokio::time::sleep(budget) => None,
            };
            let cause = match result {
                Some(Ok(())) => {
                    applied.push(payload.group);
                    applied_parameters.extend(payload.ids());
                    continue;
                }
                Some(Err(err)) => {
                    applied_parameters.extend_from_slice(err.acknowledged());
                    warn!(group = %payload.group, error = %err, "Parameter group failed");
                    FailureCause::from_error(&err)
                }
                None => {
                    warn!(
                        group = %payload.group,
                        after_ms = budget.as_millis() as u64,
                        "Parameter group timed out, cancelling call"
                    );
                    cancel.cancel();
                    match tokio::time::timeout(CANCEL_GRACE, &mut send).await {
                        Ok(Ok(())) => applied_parameters.extend(payload.ids()),
                        Ok(Err(err)) => applied_parameters.extend_from_slice(err.acknowledged()),
                        Err(_) => warn!(
                            group = %payload.group,
                            "Channel did not report progress after cancellation"
                        ),
                    }
                    if tokio::time::timeout(CANCEL_GRACE, self.channel.cancel())
                        .await
                        .is_err()
                    {
                        warn!(group = %payload.group, "Channel cancel did not finish in time");
                    }
                    if bounded_by_deadline {
                        FailureCause::DeadlineExceeded { deadline }
                    } else {
                        FailureCause::Timeout { after: budget }
                    }
                }
            };
            failure = Some(ApplyFailure {
                group: payload.group,
                cause,
            });
            failed_at = index;
            break;
        }

        let skipped = payloads
            .iter()
            .skip(failed_at + 1)
            .map(|p| p.group)
            .collect();

        let report = ApplyReport {
            applied,
            failure,
            skipped,
            applied_parameters,
            elapsed: started.elapsed(),
        };
        info!(
            channel = %self.channel.describe(),
            outcome = %report.outcome(),
            applied = report.applied.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Apply finished"
        );
        report
    }
}
