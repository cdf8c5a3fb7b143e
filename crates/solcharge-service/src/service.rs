//! Configuration service: validation, storage and device apply.
//!
//! Every write to the device passes through the [`ApplyGate`]. Store calls
//! run on the blocking pool. An apply walks through the phases
//! `requested -> validating -> applying -> {completed | partially_applied |
//! rejected | timed_out}`, each logged under an `apply` span that carries the
//! request id.
//!
//! Device work runs in its own task that holds the gate permit, so an apply
//! reaches a terminal outcome and is recorded even if the caller goes away.
//!
//! Applying is not transactional. When a group fails, the groups before it
//! stay on the device; the returned [`ApplySummary`] lists them and says so.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use solcharge_core::{
    ApplyOutcome, ApplyReport, DeviceApplier, DeviceChannel, ParameterBounds, SettingsValidator,
    ValidationResult, ValidationWarning, ValidatorConfig, Violation,
};
use solcharge_store::{ConfigStore, ConfigurationSummary, StoreInfo, StoredConfiguration};
use solcharge_types::{
    ChargerSettings, Parameter, ParameterGroup, ParameterId, ParameterValue, ValueKind,
};

use crate::error::{Result, ServiceError};
use crate::gate::{ApplyGate, ApplyPermit, ApplyTarget};

const NO_ROLLBACK_NOTE: &str = "Parameters already applied were not rolled back and remain \
     active on the device. Re-apply or correct the configuration to reach a known state.";

/// Phases of one apply request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyPhase {
    Requested,
    Validating,
    Applying,
    Completed,
    PartiallyApplied,
    Rejected,
    TimedOut,
}

impl ApplyPhase {
    fn as_str(&self) -> &'static str {
        match self {
            ApplyPhase::Requested => "requested",
            ApplyPhase::Validating => "validating",
            ApplyPhase::Applying => "applying",
            ApplyPhase::Completed => "completed",
            ApplyPhase::PartiallyApplied => "partially_applied",
            ApplyPhase::Rejected => "rejected",
            ApplyPhase::TimedOut => "timed_out",
        }
    }

    fn terminal(outcome: ApplyOutcome) -> Self {
        match outcome {
            ApplyOutcome::Completed => ApplyPhase::Completed,
            ApplyOutcome::PartiallyApplied => ApplyPhase::PartiallyApplied,
            ApplyOutcome::TimedOut => ApplyPhase::TimedOut,
            ApplyOutcome::DeviceUnreachable => ApplyPhase::Rejected,
        }
    }
}

impl fmt::Display for ApplyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an apply did not complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyCause {
    /// Machine-readable kind (`timeout`, `deadline_exceeded`, `rejected`, ...).
    pub kind: &'static str,
    /// Human-readable description.
    pub message: String,
}

/// Result of one apply, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplySummary {
    /// Request id, also found in the logs.
    pub id: Uuid,
    /// Configuration name, or parameter name for a single-parameter write.
    pub name: String,
    pub outcome: ApplyOutcome,
    /// Groups acknowledged in full.
    pub applied: Vec<ParameterGroup>,
    /// Groups that did not fully reach the device.
    pub unapplied: Vec<ParameterGroup>,
    /// Every parameter that reached the device.
    pub applied_parameters: Vec<ParameterId>,
    pub cause: Option<ApplyCause>,
    /// Present when some of the device state changed without completing.
    pub note: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub elapsed_ms: u64,
}

impl ApplySummary {
    fn from_report(id: Uuid, name: &str, started_at: OffsetDateTime, report: &ApplyReport) -> Self {
        let outcome = report.outcome();
        let note = match outcome {
            ApplyOutcome::PartiallyApplied | ApplyOutcome::TimedOut => {
                Some(NO_ROLLBACK_NOTE.to_string())
            }
            ApplyOutcome::Completed | ApplyOutcome::DeviceUnreachable => None,
        };
        Self {
            id,
            name: name.to_string(),
            outcome,
            applied: report.applied.clone(),
            unapplied: report.unapplied(),
            applied_parameters: report.applied_parameters.clone(),
            cause: report.cause().map(|c| ApplyCause {
                kind: c.kind(),
                message: c.to_string(),
            }),
            note,
            started_at,
            elapsed_ms: report.elapsed.as_millis() as u64,
        }
    }
}

/// A successful save.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedConfiguration {
    /// The record as stored.
    #[serde(flatten)]
    pub record: StoredConfiguration,
    /// Advisory warnings from validation.
    pub warnings: Vec<ValidationWarning>,
}

/// Result of a bulk import.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    /// Names that did not exist before.
    pub created: Vec<String>,
    /// Names whose settings were overwritten.
    pub updated: Vec<String>,
}

/// Description of one device parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterInfo {
    pub name: &'static str,
    pub group: ParameterGroup,
    pub kind: ValueKind,
    pub unit: Option<&'static str>,
    pub description: &'static str,
    pub bounds: ParameterBounds,
}

impl From<ParameterId> for ParameterInfo {
    fn from(id: ParameterId) -> Self {
        Self {
            name: id.name(),
            group: id.group(),
            kind: id.kind(),
            unit: id.unit(),
            description: id.description(),
            bounds: ParameterBounds::of(id),
        }
    }
}

/// Tunables for [`ConfigurationService`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Overall deadline for one apply.
    pub apply_deadline: Duration,
    /// Timeout for one parameter group.
    pub group_timeout: Duration,
    /// Let applies of different targets overlap when the channel allows it.
    pub concurrent_access: bool,
    /// Advisory validation settings.
    pub validator: ValidatorConfig,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            apply_deadline: Duration::from_secs(30),
            group_timeout: solcharge_core::DEFAULT_GROUP_TIMEOUT,
            concurrent_access: false,
            validator: ValidatorConfig::default(),
        }
    }
}

/// Device work handed to the apply task.
enum ApplyJob {
    Settings(ChargerSettings),
    Parameter(Parameter),
}

fn log_outcome(summary: &ApplySummary) {
    let phase = ApplyPhase::terminal(summary.outcome);
    match summary.outcome {
        ApplyOutcome::Completed => info!(%phase, applied = summary.applied.len()),
        _ => warn!(
            %phase,
            applied = ?summary.applied,
            unapplied = ?summary.unapplied,
            cause = summary.cause.as_ref().map(|c| c.message.as_str()).unwrap_or("")
        ),
    }
}

/// Orchestrates validation, storage and device apply.
pub struct ConfigurationService {
    store: Arc<ConfigStore>,
    validator: SettingsValidator,
    applier: DeviceApplier,
    gate: ApplyGate,
    apply_deadline: Duration,
    last_apply: Arc<RwLock<Option<ApplySummary>>>,
}

impl fmt::Debug for ConfigurationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationService")
            .field("store", &self.store)
            .field("applier", &self.applier)
            .field("serialized", &self.gate.is_serialized())
            .field("apply_deadline", &self.apply_deadline)
            .finish()
    }
}

impl ConfigurationService {
    /// Create a service over a store and a device channel.
    pub fn new(
        store: Arc<ConfigStore>,
        channel: Arc<dyn DeviceChannel>,
        options: ServiceOptions,
    ) -> Self {
        let serialize_all = !(options.concurrent_access && channel.supports_concurrent_access());
        info!(
            channel = %channel.describe(),
            serialized = serialize_all,
            "Configuration service ready"
        );
        Self {
            store,
            validator: SettingsValidator::new(options.validator),
            applier: DeviceApplier::new(channel, options.group_timeout),
            gate: ApplyGate::new(serialize_all),
            apply_deadline: options.apply_deadline,
            last_apply: Arc::new(RwLock::new(None)),
        }
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ConfigStore) -> solcharge_store::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let result = tokio::task::spawn_blocking(move || f(&store)).await?;
        Ok(result?)
    }

    /// Validate and store a configuration under `name`.
    pub async fn save(&self, name: &str, settings: ChargerSettings) -> Result<SavedConfiguration> {
        let result = self.validator.validate(Some(name), &settings);
        if !result.is_valid() {
            info!(name, violations = result.violations.len(), "Save rejected");
            return Err(ServiceError::ValidationFailed(result.violations));
        }
        for warning in &result.warnings {
            warn!(name, "{}", warning);
        }

        let owned = name.to_string();
        let record = self
            .with_store(move |store| store.put(&owned, &settings))
            .await?;
        Ok(SavedConfiguration {
            record,
            warnings: result.warnings,
        })
    }

    /// Dry-run validation. `name` is checked only when given.
    pub fn validate(&self, name: Option<&str>, settings: &ChargerSettings) -> ValidationResult {
        self.validator.validate(name, settings)
    }

    /// Get a stored configuration.
    pub async fn get(&self, name: &str) -> Result<StoredConfiguration> {
        let owned = name.to_string();
        self.with_store(move |store| store.get(&owned)).await
    }

    /// Summaries of all stored configurations.
    pub async fn list(&self) -> Result<BTreeMap<String, ConfigurationSummary>> {
        self.with_store(|store| store.list()).await
    }

    /// Store metadata.
    pub async fn info(&self) -> Result<StoreInfo> {
        self.with_store(|store| store.info()).await
    }

    /// Delete a stored configuration.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let owned = name.to_string();
        self.with_store(move |store| store.delete(&owned)).await
    }

    /// Every stored configuration, with timestamps, for backup.
    pub async fn export(&self) -> Result<BTreeMap<String, StoredConfiguration>> {
        let records = self.with_store(|store| store.records()).await?;
        info!(count = records.len(), "Exported configurations");
        Ok(records)
    }

    /// Store every configuration in `configurations`.
    ///
    /// All records are validated, names included, before anything is
    /// written. If any fails, nothing is stored and the violations are
    /// returned per name. Names not in the import are left alone.
    pub async fn import(
        &self,
        configurations: BTreeMap<String, ChargerSettings>,
    ) -> Result<ImportSummary> {
        let mut rejected = BTreeMap::new();
        for (name, settings) in &configurations {
            let result = self.validator.validate(Some(name), settings);
            if !result.is_valid() {
                rejected.insert(name.clone(), result.violations);
            }
        }
        if !rejected.is_empty() {
            info!(
                rejected = rejected.len(),
                total = configurations.len(),
                "Import rejected"
            );
            return Err(ServiceError::ImportRejected(rejected));
        }

        let summary = self
            .with_store(move |store| {
                let mut summary = ImportSummary::default();
                for (name, settings) in &configurations {
                    let record = store.put(name, settings)?;
                    if record.is_new() {
                        summary.created.push(record.name);
                    } else {
                        summary.updated.push(record.name);
                    }
                }
                Ok(summary)
            })
            .await?;
        info!(
            created = summary.created.len(),
            updated = summary.updated.len(),
            "Imported configurations"
        );
        Ok(summary)
    }

    /// Apply the stored configuration `name` to the device.
    ///
    /// Rejected with [`ServiceError::Busy`] if the gate is held,
    /// [`ServiceError::NotFound`] or [`ServiceError::ValidationFailed`]
    /// before any device call, and [`ServiceError::DeviceUnreachable`] if the
    /// device could not be reached before anything was applied. Every other
    /// result, including partial application, is an [`ApplySummary`].
    pub async fn apply(&self, name: &str) -> Result<ApplySummary> {
        let id = Uuid::new_v4();
        let span = info_span!("apply", %id, name);
        self.apply_inner(id, name).instrument(span).await
    }

    async fn apply_inner(&self, id: Uuid, name: &str) -> Result<ApplySummary> {
        debug!(phase = %ApplyPhase::Requested);
        let permit = self
            .gate
            .try_acquire(ApplyTarget::Configuration(name.to_string()))
            .map_err(|busy| {
                info!(phase = %ApplyPhase::Rejected, "{}", busy);
                ServiceError::Busy(busy.to_string())
            })?;

        let record = match self.get(name).await {
            Ok(record) => record,
            Err(e) => {
                info!(phase = %ApplyPhase::Rejected, error = %e);
                return Err(e);
            }
        };

        debug!(phase = %ApplyPhase::Validating);
        let result = self.validator.validate(Some(name), &record.settings);
        if !result.is_valid() {
            warn!(phase = %ApplyPhase::Rejected, "Stored configuration no longer validates");
            return Err(ServiceError::ValidationFailed(result.violations));
        }

        self.dispatch(permit, id, name, ApplyJob::Settings(record.settings))
            .await
    }

    /// Push a single parameter to the device.
    ///
    /// Only single-field rules are checked; cross-field rules such as stage
    /// ordering need the full configuration.
    pub async fn set_parameter(&self, id: ParameterId, value: ParameterValue) -> Result<ApplySummary> {
        let request = Uuid::new_v4();
        let span = info_span!("apply", id = %request, parameter = %id);
        async move {
            debug!(phase = %ApplyPhase::Requested);
            let violations = self.validator.validate_parameter(id, value);
            if !violations.is_empty() {
                info!(phase = %ApplyPhase::Rejected, "Parameter value rejected");
                return Err(ServiceError::ValidationFailed(violations));
            }
            let value = id.coerce(value)?;

            let permit = self
                .gate
                .try_acquire(ApplyTarget::Parameter(id))
                .map_err(|busy| ServiceError::Busy(busy.to_string()))?;

            self.dispatch(permit, request, id.name(), ApplyJob::Parameter(Parameter { id, value }))
                .await
        }
        .instrument(span)
        .await
    }

    /// Run `job` on the device in a task of its own.
    ///
    /// The task owns `permit` and records the summary before releasing it.
    async fn dispatch(
        &self,
        permit: ApplyPermit,
        id: Uuid,
        name: &str,
        job: ApplyJob,
    ) -> Result<ApplySummary> {
        let applier = self.applier.clone();
        let last_apply = Arc::clone(&self.last_apply);
        let deadline = self.apply_deadline;
        let name = name.to_string();

        let task = tokio::spawn(
            async move {
                debug!(phase = %ApplyPhase::Applying);
                let started_at = OffsetDateTime::now_utc();
                let report = match job {
                    ApplyJob::Settings(settings) => applier.apply(&settings, deadline).await,
                    ApplyJob::Parameter(parameter) => {
                        applier.apply_parameter(parameter, deadline).await
                    }
                };
                let summary = ApplySummary::from_report(id, &name, started_at, &report);
                log_outcome(&summary);
                *last_apply.write().await = Some(summary.clone());
                drop(permit);
                summary
            }
            .in_current_span(),
        );
        let summary = task.await?;

        if summary.outcome == ApplyOutcome::DeviceUnreachable {
            let message = summary
                .cause
                .map(|c| c.message)
                .unwrap_or_else(|| "device unreachable".to_string());
            return Err(ServiceError::DeviceUnreachable(message));
        }
        Ok(summary)
    }

    /// Check a single parameter value without sending it.
    pub fn validate_parameter(&self, id: ParameterId, value: ParameterValue) -> Vec<Violation> {
        self.validator.validate_parameter(id, value)
    }

    /// Every device parameter with its group, kind and limits.
    pub fn parameter_info(&self) -> Vec<ParameterInfo> {
        ParameterId::ALL.into_iter().map(ParameterInfo::from).collect()
    }

    /// The most recent apply, if any.
    pub async fn last_apply(&self) -> Option<ApplySummary> {
        self.last_apply.read().await.clone()
    }

    /// Writes currently in flight.
    pub fn in_flight(&self) -> Vec<String> {
        self.gate.in_flight().iter().map(|t| t.to_string()).collect()
    }

    /// Whether all device writes are serialized.
    pub fn is_serialized(&self) -> bool {
        self.gate.is_serialized()
    }

    /// Description of the device channel.
    pub fn device(&self) -> String {
        self.applier.channel().describe()
    }

    /// Overall apply deadline.
    pub fn apply_deadline(&self) -> Duration {
        self.apply_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solcharge_core::{Invariant, MockBehavior, MockChannel};

    fn lithium_100ah() -> ChargerSettings {
        ChargerSettings {
            battery_capacity: 100.0,
            is_lithium: true,
            threshold_percentage: 5.0,
            max_allowed_current: 10000.0,
            bulk_voltage: 14.4,
            absorption_voltage: 14.4,
            float_voltage: 13.6,
            use_fuente_dc: false,
            fuente_dc_amps: 0.0,
            factor_divider: 1,
        }
    }

    const CASA: &str = "Batería Litio 100Ah Casa";

    fn service_with(channel: Arc<MockChannel>, options: ServiceOptions) -> ConfigurationService {
        let store = Arc::new(ConfigStore::open_in_memory().unwrap());
        ConfigurationService::new(store, channel, options)
    }

    fn service(channel: Arc<MockChannel>) -> ConfigurationService {
        service_with(channel, ServiceOptions::default())
    }

    #[tokio::test]
    async fn test_save_get_list_scenario() {
        let service = service(Arc::new(MockChannel::default()));

        assert!(service.validate(None, &lithium_100ah()).is_valid());
        let saved = service.save(CASA, lithium_100ah()).await.unwrap();
        assert!(saved.record.is_new());
        assert!(saved.warnings.is_empty());

        let loaded = service.get(CASA).await.unwrap();
        assert_eq!(loaded.settings, lithium_100ah());
        assert_eq!(loaded.created_at, saved.record.created_at);

        let list = service.list().await.unwrap();
        let summary = &list[CASA];
        assert_eq!(summary.battery_capacity, 100.0);
        assert_eq!(summary.chemistry.as_str(), "lithium");
        assert_eq!(service.info().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_second_save_preserves_created_at() {
        let service = service(Arc::new(MockChannel::default()));
        let first = service.save(CASA, lithium_100ah()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = service.save(CASA, lithium_100ah()).await.unwrap();

        assert!(!second.record.is_new());
        assert_eq!(second.record.created_at, first.record.created_at);
        assert!(second.record.updated_at >= first.record.updated_at);
    }

    #[tokio::test]
    async fn test_save_dc_assist_violation() {
        let service = service(Arc::new(MockChannel::default()));
        let mut settings = lithium_100ah();
        settings.fuente_dc_amps = 5.0;

        let err = service.save(CASA, settings).await.unwrap_err();
        match err {
            ServiceError::ValidationFailed(violations) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].invariant, Invariant::DcAssist);
                assert_eq!(violations[0].invariant.number(), 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_bad_name() {
        let service = service(Arc::new(MockChannel::default()));
        let err = service.save("a/b", lithium_100ah()).await.unwrap_err();
        assert!(matches!(err, ServiceError::ValidationFailed(ref v) if v[0].invariant == Invariant::Name));
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let service = service(Arc::new(MockChannel::default()));
        service.save(CASA, lithium_100ah()).await.unwrap();
        let mut oficina = lithium_100ah();
        oficina.battery_capacity = 200.0;
        service.save("Oficina", oficina).await.unwrap();

        let exported = service.export().await.unwrap();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported["Oficina"].settings.battery_capacity, 200.0);

        let target = self::service(Arc::new(MockChannel::default()));
        target.save(CASA, lithium_100ah()).await.unwrap();
        let data = exported
            .into_iter()
            .map(|(name, record)| (name, record.settings))
            .collect();
        let summary = target.import(data).await.unwrap();
        assert_eq!(summary.created, vec!["Oficina".to_string()]);
        assert_eq!(summary.updated, vec![CASA.to_string()]);
        assert_eq!(target.get("Oficina").await.unwrap().settings.battery_capacity, 200.0);
    }

    #[tokio::test]
    async fn test_import_rejects_whole_batch() {
        let service = service(Arc::new(MockChannel::default()));
        let mut bad_float = lithium_100ah();
        bad_float.float_voltage = 15.0;

        let mut data = BTreeMap::new();
        data.insert(CASA.to_string(), lithium_100ah());
        data.insert("a/b".to_string(), lithium_100ah());
        data.insert("Oficina".to_string(), bad_float);

        let err = service.import(data).await.unwrap_err();
        match err {
            ServiceError::ImportRejected(rejected) => {
                assert_eq!(rejected.len(), 2);
                assert_eq!(rejected["a/b"][0].invariant, Invariant::Name);
                assert_eq!(rejected["Oficina"][0].invariant, Invariant::StageOrdering);
                assert!(!rejected.contains_key(CASA));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_then_get() {
        let service = service(Arc::new(MockChannel::default()));
        service.save(CASA, lithium_100ah()).await.unwrap();
        service.delete(CASA).await.unwrap();

        assert!(matches!(service.get(CASA).await, Err(ServiceError::NotFound(_))));
        assert!(matches!(service.delete(CASA).await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_apply_missing_issues_no_device_calls() {
        let channel = Arc::new(MockChannel::default());
        let service = service(channel.clone());

        let err = service.apply("nope").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(channel.send_count(), 0);
        assert!(service.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_apply_completed_twice() {
        let channel = Arc::new(MockChannel::default());
        let service = service(channel.clone());
        service.save(CASA, lithium_100ah()).await.unwrap();

        let first = service.apply(CASA).await.unwrap();
        let second = service.apply(CASA).await.unwrap();

        assert_eq!(first.outcome, ApplyOutcome::Completed);
        assert_eq!(second.outcome, ApplyOutcome::Completed);
        assert_eq!(first.applied, ParameterGroup::APPLY_ORDER.to_vec());
        assert_eq!(first.applied, second.applied);
        assert!(first.unapplied.is_empty());
        assert!(first.note.is_none());
        assert_ne!(first.id, second.id);
        assert_eq!(service.last_apply().await.unwrap().id, second.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_partial_on_current_limit_timeout() {
        let channel = Arc::new(
            MockChannel::builder()
                .behavior(ParameterGroup::CurrentLimits, MockBehavior::Hang)
                .build(),
        );
        let service = service_with(
            channel.clone(),
            ServiceOptions {
                group_timeout: Duration::from_secs(5),
                ..ServiceOptions::default()
            },
        );
        service.save(CASA, lithium_100ah()).await.unwrap();

        let summary = service.apply(CASA).await.unwrap();
        assert_eq!(summary.outcome, ApplyOutcome::PartiallyApplied);
        assert_eq!(
            summary.applied,
            vec![ParameterGroup::Battery, ParameterGroup::Voltages]
        );
        assert_eq!(summary.unapplied, vec![ParameterGroup::CurrentLimits]);
        assert_eq!(summary.cause.as_ref().unwrap().kind, "timeout");
        assert!(summary.note.is_some());
        assert_eq!(channel.cancel_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_request_still_finishes_apply() {
        let channel = Arc::new(
            MockChannel::builder()
                .behavior(ParameterGroup::CurrentLimits, MockBehavior::Hang)
                .build(),
        );
        let service = service_with(
            channel.clone(),
            ServiceOptions {
                group_timeout: Duration::from_millis(500),
                ..ServiceOptions::default()
            },
        );
        service.save(CASA, lithium_100ah()).await.unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(200), service.apply(CASA)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let last = service.last_apply().await.unwrap();
        assert_eq!(last.outcome, ApplyOutcome::PartiallyApplied);
        assert_eq!(last.unapplied, vec![ParameterGroup::CurrentLimits]);
        assert_eq!(last.applied_parameters.len(), 7);
        assert_eq!(channel.cancel_count(), 1);
        assert!(service.in_flight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_deadline_is_timed_out() {
        let channel = Arc::new(
            MockChannel::builder()
                .behavior(ParameterGroup::Voltages, MockBehavior::Hang)
                .build(),
        );
        let service = service_with(
            channel,
            ServiceOptions {
                apply_deadline: Duration::from_secs(8),
                group_timeout: Duration::from_secs(10),
                ..ServiceOptions::default()
            },
        );
        service.save(CASA, lithium_100ah()).await.unwrap();

        let summary = service.apply(CASA).await.unwrap();
        assert_eq!(summary.outcome, ApplyOutcome::TimedOut);
        assert_eq!(summary.applied, vec![ParameterGroup::Battery]);
        assert_eq!(summary.cause.unwrap().kind, "deadline_exceeded");
    }

    #[tokio::test]
    async fn test_apply_unreachable() {
        let channel = Arc::new(
            MockChannel::builder()
                .behavior(ParameterGroup::Battery, MockBehavior::Unreachable)
                .build(),
        );
        let service = service(channel);
        service.save(CASA, lithium_100ah()).await.unwrap();

        let err = service.apply(CASA).await.unwrap_err();
        assert!(matches!(err, ServiceError::DeviceUnreachable(_)));
        assert_eq!(
            service.last_apply().await.unwrap().outcome,
            ApplyOutcome::DeviceUnreachable
        );
    }

    #[tokio::test]
    async fn test_concurrent_apply_same_name_is_busy() {
        let channel = Arc::new(
            MockChannel::builder()
                .latency(Duration::from_millis(100))
                .concurrent(true)
                .build(),
        );
        let service = service_with(
            channel.clone(),
            ServiceOptions {
                concurrent_access: true,
                ..ServiceOptions::default()
            },
        );
        service.save(CASA, lithium_100ah()).await.unwrap();

        let results = futures::future::join_all((0..4).map(|_| service.apply(CASA))).await;
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let busy = results
            .iter()
            .filter(|r| matches!(r, Err(ServiceError::Busy(_))))
            .count();
        assert_eq!((ok, busy), (1, 3));
        assert_eq!(channel.send_count(), 3);
    }

    #[tokio::test]
    async fn test_serialized_device_rejects_other_names() {
        let channel = Arc::new(
            MockChannel::builder()
                .latency(Duration::from_millis(100))
                .build(),
        );
        let service = service(channel.clone());
        service.save(CASA, lithium_100ah()).await.unwrap();
        service.save("Oficina", lithium_100ah()).await.unwrap();

        let (a, b) = tokio::join!(service.apply(CASA), service.apply("Oficina"));
        assert!(a.is_ok());
        assert!(matches!(b, Err(ServiceError::Busy(_))));
        assert_eq!(channel.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_channel_allows_other_names() {
        let channel = Arc::new(
            MockChannel::builder()
                .latency(Duration::from_millis(100))
                .concurrent(true)
                .build(),
        );
        let service = service_with(
            channel.clone(),
            ServiceOptions {
                concurrent_access: true,
                ..ServiceOptions::default()
            },
        );
        assert!(!service.is_serialized());
        service.save(CASA, lithium_100ah()).await.unwrap();
        service.save("Oficina", lithium_100ah()).await.unwrap();

        let (a, b) = tokio::join!(service.apply(CASA), service.apply("Oficina"));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(channel.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_set_parameter() {
        let channel = Arc::new(MockChannel::default());
        let service = service(channel.clone());

        let summary = service
            .set_parameter(ParameterId::FactorDivider, ParameterValue::Real(2.0))
            .await
            .unwrap();
        assert_eq!(summary.outcome, ApplyOutcome::Completed);
        assert_eq!(summary.name, "factorDivider");
        assert_eq!(
            channel.applied_values().await[&ParameterId::FactorDivider],
            ParameterValue::Integer(2)
        );

        let err = service
            .set_parameter(ParameterId::ThresholdPercentage, ParameterValue::Real(150.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationFailed(_)));
        assert_eq!(channel.send_count(), 1);
    }

    #[test]
    fn test_parameter_info() {
        let service = service(Arc::new(MockChannel::default()));
        let info = service.parameter_info();
        assert_eq!(info.len(), 10);
        let threshold = info
            .iter()
            .find(|p| p.name == "thresholdPercentage")
            .unwrap();
        assert_eq!(threshold.bounds.max, Some(100.0));
        assert_eq!(threshold.group, ParameterGroup::Battery);
    }
}
