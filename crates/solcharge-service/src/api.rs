//! REST API endpoints for the solcharge-service.
//!
//! Stored configurations live under `/config/custom/configurations`, bulk
//! export and import at `/config/configurations`, direct parameter access
//! under `/config`, and service health under `/api`.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]:
//!
//! | Error | Status |
//! |---|---|
//! | validation failed | 422, with a `violations` array |
//! | import rejected | 422, with `violations` keyed by name |
//! | not found | 404 |
//! | busy | 409 |
//! | device unreachable | 503 |
//! | malformed body, unknown parameter | 400 |
//! | storage or internal failure | 500 |
//!
//! A partially applied configuration is not an error. It returns 200 with an
//! `outcome` of `partially_applied` or `timed_out`.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use solcharge_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use solcharge_core::{ValidationWarning, Violation};
use solcharge_store::{ConfigurationSummary, StoreInfo, StoredConfiguration};
use solcharge_types::{ChargerSettings, ParameterId, ParameterValue};

use crate::error::ServiceError;
use crate::service::{ApplySummary, ImportSummary, ParameterInfo, SavedConfiguration};
use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health and status
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        // Stored configurations
        .route("/config/custom/configurations", get(list_configurations))
        .route("/config/custom/configurations/info", get(get_store_info))
        .route(
            "/config/custom/configurations/validate",
            post(validate_configuration),
        )
        .route(
            "/config/custom/configurations/{name}",
            get(get_configuration)
                .post(save_configuration)
                .delete(delete_configuration),
        )
        .route(
            "/config/custom/configurations/{name}/apply",
            post(apply_configuration),
        )
        // Bulk backup and restore
        .route(
            "/config/configurations",
            get(export_configurations).post(import_configurations),
        )
        // Direct parameter access
        .route("/config/", get(list_parameters))
        .route("/config/validate", post(validate_parameter))
        .route("/config/{parameter}", put(set_parameter))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub uptime_secs: i64,
    /// Device channel description.
    pub device: String,
    /// Whether all device writes are serialized.
    pub serialized: bool,
    pub apply_deadline_secs: u64,
    /// Writes currently in flight.
    pub in_flight: Vec<String>,
    /// Most recent apply, if any.
    pub last_apply: Option<ApplySummary>,
    /// Store metadata, absent if the store could not be read.
    pub store: Option<StoreInfo>,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let service = &state.service;
    let store = match service.info().await {
        Ok(info) => Some(info),
        Err(e) => {
            tracing::warn!("Failed to read store info: {}", e);
            None
        }
    };
    let now = OffsetDateTime::now_utc();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        uptime_secs: (now - state.started_at).whole_seconds(),
        device: service.device(),
        serialized: service.is_serialized(),
        apply_deadline_secs: service.apply_deadline().as_secs(),
        in_flight: service.in_flight(),
        last_apply: service.last_apply().await,
        store,
    })
}

/// Response for listing stored configurations.
#[derive(Debug, Serialize)]
pub struct ConfigurationsResponse {
    pub configurations: BTreeMap<String, ConfigurationSummary>,
}

async fn list_configurations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConfigurationsResponse>, AppError> {
    let configurations = state.service.list().await?;
    Ok(Json(ConfigurationsResponse { configurations }))
}

async fn get_store_info(State(state): State<Arc<AppState>>) -> Result<Json<StoreInfo>, AppError> {
    Ok(Json(state.service.info().await?))
}

async fn get_configuration(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<StoredConfiguration>, AppError> {
    Ok(Json(state.service.get(&name).await?))
}

async fn save_configuration(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    payload: Result<Json<ChargerSettings>, JsonRejection>,
) -> Result<(StatusCode, Json<SavedConfiguration>), AppError> {
    let Json(settings) = payload?;
    let saved = state.service.save(&name, settings).await?;
    let status = if saved.record.is_new() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    tracing::info!(name = %name, created = saved.record.is_new(), "Saved configuration");
    Ok((status, Json(saved)))
}

/// Response for a deleted configuration.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: String,
}

async fn delete_configuration(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    state.service.delete(&name).await?;
    tracing::info!(name = %name, "Deleted configuration");
    Ok(Json(DeleteResponse { deleted: name }))
}

/// Query parameters for configuration validation.
#[derive(Debug, Default, Deserialize)]
pub struct ValidateQuery {
    /// Also check this name, if given.
    pub name: Option<String>,
}

/// Result of a dry-run validation.
#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub valid: bool,
    pub violations: Vec<Violation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResponse {
    fn status(&self) -> StatusCode {
        if self.valid {
            StatusCode::OK
        } else {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

async fn validate_configuration(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ValidateQuery>,
    payload: Result<Json<ChargerSettings>, JsonRejection>,
) -> Result<(StatusCode, Json<ValidationResponse>), AppError> {
    let Json(settings) = payload?;
    let result = state.service.validate(query.name.as_deref(), &settings);
    let response = ValidationResponse {
        valid: result.is_valid(),
        violations: result.violations,
        warnings: result.warnings,
    };
    Ok((response.status(), Json(response)))
}

/// Every stored configuration, wrapped as `{"data": {name: record}}`.
#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub data: BTreeMap<String, StoredConfiguration>,
}

async fn export_configurations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExportResponse>, AppError> {
    let data = state.service.export().await?;
    Ok(Json(ExportResponse { data }))
}

/// Request body for a bulk import. Record fields other than the settings,
/// such as `createdAt` from an export, are ignored.
#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub data: BTreeMap<String, ChargerSettings>,
}

async fn import_configurations(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<Json<ImportSummary>, AppError> {
    let Json(request) = payload?;
    Ok(Json(state.service.import(request.data).await?))
}

async fn apply_configuration(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ApplySummary>, AppError> {
    Ok(Json(state.service.apply(&name).await?))
}

/// Response for listing device parameters.
#[derive(Debug, Serialize)]
pub struct ParametersResponse {
    pub parameters: Vec<ParameterInfo>,
}

async fn list_parameters(State(state): State<Arc<AppState>>) -> Json<ParametersResponse> {
    Json(ParametersResponse {
        parameters: state.service.parameter_info(),
    })
}

/// Request body for setting one parameter.
#[derive(Debug, Deserialize)]
pub struct SetParameterRequest {
    pub value: ParameterValue,
}

async fn set_parameter(
    State(state): State<Arc<AppState>>,
    Path(parameter): Path<String>,
    payload: Result<Json<SetParameterRequest>, JsonRejection>,
) -> Result<Json<ApplySummary>, AppError> {
    let id: ParameterId = parameter.parse().map_err(ServiceError::from)?;
    let Json(request) = payload?;
    Ok(Json(state.service.set_parameter(id, request.value).await?))
}

/// Request body for validating one parameter.
#[derive(Debug, Deserialize)]
pub struct ValidateParameterRequest {
    pub parameter: String,
    pub value: ParameterValue,
}

async fn validate_parameter(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ValidateParameterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ValidationResponse>), AppError> {
    let Json(request) = payload?;
    let id: ParameterId = request.parameter.parse().map_err(ServiceError::from)?;
    let violations = state.service.validate_parameter(id, request.value);
    let response = ValidationResponse {
        valid: violations.is_empty(),
        violations,
        warnings: Vec::new(),
    };
    Ok((response.status(), Json(response)))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String, Vec<Violation>),
    ImportRejected(String, BTreeMap<String, Vec<Violation>>),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        let message = e.to_string();
        match e {
            ServiceError::ValidationFailed(violations) => AppError::Validation(message, violations),
            ServiceError::ImportRejected(rejected) => AppError::ImportRejected(message, rejected),
            ServiceError::NotFound(_) => AppError::NotFound(message),
            ServiceError::Busy(_) => AppError::Conflict(message),
            ServiceError::DeviceUnreachable(_) => AppError::Unavailable(message),
            ServiceError::InvalidParameter(_) => AppError::BadRequest(message),
            ServiceError::Storage(_) | ServiceError::Internal(_) => {
                tracing::error!("{}", message);
                AppError::Internal(message)
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message, violations) = match self {
            AppError::Validation(msg, violations) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg,
                Some(serde_json::json!(violations)),
            ),
            AppError::ImportRejected(msg, rejected) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                msg,
                Some(serde_json::json!(rejected)),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
        };

        let body = match violations {
            Some(violations) => serde_json::json!({
                "error": message,
                "violations": violations,
            }),
            None => serde_json::json!({
                "error": message,
            }),
        };

        (status, Json(body)).into_response()
    }
}
