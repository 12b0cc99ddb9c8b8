use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::ErrorCode;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::identifiers::{GeneratedId, IdentifierError, IdentifierKind, IdentifierService};
use crate::quota::{Plan, PlanStore, QuotaError, ResourceKind, Tenant, TenantStatus, TenantStore};
use crate::storage::{AttachmentRecord, ClientRecord, StaffUserRecord, StorageError};

use super::types::{
    CheckQuotaRequest, CheckQuotaResponse, CreateAttachmentRequest, CreateClientRequest,
    CreateStaffRequest, CreateTenantRequest, ErrorResponse, ListTenantsQuery, PatternResponse,
    PreviewRequest, PreviewResponse, SetPatternRequest, SuccessResponse, TenantResponse,
    TrackStorageRequest, TrackStorageResponse, UpdatePlanRequest, UpdateStatusRequest,
};
use super::ApiState;

const DEFAULT_STAFF_ROLE: &str = "staff";
const MAX_CLIENT_NUMBER_ATTEMPTS: u32 = 32;

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn list_plans(State(state): State<Arc<ApiState>>) -> ApiResult<Vec<Plan>> {
    let plans = state.database.list_plans().map_err(map_storage_error)?;
    Ok(Json(plans))
}

pub async fn upsert_plan(
    State(state): State<Arc<ApiState>>,
    Json(plan): Json<Plan>,
) -> ApiResult<Plan> {
    state.database.upsert_plan(&plan).map_err(map_storage_error)?;

    info!(
        plan_id = %plan.plan_id,
        max_users = plan.limits.max_users,
        max_clients = plan.limits.max_clients,
        max_storage_gb = plan.limits.max_storage_gb,
        "plan upserted"
    );
    Ok(Json(plan))
}

pub async fn delete_plan(
    State(state): State<Arc<ApiState>>,
    Path(plan_id): Path<String>,
) -> ApiResult<SuccessResponse> {
    state.database.delete_plan(&plan_id).map_err(map_storage_error)?;
    info!(plan_id = %plan_id, "plan deleted");
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn create_tenant(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<CreateTenantRequest>,
) -> ApiResult<Tenant> {
    if request.name.trim().is_empty() {
        return Err(bad_request("invalid_name", "name cannot be empty"));
    }

    let tenant_id = request
        .tenant_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    validate_tenant_id(&tenant_id)?;

    if state
        .database
        .find_plan_by_id(&request.plan_id)
        .map_err(map_storage_error)?
        .is_none()
    {
        return Err(not_found("plan_not_found", "plan does not exist"));
    }

    let now = Utc::now().to_rfc3339();
    let tenant = Tenant {
        tenant_id,
        name: request.name,
        plan_id: request.plan_id,
        status: TenantStatus::Active,
        storage_used_mb: 0.0,
        created_at: now.clone(),
        updated_at: now,
    };
    state
        .database
        .create_tenant(&tenant)
        .map_err(map_storage_error)?;

    info!(tenant_id = %tenant.tenant_id, plan_id = %tenant.plan_id, "tenant created");
    Ok(Json(tenant))
}

pub async fn list_tenants(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListTenantsQuery>,
) -> ApiResult<Vec<Tenant>> {
    let tenants = state
        .database
        .list_tenants(query.status)
        .map_err(map_storage_error)?;
    Ok(Json(tenants))
}

pub async fn get_tenant(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
) -> ApiResult<TenantResponse> {
    let tenant = state
        .database
        .find_tenant_by_id(&tenant_id)
        .map_err(map_storage_error)?
        .ok_or_else(|| not_found("tenant_not_found", "tenant does not exist"))?;
    let usage = state.enforcer.usage(&tenant_id).map_err(map_quota_error)?;

    Ok(Json(TenantResponse { tenant, usage }))
}

pub async fn get_usage(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
) -> ApiResult<crate::quota::TenantUsage> {
    let usage = state.enforcer.usage(&tenant_id).map_err(map_quota_error)?;
    Ok(Json(usage))
}

pub async fn update_status(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<SuccessResponse> {
    state
        .database
        .update_tenant_status(&tenant_id, request.status)
        .map_err(map_storage_error)?;

    info!(tenant_id = %tenant_id, status = %request.status, "tenant status updated");
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn update_plan(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
    Json(request): Json<UpdatePlanRequest>,
) -> ApiResult<SuccessResponse> {
    state
        .database
        .update_tenant_plan(&tenant_id, &request.plan_id)
        .map_err(map_storage_error)?;

    info!(tenant_id = %tenant_id, plan_id = %request.plan_id, "tenant plan updated");
    Ok(Json(SuccessResponse { success: true }))
}

#[instrument(skip(state, request), fields(tenant_id = %tenant_id))]
pub async fn check_quota(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
    Json(request): Json<CheckQuotaRequest>,
) -> ApiResult<CheckQuotaResponse> {
    let amount = request.amount.unwrap_or(1.0);
    let tenant = state
        .enforcer
        .check_limits(&tenant_id, request.resource, amount)
        .map_err(map_quota_error)?;

    Ok(Json(CheckQuotaResponse {
        allowed: true,
        tenant,
    }))
}

pub async fn track_storage(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
    Json(request): Json<TrackStorageRequest>,
) -> ApiResult<TrackStorageResponse> {
    state
        .enforcer
        .track_storage(&tenant_id, request.mb_used)
        .map_err(map_quota_error)?;

    let tenant = state
        .database
        .find_tenant_by_id(&tenant_id)
        .map_err(map_storage_error)?
        .ok_or_else(|| not_found("tenant_not_found", "tenant does not exist"))?;

    Ok(Json(TrackStorageResponse {
        tenant_id,
        storage_used_mb: tenant.storage_used_mb,
    }))
}

#[instrument(skip(state, request), fields(tenant_id = %tenant_id))]
pub async fn create_staff(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
    Json(request): Json<CreateStaffRequest>,
) -> ApiResult<StaffUserRecord> {
    if request.name.trim().is_empty() || request.email.trim().is_empty() {
        return Err(bad_request("invalid_staff", "name and email are required"));
    }

    let database = Arc::clone(&state.database);
    let user = state
        .enforcer
        .with_quota(&tenant_id, ResourceKind::Users, 1.0, 0.0, |tenant| {
            let user = StaffUserRecord {
                user_id: Uuid::new_v4().to_string(),
                tenant_id: tenant.tenant_id.clone(),
                name: request.name,
                email: request.email,
                role: request
                    .role
                    .unwrap_or_else(|| DEFAULT_STAFF_ROLE.to_string()),
                created_at: Utc::now().to_rfc3339(),
            };
            database.insert_staff_user(&user)?;
            Ok(user)
        })
        .map_err(map_quota_error)?;

    info!(user_id = %user.user_id, "staff user created");
    Ok(Json(user))
}

#[instrument(skip(state, request), fields(tenant_id = %tenant_id))]
pub async fn create_client(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
    Json(request): Json<CreateClientRequest>,
) -> ApiResult<ClientRecord> {
    if request.name.trim().is_empty() {
        return Err(bad_request("invalid_name", "name cannot be empty"));
    }

    let database = Arc::clone(&state.database);
    let identifiers = Arc::clone(&state.identifiers);
    let client = state
        .enforcer
        .with_quota(&tenant_id, ResourceKind::Clients, 1.0, 0.0, |tenant| {
            let mut client = ClientRecord {
                client_id: Uuid::new_v4().to_string(),
                tenant_id: tenant.tenant_id.clone(),
                client_number: String::new(),
                name: request.name,
                created_at: Utc::now().to_rfc3339(),
            };

            // Numbers from earlier years or an older pattern may already be taken.
            let mut attempt = 1;
            loop {
                let number = identifiers.allocate(&tenant.tenant_id, IdentifierKind::Client)?;
                client.client_number = number.identifier;
                match database.insert_client(&client) {
                    Ok(()) => return Ok(client),
                    Err(err)
                        if err.is_unique_violation() && attempt < MAX_CLIENT_NUMBER_ATTEMPTS =>
                    {
                        warn!(
                            client_number = %client.client_number,
                            attempt,
                            "client number already in use, drawing the next one"
                        );
                        attempt += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        })
        .map_err(map_quota_error)?;

    info!(client_number = %client.client_number, "client created");
    Ok(Json(client))
}

#[instrument(skip(state, request), fields(tenant_id = %tenant_id))]
pub async fn create_attachment(
    State(state): State<Arc<ApiState>>,
    Path(tenant_id): Path<String>,
    Json(request): Json<CreateAttachmentRequest>,
) -> ApiResult<AttachmentRecord> {
    if request.file_name.trim().is_empty() {
        return Err(bad_request("invalid_file_name", "file_name cannot be empty"));
    }
    let size_mb = request.size_mb;

    let database = Arc::clone(&state.database);
    let attachment = state
        .enforcer
        .with_quota(&tenant_id, ResourceKind::Storage, size_mb, size_mb, |tenant| {
            let attachment = AttachmentRecord {
                attachment_id: Uuid::new_v4().to_string(),
                tenant_id: tenant.tenant_id.clone(),
                file_name: request.file_name,
                size_mb,
                created_at: Utc::now().to_rfc3339(),
            };
            database.insert_attachment(&attachment)?;
            Ok(attachment)
        })
        .map_err(map_quota_error)?;

    info!(attachment_id = %attachment.attachment_id, size_mb, "attachment recorded");
    Ok(Json(attachment))
}

pub async fn get_pattern(
    State(state): State<Arc<ApiState>>,
    Path((tenant_id, kind)): Path<(String, String)>,
) -> ApiResult<PatternResponse> {
    let kind = kind.parse::<IdentifierKind>().map_err(map_identifier_error)?;
    let pattern = state
        .identifiers
        .pattern(&tenant_id, kind)
        .map_err(map_identifier_error)?;

    Ok(Json(PatternResponse {
        tenant_id,
        kind,
        pattern,
    }))
}

pub async fn set_pattern(
    State(state): State<Arc<ApiState>>,
    Path((tenant_id, kind)): Path<(String, String)>,
    Json(request): Json<SetPatternRequest>,
) -> ApiResult<PatternResponse> {
    let kind = kind.parse::<IdentifierKind>().map_err(map_identifier_error)?;
    state
        .identifiers
        .set_pattern(&tenant_id, kind, &request.pattern)
        .map_err(map_identifier_error)?;

    info!(tenant_id = %tenant_id, kind = %kind, pattern = %request.pattern, "identifier pattern updated");
    Ok(Json(PatternResponse {
        tenant_id,
        kind,
        pattern: Some(request.pattern),
    }))
}

pub async fn next_identifier(
    State(state): State<Arc<ApiState>>,
    Path((tenant_id, kind)): Path<(String, String)>,
) -> ApiResult<GeneratedId> {
    let kind = kind.parse::<IdentifierKind>().map_err(map_identifier_error)?;
    let generated = state
        .identifiers
        .next_identifier(&tenant_id, kind)
        .map_err(map_identifier_error)?;
    Ok(Json(generated))
}

pub async fn preview_identifier(Json(request): Json<PreviewRequest>) -> ApiResult<PreviewResponse> {
    let identifier = IdentifierService::preview(request.pattern.as_deref(), request.sequence);
    Ok(Json(PreviewResponse { identifier }))
}

pub async fn health_check() -> ApiResult<serde_json::Value> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "clinic-quota-service"
    })))
}

fn validate_tenant_id(tenant_id: &str) -> Result<(), ApiError> {
    let valid = !tenant_id.is_empty()
        && tenant_id.len() <= 64
        && tenant_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');

    if !valid {
        return Err(bad_request(
            "invalid_tenant_id",
            "tenant_id must be 1-64 characters of [A-Za-z0-9_-]",
        ));
    }
    Ok(())
}

fn map_quota_error(err: QuotaError) -> ApiError {
    match err {
        QuotaError::TenantNotFound(_) => not_found("tenant_not_found", "tenant does not exist"),
        QuotaError::AccountRestricted(_) => (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "account is restricted; settle billing to continue".to_string(),
                code: "account_restricted".to_string(),
                details: None,
            }),
        ),
        QuotaError::QuotaExceeded {
            resource,
            limit,
            current,
            requested,
            ..
        } => (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: resource.limit_message().to_string(),
                code: "quota_exceeded".to_string(),
                details: Some(json!({
                    "resource": resource,
                    "limit": limit,
                    "current": current,
                    "requested": requested,
                })),
            }),
        ),
        QuotaError::InvalidIncrement(_) => bad_request(
            "invalid_amount",
            "amount must be a non-negative number",
        ),
        QuotaError::StorageError(err) => map_storage_error(err),
    }
}

fn map_identifier_error(err: IdentifierError) -> ApiError {
    match err {
        IdentifierError::TenantNotFound(_) => not_found("tenant_not_found", "tenant does not exist"),
        IdentifierError::UnknownKind(kind) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("unknown identifier kind '{kind}'"),
                code: "invalid_kind".to_string(),
                details: None,
            }),
        ),
        IdentifierError::InvalidPattern(reason) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: reason,
                code: "invalid_pattern".to_string(),
                details: None,
            }),
        ),
        IdentifierError::StorageError(err) => map_storage_error(err),
    }
}

fn map_storage_error(err: StorageError) -> ApiError {
    match err {
        StorageError::TenantNotFound(_) => not_found("tenant_not_found", "tenant does not exist"),
        StorageError::PlanNotFound(_) => not_found("plan_not_found", "plan does not exist"),
        StorageError::InvalidValue(reason) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: reason,
                code: "invalid_value".to_string(),
                details: None,
            }),
        ),
        StorageError::DatabaseError(rusqlite::Error::SqliteFailure(failure, _))
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: "record conflicts with existing data".to_string(),
                    code: "conflict".to_string(),
                    details: None,
                }),
            )
        }
        other => internal_error(other),
    }
}

fn bad_request(code: &str, message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn not_found(code: &str, message: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    error!(error = %err, "clinic quota API internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal server error".to_string(),
            code: "internal_error".to_string(),
            details: Some(json!({ "message": err.to_string() })),
        }),
    )
}
