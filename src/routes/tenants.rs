//! Tenant routes: onboarding, settings, members and diagnostics.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::auth::{AuthUser, TenantUser};
use crate::services::tenant::{self, NewTenant, Tenant, TenantMember, TenantMembership, TenantPermission, TenantRole};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateTenantBody {
    pub name: String,
    pub slug: Option<String>,
    pub currency: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateTenantBody {
    pub name: Option<String>,
    pub currency: Option<String>,
}

#[derive(Deserialize)]
pub struct AddMemberBody {
    pub email: String,
    pub role: TenantRole,
}

#[derive(Deserialize)]
pub struct UpdateMemberBody {
    pub role: TenantRole,
}

/// `POST /api/tenants`: onboard a tenant owned by the caller.
pub async fn create_tenant(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateTenantBody>,
) -> Result<(StatusCode, Json<Tenant>), ApiError> {
    let currency = body.currency.as_deref().unwrap_or(&state.settings.default_currency);
    let tenant = tenant::onboard_tenant(
        &state.pool,
        auth.user.id,
        NewTenant { name: &body.name, slug: body.slug.as_deref(), currency },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

/// `GET /api/tenants`
pub async fn list_tenants(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<TenantMembership>>, ApiError> {
    Ok(Json(tenant::list_for_user(&state.pool, auth.user.id).await?))
}

/// `GET /api/tenants/current`
pub async fn current_tenant(State(state): State<AppState>, auth: TenantUser) -> Result<Json<Tenant>, ApiError> {
    Ok(Json(tenant::get_tenant(&state.pool, auth.ctx.tenant_id).await?))
}

/// `PATCH /api/tenants/current`
pub async fn update_current(
    State(state): State<AppState>,
    auth: TenantUser,
    Json(body): Json<UpdateTenantBody>,
) -> Result<Json<Tenant>, ApiError> {
    let updated = tenant::update_tenant(&state.pool, &auth.ctx, body.name.as_deref(), body.currency.as_deref()).await?;
    Ok(Json(updated))
}

/// `GET /api/tenants/current/members`
pub async fn list_members(
    State(state): State<AppState>,
    auth: TenantUser,
) -> Result<Json<Vec<TenantMember>>, ApiError> {
    Ok(Json(tenant::list_members(&state.pool, &auth.ctx).await?))
}

/// `POST /api/tenants/current/members`
pub async fn add_member(
    State(state): State<AppState>,
    auth: TenantUser,
    Json(body): Json<AddMemberBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let user_id = tenant::add_member(&state.pool, &auth.ctx, &body.email, body.role).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "user_id": user_id, "role": body.role }))))
}

/// `PATCH /api/tenants/current/members/{user_id}`
pub async fn update_member(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(user_id): Path<Uuid>,
    Json(body): Json<UpdateMemberBody>,
) -> Result<StatusCode, ApiError> {
    tenant::update_member_role(&state.pool, &auth.ctx, user_id, body.role).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/tenants/current/members/{user_id}`
pub async fn remove_member(
    State(state): State<AppState>,
    auth: TenantUser,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    tenant::remove_member(&state.pool, &auth.ctx, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/tenants/current/diagnostics`
pub async fn diagnostics(
    State(state): State<AppState>,
    auth: TenantUser,
) -> Result<Json<tenant::Diagnostics>, ApiError> {
    auth.ctx.require(TenantPermission::View)?;
    Ok(Json(tenant::diagnostics(&state.pool, auth.ctx.tenant_id).await?))
}
