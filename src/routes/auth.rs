//! Auth routes: email login codes, sessions, MFA backup codes, and the
//! request extractors every other route builds on.

use axum::extract::{FromRef, FromRequestParts, Path, State};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::{Value, json};
use time::Duration;
use uuid::Uuid;

use crate::error::ApiError;
use crate::rate_limit::LOGIN_CODE_WINDOW;
use crate::services::email_auth::{self, EmailAuthError};
use crate::services::tenant::{self, TenantCtx};
use crate::services::{mfa, session};
use crate::state::AppState;

pub(crate) const COOKIE_NAME: &str = "session_token";
pub(crate) const TENANT_HEADER: &str = "x-tenant-id";

// =============================================================================
// EXTRACTORS
// =============================================================================

/// Any live session, including one still waiting for its MFA code.
pub struct PendingAuthUser {
    pub user: session::SessionUser,
    pub token: String,
}

/// Fully authenticated user. Pending MFA sessions are rejected.
pub struct AuthUser {
    pub user: session::SessionUser,
}

/// Authenticated user acting inside the tenant named by `X-Tenant-Id`.
pub struct TenantUser {
    pub ctx: TenantCtx,
}

fn mfa_required() -> ApiError {
    ApiError::new(StatusCode::FORBIDDEN, "E_MFA_REQUIRED", "multi-factor verification required")
}

/// Parse the tenant header value.
pub(crate) fn parse_tenant_header(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "E_TENANT_REQUIRED", "X-Tenant-Id header required"))
}

impl<S> FromRequestParts<S> for PendingAuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar.get(COOKIE_NAME).map(Cookie::value).unwrap_or_default();
        if token.is_empty() {
            return Err(ApiError::unauthorized());
        }

        let app_state = AppState::from_ref(state);
        let user = session::validate_session(&app_state.pool, token)
            .await?
            .ok_or_else(ApiError::unauthorized)?;

        Ok(Self { user, token: token.to_owned() })
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let PendingAuthUser { user, .. } = PendingAuthUser::from_request_parts(parts, state).await?;
        if user.mfa_pending {
            return Err(mfa_required());
        }
        Ok(Self { user })
    }
}

impl<S> FromRequestParts<S> for TenantUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser { user } = AuthUser::from_request_parts(parts, state).await?;
        let tenant_id = parse_tenant_header(&parts.headers)?;

        let app_state = AppState::from_ref(state);
        let role = tenant::member_role(&app_state.pool, tenant_id, user.id)
            .await?
            .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "E_TENANT_NOT_FOUND", "tenant not found"))?;

        let ctx = TenantCtx { tenant_id, user_id: user.id, role };
        Ok(Self { ctx })
    }
}

// =============================================================================
// COOKIES
// =============================================================================

fn session_cookie(token: String, secure: bool, ttl_hours: i64) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(Duration::hours(ttl_hours))
        .build()
}

fn cleared_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(Duration::ZERO)
        .build()
}

// =============================================================================
// LOGIN
// =============================================================================

#[derive(Deserialize)]
pub struct RequestCodeBody {
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyCodeBody {
    pub email: String,
    pub code: String,
}

/// `POST /api/auth/email/request-code`: issue and deliver a login code.
pub async fn request_email_code(
    State(state): State<AppState>,
    Json(body): Json<RequestCodeBody>,
) -> Result<Json<Value>, ApiError> {
    let normalized = email_auth::normalize_email(&body.email).ok_or(EmailAuthError::InvalidEmail)?;
    state
        .rate_limiter
        .check_and_record(&format!("login:{normalized}"), LOGIN_CODE_WINDOW)?;

    let (email, code) = email_auth::request_access_code(&state.pool, &normalized).await?;
    if let Err(e) = state.mailer.send_login_code(&email, &code).await {
        tracing::error!(error = %e, "login code delivery failed");
        return Err(ApiError::new(StatusCode::BAD_GATEWAY, "E_EMAIL_DELIVERY", "could not deliver login code"));
    }

    let mut response = json!({ "ok": true });
    if state.settings.expose_login_codes {
        response["code"] = json!(code);
    }
    Ok(Json(response))
}

/// `POST /api/auth/email/verify-code`: exchange a code for a session cookie.
pub async fn verify_email_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<VerifyCodeBody>,
) -> Result<impl IntoResponse, ApiError> {
    let verified = email_auth::verify_access_code(&state.pool, &body.email, &body.code).await?;
    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());
    let token = session::create_session(
        &state.pool,
        verified.user_id,
        state.settings.session_ttl_hours,
        verified.mfa_enabled,
        user_agent,
    )
    .await?;

    tracing::info!(user_id = %verified.user_id, mfa_pending = verified.mfa_enabled, "session created");
    let jar = CookieJar::new().add(session_cookie(token, state.settings.cookie_secure, state.settings.session_ttl_hours));
    Ok((jar, Json(json!({ "user_id": verified.user_id, "mfa_required": verified.mfa_enabled }))))
}

// =============================================================================
// SESSIONS
// =============================================================================

/// `GET /api/auth/me`: return current user.
pub async fn me(auth: AuthUser) -> Json<session::SessionUser> {
    Json(auth.user)
}

/// `POST /api/auth/logout`: delete session, clear cookie. Pending sessions may log out.
pub async fn logout(State(state): State<AppState>, auth: PendingAuthUser) -> Result<impl IntoResponse, ApiError> {
    session::delete_session(&state.pool, &auth.token).await?;
    let jar = CookieJar::new().add(cleared_cookie(state.settings.cookie_secure));
    Ok((jar, StatusCode::NO_CONTENT))
}

/// `GET /api/auth/sessions`
pub async fn list_sessions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<session::SessionInfo>>, ApiError> {
    let rows = session::list_sessions(&state.pool, auth.user.id, auth.user.session_id).await?;
    Ok(Json(rows))
}

/// `DELETE /api/auth/sessions/{id}`
pub async fn revoke_session(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if session::revoke_session(&state.pool, auth.user.id, session_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("session not found"))
    }
}

/// `POST /api/auth/sessions/revoke-others`
pub async fn revoke_other_sessions(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Value>, ApiError> {
    let revoked = session::revoke_other_sessions(&state.pool, auth.user.id, auth.user.session_id).await?;
    tracing::info!(user_id = %auth.user.id, revoked, "other sessions revoked");
    Ok(Json(json!({ "revoked": revoked })))
}

// =============================================================================
// MFA
// =============================================================================

#[derive(Deserialize)]
pub struct MfaCodeBody {
    pub code: String,
}

/// `POST /api/auth/mfa/enroll`: returns the plaintext backup codes once.
pub async fn mfa_enroll(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Value>, ApiError> {
    let codes = mfa::enroll(&state.pool, auth.user.id).await?;
    Ok(Json(json!({ "codes": codes })))
}

/// `POST /api/auth/mfa/verify`: the only route a pending session may use.
pub async fn mfa_verify(
    State(state): State<AppState>,
    auth: PendingAuthUser,
    Json(body): Json<MfaCodeBody>,
) -> Result<Json<Value>, ApiError> {
    mfa::verify(&state.pool, auth.user.id, auth.user.session_id, &body.code).await?;
    Ok(Json(json!({ "ok": true })))
}

/// `POST /api/auth/mfa/disable`
pub async fn mfa_disable(State(state): State<AppState>, auth: AuthUser) -> Result<StatusCode, ApiError> {
    mfa::disable(&state.pool, auth.user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/auth/mfa/status`
pub async fn mfa_status(State(state): State<AppState>, auth: AuthUser) -> Result<Json<mfa::MfaStatus>, ApiError> {
    Ok(Json(mfa::status(&state.pool, auth.user.id).await?))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
