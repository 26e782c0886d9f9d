use super::*;
use axum::http::HeaderValue;

// =============================================================================
// tenant header
// =============================================================================

fn headers_with(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(TENANT_HEADER, HeaderValue::from_str(value).unwrap());
    headers
}

#[test]
fn tenant_header_parses_uuid() {
    let id = Uuid::new_v4();
    assert_eq!(parse_tenant_header(&headers_with(&id.to_string())).unwrap(), id);
    assert_eq!(parse_tenant_header(&headers_with(&format!("  {id} "))).unwrap(), id);
}

#[test]
fn missing_or_invalid_tenant_header_is_400() {
    for headers in [HeaderMap::new(), headers_with("not-a-uuid"), headers_with("")] {
        let err = parse_tenant_header(&headers).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "E_TENANT_REQUIRED");
    }
}

#[test]
fn pending_sessions_get_mfa_required() {
    let err = mfa_required();
    assert_eq!(err.status, StatusCode::FORBIDDEN);
    assert_eq!(err.code, "E_MFA_REQUIRED");
}

// =============================================================================
// cookies
// =============================================================================

#[test]
fn session_cookie_is_http_only_and_scoped() {
    let cookie = session_cookie("tok".into(), true, 24);
    assert_eq!(cookie.name(), COOKIE_NAME);
    assert_eq!(cookie.value(), "tok");
    assert_eq!(cookie.path(), Some("/"));
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.secure(), Some(true));
    assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    assert_eq!(cookie.max_age(), Some(Duration::hours(24)));
}

#[test]
fn cleared_cookie_expires_immediately() {
    let cookie = cleared_cookie(false);
    assert_eq!(cookie.value(), "");
    assert_eq!(cookie.max_age(), Some(Duration::ZERO));
    assert_eq!(cookie.secure(), Some(false));
}

// =============================================================================
// request bodies
// =============================================================================

#[test]
fn verify_body_requires_both_fields() {
    let body: VerifyCodeBody = serde_json::from_str(r#"{"email":"a@b.co","code":"ABC234"}"#).unwrap();
    assert_eq!(body.code, "ABC234");
    assert!(serde_json::from_str::<VerifyCodeBody>(r#"{"email":"a@b.co"}"#).is_err());
}

#[tokio::test]
async fn request_code_rejects_bad_email_before_touching_db() {
    let state = crate::state::test_helpers::test_app_state();
    let err = request_email_code(State(state), Json(RequestCodeBody { email: "nope".into() }))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}
