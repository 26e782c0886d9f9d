use super::*;
use crate::services::contract::TransitionInput;
use crate::state::test_helpers;
use axum::body::Body;
use axum::http::{Method, Request};
use tower::ServiceExt;

async fn send(method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
    let app = app(test_helpers::test_app_state());
    let response = app
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, body)
}

#[tokio::test]
async fn healthz_is_ok_without_database() {
    let (status, _) = send(Method::GET, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let (status, _) = send(Method::GET, "/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_cookie_is_unauthorized() {
    for uri in ["/api/auth/me", "/api/customers", "/api/tenants/current", "/api/audit/verify"] {
        let (status, body) = send(Method::GET, uri).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body["code"], "E_UNAUTHORIZED");
        assert_eq!(body["retryable"], false);
    }
}

#[tokio::test]
async fn logout_without_session_is_unauthorized() {
    let (status, _) = send(Method::POST, "/api/auth/logout").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[test]
fn optional_json_accepts_empty_and_whitespace() {
    let input: TransitionInput = optional_json(b"").unwrap();
    assert_eq!(input.version, None);
    let input: TransitionInput = optional_json(b"  \n").unwrap();
    assert_eq!(input.version, None);
    let input: TransitionInput = optional_json(br#"{"version": 3}"#).unwrap();
    assert_eq!(input.version, Some(3));
}

#[test]
fn optional_json_rejects_garbage() {
    let err = optional_json::<TransitionInput>(b"{not json").unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.code, "E_INVALID_INPUT");
}
