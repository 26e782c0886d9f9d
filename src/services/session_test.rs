use super::*;

// =============================================================================
// bytes_to_hex
// =============================================================================

#[test]
fn bytes_to_hex_empty() {
    assert_eq!(bytes_to_hex(&[]), "");
}

#[test]
fn bytes_to_hex_leading_zero() {
    assert_eq!(bytes_to_hex(&[0x0a]), "0a");
}

#[test]
fn bytes_to_hex_multi_byte() {
    assert_eq!(bytes_to_hex(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
}

// =============================================================================
// generate_token
// =============================================================================

#[test]
fn generate_token_is_64_hex_chars() {
    let token = generate_token();
    assert_eq!(token.len(), 64);
    assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn generate_token_two_calls_differ() {
    assert_ne!(generate_token(), generate_token());
}

// =============================================================================
// SessionUser
// =============================================================================

#[test]
fn session_user_serializes_flags() {
    let user = SessionUser {
        id: Uuid::nil(),
        email: "alice@example.com".into(),
        name: "alice".into(),
        mfa_enabled: true,
        session_id: Uuid::nil(),
        mfa_pending: true,
    };
    let value = serde_json::to_value(&user).unwrap();
    assert_eq!(value["email"], "alice@example.com");
    assert_eq!(value["mfa_enabled"], true);
    assert_eq!(value["mfa_pending"], true);
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
async fn live_session_lifecycle() {
    let pool = crate::state::test_helpers::live_pool().await;
    let email = format!("session-{}@example.com", Uuid::new_v4());
    let user_id: Uuid = sqlx::query_scalar("INSERT INTO users (email, name) VALUES ($1, 'x') RETURNING id")
        .bind(&email)
        .fetch_one(&pool)
        .await
        .unwrap();

    let token_a = create_session(&pool, user_id, 1, false, Some("test-a")).await.unwrap();
    let token_b = create_session(&pool, user_id, 1, true, None).await.unwrap();

    let a = validate_session(&pool, &token_a).await.unwrap().unwrap();
    assert!(!a.mfa_pending);
    let b = validate_session(&pool, &token_b).await.unwrap().unwrap();
    assert!(b.mfa_pending);

    let sessions = list_sessions(&pool, user_id, a.session_id).await.unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions.iter().filter(|s| s.current).count(), 1);

    assert_eq!(revoke_other_sessions(&pool, user_id, a.session_id).await.unwrap(), 1);
    assert!(validate_session(&pool, &token_b).await.unwrap().is_none());

    delete_session(&pool, &token_a).await.unwrap();
    assert!(validate_session(&pool, &token_a).await.unwrap().is_none());
}
