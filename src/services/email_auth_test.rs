use super::*;

#[test]
fn normalize_email_accepts_basic_address() {
    assert_eq!(normalize_email("  USER@Example.com "), Some("user@example.com".to_owned()));
}

#[test]
fn normalize_email_rejects_invalid_values() {
    assert_eq!(normalize_email(""), None);
    assert_eq!(normalize_email("user"), None);
    assert_eq!(normalize_email("@example.com"), None);
    assert_eq!(normalize_email("user@"), None);
    assert_eq!(normalize_email("a@b@c"), None);
    assert_eq!(normalize_email("a b@c.io"), None);
}

#[test]
fn normalize_code_uppercases() {
    let code = generate_access_code();
    assert_eq!(normalize_code(&code), Some(code.clone()));
    assert_eq!(normalize_code(" abc234 "), Some("ABC234".to_owned()));
}

#[test]
fn normalize_code_rejects_bad_shapes() {
    assert_eq!(normalize_code("abc23"), None);
    assert_eq!(normalize_code("abc2345"), None);
    // I, 1 and 0 are not in the alphabet.
    assert_eq!(normalize_code("ABC1I0"), None);
    assert_eq!(normalize_code("ABC23!"), None);
}

#[test]
fn generate_access_code_shape() {
    let code = generate_access_code();
    assert_eq!(code.len(), 6);
    assert!(code.bytes().all(|c| CODE_ALPHABET.contains(&c)));
}

#[test]
fn hash_code_is_stable_hex() {
    let a = hash_code("ABC234");
    assert_eq!(a, hash_code("ABC234"));
    assert_ne!(a, hash_code("ABC235"));
    assert_eq!(a.len(), 64);
}

#[test]
fn name_from_email_uses_local_part() {
    assert_eq!(name_from_email("jane.doe@example.com"), "jane.doe");
}

#[test]
fn error_codes_map_to_statuses() {
    use crate::error::ErrorCode;

    assert_eq!(EmailAuthError::InvalidEmail.status(), StatusCode::BAD_REQUEST);
    assert_eq!(EmailAuthError::InvalidCode.error_code(), "E_VERIFICATION_FAILED");
    assert_eq!(EmailAuthError::VerificationFailed.status(), StatusCode::UNAUTHORIZED);
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
async fn live_wrong_guesses_burn_code() {
    let pool = crate::state::test_helpers::live_pool().await;
    let email = format!("burn-{}@example.com", Uuid::new_v4());
    let (_, code) = request_access_code(&pool, &email).await.unwrap();
    let wrong = if code == "AAAAAA" { "BBBBBB" } else { "AAAAAA" };

    for _ in 0..MAX_FAILED_ATTEMPTS {
        assert!(verify_access_code(&pool, &email, wrong).await.is_err());
    }
    assert!(matches!(
        verify_access_code(&pool, &email, &code).await,
        Err(EmailAuthError::VerificationFailed)
    ));

    let (_, fresh) = request_access_code(&pool, &email).await.unwrap();
    let verified = verify_access_code(&pool, &email, &fresh).await.unwrap();
    assert!(!verified.mfa_enabled);
}
