use super::*;

#[test]
fn backup_code_shape() {
    let code = generate_backup_code();
    assert_eq!(code.len(), 9);
    assert_eq!(&code[4..5], "-");
    assert!(code.bytes().filter(|c| *c != b'-').all(|c| CODE_ALPHABET.contains(&c)));
}

#[test]
fn normalize_accepts_lowercase_and_missing_dash() {
    assert_eq!(normalize_backup_code("abcd-efgh"), Some("ABCD-EFGH".to_owned()));
    assert_eq!(normalize_backup_code(" ABCDEFGH "), Some("ABCD-EFGH".to_owned()));
    assert_eq!(normalize_backup_code("abcd efgh"), Some("ABCD-EFGH".to_owned()));
}

#[test]
fn normalize_rejects_wrong_length_or_alphabet() {
    assert_eq!(normalize_backup_code("ABCD-EFG"), None);
    assert_eq!(normalize_backup_code("ABCD-EFGHJ"), None);
    assert_eq!(normalize_backup_code("ABCD-EF01"), None);
}

#[test]
fn generated_code_round_trips_through_normalize() {
    let code = generate_backup_code();
    assert_eq!(normalize_backup_code(&code.to_lowercase()), Some(code));
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
async fn live_enroll_verify_consumes_code_once() {
    let pool = crate::state::test_helpers::live_pool().await;
    let email = format!("mfa-{}@example.com", Uuid::new_v4());
    let user_id = crate::services::email_auth::upsert_user_by_email(&pool, &email).await.unwrap();

    let codes = enroll(&pool, user_id).await.unwrap();
    assert_eq!(codes.len(), BACKUP_CODE_COUNT);

    let token = session::create_session(&pool, user_id, 1, true, None).await.unwrap();
    let pending = session::validate_session(&pool, &token).await.unwrap().unwrap();
    assert!(pending.mfa_pending);

    verify(&pool, user_id, pending.session_id, &codes[0]).await.unwrap();
    let upgraded = session::validate_session(&pool, &token).await.unwrap().unwrap();
    assert!(!upgraded.mfa_pending);

    assert!(matches!(
        verify(&pool, user_id, pending.session_id, &codes[0]).await,
        Err(MfaError::InvalidCode)
    ));
    assert_eq!(status(&pool, user_id).await.unwrap().remaining_codes, 9);

    disable(&pool, user_id).await.unwrap();
    assert!(matches!(disable(&pool, user_id).await, Err(MfaError::NotEnabled)));
}
