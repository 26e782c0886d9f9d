use super::*;

#[test]
fn name_is_trimmed_and_required() {
    let (name, email) = normalize_fields("  Ada Lovelace ", None).unwrap();
    assert_eq!(name, "Ada Lovelace");
    assert_eq!(email, None);
    assert!(matches!(normalize_fields("   ", None), Err(CustomerError::InvalidInput(_))));
}

#[test]
fn email_is_normalized_or_rejected() {
    let (_, email) = normalize_fields("Ada", Some(" Ada@Example.COM ")).unwrap();
    assert_eq!(email.as_deref(), Some("ada@example.com"));
    assert!(matches!(normalize_fields("Ada", Some("not-an-email")), Err(CustomerError::InvalidInput(_))));
}

#[test]
fn blank_email_means_none() {
    let (_, email) = normalize_fields("Ada", Some("   ")).unwrap();
    assert_eq!(email, None);
}

#[test]
fn like_pattern_escapes_wildcards() {
    assert_eq!(like_pattern(" smith "), "%smith%");
    assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
}

#[test]
fn version_conflict_is_retryable_409() {
    let err = CustomerError::VersionConflict { current: 4 };
    assert_eq!(err.error_code(), "E_VERSION_CONFLICT");
    assert_eq!(err.status(), StatusCode::CONFLICT);
    assert!(err.retryable());
    assert!(!CustomerError::InUse.retryable());
}

#[test]
fn patch_requires_version() {
    let missing = serde_json::from_str::<CustomerPatch>(r#"{"full_name":"Bob"}"#);
    assert!(missing.is_err());
    let ok: CustomerPatch = serde_json::from_str(r#"{"version":2,"status":"blocked"}"#).unwrap();
    assert_eq!(ok.status, Some(CustomerStatus::Blocked));
}

#[cfg(feature = "live-db-tests")]
#[tokio::test]
async fn live_version_conflict_and_duplicate_email() {
    use crate::services::tenant::{self, NewTenant, TenantRole};

    let pool = crate::state::test_helpers::live_pool().await;
    let user = crate::services::email_auth::upsert_user_by_email(&pool, &format!("crm-{}@example.com", Uuid::new_v4()))
        .await
        .unwrap();
    let slug = format!("crm-{}", Uuid::new_v4().simple());
    let t = tenant::onboard_tenant(&pool, user, NewTenant { name: "CRM", slug: Some(&slug), currency: "EUR" })
        .await
        .unwrap();
    let ctx = TenantCtx { tenant_id: t.id, user_id: user, role: TenantRole::Agent };

    let input = CustomerInput { full_name: "Ada".into(), email: Some("ada@example.com".into()), ..Default::default() };
    let ada = create_customer(&pool, &ctx, input.clone()).await.unwrap();
    assert!(matches!(create_customer(&pool, &ctx, input).await, Err(CustomerError::Duplicate(_))));

    let patch = CustomerPatch { version: ada.version, phone: Some("+44 1".into()), ..Default::default() };
    let updated = update_customer(&pool, &ctx, ada.id, patch.clone()).await.unwrap();
    assert_eq!(updated.version, ada.version + 1);
    assert!(matches!(
        update_customer(&pool, &ctx, ada.id, patch).await,
        Err(CustomerError::VersionConflict { .. })
    ));

    let found = list_customers(&pool, &ctx, &CustomerFilter { q: Some("ADA@".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    delete_customer(&pool, &ctx, ada.id).await.unwrap();
}
