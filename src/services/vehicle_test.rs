use super::*;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
}

#[test]
fn plate_is_uppercased_without_spaces() {
    assert_eq!(normalize_plate(" ab 12\tcd "), "AB12CD");
    assert_eq!(normalize_plate("m-xy-123"), "M-XY-123");
}

#[test]
fn year_window_is_1950_to_next_year() {
    assert!(validate_fields("AB1", "VW", "Golf", 1950, 4_500, 0, today()).is_ok());
    assert!(validate_fields("AB1", "VW", "Golf", 2027, 4_500, 0, today()).is_ok());
    assert!(validate_fields("AB1", "VW", "Golf", 1949, 4_500, 0, today()).is_err());
    assert!(validate_fields("AB1", "VW", "Golf", 2028, 4_500, 0, today()).is_err());
}

#[test]
fn rate_and_odometer_bounds() {
    assert!(matches!(
        validate_fields("AB1", "VW", "Golf", 2020, 0, 0, today()),
        Err(VehicleError::InvalidInput(ref m)) if m.contains("daily_rate")
    ));
    assert!(validate_fields("AB1", "VW", "Golf", 2020, 1, -1, today()).is_err());
}

#[test]
fn blank_plate_or_make_is_rejected() {
    assert!(validate_fields("", "VW", "Golf", 2020, 1, 0, today()).is_err());
    assert!(validate_fields("AB1", "  ", "Golf", 2020, 1, 0, today()).is_err());
}

#[test]
fn rented_is_off_limits_to_patches() {
    use VehicleStatus::*;
    assert!(check_manual_transition(Available, Maintenance).is_ok());
    assert!(check_manual_transition(Maintenance, Retired).is_ok());
    assert!(check_manual_transition(Rented, Rented).is_ok());
    let err = check_manual_transition(Available, Rented).unwrap_err();
    assert_eq!(err.error_code(), "E_INVALID_TRANSITION");
    assert_eq!(err.to_string(), "invalid transition: available -> rented");
    assert!(check_manual_transition(Rented, Available).is_err());
}

#[test]
fn input_defaults_odometer_to_zero() {
    let input: VehicleInput = serde_json::from_str(
        r#"{"plate":"ab 1","make":"VW","model":"Golf","year":2022,"daily_rate":4500}"#,
    )
    .unwrap();
    assert_eq!(input.odometer_km, 0);
    assert_eq!(input.vin, None);
}

// =============================================================================
// LIVE
// =============================================================================

#[cfg(feature = "live-db-tests")]
mod live {
    use super::*;
    use crate::services::contract::{self, ContractInput, TransitionInput};
    use crate::services::customer::{self, CustomerInput};
    use crate::services::tenant::{self, NewTenant, TenantRole};

    fn car(plate: &str) -> VehicleInput {
        VehicleInput {
            plate: plate.into(),
            make: "Skoda".into(),
            model: "Octavia".into(),
            year: 2023,
            vin: None,
            color: None,
            daily_rate: 4_000,
            odometer_km: 0,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2027, 3, d).unwrap()
    }

    fn plates(vehicles: &[Vehicle]) -> Vec<&str> {
        vehicles.iter().map(|v| v.plate.as_str()).collect()
    }

    #[tokio::test]
    async fn live_availability_skips_overlapping_bookings() {
        let pool = crate::state::test_helpers::live_pool().await;
        let user = crate::services::email_auth::upsert_user_by_email(&pool, &format!("fleet-{}@example.com", Uuid::new_v4()))
            .await
            .unwrap();
        let slug = format!("fleet-{}", Uuid::new_v4().simple());
        let t = tenant::onboard_tenant(&pool, user, NewTenant { name: "Fleet", slug: Some(&slug), currency: "EUR" })
            .await
            .unwrap();
        let ctx = TenantCtx { tenant_id: t.id, user_id: user, role: TenantRole::Owner };

        let booked = create_vehicle(&pool, &ctx, car("B-AA-1")).await.unwrap();
        create_vehicle(&pool, &ctx, car("B-BB-2")).await.unwrap();
        let customer = customer::create_customer(&pool, &ctx, CustomerInput { full_name: "Ada".into(), ..Default::default() })
            .await
            .unwrap();
        let draft = contract::create_contract(
            &pool,
            &ctx,
            ContractInput {
                customer_id: customer.id,
                vehicle_id: booked.id,
                start_date: day(10),
                end_date: day(12),
                daily_rate: None,
                discount: 0,
                tax_rate_bp: 0,
                deposit: 0,
                notes: None,
            },
        )
        .await
        .unwrap();

        let inside = availability(&pool, &ctx, day(11), day(11)).await.unwrap();
        assert_eq!(plates(&inside), ["B-BB-2"]);
        // inclusive end date still overlaps
        let touching = availability(&pool, &ctx, day(12), day(14)).await.unwrap();
        assert_eq!(plates(&touching), ["B-BB-2"]);
        let after = availability(&pool, &ctx, day(13), day(15)).await.unwrap();
        assert_eq!(plates(&after), ["B-AA-1", "B-BB-2"]);

        contract::cancel(&pool, &ctx, draft.id, TransitionInput::default()).await.unwrap();
        let freed = availability(&pool, &ctx, day(11), day(11)).await.unwrap();
        assert_eq!(plates(&freed), ["B-AA-1", "B-BB-2"]);

        assert!(matches!(availability(&pool, &ctx, day(5), day(4)).await, Err(VehicleError::InvalidInput(_))));
    }
}
