use super::*;

fn limiter_with_budget(budget: u64) -> RateLimiter {
    RateLimiter {
        inner: Arc::new(Mutex::new(RateLimiterInner::default())),
        tokens: TokenBudget { budget, window: Duration::from_secs(3600) },
    }
}

const SMALL: Window = Window { limit: 3, period: Duration::from_secs(60) };
const ROOMY: Window = Window { limit: 1_000, period: Duration::from_secs(60) };

#[test]
fn allows_up_to_limit_then_rejects() {
    let rl = RateLimiter::new();
    let now = Instant::now();

    for i in 0..SMALL.limit {
        assert!(rl.check_and_record_at("login:a@x.io", SMALL, now).is_ok(), "request {i} should succeed");
    }
    assert_eq!(
        rl.check_and_record_at("login:a@x.io", SMALL, now),
        Err(RateLimitError::Exceeded { limit: 3, window_secs: 60 })
    );
}

#[test]
fn keys_are_independent() {
    let rl = RateLimiter::new();
    let now = Instant::now();

    for _ in 0..SMALL.limit {
        rl.check_and_record_at("login:a@x.io", SMALL, now).unwrap();
    }
    assert!(rl.check_and_record_at("login:b@x.io", SMALL, now).is_ok());
}

#[test]
fn window_expiry_allows_new_requests() {
    let rl = RateLimiter::new();
    let start = Instant::now();

    for _ in 0..SMALL.limit {
        rl.check_and_record_at("k", SMALL, start).unwrap();
    }
    assert!(rl.check_and_record_at("k", SMALL, start).is_err());

    let later = start + SMALL.period + Duration::from_secs(1);
    assert!(rl.check_and_record_at("k", SMALL, later).is_ok());
}

#[test]
fn rejected_request_is_not_recorded() {
    let rl = RateLimiter::new();
    let start = Instant::now();
    for _ in 0..SMALL.limit {
        rl.check_and_record_at("k", SMALL, start).unwrap();
    }
    // Hammering while blocked must not extend the block past the first window.
    for _ in 0..10 {
        let _ = rl.check_and_record_at("k", SMALL, start + Duration::from_secs(30));
    }
    let later = start + SMALL.period + Duration::from_secs(1);
    assert!(rl.check_and_record_at("k", SMALL, later).is_ok());
}

#[test]
fn token_reservation_blocks_oversubscription() {
    let rl = limiter_with_budget(100);
    let now = Instant::now();

    rl.admit_at("narrative:t", ROOMY, 60, now).unwrap();
    assert!(matches!(
        rl.admit_at("narrative:t", ROOMY, 60, now),
        Err(RateLimitError::TokenBudgetExceeded { budget: 100, .. })
    ));
    assert!(rl.admit_at("narrative:t", ROOMY, 40, now).is_ok());
}

#[test]
fn settling_reservation_replaces_it_with_actual_usage() {
    let rl = limiter_with_budget(100);
    let now = Instant::now();

    rl.admit_at("t", ROOMY, 80, now).unwrap();
    rl.record_tokens_at("t", 30, 80, now);
    assert!(rl.admit_at("t", ROOMY, 70, now).is_ok());
}

#[test]
fn release_frees_reservation() {
    let rl = limiter_with_budget(100);
    rl.admit("t", ROOMY, 90).unwrap();
    assert!(rl.admit("t", ROOMY, 20).is_err());
    rl.release_tokens("t", 90);
    assert!(rl.admit("t", ROOMY, 20).is_ok());
}

#[test]
fn zero_reservation_fails_once_budget_is_spent() {
    let rl = limiter_with_budget(100);
    let now = Instant::now();
    rl.record_tokens_at("t", 100, 0, now);
    assert!(rl.admit_at("t", ROOMY, 0, now).is_err());
}

#[test]
fn admit_refused_by_budget_keeps_the_request_slot() {
    let rl = limiter_with_budget(100);
    let now = Instant::now();

    for _ in 0..SMALL.limit - 1 {
        rl.admit_at("narrative:t", SMALL, 10, now).unwrap();
    }
    assert!(matches!(
        rl.admit_at("narrative:t", SMALL, 500, now),
        Err(RateLimitError::TokenBudgetExceeded { .. })
    ));
    // the last slot is still free
    assert!(rl.admit_at("narrative:t", SMALL, 10, now).is_ok());
    assert_eq!(rl.admit_at("narrative:t", SMALL, 10, now), Err(RateLimitError::Exceeded { limit: 3, window_secs: 60 }));
}

#[test]
fn admit_refused_by_window_reserves_nothing() {
    let rl = limiter_with_budget(100);
    let now = Instant::now();

    for _ in 0..SMALL.limit {
        rl.admit_at("t", SMALL, 0, now).unwrap();
    }
    assert!(rl.admit_at("t", SMALL, 90, now).is_err());
    assert!(rl.admit_at("t", ROOMY, 100, now).is_ok());
}
