use super::*;
use crate::frame::ErrorCode;

fn small_config() -> RateLimitConfig {
    RateLimitConfig {
        per_session_limit: 3,
        per_session_window: Duration::from_secs(60),
        global_limit: 5,
        global_window: Duration::from_secs(60),
    }
}

#[test]
fn per_session_allows_up_to_limit() {
    let rl = RateLimiter::new(small_config());
    let now = Instant::now();

    for i in 0..3 {
        assert!(rl.check_and_record_at("u1", now).is_ok(), "request {i} should succeed");
    }
    assert!(matches!(
        rl.check_and_record_at("u1", now),
        Err(RateLimitError::PerSessionExceeded { limit: 3, window_secs: 60 })
    ));
}

#[test]
fn global_allows_up_to_limit() {
    let rl = RateLimiter::new(small_config());
    let now = Instant::now();

    // Distinct sessions so the per-session limit never trips first.
    for i in 0..5 {
        assert!(rl.check_and_record_at(&format!("s{i}"), now).is_ok());
    }
    let err = rl.check_and_record_at("fresh", now).unwrap_err();
    assert!(matches!(err, RateLimitError::GlobalExceeded { limit: 5, .. }));
    assert_eq!(err.error_code(), "E_RATE_LIMIT_GLOBAL");
    assert!(err.retryable());
}

#[test]
fn window_expiry_allows_new_requests() {
    let rl = RateLimiter::new(small_config());
    let start = Instant::now();

    for _ in 0..3 {
        rl.check_and_record_at("u1", start).unwrap();
    }
    assert!(rl.check_and_record_at("u1", start).is_err());

    let after_window = start + Duration::from_secs(60) + Duration::from_millis(1);
    assert!(rl.check_and_record_at("u1", after_window).is_ok());
}

#[test]
fn distinct_sessions_do_not_interfere() {
    let rl = RateLimiter::new(small_config());
    let now = Instant::now();

    for _ in 0..3 {
        rl.check_and_record_at("a", now).unwrap();
    }
    assert!(rl.check_and_record_at("a", now).is_err());
    assert!(rl.check_and_record_at("b", now).is_ok());
}

#[test]
fn rejected_request_is_not_recorded() {
    let rl = RateLimiter::new(small_config());
    let start = Instant::now();
    for _ in 0..3 {
        rl.check_and_record_at("u1", start).unwrap();
    }
    for _ in 0..10 {
        assert!(rl.check_and_record_at("u1", start).is_err());
    }
    // Global only saw the three accepted requests.
    assert!(rl.check_and_record_at("u2", start).is_ok());
    assert!(rl.check_and_record_at("u3", start).is_ok());
}

#[test]
fn idle_sessions_are_forgotten() {
    let rl = RateLimiter::new(small_config());
    let start = Instant::now();
    rl.check_and_record_at("old", start).unwrap();
    assert_eq!(rl.tracked_sessions(), 1);

    let later = start + Duration::from_secs(61);
    rl.check_and_record_at("new", later).unwrap();
    assert_eq!(rl.tracked_sessions(), 1);
}

#[test]
fn default_config_never_limits() {
    let rl = RateLimiter::default();
    let now = Instant::now();
    for _ in 0..500 {
        assert!(rl.check_and_record_at("u1", now).is_ok());
    }
    assert_eq!(rl.tracked_sessions(), 0);
}

#[test]
fn zero_limit_disables_only_that_check() {
    let rl = RateLimiter::new(RateLimitConfig { per_session_limit: 0, ..small_config() });
    let now = Instant::now();
    for _ in 0..5 {
        rl.check_and_record_at("u1", now).unwrap();
    }
    assert!(matches!(
        rl.check_and_record_at("u1", now),
        Err(RateLimitError::GlobalExceeded { limit: 5, .. })
    ));
}
