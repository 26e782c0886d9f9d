//! In-memory rate limiting for login codes and AI narratives.
//!
//! DESIGN
//! ======
//! Sliding-window counters backed by `HashMap<String, VecDeque<Instant>>`,
//! keyed by a caller-chosen string such as `login:<email>` or
//! `narrative:<tenant_id>`. Each call site passes the [`Window`] it wants
//! enforced, so one limiter serves every bucket.
//!
//! Narrative calls additionally draw on a per-key token budget. Budgeting
//! uses reservations so concurrent requests cannot oversubscribe the quota;
//! reservations are settled or released right after each LLM call.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::env_parse;

const DEFAULT_TOKEN_BUDGET: u64 = 50_000;
const DEFAULT_TOKEN_WINDOW_SECS: u64 = 3600;

/// A request-count limit over a sliding period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: usize,
    pub period: Duration,
}

/// Login-code requests per email.
pub const LOGIN_CODE_WINDOW: Window = Window { limit: 5, period: Duration::from_secs(15 * 60) };

/// Narrative generations per tenant.
pub const NARRATIVE_WINDOW: Window = Window { limit: 10, period: Duration::from_secs(60) };

#[derive(Debug, Clone, Copy)]
struct TokenBudget {
    budget: u64,
    window: Duration,
}

impl TokenBudget {
    fn from_env() -> Self {
        Self {
            budget: env_parse("RATE_LIMIT_TOKEN_BUDGET", DEFAULT_TOKEN_BUDGET),
            window: Duration::from_secs(env_parse("RATE_LIMIT_TOKEN_WINDOW_SECS", DEFAULT_TOKEN_WINDOW_SECS)),
        }
    }
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit exceeded (max {limit} requests/{window_secs}s)")]
    Exceeded { limit: usize, window_secs: u64 },
    #[error("token budget exceeded (max {budget} tokens/{window_secs}s)")]
    TokenBudgetExceeded { budget: u64, window_secs: u64 },
}

impl crate::error::ErrorCode for RateLimitError {
    fn error_code(&self) -> &'static str {
        "E_RATE_LIMITED"
    }

    fn status(&self) -> axum::http::StatusCode {
        axum::http::StatusCode::TOO_MANY_REQUESTS
    }

    fn retryable(&self) -> bool {
        true
    }
}

crate::error::impl_api_error!(RateLimitError);

// =============================================================================
// RATE LIMITER
// =============================================================================

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
    tokens: TokenBudget,
}

#[derive(Default)]
struct RateLimiterInner {
    /// Request timestamps per key.
    requests: HashMap<String, VecDeque<Instant>>,
    /// Settled token usage per key: (timestamp, tokens).
    token_usage: HashMap<String, VecDeque<(Instant, u64)>>,
    /// In-flight token reservations per key: (timestamp, tokens).
    token_reservations: HashMap<String, VecDeque<(Instant, u64)>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(RateLimiterInner::default())), tokens: TokenBudget::from_env() }
    }

    /// Check the window for `key`, then record the request.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::Exceeded`] when the window is full; nothing is recorded.
    pub fn check_and_record(&self, key: &str, window: Window) -> Result<(), RateLimitError> {
        self.check_and_record_at(key, window, Instant::now())
    }

    fn check_and_record_at(&self, key: &str, window: Window, now: Instant) -> Result<(), RateLimitError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let deque = inner.requests.entry(key.to_owned()).or_default();
        prune_window(deque, now, window.period);
        if deque.len() >= window.limit {
            return Err(RateLimitError::Exceeded { limit: window.limit, window_secs: window.period.as_secs() });
        }
        deque.push_back(now);
        Ok(())
    }

    /// Count a request against `window` and reserve `reserved` tokens, or
    /// do neither. A request refused by the token budget keeps its slot.
    ///
    /// Both checks happen under one lock so concurrent requests see each
    /// other's in-flight reservations.
    ///
    /// # Errors
    ///
    /// [`RateLimitError::Exceeded`] or [`RateLimitError::TokenBudgetExceeded`].
    pub fn admit(&self, key: &str, window: Window, reserved: u64) -> Result<(), RateLimitError> {
        self.admit_at(key, window, reserved, Instant::now())
    }

    fn admit_at(&self, key: &str, window: Window, reserved: u64, now: Instant) -> Result<(), RateLimitError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let deque = inner.requests.entry(key.to_owned()).or_default();
        prune_window(deque, now, window.period);
        if deque.len() >= window.limit {
            return Err(RateLimitError::Exceeded { limit: window.limit, window_secs: window.period.as_secs() });
        }
        self.check_tokens(&mut inner, key, reserved, now)?;

        inner.requests.entry(key.to_owned()).or_default().push_back(now);
        inner.push_reservation(key, reserved, now);
        Ok(())
    }

    fn check_tokens(&self, inner: &mut RateLimiterInner, key: &str, reserved: u64, now: Instant) -> Result<(), RateLimitError> {
        let budget = self.tokens;

        let used: u64 = {
            let deque = inner.token_usage.entry(key.to_owned()).or_default();
            prune_token_window(deque, now, budget.window);
            deque.iter().map(|(_, t)| t).sum()
        };
        let in_flight: u64 = {
            let deque = inner.token_reservations.entry(key.to_owned()).or_default();
            prune_token_window(deque, now, budget.window);
            deque.iter().map(|(_, t)| t).sum()
        };

        let exceeded = || RateLimitError::TokenBudgetExceeded {
            budget: budget.budget,
            window_secs: budget.window.as_secs(),
        };
        let projected = used
            .checked_add(in_flight)
            .and_then(|n| n.checked_add(reserved))
            .ok_or_else(exceeded)?;
        let over = if reserved == 0 { projected >= budget.budget } else { projected > budget.budget };
        if over {
            return Err(exceeded());
        }
        Ok(())
    }

    /// Settle a reservation with the tokens actually used.
    pub fn record_tokens(&self, key: &str, used: u64, reserved: u64) {
        self.record_tokens_at(key, used, reserved, Instant::now());
    }

    fn record_tokens_at(&self, key: &str, used: u64, reserved: u64, now: Instant) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let window = self.tokens.window;
        {
            let deque = inner.token_reservations.entry(key.to_owned()).or_default();
            prune_token_window(deque, now, window);
            consume_reserved(deque, reserved);
        }
        let deque = inner.token_usage.entry(key.to_owned()).or_default();
        prune_token_window(deque, now, window);
        deque.push_back((now, used));
    }

    /// Release a reservation for a failed LLM call.
    pub fn release_tokens(&self, key: &str, reserved: u64) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let window = self.tokens.window;
        let deque = inner.token_reservations.entry(key.to_owned()).or_default();
        prune_token_window(deque, Instant::now(), window);
        consume_reserved(deque, reserved);
    }
}

impl RateLimiterInner {
    fn push_reservation(&mut self, key: &str, reserved: u64, now: Instant) {
        if reserved > 0 {
            self.token_reservations.entry(key.to_owned()).or_default().push_back((now, reserved));
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.duration_since(front) > window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

fn prune_token_window(deque: &mut VecDeque<(Instant, u64)>, now: Instant, window: Duration) {
    while let Some(&(front, _)) = deque.front() {
        if now.duration_since(front) > window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

fn consume_reserved(deque: &mut VecDeque<(Instant, u64)>, mut amount: u64) {
    while amount > 0 {
        let Some((_, front)) = deque.front_mut() else {
            break;
        };
        if *front <= amount {
            amount -= *front;
            deque.pop_front();
        } else {
            *front -= amount;
            break;
        }
    }
}

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
