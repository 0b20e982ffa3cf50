use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

pub const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_SHIFT: usize = 5;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);
static JITTER_SEED: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Bounded retry schedule applied before a turn stream starts.
pub struct RetryPolicy {
    pub max_retries: usize,
    /// Total wall-clock allowance for retries; `0` disables the budget.
    pub budget_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            budget_ms: 0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`, never shorter than `retry-after`.
    pub fn delay_ms(&self, attempt: usize, retry_after_ms: Option<u64>) -> u64 {
        let backoff = if self.jitter {
            jittered_backoff_ms(attempt)
        } else {
            backoff_ms(attempt)
        };
        retry_after_ms.map_or(backoff, |floor| backoff.max(floor))
    }

    pub fn allows(&self, attempt: usize, elapsed_ms: u64, delay_ms: u64) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        self.budget_ms == 0 || elapsed_ms.saturating_add(delay_ms) <= self.budget_ms
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 425 | 429) || status >= 500
}

/// Only failures that happen before any response byte arrived are retried.
pub fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

pub fn backoff_ms(attempt: usize) -> u64 {
    BASE_BACKOFF_MS.saturating_mul(1_u64 << attempt.min(MAX_BACKOFF_SHIFT))
}

pub fn jittered_backoff_ms(attempt: usize) -> u64 {
    let base = backoff_ms(attempt);
    let floor = base / 2;
    let span = base - floor;
    if span == 0 {
        return base;
    }
    let seed = JITTER_SEED.fetch_add(1, Ordering::Relaxed);
    let mixed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(23) ^ 0x5851_F42D_4C95_7F2D;
    floor + mixed % (span + 1)
}

/// Reads `retry-after` as delta-seconds or an HTTP date.
pub fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1_000));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let remaining = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(u64::try_from(remaining).unwrap_or(0))
}

pub fn new_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let sequence = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("chatloop-{millis}-{sequence}")
}
