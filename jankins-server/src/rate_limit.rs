// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Per-caller token bucket admission control.

use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained requests per minute
    pub requests_per_minute: u32,
    /// Bucket capacity
    pub burst: u32,
    /// Time between idle-bucket sweeps
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst: 10,
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

/// Token bucket for one caller
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    /// Tokens per second
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            refill_rate,
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one token is available; zero if one already is.
    fn time_until_available(&self) -> Duration {
        if self.tokens >= 1.0 || self.refill_rate <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
    }

    /// Whether the bucket would be full if refilled at `now`.
    fn is_full_at(&self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens + elapsed * self.refill_rate >= self.capacity
    }
}

/// Result of rate limit check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed {
        /// Whole tokens left after this request
        remaining: u32,
    },
    /// Request is rate limited
    RateLimited {
        /// Time to wait before retrying
        retry_after: Duration,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitResult::Allowed { .. } => None,
            RateLimitResult::RateLimited { retry_after } => Some(*retry_after),
        }
    }
}

/// Rate limiter statistics
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub active_buckets: usize,
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

struct LimiterState {
    buckets: HashMap<String, TokenBucket>,
    last_cleanup: Instant,
}

/// Rate limiter using token bucket algorithm
///
/// Buckets are created on first use and swept once they are full and have
/// been idle for twice the cleanup interval.
pub struct RateLimiter {
    config: RateLimitConfig,
    refill_rate: f64,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        info!(
            requests_per_minute = config.requests_per_minute,
            burst = config.burst,
            "Rate limiter initialized"
        );
        Self {
            refill_rate: config.requests_per_minute as f64 / 60.0,
            state: Mutex::new(LimiterState {
                buckets: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
            config,
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.config.requests_per_minute
    }

    /// Admit or reject one request for `identifier`.
    ///
    /// A rejection never consumes a token.
    pub fn check(&self, identifier: &str) -> RateLimitResult {
        let now = Instant::now();
        let mut state = self.state.lock();
        self.sweep(&mut state, now);

        let bucket = state
            .buckets
            .entry(identifier.to_string())
            .or_insert_with(|| TokenBucket::new(self.config.burst, self.refill_rate, now));

        if bucket.try_consume(now) {
            RateLimitResult::Allowed {
                remaining: bucket.tokens.floor() as u32,
            }
        } else {
            let retry_after = bucket.time_until_available();
            warn!(
                identifier = %identifier,
                retry_after_secs = retry_after.as_secs_f64(),
                "Rate limit exceeded"
            );
            RateLimitResult::RateLimited { retry_after }
        }
    }

    fn sweep(&self, state: &mut LimiterState, now: Instant) {
        let interval = self.config.cleanup_interval;
        if now.saturating_duration_since(state.last_cleanup) < interval {
            return;
        }

        let before = state.buckets.len();
        state.buckets.retain(|_, bucket| {
            let idle = now.saturating_duration_since(bucket.last_refill);
            !(bucket.is_full_at(now) && idle > interval * 2)
        });
        let removed = before - state.buckets.len();
        if removed > 0 {
            debug!(removed, "Cleaned up inactive rate limit buckets");
        }
        state.last_cleanup = now;
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().buckets.len()
    }

    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            active_buckets: self.client_count(),
            requests_per_minute: self.config.requests_per_minute,
            burst_size: self.config.burst,
        }
    }
}

/// Caller identity for rate limiting.
///
/// Basic-auth user name first, then the first `X-Forwarded-For` hop, then
/// the socket peer.
pub fn client_identifier(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(user) = basic_auth_user(headers) {
        return format!("user:{}", user);
    }

    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return format!("ip:{}", ip);
    }

    match peer {
        Some(addr) => format!("ip:{}", addr.ip()),
        None => "ip:unknown".to_string(),
    }
}

fn basic_auth_user(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("Authorization")?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let user = credentials.split(':').next()?;
    (!user.is_empty()).then(|| user.to_string())
}
