//! Token bucket, circuit breaker, retry policy, and the `ResilientCaller`
//! that composes them. One caller is instantiated per external service and
//! shared process-wide.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, warn};

use seismonet_models::{SeismoError, SeismoResult};

/// Retry subsection (`<service>.retry.*`).
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_retry_max")]
    pub max: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max: default_retry_max(),
            backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Breaker subsection (`<service>.breaker.*`).
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSection {
    #[serde(default = "default_breaker_threshold")]
    pub threshold: u32,
    #[serde(default = "default_breaker_cool_down_ms")]
    pub cool_down_ms: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            threshold: default_breaker_threshold(),
            cool_down_ms: default_breaker_cool_down_ms(),
        }
    }
}

/// Per-service client configuration (the `catalog.*` / `waveform.*` keys).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub breaker: BreakerSection,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

fn default_rate_limit_rps() -> f64 {
    5.0
}
fn default_burst() -> u32 {
    5
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_retry_max() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_cool_down_ms() -> u64 {
    10_000
}
fn default_cache_ttl_ms() -> u64 {
    300_000
}

impl ClientConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            rate_limit_rps: default_rate_limit_rps(),
            burst: default_burst(),
            timeout_ms: default_timeout_ms(),
            retry: RetrySection::default(),
            breaker: BreakerSection::default(),
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// =============================================================================
// TOKEN BUCKET
// =============================================================================

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: tokens accrue at `rate_rps` up to `burst`. A request takes
/// one token or waits cooperatively; waiting past the deadline fails with
/// `RateLimited`.
pub struct TokenBucket {
    rate_rps: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate_rps: f64, burst: u32) -> Self {
        Self {
            rate_rps: rate_rps.max(0.001),
            burst: burst.max(1) as f64,
            state: Mutex::new(BucketState {
                tokens: burst.max(1) as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting until `deadline` if the bucket is dry.
    pub async fn acquire(&self, deadline: Instant) -> SeismoResult<()> {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("bucket poisoned");
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate_rps).min(self.burst);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate_rps)
            };

            if Instant::now() + wait > deadline {
                metrics::counter!("connector_rate_limited_total").increment(1);
                return Err(SeismoError::RateLimited { retry_after: wait });
            }
            sleep(wait).await;
        }
    }
}

// =============================================================================
// CIRCUIT BREAKER
// =============================================================================

enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

/// Fail-fast gate: opens after `threshold` consecutive failures, admits one
/// probe call after `cool_down`, and closes when the probe succeeds.
pub struct CircuitBreaker {
    threshold: u32,
    cool_down: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cool_down: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cool_down,
            state: Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Admission check before an outbound attempt.
    pub fn check(&self) -> SeismoResult<()> {
        let mut state = self.state.lock().expect("breaker poisoned");
        match *state {
            BreakerState::Closed { .. } => Ok(()),
            BreakerState::Open { since } => {
                if since.elapsed() >= self.cool_down {
                    *state = BreakerState::HalfOpen;
                    debug!("circuit breaker half-open, admitting probe");
                    Ok(())
                } else {
                    Err(SeismoError::Unavailable("circuit breaker open".into()))
                }
            }
            // One probe is in flight; fail fast until it reports.
            BreakerState::HalfOpen => {
                Err(SeismoError::Unavailable("circuit breaker probing".into()))
            }
        }
    }

    pub fn on_success(&self) {
        let mut state = self.state.lock().expect("breaker poisoned");
        if matches!(*state, BreakerState::HalfOpen | BreakerState::Open { .. }) {
            debug!("circuit breaker closed");
        }
        *state = BreakerState::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn on_failure(&self) {
        let mut state = self.state.lock().expect("breaker poisoned");
        match *state {
            BreakerState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.threshold {
                    warn!(failures, "circuit breaker opened");
                    metrics::counter!("connector_breaker_open_total").increment(1);
                    *state = BreakerState::Open {
                        since: Instant::now(),
                    };
                } else {
                    *state = BreakerState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            BreakerState::HalfOpen => {
                warn!("circuit breaker probe failed, reopening");
                *state = BreakerState::Open {
                    since: Instant::now(),
                };
            }
            BreakerState::Open { .. } => {}
        }
    }
}

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Bounded exponential backoff with +/-25% jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
            max_backoff: Duration::from_secs(60),
        }
    }

    /// Backoff before retry attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff);
        let jitter = rand::thread_rng().gen_range(0.75..1.25);
        exp.mul_f64(jitter)
    }
}

// =============================================================================
// RESILIENT CALLER
// =============================================================================

/// Composition of bucket, breaker, and retry, instantiated once per
/// external service. `call` drives an idempotent request closure through
/// the full policy under a single deadline.
pub struct ResilientCaller {
    service: &'static str,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ResilientCaller {
    pub fn new(service: &'static str, config: &ClientConfig) -> Self {
        Self {
            service,
            bucket: TokenBucket::new(config.rate_limit_rps, config.burst),
            breaker: CircuitBreaker::new(
                config.breaker.threshold,
                Duration::from_millis(config.breaker.cool_down_ms),
            ),
            retry: RetryPolicy::new(config.retry.max, Duration::from_millis(config.retry.backoff_ms)),
            timeout: config.timeout(),
        }
    }

    pub fn default_deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    /// Run `op` under the resilience policy. `op` must be idempotent: it
    /// may execute up to `retry.max_retries + 1` times. Retries respect the
    /// bucket; a 429-style `RateLimited` from `op` honors its `retry_after`.
    pub async fn call<T, F, Fut>(&self, deadline: Instant, op: F) -> SeismoResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SeismoResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.breaker.check()?;
            self.bucket.acquire(deadline).await?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SeismoError::DeadlineExceeded);
            }

            let result = match tokio::time::timeout(remaining, op()).await {
                Ok(r) => r,
                Err(_) => Err(SeismoError::DeadlineExceeded),
            };

            match result {
                Ok(value) => {
                    self.breaker.on_success();
                    return Ok(value);
                }
                Err(SeismoError::Transient(msg)) => {
                    self.breaker.on_failure();
                    metrics::counter!("connector_transient_total", "service" => self.service)
                        .increment(1);
                    if attempt >= self.retry.max_retries {
                        return Err(SeismoError::Transient(msg));
                    }
                    let backoff = self.retry.backoff(attempt);
                    if Instant::now() + backoff > deadline {
                        return Err(SeismoError::DeadlineExceeded);
                    }
                    debug!(service = self.service, attempt, ?backoff, "retrying: {}", msg);
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(SeismoError::RateLimited { retry_after }) => {
                    // Upstream 429: honor Retry-After without charging the
                    // breaker. Still bounded by the caller's deadline.
                    if Instant::now() + retry_after > deadline {
                        return Err(SeismoError::RateLimited { retry_after });
                    }
                    sleep(retry_after).await;
                }
                Err(SeismoError::DeadlineExceeded) => {
                    self.breaker.on_failure();
                    return Err(SeismoError::DeadlineExceeded);
                }
                // Validation, NotFound, and the rest are permanent for this
                // request; the breaker only counts infrastructure failures.
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn bucket_grants_burst_then_waits() {
        let bucket = TokenBucket::new(100.0, 3);
        let deadline = Instant::now() + Duration::from_secs(1);
        let start = Instant::now();
        for _ in 0..3 {
            bucket.acquire(deadline).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(5));
        // Fourth token needs a ~10 ms refill.
        bucket.acquire(deadline).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(8));
    }

    #[tokio::test]
    async fn bucket_rejects_past_deadline() {
        let bucket = TokenBucket::new(0.5, 1);
        let deadline = Instant::now() + Duration::from_millis(20);
        bucket.acquire(deadline).await.unwrap();
        let err = bucket.acquire(deadline).await.unwrap_err();
        assert!(matches!(err, SeismoError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn breaker_opens_then_probes_then_closes() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(40));
        for _ in 0..3 {
            assert!(breaker.check().is_ok());
            breaker.on_failure();
        }
        assert!(matches!(
            breaker.check(),
            Err(SeismoError::Unavailable(_))
        ));

        sleep(Duration::from_millis(50)).await;
        // Cool-down elapsed: one probe admitted, others fail fast.
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_err());
        breaker.on_success();
        assert!(breaker.check().is_ok());
    }

    #[tokio::test]
    async fn caller_retries_transient_then_succeeds() {
        let config = ClientConfig {
            retry: RetrySection {
                backoff_ms: 5,
                ..RetrySection::default()
            },
            ..ClientConfig::with_base_url("http://unused")
        };
        let caller = ResilientCaller::new("test", &config);
        let attempts = AtomicU32::new(0);

        let result = caller
            .call(Instant::now() + Duration::from_secs(2), || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SeismoError::Transient("flaky".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn caller_does_not_retry_validation() {
        let config = ClientConfig::with_base_url("http://unused");
        let caller = ResilientCaller::new("test", &config);
        let attempts = AtomicU32::new(0);

        let result: SeismoResult<()> = caller
            .call(Instant::now() + Duration::from_secs(1), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(SeismoError::Validation("bad request".into())) }
            })
            .await;

        assert!(matches!(result, Err(SeismoError::Validation(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_transient() {
        let config = ClientConfig {
            retry: RetrySection {
                max: 2,
                backoff_ms: 2,
            },
            ..ClientConfig::with_base_url("http://unused")
        };
        let caller = ResilientCaller::new("test", &config);
        let attempts = AtomicU32::new(0);

        let result: SeismoResult<()> = caller
            .call(Instant::now() + Duration::from_secs(2), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(SeismoError::Transient("down".into())) }
            })
            .await;

        assert!(matches!(result, Err(SeismoError::Transient(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
