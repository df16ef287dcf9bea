use crate::config::RateLimitsConfig;
use crate::observability::metrics;
use crate::types::SourceTag;
use rand::Rng;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// At most `max_calls` call starts inside any sliding `window_secs` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    pub max_calls: u32,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max_calls,
            window_secs: window.as_secs().max(1),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Sliding-window limiter shared by every caller of one source.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    source: SourceTag,
    config: RateLimitConfig,
    // start times of calls still inside the window, oldest first
    starts: Mutex<VecDeque<Instant>>,
    max_jitter: Duration,
}

impl RateLimiter {
    pub fn new(source: SourceTag, config: RateLimitConfig) -> Self {
        Self::with_jitter(source, config, Duration::from_millis(250))
    }

    /// Random delay added on top of each computed wait so concurrent waiters
    /// do not re-check at the same instant. Zero disables it.
    pub fn with_jitter(source: SourceTag, config: RateLimitConfig, max_jitter: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                starts: Mutex::new(VecDeque::new()),
                max_jitter,
            }),
        }
    }

    pub fn source(&self) -> SourceTag {
        self.inner.source
    }

    pub fn config(&self) -> RateLimitConfig {
        self.inner.config
    }

    /// Wait until a call may start, then record its start time.
    pub async fn acquire(&self) {
        let window = self.inner.config.window();
        let max_calls = self.inner.config.max_calls.max(1) as usize;
        let requested_at = Instant::now();

        loop {
            let mut starts = self.inner.starts.lock().await;
            let now = Instant::now();
            while let Some(oldest) = starts.front() {
                if now.duration_since(*oldest) >= window {
                    starts.pop_front();
                } else {
                    break;
                }
            }

            if starts.len() < max_calls {
                starts.push_back(now);
                let waited = now.duration_since(requested_at);
                if !waited.is_zero() {
                    tracing::debug!(
                        source = %self.inner.source,
                        waited_ms = waited.as_millis() as u64,
                        "rate limiter released call"
                    );
                }
                metrics::sources::rate_limit_wait(self.inner.source, waited.as_secs_f64());
                return;
            }

            // The oldest start leaves the window first
            let wait = starts
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            drop(starts);
            tokio::time::sleep(wait + self.jitter()).await;
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.inner.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// One limiter per source, shared by every client that talks to it.
#[derive(Debug, Clone, Default)]
pub struct SourceLimiters {
    limiters: HashMap<SourceTag, RateLimiter>,
}

impl SourceLimiters {
    pub fn from_config(config: &RateLimitsConfig) -> Self {
        let mut limiters = HashMap::new();
        for source in [SourceTag::Linkedin, SourceTag::Diffbot, SourceTag::Perplexity] {
            if let Some(limit) = config.for_source(source) {
                limiters.insert(source, RateLimiter::new(source, limit));
            }
        }
        Self { limiters }
    }

    pub fn insert(&mut self, limiter: RateLimiter) {
        self.limiters.insert(limiter.source(), limiter);
    }

    pub fn get(&self, source: SourceTag) -> Option<RateLimiter> {
        self.limiters.get(&source).cloned()
    }

    /// Wait for a slot on `source`. Sources without a limiter are not throttled.
    pub async fn acquire(&self, source: SourceTag) {
        if let Some(limiter) = self.limiters.get(&source) {
            limiter.acquire().await;
        }
    }
}
