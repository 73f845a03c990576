//! Sliding-window rate limiting for REST requests.
//!
//! Each `RateLimiter` enforces one `(duration, max_count)` rule by keeping
//! the start times of the last `max_count` calls. When the window is full
//! the caller reserves the slot that frees up next and sleeps until then,
//! so at most `max_count` calls start inside any trailing `duration`.
//!
//! `CompositeRateLimiter` stacks several windows (e.g. 1200/min sustained
//! plus 100/s burst) and waits on each of them in turn.

use crate::error::{RestError, RestResult};
use marketsync_telemetry::Metrics;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One sliding-window rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub duration: Duration,
    pub max_count: u32,
}

impl RateLimitRule {
    /// Create a rule. `max_count` and `duration` must be non-zero.
    pub fn new(duration: Duration, max_count: u32) -> RestResult<Self> {
        if max_count == 0 {
            return Err(RestError::InvalidRateLimit(format!(
                "max_count must be positive for a {} window",
                window_label(duration)
            )));
        }
        if duration.is_zero() {
            return Err(RestError::InvalidRateLimit(
                "window duration must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            duration,
            max_count,
        })
    }
}

/// Human-readable window label used in logs and metrics ("1s", "60s", "500ms").
pub fn window_label(duration: Duration) -> String {
    if duration.subsec_millis() == 0 && duration.as_secs() > 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[derive(Debug)]
struct Window {
    rule: RateLimitRule,
    /// Call-start times, oldest first. May hold reserved (future) starts.
    starts: VecDeque<Instant>,
}

impl Window {
    fn new(rule: RateLimitRule) -> Self {
        Self {
            rule,
            starts: VecDeque::with_capacity(rule.max_count as usize),
        }
    }

    /// Reserve one call-start at or after `now`, returning how long to wait.
    fn reserve_one(&mut self, now: Instant) -> Duration {
        if self.starts.len() < self.rule.max_count as usize {
            self.starts.push_back(now);
            return Duration::ZERO;
        }

        let Some(oldest) = self.starts.pop_front() else {
            self.starts.push_back(now);
            return Duration::ZERO;
        };

        let free_at = oldest + self.rule.duration;
        if free_at > now {
            self.starts.push_back(free_at);
            free_at - now
        } else {
            self.starts.push_back(now);
            Duration::ZERO
        }
    }
}

/// Single-rule sliding-window throttle.
///
/// Safe to share across tasks; the timestamp queue sits behind one mutex
/// that is never held across an await.
#[derive(Debug)]
pub struct RateLimiter {
    window: Mutex<Window>,
}

impl RateLimiter {
    /// Create a limiter enforcing `rule`.
    pub fn new(rule: RateLimitRule) -> Self {
        Self {
            window: Mutex::new(Window::new(rule)),
        }
    }

    /// Replace the enforced rule.
    ///
    /// Shrinking `max_count` keeps only the most recent call-starts.
    pub fn configure(&self, duration: Duration, max_count: u32) -> RestResult<()> {
        let rule = RateLimitRule::new(duration, max_count)?;
        let mut window = self.window.lock();
        window.rule = rule;
        while window.starts.len() > max_count as usize {
            window.starts.pop_front();
        }
        Ok(())
    }

    /// Currently enforced rule.
    pub fn rule(&self) -> RateLimitRule {
        self.window.lock().rule
    }

    /// Number of call-starts (including reservations) inside the trailing window.
    pub fn current_count(&self) -> usize {
        let now = Instant::now();
        let window = self.window.lock();
        let duration = window.rule.duration;
        window
            .starts
            .iter()
            .filter(|&&start| start + duration > now)
            .count()
    }

    /// Reserve `cost` call-starts at `now` and return the wait before the
    /// last of them may begin. A cost of zero counts as one.
    pub fn reserve_at(&self, cost: u32, now: Instant) -> Duration {
        let mut window = self.window.lock();
        (0..cost.max(1))
            .map(|_| window.reserve_one(now))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    /// Suspend the caller until the request may start.
    ///
    /// Returns the time waited. Cancellation aborts the wait with
    /// `RestError::Cancelled`; the reserved slot is not returned.
    pub async fn delay(&self, cost: u32, cancel: &CancellationToken) -> RestResult<Duration> {
        if cancel.is_cancelled() {
            return Err(RestError::Cancelled);
        }

        let wait = self.reserve_at(cost, Instant::now());
        if wait.is_zero() {
            return Ok(wait);
        }

        let label = window_label(self.rule().duration);
        debug!(window = %label, delay_ms = wait.as_millis() as u64, cost, "Rate limit delay");
        Metrics::rate_limit_delay(&label, wait.as_secs_f64() * 1000.0);

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(RestError::Cancelled),
            () = tokio::time::sleep(wait) => Ok(wait),
        }
    }

    /// Forget all recorded call-starts.
    pub fn reset(&self) {
        self.window.lock().starts.clear();
    }
}

/// Several sliding windows keyed by duration, applied one after another.
#[derive(Debug, Default)]
pub struct CompositeRateLimiter {
    limiters: Mutex<BTreeMap<Duration, Arc<RateLimiter>>>,
}

impl CompositeRateLimiter {
    /// Create an empty composite (no throttling).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a composite from a set of rules.
    pub fn with_rules(rules: impl IntoIterator<Item = RateLimitRule>) -> Self {
        let composite = Self::new();
        {
            let mut limiters = composite.limiters.lock();
            for rule in rules {
                limiters.insert(rule.duration, Arc::new(RateLimiter::new(rule)));
            }
        }
        composite
    }

    /// Set, update or remove the rule for `duration`.
    ///
    /// A `count` of zero removes the window; an existing window is updated
    /// in place so its recorded call-starts survive.
    pub fn configure(&self, duration: Duration, count: u32) -> RestResult<()> {
        if count == 0 {
            if self.limiters.lock().remove(&duration).is_some() {
                debug!(window = %window_label(duration), "Rate limit window removed");
            }
            return Ok(());
        }

        let rule = RateLimitRule::new(duration, count)?;
        let existing = {
            let mut limiters = self.limiters.lock();
            match limiters.get(&duration) {
                Some(limiter) => Some(Arc::clone(limiter)),
                None => {
                    limiters.insert(duration, Arc::new(RateLimiter::new(rule)));
                    None
                }
            }
        };

        if let Some(limiter) = existing {
            limiter.configure(duration, count)?;
        }
        debug!(window = %window_label(duration), max_count = count, "Rate limit window configured");
        Ok(())
    }

    /// Active rules, shortest window first.
    pub fn rules(&self) -> Vec<RateLimitRule> {
        self.limiters.lock().values().map(|l| l.rule()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.lock().is_empty()
    }

    /// Wait on every configured window in turn.
    ///
    /// The total wait is the sum of the individual waits, so a burst rule
    /// and a sustained rule are both honoured.
    pub async fn delay(&self, cost: u32, cancel: &CancellationToken) -> RestResult<Duration> {
        let limiters: Vec<Arc<RateLimiter>> = self.limiters.lock().values().cloned().collect();

        let mut total = Duration::ZERO;
        for limiter in limiters {
            total += limiter.delay(cost, cancel).await?;
        }
        Ok(total)
    }
}
