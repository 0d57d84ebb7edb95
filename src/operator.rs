//! Operator notification channel.
//!
//! Traces to the original logger's Slack-webhook-on-error path
//! (`LoggerHandler.__write_to_slack`), generalized into a trait so a
//! real webhook can be dropped in later without touching sink code.
//! The default implementation only logs, so the crate carries no
//! required external network dependency.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::error;

pub trait OperatorChannel: Send + Sync {
    fn notify(&self, message: &str);
}

/// Logs at error level instead of paging anyone. The default channel.
pub struct LoggingOperatorChannel;

impl OperatorChannel for LoggingOperatorChannel {
    fn notify(&self, message: &str) {
        error!(target: "operator", "{message}");
    }
}

/// Wraps any `OperatorChannel`, dropping notifications that arrive
/// sooner than `period` after the last one that went through. Mirrors
/// the original's 5-minute rate limit on Slack posts.
pub struct RateLimitedChannel<C: OperatorChannel> {
    inner: C,
    period: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl<C: OperatorChannel> RateLimitedChannel<C> {
    pub fn new(inner: C, period: Duration) -> Self {
        Self { inner, period, last_sent: Mutex::new(None) }
    }
}

impl<C: OperatorChannel> OperatorChannel for RateLimitedChannel<C> {
    fn notify(&self, message: &str) {
        let mut last_sent = self.last_sent.lock().unwrap();
        let now = Instant::now();
        if let Some(last) = *last_sent {
            if now.duration_since(last) < self.period {
                return;
            }
        }
        *last_sent = Some(now);
        drop(last_sent);
        self.inner.notify(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingChannel(Arc<AtomicUsize>);
    impl OperatorChannel for CountingChannel {
        fn notify(&self, _message: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn rate_limits_rapid_notifications() {
        let count = Arc::new(AtomicUsize::new(0));
        let channel = RateLimitedChannel::new(CountingChannel(count.clone()), Duration::from_secs(300));
        channel.notify("first");
        channel.notify("second");
        channel.notify("third");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn allows_notification_after_period_elapses() {
        let count = Arc::new(AtomicUsize::new(0));
        let channel = RateLimitedChannel::new(CountingChannel(count.clone()), Duration::from_millis(10));
        channel.notify("first");
        std::thread::sleep(Duration::from_millis(20));
        channel.notify("second");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
