use chrono::DateTime;
use chrono::Utc;
#[cfg(test)]
use mockall::automock;

/// Wall-clock source. Id generation and logical expiry read time through it so
/// tests can pin or move the clock.
#[cfg_attr(test, automock)]
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// return millisecond
pub(crate) fn get_now_as_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Calendar day key used to scope per-day counters, e.g. `2024:05:17`.
pub(crate) fn day_key(now: &DateTime<Utc>) -> String {
    now.format("%Y:%m:%d").to_string()
}
