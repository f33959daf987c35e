use chrono::{DateTime, Utc};

/// Time source for everything that reasons about billing periods. Injected so
/// rollover behavior can be tested at fixed instants.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
