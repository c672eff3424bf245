use chrono::{DateTime, FixedOffset, Offset, Utc};

/// Source of "now" for token ageing. Injected so tier decisions are testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

const BEIJING_OFFSET_SECS: i32 = 8 * 3600;

/// The remote service and its users live in UTC+8.
pub fn beijing(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(BEIJING_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
    now.with_timezone(&offset)
}

pub fn format_beijing(now: DateTime<Utc>) -> String {
    beijing(now).format("%Y-%m-%d %H:%M:%S").to_string()
}
