use once_cell::sync::Lazy;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Seconds since the process-wide monotonic epoch. Never decreases.
pub fn monotonic() -> f64 {
    EPOCH.elapsed().as_secs_f64()
}

/// Wall-clock seconds since the Unix epoch.
pub fn timestamp_seconds() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
