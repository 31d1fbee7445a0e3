// Monotonic nanosecond clock

use std::sync::OnceLock;
use std::time::Instant;

/// Global anchor point for converting Instant to nanoseconds
static EPOCH: OnceLock<Instant> = OnceLock::new();

fn get_epoch() -> &'static Instant {
    EPOCH.get_or_init(Instant::now)
}

/// Nanosecond-precision timestamp type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Nanos(pub u64);

impl Nanos {
    /// Create a new Nanos value
    #[inline]
    pub const fn new(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Get the raw nanosecond value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::ops::Sub for Nanos {
    type Output = u64;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

impl From<u64> for Nanos {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Nanos> for u64 {
    #[inline]
    fn from(value: Nanos) -> Self {
        value.0
    }
}

/// Get current time in nanoseconds since an arbitrary epoch.
/// Uses std::time::Instant for monotonic time.
#[inline]
pub fn now_nanos() -> Nanos {
    let epoch = get_epoch();
    let elapsed = Instant::now().duration_since(*epoch);
    Nanos(elapsed.as_nanos() as u64)
}

/// Calculate elapsed nanoseconds since the given start time
#[inline]
pub fn nanos_since(start: Nanos) -> u64 {
    now_nanos().0.saturating_sub(start.0)
}
