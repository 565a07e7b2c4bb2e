//! Rate limiting logic and state management.

mod bucket;
mod clock;
mod counter;
mod key;
mod limiter;
mod metrics;
mod table;

pub use bucket::BucketState;
pub use clock::{Clock, MockClock, SystemClock};
pub use counter::{TimeWindow, WindowCounter};
pub use key::BucketKey;
pub use limiter::{Admission, CleanupStats, LimiterGuard, RateLimiter, Usage};
pub use metrics::{Metrics, MetricsSnapshot};
pub use table::BucketTable;
