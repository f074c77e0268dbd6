//! Rate limiting logic and state management.

mod clock;
mod entry;
mod limiter;
mod quota;
mod store;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::RateLimitEntry;
pub use limiter::{Decision, RateLimiter};
pub use quota::{Quota, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_MS, MAX_WINDOW_MS};
pub use store::{MemoryStore, ShardedStore, Store};
pub use sweeper::{Sweeper, DEFAULT_SWEEP_INTERVAL, MAX_SWEEP_INTERVAL};
