pub mod buffer;
pub mod counters;
pub mod feed;

pub use buffer::{BoundedBuffer, InsertOrder};
pub use counters::{ActionCounts, InsightCounts, SeverityCounts};
pub use feed::{AlertFeed, EventFeed, InsightFeed};

/// Default capacity for every bounded stream view.
pub const DEFAULT_CAPACITY: usize = 100;
