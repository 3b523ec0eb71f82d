pub mod backoff;
pub mod conn;
pub mod dispatch;
pub mod engine;
pub mod poll;
pub mod sse;

pub use conn::{ConnState, SessionStatus};
pub use dispatch::{execute_action, ActionEffect, ActionKind};
pub use engine::{AlertEngine, EventEngine, InsightEngine, RateEngine};
pub use poll::{PollChannel, PollHandle};
pub use sse::{SseFrame, SseSession, SubscriptionHandle};
