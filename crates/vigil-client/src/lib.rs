pub mod ai;
pub mod api;
pub mod chat;
pub mod error;

pub use ai::{AiClient, CallState};
pub use api::ApiClient;
pub use chat::ChatSession;
pub use error::{ClientError, Result};
