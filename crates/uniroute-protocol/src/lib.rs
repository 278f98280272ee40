pub mod chat;
pub mod tunnel;

pub use chat::{ChatChoice, ChatMessage, ChatRequest, ChatResponse, ChatUsage};
pub use tunnel::{ControlFrame, RequestId};
