mod http_client;
mod providers;

pub use providers::anthropic_like::AnthropicLikeProvider;
pub use providers::gemini_like::GeminiLikeProvider;
pub use providers::local::LocalProvider;
pub use providers::openai_like::OpenAiLikeProvider;
