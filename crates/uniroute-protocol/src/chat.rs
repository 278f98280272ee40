//! The unified chat envelope GatewayFront exposes over `/v1/chat` (spec
//! §4.1, §6). This is the one wire shape every provider adapter translates
//! to and from; it is intentionally smaller than a full multi-vendor
//! passthrough format since unary chat is the only supported shape
//! (streaming is a Non-goal).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Rough token estimate used by `CostCalculator::estimate` before an
    /// upstream call returns actual usage: approximately `chars / 4`.
    pub fn estimated_input_tokens(&self) -> u64 {
        let chars: usize = self.messages.iter().map(|m| m.content.len()).sum();
        ((chars as u64) / 4).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChatUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub choices: Vec<ChatChoice>,
    pub usage: ChatUsage,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_chars_over_four() {
        let req = ChatRequest {
            model: "llama2".to_string(),
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: "x".repeat(100),
            }],
            temperature: None,
            max_tokens: None,
        };
        assert_eq!(req.estimated_input_tokens(), 25);
    }

    #[test]
    fn estimate_never_zero() {
        let req = ChatRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: "hi".to_string(),
            }],
            temperature: None,
            max_tokens: None,
        };
        assert_eq!(req.estimated_input_tokens(), 1);
    }
}
