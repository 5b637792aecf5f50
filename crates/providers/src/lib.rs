//! LLM provider registry for Ava.
//!
//! Adapters for OpenAI-compatible and Anthropic backends, an offline canned
//! provider, per-intent system preambles, and the health-aware failover
//! loop that turns a conversation context into an assistant reply.

pub mod anthropic;
pub mod canned;
pub mod health;
pub mod openai_compat;
pub mod preamble;
pub mod registry;
pub mod traits;
pub(crate) mod util;

// Re-exports for convenience.
pub use health::HealthPolicy;
pub use registry::{needs_long_context, Attempt, GenerateRequest, GenerateResponse, ProviderRegistry};
pub use traits::{ChatMessage, ChatRequest, ChatResponse, ChatRole, LlmProvider};
