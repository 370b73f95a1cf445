//! The reasoning-call capability consumed by railmind agents.
//!
//! Agents talk to an [`LlmClient`]. Production builds use [`OpenAiClient`]
//! (Groq, Ollama and OpenAI all speak the same chat-completions dialect),
//! wrapped by [`build_llm_client`] in a retrying and a concurrency-limiting
//! layer.

pub mod client;
pub mod config;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod openai;
pub mod retry;

pub use client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
pub use config::{LlmConfig, Provider, SemaphoredClient, build_llm_client};
#[cfg(any(test, feature = "mock"))]
pub use mock::ScriptedClient;
pub use openai::OpenAiClient;
pub use retry::{RetryConfig, RetryingClient};
