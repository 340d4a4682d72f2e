//! Steward Gateway - HTTP surface for the agentic decision engine
//!
//! Exposes three logical entry points over JSON/HTTP (`/agent-chat`,
//! `/agent-heartbeat`, `/agent-learning`) plus health and status, wiring
//! the LLM collaborator, the embedding provider and the business backend
//! into the core engine.

pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod session;
pub mod tools;

pub use config::{
    BackendSettings, EmbeddingSettings, GatewayConfig, HeartbeatSettings, LlmSettings,
    RetrySettings,
};
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayState};
pub use llm::{ChatMessage, HttpLlmClient, LlmClient, LlmRequest, LlmResponse, RetryingClient, ToolCall};
pub use session::{Conversation, ConversationStore};
pub use tools::HttpToolExecutor;

/// Default listen host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8787;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
