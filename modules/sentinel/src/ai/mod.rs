//! AI adapter: external model client, prompt templates, and the safety rails
//! around both.

pub mod client;
pub mod prompts;

pub use client::{AiClient, AiError, ClassificationContext, AI_SERVICE_BREAKER};
pub use prompts::PromptLoader;
