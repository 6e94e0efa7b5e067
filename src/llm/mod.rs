//! LLM integration for labforge.
//!
//! Report content comes from any OpenAI-compatible chat-completions endpoint.
//! The pipeline only depends on the [`LlmProvider`] trait; tests substitute
//! scripted providers through [`ProviderFactory`].
//!
//! ```ignore
//! use labforge::llm::{Credentials, GenerationRequest, LlmProvider, Message, OpenAiCompatClient};
//!
//! let creds = Credentials::new("https://api.openai.com/v1", key, "gpt-4o-mini");
//! let client = OpenAiCompatClient::new(&creds, Duration::from_secs(60))?;
//! let response = client
//!     .generate(GenerationRequest::new("", vec![Message::user("ping")]))
//!     .await?;
//! ```

pub mod client;

pub use client::{
    completions_endpoint, Choice, Credentials, GenerationRequest, GenerationResponse,
    HttpProviderFactory, LlmProvider, Message, OpenAiCompatClient, ProviderFactory, Usage,
};
