//! Language-model text completion interface.
//!
//! The contradiction detector sends one prompt and reads back free-form
//! text. Concrete providers live in the `ragline` app crate.

use anyhow::Result;
use async_trait::async_trait;

/// A text-completion backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send `prompt` to `model` and return the raw response text.
    async fn complete(&self, prompt: &str, model: &str) -> Result<String>;
}
