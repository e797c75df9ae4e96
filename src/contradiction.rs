//! Timed contradiction detection over the selected documents.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use ragline_core::contradiction::{build_prompt, parse_response, ContradictionResult};
use ragline_core::llm::CompletionProvider;
use ragline_core::models::FullDocument;

use crate::config::LlmConfig;

/// Sends one prompt per detection and never fails.
#[derive(Clone)]
pub struct ContradictionDetector {
    provider: Arc<dyn CompletionProvider>,
    model: String,
    timeout: Duration,
}

impl ContradictionDetector {
    pub fn new(provider: Arc<dyn CompletionProvider>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout,
        }
    }

    pub fn from_config(provider: Arc<dyn CompletionProvider>, config: &LlmConfig) -> Self {
        Self::new(provider, config.model.clone(), Duration::from_secs(config.timeout_secs))
    }

    /// Compare `documents` for conflicts relevant to `query`.
    ///
    /// Fewer than two documents, a provider error, a timeout and an
    /// unparseable answer all yield [`ContradictionResult::none`].
    pub async fn detect(&self, documents: &[FullDocument], query: &str) -> ContradictionResult {
        if documents.len() < 2 {
            return ContradictionResult::none();
        }

        let prompt = build_prompt(documents, query);
        let call = self.provider.complete(&prompt, &self.model);

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(text)) => {
                let result = parse_response(&text);
                debug!(
                    documents = documents.len(),
                    found = result.contradictions.len(),
                    "contradiction detection finished"
                );
                result
            }
            Ok(Err(e)) => {
                warn!(error = %e, "contradiction detection failed");
                ContradictionResult::none()
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "contradiction detection timed out");
                ContradictionResult::none()
            }
        }
    }
}
