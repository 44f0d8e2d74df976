//! Generation client: writes the submission text for one item.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::llm::provider::{ChatMessage, CompletionRequest, FinishReason, LlmProvider};
use crate::llm::{LlmConfig, create_provider};

/// Builds the generation backend once credentials are known.
pub type ProviderFactory = Arc<dyn Fn(&LlmConfig) -> Arc<dyn LlmProvider> + Send + Sync>;

/// Factory for the OpenAI-compatible backend.
pub fn default_provider_factory() -> ProviderFactory {
    Arc::new(|config: &LlmConfig| create_provider(config))
}

/// Calls the generation service for one item, bounded by the step deadline.
pub struct GenerationClient {
    llm: Arc<dyn LlmProvider>,
    config: GenerationConfig,
    timeout: Duration,
}

impl GenerationClient {
    pub fn new(llm: Arc<dyn LlmProvider>, config: GenerationConfig, timeout: Duration) -> Self {
        Self {
            llm,
            config,
            timeout,
        }
    }

    /// Generate text tailored to `description` from the user's `profile`.
    pub async fn generate(&self, profile: &str, description: &str) -> Result<String, GenerationError> {
        if description.trim().is_empty() {
            return Err(GenerationError::EmptyDescription);
        }

        let request = CompletionRequest::new(vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(user_prompt(profile, description)),
        ])
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        debug!(
            model = self.llm.model_name(),
            description_len = description.len(),
            "Requesting generation"
        );

        let response = tokio::time::timeout(self.timeout, self.llm.complete(request))
            .await
            .map_err(|_| GenerationError::Timeout {
                timeout: self.timeout,
            })??;

        if response.finish_reason == FinishReason::Length {
            warn!(
                output_tokens = response.output_tokens,
                "Generation hit the token limit, text may be cut short"
            );
        }

        let text = response.content.trim().to_string();
        info!(
            chars = text.chars().count(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Generation complete"
        );
        Ok(text)
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are an expert assistant writing cover letters. Write one cover letter in \
             {language}, tailored to the job described by the user and based on their profile.\n\n\
             Rules:\n\
             - At most {max_chars} characters\n\
             - Never use placeholders such as [Company name] or [Your name]; leave out what you \
             do not know\n\
             - Sound natural and human, not like an AI\n\
             - Output only the letter, with no preamble or commentary",
            language = self.config.language,
            max_chars = self.config.max_chars,
        )
    }
}

fn user_prompt(profile: &str, description: &str) -> String {
    format!(
        "Based on my professional profile below, write a tailored cover letter for the job \
         description that follows.\n\n### My Profile:\n{profile}\n\n### Job Description:\n{description}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::provider::{CompletionResponse, Role};
    use async_trait::async_trait;
    use std::sync::Mutex;

    enum Behavior {
        Reply(&'static str),
        ServiceError,
        Hang,
    }

    struct StubLlm {
        behavior: Behavior,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl StubLlm {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                last_request: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            *self.last_request.lock().unwrap() = Some(request);
            match self.behavior {
                Behavior::Reply(text) => Ok(CompletionResponse {
                    content: text.to_string(),
                    input_tokens: 10,
                    output_tokens: 20,
                    finish_reason: FinishReason::Stop,
                    response_id: None,
                }),
                Behavior::ServiceError => Err(LlmError::ServiceError {
                    provider: "stub".into(),
                    status: 429,
                    message: "Rate limit reached".into(),
                }),
                Behavior::Hang => std::future::pending().await,
            }
        }
    }

    fn client(llm: Arc<StubLlm>, timeout: Duration) -> GenerationClient {
        GenerationClient::new(llm, GenerationConfig::default(), timeout)
    }

    #[tokio::test]
    async fn generates_and_trims_text() {
        let llm = StubLlm::new(Behavior::Reply("  Madame, Monsieur,\n\n...  "));
        let text = client(llm.clone(), Duration::from_secs(5))
            .generate("Rust developer, 5 years", "Backend role in Lyon")
            .await
            .unwrap();
        assert_eq!(text, "Madame, Monsieur,\n\n...");

        let request = llm.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.contains("French"));
        assert!(request.messages[0].content.contains("2000 characters"));
        assert!(request.messages[1].content.contains("### My Profile:\nRust developer, 5 years"));
        assert!(request.messages[1].content.ends_with("### Job Description:\nBackend role in Lyon"));
        assert_eq!(request.max_tokens, Some(700));
        assert_eq!(request.temperature, Some(0.7));
    }

    #[tokio::test]
    async fn service_error_propagates_message() {
        let err = client(StubLlm::new(Behavior::ServiceError), Duration::from_secs(5))
            .generate("profile", "description")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Llm(LlmError::ServiceError { .. })));
        assert!(err.to_string().contains("Rate limit reached"));
    }

    #[tokio::test]
    async fn hanging_service_times_out() {
        let err = client(StubLlm::new(Behavior::Hang), Duration::from_millis(20))
            .generate("profile", "description")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Timeout { .. }));
    }

    #[tokio::test]
    async fn blank_description_is_rejected_without_a_call() {
        let llm = StubLlm::new(Behavior::Reply("unused"));
        let err = client(llm.clone(), Duration::from_secs(5))
            .generate("profile", "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::EmptyDescription));
        assert!(llm.last_request.lock().unwrap().is_none());
    }
}
