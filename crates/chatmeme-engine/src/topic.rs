use anyhow::{Context, Result};
use chatmeme_contracts::{ChatContext, StageOutcome, Topic};

use crate::completion::{collect_fragments, ChatMessage, CompletionProvider, CompletionRequest};
use crate::http::error_chain_text;

const TOPIC_INSTRUCTION: &str = "Analyze the given conversation and return only a single-word topic \
(e.g., 'coding', 'gym', 'AI', 'exams', 'sleep', etc.) that best represents the discussion.";

#[derive(Debug, Clone)]
pub struct TopicExtractor {
    pub model: String,
    pub temperature: f32,
    pub max_completion_tokens: u32,
}

impl TopicExtractor {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.7,
            max_completion_tokens: 5,
        }
    }

    pub fn request(&self, chat: &ChatContext) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(TOPIC_INSTRUCTION),
                ChatMessage::user(chat.as_str()),
            ],
            temperature: self.temperature,
            max_completion_tokens: self.max_completion_tokens,
            top_p: 1.0,
        }
    }

    /// Never fails: any provider error becomes `Fallback("funny")`.
    pub fn extract(
        &self,
        provider: &dyn CompletionProvider,
        chat: &ChatContext,
    ) -> StageOutcome<Topic> {
        match self.try_extract(provider, chat) {
            Ok(Some(topic)) => StageOutcome::Success(topic),
            Ok(None) => {
                log::error!("Error extracting topic: empty completion");
                StageOutcome::fallback(Topic::fallback(), "empty completion")
            }
            Err(err) => {
                let cause = error_chain_text(&err, 512);
                log::error!("Error extracting topic: {cause}");
                StageOutcome::fallback(Topic::fallback(), cause)
            }
        }
    }

    fn try_extract(
        &self,
        provider: &dyn CompletionProvider,
        chat: &ChatContext,
    ) -> Result<Option<Topic>> {
        let stream = provider
            .stream(&self.request(chat))
            .with_context(|| format!("{} topic request failed", provider.name()))?;
        let raw = collect_fragments(stream).context("topic stream failed")?;
        Ok(Topic::from_completion(&raw))
    }
}
