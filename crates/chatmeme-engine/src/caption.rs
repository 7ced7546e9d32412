use anyhow::{Context, Result};
use chatmeme_contracts::{MemeCaption, StageOutcome, Topic};

use crate::completion::{collect_fragments, ChatMessage, CompletionProvider, CompletionRequest};
use crate::http::error_chain_text;

pub const TEMPLATE_FALLBACK_CAPTION: &str = "Me debugging at 3 AM...";
pub const WITTY_FALLBACK_CAPTION: &str = "When life gives you errors, debug them!";

/// Prompt flavour. `Grounded` is used with catalog templates, `Witty` with
/// feed images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionStyle {
    Grounded,
    Witty,
}

impl CaptionStyle {
    pub fn max_completion_tokens(self) -> u32 {
        match self {
            Self::Grounded => 15,
            Self::Witty => 20,
        }
    }

    pub fn fallback_caption(self) -> &'static str {
        match self {
            Self::Grounded => TEMPLATE_FALLBACK_CAPTION,
            Self::Witty => WITTY_FALLBACK_CAPTION,
        }
    }

    fn instruction(self, topic: &Topic, template_name: Option<&str>) -> String {
        match self {
            Self::Grounded => {
                let mut text = format!(
                    "You are a meme expert. Generate ONLY a short, funny meme caption for the topic '{topic}'"
                );
                if let Some(name) = template_name.filter(|name| !name.trim().is_empty()) {
                    text.push_str(&format!(" using the meme template '{}'", name.trim()));
                }
                text.push_str(
                    ". DO NOT add any explanations, introductions, or extra text. Just output the caption.",
                );
                text
            }
            Self::Witty => format!(
                "Generate a funny meme caption about {topic}. Keep it short and witty, under 10 words."
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptionGenerator {
    pub model: String,
    pub style: CaptionStyle,
    pub temperature: f32,
}

impl CaptionGenerator {
    pub fn new(model: impl Into<String>, style: CaptionStyle) -> Self {
        Self {
            model: model.into(),
            style,
            temperature: 1.0,
        }
    }

    pub fn request(&self, topic: &Topic, template_name: Option<&str>) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(
                self.style.instruction(topic, template_name),
            )],
            temperature: self.temperature,
            max_completion_tokens: self.style.max_completion_tokens(),
            top_p: 1.0,
        }
    }

    pub fn generate(
        &self,
        provider: &dyn CompletionProvider,
        topic: &Topic,
        template_name: Option<&str>,
    ) -> StageOutcome<MemeCaption> {
        let fallback = || MemeCaption::literal(self.style.fallback_caption());
        match self.try_generate(provider, topic, template_name) {
            Ok(Some(caption)) => StageOutcome::Success(caption),
            Ok(None) => {
                log::error!("Error generating meme caption: empty completion");
                StageOutcome::fallback(fallback(), "empty completion")
            }
            Err(err) => {
                let cause = error_chain_text(&err, 512);
                log::error!("Error generating meme caption: {cause}");
                StageOutcome::fallback(fallback(), cause)
            }
        }
    }

    fn try_generate(
        &self,
        provider: &dyn CompletionProvider,
        topic: &Topic,
        template_name: Option<&str>,
    ) -> Result<Option<MemeCaption>> {
        let stream = provider
            .stream(&self.request(topic, template_name))
            .with_context(|| format!("{} caption request failed", provider.name()))?;
        let raw = collect_fragments(stream).context("caption stream failed")?;
        Ok(MemeCaption::from_completion(&raw))
    }
}

#[cfg(test)]
mod tests {
    use chatmeme_contracts::meme::MAX_CAPTION_CHARS;
    use chatmeme_contracts::Topic;

    use super::*;
    use crate::completion::testing::ScriptedCompletions;

    fn topic(value: &str) -> Topic {
        Topic::from_completion(value).unwrap_or_else(Topic::fallback)
    }

    #[test]
    fn grounded_prompt_names_topic_and_template() {
        let generator = CaptionGenerator::new("llama3-70b-8192", CaptionStyle::Grounded);
        let request = generator.request(&topic("coding"), Some("Drake Hotline Bling"));
        assert_eq!(request.messages.len(), 1);
        let instruction = &request.messages[0].content;
        assert!(instruction.contains("'coding'"));
        assert!(instruction.contains("'Drake Hotline Bling'"));
        assert!(instruction.contains("DO NOT add any explanations"));
        assert_eq!(request.max_completion_tokens, 15);
        assert_eq!(request.temperature, 1.0);
    }

    #[test]
    fn witty_prompt_uses_larger_budget() {
        let generator = CaptionGenerator::new("llama3-70b-8192", CaptionStyle::Witty);
        let request = generator.request(&topic("gym"), None);
        assert!(request.messages[0].content.contains("about gym"));
        assert_eq!(request.max_completion_tokens, 20);
    }

    #[test]
    fn captions_never_contain_double_quotes() {
        let replies = vec![
            Ok(vec!["\"When the code", " compiles\"", " first try\""]),
            Ok(vec!["\"\"\""]),
            Err("timeout"),
        ];
        let provider = ScriptedCompletions::new(replies);
        let generator = CaptionGenerator::new("llama3-70b-8192", CaptionStyle::Witty);
        for _ in 0..3 {
            let caption = generator.generate(&provider, &topic("coding"), None).into_value();
            assert!(!caption.as_str().is_empty());
            assert!(!caption.as_str().contains('"'));
            assert!(caption.as_str().chars().count() <= MAX_CAPTION_CHARS);
        }
    }

    #[test]
    fn failure_uses_style_specific_fallback() {
        let provider = ScriptedCompletions::failing();
        let grounded = CaptionGenerator::new("m", CaptionStyle::Grounded)
            .generate(&provider, &topic("coding"), Some("Drake"));
        assert!(grounded.is_fallback());
        assert_eq!(grounded.value().as_str(), TEMPLATE_FALLBACK_CAPTION);

        let witty =
            CaptionGenerator::new("m", CaptionStyle::Witty).generate(&provider, &topic("gym"), None);
        assert_eq!(witty.value().as_str(), WITTY_FALLBACK_CAPTION);
    }
}
