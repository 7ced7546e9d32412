use std::fmt;
use std::path::PathBuf;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOPIC: &str = "funny";

/// Raw chat text handed to the pipeline. No structure is assumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatContext(String);

impl ChatContext {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChatContext {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic(String);

impl Topic {
    /// Normalizes raw model output: first non-empty line, trimmed, lowercased.
    /// Returns `None` when nothing usable remains.
    pub fn from_completion(raw: &str) -> Option<Self> {
        let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
        Some(Self(line.to_lowercase()))
    }

    pub fn fallback() -> Self {
        Self(DEFAULT_TOPIC.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemeTemplate {
    pub id: String,
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPost {
    pub stickied: bool,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

impl FeedPost {
    pub fn is_captionable(&self) -> bool {
        !self.stickied && (self.url.ends_with("jpg") || self.url.ends_with("png"))
    }
}

pub const MAX_CAPTION_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemeCaption(String);

impl MemeCaption {
    /// Drops every double quote, folds whitespace runs (newlines included)
    /// into single spaces and caps the length. Returns `None` when the
    /// cleaned text is empty.
    pub fn from_completion(raw: &str) -> Option<Self> {
        let cleaned = raw
            .replace('"', "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if cleaned.is_empty() {
            return None;
        }
        let capped: String = cleaned.chars().take(MAX_CAPTION_CHARS).collect();
        Some(Self(capped.trim_end().to_string()))
    }

    pub fn literal(text: &str) -> Self {
        Self(text.replace('"', ""))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemeCaption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub enum RenderedMeme {
    Hosted { url: String },
    Local { path: PathBuf, image: RgbaImage },
}

impl RenderedMeme {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hosted { .. } => "hosted",
            Self::Local { .. } => "local",
        }
    }

    /// URL for hosted memes, file path for local ones.
    pub fn location(&self) -> String {
        match self {
            Self::Hosted { url } => url.clone(),
            Self::Local { path, .. } => path.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_keeps_first_line_lowercased() {
        let topic = Topic::from_completion("  Coding\nbecause the chat is about bugs").unwrap();
        assert_eq!(topic.as_str(), "coding");
        assert!(Topic::from_completion(" \n\t").is_none());
    }

    #[test]
    fn caption_strips_quotes_and_caps_length() {
        let caption = MemeCaption::from_completion("  \"When the \"bug\" is you\"  ").unwrap();
        assert_eq!(caption.as_str(), "When the bug is you");

        let long = "ha ".repeat(100);
        let capped = MemeCaption::from_completion(&long).unwrap();
        assert!(capped.as_str().chars().count() <= MAX_CAPTION_CHARS);
        assert!(MemeCaption::from_completion("\"\"").is_none());
    }

    #[test]
    fn caption_folds_newlines_into_single_line() {
        let caption =
            MemeCaption::from_completion("When the build passes\n\n  on the   first try\t").unwrap();
        assert_eq!(caption.as_str(), "When the build passes on the first try");
        assert!(!caption.as_str().contains('\n'));
    }

    #[test]
    fn feed_post_filter_matches_suffix_and_sticky_flag() {
        let post = |stickied: bool, url: &str| FeedPost {
            stickied,
            url: url.to_string(),
            title: String::new(),
        };
        assert!(post(false, "https://i.redd.it/a.jpg").is_captionable());
        assert!(post(false, "https://i.redd.it/a.png").is_captionable());
        assert!(!post(true, "https://i.redd.it/a.png").is_captionable());
        assert!(!post(false, "https://v.redd.it/a.mp4").is_captionable());
        assert!(!post(false, "https://i.redd.it/a.gif").is_captionable());
    }
}
