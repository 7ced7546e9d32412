use anyhow::{Context, Result};
use chatmeme_contracts::config::{ImgflipConfig, RedditConfig};
use chatmeme_contracts::{FeedPost, MemeTemplate};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use serde_json::Value;

use crate::error::{FailureKind, StageError};
use crate::http::{error_chain_text, response_json_or_error};

pub trait TemplateCatalog {
    fn name(&self) -> &str;
    fn fetch_templates(&self) -> Result<Vec<MemeTemplate>>;
}

pub trait PostFeed {
    fn name(&self) -> &str;
    fn fetch_posts(&self, limit: u32) -> Result<Vec<FeedPost>>;
}

/// Why the image source produced nothing. Terminal for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl SourceFailure {
    fn from_error(err: &anyhow::Error) -> Self {
        Self {
            kind: FailureKind::classify(err),
            reason: error_chain_text(err, 512),
        }
    }
}

/// Fetches the catalog and picks one template uniformly at random.
pub fn pick_template<R: Rng + ?Sized>(
    catalog: &dyn TemplateCatalog,
    rng: &mut R,
) -> Result<MemeTemplate, SourceFailure> {
    let chosen = catalog.fetch_templates().and_then(|templates| {
        templates.choose(rng).cloned().ok_or_else(|| {
            StageError::NoCandidates(format!("{} returned no templates", catalog.name())).into()
        })
    });
    chosen.map_err(|err| {
        let failure = SourceFailure::from_error(&err);
        log::error!("Error fetching meme template: {}", failure.reason);
        failure
    })
}

/// Posts that can carry a caption: not stickied and a `jpg`/`png` URL.
pub fn candidate_pool(posts: &[FeedPost]) -> Vec<&FeedPost> {
    posts.iter().filter(|post| post.is_captionable()).collect()
}

/// Fetches recent posts, filters them and picks one image URL at random.
pub fn pick_feed_image<R: Rng + ?Sized>(
    feed: &dyn PostFeed,
    limit: u32,
    rng: &mut R,
) -> Result<String, SourceFailure> {
    let chosen = feed.fetch_posts(limit).and_then(|posts| {
        candidate_pool(&posts)
            .choose(rng)
            .map(|post| post.url.clone())
            .ok_or_else(|| {
                StageError::NoCandidates(format!(
                    "{} returned no captionable posts out of {}",
                    feed.name(),
                    posts.len()
                ))
                .into()
            })
    });
    chosen.map_err(|err| {
        let failure = SourceFailure::from_error(&err);
        log::error!("Error fetching meme from {}: {}", feed.name(), failure.reason);
        failure
    })
}

pub struct ImgflipCatalog {
    api_base: String,
    http: HttpClient,
}

impl ImgflipCatalog {
    pub fn new(config: &ImgflipConfig) -> Self {
        Self::with_client(config, HttpClient::new())
    }

    pub fn with_client(config: &ImgflipConfig, http: HttpClient) -> Self {
        Self {
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            http,
        }
    }
}

impl TemplateCatalog for ImgflipCatalog {
    fn name(&self) -> &str {
        "imgflip"
    }

    fn fetch_templates(&self) -> Result<Vec<MemeTemplate>> {
        let endpoint = format!("{}/get_memes", self.api_base);
        let response = self
            .http
            .get(&endpoint)
            .send()
            .with_context(|| format!("imgflip catalog request failed ({endpoint})"))?;
        let payload = response_json_or_error("imgflip", response)?;
        parse_catalog(&payload)
    }
}

fn parse_catalog(payload: &Value) -> Result<Vec<MemeTemplate>> {
    let memes = payload
        .get("data")
        .and_then(|data| data.get("memes"))
        .and_then(Value::as_array)
        .ok_or(StageError::MissingField {
            service: "imgflip",
            field: "data.memes",
        })?;
    let mut templates = Vec::with_capacity(memes.len());
    for row in memes {
        let text = |key: &str| match row.get(key) {
            Some(Value::String(value)) => Some(value.trim().to_string()),
            Some(Value::Number(value)) => Some(value.to_string()),
            _ => None,
        };
        let (Some(id), Some(url), Some(name)) = (text("id"), text("url"), text("name")) else {
            log::debug!("skipping malformed imgflip template row: {row}");
            continue;
        };
        if id.is_empty() || url.is_empty() {
            continue;
        }
        templates.push(MemeTemplate { id, url, name });
    }
    Ok(templates)
}

/// Reddit listing over the application-only OAuth flow.
pub struct RedditFeed {
    auth_base: String,
    api_base: String,
    client_id: String,
    client_secret: String,
    user_agent: String,
    subreddit: String,
    http: HttpClient,
}

impl RedditFeed {
    pub fn new(config: &RedditConfig) -> Self {
        Self::with_client(config, HttpClient::new())
    }

    pub fn with_client(config: &RedditConfig, http: HttpClient) -> Self {
        Self {
            auth_base: config.auth_base.trim().trim_end_matches('/').to_string(),
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            user_agent: config.user_agent.clone(),
            subreddit: config.subreddit.trim().trim_start_matches("r/").to_string(),
            http,
        }
    }

    fn access_token(&self) -> Result<String> {
        let endpoint = format!("{}/api/v1/access_token", self.auth_base);
        let response = self
            .http
            .post(&endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(USER_AGENT, &self.user_agent)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .with_context(|| format!("reddit token request failed ({endpoint})"))?;
        let payload = response_json_or_error("reddit", response)?;
        if let Some(message) = payload.get("error").map(value_text) {
            return Err(StageError::Rejected {
                service: "reddit",
                message,
            }
            .into());
        }
        payload
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                StageError::MissingField {
                    service: "reddit",
                    field: "access_token",
                }
                .into()
            })
    }
}

impl PostFeed for RedditFeed {
    fn name(&self) -> &str {
        "reddit"
    }

    fn fetch_posts(&self, limit: u32) -> Result<Vec<FeedPost>> {
        let token = self.access_token()?;
        let endpoint = format!("{}/r/{}/hot", self.api_base, self.subreddit);
        let response = self
            .http
            .get(&endpoint)
            .bearer_auth(token)
            .header(USER_AGENT, &self.user_agent)
            .query(&[("limit", limit.to_string()), ("raw_json", "1".to_string())])
            .send()
            .with_context(|| format!("reddit listing request failed ({endpoint})"))?;
        let payload = response_json_or_error("reddit", response)?;
        parse_listing(&payload)
    }
}

fn parse_listing(payload: &Value) -> Result<Vec<FeedPost>> {
    let children = payload
        .get("data")
        .and_then(|data| data.get("children"))
        .and_then(Value::as_array)
        .ok_or(StageError::MissingField {
            service: "reddit",
            field: "data.children",
        })?;
    Ok(children
        .iter()
        .filter_map(|child| child.get("data"))
        .filter_map(|data| {
            let url = data.get("url").and_then(Value::as_str)?;
            Some(FeedPost {
                stickied: data.get("stickied").and_then(Value::as_bool).unwrap_or(false),
                url: url.to_string(),
                title: data
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        })
        .collect())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;

    use anyhow::{anyhow, Result};
    use chatmeme_contracts::{FeedPost, MemeTemplate};

    use super::{PostFeed, TemplateCatalog};

    pub struct StaticCatalog {
        pub templates: Option<Vec<MemeTemplate>>,
        pub fetches: Cell<usize>,
    }

    impl TemplateCatalog for StaticCatalog {
        fn name(&self) -> &str {
            "static-catalog"
        }

        fn fetch_templates(&self) -> Result<Vec<MemeTemplate>> {
            self.fetches.set(self.fetches.get() + 1);
            self.templates
                .clone()
                .ok_or_else(|| anyhow!("catalog unavailable"))
        }
    }

    pub struct StaticFeed {
        pub posts: Option<Vec<FeedPost>>,
        pub fetches: Cell<usize>,
    }

    impl PostFeed for StaticFeed {
        fn name(&self) -> &str {
            "static-feed"
        }

        fn fetch_posts(&self, limit: u32) -> Result<Vec<FeedPost>> {
            self.fetches.set(self.fetches.get() + 1);
            let posts = self.posts.clone().ok_or_else(|| anyhow!("feed unavailable"))?;
            Ok(posts.into_iter().take(limit as usize).collect())
        }
    }

    /// 50 posts: 10 stickied, 20 without an image suffix, 20 captionable.
    pub fn mixed_feed() -> Vec<FeedPost> {
        let mut posts = Vec::new();
        for idx in 0..50 {
            let (stickied, url) = match idx {
                0..=9 => (true, format!("https://i.redd.it/pinned-{idx}.png")),
                10..=29 => (false, format!("https://v.redd.it/clip-{idx}")),
                _ => {
                    let ext = if idx % 2 == 0 { "jpg" } else { "png" };
                    (false, format!("https://i.redd.it/meme-{idx}.{ext}"))
                }
            };
            posts.push(FeedPost {
                stickied,
                url,
                title: format!("post {idx}"),
            });
        }
        posts
    }
}
