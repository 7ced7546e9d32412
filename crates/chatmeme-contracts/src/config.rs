use std::env;
use std::path::PathBuf;

pub const DEFAULT_COMPLETION_API_BASE: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_TEXT_MODEL: &str = "llama3-70b-8192";
pub const DEFAULT_IMGFLIP_API_BASE: &str = "https://api.imgflip.com";
pub const DEFAULT_REDDIT_AUTH_BASE: &str = "https://www.reddit.com";
pub const DEFAULT_REDDIT_API_BASE: &str = "https://oauth.reddit.com";
pub const DEFAULT_SUBREDDIT: &str = "memes";
pub const DEFAULT_FEED_LIMIT: u32 = 50;
pub const DEFAULT_FONT_PATH: &str = "arial.ttf";
pub const DEFAULT_FONT_SIZE: f32 = 40.0;
pub const DEFAULT_BOTTOM_MARGIN: u32 = 100;
pub const DEFAULT_OUTLINE_OFFSET: i32 = 2;
pub const DEFAULT_OUTPUT_PATH: &str = "generated_meme.jpg";

/// Everything a pipeline needs from the outside world, passed explicitly at
/// construction. Credentials are opaque; nothing here validates them.
#[derive(Debug, Clone, Default)]
pub struct MemeConfig {
    pub completion: CompletionConfig,
    pub imgflip: ImgflipConfig,
    pub reddit: RedditConfig,
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ImgflipConfig {
    pub api_base: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub auth_base: String,
    pub api_base: String,
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub subreddit: String,
    pub limit: u32,
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub font_path: PathBuf,
    pub font_size: f32,
    pub bottom_margin: u32,
    pub outline_offset: i32,
    pub output_path: PathBuf,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_COMPLETION_API_BASE.to_string(),
            api_key: String::new(),
            model: DEFAULT_TEXT_MODEL.to_string(),
        }
    }
}

impl Default for ImgflipConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_IMGFLIP_API_BASE.to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            auth_base: DEFAULT_REDDIT_AUTH_BASE.to_string(),
            api_base: DEFAULT_REDDIT_API_BASE.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: format!("chatmeme/{}", env!("CARGO_PKG_VERSION")),
            subreddit: DEFAULT_SUBREDDIT.to_string(),
            limit: DEFAULT_FEED_LIMIT,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            font_path: PathBuf::from(DEFAULT_FONT_PATH),
            font_size: DEFAULT_FONT_SIZE,
            bottom_margin: DEFAULT_BOTTOM_MARGIN,
            outline_offset: DEFAULT_OUTLINE_OFFSET,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
        }
    }
}

impl MemeConfig {
    /// Builds a config from process environment variables. Missing values
    /// fall back to defaults or empty credentials.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let base = |key: &str, default: &str| {
            get(key)
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| default.to_string())
        };

        let mut config = Self::default();
        config.completion.api_base = base("GROQ_API_BASE", DEFAULT_COMPLETION_API_BASE);
        config.completion.api_key = get("GROQ_API_KEY").unwrap_or_default();
        if let Some(model) = get("CHATMEME_TEXT_MODEL") {
            config.completion.model = model;
        }

        config.imgflip.api_base = base("IMGFLIP_API_BASE", DEFAULT_IMGFLIP_API_BASE);
        config.imgflip.username = get("IMGFLIP_USERNAME").unwrap_or_default();
        config.imgflip.password = get("IMGFLIP_PASSWORD").unwrap_or_default();

        config.reddit.client_id = get("REDDIT_CLIENT_ID").unwrap_or_default();
        config.reddit.client_secret = get("REDDIT_CLIENT_SECRET").unwrap_or_default();
        if let Some(agent) = get("REDDIT_USER_AGENT") {
            config.reddit.user_agent = agent;
        }
        if let Some(subreddit) = get("CHATMEME_SUBREDDIT") {
            config.reddit.subreddit = subreddit;
        }

        if let Some(font) = get("CHATMEME_FONT") {
            config.overlay.font_path = PathBuf::from(font);
        }
        config
    }

    /// Names of credentials that are still empty. Used for warnings only.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.completion.api_key.is_empty() {
            missing.push("GROQ_API_KEY");
        }
        if self.imgflip.username.is_empty() {
            missing.push("IMGFLIP_USERNAME");
        }
        if self.imgflip.password.is_empty() {
            missing.push("IMGFLIP_PASSWORD");
        }
        if self.reddit.client_id.is_empty() {
            missing.push("REDDIT_CLIENT_ID");
        }
        if self.reddit.client_secret.is_empty() {
            missing.push("REDDIT_CLIENT_SECRET");
        }
        missing
    }
}
