pub mod config;
pub mod events;
pub mod meme;
pub mod outcome;
pub mod summary;

pub use config::MemeConfig;
pub use meme::{ChatContext, FeedPost, MemeCaption, MemeTemplate, RenderedMeme, Topic};
pub use outcome::StageOutcome;
