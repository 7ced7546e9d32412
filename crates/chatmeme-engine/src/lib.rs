pub mod caption;
pub mod completion;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod render;
pub mod source;
pub mod topic;

pub use caption::{CaptionGenerator, CaptionStyle};
pub use completion::{ChatCompletionsProvider, CompletionProvider, CompletionRequest};
pub use error::{FailureKind, StageError};
pub use pipeline::{
    FailedStage, ImageChoice, ImageStrategy, MemePipeline, PipelineReport, RunOutcome, Stage,
    Variant,
};
pub use topic::TopicExtractor;
