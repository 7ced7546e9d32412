use chatmeme_contracts::events::{
    new_run_id, now_utc_iso, EventPayload, EventWriter, CAPTION_GENERATED, FAILED,
    IMAGE_SOURCE_RESOLVED, RENDERED, RUN_STARTED, TOPIC_EXTRACTED,
};
use chatmeme_contracts::summary::RunSummary;
use chatmeme_contracts::{
    ChatContext, MemeCaption, MemeConfig, MemeTemplate, RenderedMeme, StageOutcome, Topic,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Map, Value};

use crate::caption::{CaptionGenerator, CaptionStyle};
use crate::completion::{ChatCompletionsProvider, CompletionProvider};
use crate::error::FailureKind;
use crate::http::error_chain_text;
use crate::render::{ImgflipCaptioner, OverlayRenderer, RemoteCaptioner, Viewer};
use crate::source::{
    pick_feed_image, pick_template, ImgflipCatalog, PostFeed, RedditFeed, TemplateCatalog,
};
use crate::topic::TopicExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Catalog template, remote captioning.
    Context,
    /// Feed image, local overlay.
    Random,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Random => "random",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    TopicExtracted,
    ImageSourceResolved,
    CaptionGenerated,
    Rendered,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    ImageSource,
    Render,
}

impl FailedStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageSource => "image_source",
            Self::Render => "render",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageChoice {
    Template(MemeTemplate),
    FeedImage(String),
}

impl ImageChoice {
    pub fn label(&self) -> String {
        match self {
            Self::Template(template) => format!("{} ({})", template.name, template.url),
            Self::FeedImage(url) => url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Rendered(RenderedMeme),
    Failed {
        stage: FailedStage,
        kind: FailureKind,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: String,
    pub variant: Variant,
    pub started_at: String,
    pub finished_at: String,
    pub topic: StageOutcome<Topic>,
    pub caption: Option<StageOutcome<MemeCaption>>,
    pub image: Option<ImageChoice>,
    pub transitions: Vec<Stage>,
    pub outcome: RunOutcome,
}

impl PipelineReport {
    pub fn is_rendered(&self) -> bool {
        matches!(self.outcome, RunOutcome::Rendered(_))
    }

    pub fn hosted_url(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Rendered(RenderedMeme::Hosted { url }) => Some(url.as_str()),
            _ => None,
        }
    }

    pub fn summary(&self) -> RunSummary {
        let (outcome, detail) = match &self.outcome {
            RunOutcome::Rendered(meme) => ("rendered".to_string(), meme.location()),
            RunOutcome::Failed { stage, reason, .. } => {
                (format!("failed:{}", stage.as_str()), reason.clone())
            }
        };
        RunSummary {
            run_id: self.run_id.clone(),
            variant: self.variant.as_str().to_string(),
            started_at: self.started_at.clone(),
            finished_at: self.finished_at.clone(),
            topic: Some(self.topic.value().to_string()),
            topic_fallback: self.topic.is_fallback(),
            caption: self
                .caption
                .as_ref()
                .map(|caption| caption.value().to_string()),
            caption_fallback: self
                .caption
                .as_ref()
                .map(StageOutcome::is_fallback)
                .unwrap_or(false),
            source: self.image.as_ref().map(ImageChoice::label),
            outcome,
            detail,
        }
    }
}

pub enum ImageStrategy {
    Catalog {
        catalog: Box<dyn TemplateCatalog>,
        captioner: Box<dyn RemoteCaptioner>,
    },
    Feed {
        feed: Box<dyn PostFeed>,
        limit: u32,
        renderer: OverlayRenderer,
    },
}

impl ImageStrategy {
    pub fn variant(&self) -> Variant {
        match self {
            Self::Catalog { .. } => Variant::Context,
            Self::Feed { .. } => Variant::Random,
        }
    }
}

/// Chat text to meme, one strictly sequential run per call.
///
/// Topic and caption failures fall back to defaults and the run continues.
/// A missing template or feed image ends the run, as does a render failure.
pub struct MemePipeline {
    completions: Box<dyn CompletionProvider>,
    topics: TopicExtractor,
    captions: CaptionGenerator,
    strategy: ImageStrategy,
    rng: StdRng,
    events: Option<EventWriter>,
}

struct RunState {
    run_id: String,
    started_at: String,
    transitions: Vec<Stage>,
}

impl MemePipeline {
    pub fn new(
        completions: Box<dyn CompletionProvider>,
        text_model: &str,
        strategy: ImageStrategy,
    ) -> Self {
        let style = match strategy.variant() {
            Variant::Context => CaptionStyle::Grounded,
            Variant::Random => CaptionStyle::Witty,
        };
        Self {
            completions,
            topics: TopicExtractor::new(text_model),
            captions: CaptionGenerator::new(text_model, style),
            strategy,
            rng: StdRng::from_entropy(),
            events: None,
        }
    }

    /// Imgflip catalog + Imgflip captioning.
    pub fn context(config: &MemeConfig) -> Self {
        Self::new(
            Box::new(ChatCompletionsProvider::new(&config.completion)),
            &config.completion.model,
            ImageStrategy::Catalog {
                catalog: Box::new(ImgflipCatalog::new(&config.imgflip)),
                captioner: Box::new(ImgflipCaptioner::new(&config.imgflip)),
            },
        )
    }

    /// Reddit feed + local overlay.
    pub fn random(config: &MemeConfig, viewer: Box<dyn Viewer>) -> Self {
        Self::new(
            Box::new(ChatCompletionsProvider::new(&config.completion)),
            &config.completion.model,
            ImageStrategy::Feed {
                feed: Box::new(RedditFeed::new(&config.reddit)),
                limit: config.reddit.limit,
                renderer: OverlayRenderer::from_config(&config.overlay, viewer),
            },
        )
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn variant(&self) -> Variant {
        self.strategy.variant()
    }

    /// Runs every stage. Never returns an error; the outcome is in the report.
    pub fn run(&mut self, chat: &ChatContext) -> PipelineReport {
        let variant = self.variant();
        let mut state = RunState {
            run_id: self
                .events
                .as_ref()
                .map(|events| events.run_id().to_string())
                .unwrap_or_else(new_run_id),
            started_at: now_utc_iso(),
            transitions: Vec::new(),
        };
        self.emit(
            RUN_STARTED,
            json!({ "variant": variant.as_str(), "chat_chars": chat.as_str().chars().count() }),
        );

        let topic = self.topics.extract(self.completions.as_ref(), chat);
        log::info!("Meme Topic: {}", topic.value());
        self.advance(
            &mut state,
            Stage::TopicExtracted,
            TOPIC_EXTRACTED,
            outcome_payload("topic", &topic),
        );

        let (caption, image, outcome) = match &self.strategy {
            ImageStrategy::Catalog { catalog, captioner } => {
                let template = match pick_template(catalog.as_ref(), &mut self.rng) {
                    Ok(template) => template,
                    Err(failure) => {
                        let outcome = self.fail(
                            &mut state,
                            FailedStage::ImageSource,
                            failure.kind,
                            failure.reason,
                        );
                        return finish(state, variant, topic, None, None, outcome);
                    }
                };
                log::info!("Using Meme Template: {} ({})", template.name, template.url);
                self.advance(
                    &mut state,
                    Stage::ImageSourceResolved,
                    IMAGE_SOURCE_RESOLVED,
                    json!({ "template_id": template.id, "template_name": template.name, "url": template.url }),
                );

                let caption = self.captions.generate(
                    self.completions.as_ref(),
                    topic.value(),
                    Some(template.name.as_str()),
                );
                log::info!("Generated Meme Text: {}", caption.value());
                self.advance(
                    &mut state,
                    Stage::CaptionGenerated,
                    CAPTION_GENERATED,
                    outcome_payload("caption", &caption),
                );

                let outcome = match captioner.caption(&template.id, caption.value()) {
                    Ok(url) => self.render_done(&mut state, RenderedMeme::Hosted { url }),
                    Err(err) => {
                        let reason = error_chain_text(&err, 512);
                        log::error!("Error generating meme on {}: {reason}", captioner.name());
                        self.fail(
                            &mut state,
                            FailedStage::Render,
                            FailureKind::classify(&err),
                            reason,
                        )
                    }
                };
                (Some(caption), Some(ImageChoice::Template(template)), outcome)
            }
            ImageStrategy::Feed {
                feed,
                limit,
                renderer,
            } => {
                let caption = self
                    .captions
                    .generate(self.completions.as_ref(), topic.value(), None);
                log::info!("Generated Meme Text: {}", caption.value());
                self.advance(
                    &mut state,
                    Stage::CaptionGenerated,
                    CAPTION_GENERATED,
                    outcome_payload("caption", &caption),
                );

                let image_url = match pick_feed_image(feed.as_ref(), *limit, &mut self.rng) {
                    Ok(url) => url,
                    Err(failure) => {
                        let outcome = self.fail(
                            &mut state,
                            FailedStage::ImageSource,
                            failure.kind,
                            failure.reason,
                        );
                        return finish(state, variant, topic, Some(caption), None, outcome);
                    }
                };
                log::info!("{} Meme URL: {image_url}", feed.name());
                self.advance(
                    &mut state,
                    Stage::ImageSourceResolved,
                    IMAGE_SOURCE_RESOLVED,
                    json!({ "url": image_url }),
                );

                let outcome = match renderer.render(&image_url, caption.value()) {
                    Ok(meme) => self.render_done(&mut state, meme),
                    Err(err) => {
                        let reason = error_chain_text(&err, 512);
                        log::error!("Error overlaying text on image: {reason}");
                        self.fail(
                            &mut state,
                            FailedStage::Render,
                            FailureKind::classify(&err),
                            reason,
                        )
                    }
                };
                (Some(caption), Some(ImageChoice::FeedImage(image_url)), outcome)
            }
        };

        finish(state, variant, topic, caption, image, outcome)
    }

    fn advance(&self, state: &mut RunState, stage: Stage, event_type: &str, payload: Value) {
        log::debug!("run {} -> {:?}", state.run_id, stage);
        state.transitions.push(stage);
        self.emit(event_type, payload);
    }

    fn render_done(&self, state: &mut RunState, meme: RenderedMeme) -> RunOutcome {
        self.advance(
            state,
            Stage::Rendered,
            RENDERED,
            json!({ "kind": meme.kind(), "location": meme.location() }),
        );
        RunOutcome::Rendered(meme)
    }

    fn fail(
        &self,
        state: &mut RunState,
        stage: FailedStage,
        kind: FailureKind,
        reason: String,
    ) -> RunOutcome {
        self.advance(
            state,
            Stage::Failed,
            FAILED,
            json!({ "stage": stage.as_str(), "failure_kind": kind.as_str(), "reason": reason }),
        );
        RunOutcome::Failed {
            stage,
            kind,
            reason,
        }
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let payload: EventPayload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Err(err) = events.emit(event_type, payload) {
            log::warn!("failed to record {event_type} event: {err:#}");
        }
    }
}

fn outcome_payload<T: ToString>(field: &str, outcome: &StageOutcome<T>) -> Value {
    let mut payload = Map::new();
    payload.insert(field.to_string(), Value::String(outcome.value().to_string()));
    payload.insert("fallback".to_string(), Value::Bool(outcome.is_fallback()));
    if let Some(cause) = outcome.cause() {
        payload.insert("cause".to_string(), Value::String(cause.to_string()));
    }
    Value::Object(payload)
}

fn finish(
    state: RunState,
    variant: Variant,
    topic: StageOutcome<Topic>,
    caption: Option<StageOutcome<MemeCaption>>,
    image: Option<ImageChoice>,
    outcome: RunOutcome,
) -> PipelineReport {
    PipelineReport {
        run_id: state.run_id,
        variant,
        started_at: state.started_at,
        finished_at: now_utc_iso(),
        topic,
        caption,
        image,
        transitions: state.transitions,
        outcome,
    }
}
