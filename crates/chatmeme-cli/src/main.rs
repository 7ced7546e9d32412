use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chatmeme_contracts::events::{new_run_id, EventWriter};
use chatmeme_contracts::summary::write_summary;
use chatmeme_contracts::{ChatContext, MemeConfig, RenderedMeme};
use chatmeme_engine::render::{NoViewer, SystemViewer, Viewer};
use chatmeme_engine::{
    FailedStage, ImageChoice, MemePipeline, PipelineReport, RunOutcome, Variant,
};
use clap::{Args, Parser, Subcommand};
use env_logger::{Builder, Target};
use log::LevelFilter;

#[derive(Debug, Parser)]
#[command(name = "chatmeme", version, about = "Turn chat text into a captioned meme")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Imgflip template captioned by Imgflip; prints the hosted URL.
    Context(ContextArgs),
    /// Reddit image captioned locally; writes and shows an image file.
    Random(RandomArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    #[arg(long)]
    chat: String,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    summary: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Debug, Parser)]
struct ContextArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Parser)]
struct RandomArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    font: Option<PathBuf>,
    #[arg(long)]
    font_size: Option<f32>,
    #[arg(long)]
    subreddit: Option<String>,
    #[arg(long)]
    no_show: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("chatmeme error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("chatmeme: ignoring unreadable .env ({err})");
        }
    }
    init_logger();

    let config = MemeConfig::from_env();
    let missing = config.missing_credentials();
    if !missing.is_empty() {
        log::warn!("credentials not set: {}", missing.join(", "));
    }
    execute(&cli.command, config)
}

impl Command {
    fn common(&self) -> &CommonArgs {
        match self {
            Self::Context(args) => &args.common,
            Self::Random(args) => &args.common,
        }
    }
}

/// Runs one pipeline and reports it. Any completed run exits 0, whatever
/// its outcome.
fn execute(command: &Command, mut config: MemeConfig) -> Result<i32> {
    apply_overrides(&mut config, command);
    let common = command.common();

    let mut pipeline = match command {
        Command::Context(_) => MemePipeline::context(&config),
        Command::Random(args) => {
            let viewer: Box<dyn Viewer> = if args.no_show {
                Box::new(NoViewer)
            } else {
                Box::new(SystemViewer)
            };
            MemePipeline::random(&config, viewer)
        }
    };
    if let Some(seed) = common.seed {
        pipeline = pipeline.with_seed(seed);
    }
    if let Some(events_path) = common.events.as_deref() {
        pipeline = pipeline.with_events(EventWriter::new(events_path, new_run_id()));
    }

    let report = pipeline.run(&ChatContext::new(common.chat.as_str()));
    for line in report_lines(&report) {
        println!("{line}");
    }
    if let Some(summary_path) = common.summary.as_deref() {
        write_report_summary(summary_path, &report);
    }
    Ok(0)
}

/// Flags win over values loaded from the environment and `.env`.
fn apply_overrides(config: &mut MemeConfig, command: &Command) {
    if let Some(model) = command
        .common()
        .text_model
        .as_deref()
        .map(str::trim)
        .filter(|model| !model.is_empty())
    {
        config.completion.model = model.to_string();
    }

    let Command::Random(args) = command else {
        return;
    };
    if let Some(output) = &args.output {
        config.overlay.output_path = output.clone();
    }
    if let Some(font) = &args.font {
        config.overlay.font_path = font.clone();
    }
    if let Some(size) = args.font_size.filter(|size| *size > 0.0) {
        config.overlay.font_size = size;
    }
    if let Some(subreddit) = args
        .subreddit
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        config.reddit.subreddit = subreddit.to_string();
    }
}

fn report_lines(report: &PipelineReport) -> Vec<String> {
    let template_missing = matches!(
        report.outcome,
        RunOutcome::Failed {
            stage: FailedStage::ImageSource,
            ..
        }
    ) && report.variant == Variant::Context;
    if template_missing {
        return vec!["❌ Error fetching meme template.".to_string()];
    }

    let mut lines = vec![format!("🖼 Meme Topic: {}", report.topic.value())];
    if let Some(caption) = &report.caption {
        lines.push(format!("📝 Generated Meme Text: {}", caption.value()));
    }
    match &report.image {
        Some(ImageChoice::Template(template)) => lines.push(format!(
            "🔗 Using Meme Template: {} ({})",
            template.name, template.url
        )),
        Some(ImageChoice::FeedImage(url)) => lines.push(format!("🔗 Reddit Meme URL: {url}")),
        None => {}
    }

    let last = match &report.outcome {
        RunOutcome::Rendered(RenderedMeme::Hosted { url }) => {
            format!("\n✅ Meme Generated: {url}")
        }
        RunOutcome::Rendered(RenderedMeme::Local { path, .. }) => {
            format!("\n✅ Meme generated successfully: {}", path.display())
        }
        RunOutcome::Failed { stage, reason, .. } => match (report.variant, stage) {
            (Variant::Random, FailedStage::ImageSource) => {
                format!("❌ Failed to fetch meme image ({reason}).")
            }
            (Variant::Random, FailedStage::Render) => {
                format!("❌ Error overlaying text on image ({reason}).")
            }
            (Variant::Context, _) => format!("❌ Error generating meme on Imgflip ({reason})."),
        },
    };
    lines.push(last);
    lines
}

fn write_report_summary(path: &Path, report: &PipelineReport) {
    if let Err(err) = write_summary(path, &report.summary(), None) {
        log::warn!("failed to write summary {}: {err:#}", path.display());
    }
}

/// Level comes from CHATMEME_LOG_LEVEL (default INFO).
fn init_logger() {
    let log_level = env::var("CHATMEME_LOG_LEVEL")
        .unwrap_or_else(|_| "INFO".to_string())
        .to_uppercase();

    let level_filter = match log_level.as_str() {
        "TRACE" => LevelFilter::Trace,
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" => LevelFilter::Warn,
        "ERROR" => LevelFilter::Error,
        "OFF" => LevelFilter::Off,
        _ => {
            eprintln!("chatmeme: invalid CHATMEME_LOG_LEVEL '{log_level}', defaulting to INFO");
            LevelFilter::Info
        }
    };

    let mut builder = Builder::from_default_env();
    builder
        .target(Target::Stderr)
        .filter_level(level_filter)
        .format(|buf, record| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC");
            writeln!(
                buf,
                "{timestamp} [{}] {} - {}",
                record.level(),
                record.target(),
                record.args()
            )
        });
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::net::TcpListener;

    use chatmeme_contracts::{MemeCaption, MemeTemplate, StageOutcome, Topic};
    use chatmeme_engine::{FailureKind, Stage};

    use super::*;

    fn report(
        variant: Variant,
        image: Option<ImageChoice>,
        outcome: RunOutcome,
    ) -> PipelineReport {
        PipelineReport {
            run_id: "run-1".to_string(),
            variant,
            started_at: String::new(),
            finished_at: String::new(),
            topic: StageOutcome::Success(Topic::from_completion("coding").unwrap()),
            caption: Some(StageOutcome::Success(MemeCaption::literal("Ship it"))),
            image,
            transitions: vec![Stage::TopicExtracted],
            outcome,
        }
    }

    fn failed(stage: FailedStage, kind: FailureKind) -> RunOutcome {
        RunOutcome::Failed {
            stage,
            kind,
            reason: "boom".to_string(),
        }
    }

    fn drake() -> ImageChoice {
        ImageChoice::Template(MemeTemplate {
            id: "1".to_string(),
            url: "http://x/1.png".to_string(),
            name: "Drake".to_string(),
        })
    }

    #[test]
    fn context_template_failure_prints_only_the_fetch_error() {
        let lines = report_lines(&report(
            Variant::Context,
            None,
            failed(FailedStage::ImageSource, FailureKind::Status),
        ));
        assert_eq!(lines, vec!["❌ Error fetching meme template.".to_string()]);
    }

    #[test]
    fn context_success_prints_template_and_hosted_url() {
        let lines = report_lines(&report(
            Variant::Context,
            Some(drake()),
            RunOutcome::Rendered(RenderedMeme::Hosted {
                url: "https://i.imgflip.com/8x2k1q.jpg".to_string(),
            }),
        ));
        assert_eq!(
            lines,
            vec![
                "🖼 Meme Topic: coding".to_string(),
                "📝 Generated Meme Text: Ship it".to_string(),
                "🔗 Using Meme Template: Drake (http://x/1.png)".to_string(),
                "\n✅ Meme Generated: https://i.imgflip.com/8x2k1q.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn context_render_failure_names_imgflip() {
        let lines = report_lines(&report(
            Variant::Context,
            Some(drake()),
            failed(FailedStage::Render, FailureKind::Malformed),
        ));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("❌ Error generating meme on Imgflip (boom).")
        );
    }

    #[test]
    fn random_failures_print_stage_specific_messages() {
        let missing = report_lines(&report(
            Variant::Random,
            None,
            failed(FailedStage::ImageSource, FailureKind::EmptyCandidates),
        ));
        assert_eq!(missing[0], "🖼 Meme Topic: coding");
        assert_eq!(
            missing.last().map(String::as_str),
            Some("❌ Failed to fetch meme image (boom).")
        );

        let overlay = report_lines(&report(
            Variant::Random,
            Some(ImageChoice::FeedImage("https://i.redd.it/a.png".to_string())),
            failed(FailedStage::Render, FailureKind::Render),
        ));
        assert!(overlay.contains(&"🔗 Reddit Meme URL: https://i.redd.it/a.png".to_string()));
        assert_eq!(
            overlay.last().map(String::as_str),
            Some("❌ Error overlaying text on image (boom).")
        );
    }

    #[test]
    fn random_success_prints_local_path() {
        let lines = report_lines(&report(
            Variant::Random,
            Some(ImageChoice::FeedImage("https://i.redd.it/a.png".to_string())),
            RunOutcome::Rendered(RenderedMeme::Local {
                path: PathBuf::from("generated_meme.jpg"),
                image: image::RgbaImage::new(1, 1),
            }),
        ));
        assert_eq!(
            lines.last().map(String::as_str),
            Some("\n✅ Meme generated successfully: generated_meme.jpg")
        );
    }

    #[test]
    fn non_positive_font_size_keeps_configured_default() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "chatmeme",
            "random",
            "--chat",
            "x",
            "--font-size",
            "0",
            "--no-show",
        ])?;
        let mut config = MemeConfig::default();
        let default_size = config.overlay.font_size;
        apply_overrides(&mut config, &cli.command);
        assert_eq!(config.overlay.font_size, default_size);
        assert_eq!(config.overlay.font_size, 40.0);
        Ok(())
    }

    #[test]
    fn flags_override_environment_values() -> anyhow::Result<()> {
        let env = HashMap::from([
            ("CHATMEME_TEXT_MODEL", "env-model"),
            ("CHATMEME_SUBREDDIT", "dankmemes"),
            ("CHATMEME_FONT", "/env/font.ttf"),
        ]);
        let mut config =
            MemeConfig::from_lookup(|key| env.get(key).map(|value| value.to_string()));
        let cli = Cli::try_parse_from([
            "chatmeme",
            "random",
            "--chat",
            "x",
            "--text-model",
            "flag-model",
            "--subreddit",
            "ProgrammerHumor",
            "--font",
            "/flag/font.ttf",
            "--font-size",
            "28",
            "--output",
            "out.png",
        ])?;
        apply_overrides(&mut config, &cli.command);

        assert_eq!(config.completion.model, "flag-model");
        assert_eq!(config.reddit.subreddit, "ProgrammerHumor");
        assert_eq!(config.overlay.font_path, PathBuf::from("/flag/font.ttf"));
        assert_eq!(config.overlay.font_size, 28.0);
        assert_eq!(config.overlay.output_path, PathBuf::from("out.png"));

        let context = Cli::try_parse_from(["chatmeme", "context", "--chat", "x"])?;
        let mut untouched =
            MemeConfig::from_lookup(|key| env.get(key).map(|value| value.to_string()));
        apply_overrides(&mut untouched, &context.command);
        assert_eq!(untouched.completion.model, "env-model");
        assert_eq!(untouched.reddit.subreddit, "dankmemes");
        Ok(())
    }

    #[test]
    fn failed_run_still_exits_zero_and_writes_summary() -> anyhow::Result<()> {
        // Nothing listens on this port once the listener is dropped.
        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0")?;
            format!("http://{}", listener.local_addr()?)
        };
        let config = MemeConfig::from_lookup(|key| match key {
            "GROQ_API_BASE" | "IMGFLIP_API_BASE" => Some(closed.clone()),
            _ => None,
        });
        let temp = tempfile::tempdir()?;
        let summary = temp.path().join("summary.json");
        let cli = Cli::try_parse_from([
            "chatmeme".to_string(),
            "context".to_string(),
            "--chat".to_string(),
            "debugging all night".to_string(),
            "--summary".to_string(),
            summary.display().to_string(),
        ])?;

        assert_eq!(execute(&cli.command, config)?, 0);
        let written = std::fs::read_to_string(&summary)?;
        assert!(written.contains("failed:image_source"));
        Ok(())
    }
}
