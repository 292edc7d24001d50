//! Generation worker binary.
//!
//! ```bash
//! mediabot-worker generate --caption "a fox in snow #landscape" --media start.png
//! mediabot-worker image --prompt "a castle at dusk"
//! mediabot-worker check
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mediabot_comfyui::api::ComfyUIApi;
use mediabot_comfyui::backend::GenerationBackend;
use mediabot_comfyui::workflow::WorkflowTemplate;
use mediabot_core::orientation::OrientationResolver;
use mediabot_pipeline::config::{PipelineConfig, DEFAULT_FRAMES};
use mediabot_pipeline::events::GenerationEvent;
use mediabot_pipeline::media::{Ffmpeg, MediaTools};
use mediabot_pipeline::orchestrator::SegmentOrchestrator;
use mediabot_pipeline::poller::JobPoller;
use mediabot_pipeline::request::RequestPlanner;
use mediabot_pipeline::submitter::JobSubmitter;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mediabot-worker")]
#[command(about = "Generate images and multi-segment videos on a ComfyUI server")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, env = "LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a video from a caption, optionally continuing from media.
    Generate {
        /// One prompt, or alternating prompt / frame-count lines.
        #[arg(long)]
        caption: String,

        /// Starting image, or a video whose last frame is used.
        #[arg(long)]
        media: Option<PathBuf>,

        /// Frame count for a single-prompt caption.
        #[arg(long, default_value_t = DEFAULT_FRAMES)]
        frames: u32,
    },

    /// Generate a still image from a prompt.
    Image {
        #[arg(long)]
        prompt: String,
    },

    /// Check that the ComfyUI server is reachable.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = PipelineConfig::from_env().context("Invalid configuration")?;
    let api = ComfyUIApi::new(
        config.comfyui_url.clone(),
        uuid::Uuid::new_v4().to_string(),
    );

    match cli.command {
        Command::Check => {
            let stats = api
                .system_stats()
                .await
                .with_context(|| format!("ComfyUI at {} is not reachable", api.api_url()))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Generate {
            caption,
            media,
            frames,
        } => {
            let tools: Arc<dyn MediaTools> = Arc::new(Ffmpeg);
            let resolver = OrientationResolver::new(config.orientation.clone())?;
            let planner = RequestPlanner::new(resolver, tools.clone(), &config.work_dir);
            let orchestrator = build_orchestrator(&config, api, tools, false)?;
            spawn_progress_logger(&orchestrator);

            let mut planned = planner.plan(&caption, media.as_deref(), frames).await?;
            let result = orchestrator
                .generate(&planned.request, planned.segments.clone())
                .await;
            planned.discard_scratch().await;

            println!("{}", result?.display());
        }
        Command::Image { prompt } => {
            let resolver = OrientationResolver::new(config.orientation.clone())?;
            let resolved = resolver.resolve_prompt(&prompt);
            let orchestrator = build_orchestrator(&config, api, Arc::new(Ffmpeg), true)?;
            spawn_progress_logger(&orchestrator);

            let path = orchestrator
                .generate_image(&resolved.prompt, resolved.resolution)
                .await?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mediabot_worker=info,mediabot_pipeline=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_orchestrator(
    config: &PipelineConfig,
    api: ComfyUIApi,
    media: Arc<dyn MediaTools>,
    with_image: bool,
) -> anyhow::Result<SegmentOrchestrator> {
    let backend: Arc<dyn GenerationBackend> = Arc::new(api);
    let video_template = WorkflowTemplate::load(&config.video_workflow)
        .with_context(|| format!("Loading {}", config.video_workflow.display()))?;

    let orchestrator = SegmentOrchestrator::new(
        JobSubmitter::new(backend.clone(), &config.input_dir),
        JobPoller::new(backend, &config.output_dir, config.poll_interval),
        media,
        video_template,
        &config.work_dir,
        config.generation_timeout,
    );

    if !with_image {
        return Ok(orchestrator);
    }
    let image_template = WorkflowTemplate::load(&config.image_workflow)
        .with_context(|| format!("Loading {}", config.image_workflow.display()))?;
    Ok(orchestrator.with_image_template(image_template))
}

fn spawn_progress_logger(orchestrator: &SegmentOrchestrator) {
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(GenerationEvent::SegmentStarted { segment, total, .. }) => {
                    tracing::info!("Segment {segment}/{total} started");
                }
                Ok(GenerationEvent::SegmentSubmitted { segment, job_id, .. }) => {
                    tracing::info!(%job_id, "Segment {segment} queued on ComfyUI");
                }
                Ok(GenerationEvent::SegmentCompleted {
                    segment,
                    elapsed_ms,
                    ..
                }) => {
                    tracing::info!(elapsed_ms, "Segment {segment} done");
                }
                Ok(GenerationEvent::Concatenating { segments, .. }) => {
                    tracing::info!("Joining {segments} segments");
                }
                Ok(GenerationEvent::Completed { .. } | GenerationEvent::Failed { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
