mod args;
mod assemble;
mod audio;
mod azure;
mod error;
mod extract;
mod model;
mod pipeline;
mod planner;
mod pptx;
mod report;
mod subtitle;
mod tts;
mod utils;

use anyhow::Context;
use args::Args;
use assemble::{AssemblyInvoker, EncoderConfig, FfmpegAssembler};
use azure::AzureSynthesizer;
use clap::Parser;
use extract::{OfficeExtractor, SlideExtractor};
use pipeline::{Pipeline, PipelineSettings};
use planner::PlannerConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tts::{PiperSynthesizer, Provider, SpeechSynthesizer, VoiceConfig};
use utils::{PronunciationMap, parse_slide_selection};

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("cannot resolve {}", path.display()))
}

fn prepare_work_dir(requested: Option<&Path>) -> anyhow::Result<PathBuf> {
    match requested {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            absolute(dir)
        }
        None => {
            let dir = tempfile::Builder::new().prefix("slidecast-").tempdir()?;
            Ok(dir.keep())
        }
    }
}

fn build_settings(args: &Args, work_dir: PathBuf) -> anyhow::Result<PipelineSettings> {
    let selection = args
        .slides
        .as_deref()
        .map(parse_slide_selection)
        .transpose()?;
    let pronunciations = match &args.pronunciation_mapping {
        Some(path) => PronunciationMap::load(path)
            .with_context(|| format!("loading pronunciation mapping {}", path.display()))?,
        None => PronunciationMap::default(),
    };

    Ok(PipelineSettings {
        document: absolute(&args.document)?,
        output: absolute(&args.output)?,
        work_dir,
        selection,
        voice: VoiceConfig {
            provider: args.provider,
            voice_id: args.voice.clone(),
            rate: args.rate,
            api_key: args.api_key.clone(),
            region: args.region.clone(),
        },
        planner: PlannerConfig::new(args.min_display_ms),
        encoder: EncoderConfig {
            width: args.video_width,
            height: args.video_height,
            frame_rate: args.fps,
            video_codec: args.video_codec.clone(),
            audio_codec: args.audio_codec.clone(),
        },
        silence: Duration::from_secs_f64(args.silence),
        pronunciations,
        max_concurrency: args.jobs,
        max_failure_ratio: args.max_failure_ratio,
        plan_out: args.plan_out.clone(),
        subtitles: args.subtitles.clone(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    args.validate()?;

    if !args.document.exists() {
        error!("Presentation not found: {}", args.document.display());
        std::process::exit(1);
    }
    info!("Converting {} into {}", args.document.display(), args.output.display());

    let work_dir = prepare_work_dir(args.work_dir.as_deref())?;
    info!("Working in {}", work_dir.display());
    let settings = build_settings(&args, work_dir.clone())?;

    let synthesizer: Arc<dyn SpeechSynthesizer> = match settings.voice.provider {
        Provider::Local => {
            if !args.voice.ends_with(".onnx") {
                warn!("--voice {} does not look like a Piper model path", args.voice);
            }
            Arc::new(PiperSynthesizer::default())
        }
        Provider::Cloud => Arc::new(AzureSynthesizer::new(Duration::from_secs(args.request_timeout))),
    };
    let extractor: Arc<dyn SlideExtractor> =
        Arc::new(OfficeExtractor::new(args.video_width, args.video_height));
    let assembler: Arc<dyn AssemblyInvoker> = Arc::new(FfmpegAssembler::new(work_dir.join("video")));

    let pipeline = Pipeline::new(extractor, synthesizer, assembler, settings);
    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    match pipeline.run(cancel).await {
        Ok(report) => {
            println!("{}", report);
            info!("Process complete.");
            Ok(())
        }
        Err(failure) => {
            if let Some(report) = &failure.report {
                println!("{}", report);
            }
            Err(failure.into())
        }
    }
}
