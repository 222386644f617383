use crate::tts::Provider;
use clap::Parser;
use std::path::PathBuf;

/// Convert a slide deck into a video narrated from its speaker notes.
#[derive(Parser, Debug)]
#[clap(version)]
pub struct Args {
    /// Presentation to convert (.pptx)
    pub document: PathBuf,

    /// Output video; the extension selects the container format
    pub output: PathBuf,

    /// Slide numbers or ranges to convert, e.g. "1,3-5"
    #[clap(long)]
    pub slides: Option<String>,

    /// Seconds of silence padded before and after each slide's audio
    #[clap(long, default_value_t = 1.5)]
    pub silence: f64,

    #[clap(long, value_enum, default_value_t = Provider::Cloud)]
    pub provider: Provider,

    /// Azure voice name, or the Piper model path with --provider local
    #[clap(long, default_value = "en-GB-SoniaNeural")]
    pub voice: String,

    /// Speaking rate, 1.0 is normal speed
    #[clap(long, default_value_t = 1.0)]
    pub rate: f32,

    #[clap(long, env = "SPEECH_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[clap(long, env = "SPEECH_REGION")]
    pub region: Option<String>,

    /// File of word=pronunciation lines applied to the notes
    #[clap(long)]
    pub pronunciation_mapping: Option<PathBuf>,

    #[clap(long, default_value_t = 1920)]
    pub video_width: u32,

    #[clap(long, default_value_t = 1080)]
    pub video_height: u32,

    #[clap(long, default_value_t = 5)]
    pub fps: u32,

    #[clap(long, default_value = "libx264")]
    pub video_codec: String,

    #[clap(long, default_value = "aac")]
    pub audio_codec: String,

    /// Shortest time any slide stays on screen, in milliseconds
    #[clap(long, default_value_t = 3000)]
    pub min_display_ms: u64,

    /// Concurrent speech requests
    #[clap(long, default_value_t = 4)]
    pub jobs: usize,

    /// Give up before encoding when more than this share of slides lost their audio
    #[clap(long, default_value_t = 0.5)]
    pub max_failure_ratio: f64,

    /// Per-request timeout for the cloud provider, in seconds
    #[clap(long, default_value_t = 60)]
    pub request_timeout: u64,

    /// Directory for intermediate files (default: a new temp dir, kept after the run)
    #[clap(long)]
    pub work_dir: Option<PathBuf>,

    /// Write the assembly plan as JSON
    #[clap(long)]
    pub plan_out: Option<PathBuf>,

    /// Write an SRT file with each slide's narration
    #[clap(long)]
    pub subtitles: Option<PathBuf>,
}

impl Args {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.silence.is_finite() || self.silence < 0.0 {
            anyhow::bail!("--silence must be a non-negative number of seconds");
        }
        if !(self.rate.is_finite() && self.rate > 0.0) {
            anyhow::bail!("--rate must be positive");
        }
        if self.min_display_ms == 0 {
            anyhow::bail!("--min-display-ms must be positive");
        }
        if self.jobs == 0 {
            anyhow::bail!("--jobs must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.max_failure_ratio) {
            anyhow::bail!("--max-failure-ratio must be between 0 and 1");
        }
        if self.fps == 0 || self.video_width == 0 || self.video_height == 0 {
            anyhow::bail!("video size and frame rate must be positive");
        }
        Ok(())
    }
}
