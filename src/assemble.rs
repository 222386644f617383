use crate::error::AssemblyError;
use crate::model::{AssemblyPlan, SlidePlanEntry};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

const AUDIO_SAMPLE_RATE: &str = "44100";

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub video_codec: String,
    pub audio_codec: String,
}

#[async_trait]
pub trait AssemblyInvoker: Send + Sync {
    async fn assemble(
        &self,
        plan: &AssemblyPlan,
        output: &Path,
        encoder: &EncoderConfig,
    ) -> Result<(), AssemblyError>;
}

/// Encodes one segment per slide, then joins them with the concat demuxer.
pub struct FfmpegAssembler {
    pub ffmpeg_bin: String,
    /// Segments and the concat list go here.
    pub segment_dir: PathBuf,
}

impl FfmpegAssembler {
    pub fn new(segment_dir: PathBuf) -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            segment_dir,
        }
    }

    async fn ffmpeg(&self, step: &str, args: &[String]) -> Result<(), AssemblyError> {
        debug!("{}: {} {}", step, self.ffmpeg_bin, args.join(" "));
        let output = Command::new(&self.ffmpeg_bin)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => AssemblyError::EncoderMissing(self.ffmpeg_bin.clone()),
                _ => AssemblyError::Io(e),
            })?;
        if !output.status.success() {
            return Err(AssemblyError::EncoderFailed {
                step: step.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

pub fn format_seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Container extension of the output file, used for the segments too so the
/// final join can stream-copy.
pub fn container_extension(output: &Path) -> String {
    output
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_else(|| "mp4".to_string())
}

/// ffmpeg arguments for one slide: the still image looped for exactly the
/// display duration, over its audio padded with silence (or pure silence).
pub fn segment_args(entry: &SlidePlanEntry, encoder: &EncoderConfig, segment: &Path) -> Vec<String> {
    let (w, h) = (encoder.width, encoder.height);
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-loop".into(),
        "1".into(),
        "-framerate".into(),
        encoder.frame_rate.to_string(),
        "-i".into(),
        entry.image_path.to_string_lossy().into_owned(),
    ];
    match &entry.audio_path {
        Some(audio) => {
            args.extend(["-i".into(), audio.to_string_lossy().into_owned()]);
            args.extend(["-af".into(), "apad".into()]);
        }
        None => args.extend([
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!("anullsrc=r={}:cl=mono", AUDIO_SAMPLE_RATE),
        ]),
    }
    args.extend([
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "1:a:0".into(),
        "-vf".into(),
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,format=yuv420p"
        ),
        "-r".into(),
        encoder.frame_rate.to_string(),
        "-c:v".into(),
        encoder.video_codec.clone(),
    ]);
    if encoder.video_codec == "libx264" {
        args.extend(["-tune".into(), "stillimage".into()]);
    }
    args.extend([
        "-c:a".into(),
        encoder.audio_codec.clone(),
        "-ar".into(),
        AUDIO_SAMPLE_RATE.into(),
        "-ac".into(),
        "1".into(),
        "-t".into(),
        format_seconds(entry.display_duration_ms),
        segment.to_string_lossy().into_owned(),
    ]);
    args
}

/// Joins segments by stream copy, or re-encodes when `reencode` is given.
pub fn concat_args(list: &Path, output: &Path, reencode: Option<&EncoderConfig>) -> Vec<String> {
    let codecs: Vec<String> = match reencode {
        Some(encoder) => vec![
            "-c:v".into(),
            encoder.video_codec.clone(),
            "-c:a".into(),
            encoder.audio_codec.clone(),
        ],
        None => vec!["-c".into(), "copy".into()],
    };
    [
        "-y",
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "concat",
        "-safe",
        "0",
        "-i",
    ]
    .into_iter()
    .map(String::from)
    .chain(std::iter::once(list.to_string_lossy().into_owned()))
    .chain(codecs)
    .chain(std::iter::once(output.to_string_lossy().into_owned()))
    .collect()
}

/// Concat demuxer list; single quotes in paths are closed, escaped and reopened.
pub fn concat_list(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', r"'\''")))
        .collect()
}

#[async_trait]
impl AssemblyInvoker for FfmpegAssembler {
    async fn assemble(
        &self,
        plan: &AssemblyPlan,
        output: &Path,
        encoder: &EncoderConfig,
    ) -> Result<(), AssemblyError> {
        if plan.is_empty() {
            return Err(AssemblyError::EmptyPlan);
        }
        fs::create_dir_all(&self.segment_dir).await?;
        let ext = container_extension(output);

        let mut segments = Vec::with_capacity(plan.len());
        for entry in &plan.entries {
            let segment = self
                .segment_dir
                .join(format!("video_{}.{}", entry.source_number, ext));
            info!(
                "Creating video of slide {} ({} s, {})",
                entry.source_number,
                format_seconds(entry.display_duration_ms),
                if entry.audio_path.is_some() { "narrated" } else { "silent" }
            );
            self.ffmpeg(
                &format!("segment for slide {}", entry.source_number),
                &segment_args(entry, encoder, &segment),
            )
            .await?;
            segments.push(std::path::absolute(&segment)?);
        }

        let list = self.segment_dir.join("concat.txt");
        fs::write(&list, concat_list(&segments)).await?;

        info!("Concatenating {} slide videos into {}", segments.len(), output.display());
        if let Err(e) = self.ffmpeg("concat", &concat_args(&list, output, None)).await {
            warn!("ffmpeg concat with copy failed ({}); retrying with re-encode", e);
            self.ffmpeg("concat re-encode", &concat_args(&list, output, Some(encoder)))
                .await?;
        }
        Ok(())
    }
}
