use crate::audio::wav_duration_ms;
use crate::error::{SynthesisError, SynthesisErrorKind};
use crate::model::AudioClip;
use async_trait::async_trait;
use clap::ValueEnum;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// Piper running on this machine.
    Local,
    /// Azure AI Speech.
    Cloud,
}

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub provider: Provider,
    /// Azure voice name, or the Piper model path for the local provider.
    pub voice_id: String,
    /// Speaking rate, 1.0 is the voice's natural pace.
    pub rate: f32,
    pub api_key: Option<String>,
    pub region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub slide_index: usize,
    pub text: String,
    /// WAV file to write.
    pub out_path: PathBuf,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        request: &SynthesisRequest,
        voice: &VoiceConfig,
    ) -> Result<AudioClip, SynthesisError>;
}

pub struct PiperSynthesizer {
    pub piper_bin: String,
}

impl Default for PiperSynthesizer {
    fn default() -> Self {
        Self {
            piper_bin: "piper".to_string(),
        }
    }
}

fn length_scale(rate: f32) -> String {
    let rate = if rate > 0.0 { rate } else { 1.0 };
    format!("{:.3}", 1.0 / rate)
}

#[async_trait]
impl SpeechSynthesizer for PiperSynthesizer {
    async fn synthesize(
        &self,
        request: &SynthesisRequest,
        voice: &VoiceConfig,
    ) -> Result<AudioClip, SynthesisError> {
        let out = request.out_path.to_string_lossy().to_string();
        let scale = length_scale(voice.rate);
        debug!("Calling Piper for slide {} -> {}", request.slide_index, out);

        let mut child = Command::new(&self.piper_bin)
            .args([
                "--model",
                voice.voice_id.as_str(),
                "--output_file",
                out.as_str(),
                "--length_scale",
                scale.as_str(),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SynthesisError::new(
                    SynthesisErrorKind::Engine,
                    format!("failed to spawn {}: {}", self.piper_bin, e),
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.text.as_bytes())
                .await
                .map_err(|e| SynthesisError::new(SynthesisErrorKind::Engine, e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SynthesisError::new(SynthesisErrorKind::Engine, e.to_string()))?;
        if !output.status.success() {
            error!("Piper TTS command failed for slide {}: {}", request.slide_index, out);
            return Err(SynthesisError::new(
                SynthesisErrorKind::Engine,
                format!(
                    "piper exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let duration_ms = wav_duration_ms(&request.out_path)?;
        Ok(AudioClip::ok(
            request.slide_index,
            request.out_path.clone(),
            duration_ms,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_voice() -> VoiceConfig {
        VoiceConfig {
            provider: Provider::Local,
            voice_id: "en_US-amy-medium.onnx".to_string(),
            rate: 1.0,
            api_key: None,
            region: None,
        }
    }

    #[test]
    fn rate_maps_to_inverse_length_scale() {
        assert_eq!(length_scale(1.0), "1.000");
        assert_eq!(length_scale(2.0), "0.500");
        assert_eq!(length_scale(0.0), "1.000");
    }

    #[tokio::test]
    async fn missing_engine_is_an_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let synth = PiperSynthesizer {
            piper_bin: "slidecast-no-such-piper".to_string(),
        };
        let request = SynthesisRequest {
            slide_index: 0,
            text: "hello".to_string(),
            out_path: dir.path().join("a.wav"),
        };
        let err = synth.synthesize(&request, &local_voice()).await.unwrap_err();
        assert_eq!(err.kind, SynthesisErrorKind::Engine);
    }
}
