//! Azure AI Speech over its REST endpoint.

use crate::audio::wav_duration_ms;
use crate::error::{SynthesisError, SynthesisErrorKind};
use crate::model::AudioClip;
use crate::tts::{SpeechSynthesizer, SynthesisRequest, VoiceConfig};
use async_trait::async_trait;
use quick_xml::escape::escape;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

const OUTPUT_FORMAT: &str = "riff-24khz-16bit-mono-pcm";

pub struct AzureSynthesizer {
    http_client: reqwest::Client,
    /// Overrides `https://{region}.tts.speech.microsoft.com`.
    endpoint: Option<String>,
}

impl AzureSynthesizer {
    pub fn new(timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("slidecast/0.1")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http_client,
            endpoint: None,
        }
    }

    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn url(&self, voice: &VoiceConfig) -> Result<String, SynthesisError> {
        let base = match (&self.endpoint, &voice.region) {
            (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
            (None, Some(region)) => format!("https://{}.tts.speech.microsoft.com", region),
            (None, None) => {
                return Err(SynthesisError::new(
                    SynthesisErrorKind::Config,
                    "no speech region configured (SPEECH_REGION)",
                ));
            }
        };
        Ok(format!("{}/cognitiveservices/v1", base))
    }
}

/// `en-GB-SoniaNeural` speaks `en-GB`.
fn voice_language(voice_id: &str) -> String {
    let mut parts = voice_id.splitn(3, '-');
    match (parts.next(), parts.next()) {
        (Some(lang), Some(region)) if !lang.is_empty() && !region.is_empty() => {
            format!("{}-{}", lang, region)
        }
        _ => "en-US".to_string(),
    }
}

pub fn build_ssml(text: &str, voice: &VoiceConfig) -> String {
    let percent = ((voice.rate - 1.0) * 100.0).round() as i32;
    format!(
        "<speak version='1.0' xml:lang='{lang}'><voice name='{name}'><prosody rate='{percent:+}%'>{text}</prosody></voice></speak>",
        lang = voice_language(&voice.voice_id),
        name = escape(voice.voice_id.as_str()),
        percent = percent,
        text = escape(text),
    )
}

fn status_error(status: StatusCode, body: &str) -> SynthesisError {
    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SynthesisErrorKind::Auth,
        StatusCode::TOO_MANY_REQUESTS => SynthesisErrorKind::Quota,
        StatusCode::BAD_REQUEST => SynthesisErrorKind::Config,
        _ => SynthesisErrorKind::Network,
    };
    SynthesisError::new(kind, format!("speech service returned {}: {}", status, body.trim()))
}

#[async_trait]
impl SpeechSynthesizer for AzureSynthesizer {
    async fn synthesize(
        &self,
        request: &SynthesisRequest,
        voice: &VoiceConfig,
    ) -> Result<AudioClip, SynthesisError> {
        let key = voice.api_key.as_deref().ok_or_else(|| {
            SynthesisError::new(SynthesisErrorKind::Auth, "no speech key configured (SPEECH_KEY)")
        })?;
        let url = self.url(voice)?;
        debug!("Requesting speech for slide {} from {}", request.slide_index, url);

        let response = self
            .http_client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .body(build_ssml(&request.text, voice))
            .send()
            .await
            .map_err(|e| {
                warn!("Speech request for slide {} failed: {}", request.slide_index, e);
                SynthesisError::new(SynthesisErrorKind::Network, e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::new(SynthesisErrorKind::Network, e.to_string()))?;
        tokio::fs::write(&request.out_path, &audio)
            .await
            .map_err(|e| SynthesisError::new(SynthesisErrorKind::Audio, e.to_string()))?;

        let duration_ms = wav_duration_ms(&request.out_path)?;
        Ok(AudioClip::ok(
            request.slide_index,
            request.out_path.clone(),
            duration_ms,
        ))
    }
}
