//! Speech I/O through external services.
//!
//! Synthesis goes to a local TTS server first and falls back to the OpenAI speech
//! endpoint; transcription always uses the OpenAI transcription endpoint. Nothing here
//! touches session state.

use crate::generator::DEFAULT_BASE_URL;
use anyhow::{Context, Result};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_TTS_SERVER_URL: &str = "http://localhost:5000";
/// Voice requested from the local TTS server.
pub const LOCAL_TTS_VOICE: &str = "af_heart";
/// Voice requested from the fallback service when the caller names none.
pub const FALLBACK_TTS_VOICE: &str = "nova";

const LOCAL_TTS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct SpeechClient {
    client: Client,
    api_key: Option<SecretString>,
    base_url: String,
    tts_server_url: String,
}

impl SpeechClient {
    pub fn new(api_key: Option<SecretString>, tts_server_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            tts_server_url: tts_server_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Synthesises `text` and returns the encoded audio bytes.
    pub async fn text_to_speech(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>> {
        match self.local_tts(text).await {
            Ok(audio) => return Ok(audio),
            Err(e) => tracing::warn!("Local TTS server unavailable, falling back: {:#}", e),
        }

        let voice = voice
            .filter(|v| !v.is_empty() && *v != "default")
            .unwrap_or(FALLBACK_TTS_VOICE);
        let body = serde_json::json!({
            "model": "tts-1",
            "voice": voice,
            "input": text,
        });

        let audio = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(self.api_key()?)
            .json(&body)
            .send()
            .await
            .context("Failed to reach the speech endpoint")?
            .error_for_status()
            .context("Speech request was rejected")?
            .bytes()
            .await
            .context("Failed to read synthesised audio")?;

        Ok(audio.to_vec())
    }

    /// Transcribes an uploaded audio file.
    pub async fn speech_to_text(&self, audio: Vec<u8>, file_name: &str) -> Result<String> {
        let file_name = if file_name.is_empty() {
            "audio.wav"
        } else {
            file_name
        };
        let form = Form::new()
            .text("model", "whisper-1")
            .part("file", Part::bytes(audio).file_name(file_name.to_string()));

        let resp = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key()?)
            .multipart(form)
            .send()
            .await
            .context("Failed to reach the transcription endpoint")?
            .error_for_status()
            .context("Transcription request was rejected")?
            .json::<TranscriptionResponse>()
            .await
            .context("Failed to decode transcription response")?;

        Ok(resp.text)
    }

    async fn local_tts(&self, text: &str) -> Result<Vec<u8>> {
        let body = serde_json::json!({ "text": text, "voice": LOCAL_TTS_VOICE });
        let audio = self
            .client
            .post(format!("{}/synthesize", self.tts_server_url))
            .timeout(LOCAL_TTS_TIMEOUT)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(audio.to_vec())
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is not configured"))
    }
}
