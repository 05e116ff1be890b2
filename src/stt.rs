//! Speech-to-text
//!
//! Two providers: the hosted Whisper API, and a local `whisper` CLI run
//! as a subprocess. Both take the recorded f32 samples, encode them to
//! WAV, and return plain transcript text. Every path is bounded by the
//! configured timeout so a stuck provider cannot wedge a session.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::audio::{SAMPLE_RATE, samples_to_wav};
use crate::config::{ApiKeys, SttConfig};
use crate::{Error, Result};

const WHISPER_API_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Turns recorded audio into transcript text
pub struct Transcriber {
    provider: String,
    model: String,
    timeout: Duration,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl Transcriber {
    /// Build a transcriber for the configured provider
    ///
    /// # Errors
    ///
    /// Returns error for an unknown provider or a missing API key
    pub fn new(config: &SttConfig, keys: &ApiKeys) -> Result<Self> {
        match config.provider.as_str() {
            "whisper-api" => {
                if keys.openai.is_none() {
                    return Err(Error::Config(
                        "whisper-api requires OPENAI_API_KEY".to_string(),
                    ));
                }
            }
            "whisper-local" => {}
            other => {
                return Err(Error::Config(format!("unknown STT provider: {other}")));
            }
        }

        Ok(Self {
            provider: config.provider.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            api_key: keys.openai.clone(),
            client: reqwest::Client::new(),
        })
    }

    /// Transcribe one recorded utterance
    ///
    /// # Errors
    ///
    /// Returns error if encoding, the provider call, or the timeout fails
    pub async fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let wav = samples_to_wav(samples, SAMPLE_RATE)?;
        tracing::debug!(
            provider = %self.provider,
            bytes = wav.len(),
            "transcribing utterance"
        );

        let text = match self.provider.as_str() {
            "whisper-local" => self.transcribe_local(&wav).await?,
            _ => self.transcribe_api(wav).await?,
        };

        let text = text.trim().to_string();
        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }

    async fn transcribe_api(&self, wav: Vec<u8>) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY not set".to_string()))?;

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "text");

        let request = self
            .client
            .post(WHISPER_API_URL)
            .bearer_auth(api_key)
            .multipart(form)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| Error::Stt("transcription request timed out".to_string()))??;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Whisper API error {status}: {detail}")));
        }

        Ok(response.text().await?)
    }

    /// Run the `whisper` CLI against a temp WAV; the child is killed if
    /// it outlives the timeout
    async fn transcribe_local(&self, wav: &[u8]) -> Result<String> {
        let dir = tempfile::tempdir()?;
        let wav_path = dir.path().join("utterance.wav");
        tokio::fs::write(&wav_path, wav).await?;

        let mut child = Command::new("whisper")
            .arg(&wav_path)
            .args(["--model", &self.model])
            .args(["--output_format", "txt"])
            .arg("--output_dir")
            .arg(dir.path())
            .arg("--fp16")
            .arg("False")
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Stt(format!("failed to launch whisper: {e}")))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                child.start_kill().ok();
                return Err(Error::Stt("local whisper timed out".to_string()));
            }
        };

        if !status.success() {
            let mut detail = String::new();
            if let Some(mut stderr) = child.stderr.take() {
                stderr.read_to_string(&mut detail).await.ok();
            }
            return Err(Error::Stt(format!(
                "whisper exited with {status}: {}",
                detail.trim()
            )));
        }

        let transcript_path = dir.path().join("utterance.txt");
        let text = tokio::fs::read_to_string(&transcript_path)
            .await
            .map_err(|e| Error::Stt(format!("whisper produced no transcript: {e}")))?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys_with_openai() -> ApiKeys {
        ApiKeys {
            openai: Some("sk-test".to_string()),
            ..ApiKeys::default()
        }
    }

    #[test]
    fn api_provider_requires_key() {
        let config = SttConfig::default();
        assert!(Transcriber::new(&config, &ApiKeys::default()).is_err());
        assert!(Transcriber::new(&config, &keys_with_openai()).is_ok());
    }

    #[test]
    fn local_provider_needs_no_key() {
        let config = SttConfig {
            provider: "whisper-local".to_string(),
            model: "base".to_string(),
            ..SttConfig::default()
        };
        assert!(Transcriber::new(&config, &ApiKeys::default()).is_ok());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = SttConfig {
            provider: "dictation9000".to_string(),
            ..SttConfig::default()
        };
        assert!(Transcriber::new(&config, &keys_with_openai()).is_err());
    }
}
