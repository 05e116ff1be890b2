//! Text-to-speech
//!
//! Synthesizes reply text to MP3 bytes through either the `OpenAI` speech
//! endpoint or `ElevenLabs`. Playback and decoding live in the audio
//! layer; this module is transport only.

use futures::{Stream, StreamExt};
use serde_json::json;

use crate::config::{ApiKeys, TtsConfig};
use crate::{Error, Result};

const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";
const ELEVENLABS_TTS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// Synthesizes speech from reply text
pub struct Synthesizer {
    provider: String,
    model: String,
    voice: String,
    speed: f64,
    api_key: String,
    client: reqwest::Client,
}

impl Synthesizer {
    /// Build a synthesizer for the configured provider
    ///
    /// # Errors
    ///
    /// Returns error for an unknown provider or a missing API key
    pub fn new(config: &TtsConfig, keys: &ApiKeys) -> Result<Self> {
        let api_key = match config.provider.as_str() {
            "openai" => keys
                .openai
                .clone()
                .ok_or_else(|| Error::Config("OPENAI_API_KEY not set".to_string()))?,
            "elevenlabs" => keys
                .elevenlabs
                .clone()
                .ok_or_else(|| Error::Config("ELEVENLABS_API_KEY not set".to_string()))?,
            other => {
                return Err(Error::Config(format!("unknown TTS provider: {other}")));
            }
        };

        Ok(Self {
            provider: config.provider.clone(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            speed: config.speed,
            api_key,
            client: reqwest::Client::new(),
        })
    }

    /// Synthesize `text` to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(provider = %self.provider, chars = text.len(), "synthesizing speech");

        let response = match self.provider.as_str() {
            "elevenlabs" => self.elevenlabs_request(text).await?,
            _ => self.openai_request(text).await?,
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {detail}")));
        }

        let audio = response.bytes().await?.to_vec();
        if audio.is_empty() {
            return Err(Error::Tts("TTS returned no audio".to_string()));
        }
        tracing::debug!(bytes = audio.len(), "speech synthesized");
        Ok(audio)
    }

    /// Synthesize `text`, yielding audio bytes as the provider sends them
    ///
    /// Lets a caller start playback before the full utterance is ready.
    ///
    /// # Errors
    ///
    /// Returns error if the provider rejects the request; mid-stream
    /// failures surface as stream items
    pub async fn synthesize_stream(
        &self,
        text: &str,
    ) -> Result<impl Stream<Item = Result<Vec<u8>>>> {
        let response = match self.provider.as_str() {
            "elevenlabs" => self.elevenlabs_request(text).await?,
            _ => self.openai_request(text).await?,
        };

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {detail}")));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(Error::from)))
    }

    async fn openai_request(&self, text: &str) -> Result<reqwest::Response> {
        let body = json!({
            "model": self.model,
            "voice": self.voice,
            "input": text,
            "speed": self.speed,
            "response_format": "mp3",
        });

        Ok(self
            .client
            .post(OPENAI_SPEECH_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?)
    }

    async fn elevenlabs_request(&self, text: &str) -> Result<reqwest::Response> {
        let body = json!({
            "text": text,
            "model_id": self.model,
        });

        Ok(self
            .client
            .post(format!("{ELEVENLABS_TTS_URL}/{}", self.voice))
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_key_requirements() {
        let openai_keys = ApiKeys {
            openai: Some("sk-test".to_string()),
            ..ApiKeys::default()
        };
        assert!(Synthesizer::new(&TtsConfig::default(), &openai_keys).is_ok());
        assert!(Synthesizer::new(&TtsConfig::default(), &ApiKeys::default()).is_err());

        let eleven = TtsConfig {
            provider: "elevenlabs".to_string(),
            model: "eleven_turbo_v2".to_string(),
            ..TtsConfig::default()
        };
        assert!(Synthesizer::new(&eleven, &openai_keys).is_err());
        let eleven_keys = ApiKeys {
            elevenlabs: Some("el-test".to_string()),
            ..ApiKeys::default()
        };
        assert!(Synthesizer::new(&eleven, &eleven_keys).is_ok());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = TtsConfig {
            provider: "speakatron".to_string(),
            ..TtsConfig::default()
        };
        assert!(Synthesizer::new(&config, &ApiKeys::default()).is_err());
    }
}
