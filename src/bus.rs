//! MQTT event bus
//!
//! Publishes pipeline events (transcriptions, session status, replies)
//! for other systems on the network, and receives externally generated
//! responses to speak. Publishing is best-effort: a broker outage is
//! logged and the voice pipeline carries on.

use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::config::BusConfig;
use crate::{Error, Result};

/// Handle for publishing pipeline events over MQTT
pub struct EventBus {
    client: AsyncClient,
    transcription_topic: String,
    status_topic: String,
    response_topic: String,
}

impl EventBus {
    /// Connect to the broker and subscribe to the external response topic
    ///
    /// Returns the bus and a channel of externally published response
    /// texts. The connection event loop runs on a background task and
    /// reconnects on its own.
    ///
    /// # Errors
    ///
    /// Returns error if the initial subscribe cannot be queued
    pub async fn connect(config: &BusConfig) -> Result<(Self, mpsc::Receiver<String>)> {
        let mut options = MqttOptions::new(
            format!("murmur-{}", std::process::id()),
            &config.host,
            config.port,
        );
        options.set_keep_alive(std::time::Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, 16);
        client
            .subscribe(&config.external_response_topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::Bus(e.to_string()))?;

        let (tx, rx) = mpsc::channel(16);
        let external_topic = config.external_response_topic.clone();
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if publish.topic == external_topic {
                            if let Some(text) = decode_response(&publish.payload) {
                                tracing::debug!(topic = %publish.topic, "external response received");
                                if tx.send(text).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "MQTT connection error, retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        });

        tracing::info!(host = %config.host, port = config.port, "event bus connected");

        Ok((
            Self {
                client,
                transcription_topic: config.transcription_topic.clone(),
                status_topic: config.status_topic.clone(),
                response_topic: config.response_topic.clone(),
            },
            rx,
        ))
    }

    /// Publish a transcription event
    pub async fn publish_transcription(&self, text: &str) {
        let payload = json!({ "text": text, "timestamp": Utc::now().to_rfc3339() });
        self.publish(&self.transcription_topic, &payload).await;
    }

    /// Publish a session status change
    pub async fn publish_status(&self, state: &str) {
        let payload = json!({ "state": state, "timestamp": Utc::now().to_rfc3339() });
        self.publish(&self.status_topic, &payload).await;
    }

    /// Publish the assistant's spoken reply
    pub async fn publish_response(&self, text: &str) {
        let payload = json!({ "text": text, "timestamp": Utc::now().to_rfc3339() });
        self.publish(&self.response_topic, &payload).await;
    }

    async fn publish(&self, topic: &str, payload: &Value) {
        let result = self
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_string())
            .await;
        if let Err(e) = result {
            tracing::warn!(topic, error = %e, "event publish failed");
        }
    }
}

/// Accept either `{"text": "..."}` or a raw UTF-8 payload
fn decode_response(payload: &[u8]) -> Option<String> {
    let raw = std::str::from_utf8(payload).ok()?;
    let text = serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|value| {
            value
                .get("text")
                .and_then(Value::as_str)
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| raw.to_string());

    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_payloads_extract_text() {
        assert_eq!(
            decode_response(br#"{"text": "dinner is ready"}"#),
            Some("dinner is ready".to_string())
        );
    }

    #[test]
    fn raw_payloads_pass_through() {
        assert_eq!(
            decode_response(b"dinner is ready"),
            Some("dinner is ready".to_string())
        );
    }

    #[test]
    fn empty_and_invalid_payloads_drop() {
        assert_eq!(decode_response(b"   "), None);
        assert_eq!(decode_response(&[0xff, 0xfe]), None);
    }
}
