//! Murmur: a hands-free local voice assistant pipeline
//!
//! Audio flows through a gated pipeline: a wake word opens a recording
//! session seeded with pre-roll audio, an energy VAD decides when the
//! utterance is over, the transcript goes to a chat backend that may
//! call tools, and the reply is synthesized and played back. An MQTT
//! event bus mirrors the pipeline for other systems on the network.

pub mod agent;
pub mod audio;
pub mod bus;
pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod session;
pub mod stt;
pub mod tools;
pub mod tts;
pub mod vad;
pub mod wake;

pub use error::{Error, Result};
