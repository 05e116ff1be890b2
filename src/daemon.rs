//! Voice assistant daemon
//!
//! Owns the full pipeline and its lifecycle: startup in dependency
//! order, the frame routing loop, the per-utterance
//! record/transcribe/respond/speak cycle, and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::agent::AiRouter;
use crate::audio::{AudioCapture, PlaybackController};
use crate::bus::EventBus;
use crate::config::Config;
use crate::context::ConversationContext;
use crate::session::{RecordingSession, SessionEvent, SessionMachine, SessionState};
use crate::stt::Transcriber;
use crate::tools::{
    CurrentTimeTool, LocalTool, McpClient, ToolExecutor, ToolRegistry, discover_with_retry,
};
use crate::tts::Synthesizer;
use crate::vad::VoiceActivityDetector;
use crate::wake::WakeWordGate;
use crate::{Error, Result};

/// How often the main loop drains capture frames
const TICK: Duration = Duration::from_millis(30);

/// Spoken when a turn fails after a successful transcription
const FALLBACK_REPLY: &str = "Sorry, I ran into a problem with that. Please try again.";

/// The assembled pipeline
pub struct Daemon {
    config: Config,
    capture: AudioCapture,
    playback: Arc<PlaybackController>,
    wake: WakeWordGate,
    machine: SessionMachine,
    recording: RecordingSession,
    vad: Option<VoiceActivityDetector>,
    context: ConversationContext,
    router: AiRouter,
    registry: ToolRegistry,
    executor: ToolExecutor,
    transcriber: Transcriber,
    synthesizer: Synthesizer,
    bus: Option<EventBus>,
    external_rx: Option<mpsc::Receiver<String>>,
}

impl Daemon {
    /// Construct the pipeline in dependency order
    ///
    /// Fails fast on anything the assistant cannot run without: audio
    /// devices, provider configuration. The MCP server and the event
    /// bus are optional; their absence degrades, never aborts.
    ///
    /// # Errors
    ///
    /// Returns error if a required component cannot be built
    pub async fn build(config: Config) -> Result<Self> {
        let capture = AudioCapture::new()?;
        let playback = Arc::new(PlaybackController::new()?);

        let transcriber = Transcriber::new(&config.stt, &config.api_keys)?;
        let synthesizer = Synthesizer::new(&config.tts, &config.api_keys)?;
        let router = AiRouter::new(&config.llm, &config.api_keys)?;

        let (bus, external_rx) = if config.bus.enabled {
            match EventBus::connect(&config.bus).await {
                Ok((bus, rx)) => (Some(bus), Some(rx)),
                Err(e) => {
                    tracing::warn!(error = %e, "event bus unavailable, continuing without it");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let locals: Vec<Box<dyn LocalTool>> = vec![Box::new(CurrentTimeTool)];
        let mut registry = ToolRegistry::with_builtins(&locals);
        let mcp = if config.mcp.url.is_empty() {
            None
        } else {
            let client = McpClient::new(&config.mcp);
            match discover_with_retry(&client, &config.mcp).await {
                Ok(tools) => {
                    registry.extend_discovered(tools);
                    Some(client)
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "MCP discovery failed, running with local tools only"
                    );
                    None
                }
            }
        };
        let executor = ToolExecutor::new(vec![Box::new(CurrentTimeTool)], mcp);

        tracing::info!(
            provider = router.provider(),
            tools = registry.len(),
            "pipeline assembled"
        );

        Ok(Self {
            wake: WakeWordGate::new(&config.wake),
            recording: RecordingSession::new(config.recording.preroll_ms),
            context: ConversationContext::new(config.conversation.timeout_secs),
            machine: SessionMachine::new(),
            vad: None,
            capture,
            playback,
            router,
            registry,
            executor,
            transcriber,
            synthesizer,
            bus,
            external_rx,
            config,
        })
    }

    /// Run until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if capture cannot start
    pub async fn run(&mut self) -> Result<()> {
        if !self.config.greeting.text.is_empty() {
            let greeting = self.config.greeting.text.clone();
            if let Err(e) = self.speak(&greeting).await {
                tracing::warn!(error = %e, "greeting playback failed");
            }
        }

        // Capture comes up only after the greeting, so the first frames
        // the gate sees are the room, not our own voice
        self.capture.start()?;
        self.machine.apply(SessionEvent::Ready);
        self.publish_status("listening").await;
        tracing::info!("assistant ready");

        // Taken out of self so the select arms borrow disjoint state
        let mut external_rx = self.external_rx.take();

        let mut tick = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = tick.tick() => self.on_tick().await,
                Some(text) = recv_external(&mut external_rx) => {
                    self.on_external_response(&text).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down");
                    break;
                }
            }
        }

        self.playback.interrupt();
        self.capture.stop();
        self.publish_status("stopped").await;
        Ok(())
    }

    async fn on_tick(&mut self) {
        match self.machine.current() {
            SessionState::Listening => {
                if self.scan_for_wake() {
                    self.begin_recording().await;
                }
            }
            SessionState::Recording => {
                if let Some(samples) = self.advance_recording() {
                    self.machine.apply(SessionEvent::StopRecording);
                    self.publish_status("processing").await;
                    self.run_turn(&samples).await;
                    // A barge-in mid-reply already moved the machine back
                    // to Recording; only a completed turn cools down
                    if self.machine.current() == SessionState::Processing {
                        self.machine.apply(SessionEvent::ReplyDone);
                        self.publish_status("cooldown").await;
                    }
                }
            }
            SessionState::Cooldown => {
                let elapsed = self.machine.in_state_for();
                if elapsed >= Duration::from_millis(self.config.recording.cooldown_ms) {
                    // Drop anything captured while the assistant was busy
                    self.capture.discard();
                    self.wake.reset();
                    self.machine.apply(SessionEvent::CooldownOver);
                    self.publish_status("listening").await;
                }
            }
            SessionState::Idle | SessionState::Processing => {}
        }
    }

    /// Feed idle frames to the pre-roll ring and the wake gate
    fn scan_for_wake(&mut self) -> bool {
        for frame in self.capture.drain_frames() {
            self.recording.feed_preroll(&frame);
            let detection = self.wake.feed(&frame);
            if detection.detected {
                tracing::info!(
                    score = detection.score,
                    label = detection.label.as_deref().unwrap_or_default(),
                    "wake word detected"
                );
                return true;
            }
        }
        false
    }

    async fn begin_recording(&mut self) {
        self.machine.apply(SessionEvent::WakeDetected);
        self.recording.start();
        self.vad = Some(VoiceActivityDetector::new(&self.config.vad));
        self.publish_status("recording").await;

        if let Err(e) = self.playback.play_cue().await {
            tracing::warn!(error = %e, "acknowledgement cue failed");
        }
        // The cue's microphone echo must not reach the take or trip the
        // VAD; the pre-roll already holds the user's lead-in
        self.capture.discard();
    }

    /// Returns the finished utterance once the VAD calls a stop
    fn advance_recording(&mut self) -> Option<Vec<f32>> {
        let vad = self.vad.as_mut()?;

        for frame in self.capture.drain_frames() {
            self.recording.append(&frame);
            let decision = vad.process(&frame);
            if decision.should_stop {
                tracing::info!(
                    reason = ?decision.reason,
                    has_spoken = decision.has_spoken,
                    samples = self.recording.len(),
                    "recording finished"
                );
                return Some(self.recording.stop());
            }
        }
        None
    }

    /// Transcribe, respond, speak: one full conversation turn
    ///
    /// Every failure is handled here; the session machine always moves
    /// on afterwards.
    async fn run_turn(&mut self, samples: &[f32]) {
        let spoke = self.vad.take().is_some_and(|vad| vad.has_spoken());
        if !spoke {
            tracing::info!("no speech in recording, skipping turn");
            return;
        }

        let transcript = match turn_input(self.transcriber.transcribe(samples).await) {
            TurnInput::Transcript(text) => text,
            TurnInput::Skip => {
                tracing::info!("empty transcript, skipping turn");
                return;
            }
            TurnInput::Fallback => {
                if let Err(e) = self.speak(FALLBACK_REPLY).await {
                    tracing::error!(error = %e, "fallback playback failed");
                }
                return;
            }
        };
        self.publish_transcription(&transcript).await;

        let reply = match self
            .router
            .respond(&transcript, &mut self.context, &self.registry, &self.executor)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(error = %e, "reply generation failed");
                FALLBACK_REPLY.to_string()
            }
        };

        self.publish_response(&reply).await;
        if let Err(e) = self.speak(&reply).await {
            tracing::error!(error = %e, "reply playback failed");
        }
    }

    /// Synthesize and play `text`, watching for barge-in while it plays
    ///
    /// On barge-in the playback is cancelled and a new recording starts
    /// immediately.
    async fn speak(&mut self, text: &str) -> Result<()> {
        let mp3 = self.synthesizer.synthesize(text).await?;

        if !self.config.wake.barge_in {
            return self.playback.play_speech(&mp3).await;
        }

        // Raise the wake threshold while our own voice is audible
        self.wake.set_margin(self.config.wake.barge_in_margin);

        let playback = Arc::clone(&self.playback);
        let audio = mp3;
        let play = async move { playback.play_speech(&audio).await };
        tokio::pin!(play);

        let mut interrupted = false;
        let mut tick = tokio::time::interval(TICK);
        let result = loop {
            tokio::select! {
                result = &mut play => break result,
                _ = tick.tick() => {
                    if self.scan_for_wake() {
                        tracing::info!("barge-in detected, stopping playback");
                        self.playback.interrupt();
                        interrupted = true;
                    }
                }
            }
        };

        self.wake.set_margin(0.0);

        if interrupted {
            self.begin_recording().await;
        }
        result
    }

    /// Speak an externally generated response, but only when idle
    async fn on_external_response(&mut self, text: &str) {
        if self.machine.current() != SessionState::Listening {
            tracing::debug!(state = %self.machine.current(), "dropping external response, not idle");
            return;
        }
        tracing::info!(chars = text.len(), "speaking external response");
        if let Err(e) = self.speak(text).await {
            tracing::warn!(error = %e, "external response playback failed");
        }
    }

    async fn publish_status(&self, state: &str) {
        if let Some(bus) = &self.bus {
            bus.publish_status(state).await;
        }
    }

    async fn publish_transcription(&self, text: &str) {
        if let Some(bus) = &self.bus {
            bus.publish_transcription(text).await;
        }
    }

    async fn publish_response(&self, text: &str) {
        if let Some(bus) = &self.bus {
            bus.publish_response(text).await;
        }
    }
}

/// What a finished recording turns into
#[derive(Debug, PartialEq, Eq)]
enum TurnInput {
    Transcript(String),
    Skip,
    Fallback,
}

/// Classify a transcription result; errors never bubble past this point
fn turn_input(result: Result<String>) -> TurnInput {
    match result {
        Ok(text) if text.is_empty() => TurnInput::Skip,
        Ok(text) => TurnInput::Transcript(text),
        Err(e) => {
            tracing::error!(error = %e, "transcription failed");
            TurnInput::Fallback
        }
    }
}

/// Pending external response, or never if the bus is disabled
async fn recv_external(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Load configuration and run the daemon to completion
///
/// # Errors
///
/// Returns error if configuration or startup fails
pub async fn run(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let mut daemon = Daemon::build(config).await?;
    daemon.run().await
}

/// Capture a few seconds from the microphone and report energy levels
///
/// # Errors
///
/// Returns error if capture fails
pub async fn test_microphone(seconds: u64) -> Result<()> {
    use crate::audio::rms;

    let mut capture = AudioCapture::new()?;
    capture.start()?;
    tracing::info!(seconds, "microphone test running, speak now");

    let mut peak = 0.0f32;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
        for frame in capture.drain_frames() {
            let energy = rms(&frame);
            peak = peak.max(energy);
            tracing::info!(energy = format!("{energy:.4}"), "frame");
        }
    }
    capture.stop();

    if peak > 0.0 {
        tracing::info!(peak = format!("{peak:.4}"), "microphone test complete");
        Ok(())
    } else {
        Err(Error::Audio("no signal captured".to_string()))
    }
}

/// Play the acknowledgement cue through the speakers
///
/// # Errors
///
/// Returns error if playback fails
pub async fn test_speaker() -> Result<()> {
    let playback = PlaybackController::new()?;
    tracing::info!("playing acknowledgement cue");
    playback.play_cue().await
}
