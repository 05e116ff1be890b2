//! Session state machine and recording session
//!
//! The machine is the single authority on what phase the pipeline is in:
//! it gates wake detection, decides where capture frames are routed, and
//! times the cooldown. State changes go through a pure transition function
//! so the legal edges are auditable in one place.

use std::time::Instant;

use tokio::sync::watch;

use crate::audio::PrerollRing;

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Starting up; capture not yet armed
    Idle,
    /// Wake gate armed, waiting for the wake word
    Listening,
    /// Capturing an utterance under VAD control
    Recording,
    /// Transcribing / querying / speaking the reply
    Processing,
    /// Short pause before re-arming, so trailing audio cannot re-trigger
    Cooldown,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Recording => write!(f, "recording"),
            Self::Processing => write!(f, "processing"),
            Self::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// Events the machine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Startup finished: warm-up done and downstream systems constructed
    Ready,
    /// Wake word detected
    WakeDetected,
    /// VAD produced a stop reason
    StopRecording,
    /// A reply was produced, or the turn was skipped
    ReplyDone,
    /// Cooldown delay elapsed
    CooldownOver,
}

/// Pure transition function; `None` means the event is illegal in `state`
#[must_use]
pub const fn transition(state: SessionState, event: SessionEvent) -> Option<SessionState> {
    match (state, event) {
        (SessionState::Idle, SessionEvent::Ready) => Some(SessionState::Listening),
        (SessionState::Listening, SessionEvent::WakeDetected) => Some(SessionState::Recording),
        (SessionState::Recording, SessionEvent::StopRecording) => Some(SessionState::Processing),
        (SessionState::Processing, SessionEvent::ReplyDone) => Some(SessionState::Cooldown),
        (SessionState::Cooldown, SessionEvent::CooldownOver) => Some(SessionState::Listening),
        // Barge-in: a wake word mid-reply opens a new recording
        (SessionState::Processing, SessionEvent::WakeDetected) => Some(SessionState::Recording),
        _ => None,
    }
}

/// Stateful wrapper: logs transitions and notifies subscribers
pub struct SessionMachine {
    state: SessionState,
    entered_at: Instant,
    tx: watch::Sender<SessionState>,
    rx: watch::Receiver<SessionState>,
}

impl SessionMachine {
    /// Create a machine in `Idle`
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(SessionState::Idle);
        Self {
            state: SessionState::Idle,
            entered_at: Instant::now(),
            tx,
            rx,
        }
    }

    /// Current state
    #[must_use]
    pub const fn current(&self) -> SessionState {
        self.state
    }

    /// How long the machine has been in the current state
    #[must_use]
    pub fn in_state_for(&self) -> std::time::Duration {
        self.entered_at.elapsed()
    }

    /// Apply an event; illegal events are logged and ignored
    pub fn apply(&mut self, event: SessionEvent) -> Option<SessionState> {
        let next = transition(self.state, event);
        match next {
            Some(next) => {
                tracing::info!(from = %self.state, to = %next, ?event, "session transition");
                self.state = next;
                self.entered_at = Instant::now();
                let _ = self.tx.send(next);
            }
            None => {
                tracing::warn!(state = %self.state, ?event, "ignoring illegal session event");
            }
        }
        next
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.rx.clone()
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the pre-roll ring and the in-progress utterance buffer
///
/// Exactly one session can be active; `stop` transfers ownership of the
/// captured audio to the caller.
pub struct RecordingSession {
    preroll: PrerollRing,
    take: Vec<f32>,
    active: bool,
    started_at: Option<Instant>,
}

impl RecordingSession {
    /// Create with a pre-roll window of `preroll_ms`
    #[must_use]
    pub fn new(preroll_ms: u64) -> Self {
        Self {
            preroll: PrerollRing::new(preroll_ms),
            take: Vec::new(),
            active: false,
            started_at: None,
        }
    }

    /// Feed capture audio while no recording is active; keeps the pre-roll
    /// window fresh
    pub fn feed_preroll(&mut self, samples: &[f32]) {
        if !self.active {
            self.preroll.write(samples);
        }
    }

    /// Begin a recording, seeded from the pre-roll window
    pub fn start(&mut self) {
        if self.active {
            tracing::warn!("recording session already active, restarting");
        }
        self.take = self.preroll.snapshot();
        self.active = true;
        self.started_at = Some(Instant::now());
        tracing::debug!(preroll_samples = self.take.len(), "recording started");
    }

    /// Append captured audio to the active recording
    pub fn append(&mut self, samples: &[f32]) {
        if self.active {
            self.take.extend_from_slice(samples);
        }
    }

    /// End the recording, returning the captured audio
    ///
    /// Clears both buffers so the next session starts clean.
    pub fn stop(&mut self) -> Vec<f32> {
        self.active = false;
        self.started_at = None;
        self.preroll.clear();
        let samples = std::mem::take(&mut self.take);
        tracing::debug!(samples = samples.len(), "recording stopped");
        samples
    }

    /// Whether a recording is in progress
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Samples captured so far (including pre-roll seed)
    #[must_use]
    pub const fn len(&self) -> usize {
        self.take.len()
    }

    /// Whether no samples have been captured
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.take.is_empty()
    }

    /// When the active recording started
    #[must_use]
    pub const fn started_at(&self) -> Option<Instant> {
        self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_cycle() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.current(), SessionState::Idle);

        assert_eq!(machine.apply(SessionEvent::Ready), Some(SessionState::Listening));
        assert_eq!(
            machine.apply(SessionEvent::WakeDetected),
            Some(SessionState::Recording)
        );
        assert_eq!(
            machine.apply(SessionEvent::StopRecording),
            Some(SessionState::Processing)
        );
        assert_eq!(machine.apply(SessionEvent::ReplyDone), Some(SessionState::Cooldown));
        assert_eq!(
            machine.apply(SessionEvent::CooldownOver),
            Some(SessionState::Listening)
        );
    }

    #[test]
    fn illegal_events_are_ignored() {
        let mut machine = SessionMachine::new();

        // Wake word before startup finished
        assert_eq!(machine.apply(SessionEvent::WakeDetected), None);
        assert_eq!(machine.current(), SessionState::Idle);

        machine.apply(SessionEvent::Ready);
        assert_eq!(machine.apply(SessionEvent::StopRecording), None);
        assert_eq!(machine.current(), SessionState::Listening);
    }

    #[test]
    fn barge_in_reopens_recording() {
        let mut machine = SessionMachine::new();
        machine.apply(SessionEvent::Ready);
        machine.apply(SessionEvent::WakeDetected);
        machine.apply(SessionEvent::StopRecording);
        assert_eq!(machine.current(), SessionState::Processing);

        assert_eq!(
            machine.apply(SessionEvent::WakeDetected),
            Some(SessionState::Recording)
        );
    }

    #[test]
    fn watch_channel_sees_transitions() {
        let mut machine = SessionMachine::new();
        let rx = machine.subscribe();

        machine.apply(SessionEvent::Ready);
        assert_eq!(*rx.borrow(), SessionState::Listening);
    }

    #[test]
    fn recording_seeds_from_preroll() {
        let mut session = RecordingSession::new(1000);
        session.feed_preroll(&[0.5; 800]);

        session.start();
        assert!(session.is_active());
        assert_eq!(session.len(), 800);

        session.append(&[0.25; 1600]);
        let samples = session.stop();
        assert_eq!(samples.len(), 2400);
        assert!((samples[0] - 0.5).abs() < f32::EPSILON);
        assert!((samples[2399] - 0.25).abs() < f32::EPSILON);

        // Buffers cleared for the next session
        assert!(!session.is_active());
        assert!(session.is_empty());
        session.start();
        assert_eq!(session.len(), 0, "preroll should have been cleared");
    }

    #[test]
    fn preroll_ignored_while_recording() {
        let mut session = RecordingSession::new(1000);
        session.start();
        session.feed_preroll(&[0.5; 100]);
        session.append(&[0.1; 100]);
        assert_eq!(session.stop().len(), 100);
    }
}
