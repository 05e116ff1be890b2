//! Voice activity detection
//!
//! Energy-based speech/silence classification for an active recording
//! session. All time windows are converted to sample counts at
//! construction, so decisions depend only on the audio fed in.

use crate::audio::{ms_to_samples, rms};
use crate::config::VadConfig;

/// Why the recording should stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Enough trailing silence after speech
    SilenceDetected,
    /// Hard utterance length cap reached
    MaxLengthReached,
}

/// Per-chunk decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VadDecision {
    /// Whether the recording should stop now
    pub should_stop: bool,
    /// Stop reason, present iff `should_stop`
    pub reason: Option<StopReason>,
    /// Whether any chunk this session crossed the energy threshold
    pub has_spoken: bool,
}

/// Energy VAD for one recording session
///
/// Create a fresh detector per session; the speech flag and counters are
/// session state.
pub struct VoiceActivityDetector {
    silence_threshold: f32,
    grace_samples: usize,
    trailing_silence_samples: usize,
    min_speech_samples: usize,
    max_utterance_samples: usize,

    total_samples: usize,
    trailing_silence: usize,
    has_spoken: bool,
}

impl VoiceActivityDetector {
    /// Create a detector for a new recording session
    #[must_use]
    pub fn new(config: &VadConfig) -> Self {
        Self {
            silence_threshold: config.silence_threshold,
            grace_samples: ms_to_samples(config.grace_ms),
            trailing_silence_samples: ms_to_samples(config.trailing_silence_ms),
            min_speech_samples: ms_to_samples(config.min_speech_ms),
            max_utterance_samples: ms_to_samples(config.max_utterance_ms),
            total_samples: 0,
            trailing_silence: 0,
            has_spoken: false,
        }
    }

    /// Process one chunk of recorded samples
    pub fn process(&mut self, samples: &[f32]) -> VadDecision {
        self.total_samples += samples.len();

        let energy = rms(samples);
        if energy >= self.silence_threshold {
            if !self.has_spoken {
                tracing::debug!(energy, "speech started");
            }
            self.has_spoken = true;
            self.trailing_silence = 0;
        } else {
            self.trailing_silence += samples.len();
        }

        // Hard cap applies regardless of speech state
        if self.total_samples >= self.max_utterance_samples {
            tracing::debug!(
                total = self.total_samples,
                has_spoken = self.has_spoken,
                "max utterance length reached"
            );
            return self.stop(StopReason::MaxLengthReached);
        }

        // Grace period: silence never ends the recording early on
        if self.total_samples < self.grace_samples {
            return self.keep_going();
        }

        if self.has_spoken
            && self.trailing_silence >= self.trailing_silence_samples
            && self.total_samples >= self.min_speech_samples
        {
            tracing::debug!(
                total = self.total_samples,
                trailing = self.trailing_silence,
                "trailing silence detected"
            );
            return self.stop(StopReason::SilenceDetected);
        }

        self.keep_going()
    }

    /// Whether any chunk this session crossed the energy threshold
    #[must_use]
    pub const fn has_spoken(&self) -> bool {
        self.has_spoken
    }

    const fn keep_going(&self) -> VadDecision {
        VadDecision {
            should_stop: false,
            reason: None,
            has_spoken: self.has_spoken,
        }
    }

    const fn stop(&self, reason: StopReason) -> VadDecision {
        VadDecision {
            should_stop: true,
            reason: Some(reason),
            has_spoken: self.has_spoken,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;

    fn default_vad() -> VoiceActivityDetector {
        VoiceActivityDetector::new(&VadConfig::default())
    }

    /// 100ms chunks of the given amplitude
    fn chunks(amplitude: f32, count: usize) -> Vec<Vec<f32>> {
        let chunk_len = SAMPLE_RATE as usize / 10;
        (0..count).map(|_| vec![amplitude; chunk_len]).collect()
    }

    #[test]
    fn silence_during_grace_never_stops() {
        let mut vad = default_vad();

        // 1100ms of pure silence: inside the 1200ms grace window
        for chunk in chunks(0.0, 11) {
            let decision = vad.process(&chunk);
            assert!(!decision.should_stop);
            assert!(!decision.has_spoken);
        }
    }

    #[test]
    fn speech_then_trailing_silence_stops() {
        let mut vad = default_vad();

        // 1000ms of speech well above the threshold
        for chunk in chunks(0.1, 10) {
            let decision = vad.process(&chunk);
            assert!(!decision.should_stop);
            assert!(decision.has_spoken);
        }

        // 1600ms of silence crosses the 1500ms trailing window
        let mut stopped = None;
        for chunk in chunks(0.0, 16) {
            let decision = vad.process(&chunk);
            if decision.should_stop {
                stopped = decision.reason;
                assert!(decision.has_spoken);
                break;
            }
        }
        assert_eq!(stopped, Some(StopReason::SilenceDetected));
    }

    #[test]
    fn silent_recording_runs_to_max_length() {
        let mut vad = default_vad();

        // 10s of silence: only the hard cap fires, has_spoken stays false
        let mut stopped = None;
        let mut processed = 0;
        for chunk in chunks(0.0, 120) {
            processed += 1;
            let decision = vad.process(&chunk);
            if decision.should_stop {
                stopped = decision.reason;
                assert!(!decision.has_spoken);
                break;
            }
        }
        assert_eq!(stopped, Some(StopReason::MaxLengthReached));
        assert_eq!(processed, 100, "cap should fire at exactly 10s");
    }

    #[test]
    fn max_length_fires_even_mid_speech() {
        let mut vad = default_vad();

        let mut stopped = None;
        for chunk in chunks(0.1, 120) {
            let decision = vad.process(&chunk);
            if decision.should_stop {
                stopped = decision.reason;
                assert!(decision.has_spoken);
                break;
            }
        }
        assert_eq!(stopped, Some(StopReason::MaxLengthReached));
    }

    #[test]
    fn short_blip_does_not_stop_before_min_speech() {
        let config = VadConfig {
            grace_ms: 0,
            min_speech_ms: 3000,
            ..VadConfig::default()
        };
        let mut vad = VoiceActivityDetector::new(&config);

        // 200ms of speech then 2000ms of silence: trailing window crossed
        // but min_speech not met, so no stop yet
        for chunk in chunks(0.1, 2) {
            vad.process(&chunk);
        }
        for chunk in chunks(0.0, 20) {
            let decision = vad.process(&chunk);
            assert!(!decision.should_stop);
        }
    }

    #[test]
    fn threshold_boundary_counts_as_speech() {
        let config = VadConfig::default();
        let mut vad = VoiceActivityDetector::new(&config);

        let chunk = vec![config.silence_threshold; SAMPLE_RATE as usize / 10];
        let decision = vad.process(&chunk);
        assert!(decision.has_spoken);
    }
}
