//! Voice activity detection: per-chunk speech/silence classification and
//! the four-event utterance state machine.
//!
//! `VadEvent` is the observable surface used by the pipeline; `SpeechProbe`
//! is the pluggable part. `EnergyProbe` is the only implementation shipped
//! here; a neural probe is an external capability, not provided by this
//! crate.

use tracing::debug;

/// One of four events emitted per processed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStart,
    SpeechContinue,
    SpeechEnd,
    Silence,
}

/// Something that can turn a chunk of PCM16 samples into a speech
/// probability in `[0, 1]`.
pub trait SpeechProbe: Send {
    fn probability(&mut self, pcm16: &[u8]) -> f32;
}

/// Energy (RMS) based probe — the default, dependency-free fallback.
pub struct EnergyProbe {
    gain: f32,
}

impl EnergyProbe {
    pub fn new() -> Self {
        Self { gain: 10.0 }
    }
}

impl Default for EnergyProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechProbe for EnergyProbe {
    fn probability(&mut self, pcm16: &[u8]) -> f32 {
        if pcm16.len() < 2 {
            return 0.0;
        }
        let samples: Vec<f32> = pcm16
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
            .collect();
        if samples.is_empty() {
            return 0.0;
        }
        let mean_sq: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        (mean_sq.sqrt() * self.gain).min(1.0)
    }
}

/// Configuration for the utterance state machine.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Speech-probability cutoff above which a chunk counts as speech.
    pub threshold: f32,
    /// Accumulated silence, while speaking, required to emit `SpeechEnd`.
    pub min_silence_ms: u32,
    /// Duration represented by one processed chunk.
    pub chunk_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_silence_ms: 500,
            chunk_ms: 20,
        }
    }
}

/// Explicit utterance-segmentation state machine, fed one 20ms chunk at
/// a time. `SPEECH_END` fires exactly once per utterance: `is_speaking`
/// and `silence_samples` both reset in the same step it's emitted, so a
/// silence tick immediately afterward can only ever emit `SILENCE`.
pub struct Vad<P: SpeechProbe = EnergyProbe> {
    config: VadConfig,
    probe: P,
    is_speaking: bool,
    silence_ms: u32,
    speech_ms: u32,
}

impl Vad<EnergyProbe> {
    pub fn new(config: VadConfig) -> Self {
        Self::with_probe(config, EnergyProbe::new())
    }
}

impl<P: SpeechProbe> Vad<P> {
    pub fn with_probe(config: VadConfig, probe: P) -> Self {
        Self {
            config,
            probe,
            is_speaking: false,
            silence_ms: 0,
            speech_ms: 0,
        }
    }

    /// Process one chunk of PCM16-16kHz audio and return the event for
    /// this chunk.
    pub fn process_chunk(&mut self, pcm16: &[u8]) -> VadEvent {
        let probability = self.probe.probability(pcm16);
        let is_speech_chunk = probability >= self.config.threshold;
        let chunk_ms = self.config.chunk_ms;

        if is_speech_chunk {
            self.silence_ms = 0;
            self.speech_ms += chunk_ms;
            if !self.is_speaking {
                self.is_speaking = true;
                debug!(probability, "speech start");
                return VadEvent::SpeechStart;
            }
            return VadEvent::SpeechContinue;
        }

        if self.is_speaking {
            self.silence_ms += chunk_ms;
            if self.silence_ms >= self.config.min_silence_ms {
                self.is_speaking = false;
                self.silence_ms = 0;
                self.speech_ms = 0;
                debug!("speech end");
                return VadEvent::SpeechEnd;
            }
            // Brief silence inside an utterance does not end it.
            return VadEvent::SpeechContinue;
        }

        VadEvent::Silence
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Reset to initial state for a new stream.
    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.silence_ms = 0;
        self.speech_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(Vec<f32>, usize);
    impl SpeechProbe for FixedProbe {
        fn probability(&mut self, _pcm16: &[u8]) -> f32 {
            let v = self.0[self.1.min(self.0.len() - 1)];
            self.1 += 1;
            v
        }
    }

    fn chunk() -> Vec<u8> {
        vec![0u8; crate::codec::SAMPLES_16K_20MS * 2]
    }

    #[test]
    fn emits_start_then_continue_then_end() {
        // 1 speech chunk, then silence chunks until min_silence_ms elapses.
        let probs = vec![0.9, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1];
        let probe = FixedProbe(probs, 0);
        let mut vad = Vad::with_probe(
            VadConfig {
                threshold: 0.5,
                min_silence_ms: 100, // 5 chunks at 20ms
                chunk_ms: 20,
            },
            probe,
        );

        assert_eq!(vad.process_chunk(&chunk()), VadEvent::SpeechStart);
        for _ in 0..4 {
            assert_eq!(vad.process_chunk(&chunk()), VadEvent::SpeechContinue);
        }
        assert_eq!(vad.process_chunk(&chunk()), VadEvent::SpeechEnd);
        assert_eq!(vad.process_chunk(&chunk()), VadEvent::Silence);
    }

    #[test]
    fn brief_silence_does_not_end_utterance() {
        let probs = vec![0.9, 0.1, 0.9, 0.9];
        let probe = FixedProbe(probs, 0);
        let mut vad = Vad::with_probe(
            VadConfig {
                threshold: 0.5,
                min_silence_ms: 100,
                chunk_ms: 20,
            },
            probe,
        );

        assert_eq!(vad.process_chunk(&chunk()), VadEvent::SpeechStart);
        assert_eq!(vad.process_chunk(&chunk()), VadEvent::SpeechContinue);
        assert_eq!(vad.process_chunk(&chunk()), VadEvent::SpeechContinue);
        assert!(vad.is_speaking());
    }

    #[test]
    fn speech_end_fires_exactly_once() {
        let probs = vec![0.9, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1];
        let probe = FixedProbe(probs, 0);
        let mut vad = Vad::with_probe(
            VadConfig {
                threshold: 0.5,
                min_silence_ms: 60,
                chunk_ms: 20,
            },
            probe,
        );

        let events: Vec<VadEvent> = (0..8).map(|_| vad.process_chunk(&chunk())).collect();
        let ends = events.iter().filter(|e| **e == VadEvent::SpeechEnd).count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn energy_probe_distinguishes_silence_from_loud() {
        let mut probe = EnergyProbe::new();
        let silence = vec![0u8; 320 * 2];
        let loud: Vec<u8> = (0..320).flat_map(|_| 20000i16.to_le_bytes()).collect();
        assert!(probe.probability(&silence) < probe.probability(&loud));
    }
}
