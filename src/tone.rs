//! Audible feedback for the reference-pose comparison.
//!
//! An on-target pose holds a steady 880 Hz tone. Otherwise the pitch rises
//! from 220 Hz and the tone gets louder as the pose approaches the
//! reference. Silence while no pose is found.

use anyhow::{anyhow, Result};
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::f32::consts::PI;
use tracing::{debug, info};

use crate::analysis::PoseFeedback;

const SAMPLE_RATE: u32 = 44100;
/// Length of each queued tone chunk.
const CHUNK_MS: u32 = 50;
/// Chunks kept queued ahead of playback.
const QUEUE_AHEAD: usize = 2;

const MIN_FREQUENCY: f32 = 100.0;
const MAX_FREQUENCY: f32 = 1200.0;
const MAX_VOLUME: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneCue {
    pub frequency: f32,
    pub volume: f32,
}

impl ToneCue {
    pub fn new(frequency: f32, volume: f32) -> Self {
        Self {
            frequency: frequency.clamp(MIN_FREQUENCY, MAX_FREQUENCY),
            volume: volume.clamp(0.0, MAX_VOLUME),
        }
    }

    /// Tone for the current feedback, `None` means silence.
    pub fn for_feedback(feedback: Option<&PoseFeedback>) -> Option<Self> {
        let f = feedback?;
        if f.on_target {
            Some(Self::new(880.0, 0.2))
        } else {
            let p = f.proximity.clamp(0.0, 1.0);
            Some(Self::new(220.0 + p * 440.0, 0.1 + p * 0.1))
        }
    }
}

/// Sine generator that keeps its phase across chunks so frequency changes
/// do not click.
#[derive(Debug, Default)]
pub struct SineGenerator {
    phase: f32,
}

impl SineGenerator {
    pub fn samples(&mut self, cue: ToneCue, count: usize) -> Vec<f32> {
        let step = 2.0 * PI * cue.frequency / SAMPLE_RATE as f32;
        let mut samples = Vec::with_capacity(count);
        for _ in 0..count {
            samples.push(self.phase.sin() * cue.volume);
            self.phase = (self.phase + step) % (2.0 * PI);
        }
        samples
    }
}

/// Plays the feedback tone on the default output device.
pub struct FeedbackTone {
    _stream: OutputStream,
    _handle: OutputStreamHandle,
    sink: Sink,
    generator: SineGenerator,
    cue: Option<ToneCue>,
}

impl FeedbackTone {
    pub fn open() -> Result<Self> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| anyhow!("Failed to open audio output: {}", e))?;
        let sink = Sink::try_new(&handle).map_err(|e| anyhow!("Failed to create audio sink: {}", e))?;
        info!("Feedback tone enabled");

        Ok(Self {
            _stream: stream,
            _handle: handle,
            sink,
            generator: SineGenerator::default(),
            cue: None,
        })
    }

    pub fn set_cue(&mut self, cue: Option<ToneCue>) {
        if cue.is_none() && self.cue.is_some() {
            debug!("Feedback tone silenced");
        }
        self.cue = cue;
    }

    /// Keep a short buffer of the current tone queued. Call once per loop
    /// iteration.
    pub fn tick(&mut self) {
        let Some(cue) = self.cue else {
            return;
        };
        let chunk = (SAMPLE_RATE * CHUNK_MS / 1000) as usize;
        while self.sink.len() < QUEUE_AHEAD {
            let samples = self.generator.samples(cue, chunk);
            self.sink
                .append(rodio::buffer::SamplesBuffer::new(1, SAMPLE_RATE, samples));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedback(proximity: f32, on_target: bool) -> PoseFeedback {
        PoseFeedback {
            arm_diff: 0.0,
            shoulder_diff: 0.0,
            proximity,
            on_target,
        }
    }

    #[test]
    fn on_target_is_a_fixed_high_tone() {
        let cue = ToneCue::for_feedback(Some(&feedback(0.3, true))).unwrap();
        assert_eq!(cue, ToneCue::new(880.0, 0.2));
    }

    #[test]
    fn pitch_and_volume_follow_proximity() {
        let far = ToneCue::for_feedback(Some(&feedback(0.0, false))).unwrap();
        assert_eq!(far.frequency, 220.0);
        assert!((far.volume - 0.1).abs() < 1e-6);

        let half = ToneCue::for_feedback(Some(&feedback(0.5, false))).unwrap();
        assert_eq!(half.frequency, 440.0);
        assert!((half.volume - 0.15).abs() < 1e-6);

        let close = ToneCue::for_feedback(Some(&feedback(1.0, false))).unwrap();
        assert_eq!(close.frequency, 660.0);
        assert!((close.volume - 0.2).abs() < 1e-6);
    }

    #[test]
    fn no_pose_is_silent() {
        assert_eq!(ToneCue::for_feedback(None), None);
    }

    #[test]
    fn cues_are_clamped() {
        let cue = ToneCue::new(5000.0, 2.0);
        assert_eq!(cue.frequency, MAX_FREQUENCY);
        assert_eq!(cue.volume, MAX_VOLUME);
        assert_eq!(ToneCue::new(10.0, -1.0), ToneCue::new(MIN_FREQUENCY, 0.0));
    }

    #[test]
    fn generator_is_continuous_across_chunks() {
        let cue = ToneCue::new(440.0, 0.5);
        let mut generator = SineGenerator::default();
        let first = generator.samples(cue, 100);
        let second = generator.samples(cue, 100);

        let mut fresh = SineGenerator::default();
        let whole = fresh.samples(cue, 200);
        assert!((second[0] - whole[100]).abs() < 1e-3);
        assert_eq!(first.len(), 100);
        assert!(whole.iter().all(|s| s.abs() <= 0.5));
    }
}
