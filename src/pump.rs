use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{debug, info};

use crate::camera::FrameSource;
use crate::encoding::FrameMessage;
use crate::frame::Frame;
use crate::pose::{Landmark, PoseEstimator};

/// Frames between throughput log lines.
const STATS_INTERVAL: u64 = 100;

/// A polled frame and its landmarks (empty when no pose was found).
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub frame: Frame,
    pub landmarks: Vec<Landmark>,
    pub sequence: u64,
}

impl ProcessedFrame {
    pub fn has_pose(&self) -> bool {
        !self.landmarks.is_empty()
    }

    pub fn to_message(&self, jpeg_quality: u8) -> Result<FrameMessage> {
        FrameMessage::new(&self.frame, &self.landmarks, jpeg_quality)
    }
}

#[derive(Debug)]
pub enum PumpStep {
    /// The source had nothing queued.
    Idle,
    Frame(ProcessedFrame),
}

/// Polls a frame source and runs pose estimation on every frame it yields.
pub struct FramePump<S, P> {
    source: S,
    estimator: P,
    frame_count: u64,
    last_stats_time: Instant,
}

impl<S: FrameSource, P: PoseEstimator> FramePump<S, P> {
    pub fn new(source: S, estimator: P) -> Self {
        Self {
            source,
            estimator,
            frame_count: 0,
            last_stats_time: Instant::now(),
        }
    }

    /// Non-blocking: one poll of the source, at most one inference.
    pub fn poll(&mut self) -> Result<PumpStep> {
        let Some(img) = self.source.try_get().context("Frame source failed")? else {
            return Ok(PumpStep::Idle);
        };

        let frame = img.to_frame()?;
        let landmarks = self
            .estimator
            .process(&frame)
            .context("Pose estimation failed")?
            .unwrap_or_default();
        debug!(
            "Frame {} ({}x{}): {} landmarks",
            img.sequence,
            frame.width,
            frame.height,
            landmarks.len()
        );

        self.frame_count += 1;
        if self.frame_count % STATS_INTERVAL == 0 {
            let elapsed = self.last_stats_time.elapsed();
            let fps = STATS_INTERVAL as f32 / elapsed.as_secs_f32();
            info!("Processed {} frames, current FPS: {:.2}", self.frame_count, fps);
            self.last_stats_time = Instant::now();
        }

        Ok(PumpStep::Frame(ProcessedFrame {
            frame,
            landmarks,
            sequence: img.sequence,
        }))
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}
