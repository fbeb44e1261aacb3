#![allow(dead_code)]

use std::collections::VecDeque;

use posecast::camera::{CameraBackend, CaptureSettings, CaptureStream, FrameSource};
use posecast::error::{DeviceError, PoseError};
use posecast::frame::{Frame, FrameLayout, ImgFrame};
use posecast::pose::{Landmark, PoseEstimator, POSE_LANDMARK_COUNT};

/// Replays a fixed sequence of polls; `None` entries are empty polls.
pub struct ScriptedSource {
    polls: VecDeque<Option<Frame>>,
    sequence: u64,
}

impl ScriptedSource {
    pub fn new(polls: Vec<Option<Frame>>) -> Self {
        Self {
            polls: polls.into(),
            sequence: 0,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn try_get(&mut self) -> Result<Option<ImgFrame>, DeviceError> {
        match self.polls.pop_front().flatten() {
            Some(frame) => {
                self.sequence += 1;
                Ok(Some(ImgFrame::from_frame(frame, FrameLayout::Planar, self.sequence)))
            }
            None => Ok(None),
        }
    }
}

/// Source that reports a closed stream on every poll.
pub struct ClosedSource;

impl FrameSource for ClosedSource {
    fn try_get(&mut self) -> Result<Option<ImgFrame>, DeviceError> {
        Err(DeviceError::StreamClosed {
            name: "rgb".to_string(),
            reason: "unplugged".to_string(),
        })
    }
}

/// Finds a pose on every `every`-th call, nothing otherwise.
pub struct AlternatingEstimator {
    every: usize,
    calls: usize,
}

impl AlternatingEstimator {
    pub fn new(every: usize) -> Self {
        Self { every, calls: 0 }
    }
}

impl PoseEstimator for AlternatingEstimator {
    fn process(&mut self, frame: &Frame) -> Result<Option<Vec<Landmark>>, PoseError> {
        if frame.is_empty() {
            return Err(PoseError::EmptyFrame);
        }
        self.calls += 1;
        if self.calls % self.every == 0 {
            Ok(Some(standing_pose()))
        } else {
            Ok(None)
        }
    }
}

/// A fully visible pose with the left arm held straight out.
pub fn standing_pose() -> Vec<Landmark> {
    let mut landmarks = vec![Landmark::new(0.5, 0.5, 0.0, 0.9); POSE_LANDMARK_COUNT];
    landmarks[11] = Landmark::new(0.5, 0.3, 0.0, 0.9); // left shoulder
    landmarks[13] = Landmark::new(0.65, 0.3, 0.0, 0.9); // left elbow
    landmarks[15] = Landmark::new(0.8, 0.3, 0.0, 0.9); // left wrist
    landmarks[23] = Landmark::new(0.5, 0.6, 0.0, 0.9); // left hip
    landmarks
}

pub fn solid_frame(width: u32, height: u32, color: [u8; 3]) -> Frame {
    let data = color
        .iter()
        .copied()
        .cycle()
        .take((width * height * 3) as usize)
        .collect();
    Frame::from_rgb(width, height, data).unwrap()
}

/// Camera backend producing solid frames at sensor resolution.
#[derive(Clone)]
pub struct SyntheticBackend {
    /// Fail after this many frames
    pub limit: Option<u64>,
    pub fail_open: bool,
}

pub struct SyntheticStream {
    width: u32,
    height: u32,
    produced: u64,
    limit: Option<u64>,
}

impl CameraBackend for SyntheticBackend {
    type Stream = SyntheticStream;

    fn open(&self, settings: &CaptureSettings) -> Result<SyntheticStream, DeviceError> {
        if self.fail_open {
            return Err(DeviceError::Open("no device attached".to_string()));
        }
        // keep frames small; the device resizes to the preview anyway
        Ok(SyntheticStream {
            width: settings.preview_width * 2,
            height: settings.preview_height * 2,
            produced: 0,
            limit: self.limit,
        })
    }
}

impl CaptureStream for SyntheticStream {
    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        if let Some(limit) = self.limit {
            if self.produced >= limit {
                return Err(DeviceError::Capture("end of stream".to_string()));
            }
        }
        self.produced += 1;
        std::thread::sleep(std::time::Duration::from_millis(2));
        Ok(solid_frame(self.width, self.height, [200, 100, 50]))
    }
}
