//! Pose landmarks and estimators.
//!
//! Landmarks follow the 33-point BlazePose topology. The bundled estimator
//! runs a BlazePose landmark model through ONNX Runtime.

use std::path::Path;
use std::sync::Arc;

use ndarray::Array4;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PoseConfig;
use crate::error::PoseError;
use crate::frame::Frame;

pub const POSE_LANDMARK_COUNT: usize = 33;

/// One body keypoint. `x`/`y` are normalised to the frame, `z` is depth
/// relative to the hips on roughly the same scale as `x`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self { x, y, z, visibility }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum PoseLandmark {
    Nose = 0,
    LeftEyeInner,
    LeftEye,
    LeftEyeOuter,
    RightEyeInner,
    RightEye,
    RightEyeOuter,
    LeftEar,
    RightEar,
    MouthLeft,
    MouthRight,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftPinky,
    RightPinky,
    LeftIndex,
    RightIndex,
    LeftThumb,
    RightThumb,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
    LeftHeel,
    RightHeel,
    LeftFootIndex,
    RightFootIndex,
}

impl PoseLandmark {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn of(self, landmarks: &[Landmark]) -> Option<&Landmark> {
        landmarks.get(self.index())
    }
}

/// Skeleton edges between landmark indices.
pub const POSE_CONNECTIONS: [(usize, usize); 35] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 7),
    (0, 4),
    (4, 5),
    (5, 6),
    (6, 8),
    (9, 10),
    (11, 12),
    (11, 13),
    (13, 15),
    (15, 17),
    (15, 19),
    (15, 21),
    (17, 19),
    (12, 14),
    (14, 16),
    (16, 18),
    (16, 20),
    (16, 22),
    (18, 20),
    (11, 23),
    (12, 24),
    (23, 24),
    (23, 25),
    (24, 26),
    (25, 27),
    (26, 28),
    (27, 29),
    (28, 30),
    (29, 31),
    (30, 32),
    (27, 31),
    (28, 32),
];

/// Runs pose estimation on RGB frames.
pub trait PoseEstimator {
    /// `Ok(None)` when no person is found; otherwise exactly
    /// [`POSE_LANDMARK_COUNT`] landmarks.
    fn process(&mut self, frame: &Frame) -> Result<Option<Vec<Landmark>>, PoseError>;
}

impl<P: PoseEstimator + ?Sized> PoseEstimator for Box<P> {
    fn process(&mut self, frame: &Frame) -> Result<Option<Vec<Landmark>>, PoseError> {
        (**self).process(frame)
    }
}

/// One estimator shared by several pumps.
pub struct SharedEstimator<P> {
    inner: Arc<Mutex<P>>,
}

impl<P> SharedEstimator<P> {
    pub fn new(estimator: P) -> Self {
        Self {
            inner: Arc::new(Mutex::new(estimator)),
        }
    }
}

impl<P> Clone for SharedEstimator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: PoseEstimator> PoseEstimator for SharedEstimator<P> {
    fn process(&mut self, frame: &Frame) -> Result<Option<Vec<Landmark>>, PoseError> {
        self.inner.lock().process(frame)
    }
}

/// BlazePose landmark model input edge.
const MODEL_INPUT: u32 = 256;
/// Values per landmark in the model output: x, y, z, visibility, presence.
const VALUES_PER_LANDMARK: usize = 5;
/// Rows in the landmark output: 33 body landmarks plus 6 auxiliary points.
const MODEL_LANDMARK_ROWS: usize = 39;

/// Model outputs the estimator reads, identified by tensor length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelOutput {
    Landmarks,
    Presence,
    Other,
}

impl ModelOutput {
    fn classify(len: usize) -> Self {
        match len {
            n if n == MODEL_LANDMARK_ROWS * VALUES_PER_LANDMARK => ModelOutput::Landmarks,
            1 => ModelOutput::Presence,
            _ => ModelOutput::Other,
        }
    }
}

pub struct OnnxPoseEstimator {
    session: ort::session::Session,
    min_detection_confidence: f32,
    min_tracking_confidence: f32,
    tracking: bool,
}

impl OnnxPoseEstimator {
    pub fn load(config: &PoseConfig) -> Result<Self, PoseError> {
        let path = Path::new(&config.model_path);
        if !path.exists() {
            return Err(PoseError::ModelNotFound(config.model_path.clone()));
        }

        let session = ort::session::Session::builder()
            .map_err(|e| PoseError::Load(format!("failed to create session builder: {}", e)))?
            .with_intra_threads(config.intra_threads.max(1))
            .map_err(|e| PoseError::Load(format!("failed to set threads: {}", e)))?
            .commit_from_file(path)
            .map_err(|e| PoseError::Load(e.to_string()))?;

        info!("Loaded pose model from {:?}", path);
        Ok(Self {
            session,
            min_detection_confidence: config.min_detection_confidence,
            min_tracking_confidence: config.min_tracking_confidence,
            tracking: false,
        })
    }

    /// Score a pose needs to be reported, lower while a pose is being tracked.
    fn threshold(&self) -> f32 {
        if self.tracking {
            self.min_tracking_confidence
        } else {
            self.min_detection_confidence
        }
    }
}

impl PoseEstimator for OnnxPoseEstimator {
    fn process(&mut self, frame: &Frame) -> Result<Option<Vec<Landmark>>, PoseError> {
        if frame.is_empty() {
            return Err(PoseError::EmptyFrame);
        }

        let input = preprocess_nhwc(frame)?;
        let input_array = Array4::from_shape_vec(
            (1, MODEL_INPUT as usize, MODEL_INPUT as usize, 3),
            input,
        )
        .map_err(|e| PoseError::Inference(format!("failed to create input array: {}", e)))?;
        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| PoseError::Inference(format!("failed to create tensor: {}", e)))?;

        let (raw, presence) = {
            let outputs = self
                .session
                .run(ort::inputs![input_tensor])
                .map_err(|e| PoseError::Inference(e.to_string()))?;

            let mut raw: Option<Vec<f32>> = None;
            let mut presence: Option<f32> = None;
            for (_name, value) in outputs.iter() {
                let (_shape, data) = value
                    .try_extract_tensor::<f32>()
                    .map_err(|e| PoseError::Output(e.to_string()))?;
                match ModelOutput::classify(data.len()) {
                    ModelOutput::Landmarks if raw.is_none() => raw = Some(data.to_vec()),
                    ModelOutput::Presence if presence.is_none() => presence = data.first().copied(),
                    _ => {}
                }
            }
            (
                raw.ok_or_else(|| PoseError::Output("no landmark tensor".into()))?,
                presence.ok_or_else(|| PoseError::Output("no pose presence score".into()))?,
            )
        };

        let threshold = self.threshold();
        if presence < threshold {
            debug!("Pose score {:.2} below {:.2}", presence, threshold);
            self.tracking = false;
            return Ok(None);
        }

        self.tracking = true;
        Ok(Some(decode_landmarks(&raw, MODEL_INPUT as f32)?))
    }
}

/// Resize to the model input and scale to `[0, 1]` in HWC order.
fn preprocess_nhwc(frame: &Frame) -> Result<Vec<f32>, PoseError> {
    let resized = frame
        .resize(MODEL_INPUT, MODEL_INPUT)
        .map_err(|e| PoseError::Inference(e.to_string()))?;
    Ok(resized.data.iter().map(|&v| v as f32 / 255.0).collect())
}

/// Turn raw model rows (pixel coordinates in model input space, visibility
/// logits) into normalised landmarks.
pub fn decode_landmarks(raw: &[f32], input_size: f32) -> Result<Vec<Landmark>, PoseError> {
    if raw.len() < POSE_LANDMARK_COUNT * VALUES_PER_LANDMARK {
        return Err(PoseError::Output(format!(
            "expected at least {} values, got {}",
            POSE_LANDMARK_COUNT * VALUES_PER_LANDMARK,
            raw.len()
        )));
    }

    Ok(raw
        .chunks_exact(VALUES_PER_LANDMARK)
        .take(POSE_LANDMARK_COUNT)
        .map(|row| Landmark {
            x: row[0] / input_size,
            y: row[1] / input_size,
            z: row[2] / input_size,
            visibility: sigmoid(row[3]),
        })
        .collect())
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_normalises_and_applies_sigmoid() {
        let mut raw = vec![0.0f32; MODEL_LANDMARK_ROWS * VALUES_PER_LANDMARK];
        raw[0] = 128.0;
        raw[1] = 64.0;
        raw[2] = -25.6;
        raw[3] = 0.0;
        raw[5 * 11 + 3] = 10.0;

        let landmarks = decode_landmarks(&raw, 256.0).unwrap();
        assert_eq!(landmarks.len(), POSE_LANDMARK_COUNT);
        assert_eq!(landmarks[0].x, 0.5);
        assert_eq!(landmarks[0].y, 0.25);
        assert!((landmarks[0].z + 0.1).abs() < 1e-6);
        assert!((landmarks[0].visibility - 0.5).abs() < 1e-6);
        assert!(landmarks[11].visibility > 0.99);
    }

    #[test]
    fn only_the_landmark_tensor_is_decoded() {
        assert_eq!(ModelOutput::classify(195), ModelOutput::Landmarks);
        assert_eq!(ModelOutput::classify(1), ModelOutput::Presence);
        // segmentation mask and heatmap outputs
        assert_eq!(ModelOutput::classify(128 * 128 * 4), ModelOutput::Other);
        assert_eq!(ModelOutput::classify(64 * 64 * 39), ModelOutput::Other);
        assert_eq!(ModelOutput::classify(117), ModelOutput::Other);
    }

    #[test]
    fn decode_rejects_short_output() {
        assert!(decode_landmarks(&[0.0; 10], 256.0).is_err());
    }

    #[test]
    fn connections_stay_within_topology() {
        assert!(POSE_CONNECTIONS
            .iter()
            .all(|&(a, b)| a < POSE_LANDMARK_COUNT && b < POSE_LANDMARK_COUNT));
        assert_eq!(PoseLandmark::LeftShoulder.index(), 11);
        assert_eq!(PoseLandmark::LeftHip.index(), 23);
        assert_eq!(PoseLandmark::RightFootIndex.index(), POSE_LANDMARK_COUNT - 1);
    }

    #[test]
    fn missing_model_is_reported() {
        let config = PoseConfig {
            model_path: "does/not/exist.onnx".to_string(),
            ..PoseConfig::default()
        };
        assert!(matches!(
            OnnxPoseEstimator::load(&config),
            Err(PoseError::ModelNotFound(_))
        ));
    }
}
