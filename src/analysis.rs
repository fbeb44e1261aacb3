//! Joint angles and reference-pose comparison.
//!
//! A reference ("ideal") pose is captured once from a still image; live
//! poses are then scored against it by the bow-arm angle (shoulder, elbow,
//! wrist) and the shoulder-lift angle (elbow, shoulder, hip) of the left side.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::pose::{Landmark, PoseLandmark};

#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("landmark {0:?} missing")]
    Missing(PoseLandmark),
    #[error("landmark {joint:?} not clearly visible ({visibility:.2})")]
    NotVisible { joint: PoseLandmark, visibility: f32 },
}

/// Angle at `b` formed by `a` and `c`, in degrees within `[0, 180]`.
pub fn calculate_angle(a: &Landmark, b: &Landmark, c: &Landmark) -> f32 {
    let rad = (c.y - b.y).atan2(c.x - b.x) - (a.y - b.y).atan2(a.x - b.x);
    let angle = rad.to_degrees().abs();
    if angle > 180.0 {
        360.0 - angle
    } else {
        angle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmAngles {
    pub bow_arm: f32,
    pub shoulder_lift: f32,
}

impl ArmAngles {
    pub fn from_landmarks(
        landmarks: &[Landmark],
        visibility_threshold: f32,
    ) -> Result<Self, AnalysisError> {
        let joint = |which| visible_joint(landmarks, which, visibility_threshold);

        let shoulder = joint(PoseLandmark::LeftShoulder)?;
        let elbow = joint(PoseLandmark::LeftElbow)?;
        let wrist = joint(PoseLandmark::LeftWrist)?;
        let hip = joint(PoseLandmark::LeftHip)?;

        Ok(Self {
            bow_arm: calculate_angle(shoulder, elbow, wrist),
            shoulder_lift: calculate_angle(elbow, shoulder, hip),
        })
    }
}

fn visible_joint(
    landmarks: &[Landmark],
    which: PoseLandmark,
    visibility_threshold: f32,
) -> Result<&Landmark, AnalysisError> {
    let lm = which.of(landmarks).ok_or(AnalysisError::Missing(which))?;
    if lm.visibility < visibility_threshold {
        return Err(AnalysisError::NotVisible {
            joint: which,
            visibility: lm.visibility,
        });
    }
    Ok(lm)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub arm_deg: f32,
    pub shoulder_deg: f32,
    pub proximity_range_deg: f32,
}

impl From<&AnalysisConfig> for Tolerances {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            arm_deg: config.arm_tolerance_deg,
            shoulder_deg: config.shoulder_tolerance_deg,
            proximity_range_deg: config.proximity_range_deg,
        }
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseFeedback {
    pub arm_diff: f32,
    pub shoulder_diff: f32,
    /// 1.0 when both angles match, falling to 0.0 at the proximity range.
    pub proximity: f32,
    pub on_target: bool,
}

impl PoseFeedback {
    pub fn summary(&self) -> String {
        if self.on_target {
            "on target".to_string()
        } else {
            format!(
                "arm {:.0}° / shoulder {:.0}° off",
                self.arm_diff, self.shoulder_diff
            )
        }
    }
}

pub fn compare(ideal: &ArmAngles, live: &ArmAngles, tolerances: &Tolerances) -> PoseFeedback {
    let arm_diff = (live.bow_arm - ideal.bow_arm).abs();
    let shoulder_diff = (live.shoulder_lift - ideal.shoulder_lift).abs();

    let closeness = |diff: f32| 1.0 - (diff / tolerances.proximity_range_deg).min(1.0);
    let proximity = (closeness(arm_diff) + closeness(shoulder_diff)) / 2.0;

    PoseFeedback {
        arm_diff,
        shoulder_diff,
        proximity,
        on_target: arm_diff <= tolerances.arm_deg && shoulder_diff <= tolerances.shoulder_deg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::POSE_LANDMARK_COUNT;

    fn at(x: f32, y: f32) -> Landmark {
        Landmark::new(x, y, 0.0, 1.0)
    }

    #[test]
    fn right_angle() {
        let angle = calculate_angle(&at(1.0, 0.0), &at(0.0, 0.0), &at(0.0, 1.0));
        assert!((angle - 90.0).abs() < 1e-4);
    }

    #[test]
    fn reflex_angles_fold_back() {
        // 270 degrees one way is 90 the other
        let angle = calculate_angle(&at(-1.0, 1.0), &at(0.0, 0.0), &at(-1.0, -1.0));
        assert!((angle - 90.0).abs() < 1e-4);
        let straight = calculate_angle(&at(-1.0, 0.0), &at(0.0, 0.0), &at(1.0, 0.0));
        assert!((straight - 180.0).abs() < 1e-4);
    }

    #[test]
    fn hidden_joint_fails() {
        let mut landmarks = vec![at(0.5, 0.5); POSE_LANDMARK_COUNT];
        landmarks[PoseLandmark::LeftWrist.index()].visibility = 0.2;
        let err = ArmAngles::from_landmarks(&landmarks, 0.5).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::NotVisible {
                joint: PoseLandmark::LeftWrist,
                ..
            }
        ));
        assert_eq!(
            ArmAngles::from_landmarks(&[], 0.5),
            Err(AnalysisError::Missing(PoseLandmark::LeftShoulder))
        );
    }

    #[test]
    fn feedback_proximity_and_tolerance() {
        let ideal = ArmAngles {
            bow_arm: 170.0,
            shoulder_lift: 90.0,
        };
        let close = compare(
            &ideal,
            &ArmAngles {
                bow_arm: 166.0,
                shoulder_lift: 94.0,
            },
            &Tolerances::default(),
        );
        assert!(close.on_target);
        assert!((close.proximity - 0.8).abs() < 1e-4);

        let far = compare(
            &ideal,
            &ArmAngles {
                bow_arm: 140.0,
                shoulder_lift: 100.0,
            },
            &Tolerances::default(),
        );
        assert!(!far.on_target);
        assert!((far.proximity - 0.25).abs() < 1e-4);
        assert_eq!(far.summary(), "arm 30° / shoulder 10° off");
    }
}
