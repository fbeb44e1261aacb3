mod common;

use common::standing_pose;
use posecast::analysis::{compare, ArmAngles, Tolerances};
use posecast::display::{style_for, ReferencePose};
use posecast::annotate::{SkeletonStyle, GREEN, YELLOW};
use posecast::pose::Landmark;
use posecast::pump::ProcessedFrame;
use posecast::frame::Frame;

#[test]
fn straight_arm_at_shoulder_height() {
    let angles = ArmAngles::from_landmarks(&standing_pose(), 0.5).unwrap();
    assert!((angles.bow_arm - 180.0).abs() < 1e-3);
    assert!((angles.shoulder_lift - 90.0).abs() < 1e-3);
}

#[test]
fn bent_elbow_is_off_target() {
    let ideal = ArmAngles::from_landmarks(&standing_pose(), 0.5).unwrap();

    let mut live = standing_pose();
    live[15] = Landmark::new(0.65, 0.15, 0.0, 0.9); // wrist raised above the elbow
    let live = ArmAngles::from_landmarks(&live, 0.5).unwrap();
    let feedback = compare(&ideal, &live, &Tolerances::default());

    assert!((live.bow_arm - 90.0).abs() < 1e-3);
    assert!(!feedback.on_target);
    assert!((feedback.proximity - 0.5).abs() < 1e-3);
}

#[test]
fn reference_pose_colours_the_skeleton() {
    let reference = ReferencePose {
        ideal: ArmAngles::from_landmarks(&standing_pose(), 0.5).unwrap(),
        tolerances: Tolerances::default(),
        visibility_threshold: 0.5,
    };
    let base = SkeletonStyle::default();

    let matching = ProcessedFrame {
        frame: Frame::new(8, 8),
        landmarks: standing_pose(),
        sequence: 1,
    };
    let feedback = reference.feedback(&matching);
    assert_eq!(style_for(&base, feedback.as_ref()).line_color, GREEN);

    let mut bent = standing_pose();
    bent[15] = Landmark::new(0.65, 0.15, 0.0, 0.9);
    let off = ProcessedFrame {
        landmarks: bent,
        ..matching.clone()
    };
    assert_eq!(style_for(&base, reference.feedback(&off).as_ref()).line_color, YELLOW);

    let nobody = ProcessedFrame {
        landmarks: Vec::new(),
        ..matching
    };
    assert!(reference.feedback(&nobody).is_none());
}
