mod common;

use anyhow::Result;
use common::{solid_frame, AlternatingEstimator, ClosedSource, ScriptedSource};
use posecast::encoding::FrameMessage;
use posecast::pose::POSE_LANDMARK_COUNT;
use posecast::pump::{FramePump, PumpStep};

#[test]
fn one_message_per_non_empty_poll() -> Result<()> {
    let polls = vec![
        Some(solid_frame(32, 24, [255, 0, 0])),
        None,
        None,
        Some(solid_frame(32, 24, [0, 255, 0])),
        Some(solid_frame(32, 24, [0, 0, 255])),
        None,
    ];
    let mut pump = FramePump::new(ScriptedSource::new(polls), AlternatingEstimator::new(2));

    let mut messages = Vec::new();
    let mut idle = 0;
    for _ in 0..8 {
        match pump.poll()? {
            PumpStep::Frame(processed) => messages.push(processed.to_message(90)?),
            PumpStep::Idle => idle += 1,
        }
    }

    assert_eq!(messages.len(), 3);
    assert_eq!(idle, 5);
    assert_eq!(pump.frame_count(), 3);

    for message in &messages {
        let jpeg = message.jpeg_bytes()?;
        let decoded = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg)?;
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
        assert!(message.landmarks.is_empty() || message.landmarks.len() == POSE_LANDMARK_COUNT);
    }
    // every second frame has a pose
    assert!(messages[0].landmarks.is_empty());
    assert_eq!(messages[1].landmarks.len(), POSE_LANDMARK_COUNT);
    Ok(())
}

#[test]
fn planar_device_frames_keep_their_colors() -> Result<()> {
    let mut pump = FramePump::new(
        ScriptedSource::new(vec![Some(solid_frame(4, 4, [10, 20, 30]))]),
        AlternatingEstimator::new(1),
    );
    let PumpStep::Frame(processed) = pump.poll()? else {
        panic!("expected a frame");
    };
    assert_eq!(processed.frame.pixel(3, 3), Some([10, 20, 30]));
    assert!(processed.has_pose());
    Ok(())
}

#[test]
fn messages_round_trip_through_json() -> Result<()> {
    let mut pump = FramePump::new(
        ScriptedSource::new(vec![Some(solid_frame(8, 8, [1, 2, 3]))]),
        AlternatingEstimator::new(1),
    );
    let PumpStep::Frame(processed) = pump.poll()? else {
        panic!("expected a frame");
    };
    let message = processed.to_message(75)?;
    let parsed: FrameMessage = serde_json::from_str(&message.to_json()?)?;
    assert_eq!(parsed, message);
    Ok(())
}

#[test]
fn closed_source_stops_the_pump() {
    let mut pump = FramePump::new(ClosedSource, AlternatingEstimator::new(1));
    let err = pump.poll().unwrap_err();
    assert!(format!("{:#}", err).contains("unplugged"));
}
