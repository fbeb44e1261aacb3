use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::pose::Landmark;

/// One streamed frame as sent to browser clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMessage {
    /// Base64 (standard alphabet, padded) JPEG
    pub image: String,
    pub landmarks: Vec<Landmark>,
}

impl FrameMessage {
    pub fn new(frame: &Frame, landmarks: &[Landmark], quality: u8) -> Result<Self> {
        Ok(Self {
            image: encode_frame_base64(frame, quality)?,
            landmarks: landmarks.to_vec(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode the `image` field back to JPEG bytes.
    pub fn jpeg_bytes(&self) -> Result<Vec<u8>> {
        general_purpose::STANDARD
            .decode(&self.image)
            .map_err(|e| anyhow!("Invalid base64 image: {}", e))
    }
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    if frame.is_empty() {
        return Err(anyhow!("Cannot encode an empty frame"));
    }
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)
        .map_err(|e| anyhow!("Failed to encode image as JPEG: {}", e))?;
    Ok(buffer)
}

pub fn encode_frame_base64(frame: &Frame, quality: u8) -> Result<String> {
    Ok(general_purpose::STANDARD.encode(encode_jpeg(frame, quality)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_starts_with_soi_marker() {
        let jpeg = encode_jpeg(&Frame::new(16, 8), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn message_has_wire_field_names() {
        let landmarks = vec![Landmark::new(0.25, 0.5, -0.1, 0.9)];
        let message = FrameMessage::new(&Frame::new(8, 8), &landmarks, 90).unwrap();
        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

        assert!(value["image"].is_string());
        let lm = &value["landmarks"][0];
        assert_eq!(lm["x"], 0.25);
        assert_eq!(lm["y"], 0.5);
        assert!(lm["z"].is_number());
        assert!(lm["visibility"].is_number());
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn empty_frames_are_rejected() {
        assert!(encode_jpeg(&Frame::new(0, 0), 90).is_err());
    }
}
