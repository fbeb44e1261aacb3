use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tokio::fs;

use crate::camera::{BoardSocket, SensorResolution};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoseCastConfig {
    pub camera: CameraConfig,
    pub pose: PoseConfig,
    pub server: ServerConfig,
    pub display: DisplayConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Host device index of the `CAM_A` sensor
    pub device_index: u32,
    pub board_socket: BoardSocket,
    pub preview_width: u32,
    pub preview_height: u32,
    pub sensor_resolution: SensorResolution,
    pub fps: u32,
    /// Planar (CHW) frames when false
    pub interleaved: bool,
    pub stream_name: String,
    /// Host-side output queue capacity
    pub queue_size: usize,
    /// Block the producer instead of dropping the oldest frame
    pub queue_blocking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoseConfig {
    /// ONNX BlazePose landmark model
    pub model_path: String,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub intra_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Pause after each sent frame
    pub send_interval_ms: u64,
    /// Pause after an empty poll
    pub idle_poll_ms: u64,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub window_title: String,
    /// Preview size requested from the camera in desktop mode
    pub preview_width: u32,
    pub preview_height: u32,
    pub visibility_threshold: f32,
    pub line_width: u32,
    /// Play a tone tracking reference-pose proximity in desktop mode
    pub feedback_tone: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub arm_tolerance_deg: f32,
    pub shoulder_tolerance_deg: f32,
    /// Deviation at which proximity reaches zero
    pub proximity_range_deg: f32,
    pub visibility_threshold: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            board_socket: BoardSocket::CamA,
            preview_width: 640,
            preview_height: 480,
            sensor_resolution: SensorResolution::The1080P,
            fps: 30,
            interleaved: false,
            stream_name: "rgb".to_string(),
            queue_size: 4,
            queue_blocking: false,
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            model_path: "models/pose_landmark_full.onnx".to_string(),
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            intra_threads: 2,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8765,
            send_interval_ms: 10,
            idle_poll_ms: 1,
            jpeg_quality: 90,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_title: "OAK-D Pose".to_string(),
            preview_width: 1280,
            preview_height: 720,
            visibility_threshold: 0.5,
            line_width: 4,
            feedback_tone: true,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            arm_tolerance_deg: 5.0,
            shoulder_tolerance_deg: 5.0,
            proximity_range_deg: 20.0,
            visibility_threshold: 0.5,
        }
    }
}

impl PoseCastConfig {
    /// Load from `path`, writing the defaults there first if the file is missing.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let default_config = Self::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            fs::write(path, toml_content).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let camera = &self.camera;
        if camera.preview_width == 0 || camera.preview_height == 0 {
            return Err(anyhow!("camera preview size must be non-zero"));
        }
        if camera.fps == 0 {
            return Err(anyhow!("camera fps must be non-zero"));
        }
        if camera.queue_size == 0 {
            return Err(anyhow!("camera queue_size must be at least 1"));
        }
        if camera.stream_name.trim().is_empty() {
            return Err(anyhow!("camera stream_name must not be empty"));
        }
        if self.display.preview_width == 0 || self.display.preview_height == 0 {
            return Err(anyhow!("display preview size must be non-zero"));
        }

        for (name, value) in [
            ("pose.min_detection_confidence", self.pose.min_detection_confidence),
            ("pose.min_tracking_confidence", self.pose.min_tracking_confidence),
            ("display.visibility_threshold", self.display.visibility_threshold),
            ("analysis.visibility_threshold", self.analysis.visibility_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }

        if !(1..=100).contains(&self.server.jpeg_quality) {
            return Err(anyhow!("server.jpeg_quality must be within 1..=100"));
        }
        if self.analysis.proximity_range_deg <= 0.0 {
            return Err(anyhow!("analysis.proximity_range_deg must be positive"));
        }
        Ok(())
    }
}

impl ServerConfig {
    /// `host:port` as a display string for logs and URLs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve the configured host, preferring IPv4 for `localhost`.
    pub async fn socket_addr(&self) -> Result<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = tokio::net::lookup_host(self.address()).await?.collect();
        addrs.sort_by_key(|a| !a.is_ipv4());
        addrs
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("could not resolve {}", self.address()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_out_of_the_box() {
        let config = PoseCastConfig::default();
        assert_eq!(config.camera.preview_width, 640);
        assert_eq!(config.camera.preview_height, 480);
        assert_eq!(config.camera.queue_size, 4);
        assert!(!config.camera.queue_blocking);
        assert_eq!(config.camera.stream_name, "rgb");
        assert_eq!(config.server.address(), "localhost:8765");
        assert_eq!((config.display.preview_width, config.display.preview_height), (1280, 720));
        assert!(config.display.feedback_tone);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_out_of_range_thresholds() {
        let mut config = PoseCastConfig::default();
        config.pose.min_detection_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = PoseCastConfig::default();
        config.camera.queue_size = 0;
        assert!(config.validate().is_err());

        let mut config = PoseCastConfig::default();
        config.camera.stream_name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let config: PoseCastConfig = toml::from_str("[server]\nport = 9000\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.camera, CameraConfig::default());
    }
}
