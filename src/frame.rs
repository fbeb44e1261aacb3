use anyhow::{anyhow, Result};
use image::{imageops::FilterType, DynamicImage, ImageBuffer, Rgb, RgbImage};
use std::time::Instant;

/// Interleaved 8-bit RGB frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub const CHANNELS: u32 = 3;

    /// Black frame of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; (width * height * Self::CHANNELS) as usize],
            width,
            height,
        }
    }

    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = (width * height * Self::CHANNELS) as usize;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB buffer has {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self { data, width, height })
    }

    pub fn from_image(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self {
            data: rgb.into_raw(),
            width,
            height,
        }
    }

    pub fn to_image(&self) -> Result<DynamicImage> {
        Ok(DynamicImage::ImageRgb8(self.to_rgb_image()?))
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("Failed to create image buffer"))
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// Resample to the given size. Returns a clone when the size already matches.
    pub fn resize(&self, width: u32, height: u32) -> Result<Self> {
        if self.width == width && self.height == height {
            return Ok(self.clone());
        }
        let resized = image::imageops::resize(&self.to_rgb_image()?, width, height, FilterType::Triangle);
        Ok(Self {
            data: resized.into_raw(),
            width,
            height,
        })
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * Self::CHANNELS) as usize;
        self.data.get(idx..idx + 3).map(|p| [p[0], p[1], p[2]])
    }

    pub fn set_pixel_safe(&mut self, x: i32, y: i32, color: [u8; 3]) {
        if x >= 0 && y >= 0 && x < self.width as i32 && y < self.height as i32 {
            let idx = ((y as u32 * self.width + x as u32) * Self::CHANNELS) as usize;
            if idx + 2 < self.data.len() {
                self.data[idx..idx + 3].copy_from_slice(&color);
            }
        }
    }
}

/// Memory layout of a device frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    /// HWC, `RGBRGB...`
    Interleaved,
    /// CHW, all R then all G then all B
    Planar,
}

/// A frame as delivered by a device output queue.
#[derive(Debug, Clone)]
pub struct ImgFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: FrameLayout,
    pub sequence: u64,
    pub timestamp: Instant,
}

impl ImgFrame {
    pub fn from_frame(frame: Frame, layout: FrameLayout, sequence: u64) -> Self {
        let data = match layout {
            FrameLayout::Interleaved => frame.data,
            FrameLayout::Planar => interleaved_to_planar(&frame.data, frame.width, frame.height),
        };
        Self {
            data,
            width: frame.width,
            height: frame.height,
            layout,
            sequence,
            timestamp: Instant::now(),
        }
    }

    /// Interleaved RGB view of this frame, whatever the device layout.
    pub fn to_frame(&self) -> Result<Frame> {
        let data = match self.layout {
            FrameLayout::Interleaved => self.data.clone(),
            FrameLayout::Planar => planar_to_interleaved(&self.data, self.width, self.height),
        };
        Frame::from_rgb(self.width, self.height, data)
    }
}

pub fn interleaved_to_planar(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let plane = (width * height) as usize;
    let mut out = vec![0u8; plane * 3];
    for (i, px) in data.chunks_exact(3).take(plane).enumerate() {
        out[i] = px[0];
        out[plane + i] = px[1];
        out[2 * plane + i] = px[2];
    }
    out
}

pub fn planar_to_interleaved(data: &[u8], width: u32, height: u32) -> Vec<u8> {
    let plane = (width * height) as usize;
    let mut out = vec![0u8; plane * 3];
    if data.len() < plane * 3 {
        return out;
    }
    for i in 0..plane {
        out[i * 3] = data[i];
        out[i * 3 + 1] = data[plane + i];
        out[i * 3 + 2] = data[2 * plane + i];
    }
    out
}
