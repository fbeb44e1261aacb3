use crate::frame::Frame;
use crate::pose::{Landmark, POSE_CONNECTIONS};

pub const WHITE: [u8; 3] = [255, 255, 255];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const YELLOW: [u8; 3] = [255, 255, 0];
pub const RED: [u8; 3] = [255, 0, 0];

#[derive(Debug, Clone, Copy)]
pub struct SkeletonStyle {
    pub line_color: [u8; 3],
    pub line_width: u32,
    pub point_color: [u8; 3],
    /// Landmarks below this visibility, and edges touching them, are skipped.
    pub visibility_threshold: f32,
}

impl Default for SkeletonStyle {
    fn default() -> Self {
        Self {
            line_color: WHITE,
            line_width: 4,
            point_color: RED,
            visibility_threshold: 0.5,
        }
    }
}

impl SkeletonStyle {
    fn point_radius(&self) -> i32 {
        (self.line_width as i32 / 2).max(2)
    }
}

/// Draw connections then joints onto `frame`. Landmarks are normalised.
pub fn draw_landmarks(frame: &mut Frame, landmarks: &[Landmark], style: &SkeletonStyle) {
    if landmarks.is_empty() || frame.is_empty() {
        return;
    }

    let visible = |lm: &Landmark| lm.visibility >= style.visibility_threshold;
    let (width, height) = (frame.width, frame.height);
    let to_pixel = |lm: &Landmark| {
        (
            (lm.x * width as f32).round() as i32,
            (lm.y * height as f32).round() as i32,
        )
    };

    for &(start, end) in POSE_CONNECTIONS.iter() {
        let (Some(a), Some(b)) = (landmarks.get(start), landmarks.get(end)) else {
            continue;
        };
        if !visible(a) || !visible(b) {
            continue;
        }
        let (from, to) = (to_pixel(a), to_pixel(b));
        draw_line(frame, from, to, style.line_width, style.line_color);
    }

    let radius = style.point_radius();
    for lm in landmarks.iter().filter(|lm| visible(lm)) {
        let (x, y) = to_pixel(lm);
        fill_circle(frame, x, y, radius, style.point_color);
    }
}

/// Bresenham line stamped with a square brush of `width` pixels.
pub fn draw_line(frame: &mut Frame, from: (i32, i32), to: (i32, i32), width: u32, color: [u8; 3]) {
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let half = (width.max(1) as i32 - 1) / 2;

    loop {
        for oy in -half..=half {
            for ox in -half..=half {
                frame.set_pixel_safe(x0 + ox, y0 + oy, color);
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

pub fn fill_circle(frame: &mut Frame, cx: i32, cy: i32, radius: i32, color: [u8; 3]) {
    for y in -radius..=radius {
        for x in -radius..=radius {
            if x * x + y * y <= radius * radius {
                frame.set_pixel_safe(cx + x, cy + y, color);
            }
        }
    }
}
