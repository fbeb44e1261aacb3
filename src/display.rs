//! Local preview window.

use anyhow::{anyhow, Result};
use pixels::{Pixels, SurfaceTexture};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::Key;
use winit::window::{Window, WindowId};

use crate::analysis::{compare, ArmAngles, PoseFeedback, Tolerances};
use crate::annotate::{draw_landmarks, SkeletonStyle, GREEN, WHITE, YELLOW};
use crate::camera::FrameSource;
use crate::frame::Frame;
use crate::pose::PoseEstimator;
use crate::pump::{FramePump, ProcessedFrame, PumpStep};
use crate::tone::{FeedbackTone, ToneCue};

/// Optional comparison against a calibrated reference pose.
#[derive(Debug, Clone, Copy)]
pub struct ReferencePose {
    pub ideal: ArmAngles,
    pub tolerances: Tolerances,
    pub visibility_threshold: f32,
}

impl ReferencePose {
    /// Feedback for a live pose, `None` when the arm or hip is hidden.
    pub fn feedback(&self, processed: &ProcessedFrame) -> Option<PoseFeedback> {
        let live = ArmAngles::from_landmarks(&processed.landmarks, self.visibility_threshold).ok()?;
        Some(compare(&self.ideal, &live, &self.tolerances))
    }
}

/// Skeleton style for a frame: white without a reference, green on target,
/// yellow otherwise. On-target lines are drawn twice as thick.
pub fn style_for(base: &SkeletonStyle, feedback: Option<&PoseFeedback>) -> SkeletonStyle {
    match feedback {
        None => SkeletonStyle {
            line_color: WHITE,
            ..*base
        },
        Some(f) if f.on_target => SkeletonStyle {
            line_color: GREEN,
            line_width: base.line_width * 2,
            ..*base
        },
        Some(_) => SkeletonStyle {
            line_color: YELLOW,
            ..*base
        },
    }
}

/// Tracks the on-target state so feedback is logged only when it changes.
#[derive(Debug, Default)]
pub struct FeedbackLog {
    last: Option<Option<bool>>,
}

impl FeedbackLog {
    /// Line to log for this frame's feedback, `None` when the state is unchanged.
    pub fn observe(&mut self, feedback: Option<&PoseFeedback>) -> Option<String> {
        let state = feedback.map(|f| f.on_target);
        if self.last == Some(state) {
            return None;
        }
        self.last = Some(state);
        Some(match feedback {
            Some(f) => format!("Pose {}", f.summary()),
            None => "Searching for pose".to_string(),
        })
    }
}

/// Copy an RGB frame into an RGBA pixel buffer of the same size.
pub fn blit_rgb_to_rgba(frame: &Frame, rgba: &mut [u8]) {
    for (dst, src) in rgba.chunks_exact_mut(4).zip(frame.data.chunks_exact(3)) {
        dst[..3].copy_from_slice(src);
        dst[3] = 255;
    }
}

struct Surface {
    window: Arc<Window>,
    pixels: Pixels<'static>,
    buffer_size: (u32, u32),
}

pub struct PreviewWindow<S, P> {
    title: String,
    size: (u32, u32),
    pump: FramePump<S, P>,
    style: SkeletonStyle,
    reference: Option<ReferencePose>,
    feedback_log: FeedbackLog,
    tone: Option<FeedbackTone>,
    surface: Option<Surface>,
    error: Option<anyhow::Error>,
}

impl<S: FrameSource, P: PoseEstimator> PreviewWindow<S, P> {
    pub fn new(
        title: impl Into<String>,
        size: (u32, u32),
        pump: FramePump<S, P>,
        style: SkeletonStyle,
        reference: Option<ReferencePose>,
    ) -> Self {
        Self {
            title: title.into(),
            size,
            pump,
            style,
            reference,
            feedback_log: FeedbackLog::default(),
            tone: None,
            surface: None,
            error: None,
        }
    }

    /// Sound the proximity tone while comparing against a reference pose.
    pub fn with_tone(mut self, tone: FeedbackTone) -> Self {
        self.tone = Some(tone);
        self
    }

    /// Run until the window is closed or `q` is pressed.
    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.set_control_flow(ControlFlow::Poll);
        event_loop.run_app(&mut self)?;

        info!("Preview closed after {} frames", self.pump.frame_count());
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn create_surface(&self, event_loop: &ActiveEventLoop) -> Result<Surface> {
        let attributes = Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(LogicalSize::new(self.size.0, self.size.1));
        let window = Arc::new(event_loop.create_window(attributes)?);

        let inner = window.inner_size();
        let surface_texture = SurfaceTexture::new(inner.width, inner.height, window.clone());
        let pixels = Pixels::new(self.size.0, self.size.1, surface_texture)
            .map_err(|e| anyhow!("Failed to create pixel buffer: {}", e))?;

        Ok(Surface {
            window,
            pixels,
            buffer_size: self.size,
        })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        error!("Preview error: {:#}", error);
        self.error = Some(error);
        event_loop.exit();
    }

    fn present(&mut self, mut processed: ProcessedFrame) -> Result<()> {
        let feedback = self
            .reference
            .as_ref()
            .and_then(|reference| reference.feedback(&processed));
        if self.reference.is_some() {
            if let Some(f) = &feedback {
                debug!("Pose feedback: {} (proximity {:.2})", f.summary(), f.proximity);
            }
            if let Some(line) = self.feedback_log.observe(feedback.as_ref()) {
                info!("{}", line);
            }
            if let Some(tone) = self.tone.as_mut() {
                tone.set_cue(ToneCue::for_feedback(feedback.as_ref()));
            }
        }
        let style = style_for(&self.style, feedback.as_ref());
        draw_landmarks(&mut processed.frame, &processed.landmarks, &style);

        let Some(surface) = self.surface.as_mut() else {
            return Ok(());
        };
        let frame_size = (processed.frame.width, processed.frame.height);
        if surface.buffer_size != frame_size {
            surface
                .pixels
                .resize_buffer(frame_size.0, frame_size.1)
                .map_err(|e| anyhow!("Failed to resize pixel buffer: {}", e))?;
            surface.buffer_size = frame_size;
        }
        blit_rgb_to_rgba(&processed.frame, surface.pixels.frame_mut());
        surface.window.request_redraw();
        Ok(())
    }
}

impl<S: FrameSource, P: PoseEstimator> ApplicationHandler for PreviewWindow<S, P> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.surface.is_some() {
            return;
        }
        match self.create_surface(event_loop) {
            Ok(surface) => {
                info!("Preview window open, press 'q' to quit");
                self.surface = Some(surface);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Character(ref key),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } if key.as_str() == "q" => {
                info!("'q' pressed, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(surface) = self.surface.as_mut() {
                    if let Err(e) = surface.pixels.resize_surface(size.width, size.height) {
                        warn!("Failed to resize surface: {}", e);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(surface) = self.surface.as_ref() {
                    if let Err(e) = surface.pixels.render() {
                        let e = anyhow!("Render error: {}", e);
                        self.fail(event_loop, e);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(tone) = self.tone.as_mut() {
            tone.tick();
        }
        match self.pump.poll() {
            Ok(PumpStep::Frame(processed)) => {
                if let Err(e) = self.present(processed) {
                    self.fail(event_loop, e);
                }
            }
            Ok(PumpStep::Idle) => std::thread::sleep(std::time::Duration::from_millis(1)),
            Err(e) => self.fail(event_loop, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blit_sets_opaque_alpha() {
        let mut frame = Frame::new(2, 1);
        frame.set_pixel_safe(1, 0, [10, 20, 30]);
        let mut rgba = vec![0u8; 8];
        blit_rgb_to_rgba(&frame, &mut rgba);
        assert_eq!(rgba, vec![0, 0, 0, 255, 10, 20, 30, 255]);
    }

    #[test]
    fn on_target_feedback_thickens_green_lines() {
        let base = SkeletonStyle::default();
        let feedback = PoseFeedback {
            arm_diff: 1.0,
            shoulder_diff: 2.0,
            proximity: 0.9,
            on_target: true,
        };
        let style = style_for(&base, Some(&feedback));
        assert_eq!(style.line_color, GREEN);
        assert_eq!(style.line_width, base.line_width * 2);

        let off = PoseFeedback {
            on_target: false,
            ..feedback
        };
        assert_eq!(style_for(&base, Some(&off)).line_color, YELLOW);
        assert_eq!(style_for(&base, None).line_color, WHITE);
    }

    #[test]
    fn feedback_is_logged_on_state_changes_only() {
        let mut log = FeedbackLog::default();
        let off = PoseFeedback {
            arm_diff: 12.0,
            shoulder_diff: 3.0,
            proximity: 0.6,
            on_target: false,
        };
        let on = PoseFeedback {
            arm_diff: 1.0,
            shoulder_diff: 1.0,
            proximity: 0.95,
            on_target: true,
        };

        assert_eq!(log.observe(None).as_deref(), Some("Searching for pose"));
        assert_eq!(log.observe(None), None);
        assert_eq!(
            log.observe(Some(&off)).as_deref(),
            Some("Pose arm 12° / shoulder 3° off")
        );
        assert_eq!(log.observe(Some(&off)), None);
        assert_eq!(log.observe(Some(&on)).as_deref(), Some("Pose on target"));
        assert_eq!(log.observe(None).as_deref(), Some("Searching for pose"));
    }
}
