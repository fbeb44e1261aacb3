//! Camera pipeline, device and output queues.
//!
//! A [`Pipeline`] describes color camera nodes and the XLinkOut streams they
//! feed. [`Device::start`] opens every linked camera through a
//! [`CameraBackend`] on its own capture thread, and hands frames to the host
//! through bounded [`OutputQueue`]s that are polled without blocking.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::CameraConfig;
use crate::error::{DeviceError, PipelineError};
use crate::frame::{Frame, FrameLayout, ImgFrame};

/// Queue settings a stream uses until the host asks for its output queue.
const DEFAULT_QUEUE_SIZE: usize = 16;
const DEFAULT_QUEUE_BLOCKING: bool = true;

/// Physical camera slot on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoardSocket {
    #[serde(rename = "CAM_A", alias = "RGB")]
    CamA,
    #[serde(rename = "CAM_B", alias = "LEFT")]
    CamB,
    #[serde(rename = "CAM_C", alias = "RIGHT")]
    CamC,
}

impl BoardSocket {
    /// Offset of this socket from the device's first host index.
    pub fn index_offset(self) -> u32 {
        match self {
            BoardSocket::CamA => 0,
            BoardSocket::CamB => 1,
            BoardSocket::CamC => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BoardSocket::CamA => "CAM_A",
            BoardSocket::CamB => "CAM_B",
            BoardSocket::CamC => "CAM_C",
        }
    }
}

/// Sensor readout resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorResolution {
    #[serde(rename = "THE_720_P")]
    The720P,
    #[serde(rename = "THE_800_P")]
    The800P,
    #[serde(rename = "THE_1080_P")]
    The1080P,
    #[serde(rename = "THE_4_K")]
    The4K,
    #[serde(rename = "THE_12_MP")]
    The12Mp,
}

impl SensorResolution {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            SensorResolution::The720P => (1280, 720),
            SensorResolution::The800P => (1280, 800),
            SensorResolution::The1080P => (1920, 1080),
            SensorResolution::The4K => (3840, 2160),
            SensorResolution::The12Mp => (4056, 3040),
        }
    }
}

/// Color camera node settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorCamera {
    pub preview_width: u32,
    pub preview_height: u32,
    pub interleaved: bool,
    pub fps: u32,
    pub resolution: SensorResolution,
    pub board_socket: BoardSocket,
}

impl Default for ColorCamera {
    fn default() -> Self {
        Self {
            preview_width: 300,
            preview_height: 300,
            interleaved: true,
            fps: 30,
            resolution: SensorResolution::The1080P,
            board_socket: BoardSocket::CamA,
        }
    }
}

impl ColorCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preview_size(mut self, width: u32, height: u32) -> Self {
        self.preview_width = width;
        self.preview_height = height;
        self
    }

    pub fn interleaved(mut self, interleaved: bool) -> Self {
        self.interleaved = interleaved;
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn resolution(mut self, resolution: SensorResolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn board_socket(mut self, socket: BoardSocket) -> Self {
        self.board_socket = socket;
        self
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.preview_width == 0 || self.preview_height == 0 {
            return Err(PipelineError::InvalidSetting("preview size must be non-zero".into()));
        }
        if self.fps == 0 {
            return Err(PipelineError::InvalidSetting("fps must be non-zero".into()));
        }
        let (sensor_w, sensor_h) = self.resolution.dimensions();
        if self.preview_width > sensor_w || self.preview_height > sensor_h {
            return Err(PipelineError::InvalidSetting(format!(
                "preview {}x{} exceeds sensor resolution {}x{}",
                self.preview_width, self.preview_height, sensor_w, sensor_h
            )));
        }
        Ok(())
    }

    fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            socket: self.board_socket,
            resolution: self.resolution,
            fps: self.fps,
            preview_width: self.preview_width,
            preview_height: self.preview_height,
            layout: if self.interleaved {
                FrameLayout::Interleaved
            } else {
                FrameLayout::Planar
            },
        }
    }
}

/// Everything a backend needs to open one camera stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub socket: BoardSocket,
    pub resolution: SensorResolution,
    pub fps: u32,
    pub preview_width: u32,
    pub preview_height: u32,
    pub layout: FrameLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum Node {
    ColorCamera(ColorCamera),
    XLinkOut { stream_name: String, input: Option<NodeId> },
}

/// Graph of camera nodes and host output streams.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    nodes: Vec<Node>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_color_camera(&mut self, camera: ColorCamera) -> NodeId {
        self.nodes.push(Node::ColorCamera(camera));
        NodeId(self.nodes.len() - 1)
    }

    pub fn create_xlink_out(&mut self, stream_name: impl Into<String>) -> NodeId {
        self.nodes.push(Node::XLinkOut {
            stream_name: stream_name.into(),
            input: None,
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Link a camera's preview output to an XLinkOut input.
    pub fn link(&mut self, camera: NodeId, output: NodeId) -> Result<(), PipelineError> {
        match self.nodes.get(camera.0) {
            Some(Node::ColorCamera(_)) => {}
            Some(_) => return Err(PipelineError::NotACamera(camera.0)),
            None => return Err(PipelineError::UnknownNode(camera.0)),
        }
        match self.nodes.get_mut(output.0) {
            Some(Node::XLinkOut { stream_name, input }) => {
                if input.is_some() {
                    return Err(PipelineError::AlreadyLinked(stream_name.clone()));
                }
                *input = Some(camera);
                Ok(())
            }
            Some(_) => Err(PipelineError::NotAnOutput(output.0)),
            None => Err(PipelineError::UnknownNode(output.0)),
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut seen = Vec::new();
        for node in &self.nodes {
            match node {
                Node::ColorCamera(camera) => camera.validate()?,
                Node::XLinkOut { stream_name, input } => {
                    if stream_name.trim().is_empty() {
                        return Err(PipelineError::EmptyStreamName);
                    }
                    if seen.contains(&stream_name) {
                        return Err(PipelineError::DuplicateStream(stream_name.clone()));
                    }
                    if input.is_none() {
                        return Err(PipelineError::Unlinked(stream_name.clone()));
                    }
                    seen.push(stream_name);
                }
            }
        }
        Ok(())
    }

    /// Linked output streams with the settings of the camera feeding them.
    pub fn streams(&self) -> Vec<(String, CaptureSettings)> {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Node::XLinkOut {
                    stream_name,
                    input: Some(NodeId(source)),
                } => match self.nodes.get(*source) {
                    Some(Node::ColorCamera(camera)) => {
                        Some((stream_name.clone(), camera.capture_settings()))
                    }
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }
}

/// Build the single-camera preview pipeline described by `config`.
pub fn build_pipeline(config: &CameraConfig) -> Result<Pipeline, PipelineError> {
    let mut pipeline = Pipeline::new();

    debug!("Creating ColorCamera on {}", config.board_socket.name());
    let camera = ColorCamera::new()
        .preview_size(config.preview_width, config.preview_height)
        .interleaved(config.interleaved)
        .fps(config.fps)
        .resolution(config.sensor_resolution)
        .board_socket(config.board_socket);
    if let Err(e) = camera.validate() {
        error!("Failed to create ColorCamera: {}", e);
        return Err(e);
    }
    let cam = pipeline.create_color_camera(camera);

    let xout = pipeline.create_xlink_out(config.stream_name.clone());
    if let Err(e) = pipeline.link(cam, xout) {
        error!("Failed to create XLinkOut '{}': {}", config.stream_name, e);
        return Err(e);
    }

    pipeline.validate()?;
    Ok(pipeline)
}

/// Opens camera streams. Streams are opened on the capture thread, so they
/// need not be `Send`.
pub trait CameraBackend: Clone + Send + 'static {
    type Stream: CaptureStream;

    fn open(&self, settings: &CaptureSettings) -> Result<Self::Stream, DeviceError>;
}

pub trait CaptureStream {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, DeviceError>;
}

/// Host cameras through `nokhwa`. Board sockets map to consecutive device
/// indices starting at `device_index`.
#[derive(Debug, Clone)]
pub struct NokhwaBackend {
    pub device_index: u32,
}

impl NokhwaBackend {
    pub fn new(device_index: u32) -> Self {
        Self { device_index }
    }
}

pub struct NokhwaStream {
    camera: Camera,
}

impl CameraBackend for NokhwaBackend {
    type Stream = NokhwaStream;

    fn open(&self, settings: &CaptureSettings) -> Result<NokhwaStream, DeviceError> {
        let index = self.device_index + settings.socket.index_offset();
        let (width, height) = settings.resolution.dimensions();
        let format = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, settings.fps);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let mut camera = Camera::new(CameraIndex::Index(index), requested).map_err(|e| {
            warn!("Camera {} unavailable: {}", index, e);
            DeviceError::NotFound {
                socket: settings.socket.name().to_string(),
                index,
            }
        })?;
        camera
            .open_stream()
            .map_err(|e| DeviceError::Open(e.to_string()))?;

        info!(
            "Opened camera {} for {} ({:?})",
            index,
            settings.socket.name(),
            camera.camera_format()
        );
        Ok(NokhwaStream { camera })
    }
}

impl CaptureStream for NokhwaStream {
    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| DeviceError::Capture(e.to_string()))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| DeviceError::Capture(e.to_string()))?;
        let (width, height) = (decoded.width(), decoded.height());
        Frame::from_rgb(width, height, decoded.into_raw())
            .map_err(|e| DeviceError::Capture(e.to_string()))
    }
}

impl Drop for NokhwaStream {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!("Error stopping camera stream: {}", e);
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraDescriptor {
    pub index: String,
    pub name: String,
}

/// Cameras visible to the host.
pub fn list_cameras() -> Vec<CameraDescriptor> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .iter()
            .map(|info| CameraDescriptor {
                index: info.index().to_string(),
                name: info.human_name().to_string(),
            })
            .collect(),
        Err(e) => {
            warn!("Failed to enumerate cameras: {}", e);
            Vec::new()
        }
    }
}

struct QueueState {
    frames: VecDeque<ImgFrame>,
    max_size: usize,
    blocking: bool,
    closed: Option<String>,
    dropped: u64,
}

/// Bounded frame queue between a capture thread and the host.
pub struct FrameQueue {
    state: Mutex<QueueState>,
    space: Condvar,
}

impl FrameQueue {
    pub fn new(max_size: usize, blocking: bool) -> Self {
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(max_size),
                max_size: max_size.max(1),
                blocking,
                closed: None,
                dropped: 0,
            }),
            space: Condvar::new(),
        }
    }

    /// Enqueue a frame. A full non-blocking queue discards its oldest frame;
    /// a full blocking queue waits for room. Returns false once closed.
    pub fn push(&self, frame: ImgFrame) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.closed.is_some() {
                return false;
            }
            if state.frames.len() < state.max_size {
                state.frames.push_back(frame);
                return true;
            }
            if !state.blocking {
                state.frames.pop_front();
                state.dropped += 1;
                continue;
            }
            self.space.wait_for(&mut state, Duration::from_millis(50));
        }
    }

    pub fn try_pop(&self) -> Option<ImgFrame> {
        let frame = self.state.lock().frames.pop_front();
        if frame.is_some() {
            self.space.notify_one();
        }
        frame
    }

    pub fn configure(&self, max_size: usize, blocking: bool) {
        let mut state = self.state.lock();
        state.max_size = max_size.max(1);
        state.blocking = blocking;
        while state.frames.len() > state.max_size {
            state.frames.pop_front();
            state.dropped += 1;
        }
        self.space.notify_all();
    }

    pub fn close(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if state.closed.is_none() {
            state.closed = Some(reason.into());
        }
        self.space.notify_all();
    }

    pub fn closed_reason(&self) -> Option<String> {
        self.state.lock().closed.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

struct DeviceInner {
    running: Arc<AtomicBool>,
    queues: HashMap<String, Arc<FrameQueue>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceInner {
    fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        for queue in self.queues.values() {
            queue.close("device stopped");
        }
        for handle in self.threads.lock().drain(..) {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        info!("Device being dropped, stopping capture");
        self.shutdown();
    }
}

/// A running pipeline. Capture stops when the device and every queue
/// obtained from it have been dropped.
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    pub fn start<B: CameraBackend>(pipeline: Pipeline, backend: B) -> Result<Self, DeviceError> {
        pipeline.validate()?;

        let running = Arc::new(AtomicBool::new(true));
        let mut queues = HashMap::new();
        let mut threads = Vec::new();

        for (name, settings) in pipeline.streams() {
            let queue = Arc::new(FrameQueue::new(DEFAULT_QUEUE_SIZE, DEFAULT_QUEUE_BLOCKING));
            let (ready_tx, ready_rx) = crossbeam::channel::bounded::<Result<(), DeviceError>>(1);

            let thread_queue = queue.clone();
            let thread_running = running.clone();
            let thread_backend = backend.clone();
            let thread_name = name.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("capture-{}", name))
                .spawn(move || {
                    let stream = match thread_backend.open(&settings) {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            thread_queue.close(e.to_string());
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    capture_loop(stream, &thread_name, &settings, &thread_queue, &thread_running);
                });

            let handle = match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    stop_threads(&running, &queues, threads);
                    return Err(DeviceError::Open(format!("failed to spawn capture thread: {}", e)));
                }
            };
            threads.push(handle);

            let ready = ready_rx
                .recv()
                .unwrap_or_else(|_| Err(DeviceError::Open("capture thread exited".into())));
            queues.insert(name.clone(), queue);
            if let Err(e) = ready {
                error!("Failed to start stream '{}': {}", name, e);
                stop_threads(&running, &queues, threads);
                return Err(e);
            }
            info!("Stream '{}' running", name);
        }

        Ok(Self {
            inner: Arc::new(DeviceInner {
                running,
                queues,
                threads: Mutex::new(threads),
            }),
        })
    }

    /// Host queue for `name`, resized to `max_size`. A non-blocking queue
    /// overwrites its oldest frame when full.
    pub fn output_queue(
        &self,
        name: &str,
        max_size: usize,
        blocking: bool,
    ) -> Result<OutputQueue, DeviceError> {
        let queue = self
            .inner
            .queues
            .get(name)
            .ok_or_else(|| DeviceError::UnknownStream(name.to_string()))?;
        queue.configure(max_size, blocking);
        Ok(OutputQueue {
            name: name.to_string(),
            queue: queue.clone(),
            _device: self.inner.clone(),
        })
    }

    pub fn stream_names(&self) -> Vec<String> {
        self.inner.queues.keys().cloned().collect()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

fn stop_threads(
    running: &AtomicBool,
    queues: &HashMap<String, Arc<FrameQueue>>,
    threads: Vec<JoinHandle<()>>,
) {
    running.store(false, Ordering::Release);
    for queue in queues.values() {
        queue.close("device stopped");
    }
    for handle in threads {
        let _ = handle.join();
    }
}

fn capture_loop<S: CaptureStream>(
    mut stream: S,
    name: &str,
    settings: &CaptureSettings,
    queue: &FrameQueue,
    running: &AtomicBool,
) {
    let mut sequence = 0u64;
    while running.load(Ordering::Acquire) {
        let frame = match stream
            .next_frame()
            .and_then(|f| {
                f.resize(settings.preview_width, settings.preview_height)
                    .map_err(|e| DeviceError::Capture(e.to_string()))
            }) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Stream '{}' capture failed: {}", name, e);
                queue.close(e.to_string());
                return;
            }
        };

        if !queue.push(ImgFrame::from_frame(frame, settings.layout, sequence)) {
            break;
        }
        sequence += 1;
    }
    debug!("Stream '{}' stopped after {} frames", name, sequence);
    queue.close("device stopped");
}

/// Host side of a device stream.
pub struct OutputQueue {
    name: String,
    queue: Arc<FrameQueue>,
    _device: Arc<DeviceInner>,
}

impl OutputQueue {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next queued frame, `None` when the queue is empty. Fails once the
    /// stream has stopped and every queued frame has been taken.
    pub fn try_get(&self) -> Result<Option<ImgFrame>, DeviceError> {
        match self.queue.try_pop() {
            Some(frame) => Ok(Some(frame)),
            None => match self.queue.closed_reason() {
                Some(reason) => Err(DeviceError::StreamClosed {
                    name: self.name.clone(),
                    reason,
                }),
                None => Ok(None),
            },
        }
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

/// Anything the frame pump can poll.
pub trait FrameSource {
    fn try_get(&mut self) -> Result<Option<ImgFrame>, DeviceError>;
}

impl FrameSource for OutputQueue {
    fn try_get(&mut self) -> Result<Option<ImgFrame>, DeviceError> {
        OutputQueue::try_get(self)
    }
}

/// Build the pipeline from `config`, start it on `backend` and return the
/// configured output queue.
pub fn start_camera<B: CameraBackend>(
    config: &CameraConfig,
    backend: B,
) -> Result<OutputQueue, DeviceError> {
    let pipeline = build_pipeline(config)?;
    let device = Device::start(pipeline, backend)?;
    device.output_queue(&config.stream_name, config.queue_size, config.queue_blocking)
}
