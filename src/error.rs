use thiserror::Error;

/// Errors raised while assembling a capture pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown pipeline node {0}")]
    UnknownNode(usize),
    #[error("node {0} is not a color camera")]
    NotACamera(usize),
    #[error("node {0} is not an XLinkOut")]
    NotAnOutput(usize),
    #[error("XLinkOut '{0}' is already linked")]
    AlreadyLinked(String),
    #[error("XLinkOut '{0}' has no input linked")]
    Unlinked(String),
    #[error("XLinkOut stream name must not be empty")]
    EmptyStreamName,
    #[error("duplicate XLinkOut stream name '{0}'")]
    DuplicateStream(String),
    #[error("invalid camera setting: {0}")]
    InvalidSetting(String),
}

/// Errors raised by a running device and its output queues.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no camera found for socket {socket} (device index {index})")]
    NotFound { socket: String, index: u32 },
    #[error("failed to open camera: {0}")]
    Open(String),
    #[error("frame capture failed: {0}")]
    Capture(String),
    #[error("no output queue named '{0}'")]
    UnknownStream(String),
    #[error("output stream '{name}' closed: {reason}")]
    StreamClosed { name: String, reason: String },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Errors raised by pose estimators.
#[derive(Debug, Error)]
pub enum PoseError {
    #[error("pose model not found at {0}")]
    ModelNotFound(String),
    #[error("failed to load pose model: {0}")]
    Load(String),
    #[error("pose inference failed: {0}")]
    Inference(String),
    #[error("unexpected pose model output: {0}")]
    Output(String),
    #[error("frame is empty")]
    EmptyFrame,
}
