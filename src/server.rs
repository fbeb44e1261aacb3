//! WebSocket frame streaming.
//!
//! Every client connection gets its own camera source and frame pump; the
//! pose estimator is shared. Each processed frame is sent as one JSON text
//! message `{"image": <base64 JPEG>, "landmarks": [...]}`.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::camera::{self, FrameSource, NokhwaBackend};
use crate::config::{CameraConfig, ServerConfig};
use crate::pose::{PoseEstimator, SharedEstimator};
use crate::pump::{FramePump, PumpStep};

/// Opens a fresh frame source for each client.
pub trait SourceFactory: Send + Sync + 'static {
    type Source: FrameSource + Send + 'static;

    fn open(&self) -> Result<Self::Source>;
}

/// Starts the configured camera pipeline on the host device.
pub struct DeviceSourceFactory {
    config: CameraConfig,
}

impl DeviceSourceFactory {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }
}

impl SourceFactory for DeviceSourceFactory {
    type Source = camera::OutputQueue;

    fn open(&self) -> Result<Self::Source> {
        let backend = NokhwaBackend::new(self.config.device_index);
        let queue = camera::start_camera(&self.config, backend).context("Failed to start camera pipeline")?;
        Ok(queue)
    }
}

#[derive(Debug, Clone, Copy)]
struct StreamSettings {
    send_interval: Duration,
    idle_poll: Duration,
    jpeg_quality: u8,
}

impl From<&ServerConfig> for StreamSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            send_interval: Duration::from_millis(config.send_interval_ms),
            idle_poll: Duration::from_millis(config.idle_poll_ms),
            jpeg_quality: config.jpeg_quality,
        }
    }
}

pub struct PoseServer<F, P> {
    config: ServerConfig,
    factory: Arc<F>,
    estimator: SharedEstimator<P>,
}

impl<F, P> PoseServer<F, P>
where
    F: SourceFactory,
    P: PoseEstimator + Send + 'static,
{
    pub fn new(config: ServerConfig, factory: F, estimator: P) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            estimator: SharedEstimator::new(estimator),
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.socket_addr().await?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("Starting WebSocket server on ws://{}", self.config.address());
        self.serve(listener).await
    }

    /// Accept clients on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let settings = StreamSettings::from(&self.config);
        loop {
            let (stream, addr) = listener.accept().await?;
            let factory = self.factory.clone();
            let estimator = self.estimator.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, factory, estimator, settings).await {
                    error!("Fatal error for client {}: {:#}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection<F, P>(
    stream: TcpStream,
    addr: SocketAddr,
    factory: Arc<F>,
    estimator: SharedEstimator<P>,
    settings: StreamSettings,
) -> Result<()>
where
    F: SourceFactory,
    P: PoseEstimator + Send + 'static,
{
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    info!("Client {} connected, starting camera pipeline", addr);

    // camera startup waits on the capture thread
    let source = tokio::task::spawn_blocking(move || factory.open()).await??;
    let mut pump = FramePump::new(source, estimator);
    let (mut write, mut read) = ws_stream.split();
    info!("Camera running, streaming to {}", addr);

    let result = loop {
        let (returned, step) = tokio::task::spawn_blocking(move || {
            let step = next_message(&mut pump, settings.jpeg_quality);
            (pump, step)
        })
        .await?;
        pump = returned;

        let pause = match step {
            Ok(Some(json)) => {
                match write.send(Message::Text(json)).await {
                    Ok(()) => {}
                    Err(e) if is_disconnect(&e) => {
                        info!("Client {} disconnected", addr);
                        break Ok(());
                    }
                    Err(e) => break Err(e.into()),
                }
                settings.send_interval
            }
            Ok(None) => settings.idle_poll,
            Err(e) => break Err(e),
        };

        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client {} disconnected", addr);
                    break Ok(());
                }
                Some(Ok(other)) => debug!("Ignoring client message: {:?}", other),
                Some(Err(e)) if is_disconnect(&e) => {
                    info!("Client {} disconnected", addr);
                    break Ok(());
                }
                Some(Err(e)) => {
                    warn!("WebSocket error for client {}: {}", addr, e);
                    break Ok(());
                }
            },
            _ = tokio::time::sleep(pause) => {}
        }
    };

    let frames = pump.frame_count();
    // dropping the device joins its capture thread
    tokio::task::spawn_blocking(move || drop(pump)).await?;
    info!("Stopped streaming to {} after {} frames", addr, frames);
    result
}

/// One pump poll, encoded as the JSON text message when a frame was ready.
fn next_message<S, P>(pump: &mut FramePump<S, P>, jpeg_quality: u8) -> Result<Option<String>>
where
    S: FrameSource,
    P: PoseEstimator,
{
    match pump.poll()? {
        PumpStep::Frame(processed) => Ok(Some(processed.to_message(jpeg_quality)?.to_json()?)),
        PumpStep::Idle => Ok(None),
    }
}

fn is_disconnect(e: &WsError) -> bool {
    matches!(
        e,
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_) | WsError::Protocol(_)
    )
}
