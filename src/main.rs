use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use posecast::analysis::ArmAngles;
use posecast::annotate::SkeletonStyle;
use posecast::camera::{self, NokhwaBackend};
use posecast::config::{PoseCastConfig, PoseConfig};
use posecast::display::{PreviewWindow, ReferencePose};
use posecast::frame::Frame;
use posecast::pose::{OnnxPoseEstimator, PoseEstimator};
use posecast::pump::FramePump;
use posecast::server::{DeviceSourceFactory, PoseServer};
use posecast::tone::FeedbackTone;

#[derive(Parser)]
#[command(name = "posecast")]
#[command(about = "Camera pose estimation with a local preview or a WebSocket stream")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "posecast.toml")]
    config: PathBuf,

    /// Pose model path (overrides the config file)
    #[arg(short, long)]
    model_path: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream frames and landmarks to WebSocket clients
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show the annotated camera feed in a local window ('q' quits)
    Desktop {
        /// Still image whose arm angles become the target pose
        #[arg(long)]
        reference: Option<PathBuf>,
    },
    /// Print the arm angles of a still image as JSON
    Calibrate { image: PathBuf },
    /// List cameras visible to the host
    ListCameras,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(format!("posecast={}", log_level))
        .try_init();

    let mut config = PoseCastConfig::load(&args.config)
        .await
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(model_path) = args.model_path.clone() {
        config.pose.model_path = model_path;
    }
    info!("Configuration loaded from {}", args.config.display());

    match args.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }
        Command::Desktop { reference } => run_desktop(config, reference.as_deref()),
        Command::Calibrate { image } => {
            let mut estimator = load_estimator(&config.pose)?;
            let angles = calibrate(&mut estimator, &image, config.analysis.visibility_threshold)?;
            println!("{}", serde_json::to_string_pretty(&angles)?);
            Ok(())
        }
        Command::ListCameras => {
            let cameras = camera::list_cameras();
            if cameras.is_empty() {
                println!("No cameras detected");
            }
            for cam in cameras {
                println!("{}: {}", cam.index, cam.name);
            }
            Ok(())
        }
    }
}

fn load_estimator(config: &PoseConfig) -> Result<OnnxPoseEstimator> {
    OnnxPoseEstimator::load(config).map_err(|e| {
        error!("Pose model unavailable: {}", e);
        e.into()
    })
}

fn calibrate<P: PoseEstimator>(
    estimator: &mut P,
    image: &Path,
    visibility_threshold: f32,
) -> Result<ArmAngles> {
    let img = image::open(image).with_context(|| format!("Failed to open {}", image.display()))?;
    let frame = Frame::from_image(&img);
    let landmarks = estimator
        .process(&frame)?
        .ok_or_else(|| anyhow!("No pose detected in {}", image.display()))?;
    let angles = ArmAngles::from_landmarks(&landmarks, visibility_threshold)?;
    info!(
        "Calibrated: arm {:.1}° / shoulder {:.1}°",
        angles.bow_arm, angles.shoulder_lift
    );
    Ok(angles)
}

async fn run_server(config: PoseCastConfig) -> Result<()> {
    config.validate()?;
    // fail before accepting clients if the pipeline itself is unusable
    camera::build_pipeline(&config.camera)?;

    let estimator = load_estimator(&config.pose)?;
    let server = PoseServer::new(
        config.server.clone(),
        DeviceSourceFactory::new(config.camera.clone()),
        estimator,
    );

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Server stopped");
            Ok(())
        }
    }
}

fn run_desktop(config: PoseCastConfig, reference: Option<&Path>) -> Result<()> {
    let mut estimator = load_estimator(&config.pose)?;

    let reference = match reference {
        Some(path) => Some(ReferencePose {
            ideal: calibrate(&mut estimator, path, config.analysis.visibility_threshold)?,
            tolerances: (&config.analysis).into(),
            visibility_threshold: config.analysis.visibility_threshold,
        }),
        None => None,
    };

    let mut camera_config = config.camera.clone();
    camera_config.preview_width = config.display.preview_width;
    camera_config.preview_height = config.display.preview_height;

    info!("Starting camera on {}", camera_config.board_socket.name());
    let queue = camera::start_camera(&camera_config, NokhwaBackend::new(camera_config.device_index))
        .map_err(|e| {
            error!("Camera pipeline failed: {}", e);
            e
        })?;

    let style = SkeletonStyle {
        line_width: config.display.line_width,
        visibility_threshold: config.display.visibility_threshold,
        ..SkeletonStyle::default()
    };
    let tone = if reference.is_some() && config.display.feedback_tone {
        FeedbackTone::open()
            .map_err(|e| warn!("Continuing without feedback tone: {:#}", e))
            .ok()
    } else {
        None
    };

    let mut window = PreviewWindow::new(
        config.display.window_title.clone(),
        (config.display.preview_width, config.display.preview_height),
        FramePump::new(queue, estimator),
        style,
        reference,
    );
    if let Some(tone) = tone {
        window = window.with_tone(tone);
    }
    window.run()
}
