pub mod analysis;
pub mod annotate;
pub mod camera;
pub mod config;
pub mod display;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod pose;
pub mod pump;
pub mod server;
pub mod tone;
