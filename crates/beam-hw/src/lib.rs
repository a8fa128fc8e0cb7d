//! beam-hw: Camera capture for Beam.
//!
//! Provides V4L2-based streaming capture that yields grayscale frames,
//! behind the [`FrameSource`] trait so the sampling loop can be driven by
//! other sources in tests.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
