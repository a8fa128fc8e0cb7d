//! beam-core: Expression scoring engine.
//!
//! Face detection (SCRFD) and expression classification (FER+) via ONNX
//! Runtime, plus the signal path that turns a noisy per-frame "happy"
//! confidence into a smoothed score, a background colour and a label.

pub mod crop;
pub mod detector;
pub mod expression;
pub mod pacing;
pub mod palette;
pub mod sampler;
pub mod smoothing;
pub mod types;

use std::path::PathBuf;

pub use detector::{DetectorError, ExpressionDetector, OnnxExpressionDetector};
pub use palette::{Hsl, Palette};
pub use sampler::{Readout, Sampler, SamplerSettings};
pub use smoothing::SmoothedScore;
pub use types::{BoundingBox, Detection, Expression, Expressions};

/// SCRFD face detection model file name.
pub const FACE_MODEL_FILE: &str = "det_10g.onnx";
/// FER+ expression model file name.
pub const EXPRESSION_MODEL_FILE: &str = "emotion-ferplus-8.onnx";

/// System-wide model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/beam/models")
}
