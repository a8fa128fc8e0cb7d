//! Face + expression detection via ONNX Runtime.
//!
//! [`FaceDetector`] runs SCRFD (anchor-free, three strides, NMS) and keeps the
//! most confident face. [`OnnxExpressionDetector`] pairs it with the FER+
//! [`ExpressionClassifier`](crate::expression::ExpressionClassifier) to
//! implement [`ExpressionDetector`].

use crate::expression::ExpressionClassifier;
use crate::types::{BoundingBox, Detection};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// The detection capability the sampling loop depends on.
///
/// Returns at most one face per frame. `Ok(None)` means no face was found,
/// which is a normal outcome rather than an error.
pub trait ExpressionDetector: Send {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, DetectorError>;
}

impl<D: ExpressionDetector + ?Sized> ExpressionDetector for Box<D> {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, DetectorError> {
        (**self).detect(frame, width, height)
    }
}

/// SCRFD face detector feeding the FER+ expression classifier.
pub struct OnnxExpressionDetector {
    faces: FaceDetector,
    expressions: ExpressionClassifier,
}

impl OnnxExpressionDetector {
    /// Load both models. Fails if either file is missing or malformed.
    pub fn load(face_model: &str, expression_model: &str) -> Result<Self, DetectorError> {
        Ok(Self {
            faces: FaceDetector::load(face_model)?,
            expressions: ExpressionClassifier::load(expression_model)?,
        })
    }
}

impl ExpressionDetector for OnnxExpressionDetector {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, DetectorError> {
        let Some(face) = self.faces.detect_best(frame, width, height)? else {
            return Ok(None);
        };
        let expressions = self.expressions.classify(frame, width, height, &face)?;
        tracing::trace!(
            confidence = face.confidence,
            happy = expressions.happy(),
            "face classified"
        );
        Ok(Some(Detection { face, expressions }))
    }
}

/// Letterbox resize parameters, for mapping detections back to the frame.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize, target: usize) -> Self {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (target as f32 - new_w) / 2.0,
            pad_y: (target as f32 - new_h) / 2.0,
        }
    }

    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Output index pairs `(score, bbox)` per stride.
    outputs: [(usize, usize); 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        if names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }

        let outputs = output_layout(&names);
        tracing::info!(path = model_path, outputs = ?names, layout = ?outputs, "loaded SCRFD model");

        Ok(Self { session, outputs })
    }

    /// Detect the single most confident face in a grayscale frame.
    pub fn detect_best(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<BoundingBox>, DetectorError> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 || frame.len() < w * h {
            return Err(DetectorError::InvalidFrame(format!(
                "{width}x{height} frame with {} bytes",
                frame.len()
            )));
        }

        let letterbox = Letterbox::fit(w, h, SCRFD_INPUT_SIZE);
        let input = letterbox_tensor(frame, w, h, &letterbox);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in SCRFD_STRIDES.iter().zip(self.outputs.iter()) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            decode_stride(scores, boxes, stride, &letterbox, &mut candidates);
        }

        Ok(nms(candidates, SCRFD_NMS_THRESHOLD).into_iter().next())
    }
}

/// Locate `score_<stride>` / `bbox_<stride>` outputs by name, falling back to
/// the standard positional export order `[scores 8/16/32, bboxes 8/16/32, ...]`.
fn output_layout(names: &[String]) -> [(usize, usize); 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let mut layout = [(0, 3), (1, 4), (2, 5)];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride)) {
            (Some(s), Some(b)) => layout[slot] = (s, b),
            _ => return [(0, 3), (1, 4), (2, 5)],
        }
    }
    layout
}

/// Letterbox a grayscale frame into a normalized 1×3×640×640 tensor
/// (nearest-neighbour; the channel is replicated).
fn letterbox_tensor(frame: &[u8], width: usize, height: usize, lb: &Letterbox) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    let inv = 1.0 / lb.scale;

    for y in 0..SCRFD_INPUT_SIZE {
        let src_y = (y as f32 - lb.pad_y + 0.5) * inv;
        for x in 0..SCRFD_INPUT_SIZE {
            let src_x = (x as f32 - lb.pad_x + 0.5) * inv;
            let pixel = if src_x >= 0.0
                && src_y >= 0.0
                && (src_x as usize) < width
                && (src_y as usize) < height
            {
                frame[src_y as usize * width + src_x as usize] as f32
            } else {
                SCRFD_MEAN
            };
            let v = (pixel - SCRFD_MEAN) / SCRFD_STD;
            for c in 0..3 {
                tensor[[0, c, y, x]] = v;
            }
        }
    }

    tensor
}

/// Decode anchor-free box offsets for one stride into frame coordinates.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    stride: usize,
    lb: &Letterbox,
    out: &mut Vec<BoundingBox>,
) {
    let grid = SCRFD_INPUT_SIZE / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score.is_nan() || score <= SCRFD_CONFIDENCE_THRESHOLD {
            continue;
        }
        let Some(off) = boxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid) as f32 * s;
        let cy = (cell / grid) as f32 * s;

        let (x1, y1) = lb.to_frame(cx - off[0] * s, cy - off[1] * s);
        let (x2, y2) = lb.to_frame(cx + off[2] * s, cy + off[3] * s);

        let candidate = BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        };
        if candidate.is_valid() {
            out.push(candidate);
        }
    }
}

/// Non-maximum suppression; the result is sorted by descending confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Expression, Expressions};

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf }
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_round_trip() {
        let lb = Letterbox::fit(320, 240, SCRFD_INPUT_SIZE);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert!(lb.pad_x.abs() < 1e-6);
        assert!((lb.pad_y - 80.0).abs() < 1e-6);

        let (x, y) = lb.to_frame(100.0 * lb.scale + lb.pad_x, 50.0 * lb.scale + lb.pad_y);
        assert!((x - 100.0).abs() < 0.1);
        assert!((y - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_decode_stride_maps_to_frame() {
        // One anchor above threshold at cell (1, 0) of stride 32.
        let stride = 32;
        let grid = SCRFD_INPUT_SIZE / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut boxes = vec![0.0f32; anchors * 4];
        let idx = 2; // cell 1, first anchor
        scores[idx] = 0.9;
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[0.5, 0.0, 0.5, 1.0]);

        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let mut out = Vec::new();
        decode_stride(&scores, &boxes, stride, &lb, &mut out);

        assert_eq!(out.len(), 1);
        let b = out[0];
        assert!((b.x - 16.0).abs() < 1e-4);
        assert!((b.y - 0.0).abs() < 1e-4);
        assert!((b.width - 32.0).abs() < 1e-4);
        assert!((b.height - 32.0).abs() < 1e-4);
        assert!((b.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_drops_non_finite() {
        let stride = 32;
        let grid = SCRFD_INPUT_SIZE / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut boxes = vec![0.0f32; anchors * 4];
        scores[0] = f32::NAN;
        boxes[..4].copy_from_slice(&[0.5, 0.5, 0.5, 0.5]);
        scores[2] = 0.9;
        boxes[8..12].copy_from_slice(&[f32::NAN, 0.0, 0.5, 1.0]);
        scores[4] = 0.8;
        boxes[16..20].copy_from_slice(&[0.5, 0.0, f32::INFINITY, 1.0]);

        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let mut out = Vec::new();
        decode_stride(&scores, &boxes, stride, &lb, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_output_layout_named() {
        let names: Vec<String> = [
            "bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(output_layout(&names), [(1, 0), (3, 2), (5, 4)]);
    }

    #[test]
    fn test_output_layout_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(output_layout(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_letterbox_tensor_padding_normalizes_to_zero() {
        let frame = vec![200u8; 64 * 32];
        let lb = Letterbox::fit(64, 32, SCRFD_INPUT_SIZE);
        let t = letterbox_tensor(&frame, 64, 32, &lb);
        assert_eq!(t.shape(), &[1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE]);
        // top rows are padding
        assert_eq!(t[[0, 0, 0, 0]], 0.0);
        // centre is image content
        let centre = t[[0, 1, SCRFD_INPUT_SIZE / 2, SCRFD_INPUT_SIZE / 2]];
        assert!((centre - (200.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-6);
    }

    struct Scripted(Vec<Option<Detection>>);

    impl ExpressionDetector for Scripted {
        fn detect(&mut self, _: &[u8], _: u32, _: u32) -> Result<Option<Detection>, DetectorError> {
            Ok(self.0.pop().flatten())
        }
    }

    #[test]
    fn test_boxed_detector_delegates() {
        let det = Detection {
            face: make_bbox(1.0, 2.0, 3.0, 4.0, 0.9),
            expressions: Expressions::from_pairs([(Expression::Happy, 0.7)]),
        };
        let mut boxed: Box<dyn ExpressionDetector> = Box::new(Scripted(vec![Some(det.clone())]));
        assert_eq!(boxed.detect(&[], 0, 0).unwrap(), Some(det));
        assert_eq!(boxed.detect(&[], 0, 0).unwrap(), None);
    }
}
