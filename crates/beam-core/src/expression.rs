//! FER+ facial expression classifier via ONNX Runtime.
//!
//! Takes a 64×64 grayscale face crop (raw pixel values, no normalization)
//! and produces eight logits in the order below. `contempt` has no
//! counterpart in [`Expression`] and is left out of the softmax.

use crate::crop::crop_resized;
use crate::detector::DetectorError;
use crate::types::{BoundingBox, Expression, Expressions};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const FERPLUS_INPUT_SIZE: usize = 64;
const FERPLUS_CLASSES: usize = 8;

/// FER+ output order, `None` for classes Beam does not report.
const FERPLUS_LABELS: [Option<Expression>; FERPLUS_CLASSES] = [
    Some(Expression::Neutral),
    Some(Expression::Happy),
    Some(Expression::Surprised),
    Some(Expression::Sad),
    Some(Expression::Angry),
    Some(Expression::Disgusted),
    Some(Expression::Fearful),
    None, // contempt
];

/// FER+-based expression classifier.
pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    /// Load the FER+ ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded FER+ model"
        );

        Ok(Self { session })
    }

    /// Classify the expression of `face` within a grayscale frame.
    pub fn classify(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Expressions, DetectorError> {
        let crop = crop_resized(frame, width, height, face, FERPLUS_INPUT_SIZE, FERPLUS_INPUT_SIZE);
        let input = Self::preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("expression logits: {e}")))?;

        if logits.len() < FERPLUS_CLASSES {
            return Err(DetectorError::InferenceFailed(format!(
                "expected {FERPLUS_CLASSES} expression logits, got {}",
                logits.len()
            )));
        }

        Ok(expressions_from_logits(&logits[..FERPLUS_CLASSES]))
    }

    fn preprocess(crop: &[u8]) -> Array4<f32> {
        let size = FERPLUS_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
        for y in 0..size {
            for x in 0..size {
                tensor[[0, 0, y, x]] = crop.get(y * size + x).copied().unwrap_or(0) as f32;
            }
        }
        tensor
    }
}

/// Softmax over the reported classes of a FER+ logit vector.
fn expressions_from_logits(logits: &[f32]) -> Expressions {
    let kept: Vec<(Expression, f32)> = FERPLUS_LABELS
        .iter()
        .zip(logits.iter())
        .filter_map(|(label, &logit)| label.map(|e| (e, logit)))
        .collect();

    let max = kept
        .iter()
        .map(|&(_, l)| l)
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = kept.iter().map(|&(_, l)| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();

    if !sum.is_finite() || sum <= 0.0 {
        return Expressions::default();
    }

    Expressions::from_pairs(
        kept.iter()
            .zip(exps.iter())
            .map(|(&(e, _), &x)| (e, x / sum)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let e = expressions_from_logits(&[0.1, 2.0, -1.0, 0.3, 0.0, -2.0, 0.5, 9.0]);
        let total: f32 = e.iter().map(|(_, v)| v).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert_eq!(e.dominant().0, Expression::Happy);
    }

    #[test]
    fn test_contempt_ignored() {
        // Contempt dominates the raw logits but is not a reported class.
        let e = expressions_from_logits(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 50.0]);
        for (_, v) in e.iter() {
            assert!((v - 1.0 / 7.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_label_order() {
        let mut logits = [0.0f32; FERPLUS_CLASSES];
        logits[2] = 10.0; // surprise
        assert_eq!(expressions_from_logits(&logits).dominant().0, Expression::Surprised);
        logits[2] = 0.0;
        logits[6] = 10.0; // fear
        assert_eq!(expressions_from_logits(&logits).dominant().0, Expression::Fearful);
    }

    #[test]
    fn test_non_finite_logits_give_empty_mapping() {
        let e = expressions_from_logits(&[f32::NAN; FERPLUS_CLASSES]);
        assert_eq!(e, Expressions::default());
    }

    #[test]
    fn test_preprocess_keeps_raw_pixels() {
        let crop = vec![200u8; FERPLUS_INPUT_SIZE * FERPLUS_INPUT_SIZE];
        let t = ExpressionClassifier::preprocess(&crop);
        assert_eq!(t.shape(), &[1, 1, FERPLUS_INPUT_SIZE, FERPLUS_INPUT_SIZE]);
        assert_eq!(t[[0, 0, 5, 7]], 200.0);
    }

    #[test]
    fn test_load_missing_model() {
        match ExpressionClassifier::load("/nonexistent/emotion-ferplus-8.onnx") {
            Err(DetectorError::ModelNotFound(p)) => assert!(p.ends_with("emotion-ferplus-8.onnx")),
            other => panic!("expected ModelNotFound, got {:?}", other.err()),
        }
    }
}
