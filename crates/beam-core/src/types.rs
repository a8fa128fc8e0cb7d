use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box for a detected face, in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence for this face [0, 1].
    pub confidence: f32,
}

impl BoundingBox {
    /// Finite coordinates with a positive extent.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height, self.confidence]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Facial expression categories reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Expression {
    pub const ALL: [Expression; 7] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Sad,
        Expression::Angry,
        Expression::Fearful,
        Expression::Disgusted,
        Expression::Surprised,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Fearful => "fearful",
            Expression::Disgusted => "disgusted",
            Expression::Surprised => "surprised",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-expression confidence mapping, values in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Expressions {
    scores: [f32; 7],
}

impl Expressions {
    /// Build from `(expression, confidence)` pairs; unlisted expressions are 0.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Expression, f32)>,
    {
        let mut scores = [0.0f32; 7];
        for (expression, confidence) in pairs {
            scores[expression.index()] = confidence;
        }
        Self { scores }
    }

    pub fn get(&self, expression: Expression) -> f32 {
        self.scores[expression.index()]
    }

    /// Confidence for [`Expression::Happy`].
    pub fn happy(&self) -> f32 {
        self.get(Expression::Happy)
    }

    /// The expression with the highest confidence.
    pub fn dominant(&self) -> (Expression, f32) {
        Expression::ALL
            .iter()
            .map(|&e| (e, self.get(e)))
            .fold((Expression::Neutral, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (Expression, f32)> + '_ {
        Expression::ALL.iter().map(move |&e| (e, self.get(e)))
    }
}

/// A single face detection with its expression confidences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub face: BoundingBox,
    pub expressions: Expressions,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 1.0 }
    }

    #[test]
    fn test_is_valid() {
        let b = BoundingBox { x: 1.0, y: 1.0, width: 4.0, height: 4.0, confidence: 0.7 };
        assert!(b.is_valid());
        assert!(!BoundingBox { width: 0.0, ..b }.is_valid());
        assert!(!BoundingBox { x: f32::NAN, ..b }.is_valid());
        assert!(!BoundingBox { height: f32::INFINITY, ..b }.is_valid());
        assert!(!BoundingBox { confidence: f32::NAN, ..b }.is_valid());
    }

    #[test]
    fn test_iou_identical() {
        let a = bbox(0.0, 0.0, 100.0, 100.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(20.0, 20.0, 10.0, 10.0);
        assert!(a.iou(&b).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_expressions_lookup() {
        let e = Expressions::from_pairs([(Expression::Happy, 0.8), (Expression::Sad, 0.1)]);
        assert_eq!(e.happy(), 0.8);
        assert_eq!(e.get(Expression::Sad), 0.1);
        assert_eq!(e.get(Expression::Angry), 0.0);
        assert_eq!(e.dominant(), (Expression::Happy, 0.8));
    }

    #[test]
    fn test_expression_serde_names() {
        let json = serde_json::to_string(&Expression::Disgusted).unwrap();
        assert_eq!(json, "\"disgusted\"");
        assert_eq!(Expression::Fearful.to_string(), "fearful");
    }
}
