//! Per-session sampling state: pacing gate, smoothed score and readout mapping.

use crate::pacing::{period_for_rate, Pacer, DEFAULT_SAMPLE_RATE_HZ};
use crate::palette::{score_label, Hsl, Palette, DEFAULT_HUE, NO_SIGNAL_LABEL};
use crate::smoothing::{SmoothedScore, DEFAULT_ALPHA};
use crate::types::{BoundingBox, Detection};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Tunables for a sampling session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    /// Minimum time between processed ticks.
    pub interval: Duration,
    /// EMA weight for each new sample.
    pub alpha: f32,
    /// Background hue in degrees.
    pub hue: f32,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval: period_for_rate(DEFAULT_SAMPLE_RATE_HZ),
            alpha: DEFAULT_ALPHA,
            hue: DEFAULT_HUE,
        }
    }
}

/// What the presentation layer should show after a processed tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Readout {
    /// A face was found: new background, label and crop region.
    Face {
        score: f32,
        background: Hsl,
        label: String,
        face: BoundingBox,
    },
    /// No face this tick: only the label changes.
    NoSignal { label: String },
}

impl Readout {
    pub fn label(&self) -> &str {
        match self {
            Readout::Face { label, .. } | Readout::NoSignal { label } => label,
        }
    }
}

/// State owned by one sampling session.
#[derive(Debug, Clone)]
pub struct Sampler {
    pacer: Pacer,
    score: SmoothedScore,
    palette: Palette,
}

impl Sampler {
    pub fn new(settings: SamplerSettings) -> Self {
        Self {
            pacer: Pacer::new(settings.interval),
            score: SmoothedScore::new(settings.alpha),
            palette: Palette::new(settings.hue),
        }
    }

    /// Gate for one scheduling tick. True means "sample the detector now".
    pub fn poll(&mut self, now: Instant) -> bool {
        self.pacer.try_tick(now)
    }

    /// Fold a detector result into the score and produce the readout.
    ///
    /// `None` leaves the score unchanged.
    pub fn observe(&mut self, detection: Option<&Detection>) -> Readout {
        match detection {
            Some(detection) => {
                let score = self.score.update(detection.expressions.happy());
                Readout::Face {
                    score,
                    background: self.palette.background(score),
                    label: score_label(score),
                    face: detection.face,
                }
            }
            None => Readout::NoSignal {
                label: NO_SIGNAL_LABEL.to_string(),
            },
        }
    }

    pub fn score(&self) -> f32 {
        self.score.value()
    }

    pub fn last_tick(&self) -> Option<Instant> {
        self.pacer.last_tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Expression, Expressions};

    fn detection(happy: f32) -> Detection {
        Detection {
            face: BoundingBox { x: 10.0, y: 20.0, width: 50.0, height: 60.0, confidence: 0.9 },
            expressions: Expressions::from_pairs([
                (Expression::Happy, happy),
                (Expression::Neutral, 1.0 - happy),
            ]),
        }
    }

    #[test]
    fn test_face_readout() {
        let mut sampler = Sampler::new(SamplerSettings::default());
        let readout = sampler.observe(Some(&detection(1.0)));
        match readout {
            Readout::Face { score, background, label, face } => {
                assert!((score - 0.1).abs() < 1e-6);
                assert!((background.lightness - 27.0).abs() < 1e-4);
                assert_eq!(background.hue, 330.0);
                assert_eq!(label, "Score: 10.00%");
                assert_eq!(face.width, 50.0);
            }
            other => panic!("expected face readout, got {other:?}"),
        }
    }

    #[test]
    fn test_sequence_matches_ema() {
        let mut sampler = Sampler::new(SamplerSettings::default());
        let mut scores = Vec::new();
        for h in [1.0, 0.0, 1.0] {
            sampler.observe(Some(&detection(h)));
            scores.push(sampler.score());
        }
        for (got, want) in scores.iter().zip([0.1, 0.09, 0.181]) {
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_no_detection_keeps_score() {
        let mut sampler = Sampler::new(SamplerSettings::default());
        sampler.observe(Some(&detection(0.8)));
        sampler.observe(Some(&detection(0.6)));
        let before = sampler.score();
        assert!(before > 0.0);

        let readout = sampler.observe(None);
        assert_eq!(readout, Readout::NoSignal { label: "Score: --".into() });
        assert_eq!(sampler.score(), before);
    }

    #[test]
    fn test_poll_gates_at_interval() {
        let mut sampler = Sampler::new(SamplerSettings::default());
        let t0 = Instant::now();
        assert!(sampler.poll(t0));
        assert!(!sampler.poll(t0 + Duration::from_millis(10)));
        assert!(sampler.poll(t0 + Duration::from_millis(40)));
        assert_eq!(sampler.last_tick(), Some(t0 + Duration::from_millis(40)));
    }

    #[test]
    fn test_custom_hue_and_alpha() {
        let mut sampler = Sampler::new(SamplerSettings {
            interval: Duration::from_millis(10),
            alpha: 0.5,
            hue: 120.0,
        });
        match sampler.observe(Some(&detection(1.0))) {
            Readout::Face { score, background, .. } => {
                assert!((score - 0.5).abs() < 1e-6);
                assert_eq!(background.hue, 120.0);
                assert!((background.lightness - 55.0).abs() < 1e-4);
            }
            other => panic!("expected face readout, got {other:?}"),
        }
    }

    #[test]
    fn test_readout_label() {
        let r = Readout::NoSignal { label: NO_SIGNAL_LABEL.into() };
        assert_eq!(r.label(), "Score: --");
    }
}
