//! Score → colour and label mapping.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Background hue (pink).
pub const DEFAULT_HUE: f32 = 330.0;
/// Lightness (percent) at score 0.
pub const LIGHTNESS_MIN: f32 = 20.0;
/// Lightness (percent) at score 1.
pub const LIGHTNESS_MAX: f32 = 90.0;
/// Label shown while no face is found.
pub const NO_SIGNAL_LABEL: &str = "Score: --";

/// HSL colour: hue in degrees, saturation and lightness in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsl {
    pub hue: f32,
    pub saturation: f32,
    pub lightness: f32,
}

impl Hsl {
    /// Convert to 8-bit sRGB.
    pub fn to_rgb(&self) -> [u8; 3] {
        let h = self.hue.rem_euclid(360.0) / 60.0;
        let s = (self.saturation / 100.0).clamp(0.0, 1.0);
        let l = (self.lightness / 100.0).clamp(0.0, 1.0);

        let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
        let x = c * (1.0 - (h % 2.0 - 1.0).abs());
        let m = l - c / 2.0;

        let (r, g, b) = match h as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };

        [r, g, b].map(|v| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8)
    }

    /// `#rrggbb` hex form.
    pub fn hex(&self) -> String {
        let [r, g, b] = self.to_rgb();
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}

impl fmt::Display for Hsl {
    /// CSS notation, e.g. `hsl(330, 100%, 27%)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hsl({}, {}%, {}%)",
            trim(self.hue),
            trim(self.saturation),
            trim(self.lightness)
        )
    }
}

fn trim(v: f32) -> String {
    let s = format!("{v:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Linear map from score [0, 1] to lightness [20, 90].
pub fn lightness_for(score: f32) -> f32 {
    let score = score.clamp(0.0, 1.0);
    LIGHTNESS_MIN + score * (LIGHTNESS_MAX - LIGHTNESS_MIN)
}

/// Text label for a smoothed score, e.g. `Score: 18.10%`.
pub fn score_label(score: f32) -> String {
    format!("Score: {:.2}%", score * 100.0)
}

/// Fixed-hue, full-saturation palette whose lightness tracks the score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub hue: f32,
}

impl Palette {
    pub fn new(hue: f32) -> Self {
        Self { hue }
    }

    pub fn background(&self, score: f32) -> Hsl {
        Hsl {
            hue: self.hue,
            saturation: 100.0,
            lightness: lightness_for(score),
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::new(DEFAULT_HUE)
    }
}
