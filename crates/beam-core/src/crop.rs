//! Face crop extraction from grayscale frames.

use crate::types::BoundingBox;

/// Crop `face` out of a grayscale frame and resample it to `out_w × out_h`
/// with bilinear interpolation.
///
/// The box is clamped to the frame; sampling positions outside the frame
/// repeat the edge pixels. Returns an all-zero buffer for an empty frame or
/// a box that is empty or not finite.
pub fn crop_resized(
    frame: &[u8],
    width: u32,
    height: u32,
    face: &BoundingBox,
    out_w: usize,
    out_h: usize,
) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let mut out = vec![0u8; out_w * out_h];
    if w == 0 || h == 0 || frame.len() < w * h || !face.is_valid() {
        return out;
    }

    let x0 = face.x.clamp(0.0, (w - 1) as f32);
    let y0 = face.y.clamp(0.0, (h - 1) as f32);
    let x1 = (face.x + face.width).clamp(x0 + 1.0, w as f32);
    let y1 = (face.y + face.height).clamp(y0 + 1.0, h as f32);

    let step_x = (x1 - x0) / out_w as f32;
    let step_y = (y1 - y0) / out_h as f32;

    for oy in 0..out_h {
        let src_y = y0 + (oy as f32 + 0.5) * step_y - 0.5;
        let sy0 = (src_y.floor() as i64).clamp(0, h as i64 - 1) as usize;
        let sy1 = (sy0 + 1).min(h - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for ox in 0..out_w {
            let src_x = x0 + (ox as f32 + 0.5) * step_x - 0.5;
            let sx0 = (src_x.floor() as i64).clamp(0, w as i64 - 1) as usize;
            let sx1 = (sx0 + 1).min(w - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = frame[sy0 * w + sx0] as f32;
            let tr = frame[sy0 * w + sx1] as f32;
            let bl = frame[sy1 * w + sx0] as f32;
            let br = frame[sy1 * w + sx1] as f32;

            let top = tl * (1.0 - fx) + tr * fx;
            let bottom = bl * (1.0 - fx) + br * fx;
            let val = top * (1.0 - fy) + bottom * fy;

            out[oy * out_w + ox] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 1.0 }
    }

    #[test]
    fn test_uniform_frame_stays_uniform() {
        let frame = vec![128u8; 100 * 80];
        let out = crop_resized(&frame, 100, 80, &bbox(10.0, 10.0, 40.0, 40.0), 64, 64);
        assert_eq!(out.len(), 64 * 64);
        assert!(out.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_crop_selects_region() {
        // Left half dark, right half bright.
        let (w, h) = (40u32, 20u32);
        let frame: Vec<u8> = (0..(w * h) as usize)
            .map(|i| if (i % w as usize) < 20 { 10 } else { 240 })
            .collect();

        let right = crop_resized(&frame, w, h, &bbox(25.0, 2.0, 10.0, 10.0), 8, 8);
        assert!(right.iter().all(|&p| p == 240));

        let left = crop_resized(&frame, w, h, &bbox(2.0, 2.0, 10.0, 10.0), 8, 8);
        assert!(left.iter().all(|&p| p == 10));
    }

    #[test]
    fn test_box_outside_frame_is_clamped() {
        let frame = vec![50u8; 16 * 16];
        let out = crop_resized(&frame, 16, 16, &bbox(-30.0, -30.0, 100.0, 100.0), 4, 4);
        assert!(out.iter().all(|&p| p == 50));
    }

    #[test]
    fn test_degenerate_inputs() {
        let frame = vec![50u8; 16];
        assert!(crop_resized(&frame, 4, 4, &bbox(0.0, 0.0, 0.0, 2.0), 3, 3)
            .iter()
            .all(|&p| p == 0));
        assert!(crop_resized(&[], 4, 4, &bbox(0.0, 0.0, 2.0, 2.0), 3, 3)
            .iter()
            .all(|&p| p == 0));
    }

    #[test]
    fn test_non_finite_box_yields_blank_crop() {
        let frame = vec![50u8; 16 * 16];
        for face in [
            bbox(f32::NAN, 0.0, 4.0, 4.0),
            bbox(0.0, 0.0, f32::NAN, 4.0),
            bbox(0.0, f32::NEG_INFINITY, 4.0, 4.0),
            bbox(0.0, 0.0, 4.0, f32::INFINITY),
        ] {
            let out = crop_resized(&frame, 16, 16, &face, 3, 3);
            assert!(out.iter().all(|&p| p == 0), "{face:?}");
        }
    }
}
