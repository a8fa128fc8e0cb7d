//! Presentation sinks: where readouts from the sampling loop end up.

use beam_core::crop::crop_resized;
use beam_core::{BoundingBox, Hsl, Readout};
use beam_hw::Frame;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Receives the visual output of each processed tick.
///
/// Implementations must not fail in a way the loop has to handle; errors
/// are logged and swallowed.
pub trait PresentationSink: Send + Sync {
    fn set_background(&self, color: Hsl);
    fn set_score_text(&self, text: &str);
    fn render_face_crop(&self, frame: &Frame, face: &BoundingBox);
}

/// Push a readout to a sink. A missing face only updates the label.
pub fn present(sink: &dyn PresentationSink, readout: &Readout, frame: &Frame) {
    match readout {
        Readout::Face {
            background,
            label,
            face,
            ..
        } => {
            sink.set_background(*background);
            sink.set_score_text(label);
            sink.render_face_crop(frame, face);
        }
        Readout::NoSignal { label } => sink.set_score_text(label),
    }
}

/// Latest visual state, as reported over D-Bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub background: Option<Hsl>,
    pub label: Option<String>,
    pub face: Option<BoundingBox>,
    /// Number of face crops rendered so far.
    pub frames_rendered: u64,
}

/// In-memory sink backing the `Status` call.
#[derive(Default)]
pub struct ReadoutBoard {
    state: Mutex<Snapshot>,
}

impl ReadoutBoard {
    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn update(&self, f: impl FnOnce(&mut Snapshot)) {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }
}

impl PresentationSink for ReadoutBoard {
    fn set_background(&self, color: Hsl) {
        self.update(|s| s.background = Some(color));
    }

    fn set_score_text(&self, text: &str) {
        self.update(|s| s.label = Some(text.to_string()));
    }

    fn render_face_crop(&self, _frame: &Frame, face: &BoundingBox) {
        self.update(|s| {
            s.face = Some(*face);
            s.frames_rendered += 1;
        });
    }
}

/// Writes the face crop to a PNG file, replacing it atomically.
pub struct ThumbnailWriter {
    path: PathBuf,
    size: u32,
}

impl ThumbnailWriter {
    pub fn new(path: PathBuf, size: u32) -> Self {
        Self {
            path,
            size: size.max(1),
        }
    }

    fn write(&self, frame: &Frame, face: &BoundingBox) -> Result<(), image::ImageError> {
        let edge = self.size as usize;
        let pixels = crop_resized(&frame.data, frame.width, frame.height, face, edge, edge);
        let img = image::GrayImage::from_raw(self.size, self.size, pixels).ok_or_else(|| {
            image::ImageError::Parameter(image::error::ParameterError::from_kind(
                image::error::ParameterErrorKind::DimensionMismatch,
            ))
        })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        img.save_with_format(&tmp, image::ImageFormat::Png)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PresentationSink for ThumbnailWriter {
    fn set_background(&self, _color: Hsl) {}

    fn set_score_text(&self, _text: &str) {}

    fn render_face_crop(&self, frame: &Frame, face: &BoundingBox) {
        if let Err(e) = self.write(frame, face) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write face thumbnail");
        }
    }
}

/// Forwards every call to each inner sink in order.
pub struct Fanout {
    sinks: Vec<Arc<dyn PresentationSink>>,
}

impl Fanout {
    pub fn new(sinks: Vec<Arc<dyn PresentationSink>>) -> Self {
        Self { sinks }
    }
}

impl PresentationSink for Fanout {
    fn set_background(&self, color: Hsl) {
        for sink in &self.sinks {
            sink.set_background(color);
        }
    }

    fn set_score_text(&self, text: &str) {
        for sink in &self.sinks {
            sink.set_score_text(text);
        }
    }

    fn render_face_crop(&self, frame: &Frame, face: &BoundingBox) {
        for sink in &self.sinks {
            sink.render_face_crop(frame, face);
        }
    }
}
