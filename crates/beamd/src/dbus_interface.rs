use crate::engine::{SessionController, SessionState, StartOutcome};
use crate::sink::{ReadoutBoard, Snapshot};
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.beam.Beam1";
pub const OBJECT_PATH: &str = "/org/beam/Beam1";

/// D-Bus interface for the Beam daemon.
///
/// Bus name: org.beam.Beam1
/// Object path: /org/beam/Beam1
pub struct BeamService {
    controller: Arc<SessionController>,
    board: Arc<ReadoutBoard>,
}

impl BeamService {
    pub fn new(controller: Arc<SessionController>, board: Arc<ReadoutBoard>) -> Self {
        Self { controller, board }
    }
}

#[interface(name = "org.beam.Beam1")]
impl BeamService {
    /// Start a sampling session. Returns false if one was already active
    /// or it was stopped before it came up.
    async fn start(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("start requested");
        match self.controller.start().await {
            Ok(StartOutcome::Started) => Ok(true),
            Ok(outcome) => {
                tracing::info!(?outcome, "start had no effect");
                Ok(false)
            }
            Err(e) => Err(zbus::fdo::Error::Failed(e.to_string())),
        }
    }

    /// Stop the current session. Returns false if none was active.
    async fn stop(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("stop requested");
        Ok(self.controller.stop().await)
    }

    /// Return session state and the latest readout as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let state = self.controller.state().await;
        Ok(status_json(state, &self.board.snapshot()).to_string())
    }
}

fn status_json(state: SessionState, snapshot: &Snapshot) -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "state": state,
        "can_start": state == SessionState::Idle,
        "can_stop": matches!(state, SessionState::Starting | SessionState::Running),
        "label": snapshot.label,
        "background": snapshot.background.map(|c| c.to_string()),
        "background_rgb": snapshot.background.map(|c| c.to_rgb()),
        "background_hex": snapshot.background.map(|c| c.hex()),
        "face": snapshot.face,
        "frames_rendered": snapshot.frames_rendered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beam_core::{BoundingBox, Hsl};

    #[test]
    fn test_status_idle_before_any_readout() {
        let v = status_json(SessionState::Idle, &Snapshot::default());
        assert_eq!(v["state"], "idle");
        assert_eq!(v["can_start"], true);
        assert_eq!(v["can_stop"], false);
        assert!(v["label"].is_null());
        assert!(v["background"].is_null());
        assert_eq!(v["frames_rendered"], 0);
    }

    #[test]
    fn test_status_running_with_face() {
        let snapshot = Snapshot {
            background: Some(Hsl { hue: 330.0, saturation: 100.0, lightness: 55.0 }),
            label: Some("Score: 50.00%".into()),
            face: Some(BoundingBox { x: 1.0, y: 2.0, width: 30.0, height: 40.0, confidence: 0.8 }),
            frames_rendered: 12,
        };
        let v = status_json(SessionState::Running, &snapshot);
        assert_eq!(v["state"], "running");
        assert_eq!(v["can_start"], false);
        assert_eq!(v["can_stop"], true);
        assert_eq!(v["label"], "Score: 50.00%");
        assert_eq!(v["background"], "hsl(330, 100%, 55%)");
        assert_eq!(v["background_rgb"].as_array().map(|a| a.len()), Some(3));
        assert!(v["background_hex"].as_str().is_some_and(|h| h.starts_with('#')));
        assert_eq!(v["face"]["width"], 30.0);
    }

    #[test]
    fn test_status_starting_can_stop() {
        let v = status_json(SessionState::Starting, &Snapshot::default());
        assert_eq!(v["state"], "starting");
        assert_eq!(v["can_start"], false);
        assert_eq!(v["can_stop"], true);
    }

    #[test]
    fn test_status_stopping_disables_both_controls() {
        let v = status_json(SessionState::Stopping, &Snapshot::default());
        assert_eq!(v["state"], "stopping");
        assert_eq!(v["can_start"], false);
        assert_eq!(v["can_stop"], false);
    }
}
