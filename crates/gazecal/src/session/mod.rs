//! Offline session orchestrator.
//!
//! A session is one recording of an eye camera and a scene camera sharing a
//! trigger line, plus an optional board recording for the scene camera. The
//! orchestrator runs four stages in order, each persisting its output so a
//! rerun skips finished work:
//!
//! | stage              | output                          |
//! |--------------------|---------------------------------|
//! | eye extraction     | `eye_S_eyePosition.csv`         |
//! | target extraction  | `scene_S_targetPosition.csv`    |
//! | camera calibration | `calibration.bin`               |
//! | gaze mapping       | `eye_S_gaze.csv`, `eye_S_gazeModel.json` |

mod config;
mod files;
mod qa;
mod stages;

pub use config::{AlignmentConfig, OutputConfig, SessionConfig, StreamConfig};
pub use files::SessionFiles;
pub use qa::{gaze_overlay, marker_overlay, pupil_overlay};
pub use stages::{apply_gaze_model, Session, Stage, StageReport, StageStatus};
