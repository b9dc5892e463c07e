//! Square fiducial markers: embedded dictionary and image detector.

pub mod dictionary;
mod detect;

pub use detect::{DetectedMarker, MarkerDetector, MarkerDetectorConfig};
pub use dictionary::DictionaryMatch;
