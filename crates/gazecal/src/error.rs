//! Error taxonomy shared by the pipeline stages.
//!
//! Per-frame problems are [`FrameWarning`]s: they are recorded as NaN rows and
//! never abort a recording. Structural problems surface as [`PipelineError`]
//! and terminate only the stage that raised them.

use std::path::PathBuf;

use thiserror::Error;

use crate::calibration::CalibrationError;

/// Trigger edges could not be paired into consistent epochs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentationError {
    #[error("unpaired trigger edges: {rising} rising vs {falling} falling after trimming")]
    UnpairedEdges { rising: usize, falling: usize },
    #[error("falling edge at frame {falling} does not follow rising edge at frame {rising}")]
    NonPositiveDuration { rising: usize, falling: usize },
    #[error("rising edge at frame {next_rising} starts before the epoch ending at frame {falling}")]
    OverlappingEpochs { falling: usize, next_rising: usize },
    #[error("epoch {requested} requested but only {available} epoch(s) found")]
    MissingEpoch { requested: usize, available: usize },
}

/// Too few valid samples to fit a robust model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("insufficient data: need at least {needed} valid samples, found {found}")]
pub struct InsufficientDataError {
    pub needed: usize,
    pub found: usize,
}

/// A configuration option is absent or malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration `{field}`: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub(crate) fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Non-fatal failure of a single frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameWarning {
    #[error("frame {index}: read failed: {reason}")]
    Read { index: usize, reason: String },
    #[error("frame {index}: stream ended early")]
    EndOfStream { index: usize },
    #[error("frame {index}: size {got:?} does not match expected {expected:?}")]
    DimensionMismatch {
        index: usize,
        expected: (u32, u32),
        got: (u32, u32),
    },
    #[error("frame {index}: {reason}")]
    Processing { index: usize, reason: String },
}

impl FrameWarning {
    pub fn frame_index(&self) -> usize {
        match self {
            Self::Read { index, .. }
            | Self::EndOfStream { index }
            | Self::DimensionMismatch { index, .. }
            | Self::Processing { index, .. } => *index,
        }
    }
}

/// Per-row result of a frame measurement.
pub type FrameOutcome<T> = Result<T, FrameWarning>;

/// Stage-level error.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("input not found: {}", path.display())]
    InputNotFound { path: PathBuf },
    #[error("malformed table {}: {reason}", path.display())]
    MalformedTable { path: PathBuf, reason: String },
    #[error(transparent)]
    Segmentation(#[from] SegmentationError),
    #[error(transparent)]
    InsufficientData(#[from] InsufficientDataError),
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("table error: {0}")]
    Table(#[from] csv::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("artifact encoding error: {0}")]
    Artifact(#[from] bincode::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn input_not_found(path: impl Into<PathBuf>) -> Self {
        Self::InputNotFound { path: path.into() }
    }
}
