//! Persistence: trigger and measurement tables, frame sources, QA dumps.

pub mod frames;
pub mod tables;

pub use frames::{FrameDump, FrameSource, ImageSequence};
pub use tables::{
    read_columns, read_pupil_table, read_target_table, write_gaze_table, PupilRow, TableWriter,
    TargetRow, GAZE_COLUMNS, PUPIL_COLUMNS, TARGET_COLUMNS,
};
