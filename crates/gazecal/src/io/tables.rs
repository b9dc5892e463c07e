//! Delimited text tables.
//!
//! Readers locate columns by header name and treat empty or `nan` cells as NaN.
//! [`TableWriter`] streams into a `.partial` sibling and only renames it into
//! place on [`TableWriter::commit`]; an uncommitted writer removes its partial
//! file when dropped, so an interrupted stage never leaves a truncated table
//! under the final name.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::cluster::TargetMeasurement;
use crate::error::{FrameOutcome, PipelineError};
use crate::pupil::PupilMeasurement;
use crate::trigger::FrameTimestamp;

pub const PUPIL_COLUMNS: [&str; 6] = [
    "frameTime",
    "triggerLevel",
    "eyeX",
    "eyeY",
    "eyeDiameter",
    "eyeConfidence",
];

pub const TARGET_COLUMNS: [&str; 4] = ["frameTime", "triggerLevel", "targetX", "targetY"];

pub const GAZE_COLUMNS: [&str; 2] = ["gazeX", "gazeY"];

fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    cell.parse::<f64>().ok()
}

/// Read the named numeric columns of a table with a header row.
///
/// With `positional_fallback`, a column whose name is missing is taken from
/// the position it has in `names`.
pub fn read_columns<const N: usize>(
    path: &Path,
    names: [&str; N],
    positional_fallback: bool,
) -> Result<[Vec<f64>; N], PipelineError> {
    if !path.is_file() {
        return Err(PipelineError::input_not_found(path));
    }
    let malformed = |reason: String| PipelineError::MalformedTable {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut indices = [0usize; N];
    for (pos, (slot, name)) in indices.iter_mut().zip(names).enumerate() {
        *slot = match headers.iter().position(|h| h == name) {
            Some(i) => i,
            None if positional_fallback => pos,
            None => return Err(malformed(format!("missing column `{name}`"))),
        };
    }

    let mut columns: [Vec<f64>; N] = std::array::from_fn(|_| Vec::new());
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        for (col, &idx) in columns.iter_mut().zip(indices.iter()) {
            let cell = record
                .get(idx)
                .ok_or_else(|| malformed(format!("row {row}: missing column {idx}")))?;
            let value = parse_cell(cell)
                .ok_or_else(|| malformed(format!("row {row}: `{cell}` is not a number")))?;
            col.push(value);
        }
    }
    Ok(columns)
}

/// Streaming table writer with commit-or-discard semantics.
pub struct TableWriter {
    path: PathBuf,
    partial: PathBuf,
    writer: Option<csv::Writer<File>>,
    rows: usize,
}

impl TableWriter {
    pub fn create(path: &Path, headers: &[&str]) -> Result<Self, PipelineError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "table".to_string());
        let partial = path.with_file_name(format!("{file_name}.partial"));
        let mut writer = csv::Writer::from_path(&partial)?;
        writer.write_record(headers)?;
        Ok(Self {
            path: path.to_path_buf(),
            partial,
            writer: Some(writer),
            rows: 0,
        })
    }

    pub fn write_row(&mut self, values: &[f64]) -> Result<(), PipelineError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        writer.write_record(values.iter().map(|v| v.to_string()))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush, sync and move the table to its final name.
    pub fn commit(mut self) -> Result<usize, PipelineError> {
        if let Some(writer) = self.writer.take() {
            let file = writer
                .into_inner()
                .map_err(|e| PipelineError::Io(e.into_error()))?;
            file.sync_all()?;
            drop(file);
            fs::rename(&self.partial, &self.path)?;
        }
        Ok(self.rows)
    }
}

impl Drop for TableWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            drop(writer);
            if let Err(err) = fs::remove_file(&self.partial) {
                tracing::warn!(path = %self.partial.display(), %err, "could not remove partial table");
            }
        }
    }
}

/// One row of the pupil position table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PupilRow {
    pub time_ms: f64,
    pub trigger_level: f64,
    pub x: f64,
    pub y: f64,
    pub diameter: f64,
    pub confidence: f64,
}

impl PupilRow {
    pub fn from_outcome(stamp: &FrameTimestamp, outcome: &FrameOutcome<PupilMeasurement>) -> Self {
        let (x, y, diameter, confidence) = match outcome {
            Ok(m) => (m.center_x, m.center_y, m.diameter, m.confidence),
            Err(_) => (f64::NAN, f64::NAN, f64::NAN, f64::NAN),
        };
        Self {
            time_ms: stamp.time_ms,
            trigger_level: stamp.trigger_level,
            x,
            y,
            diameter,
            confidence,
        }
    }

    fn values(&self) -> [f64; 6] {
        [
            self.time_ms,
            self.trigger_level,
            self.x,
            self.y,
            self.diameter,
            self.confidence,
        ]
    }
}

/// One row of the target position table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetRow {
    pub time_ms: f64,
    pub trigger_level: f64,
    pub x: f64,
    pub y: f64,
}

impl TargetRow {
    pub fn from_outcome(stamp: &FrameTimestamp, outcome: &FrameOutcome<TargetMeasurement>) -> Self {
        let (x, y) = match outcome {
            Ok(m) if m.found => (m.centroid_x, m.centroid_y),
            _ => (f64::NAN, f64::NAN),
        };
        Self {
            time_ms: stamp.time_ms,
            trigger_level: stamp.trigger_level,
            x,
            y,
        }
    }

    pub fn is_found(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

pub fn write_pupil_row(writer: &mut TableWriter, row: &PupilRow) -> Result<(), PipelineError> {
    writer.write_row(&row.values())
}

pub fn write_target_row(writer: &mut TableWriter, row: &TargetRow) -> Result<(), PipelineError> {
    writer.write_row(&[row.time_ms, row.trigger_level, row.x, row.y])
}

pub fn read_pupil_table(path: &Path) -> Result<Vec<PupilRow>, PipelineError> {
    let [t, trig, x, y, d, c] = read_columns(path, PUPIL_COLUMNS, false)?;
    Ok((0..t.len())
        .map(|i| PupilRow {
            time_ms: t[i],
            trigger_level: trig[i],
            x: x[i],
            y: y[i],
            diameter: d[i],
            confidence: c[i],
        })
        .collect())
}

pub fn read_target_table(path: &Path) -> Result<Vec<TargetRow>, PipelineError> {
    let [t, trig, x, y] = read_columns(path, TARGET_COLUMNS, false)?;
    Ok((0..t.len())
        .map(|i| TargetRow {
            time_ms: t[i],
            trigger_level: trig[i],
            x: x[i],
            y: y[i],
        })
        .collect())
}

/// Write `(gazeX, gazeY)` rows.
pub fn write_gaze_table(path: &Path, gaze: &[(f64, f64)]) -> Result<usize, PipelineError> {
    let mut writer = TableWriter::create(path, &GAZE_COLUMNS)?;
    for &(gx, gy) in gaze {
        writer.write_row(&[gx, gy])?;
    }
    writer.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_table_reads_back_with_nan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pupil.csv");
        let mut w = TableWriter::create(&path, &PUPIL_COLUMNS).unwrap();
        let stamp = FrameTimestamp {
            frame_index: 0,
            time_ms: 11.1,
            trigger_level: 1.0,
        };
        let ok = PupilRow {
            time_ms: 0.0,
            trigger_level: 0.0,
            x: 10.5,
            y: 20.25,
            diameter: 30.0,
            confidence: 0.99,
        };
        write_pupil_row(&mut w, &ok).unwrap();
        let failed = PupilRow::from_outcome(
            &stamp,
            &Err(crate::error::FrameWarning::EndOfStream { index: 0 }),
        );
        write_pupil_row(&mut w, &failed).unwrap();
        assert_eq!(w.commit().unwrap(), 2);

        let rows = read_pupil_table(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], ok);
        assert_eq!(rows[1].time_ms, 11.1);
        assert!(rows[1].x.is_nan() && rows[1].confidence.is_nan());
        assert!(!dir.path().join("pupil.csv.partial").exists());
    }

    #[test]
    fn dropped_writer_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target.csv");
        {
            let mut w = TableWriter::create(&path, &TARGET_COLUMNS).unwrap();
            w.write_row(&[0.0, 0.0, 1.0, 2.0]).unwrap();
        }
        assert!(!path.exists());
        assert!(!dir.path().join("target.csv.partial").exists());
    }

    #[test]
    fn columns_are_found_by_name_and_blank_is_nan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(&path, ",targetY,frameTime,targetX,triggerLevel\n0,5,0.0,,1\n1,6,33.3,7,1\n")
            .unwrap();
        let rows = read_target_table(&path).unwrap();
        assert!(rows[0].x.is_nan());
        assert!(!rows[0].is_found());
        assert_eq!(rows[1].x, 7.0);
        assert_eq!(rows[1].y, 6.0);
        assert_eq!(rows[1].time_ms, 33.3);
    }

    #[test]
    fn missing_file_is_input_not_found() {
        let err = read_columns(Path::new("/nonexistent/x.csv"), ["a"], false).unwrap_err();
        assert!(matches!(err, PipelineError::InputNotFound { .. }));
    }

    #[test]
    fn missing_column_without_fallback_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(&path, "a,b\n1,2\n").unwrap();
        let err = read_columns(&path, ["a", "c"], false).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedTable { .. }));
        let [a, c] = read_columns(&path, ["a", "c"], true).unwrap();
        assert_eq!(a, vec![1.0]);
        assert_eq!(c, vec![2.0]);
    }
}
