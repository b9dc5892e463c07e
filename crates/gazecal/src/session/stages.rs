use std::fmt;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage};

use super::config::SessionConfig;
use super::files::SessionFiles;
use super::qa::{gaze_overlay, marker_overlay, pupil_overlay};
use crate::align::{align, following_samples, TimeSeries};
use crate::calibration::{
    undistort_image, BoardObservation, CalibrationArtifact, CalibrationError, CalibrationEstimator,
    CalibrationResult,
};
use crate::cluster::{measurement_from_markers, ClusterLocator, TargetMeasurement};
use crate::error::{ConfigError, FrameOutcome, FrameWarning, PipelineError};
use crate::io::frames::{FrameDump, FrameSource, ImageSequence};
use crate::io::tables::{
    read_pupil_table, read_target_table, write_gaze_table, write_pupil_row, write_target_row,
    PupilRow, TableWriter, TargetRow, PUPIL_COLUMNS, TARGET_COLUMNS,
};
use crate::marker::MarkerDetector;
use crate::pupil::{BlinkFilter, PupilExtractor, PupilMeasurement};
use crate::regression::GazeModel;
use crate::trigger::{read_trigger_table, retime, select_epoch, Epoch, FrameTimestamp, Segmenter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    EyeExtraction,
    TargetExtraction,
    CameraCalibration,
    GazeMapping,
}

impl Stage {
    /// Execution order.
    pub const ALL: [Stage; 4] = [
        Stage::EyeExtraction,
        Stage::TargetExtraction,
        Stage::CameraCalibration,
        Stage::GazeMapping,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::EyeExtraction => "eye extraction",
            Stage::TargetExtraction => "target extraction",
            Stage::CameraCalibration => "camera calibration",
            Stage::GazeMapping => "gaze mapping",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub enum StageStatus {
    Completed,
    /// Output already present and reprocessing not forced.
    Skipped,
    Failed(PipelineError),
}

impl StageStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, StageStatus::Failed(_))
    }
}

#[derive(Debug)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
}

/// One validated recording session.
#[derive(Debug, Clone)]
pub struct Session {
    config: SessionConfig,
    files: SessionFiles,
}

fn next_gray(frames: &mut impl FrameSource, index: usize) -> FrameOutcome<GrayImage> {
    match frames.next_frame() {
        None => Err(FrameWarning::EndOfStream { index }),
        Some(frame) => frame.map(|img| img.to_luma8()),
    }
}

fn optional_dump(enabled: bool, dir: PathBuf) -> Result<Option<FrameDump>, PipelineError> {
    if enabled {
        FrameDump::create(&dir).map(Some)
    } else {
        Ok(None)
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let files = SessionFiles::new(config.data_path()?, config.session()?);
        Ok(Self { config, files })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn files(&self) -> &SessionFiles {
        &self.files
    }

    /// Run every stage in order. A failed stage does not stop later ones;
    /// stages that depend on its output fail on the missing input.
    pub fn run(&self) -> Vec<StageReport> {
        Stage::ALL.iter().map(|&s| self.run_stage(s)).collect()
    }

    pub fn run_stage(&self, stage: Stage) -> StageReport {
        let output = self.stage_output(stage);
        if output.exists() && !self.config.force_reprocess {
            tracing::info!(%stage, path = %output.display(), "output exists, skipping");
            return StageReport {
                stage,
                status: StageStatus::Skipped,
            };
        }
        tracing::info!(%stage, "starting");
        let result = match stage {
            Stage::EyeExtraction => self.extract_eye().map(drop),
            Stage::TargetExtraction => self.extract_targets().map(drop),
            Stage::CameraCalibration => self.calibrate_camera().map(drop),
            Stage::GazeMapping => self.map_gaze().map(drop),
        };
        let status = match result {
            Ok(()) => StageStatus::Completed,
            Err(err) => {
                tracing::warn!(%stage, error = %err, "stage failed");
                StageStatus::Failed(err)
            }
        };
        StageReport { stage, status }
    }

    /// File whose presence marks the stage as done.
    pub fn stage_output(&self, stage: Stage) -> PathBuf {
        match stage {
            Stage::EyeExtraction => self.files.eye_positions(),
            Stage::TargetExtraction => self.files.target_positions(),
            Stage::CameraCalibration => self.files.calibration_artifact(),
            Stage::GazeMapping => self.files.gaze_table(),
        }
    }

    fn segmenter(&self) -> Segmenter {
        Segmenter::new(self.config.segmentation.clone())
    }

    fn read_stamps(
        &self,
        path: &Path,
        frame_rate: Option<f64>,
    ) -> Result<Vec<FrameTimestamp>, PipelineError> {
        let mut stamps = read_trigger_table(path)?;
        if let Some(fps) = frame_rate {
            retime(&mut stamps, fps);
        }
        Ok(stamps)
    }

    /// Pupil table for every eye frame. Returns the number of rows.
    pub fn extract_eye(&self) -> Result<usize, PipelineError> {
        let stamps = self.read_stamps(&self.files.eye_triggers(), self.config.eye.frame_rate)?;
        let mut frames = ImageSequence::open(&self.files.eye_frames())?;
        if frames.frame_count() != stamps.len() {
            tracing::warn!(
                frames = frames.frame_count(),
                rows = stamps.len(),
                "eye frame count differs from trigger table"
            );
        }
        let out = &self.config.output;
        let mut processed = optional_dump(out.make_processed_video, self.files.eye_processed_dir())?;
        let mut overlays = optional_dump(out.make_pupil_video, self.files.eye_pupil_dir())?;

        let mut extractor: Option<PupilExtractor> = None;
        let mut writer = TableWriter::create(&self.files.eye_positions(), &PUPIL_COLUMNS)?;
        let mut warnings = 0usize;
        for stamp in &stamps {
            let index = stamp.frame_index;
            let analysis = next_gray(&mut frames, index).and_then(|gray| {
                let ex = extractor.get_or_insert_with(|| {
                    PupilExtractor::new(gray.width(), gray.height(), self.config.pupil.clone())
                });
                ex.analyze(index, &gray).map(|a| (gray, a))
            });
            let outcome: FrameOutcome<PupilMeasurement> = match analysis {
                Ok((gray, a)) => {
                    if let Some(dump) = processed.as_mut() {
                        dump.write(&DynamicImage::ImageLuma8(a.denoised.clone()))?;
                    }
                    if let Some(dump) = overlays.as_mut() {
                        dump.write(&pupil_overlay(&gray, &a.ellipse))?;
                    }
                    Ok(a.measurement)
                }
                Err(w) => {
                    warnings += 1;
                    tracing::warn!(warning = %w, "eye frame recorded as missing");
                    Err(w)
                }
            };
            if out.display_results {
                if let Ok(m) = &outcome {
                    tracing::info!(
                        frame = index,
                        x = m.center_x,
                        y = m.center_y,
                        diameter = m.diameter,
                        confidence = m.confidence,
                        "pupil"
                    );
                }
            }
            write_pupil_row(&mut writer, &PupilRow::from_outcome(stamp, &outcome))?;
        }
        let rows = writer.commit()?;
        tracing::info!(rows, warnings, "eye positions written");
        Ok(rows)
    }

    /// Target table for every scene frame; only frames inside the
    /// calibration epoch are decoded. Returns the number of frames with a target.
    pub fn extract_targets(&self) -> Result<usize, PipelineError> {
        let stamps =
            self.read_stamps(&self.files.scene_triggers(), self.config.scene.frame_rate)?;
        let epochs = self.segmenter().segment_timestamps(&stamps)?;
        let epoch = select_epoch(&epochs, self.config.calibration_epoch)?;
        tracing::info!(
            start = epoch.start_index,
            stop = epoch.stop_index,
            "target epoch"
        );
        let mut frames = ImageSequence::open(&self.files.scene_frames())?;
        let out = &self.config.output;
        let mut processed =
            optional_dump(out.make_processed_video, self.files.scene_processed_dir())?;
        let mut overlays = optional_dump(out.make_video, self.files.scene_markers_dir())?;

        let locator = ClusterLocator::new(self.config.markers.clone());
        let mut writer = TableWriter::create(&self.files.target_positions(), &TARGET_COLUMNS)?;
        let mut found = 0usize;
        for stamp in &stamps {
            let index = stamp.frame_index;
            let outcome = if epoch.contains(index) {
                match next_gray(&mut frames, index) {
                    Ok(gray) => {
                        let markers = locator.locate_markers(&gray);
                        let m = measurement_from_markers(index, &markers, locator.cluster_size());
                        if let Some(dump) = processed.as_mut() {
                            dump.write(&DynamicImage::ImageLuma8(gray.clone()))?;
                        }
                        if let Some(dump) = overlays.as_mut() {
                            dump.write(&marker_overlay(&gray, &markers, &m))?;
                        }
                        Ok(m)
                    }
                    Err(w) => {
                        tracing::warn!(warning = %w, "scene frame recorded as missing");
                        Err(w)
                    }
                }
            } else {
                frames.skip_frame();
                Ok(TargetMeasurement::not_found(index))
            };
            if out.display_results && epoch.contains(index) {
                if let Ok(m) = &outcome {
                    tracing::info!(frame = index, x = m.centroid_x, y = m.centroid_y, found = m.found, "target");
                }
            }
            let row = TargetRow::from_outcome(stamp, &outcome);
            found += usize::from(row.is_found());
            write_target_row(&mut writer, &row)?;
        }
        let rows = writer.commit()?;
        tracing::info!(rows, found, "target positions written");
        Ok(found)
    }

    /// Board views from the calibration recording, or from the board epoch of
    /// the scene recording when there is none.
    pub fn calibrate_camera(&self) -> Result<CalibrationResult, PipelineError> {
        let (mut frames, window) = self.board_frames()?;
        let detector = MarkerDetector::new(self.config.markers.detector.clone());
        let board = self.config.board.board;
        let estimator = CalibrationEstimator::new(self.config.board.clone());

        let mut observations = Vec::new();
        let mut image_size = None;
        for index in 0..frames.frame_count() {
            if let Some(epoch) = window {
                if index > epoch.stop_index {
                    break;
                }
                if !epoch.contains(index) {
                    frames.skip_frame();
                    continue;
                }
            }
            match next_gray(&mut frames, index) {
                Ok(gray) => {
                    image_size.get_or_insert(gray.dimensions());
                    let obs = BoardObservation::from_markers(index, &detector.detect(&gray), &board);
                    if estimator.accept(&obs) {
                        observations.push(obs);
                    } else {
                        tracing::debug!(frame = index, corners = obs.corner_count(), "board view rejected");
                    }
                }
                Err(w) => tracing::warn!(warning = %w, "board frame skipped"),
            }
        }
        let image_size = image_size.ok_or(CalibrationError::TooFewViews {
            needed: crate::calibration::MIN_VIEWS,
            found: 0,
        })?;
        let result = estimator.calibrate(&observations, image_size)?;
        let artifact = CalibrationArtifact::from_result(&result, self.config.board.alpha);
        if self.config.output.make_video {
            let accepted: Vec<usize> = observations.iter().map(|o| o.frame_index).collect();
            self.dump_undistorted(frames.dir(), &accepted, &artifact)?;
        }
        artifact.save(&self.files.calibration_artifact())?;
        Ok(result)
    }

    fn board_frames(&self) -> Result<(ImageSequence, Option<Epoch>), PipelineError> {
        let dedicated = self.files.calibration_frames();
        if dedicated.is_dir() {
            tracing::info!(dir = %dedicated.display(), "using calibration recording");
            return Ok((ImageSequence::open(&dedicated)?, None));
        }
        let stamps =
            self.read_stamps(&self.files.scene_triggers(), self.config.scene.frame_rate)?;
        let epochs = self.segmenter().segment_timestamps(&stamps)?;
        let epoch = select_epoch(&epochs, self.config.board_epoch)?;
        tracing::info!(
            start = epoch.start_index,
            stop = epoch.stop_index,
            "using board epoch of the scene recording"
        );
        Ok((ImageSequence::open(&self.files.scene_frames())?, Some(epoch)))
    }

    fn dump_undistorted(
        &self,
        dir: &Path,
        frames_to_dump: &[usize],
        artifact: &CalibrationArtifact,
    ) -> Result<(), PipelineError> {
        let model = artifact.model();
        let target = artifact.refined_intrinsics();
        let mut dump = FrameDump::create(&self.files.undistorted_dir())?;
        let mut frames = ImageSequence::open(dir)?;
        let mut wanted = frames_to_dump.iter().copied().peekable();
        for index in 0..frames.frame_count() {
            let Some(&next) = wanted.peek() else {
                break;
            };
            if index != next {
                frames.skip_frame();
                continue;
            }
            wanted.next();
            match next_gray(&mut frames, index) {
                Ok(gray) => {
                    dump.write(&DynamicImage::ImageLuma8(undistort_image(&gray, &model, target)))?;
                }
                Err(w) => tracing::warn!(warning = %w, "undistorted frame skipped"),
            }
        }
        tracing::info!(frames = dump.frames_written(), "undistorted board views written");
        Ok(())
    }

    /// Fit the gaze model on the calibration epoch and apply it to the whole
    /// pupil trace.
    pub fn map_gaze(&self) -> Result<GazeModel, PipelineError> {
        let pupil_rows = read_pupil_table(&self.files.eye_positions())?;
        let target_rows = read_target_table(&self.files.target_positions())?;

        let segmenter = self.segmenter();
        let eye_levels: Vec<f64> = pupil_rows.iter().map(|r| r.trigger_level).collect();
        let scene_levels: Vec<f64> = target_rows.iter().map(|r| r.trigger_level).collect();
        let eye_epoch = select_epoch(&segmenter.segment(&eye_levels)?, self.config.calibration_epoch)?;
        let scene_epoch =
            select_epoch(&segmenter.segment(&scene_levels)?, self.config.calibration_epoch)?;

        let pupil_xy = self.config.blink.mask(&pupil_rows);
        let blinks = pupil_xy.iter().filter(|p| p[0].is_nan()).count();
        let eye_times: Vec<f64> = pupil_rows.iter().map(|r| r.time_ms).collect();
        let pupil = TimeSeries::from_epoch(&eye_times, &pupil_xy, &eye_epoch);

        let scene_times: Vec<f64> = target_rows.iter().map(|r| r.time_ms).collect();
        let target_xy: Vec<[f64; 2]> = target_rows.iter().map(|r| [r.x, r.y]).collect();
        let target = TimeSeries::from_epoch(&scene_times, &target_xy, &scene_epoch);

        let samples = align(&pupil, &target, self.config.alignment.grid_step_ms);
        tracing::info!(
            grid_points = samples.len(),
            complete = samples.iter().filter(|s| s.is_complete()).count(),
            masked_pupil_rows = blinks,
            "calibration epoch aligned"
        );
        let model = GazeModel::fit(&samples, &self.config.regression)?;
        model.save_json(&self.files.gaze_model())?;
        let gaze = model.predict_series(&pupil_xy);
        let rows = write_gaze_table(&self.files.gaze_table(), &gaze)?;
        tracing::info!(rows, "gaze table written");
        if self.config.output.make_video {
            let matches = following_samples(&eye_times, &eye_epoch, &scene_times, &scene_epoch);
            self.dump_gaze(&matches, &gaze)?;
        }
        Ok(model)
    }

    /// Scene frames with the gaze of the eye sample matched to each frame.
    fn dump_gaze(&self, matches: &[Option<usize>], gaze: &[(f64, f64)]) -> Result<(), PipelineError> {
        let mut frames = ImageSequence::open(&self.files.scene_frames())?;
        let mut dump = FrameDump::create(&self.files.scene_gaze_dir())?;
        for index in 0..frames.frame_count() {
            match next_gray(&mut frames, index) {
                Ok(gray) => {
                    let point = matches
                        .get(index)
                        .copied()
                        .flatten()
                        .and_then(|i| gaze.get(i).copied())
                        .unwrap_or((f64::NAN, f64::NAN));
                    dump.write(&gaze_overlay(&gray, point))?;
                }
                Err(w) => tracing::warn!(warning = %w, "gaze frame skipped"),
            }
        }
        tracing::info!(frames = dump.frames_written(), "gaze overlay frames written");
        Ok(())
    }
}

/// Predict gaze for every row of a pupil table (blinks give NaN rows).
pub fn apply_gaze_model(
    model: &GazeModel,
    pupil_table: &Path,
    blink: &BlinkFilter,
    out: &Path,
) -> Result<usize, PipelineError> {
    let rows = read_pupil_table(pupil_table)?;
    let gaze = model.predict_series(&blink.mask(&rows));
    write_gaze_table(out, &gaze)
}
