//! Trigger-channel segmentation into task epochs.
//!
//! Every captured frame carries the level of the hardware trigger line. A task
//! phase is bracketed by a rising and a falling edge; short pulses are glitches
//! and are dropped by a minimum-duration threshold.

use std::ops::RangeInclusive;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, SegmentationError};
use crate::io::tables::read_columns;

/// Header names of the trigger table columns.
pub const TRIGGER_COLUMNS: [&str; 2] = ["frameTime", "triggerLevel"];

/// One captured frame's timing record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameTimestamp {
    pub frame_index: usize,
    pub time_ms: f64,
    pub trigger_level: f64,
}

/// A task phase bounded by a paired rising/falling trigger edge.
///
/// `start_index` is the last low sample before the rising edge and
/// `stop_index` the last high sample, so `duration_frames` counts the frames
/// recorded while the trigger was high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub start_index: usize,
    pub stop_index: usize,
    pub duration_frames: usize,
}

impl Epoch {
    fn new(start_index: usize, stop_index: usize) -> Self {
        debug_assert!(start_index < stop_index);
        Self {
            start_index,
            stop_index,
            duration_frames: stop_index - start_index,
        }
    }

    /// Frames recorded while the trigger was high.
    pub fn frames(&self) -> RangeInclusive<usize> {
        self.start_index + 1..=self.stop_index
    }

    pub fn contains(&self, frame_index: usize) -> bool {
        self.frames().contains(&frame_index)
    }

    /// The in-epoch part of a per-frame sequence, clamped to its length.
    pub fn slice<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        let start = (self.start_index + 1).min(items.len());
        let stop = (self.stop_index + 1).min(items.len());
        &items[start..stop]
    }
}

/// Edge detection and duration thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SegmenterConfig {
    /// Minimum positive level step that counts as a rising edge.
    pub rising_threshold: f64,
    /// Maximum (negative) level step that counts as a falling edge.
    pub falling_threshold: f64,
    /// Epochs must last strictly longer than this many frames.
    pub min_duration_frames: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            rising_threshold: 0.5,
            falling_threshold: -0.5,
            min_duration_frames: 80,
        }
    }
}

/// Raw edge indices of a trigger channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Edges {
    pub rising: Vec<usize>,
    pub falling: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Index `i` is an edge when the step from `i` to `i + 1` crosses a threshold.
    pub fn edges(&self, levels: &[f64]) -> Edges {
        let mut edges = Edges::default();
        for (i, w) in levels.windows(2).enumerate() {
            let step = w[1] - w[0];
            if step > self.config.rising_threshold {
                edges.rising.push(i);
            } else if step < self.config.falling_threshold {
                edges.falling.push(i);
            }
        }
        edges
    }

    /// Pair edges into epochs and keep those longer than the duration threshold.
    pub fn segment(&self, levels: &[f64]) -> Result<Vec<Epoch>, SegmentationError> {
        let edges = self.edges(levels);
        let pairs = pair_edges(&edges)?;
        let epochs: Vec<Epoch> = pairs
            .into_iter()
            .filter(|&(on, off)| off - on > self.config.min_duration_frames)
            .map(|(on, off)| Epoch::new(on, off))
            .collect();
        tracing::debug!(
            rising = edges.rising.len(),
            falling = edges.falling.len(),
            epochs = epochs.len(),
            "segmented trigger channel"
        );
        Ok(epochs)
    }

    pub fn segment_timestamps(
        &self,
        stamps: &[FrameTimestamp],
    ) -> Result<Vec<Epoch>, SegmentationError> {
        let levels: Vec<f64> = stamps.iter().map(|s| s.trigger_level).collect();
        self.segment(&levels)
    }
}

/// Pair rising and falling edges in temporal order.
///
/// Falling edges before the first rising edge and rising edges after the last
/// falling edge cannot belong to an epoch and are dropped. Whatever remains
/// must interleave strictly as `r0 < f0 < r1 < f1 < ...`.
fn pair_edges(edges: &Edges) -> Result<Vec<(usize, usize)>, SegmentationError> {
    let (Some(&first_rise), Some(&last_fall)) = (edges.rising.first(), edges.falling.last())
    else {
        return Ok(Vec::new());
    };
    let rising: Vec<usize> = edges
        .rising
        .iter()
        .copied()
        .filter(|&r| r < last_fall)
        .collect();
    let falling: Vec<usize> = edges
        .falling
        .iter()
        .copied()
        .filter(|&f| f > first_rise)
        .collect();

    if rising.len() != falling.len() {
        return Err(SegmentationError::UnpairedEdges {
            rising: rising.len(),
            falling: falling.len(),
        });
    }

    let mut pairs = Vec::with_capacity(rising.len());
    for (k, (&on, &off)) in rising.iter().zip(&falling).enumerate() {
        if off <= on {
            return Err(SegmentationError::NonPositiveDuration {
                rising: on,
                falling: off,
            });
        }
        if let Some(&next_on) = rising.get(k + 1) {
            if next_on <= off {
                return Err(SegmentationError::OverlappingEpochs {
                    falling: off,
                    next_rising: next_on,
                });
            }
        }
        pairs.push((on, off));
    }
    Ok(pairs)
}

/// Pick the `index`-th epoch or report how many exist.
pub fn select_epoch(epochs: &[Epoch], index: usize) -> Result<Epoch, SegmentationError> {
    epochs
        .get(index)
        .copied()
        .ok_or(SegmentationError::MissingEpoch {
            requested: index,
            available: epochs.len(),
        })
}

/// Read a `(frameTime, triggerLevel)` table, one row per captured frame.
///
/// Columns are located by header name; tables without the expected names are
/// read positionally.
pub fn read_trigger_table(path: &Path) -> Result<Vec<FrameTimestamp>, PipelineError> {
    let [times, levels] = read_columns(path, TRIGGER_COLUMNS, true)?;
    Ok(times
        .into_iter()
        .zip(levels)
        .enumerate()
        .map(|(frame_index, (time_ms, trigger_level))| FrameTimestamp {
            frame_index,
            time_ms,
            trigger_level,
        })
        .collect())
}

/// Replace recorded frame times by `index * 1000 / fps`.
pub fn retime(stamps: &mut [FrameTimestamp], frame_rate: f64) {
    let period_ms = 1000.0 / frame_rate;
    for s in stamps.iter_mut() {
        s.time_ms = s.frame_index as f64 * period_ms;
    }
}
