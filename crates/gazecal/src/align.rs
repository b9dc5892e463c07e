//! Temporal alignment of the eye and scene streams on a shared regular grid.
//!
//! The cameras run at different, unsynchronized rates. Both streams are cut to
//! the calibration epoch, rebased to its first in-epoch frame and resampled
//! by nearest-neighbour lookup, so every aligned value is an observed value.

use serde::{Deserialize, Serialize};

use crate::trigger::Epoch;

/// One grid point carrying both streams.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignedSample {
    pub time_ms: f64,
    pub pupil_x: f64,
    pub pupil_y: f64,
    pub target_x: f64,
    pub target_y: f64,
}

impl AlignedSample {
    pub fn is_complete(&self) -> bool {
        self.pupil_x.is_finite()
            && self.pupil_y.is_finite()
            && self.target_x.is_finite()
            && self.target_y.is_finite()
    }
}

/// A 2-D trace with one timestamp per sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    pub times: Vec<f64>,
    pub values: Vec<[f64; 2]>,
}

impl TimeSeries {
    /// The in-epoch part of a full trace with time zero at the first in-epoch frame.
    pub fn from_epoch(times: &[f64], values: &[[f64; 2]], epoch: &Epoch) -> Self {
        let times = epoch.slice(times);
        let values = epoch.slice(values);
        let n = times.len().min(values.len());
        let t0 = times.first().copied().unwrap_or(0.0);
        Self {
            times: times[..n].iter().map(|t| t - t0).collect(),
            values: values[..n].to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Time span between the first and last sample; zero when empty.
    pub fn duration(&self) -> f64 {
        match (self.times.first(), self.times.last()) {
            (Some(a), Some(b)) => b - a,
            _ => 0.0,
        }
    }
}

/// Nearest-sample lookup over a time-sorted trace.
#[derive(Debug, Clone)]
pub struct NearestInterpolator {
    times: Vec<f64>,
    values: Vec<[f64; 2]>,
}

impl NearestInterpolator {
    /// Samples with non-finite timestamps are dropped; the rest are ordered by
    /// time (stable, so duplicate timestamps keep their recording order).
    pub fn new(times: &[f64], values: &[[f64; 2]]) -> Self {
        let mut pairs: Vec<(f64, [f64; 2])> = times
            .iter()
            .copied()
            .zip(values.iter().copied())
            .filter(|(t, _)| t.is_finite())
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (times, values) = pairs.into_iter().unzip();
        Self { times, values }
    }

    pub fn from_series(series: &TimeSeries) -> Self {
        Self::new(&series.times, &series.values)
    }

    /// Value of the closest sample; ties go to the earlier one. NaN outside
    /// the sampled time range.
    pub fn sample(&self, t: f64) -> [f64; 2] {
        const MISSING: [f64; 2] = [f64::NAN, f64::NAN];
        let (Some(&first), Some(&last)) = (self.times.first(), self.times.last()) else {
            return MISSING;
        };
        if !(t >= first && t <= last) {
            return MISSING;
        }
        let i = self.times.partition_point(|&x| x < t);
        if i == 0 {
            return self.values[0];
        }
        if i == self.times.len() {
            return self.values[i - 1];
        }
        let before = t - self.times[i - 1];
        let after = self.times[i] - t;
        if after < before {
            self.values[i]
        } else {
            self.values[i - 1]
        }
    }
}

/// `0, step, 2·step, …` up to and including `duration`.
pub fn regular_grid(duration: f64, step: f64) -> Vec<f64> {
    if !(step > 0.0) || !(duration >= 0.0) || !duration.is_finite() {
        return Vec::new();
    }
    // Tolerate accumulated rounding when `duration` is a multiple of `step`.
    let n = (duration / step + 1e-9).floor() as usize;
    (0..=n).map(|k| k as f64 * step).collect()
}

/// Resample both traces on a shared grid bounded by the shorter trace.
pub fn align(pupil: &TimeSeries, target: &TimeSeries, step: f64) -> Vec<AlignedSample> {
    if pupil.is_empty() || target.is_empty() {
        return Vec::new();
    }
    let duration = pupil.duration().min(target.duration());
    let p = NearestInterpolator::from_series(pupil);
    let q = NearestInterpolator::from_series(target);
    let t0p = pupil.times[0];
    let t0q = target.times[0];
    regular_grid(duration, step)
        .into_iter()
        .map(|t| {
            let [px, py] = p.sample(t0p + t);
            let [tx, ty] = q.sample(t0q + t);
            AlignedSample {
                time_ms: t,
                pupil_x: px,
                pupil_y: py,
                target_x: tx,
                target_y: ty,
            }
        })
        .collect()
}

/// For every frame of one stream, the first sample of the other stream taken
/// strictly after it. Both time bases start at the first in-epoch frame of
/// their own epoch; `sample_times` must be ascending. `None` past the last sample.
pub fn following_samples(
    sample_times: &[f64],
    sample_epoch: &Epoch,
    frame_times: &[f64],
    frame_epoch: &Epoch,
) -> Vec<Option<usize>> {
    let t0s = sample_epoch.slice(sample_times).first().copied().unwrap_or(0.0);
    let t0f = frame_epoch.slice(frame_times).first().copied().unwrap_or(0.0);
    frame_times
        .iter()
        .map(|&t| {
            let i = sample_times.partition_point(|&s| s - t0s <= t - t0f);
            (i < sample_times.len()).then_some(i)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interp() -> NearestInterpolator {
        NearestInterpolator::new(
            &[0.0, 10.0, 20.0, 30.0],
            &[[0.0, 0.0], [1.0, -1.0], [f64::NAN, f64::NAN], [3.0, -3.0]],
        )
    }

    #[test]
    fn nearest_sample_and_ties() {
        let f = interp();
        assert_eq!(f.sample(10.0), [1.0, -1.0]);
        assert_eq!(f.sample(13.0), [1.0, -1.0]);
        assert_eq!(f.sample(4.0), [0.0, 0.0]);
        // Midpoint resolves to the earlier sample.
        assert_eq!(f.sample(5.0), [0.0, 0.0]);
        assert!(f.sample(25.0)[0].is_nan());
        assert_eq!(f.sample(26.0), [3.0, -3.0]);
        assert_eq!(f.sample(30.0), [3.0, -3.0]);
    }

    #[test]
    fn outside_range_is_nan() {
        let f = interp();
        assert!(f.sample(-0.5)[0].is_nan());
        assert!(f.sample(30.5)[1].is_nan());
        assert!(f.sample(f64::NAN)[0].is_nan());
        assert!(NearestInterpolator::new(&[], &[]).sample(0.0)[0].is_nan());
    }

    #[test]
    fn unsorted_input_is_ordered() {
        let f = NearestInterpolator::new(&[20.0, 0.0, 10.0], &[[2.0, 2.0], [0.0, 0.0], [1.0, 1.0]]);
        assert_eq!(f.sample(19.0), [2.0, 2.0]);
        assert_eq!(f.sample(1.0), [0.0, 0.0]);
    }

    #[test]
    fn grid_includes_endpoint() {
        assert_eq!(regular_grid(3.0, 1.0), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(regular_grid(2.5, 1.0).len(), 3);
        assert_eq!(regular_grid(0.0, 1.0), vec![0.0]);
        assert!(regular_grid(5.0, 0.0).is_empty());
        assert!(regular_grid(-1.0, 1.0).is_empty());
        assert_eq!(regular_grid(0.3, 0.1).len(), 4);
    }

    #[test]
    fn epoch_rebases_time() {
        let epoch = Epoch {
            start_index: 1,
            stop_index: 3,
            duration_frames: 2,
        };
        let times = [0.0, 11.0, 22.0, 33.0, 44.0];
        let values = [[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]];
        let s = TimeSeries::from_epoch(&times, &values, &epoch);
        assert_eq!(s.times, vec![0.0, 11.0]);
        assert_eq!(s.values, vec![[2.0, 2.0], [3.0, 3.0]]);
        assert_eq!(s.duration(), 11.0);
    }

    #[test]
    fn align_uses_shorter_duration() {
        let pupil = TimeSeries {
            times: (0..=90).map(|i| i as f64 * 1000.0 / 90.0).collect(),
            values: (0..=90).map(|i| [i as f64, 0.0]).collect(),
        };
        let target = TimeSeries {
            times: (0..=15).map(|i| i as f64 * 1000.0 / 30.0).collect(),
            values: (0..=15).map(|i| [0.0, i as f64]).collect(),
        };
        let samples = align(&pupil, &target, 100.0);
        assert_eq!(samples.len(), 6);
        assert!(samples.iter().all(AlignedSample::is_complete));
        assert_eq!(samples[1].time_ms, 100.0);
        assert_eq!(samples[1].pupil_x, 9.0);
        assert_eq!(samples[1].target_y, 3.0);
    }

    #[test]
    fn frames_pick_the_next_sample_in_epoch_time() {
        let eye_epoch = Epoch {
            start_index: 1,
            stop_index: 8,
            duration_frames: 7,
        };
        let scene_epoch = Epoch {
            start_index: 0,
            stop_index: 3,
            duration_frames: 3,
        };
        let eye: Vec<f64> = (0..10).map(|i| i as f64 * 10.0).collect();
        let scene = [0.0, 33.0, 66.0, 99.0, 132.0];
        let m = following_samples(&eye, &eye_epoch, &scene, &scene_epoch);
        assert_eq!(m, vec![Some(0), Some(3), Some(6), Some(9), None]);
    }
}
