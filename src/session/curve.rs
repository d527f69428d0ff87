//! # Curve Reassembler
//!
//! Accumulates the sample streams of one test session. Every stream is
//! append-only and strictly ordered by its own key:
//!
//! - flow-volume and volume-time points by their timestamp,
//! - oximetry samples by their implicit arrival index,
//! - 10 ms flow samples by the explicit start index of each chunk.
//!
//! A batch is validated as a whole before any of it is stored, so a
//! rejected batch leaves the stream untouched. Each stream is capped at
//! `max_samples`; samples beyond the cap are dropped with a warning.

use crate::constants::HIGH_RES_SAMPLE_INTERVAL_MS;
use serde::Serialize;
use thiserror::Error;

/// Identifies one sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SampleKind {
    FlowVolume,
    VolumeTime,
    Oximetry,
    HighResFlow,
}

/// One point of a forced expiration flow-volume curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlowVolumePoint {
    pub volume_l: f32,
    pub flow_ls: f32,
    pub time_s: f32,
}

/// One point of a volume-time curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeTimePoint {
    pub volume_l: f32,
    pub time_s: f32,
}

/// One stored oximetry sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OximetrySample {
    pub heart_rate_bpm: u8,
    pub spo2_pct: u8,
}

/// Samples carried by one packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBatch {
    FlowVolume(Vec<FlowVolumePoint>),
    VolumeTime(Vec<VolumeTimePoint>),
    Oximetry(Vec<OximetrySample>),
    HighResFlow { start_index: u16, flows_ls: Vec<f32> },
}

impl SampleBatch {
    pub fn kind(&self) -> SampleKind {
        match self {
            SampleBatch::FlowVolume(_) => SampleKind::FlowVolume,
            SampleBatch::VolumeTime(_) => SampleKind::VolumeTime,
            SampleBatch::Oximetry(_) => SampleKind::Oximetry,
            SampleBatch::HighResFlow { .. } => SampleKind::HighResFlow,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleBatch::FlowVolume(points) => points.len(),
            SampleBatch::VolumeTime(points) => points.len(),
            SampleBatch::Oximetry(samples) => samples.len(),
            SampleBatch::HighResFlow { flows_ls, .. } => flows_ls.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordering violations. They abort the session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CurveError {
    #[error("{kind:?} sample at {next_s}s does not follow {previous_s}s")]
    NotIncreasing {
        kind: SampleKind,
        previous_s: f32,
        next_s: f32,
    },

    #[error("10 ms chunk starts at index {start_index}, expected {expected_index} or later")]
    IndexBehind {
        start_index: usize,
        expected_index: usize,
    },
}

/// 10 ms flow curve as delivered by the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HighResCurve {
    pub flows_ls: Vec<f32>,
    pub interval_ms: u32,
    /// Sample count announced by the `CURVE_10MS` header, if it arrived.
    pub expected_samples: Option<u16>,
    /// Samples skipped by gaps between chunks.
    pub missing_samples: usize,
}

/// Ordered sample sequences of a finished session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinalizedCurves {
    pub flow_volume: Vec<FlowVolumePoint>,
    pub volume_time: Vec<VolumeTimePoint>,
    pub oximetry: Vec<OximetrySample>,
    pub high_res: HighResCurve,
}

/// Append-only sample streams for one session.
#[derive(Debug)]
pub struct CurveReassembler {
    max_samples: usize,
    curves: FinalizedCurves,
    next_high_res_index: usize,
    truncated: [bool; 4],
}

impl CurveReassembler {
    pub fn new(max_samples: usize) -> Self {
        CurveReassembler {
            max_samples,
            curves: FinalizedCurves {
                high_res: HighResCurve {
                    interval_ms: HIGH_RES_SAMPLE_INTERVAL_MS,
                    ..HighResCurve::default()
                },
                ..FinalizedCurves::default()
            },
            next_high_res_index: 0,
            truncated: [false; 4],
        }
    }

    /// Appends one batch and returns how many samples were stored.
    ///
    /// The count is smaller than the batch length only when the stream cap
    /// was reached; the stored samples are always a prefix of the batch.
    pub fn append(&mut self, batch: &SampleBatch) -> Result<usize, CurveError> {
        match batch {
            SampleBatch::FlowVolume(points) => {
                let last = self.curves.flow_volume.last().map(|p| p.time_s);
                check_increasing(SampleKind::FlowVolume, last, points.iter().map(|p| p.time_s))?;
                let stored = self.curves.flow_volume.len();
                let room = self.room(SampleKind::FlowVolume, stored, points.len());
                self.curves.flow_volume.extend_from_slice(&points[..room]);
                Ok(room)
            }
            SampleBatch::VolumeTime(points) => {
                let last = self.curves.volume_time.last().map(|p| p.time_s);
                check_increasing(SampleKind::VolumeTime, last, points.iter().map(|p| p.time_s))?;
                let stored = self.curves.volume_time.len();
                let room = self.room(SampleKind::VolumeTime, stored, points.len());
                self.curves.volume_time.extend_from_slice(&points[..room]);
                Ok(room)
            }
            SampleBatch::Oximetry(samples) => {
                let stored = self.curves.oximetry.len();
                let room = self.room(SampleKind::Oximetry, stored, samples.len());
                self.curves.oximetry.extend_from_slice(&samples[..room]);
                Ok(room)
            }
            SampleBatch::HighResFlow {
                start_index,
                flows_ls,
            } => {
                let start_index = *start_index as usize;
                if start_index < self.next_high_res_index {
                    return Err(CurveError::IndexBehind {
                        start_index,
                        expected_index: self.next_high_res_index,
                    });
                }
                if start_index > self.next_high_res_index {
                    let gap = start_index - self.next_high_res_index;
                    log::warn!(
                        "10 ms curve gap: {gap} samples missing before index {start_index}"
                    );
                    self.curves.high_res.missing_samples += gap;
                }
                let stored = self.curves.high_res.flows_ls.len();
                let room = self.room(SampleKind::HighResFlow, stored, flows_ls.len());
                self.curves.high_res.flows_ls.extend_from_slice(&flows_ls[..room]);
                self.next_high_res_index = start_index + flows_ls.len();
                Ok(room)
            }
        }
    }

    /// Records the sample count announced by the 10 ms curve header.
    pub fn set_expected_high_res(&mut self, expected: u16) {
        self.curves.high_res.expected_samples = Some(expected);
    }

    pub fn len(&self, kind: SampleKind) -> usize {
        match kind {
            SampleKind::FlowVolume => self.curves.flow_volume.len(),
            SampleKind::VolumeTime => self.curves.volume_time.len(),
            SampleKind::Oximetry => self.curves.oximetry.len(),
            SampleKind::HighResFlow => self.curves.high_res.flows_ls.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        [
            SampleKind::FlowVolume,
            SampleKind::VolumeTime,
            SampleKind::Oximetry,
            SampleKind::HighResFlow,
        ]
        .iter()
        .all(|kind| self.len(*kind) == 0)
    }

    /// Consumes the reassembler and hands out the ordered sequences.
    pub fn finalize(self) -> FinalizedCurves {
        self.curves
    }

    fn room(&mut self, kind: SampleKind, stored: usize, incoming: usize) -> usize {
        let room = self.max_samples.saturating_sub(stored).min(incoming);
        if room < incoming {
            let slot = &mut self.truncated[kind as usize];
            if !*slot {
                log::warn!(
                    "{kind:?} curve reached {} samples, dropping further samples",
                    self.max_samples
                );
                *slot = true;
            }
        }
        room
    }
}

fn check_increasing(
    kind: SampleKind,
    last: Option<f32>,
    times: impl Iterator<Item = f32>,
) -> Result<(), CurveError> {
    let mut previous = last;
    for next in times {
        if let Some(previous_s) = previous {
            if next <= previous_s {
                return Err(CurveError::NotIncreasing {
                    kind,
                    previous_s,
                    next_s: next,
                });
            }
        }
        previous = Some(next);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vt(time_ms: u16) -> VolumeTimePoint {
        VolumeTimePoint {
            volume_l: time_ms as f32 / 100.0,
            time_s: time_ms as f32 / 1000.0,
        }
    }

    #[test]
    fn test_append_in_order() {
        let mut curve = CurveReassembler::new(16);
        assert_eq!(curve.append(&SampleBatch::VolumeTime(vec![vt(10), vt(20)])), Ok(2));
        assert_eq!(curve.append(&SampleBatch::VolumeTime(vec![vt(30)])), Ok(1));
        let done = curve.finalize();
        let times: Vec<f32> = done.volume_time.iter().map(|p| p.time_s).collect();
        assert_eq!(times, vec![0.01, 0.02, 0.03]);
    }

    #[test]
    fn test_rejected_batch_leaves_stream_untouched() {
        let mut curve = CurveReassembler::new(16);
        curve.append(&SampleBatch::VolumeTime(vec![vt(10), vt(20)])).unwrap();
        let err = curve
            .append(&SampleBatch::VolumeTime(vec![vt(30), vt(20)]))
            .unwrap_err();
        assert!(matches!(err, CurveError::NotIncreasing { kind: SampleKind::VolumeTime, .. }));
        assert_eq!(curve.len(SampleKind::VolumeTime), 2);
    }

    #[test]
    fn test_equal_timestamp_rejected() {
        let mut curve = CurveReassembler::new(16);
        curve.append(&SampleBatch::VolumeTime(vec![vt(10)])).unwrap();
        assert!(curve.append(&SampleBatch::VolumeTime(vec![vt(10)])).is_err());
    }

    #[test]
    fn test_cap_truncates() {
        let mut curve = CurveReassembler::new(3);
        assert_eq!(
            curve.append(&SampleBatch::VolumeTime(vec![vt(1), vt(2), vt(3), vt(4)])),
            Ok(3)
        );
        assert_eq!(curve.append(&SampleBatch::VolumeTime(vec![vt(5)])), Ok(0));
        assert_eq!(curve.len(SampleKind::VolumeTime), 3);
    }

    #[test]
    fn test_high_res_gap_and_overlap() {
        let mut curve = CurveReassembler::new(64);
        let chunk = |start: u16, n: usize| SampleBatch::HighResFlow {
            start_index: start,
            flows_ls: vec![1.0; n],
        };
        assert_eq!(curve.append(&chunk(0, 4)), Ok(4));
        assert_eq!(curve.append(&chunk(6, 2)), Ok(2));
        assert_eq!(
            curve.append(&chunk(7, 1)),
            Err(CurveError::IndexBehind {
                start_index: 7,
                expected_index: 8
            })
        );
        let done = curve.finalize();
        assert_eq!(done.high_res.flows_ls.len(), 6);
        assert_eq!(done.high_res.missing_samples, 2);
        assert_eq!(done.high_res.interval_ms, 10);
    }

    #[test]
    fn test_streams_are_independent() {
        let mut curve = CurveReassembler::new(8);
        curve.append(&SampleBatch::VolumeTime(vec![vt(50)])).unwrap();
        curve
            .append(&SampleBatch::FlowVolume(vec![FlowVolumePoint {
                volume_l: 0.1,
                flow_ls: 2.0,
                time_s: 0.01,
            }]))
            .unwrap();
        assert_eq!(curve.len(SampleKind::FlowVolume), 1);
        assert_eq!(curve.len(SampleKind::VolumeTime), 1);
        assert!(!curve.is_empty());
    }
}
