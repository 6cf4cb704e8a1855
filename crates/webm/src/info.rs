use media_types::TimeDelta;

use crate::ebml;
use crate::elements;
use crate::error::{Result, WebmError};

/// Nanoseconds per timecode tick when the Info element does not say.
pub const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// The parts of the Segment Info element the demuxer cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    /// Nanoseconds per timecode tick.
    pub timecode_scale: u64,
    /// Duration in timecode ticks; absent for live streams.
    pub duration: Option<f64>,
}

impl Default for SegmentInfo {
    fn default() -> Self {
        Self {
            timecode_scale: DEFAULT_TIMECODE_SCALE,
            duration: None,
        }
    }
}

impl SegmentInfo {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut info = SegmentInfo::default();
        for child in ebml::children(body) {
            let (id, data) = child?;
            match id {
                elements::TIMECODE_SCALE => info.timecode_scale = ebml::read_uint(data)?,
                elements::DURATION => info.duration = Some(ebml::read_float(data)?),
                _ => {}
            }
        }

        if info.timecode_scale == 0 {
            return Err(WebmError::InvalidValue {
                element: "TimecodeScale",
                reason: "zero".into(),
            });
        }
        if let Some(duration) = info.duration
            && (!duration.is_finite() || duration <= 0.0)
        {
            return Err(WebmError::InvalidValue {
                element: "Duration",
                reason: duration.to_string(),
            });
        }
        Ok(info)
    }

    /// Segment duration, or `TimeDelta::INFINITE` when none was declared.
    pub fn duration(&self) -> TimeDelta {
        match self.duration {
            Some(ticks) => TimeDelta::from_secs_f64(ticks * self.timecode_scale as f64 / 1e9),
            None => TimeDelta::INFINITE,
        }
    }

    /// Converts a timecode in ticks to media time.
    pub fn timecode_to_time(&self, ticks: i64) -> TimeDelta {
        let micros = i128::from(ticks) * i128::from(self.timecode_scale) / 1_000;
        TimeDelta::from_micros(micros.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
    }
}
