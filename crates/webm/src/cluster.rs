//! Block timing within a cluster.
//!
//! Blocks carry no duration unless a BlockGroup says so or the track declares
//! a DefaultDuration. Blocks without one are held until the next block of the
//! same track arrives, or until the cluster ends.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use media_types::{StreamType, TimeDelta};
use tracing::trace;

use crate::block::{BlockHeader, FLAG_KEYFRAME};
use crate::ebml;
use crate::elements;
use crate::error::{Result, WebmError};
use crate::info::SegmentInfo;
use crate::parser::ParserEvent;
use crate::tracks::{TrackSlot, Tracks};

/// One demuxed frame with resolved timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBlock {
    pub stream: StreamType,
    pub track: u64,
    pub timestamp: TimeDelta,
    pub duration: TimeDelta,
    pub keyframe: bool,
    pub data: Bytes,
}

/// Timing context a block is resolved against.
pub(crate) struct BlockContext<'a> {
    pub tracks: &'a Tracks,
    pub info: &'a SegmentInfo,
}

#[derive(Debug)]
struct HeldBlock {
    stream: StreamType,
    timecode: i64,
    keyframe: bool,
    data: Bytes,
}

#[derive(Debug, Default)]
pub(crate) struct ClusterParser {
    timecode: Option<i64>,
    /// Last block timecode per track within the current cluster.
    last_timecode: HashMap<u64, i64>,
    held: BTreeMap<u64, HeldBlock>,
    /// Most recent inferred duration per track, in ticks. Survives clusters.
    last_delta: HashMap<u64, i64>,
}

impl ClusterParser {
    /// Resets per-cluster state. Held blocks are dropped.
    pub fn start(&mut self) {
        self.timecode = None;
        self.last_timecode.clear();
        self.held.clear();
    }

    pub fn set_timecode(&mut self, ticks: u64) -> Result<()> {
        let ticks = i64::try_from(ticks).map_err(|_| WebmError::InvalidValue {
            element: "Timecode",
            reason: ticks.to_string(),
        })?;
        self.timecode = Some(ticks);
        Ok(())
    }

    pub fn on_simple_block(
        &mut self,
        body: Bytes,
        ctx: &BlockContext<'_>,
        events: &mut Vec<ParserEvent>,
    ) -> Result<()> {
        let header = BlockHeader::parse(&body)?;
        let keyframe = header.flags & FLAG_KEYFRAME != 0;
        let data = body.slice(header.payload_offset..);
        self.on_block(header, keyframe, None, data, ctx, events)
    }

    pub fn on_block_group(
        &mut self,
        body: Bytes,
        ctx: &BlockContext<'_>,
        events: &mut Vec<ParserEvent>,
    ) -> Result<()> {
        let mut block = None;
        let mut duration = None;
        let mut referenced = false;
        for child in ebml::children(&body) {
            let (id, data) = child?;
            match id {
                elements::BLOCK => block = Some(body.slice_ref(data)),
                elements::BLOCK_DURATION => duration = Some(ebml::read_uint(data)?),
                elements::REFERENCE_BLOCK => referenced = true,
                _ => {}
            }
        }

        let block = block.ok_or(WebmError::MissingElement("Block"))?;
        let header = BlockHeader::parse(&block)?;
        let data = block.slice(header.payload_offset..);
        self.on_block(header, !referenced, duration, data, ctx, events)
    }

    fn on_block(
        &mut self,
        header: BlockHeader,
        keyframe: bool,
        duration_ticks: Option<u64>,
        data: Bytes,
        ctx: &BlockContext<'_>,
        events: &mut Vec<ParserEvent>,
    ) -> Result<()> {
        let cluster_timecode = self.timecode.ok_or(WebmError::BlockBeforeTimecode)?;
        let track = header.track;
        let stream = match ctx.tracks.slot(track) {
            Some(TrackSlot::Stream(stream)) => stream,
            Some(TrackSlot::Ignored) => return Ok(()),
            None => return Err(WebmError::UnknownTrack(track)),
        };

        if header.relative_timecode < 0 {
            return Err(WebmError::TimecodeBeforeCluster {
                track,
                relative: header.relative_timecode,
            });
        }
        let timecode = cluster_timecode
            .checked_add(i64::from(header.relative_timecode))
            .ok_or_else(|| WebmError::InvalidValue {
                element: "Timecode",
                reason: format!(
                    "cluster timecode {} plus block offset {} overflows",
                    cluster_timecode, header.relative_timecode
                ),
            })?;
        if let Some(&previous) = self.last_timecode.get(&track)
            && timecode < previous
        {
            return Err(WebmError::NonMonotonicTimecode {
                track,
                previous,
                current: timecode,
            });
        }
        self.last_timecode.insert(track, timecode);

        if let Some(held) = self.held.remove(&track) {
            let delta = timecode - held.timecode;
            self.last_delta.insert(track, delta);
            events.push(ParserEvent::Block(held.resolve(track, delta, ctx)));
        }

        let duration = match duration_ticks {
            Some(ticks) => Some(
                ctx.info
                    .timecode_to_time(i64::try_from(ticks).unwrap_or(i64::MAX)),
            ),
            None => ctx.tracks.default_duration(stream),
        };
        match duration {
            Some(duration) => events.push(ParserEvent::Block(ParsedBlock {
                stream,
                track,
                timestamp: ctx.info.timecode_to_time(timecode),
                duration,
                keyframe,
                data,
            })),
            None => {
                trace!(
                    "Holding block of track {} at {} until its duration is known",
                    track, timecode
                );
                self.held.insert(
                    track,
                    HeldBlock {
                        stream,
                        timecode,
                        keyframe,
                        data,
                    },
                );
            }
        }
        Ok(())
    }

    /// Releases held blocks using the last duration seen on their track.
    pub fn finish(&mut self, ctx: &BlockContext<'_>, events: &mut Vec<ParserEvent>) {
        for (track, held) in std::mem::take(&mut self.held) {
            let delta = self.last_delta.get(&track).copied().unwrap_or(0);
            events.push(ParserEvent::Block(held.resolve(track, delta, ctx)));
        }
        self.start();
    }
}

impl HeldBlock {
    fn resolve(self, track: u64, duration_ticks: i64, ctx: &BlockContext<'_>) -> ParsedBlock {
        ParsedBlock {
            stream: self.stream,
            track,
            timestamp: ctx.info.timecode_to_time(self.timecode),
            duration: ctx.info.timecode_to_time(duration_ticks),
            keyframe: self.keyframe,
            data: self.data,
        }
    }
}
