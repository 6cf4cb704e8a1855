//! Per-stream buffer queue.
//!
//! Buffers are kept sorted by `(timestamp, append order)`. A stream remembers
//! which media segment (cluster) each buffer came from so data appended later
//! can replace older data covering the same time span.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use media_types::{DecoderConfig, StreamType, TimeDelta};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::buffer::{DecoderBuffer, StreamRead};
use crate::config::DemuxerConfig;
use crate::ranges::Ranges;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    ReturningData,
    /// Reads resolve as aborted until the next seek.
    AbortingReads,
    Shutdown,
}

/// Read position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Nothing read yet; the first buffered buffer is next.
    Start,
    /// Waiting to deliver the first buffer at or after this time.
    Seek(TimeDelta),
    /// Last delivered buffer and the furthest end time delivered so far.
    After {
        timestamp: TimeDelta,
        seq: u64,
        end: TimeDelta,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextRead {
    Buffer(usize),
    EndOfStream,
    Stalled,
}

#[derive(Debug)]
struct StoredBuffer {
    buffer: DecoderBuffer,
    seq: u64,
    segment: u64,
}

impl StoredBuffer {
    fn timestamp(&self) -> TimeDelta {
        self.buffer.timestamp
    }
}

/// A run of contiguous buffers, by index.
#[derive(Debug, Clone, Copy)]
struct Span {
    start: TimeDelta,
    end: TimeDelta,
    first: usize,
    last: usize,
}

#[derive(Debug)]
pub struct ChunkDemuxerStream {
    stream_type: StreamType,
    label: String,
    fudge_factor: i64,
    min_fudge_room: TimeDelta,
    state: StreamState,
    buffers: Vec<StoredBuffer>,
    next_seq: u64,
    segment: u64,
    last_appended: Option<TimeDelta>,
    max_interbuffer_distance: Option<TimeDelta>,
    /// Configuration stamped on newly appended buffers.
    append_config: Arc<DecoderConfig>,
    /// Configuration last reported to the reader.
    current_config: Arc<DecoderConfig>,
    cursor: Cursor,
    end_of_stream: bool,
    pending_reads: VecDeque<oneshot::Sender<StreamRead>>,
}

impl ChunkDemuxerStream {
    pub(crate) fn new(config: DecoderConfig, settings: &DemuxerConfig) -> Self {
        let stream_type = config.stream_type();
        let config = Arc::new(config);
        Self {
            stream_type,
            label: format!("{} {}", settings.name, stream_type),
            fudge_factor: settings.fudge_factor,
            min_fudge_room: settings.min_fudge_room,
            state: StreamState::ReturningData,
            buffers: Vec::new(),
            next_seq: 0,
            segment: 0,
            last_appended: None,
            max_interbuffer_distance: None,
            append_config: config.clone(),
            current_config: config,
            cursor: Cursor::Start,
            end_of_stream: false,
            pending_reads: VecDeque::new(),
        }
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    /// Configuration of the buffers the reader is currently receiving.
    pub fn config(&self) -> &Arc<DecoderConfig> {
        &self.current_config
    }

    pub fn is_shut_down(&self) -> bool {
        self.state == StreamState::Shutdown
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Slack allowed between buffers that are still considered contiguous.
    pub fn fudge_room(&self) -> TimeDelta {
        match self.max_interbuffer_distance {
            Some(distance) => (distance * self.fudge_factor).max(self.min_fudge_room),
            None => self.min_fudge_room,
        }
    }

    /// Installs the configuration for subsequently appended buffers.
    /// Returns whether it differs from the previous one.
    pub(crate) fn update_config(&mut self, config: DecoderConfig) -> bool {
        if *self.append_config == config {
            return false;
        }
        debug!("{}: new decoder configuration {}", self.label, config);
        self.append_config = Arc::new(config);
        true
    }

    /// Buffers appended from now on belong to a new media segment.
    pub(crate) fn start_media_segment(&mut self) {
        self.segment += 1;
        self.last_appended = None;
    }

    /// Admits one buffer. Buffers from earlier media segments that start
    /// within the new buffer's span are removed.
    pub(crate) fn append(
        &mut self,
        timestamp: TimeDelta,
        duration: TimeDelta,
        keyframe: bool,
        data: Bytes,
    ) {
        if self.state == StreamState::Shutdown {
            return;
        }

        if let Some(last) = self.last_appended {
            let distance = timestamp - last;
            if self.max_interbuffer_distance.is_none_or(|max| distance > max) {
                self.max_interbuffer_distance = Some(distance);
            }
        }
        self.last_appended = Some(timestamp);

        let end = timestamp + duration;
        let segment = self.segment;
        let mut i = self
            .buffers
            .partition_point(|b| b.timestamp() < timestamp);
        let mut removed = 0;
        while let Some(existing) = self.buffers.get(i) {
            let ts = existing.timestamp();
            if ts >= end && ts != timestamp {
                break;
            }
            if existing.segment != segment {
                self.buffers.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        if removed > 0 {
            trace!(
                "{}: buffer at {} replaced {} older buffers",
                self.label, timestamp, removed
            );
        }

        let position = self
            .buffers
            .partition_point(|b| b.timestamp() <= timestamp);
        self.buffers.insert(
            position,
            StoredBuffer {
                buffer: DecoderBuffer {
                    timestamp,
                    duration,
                    keyframe,
                    data,
                    config: self.append_config.clone(),
                },
                seq: self.next_seq,
                segment,
            },
        );
        self.next_seq += 1;
    }

    fn spans(&self) -> Vec<Span> {
        let fudge = self.fudge_room();
        let mut spans: Vec<Span> = Vec::new();
        for (i, stored) in self.buffers.iter().enumerate() {
            let ts = stored.timestamp();
            let end = stored.buffer.end();
            match spans.last_mut() {
                Some(span) if ts <= span.end + fudge => {
                    span.end = span.end.max(end);
                    span.last = i;
                }
                _ => spans.push(Span {
                    start: ts,
                    end,
                    first: i,
                    last: i,
                }),
            }
        }
        spans
    }

    /// Buffered time ranges, clamped to `duration` when it is finite.
    pub fn buffered_ranges(&self, duration: TimeDelta) -> Ranges<TimeDelta> {
        let mut ranges = Ranges::new();
        for span in self.spans() {
            ranges.push_sorted(span.start, span.end);
        }
        if !duration.is_infinite() {
            ranges.clamp_end(duration);
        }
        ranges
    }

    /// End of the last buffered range, ignoring duration.
    pub fn buffered_end(&self) -> Option<TimeDelta> {
        self.spans().last().map(|span| span.end)
    }

    fn seek_target(&self, time: TimeDelta) -> NextRead {
        let fudge = self.fudge_room();
        let spans = self.spans();
        for span in &spans {
            if span.start > time + fudge || span.end <= time {
                continue;
            }
            let indices = span.first..=span.last;
            if let Some(i) = indices
                .clone()
                .find(|&i| self.buffers[i].timestamp() >= time)
                .or_else(|| indices.clone().find(|&i| self.buffers[i].buffer.end() > time))
            {
                return NextRead::Buffer(i);
            }
        }
        if self.end_of_stream && spans.iter().all(|span| span.end <= time) {
            return NextRead::EndOfStream;
        }
        NextRead::Stalled
    }

    fn next_readable(&self) -> NextRead {
        match self.cursor {
            Cursor::Start if !self.buffers.is_empty() => NextRead::Buffer(0),
            Cursor::Start if self.end_of_stream => NextRead::EndOfStream,
            Cursor::Start => NextRead::Stalled,
            Cursor::Seek(time) => self.seek_target(time),
            Cursor::After {
                timestamp,
                seq,
                end,
            } => {
                let i = self
                    .buffers
                    .partition_point(|b| (b.timestamp(), b.seq) <= (timestamp, seq));
                match self.buffers.get(i) {
                    Some(next) if next.timestamp() <= end + self.fudge_room() => {
                        NextRead::Buffer(i)
                    }
                    Some(_) => NextRead::Stalled,
                    None if self.end_of_stream => NextRead::EndOfStream,
                    None => NextRead::Stalled,
                }
            }
        }
    }

    /// Produces the next read result, or `None` if the reader has to wait.
    fn next_read(&mut self) -> Option<StreamRead> {
        let i = match self.next_readable() {
            NextRead::Buffer(i) => i,
            NextRead::EndOfStream => return Some(StreamRead::EndOfStream),
            NextRead::Stalled => return None,
        };
        let stored = &self.buffers[i];
        if *stored.buffer.config != *self.current_config {
            debug!(
                "{}: config change at {}",
                self.label,
                stored.buffer.timestamp
            );
            self.current_config = stored.buffer.config.clone();
            return Some(StreamRead::ConfigChanged);
        }

        let end = match self.cursor {
            Cursor::After { end, .. } => end.max(stored.buffer.end()),
            _ => stored.buffer.end(),
        };
        self.cursor = Cursor::After {
            timestamp: stored.timestamp(),
            seq: stored.seq,
            end,
        };
        Some(StreamRead::Buffer(stored.buffer.clone()))
    }

    /// Queues a read. When `fulfill` is false the read waits even if data is
    /// available, which is how a pending seek holds readers back.
    pub(crate) fn read(&mut self, reply: oneshot::Sender<StreamRead>, fulfill: bool) {
        match self.state {
            StreamState::Shutdown => {
                let _ = reply.send(StreamRead::EndOfStream);
            }
            StreamState::AbortingReads => {
                let _ = reply.send(StreamRead::Aborted);
            }
            StreamState::ReturningData => {
                self.pending_reads.push_back(reply);
                if fulfill {
                    self.fulfill_pending_reads();
                }
            }
        }
    }

    /// Answers queued reads in order until one has to wait.
    pub(crate) fn fulfill_pending_reads(&mut self) {
        if self.state != StreamState::ReturningData {
            return;
        }
        while let Some(reply) = self.pending_reads.front() {
            if reply.is_closed() {
                self.pending_reads.pop_front();
                continue;
            }
            let Some(result) = self.next_read() else {
                break;
            };
            if let Some(reply) = self.pending_reads.pop_front() {
                let _ = reply.send(result);
            }
        }
    }

    pub(crate) fn seek(&mut self, time: TimeDelta) {
        if self.state == StreamState::Shutdown {
            return;
        }
        trace!("{}: seek to {}", self.label, time);
        self.cursor = Cursor::Seek(time);
    }

    /// Whether the position set by the last seek can be read from without
    /// waiting for more data.
    pub(crate) fn can_satisfy_seek(&self) -> bool {
        match (self.state, self.cursor) {
            (StreamState::Shutdown, _) => true,
            (_, Cursor::Seek(_)) => self.next_readable() != NextRead::Stalled,
            _ => true,
        }
    }

    /// Resolves every queued read as aborted and keeps aborting new reads
    /// until [`start_returning_data`](Self::start_returning_data).
    pub(crate) fn abort_reads(&mut self) {
        if self.state == StreamState::Shutdown {
            return;
        }
        self.state = StreamState::AbortingReads;
        for reply in self.pending_reads.drain(..) {
            let _ = reply.send(StreamRead::Aborted);
        }
    }

    pub(crate) fn start_returning_data(&mut self) {
        if self.state == StreamState::AbortingReads {
            self.state = StreamState::ReturningData;
        }
    }

    pub(crate) fn mark_end_of_stream(&mut self) {
        self.end_of_stream = true;
    }

    pub(crate) fn cancel_end_of_stream(&mut self) {
        self.end_of_stream = false;
    }

    /// Drops all data; current and future reads resolve as end of stream.
    pub(crate) fn shutdown(&mut self) {
        if self.state == StreamState::Shutdown {
            return;
        }
        debug!("{}: shutting down", self.label);
        self.state = StreamState::Shutdown;
        self.buffers.clear();
        for reply in self.pending_reads.drain(..) {
            let _ = reply.send(StreamRead::EndOfStream);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ReadHandle;
    use media_types::{AudioCodec, AudioDecoderConfig, ChannelLayout, SampleFormat};

    fn audio_config(rate: u32) -> DecoderConfig {
        DecoderConfig::Audio(AudioDecoderConfig {
            codec: AudioCodec::Vorbis,
            sample_format: SampleFormat::PlanarF32,
            channel_layout: ChannelLayout::Stereo,
            samples_per_second: rate,
            extra_data: Bytes::from_static(b"vorbis"),
            is_encrypted: false,
        })
    }

    fn new_stream() -> ChunkDemuxerStream {
        ChunkDemuxerStream::new(audio_config(44_100), &DemuxerConfig::default())
    }

    fn ms(value: i64) -> TimeDelta {
        TimeDelta::from_millis(value)
    }

    /// Appends one media segment of buffers every `step` ms.
    fn append_segment(stream: &mut ChunkDemuxerStream, start: i64, count: i64, step: i64) {
        stream.start_media_segment();
        for i in 0..count {
            let ts = start + i * step;
            stream.append(ms(ts), ms(step), true, Bytes::from(vec![i as u8]));
        }
    }

    fn read(stream: &mut ChunkDemuxerStream) -> ReadHandle {
        let (tx, handle) = ReadHandle::channel();
        stream.read(tx, true);
        handle
    }

    fn read_timestamp(stream: &mut ChunkDemuxerStream) -> i64 {
        let mut handle = read(stream);
        match handle.try_result() {
            Some(StreamRead::Buffer(b)) => b.timestamp.as_millis(),
            other => panic!("expected a buffer, got {other:?}"),
        }
    }

    #[test]
    fn test_contiguous_segments_coalesce() {
        let mut stream = new_stream();
        append_segment(&mut stream, 0, 2, 23);
        append_segment(&mut stream, 46, 4, 23);
        assert_eq!(stream.buffered_ranges(TimeDelta::INFINITE).to_string(), "{ [0,138) }");
    }

    #[test]
    fn test_gap_produces_two_ranges() {
        let mut stream = new_stream();
        append_segment(&mut stream, 0, 2, 23);
        append_segment(&mut stream, 150, 3, 23);
        assert_eq!(
            stream.buffered_ranges(TimeDelta::INFINITE).to_string(),
            "{ [0,46) [150,219) }"
        );
        assert_eq!(stream.fudge_room(), ms(46));
    }

    #[test]
    fn test_small_gap_is_within_fudge_room() {
        let mut stream = new_stream();
        append_segment(&mut stream, 0, 3, 23);
        append_segment(&mut stream, 100, 2, 23);
        assert_eq!(stream.buffered_ranges(TimeDelta::INFINITE).to_string(), "{ [0,146) }");
    }

    #[test]
    fn test_ranges_clamped_to_duration() {
        let mut stream = new_stream();
        append_segment(&mut stream, 0, 4, 23);
        assert_eq!(stream.buffered_ranges(ms(50)).to_string(), "{ [0,50) }");
        assert_eq!(stream.buffered_end(), Some(ms(92)));
    }

    #[test]
    fn test_reads_in_order_and_pending_fifo() {
        let mut stream = new_stream();
        let mut first = read(&mut stream);
        let mut second = read(&mut stream);
        assert!(first.try_result().is_none());

        append_segment(&mut stream, 0, 1, 23);
        stream.fulfill_pending_reads();
        assert_eq!(first.try_result().and_then(|r| r.timestamp()), Some(ms(0)));
        assert!(second.try_result().is_none());

        stream.append(ms(23), ms(23), false, Bytes::from_static(b"x"));
        stream.fulfill_pending_reads();
        assert_eq!(second.try_result().and_then(|r| r.timestamp()), Some(ms(23)));
    }

    #[test]
    fn test_read_stalls_at_gap_even_after_end_of_stream() {
        let mut stream = new_stream();
        append_segment(&mut stream, 0, 2, 23);
        append_segment(&mut stream, 150, 2, 23);
        stream.mark_end_of_stream();

        assert_eq!(read_timestamp(&mut stream), 0);
        assert_eq!(read_timestamp(&mut stream), 23);
        let mut stalled = read(&mut stream);
        stream.fulfill_pending_reads();
        assert!(stalled.try_result().is_none());

        append_segment(&mut stream, 46, 5, 23);
        stream.fulfill_pending_reads();
        assert_eq!(stalled.try_result().and_then(|r| r.timestamp()), Some(ms(46)));
    }

    #[test]
    fn test_end_of_stream_in_final_range() {
        let mut stream = new_stream();
        append_segment(&mut stream, 0, 1, 23);
        assert_eq!(read_timestamp(&mut stream), 0);
        let mut pending = read(&mut stream);
        assert!(pending.try_result().is_none());

        stream.mark_end_of_stream();
        stream.fulfill_pending_reads();
        assert_eq!(pending.try_result(), Some(StreamRead::EndOfStream));
        assert_eq!(read(&mut stream).try_result(), Some(StreamRead::EndOfStream));
    }

    #[test]
    fn test_later_segment_replaces_overlapped_buffers() {
        let mut stream = new_stream();
        append_segment(&mut stream, 0, 4, 23);
        stream.start_media_segment();
        stream.append(ms(23), ms(23), true, Bytes::from_static(b"new"));

        assert_eq!(read_timestamp(&mut stream), 0);
        let mut handle = read(&mut stream);
        let buffer = handle.try_result().and_then(StreamRead::into_buffer).unwrap();
        assert_eq!(buffer.timestamp, ms(23));
        assert_eq!(buffer.data, Bytes::from_static(b"new"));
        assert_eq!(read_timestamp(&mut stream), 46);
    }

    #[test]
    fn test_equal_timestamps_in_one_segment_are_kept() {
        let mut stream = new_stream();
        stream.start_media_segment();
        stream.append(ms(33), ms(0), false, Bytes::from_static(b"a"));
        stream.append(ms(33), ms(33), false, Bytes::from_static(b"b"));

        let mut first = read(&mut stream);
        let mut second = read(&mut stream);
        assert_eq!(
            first.try_result().and_then(StreamRead::into_buffer).unwrap().data,
            Bytes::from_static(b"a")
        );
        assert_eq!(
            second.try_result().and_then(StreamRead::into_buffer).unwrap().data,
            Bytes::from_static(b"b")
        );
    }

    #[test]
    fn test_seek_targets_first_buffer_at_or_after() {
        let mut stream = new_stream();
        append_segment(&mut stream, 0, 6, 23);

        stream.seek(ms(50));
        assert!(stream.can_satisfy_seek());
        assert_eq!(read_timestamp(&mut stream), 69);

        stream.seek(ms(130));
        assert_eq!(read_timestamp(&mut stream), 115);

        stream.seek(ms(500));
        assert!(!stream.can_satisfy_seek());
        stream.mark_end_of_stream();
        assert!(stream.can_satisfy_seek());
        assert_eq!(read(&mut stream).try_result(), Some(StreamRead::EndOfStream));
    }

    #[test]
    fn test_seek_into_gap_waits_despite_end_of_stream() {
        let mut stream = new_stream();
        append_segment(&mut stream, 0, 2, 23);
        append_segment(&mut stream, 300, 2, 23);
        stream.mark_end_of_stream();

        stream.seek(ms(200));
        assert!(!stream.can_satisfy_seek());
        append_segment(&mut stream, 180, 2, 23);
        assert!(stream.can_satisfy_seek());
        assert_eq!(read_timestamp(&mut stream), 203);
    }

    #[test]
    fn test_config_change_is_reported_once() {
        let mut stream = new_stream();
        append_segment(&mut stream, 0, 2, 23);
        assert!(stream.update_config(audio_config(48_000)));
        assert!(!stream.update_config(audio_config(48_000)));
        append_segment(&mut stream, 46, 2, 23);

        assert_eq!(read_timestamp(&mut stream), 0);
        assert_eq!(read_timestamp(&mut stream), 23);
        assert_eq!(read(&mut stream).try_result(), Some(StreamRead::ConfigChanged));
        assert_eq!(**stream.config(), audio_config(48_000));
        assert_eq!(read_timestamp(&mut stream), 46);

        stream.seek(ms(0));
        assert_eq!(read(&mut stream).try_result(), Some(StreamRead::ConfigChanged));
        assert_eq!(**stream.config(), audio_config(44_100));
        assert_eq!(read_timestamp(&mut stream), 0);
    }

    #[test]
    fn test_abort_and_resume() {
        let mut stream = new_stream();
        let mut pending = read(&mut stream);
        stream.abort_reads();
        assert_eq!(pending.try_result(), Some(StreamRead::Aborted));
        assert_eq!(read(&mut stream).try_result(), Some(StreamRead::Aborted));

        append_segment(&mut stream, 0, 2, 23);
        stream.seek(ms(0));
        stream.start_returning_data();
        assert_eq!(read_timestamp(&mut stream), 0);
    }

    #[test]
    fn test_shutdown_resolves_end_of_stream() {
        let mut stream = new_stream();
        let mut pending = read(&mut stream);
        stream.shutdown();
        assert_eq!(pending.try_result(), Some(StreamRead::EndOfStream));

        append_segment(&mut stream, 0, 2, 23);
        assert!(stream.buffered_ranges(TimeDelta::INFINITE).is_empty());
        assert_eq!(read(&mut stream).try_result(), Some(StreamRead::EndOfStream));
        assert!(stream.is_shut_down());
    }
}
