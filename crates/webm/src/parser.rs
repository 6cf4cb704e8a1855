//! Incremental WebM stream parser.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::cluster::{BlockContext, ClusterParser, ParsedBlock};
use crate::ebml::{self, ElementHeader};
use crate::elements;
use crate::error::{Result, WebmError};
use crate::info::SegmentInfo;
use crate::tracks::Tracks;

/// Largest element buffered whole by default.
pub const DEFAULT_MAX_ELEMENT_SIZE: usize = 64 * 1024 * 1024;

/// Tuning knobs for [`WebmStreamParser`].
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Elements larger than this (other than Segment and Cluster, which are
    /// never buffered whole) are treated as malformed input.
    pub max_element_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_element_size: DEFAULT_MAX_ELEMENT_SIZE,
        }
    }
}

/// Output of [`WebmStreamParser::parse`], in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    Info(SegmentInfo),
    Tracks(Tracks),
    /// A Cluster header was read; blocks that follow belong to a new media
    /// segment.
    NewCluster,
    Block(ParsedBlock),
    EndOfCluster,
}

#[derive(Debug, Clone, Copy)]
struct ClusterBounds {
    /// Absolute stream offset where the cluster ends, `None` for unknown size.
    end: Option<u64>,
}

/// Parses a WebM byte stream handed over in arbitrary pieces.
///
/// Partial elements are buffered until complete, except Segment and Cluster
/// which are entered as soon as their header is read, and metadata elements
/// such as Cues which are skipped as bytes arrive.
pub struct WebmStreamParser {
    config: ParserConfig,
    buffer: BytesMut,
    /// Stream offset of the first byte in `buffer`.
    position: u64,
    skip_remaining: u64,
    cluster: Option<ClusterBounds>,
    blocks: ClusterParser,
    info: SegmentInfo,
    tracks: Option<Tracks>,
    failed: bool,
}

impl Default for WebmStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl WebmStreamParser {
    pub fn new() -> Self {
        Self::with_config(ParserConfig::default())
    }

    pub fn with_config(config: ParserConfig) -> Self {
        Self {
            config,
            buffer: BytesMut::new(),
            position: 0,
            skip_remaining: 0,
            cluster: None,
            blocks: ClusterParser::default(),
            info: SegmentInfo::default(),
            tracks: None,
            failed: false,
        }
    }

    /// Feeds `data` and appends every event it completes to `events`.
    ///
    /// After an error the parser stays failed until [`reset`](Self::reset).
    pub fn parse(&mut self, data: &[u8], events: &mut Vec<ParserEvent>) -> Result<()> {
        if self.failed {
            return Err(WebmError::ParserFailed);
        }
        self.buffer.extend_from_slice(data);
        let result = self.parse_buffered(events);
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    /// True between a Cluster header and the end of that cluster.
    pub fn is_parsing_cluster(&self) -> bool {
        self.cluster.is_some()
    }

    /// Closes an open cluster at end of input, releasing blocks still
    /// waiting for a duration. Does nothing after an error or between
    /// clusters.
    pub fn flush(&mut self, events: &mut Vec<ParserEvent>) {
        if self.failed || self.cluster.is_none() {
            return;
        }
        self.end_cluster(events);
    }

    /// Drops buffered bytes and the current cluster, returning the parser to
    /// an element boundary. Previously parsed Info and Tracks are kept.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() || self.cluster.is_some() {
            debug!(
                "Resetting parser, dropping {} buffered bytes",
                self.buffer.len()
            );
        }
        self.buffer.clear();
        self.skip_remaining = 0;
        self.cluster = None;
        self.blocks.start();
        self.failed = false;
    }

    fn parse_buffered(&mut self, events: &mut Vec<ParserEvent>) -> Result<()> {
        loop {
            if self.skip_remaining > 0 {
                let n = self.skip_remaining.min(self.buffer.len() as u64) as usize;
                self.advance(n);
                self.skip_remaining -= n as u64;
                if self.skip_remaining > 0 {
                    return Ok(());
                }
            }

            if let Some(cluster) = self.cluster
                && cluster.end == Some(self.position)
            {
                self.end_cluster(events);
                continue;
            }

            let Some(header) = ebml::parse_element_header(&self.buffer)? else {
                return Ok(());
            };
            let progressed = match self.cluster {
                Some(cluster) => self.parse_cluster_child(header, cluster, events)?,
                None => self.parse_segment_child(header, events)?,
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    fn parse_segment_child(
        &mut self,
        header: ElementHeader,
        events: &mut Vec<ParserEvent>,
    ) -> Result<bool> {
        match header.id {
            elements::EBML => {
                let Some(body) = self.take_element(&header)? else {
                    return Ok(false);
                };
                check_ebml_header(&body)?;
            }
            elements::SEGMENT => {
                self.advance(header.header_len);
            }
            elements::INFO => {
                let Some(body) = self.take_element(&header)? else {
                    return Ok(false);
                };
                let info = SegmentInfo::parse(&body)?;
                debug!(
                    "Parsed Info: timecode scale {}, duration {:?}",
                    info.timecode_scale, info.duration
                );
                self.info = info.clone();
                events.push(ParserEvent::Info(info));
            }
            elements::TRACKS => {
                let Some(body) = self.take_element(&header)? else {
                    return Ok(false);
                };
                let tracks = Tracks::parse(&body)?;
                debug!(
                    "Parsed Tracks: audio {}, video {}",
                    tracks.has_audio(),
                    tracks.has_video()
                );
                self.tracks = Some(tracks.clone());
                events.push(ParserEvent::Tracks(tracks));
            }
            elements::CLUSTER => {
                if self.tracks.is_none() {
                    return Err(WebmError::ClusterBeforeTracks);
                }
                self.advance(header.header_len);
                let end = header.size.map(|size| self.position + size);
                trace!("Entering cluster at {} (end {:?})", self.position, end);
                self.cluster = Some(ClusterBounds { end });
                self.blocks.start();
                events.push(ParserEvent::NewCluster);
            }
            id if elements::is_skippable_top_level(id) => self.skip_element(&header)?,
            id => {
                return Err(WebmError::UnexpectedElement {
                    id,
                    context: "segment",
                });
            }
        }
        Ok(true)
    }

    fn parse_cluster_child(
        &mut self,
        header: ElementHeader,
        cluster: ClusterBounds,
        events: &mut Vec<ParserEvent>,
    ) -> Result<bool> {
        if cluster.end.is_none() && elements::is_top_level(header.id) {
            self.end_cluster(events);
            return Ok(true);
        }
        if let (Some(end), Some(size)) = (cluster.end, header.size)
            && self.position + header.header_len as u64 + size > end
        {
            return Err(WebmError::ElementOverflow { id: header.id });
        }

        match header.id {
            elements::TIMECODE => {
                let Some(body) = self.take_element(&header)? else {
                    return Ok(false);
                };
                self.blocks.set_timecode(ebml::read_uint(&body)?)?;
            }
            elements::SIMPLE_BLOCK | elements::BLOCK_GROUP => {
                let Some(body) = self.take_element(&header)? else {
                    return Ok(false);
                };
                let Some(tracks) = self.tracks.as_ref() else {
                    return Err(WebmError::ClusterBeforeTracks);
                };
                let ctx = BlockContext {
                    tracks,
                    info: &self.info,
                };
                if header.id == elements::SIMPLE_BLOCK {
                    self.blocks.on_simple_block(body, &ctx, events)?;
                } else {
                    self.blocks.on_block_group(body, &ctx, events)?;
                }
            }
            id if elements::is_skippable_in_cluster(id) => self.skip_element(&header)?,
            id => {
                return Err(WebmError::UnexpectedElement {
                    id,
                    context: "cluster",
                });
            }
        }
        Ok(true)
    }

    fn end_cluster(&mut self, events: &mut Vec<ParserEvent>) {
        if let Some(tracks) = self.tracks.as_ref() {
            let ctx = BlockContext {
                tracks,
                info: &self.info,
            };
            self.blocks.finish(&ctx, events);
        }
        self.cluster = None;
        trace!("Leaving cluster at {}", self.position);
        events.push(ParserEvent::EndOfCluster);
    }

    fn advance(&mut self, n: usize) {
        self.buffer.advance(n);
        self.position += n as u64;
    }

    fn checked_size(&self, header: &ElementHeader) -> Result<u64> {
        let size = header
            .size
            .ok_or(WebmError::UnknownSizeNotAllowed { id: header.id })?;
        if size > self.config.max_element_size as u64 {
            return Err(WebmError::ElementTooLarge {
                id: header.id,
                size,
                limit: self.config.max_element_size,
            });
        }
        Ok(size)
    }

    /// Removes a whole element from the buffer and returns its body, or
    /// `None` if it has not fully arrived yet.
    fn take_element(&mut self, header: &ElementHeader) -> Result<Option<Bytes>> {
        let total = header.header_len + self.checked_size(header)? as usize;
        if self.buffer.len() < total {
            return Ok(None);
        }
        let mut element = self.buffer.split_to(total).freeze();
        self.position += total as u64;
        Ok(Some(element.split_off(header.header_len)))
    }

    fn skip_element(&mut self, header: &ElementHeader) -> Result<()> {
        let size = header
            .size
            .ok_or(WebmError::UnknownSizeNotAllowed { id: header.id })?;
        trace!(
            "Skipping {} ({} bytes)",
            elements::element_name(header.id),
            size
        );
        self.advance(header.header_len);
        self.skip_remaining = size;
        Ok(())
    }
}

fn check_ebml_header(body: &[u8]) -> Result<()> {
    let mut doc_type = None;
    for child in ebml::children(body) {
        let (id, data) = child?;
        if id == elements::DOC_TYPE {
            doc_type = Some(ebml::read_string(data));
        }
    }
    match doc_type.as_deref() {
        None | Some("webm") | Some("matroska") => Ok(()),
        Some(other) => Err(WebmError::UnsupportedDocType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FLAG_KEYFRAME;
    use crate::test_support::*;
    use media_types::{StreamType, TimeDelta};

    fn parse_all(parser: &mut WebmStreamParser, data: &[u8]) -> Result<Vec<ParserEvent>> {
        let mut events = Vec::new();
        parser.parse(data, &mut events)?;
        Ok(events)
    }

    fn blocks(events: &[ParserEvent]) -> Vec<(StreamType, i64, i64, bool)> {
        events
            .iter()
            .filter_map(|e| match e {
                ParserEvent::Block(b) => Some((
                    b.stream,
                    b.timestamp.as_millis(),
                    b.duration.as_millis(),
                    b.keyframe,
                )),
                _ => None,
            })
            .collect()
    }

    fn interleaved_cluster() -> Bytes {
        let mut cluster = ClusterBuilder::new();
        cluster
            .set_cluster_timecode(0)
            .add_simple_block(AUDIO_TRACK, 0, FLAG_KEYFRAME, &block_payload(0))
            .add_simple_block(VIDEO_TRACK, 0, FLAG_KEYFRAME, &block_payload(0))
            .add_simple_block(AUDIO_TRACK, 23, FLAG_KEYFRAME, &block_payload(23))
            .add_simple_block(VIDEO_TRACK, 33, 0, &block_payload(33))
            .add_block_group(AUDIO_TRACK, 46, 23, FLAG_KEYFRAME, &block_payload(46))
            .add_block_group(VIDEO_TRACK, 66, 34, 0, &block_payload(66));
        cluster.finish()
    }

    #[test]
    fn test_init_segment_events() {
        let mut parser = WebmStreamParser::new();
        let events = parse_all(&mut parser, &InitSegment::default().build()).unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            ParserEvent::Info(info) => assert_eq!(info.duration(), TimeDelta::from_millis(2744)),
            other => panic!("unexpected event {other:?}"),
        }
        match &events[1] {
            ParserEvent::Tracks(tracks) => {
                assert!(tracks.has_audio());
                assert!(tracks.has_video());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!parser.is_parsing_cluster());
    }

    #[test]
    fn test_held_simple_blocks_get_deltas() {
        let mut parser = WebmStreamParser::new();
        parse_all(&mut parser, &InitSegment::default().build()).unwrap();
        let events = parse_all(&mut parser, &interleaved_cluster()).unwrap();

        assert_eq!(events.first(), Some(&ParserEvent::NewCluster));
        assert_eq!(events.last(), Some(&ParserEvent::EndOfCluster));
        assert_eq!(
            blocks(&events),
            vec![
                (StreamType::Audio, 0, 23, true),
                (StreamType::Video, 0, 33, true),
                (StreamType::Audio, 23, 23, true),
                (StreamType::Audio, 46, 23, true),
                (StreamType::Video, 33, 33, false),
                (StreamType::Video, 66, 34, false),
            ]
        );
    }

    #[test]
    fn test_chunk_size_independence() {
        let mut stream = InitSegment::default().build().to_vec();
        stream.extend_from_slice(&interleaved_cluster());
        let mut next = ClusterBuilder::new();
        next.set_cluster_timecode(100)
            .add_simple_block(AUDIO_TRACK, 100, FLAG_KEYFRAME, &block_payload(100))
            .add_simple_block(AUDIO_TRACK, 120, FLAG_KEYFRAME, &block_payload(120));
        stream.extend_from_slice(&next.finish_with_unknown_size());
        stream.extend_from_slice(&interleaved_cluster());

        let mut whole = WebmStreamParser::new();
        let expected = parse_all(&mut whole, &stream).unwrap();

        for chunk_size in [1, 3, 7, 64] {
            let mut parser = WebmStreamParser::new();
            let mut events = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                parser.parse(chunk, &mut events).unwrap();
            }
            assert_eq!(events, expected, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_blocks_are_emitted_before_cluster_end() {
        let mut parser = WebmStreamParser::new();
        parse_all(&mut parser, &InitSegment::default().build()).unwrap();
        let cluster = interleaved_cluster();
        let events = parse_all(&mut parser, &cluster[..cluster.len() - 10]).unwrap();
        assert!(parser.is_parsing_cluster());
        assert_eq!(blocks(&events).len(), 4);
        assert!(!events.contains(&ParserEvent::EndOfCluster));

        let events = parse_all(&mut parser, &cluster[cluster.len() - 10..]).unwrap();
        assert!(!parser.is_parsing_cluster());
        assert_eq!(events.last(), Some(&ParserEvent::EndOfCluster));
    }

    #[test]
    fn test_unknown_size_cluster_ends_at_next_cluster() {
        let mut parser = WebmStreamParser::new();
        parse_all(&mut parser, &InitSegment::default().build()).unwrap();

        let mut cluster = ClusterBuilder::new();
        cluster
            .set_cluster_timecode(0)
            .add_simple_block(VIDEO_TRACK, 0, FLAG_KEYFRAME, &block_payload(0));
        let events = parse_all(&mut parser, &cluster.finish_with_unknown_size()).unwrap();
        assert!(parser.is_parsing_cluster());
        assert!(blocks(&events).is_empty());

        let events = parse_all(&mut parser, &interleaved_cluster()).unwrap();
        assert_eq!(blocks(&events[..1]), vec![(StreamType::Video, 0, 0, true)]);
        assert_eq!(events[1], ParserEvent::EndOfCluster);
        assert_eq!(events[2], ParserEvent::NewCluster);
    }

    #[test]
    fn test_default_duration_emits_immediately() {
        let init = InitSegment {
            video: Some(TrackOptions {
                default_duration_ns: Some(33_000_000),
                ..Default::default()
            }),
            ..InitSegment::video_only()
        };
        let mut parser = WebmStreamParser::new();
        parse_all(&mut parser, &init.build()).unwrap();

        let mut cluster = ClusterBuilder::new();
        cluster
            .set_cluster_timecode(0)
            .add_simple_block(VIDEO_TRACK, 0, FLAG_KEYFRAME, &block_payload(0));
        let events = parse_all(&mut parser, &cluster.finish()).unwrap();
        assert_eq!(blocks(&events), vec![(StreamType::Video, 0, 33, true)]);
    }

    #[test]
    fn test_skips_metadata_elements() {
        let mut stream = InitSegment::default().build().to_vec();
        stream.extend(element(elements::VOID, &[0u8; 40]));
        stream.extend(element(elements::CUES, &[0u8; 300]));
        let mut cluster = ClusterBuilder::new();
        cluster
            .set_cluster_timecode(0)
            .add_block_group(AUDIO_TRACK, 0, 23, FLAG_KEYFRAME, &block_payload(0));
        stream.extend_from_slice(&cluster.finish());

        let mut parser = WebmStreamParser::new();
        let mut events = Vec::new();
        for chunk in stream.chunks(5) {
            parser.parse(chunk, &mut events).unwrap();
        }
        assert_eq!(blocks(&events), vec![(StreamType::Audio, 0, 23, true)]);
    }

    #[test]
    fn test_same_track_regression_is_fatal() {
        let mut parser = WebmStreamParser::new();
        parse_all(&mut parser, &InitSegment::default().build()).unwrap();

        let mut cluster = ClusterBuilder::new();
        cluster
            .set_cluster_timecode(5)
            .add_simple_block(AUDIO_TRACK, 5, FLAG_KEYFRAME, &block_payload(5))
            .add_simple_block(VIDEO_TRACK, 10, FLAG_KEYFRAME, &block_payload(10))
            .add_simple_block(AUDIO_TRACK, 3, FLAG_KEYFRAME, &block_payload(3));
        let err = parse_all(&mut parser, &cluster.finish()).unwrap_err();
        assert!(matches!(err, WebmError::TimecodeBeforeCluster { track: 1, .. }));
        assert!(matches!(
            parse_all(&mut parser, &[0x00]),
            Err(WebmError::ParserFailed)
        ));
    }

    #[test]
    fn test_cross_track_interleave_and_equal_timestamps() {
        let mut parser = WebmStreamParser::new();
        parse_all(&mut parser, &InitSegment::default().build()).unwrap();

        let mut cluster = ClusterBuilder::new();
        cluster
            .set_cluster_timecode(0)
            .add_simple_block(AUDIO_TRACK, 20, FLAG_KEYFRAME, &block_payload(20))
            .add_simple_block(VIDEO_TRACK, 10, FLAG_KEYFRAME, &block_payload(10))
            .add_simple_block(VIDEO_TRACK, 33, 0, &block_payload(33))
            .add_simple_block(VIDEO_TRACK, 33, 0, &block_payload(33))
            .add_simple_block(AUDIO_TRACK, 18, FLAG_KEYFRAME, &block_payload(18));
        let err = parse_all(&mut parser, &cluster.finish()).unwrap_err();
        assert!(matches!(
            err,
            WebmError::NonMonotonicTimecode {
                track: 1,
                previous: 20,
                current: 18
            }
        ));
    }

    #[test]
    fn test_garbage_and_ordering_errors() {
        let mut parser = WebmStreamParser::new();
        assert!(matches!(
            parse_all(&mut parser, &[0x00]),
            Err(WebmError::InvalidVint(0))
        ));

        let mut parser = WebmStreamParser::new();
        let mut cluster = ClusterBuilder::new();
        cluster.set_cluster_timecode(0);
        assert!(matches!(
            parse_all(&mut parser, &cluster.finish()),
            Err(WebmError::ClusterBeforeTracks)
        ));

        let mut parser = WebmStreamParser::new();
        parse_all(&mut parser, &InitSegment::default().build()).unwrap();
        let mut cluster = ClusterBuilder::new();
        cluster.add_simple_block(7, 0, FLAG_KEYFRAME, &[1]);
        assert!(matches!(
            parse_all(&mut parser, &cluster.finish()),
            Err(WebmError::UnknownTrack(7))
        ));
    }

    #[test]
    fn test_reset_drops_partial_cluster() {
        let mut parser = WebmStreamParser::new();
        parse_all(&mut parser, &InitSegment::default().build()).unwrap();
        let cluster = interleaved_cluster();
        parse_all(&mut parser, &cluster[..20]).unwrap();
        assert!(parser.is_parsing_cluster());

        parser.reset();
        assert!(!parser.is_parsing_cluster());
        let events = parse_all(&mut parser, &cluster).unwrap();
        assert_eq!(blocks(&events).len(), 6);
    }

    #[test]
    fn test_flush_releases_held_blocks() {
        let mut parser = WebmStreamParser::new();
        parse_all(&mut parser, &InitSegment::default().build()).unwrap();

        let mut cluster = ClusterBuilder::new();
        cluster
            .set_cluster_timecode(0)
            .add_simple_block(AUDIO_TRACK, 0, FLAG_KEYFRAME, &block_payload(0))
            .add_simple_block(VIDEO_TRACK, 0, FLAG_KEYFRAME, &block_payload(0))
            .add_simple_block(AUDIO_TRACK, 23, FLAG_KEYFRAME, &block_payload(23))
            .add_simple_block(VIDEO_TRACK, 33, 0, &block_payload(33));
        let events = parse_all(&mut parser, &cluster.finish_with_unknown_size()).unwrap();
        assert_eq!(
            blocks(&events),
            vec![
                (StreamType::Audio, 0, 23, true),
                (StreamType::Video, 0, 33, true),
            ]
        );

        let mut events = Vec::new();
        parser.flush(&mut events);
        assert!(!parser.is_parsing_cluster());
        assert_eq!(events.last(), Some(&ParserEvent::EndOfCluster));
        assert_eq!(
            blocks(&events),
            vec![
                (StreamType::Audio, 23, 23, true),
                (StreamType::Video, 33, 33, false),
            ]
        );

        let mut events = Vec::new();
        parser.flush(&mut events);
        assert!(events.is_empty());
    }

    #[test]
    fn test_flush_after_error_emits_nothing() {
        let mut parser = WebmStreamParser::new();
        parse_all(&mut parser, &InitSegment::default().build()).unwrap();
        let mut cluster = ClusterBuilder::new();
        cluster
            .set_cluster_timecode(0)
            .add_simple_block(AUDIO_TRACK, 0, FLAG_KEYFRAME, &block_payload(0))
            .add_simple_block(7, 0, FLAG_KEYFRAME, &[1]);
        assert!(parse_all(&mut parser, &cluster.finish_with_unknown_size()).is_err());

        let mut events = Vec::new();
        parser.flush(&mut events);
        assert!(events.is_empty());
    }

    #[test]
    fn test_block_timecode_overflow_is_an_error() {
        let mut parser = WebmStreamParser::new();
        parse_all(&mut parser, &InitSegment::default().build()).unwrap();

        let mut body = uint_element(elements::TIMECODE, i64::MAX as u64);
        body.extend(element(elements::SIMPLE_BLOCK, &[0x81, 0x00, 0x05, 0x80, 0xAB]));
        let err = parse_all(&mut parser, &element(elements::CLUSTER, &body)).unwrap_err();
        assert!(matches!(
            err,
            WebmError::InvalidValue {
                element: "Timecode",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_oversized_elements() {
        let mut parser = WebmStreamParser::with_config(ParserConfig {
            max_element_size: 16,
        });
        let err = parse_all(&mut parser, &InitSegment::default().build()).unwrap_err();
        assert!(matches!(err, WebmError::ElementTooLarge { .. }));
    }

    #[test]
    fn test_rejects_foreign_doc_type() {
        let mut body = uint_element(elements::EBML_VERSION, 1);
        body.extend(string_element(elements::DOC_TYPE, "mp4"));
        let mut parser = WebmStreamParser::new();
        assert!(matches!(
            parse_all(&mut parser, &element(elements::EBML, &body)),
            Err(WebmError::UnsupportedDocType(doc)) if doc == "mp4"
        ));
    }
}
