//! The demuxer controller.
//!
//! [`ChunkDemuxer`] owns the registered sources and the audio/video streams.
//! All operations take `&mut self`; asynchronous results are delivered
//! through handles that resolve when a later call (an append, a seek, end of
//! stream or shutdown) makes the answer known.

use std::collections::HashMap;
use std::sync::Arc;

use media_types::{DecoderConfig, StreamType, TimeDelta};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use webm::{ParserEvent, Tracks};

use crate::arena::{Arena, SlotHandle};
use crate::buffer::StreamRead;
use crate::codecs::{SourceKind, source_kind};
use crate::config::DemuxerConfig;
use crate::error::{DemuxerError, PipelineError, PipelineStatus, Result, SourceFailure};
use crate::handle::{InitHandle, ReadHandle, SeekHandle};
use crate::host::DemuxerHost;
use crate::ranges::Ranges;
use crate::source::Source;
use crate::stream::ChunkDemuxerStream;

/// Lifecycle of a [`ChunkDemuxer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxerState {
    /// Sources may be registered; `initialize` has not been called.
    Created,
    /// Waiting for every source's initialization segment.
    Initializing,
    Initialized,
    /// `end_of_stream(Ok)` was signalled; a new append reopens.
    Ended,
    /// A fatal error was reported. Buffered data remains readable.
    Error,
    Shutdown,
}

/// Timestamps appended to each stream during one append call.
#[derive(Debug, Default)]
struct Appended {
    audio: Option<TimeDelta>,
    video: Option<TimeDelta>,
}

impl Appended {
    fn record(&mut self, stream: StreamType, timestamp: TimeDelta) {
        let slot = match stream {
            StreamType::Audio => &mut self.audio,
            StreamType::Video => &mut self.video,
        };
        *slot = Some(slot.map_or(timestamp, |t| t.max(timestamp)));
    }

    fn get(&self, stream: StreamType) -> Option<TimeDelta> {
        match stream {
            StreamType::Audio => self.audio,
            StreamType::Video => self.video,
        }
    }
}

pub struct ChunkDemuxer {
    config: DemuxerConfig,
    state: DemuxerState,
    host: Option<Box<dyn DemuxerHost>>,
    init_reply: Option<oneshot::Sender<std::result::Result<TimeDelta, PipelineError>>>,
    seek_reply: Option<oneshot::Sender<PipelineStatus>>,
    cancel_next_seek: bool,
    sources: Arena<Source>,
    source_ids: HashMap<String, SlotHandle>,
    audio_source: Option<SlotHandle>,
    video_source: Option<SlotHandle>,
    audio: Option<ChunkDemuxerStream>,
    video: Option<ChunkDemuxerStream>,
    /// Unknown until initialization completes.
    duration: Option<TimeDelta>,
    reported_ranges: Ranges<TimeDelta>,
}

impl Default for ChunkDemuxer {
    fn default() -> Self {
        Self::new(DemuxerConfig::default())
    }
}

impl ChunkDemuxer {
    pub fn new(config: DemuxerConfig) -> Self {
        Self {
            config,
            state: DemuxerState::Created,
            host: None,
            init_reply: None,
            seek_reply: None,
            cancel_next_seek: false,
            sources: Arena::new(),
            source_ids: HashMap::new(),
            audio_source: None,
            video_source: None,
            audio: None,
            video: None,
            duration: None,
            reported_ranges: Ranges::new(),
        }
    }

    pub fn state(&self) -> DemuxerState {
        self.state
    }

    /// Current duration, once initialization has completed.
    pub fn duration(&self) -> Option<TimeDelta> {
        self.duration
    }

    pub fn config(&self) -> &DemuxerConfig {
        &self.config
    }

    /// Starts initialization. The handle resolves with the initial duration
    /// once every registered source has delivered matching Tracks, or with
    /// `CouldNotOpen` if that cannot happen.
    pub fn initialize(&mut self, host: Box<dyn DemuxerHost>) -> InitHandle {
        if self.state != DemuxerState::Created {
            warn!(
                "{}: initialize called in state {:?}",
                self.config.name, self.state
            );
            return InitHandle::ready(Err(PipelineError::CouldNotOpen));
        }
        debug!("{}: initializing", self.config.name);
        let (reply, handle) = InitHandle::channel();
        self.host = Some(host);
        self.init_reply = Some(reply);
        self.state = DemuxerState::Initializing;
        self.maybe_complete_init();
        handle
    }

    /// Registers a source for `content_type` with the given codecs.
    pub fn add_source(&mut self, id: &str, content_type: &str, codecs: &[&str]) -> Result<()> {
        if self.state == DemuxerState::Shutdown {
            return Err(DemuxerError::ShutDown);
        }
        let kind = source_kind(content_type, codecs)?;

        if !matches!(
            self.state,
            DemuxerState::Created | DemuxerState::Initializing
        ) {
            return Err(DemuxerError::ReachedIdLimit);
        }
        if self.source_ids.contains_key(id) {
            return Err(DemuxerError::DuplicateId(id.to_string()));
        }
        if (kind.has_audio && self.audio_source.is_some())
            || (kind.has_video && self.video_source.is_some())
        {
            return Err(DemuxerError::ReachedIdLimit);
        }

        let handle = self
            .sources
            .insert(Source::new(id, kind, self.config.parser.clone()));
        self.source_ids.insert(id.to_string(), handle);
        if kind.has_audio {
            self.audio_source = Some(handle);
        }
        if kind.has_video {
            self.video_source = Some(handle);
        }
        info!(
            "{}: added source {} ({}; audio {}, video {})",
            self.config.name, id, content_type, kind.has_audio, kind.has_video
        );
        Ok(())
    }

    /// Removes a source. Its streams are shut down and its capacity slot is
    /// freed.
    pub fn remove_source(&mut self, id: &str) -> Result<()> {
        let handle = self.lookup(id)?;
        self.source_ids.remove(id);
        self.sources.remove(handle);
        info!("{}: removed source {}", self.config.name, id);

        if self.audio_source == Some(handle) {
            self.audio_source = None;
            if let Some(stream) = self.audio.as_mut() {
                stream.shutdown();
            }
        }
        if self.video_source == Some(handle) {
            self.video_source = None;
            if let Some(stream) = self.video.as_mut() {
                stream.shutdown();
            }
        }
        self.maybe_complete_init();
        self.check_pending_seek();
        self.notify_ranges_changed();
        Ok(())
    }

    fn lookup(&self, id: &str) -> Result<SlotHandle> {
        self.source_ids
            .get(id)
            .copied()
            .filter(|&handle| self.sources.get(handle).is_some())
            .ok_or_else(|| DemuxerError::NotFound(id.to_string()))
    }

    /// Appends bytes to a source.
    ///
    /// Parse failures are not returned here: before initialization completes
    /// they fail initialization, afterwards they are reported to the host.
    pub fn append(&mut self, id: &str, data: &[u8]) -> Result<()> {
        if self.state == DemuxerState::Shutdown {
            return Err(DemuxerError::ShutDown);
        }
        let handle = self.lookup(id)?;
        if data.is_empty() {
            return Ok(());
        }

        let mut events = Vec::new();
        let parsed = {
            let Some(source) = self.sources.get_mut(handle) else {
                return Err(DemuxerError::NotFound(id.to_string()));
            };
            if source.failed {
                debug!(
                    "{}: dropping {} bytes for failed source {}",
                    self.config.name,
                    data.len(),
                    id
                );
                return Ok(());
            }
            source.parser.parse(data, &mut events)
        };

        if self.state == DemuxerState::Ended {
            debug!("{}: append after end of stream, reopening", self.config.name);
            self.state = DemuxerState::Initialized;
            for stream in self.streams_mut() {
                stream.cancel_end_of_stream();
            }
        }

        let mut appended = Appended::default();
        let mut result = parsed.map_err(SourceFailure::from);
        for event in events {
            if let Err(failure) = self.handle_event(handle, event, &mut appended) {
                result = Err(failure);
                break;
            }
        }
        if let Err(failure) = result {
            self.fail_source(handle, failure);
        }

        self.increase_duration_if_necessary(&appended);
        self.fulfill_reads();
        self.check_pending_seek();
        self.notify_ranges_changed();
        Ok(())
    }

    /// Admits blocks that open clusters were still holding back.
    fn flush_sources(&mut self) {
        let open: Vec<SlotHandle> = self
            .sources
            .iter()
            .filter(|(_, s)| !s.failed && s.parser.is_parsing_cluster())
            .map(|(handle, _)| handle)
            .collect();

        let mut appended = Appended::default();
        for handle in open {
            let mut events = Vec::new();
            if let Some(source) = self.sources.get_mut(handle) {
                debug!(
                    "{}: end of stream while {} is inside a cluster",
                    self.config.name, source.id
                );
                source.parser.flush(&mut events);
            }
            for event in events {
                if let Err(failure) = self.handle_event(handle, event, &mut appended) {
                    self.fail_source(handle, failure);
                    break;
                }
            }
        }
        self.increase_duration_if_necessary(&appended);
    }

    fn handle_event(
        &mut self,
        handle: SlotHandle,
        event: ParserEvent,
        appended: &mut Appended,
    ) -> std::result::Result<(), SourceFailure> {
        match event {
            ParserEvent::Info(info) => {
                if let Some(source) = self.sources.get_mut(handle) {
                    source.duration = Some(info.duration());
                }
            }
            ParserEvent::Tracks(tracks) => self.on_tracks(handle, tracks)?,
            ParserEvent::NewCluster => {
                for stream_type in StreamType::ALL {
                    if self.source_for(stream_type) == Some(handle)
                        && let Some(stream) = self.stream_mut(stream_type)
                    {
                        stream.start_media_segment();
                    }
                }
            }
            ParserEvent::Block(block) => {
                if self.source_for(block.stream) != Some(handle) {
                    return Ok(());
                }
                let offset = self
                    .sources
                    .get(handle)
                    .map_or(TimeDelta::ZERO, |s| s.timestamp_offset);
                let timestamp = block.timestamp + offset;
                if timestamp.is_negative() {
                    return Err(SourceFailure::NegativeTimestamp(timestamp));
                }
                if let Some(stream) = self.stream_mut(block.stream) {
                    stream.append(timestamp, block.duration, block.keyframe, block.data);
                    appended.record(block.stream, timestamp);
                }
            }
            ParserEvent::EndOfCluster => {
                trace!("{}: end of cluster", self.config.name);
            }
        }
        Ok(())
    }

    fn on_tracks(
        &mut self,
        handle: SlotHandle,
        tracks: Tracks,
    ) -> std::result::Result<(), SourceFailure> {
        let Some(source) = self.sources.get_mut(handle) else {
            return Ok(());
        };
        let found = SourceKind {
            has_audio: tracks.has_audio(),
            has_video: tracks.has_video(),
        };
        if found != source.kind || tracks.is_empty() {
            return Err(SourceFailure::TracksMismatch {
                has_audio: found.has_audio,
                has_video: found.has_video,
            });
        }
        let first_init = !source.initialized;
        source.initialized = true;
        let source_id = source.id.clone();

        let configs = [
            tracks
                .audio
                .as_ref()
                .map(|t| DecoderConfig::Audio(t.config.clone())),
            tracks
                .video
                .as_ref()
                .map(|t| DecoderConfig::Video(t.config.clone())),
        ];
        for config in configs.into_iter().flatten() {
            let stream_type = config.stream_type();
            if first_init {
                debug!(
                    "{}: creating {} stream ({})",
                    self.config.name, stream_type, config
                );
                let stream = ChunkDemuxerStream::new(config, &self.config);
                match stream_type {
                    StreamType::Audio => self.audio = Some(stream),
                    StreamType::Video => self.video = Some(stream),
                }
            } else if let Some(stream) = self.stream_mut(stream_type) {
                stream.update_config(config);
            }
        }

        for (stream_type, key_id) in tracks.key_ids() {
            debug!(
                "{}: {} track of source {} is encrypted",
                self.config.name, stream_type, source_id
            );
            if let Some(host) = self.host.as_mut() {
                host.on_need_key("webm", key_id);
            }
        }

        if first_init {
            info!("{}: source {} initialized", self.config.name, source_id);
            self.maybe_complete_init();
        }
        Ok(())
    }

    fn fail_source(&mut self, handle: SlotHandle, failure: SourceFailure) {
        let Some(source) = self.sources.get_mut(handle) else {
            return;
        };
        source.failed = true;
        warn!(
            "{}: source {} failed: {}",
            self.config.name, source.id, failure
        );
        self.report_error(PipelineError::Decode);
    }

    /// Completes initialization once every source has its streams.
    fn maybe_complete_init(&mut self) {
        if self.state != DemuxerState::Initializing
            || self.sources.is_empty()
            || self.sources.iter().any(|(_, s)| !s.initialized)
        {
            return;
        }

        let duration = self
            .sources
            .iter()
            .map(|(_, s)| s.duration.unwrap_or(TimeDelta::INFINITE))
            .max()
            .unwrap_or(TimeDelta::INFINITE);
        self.state = DemuxerState::Initialized;
        info!(
            "{}: initialized with duration {}",
            self.config.name, duration
        );
        self.update_duration(duration);
        if let Some(reply) = self.init_reply.take() {
            let _ = reply.send(Ok(duration));
        }
    }

    fn report_error(&mut self, error: PipelineError) {
        if self.state == DemuxerState::Shutdown {
            return;
        }
        let initializing = matches!(
            self.state,
            DemuxerState::Created | DemuxerState::Initializing
        );
        self.state = DemuxerState::Error;

        if initializing {
            warn!("{}: initialization failed ({})", self.config.name, error);
            if let Some(reply) = self.init_reply.take() {
                let _ = reply.send(Err(PipelineError::CouldNotOpen));
            }
        } else {
            warn!("{}: reporting {}", self.config.name, error);
            if let Some(host) = self.host.as_mut() {
                host.on_demuxer_error(error);
            }
        }
        if let Some(reply) = self.seek_reply.take() {
            let _ = reply.send(Err(error));
        }
    }

    /// Sets the offset added to timestamps of subsequently parsed blocks.
    /// Refused while the source is inside a cluster.
    pub fn set_timestamp_offset(&mut self, id: &str, offset: TimeDelta) -> Result<()> {
        if self.state == DemuxerState::Shutdown {
            return Err(DemuxerError::ShutDown);
        }
        let handle = self.lookup(id)?;
        let Some(source) = self.sources.get_mut(handle) else {
            return Err(DemuxerError::NotFound(id.to_string()));
        };
        if source.parser.is_parsing_cluster() {
            return Err(DemuxerError::ParsingMediaSegment(id.to_string()));
        }
        debug!(
            "{}: timestamp offset of {} set to {}",
            self.config.name, id, offset
        );
        source.timestamp_offset = offset;
        Ok(())
    }

    /// Discards a source's partially parsed data, including blocks of the
    /// current cluster that have not been delivered yet.
    pub fn abort(&mut self, id: &str) -> Result<()> {
        if self.state == DemuxerState::Shutdown {
            return Err(DemuxerError::ShutDown);
        }
        let handle = self.lookup(id)?;
        if let Some(source) = self.sources.get_mut(handle) {
            source.parser.reset();
        }
        Ok(())
    }

    /// Aborts in-flight reads ahead of a seek. Reads resolve as aborted until
    /// [`seek`](Self::seek) is called.
    pub fn start_waiting_for_seek(&mut self) {
        if self.state == DemuxerState::Shutdown {
            return;
        }
        debug!("{}: waiting for seek", self.config.name);
        for stream in self.streams_mut() {
            stream.abort_reads();
        }
    }

    /// Aborts in-flight reads and the pending seek. Without a pending seek,
    /// the next `seek` completes immediately without moving the streams.
    pub fn cancel_pending_seek(&mut self) {
        if self.state == DemuxerState::Shutdown {
            return;
        }
        for stream in self.streams_mut() {
            stream.abort_reads();
        }
        match self.seek_reply.take() {
            Some(reply) => {
                debug!("{}: pending seek cancelled", self.config.name);
                let _ = reply.send(Err(PipelineError::Aborted));
            }
            None => self.cancel_next_seek = true,
        }
    }

    /// Moves every stream to `time`. Reads wait until every stream can be
    /// served from there; the handle resolves at that point.
    pub fn seek(&mut self, time: TimeDelta) -> SeekHandle {
        if matches!(self.state, DemuxerState::Shutdown | DemuxerState::Error) {
            return SeekHandle::ready(Err(PipelineError::Aborted));
        }
        if let Some(previous) = self.seek_reply.take() {
            let _ = previous.send(Err(PipelineError::Aborted));
        }
        if self.cancel_next_seek {
            self.cancel_next_seek = false;
            debug!("{}: seek to {} skipped after cancel", self.config.name, time);
            for stream in self.streams_mut() {
                stream.start_returning_data();
            }
            return SeekHandle::ready(Ok(()));
        }

        debug!("{}: seek to {}", self.config.name, time);
        for stream in self.streams_mut() {
            stream.seek(time);
            stream.start_returning_data();
        }
        let (reply, handle) = SeekHandle::channel();
        self.seek_reply = Some(reply);
        self.check_pending_seek();
        handle
    }

    fn check_pending_seek(&mut self) {
        if self.seek_reply.is_none() || !self.streams().all(|s| s.can_satisfy_seek()) {
            return;
        }
        if let Some(reply) = self.seek_reply.take() {
            debug!("{}: seek completed", self.config.name);
            let _ = reply.send(Ok(()));
        }
        self.fulfill_reads();
    }

    pub fn is_seek_pending(&self) -> bool {
        self.seek_reply.is_some()
    }

    /// Signals that no more data will be appended, or that the stream failed.
    pub fn end_of_stream(&mut self, status: PipelineStatus) {
        match self.state {
            DemuxerState::Shutdown | DemuxerState::Error => return,
            DemuxerState::Created | DemuxerState::Initializing => {
                warn!(
                    "{}: end of stream before initialization completed",
                    self.config.name
                );
                self.report_error(status.err().unwrap_or(PipelineError::CouldNotOpen));
                return;
            }
            DemuxerState::Initialized | DemuxerState::Ended => {}
        }
        if let Err(error) = status {
            self.report_error(error);
            return;
        }

        self.flush_sources();
        if self.state == DemuxerState::Error {
            return;
        }

        self.state = DemuxerState::Ended;
        for stream in self.streams_mut() {
            stream.mark_end_of_stream();
        }

        if let Some((_, end)) = self.buffered_ranges().last()
            && self.duration != Some(end)
        {
            self.update_duration(end);
        }

        self.fulfill_reads();
        self.check_pending_seek();
        self.notify_ranges_changed();
    }

    /// Shuts everything down. Pending reads resolve as end of stream, a
    /// pending seek as aborted and pending initialization as failed.
    pub fn shutdown(&mut self) {
        if self.state == DemuxerState::Shutdown {
            return;
        }
        info!("{}: shutting down", self.config.name);
        for stream in self.streams_mut() {
            stream.shutdown();
        }
        for source in self.sources.values_mut() {
            source.parser.reset();
        }
        if let Some(reply) = self.seek_reply.take() {
            let _ = reply.send(Err(PipelineError::Aborted));
        }
        if let Some(reply) = self.init_reply.take() {
            let _ = reply.send(Err(PipelineError::CouldNotOpen));
        }
        self.state = DemuxerState::Shutdown;
        self.host = None;
    }

    /// Reads the next buffer of a stream. Missing or removed streams answer
    /// end of stream.
    pub fn read(&mut self, stream_type: StreamType) -> ReadHandle {
        let (reply, handle) = ReadHandle::channel();
        let fulfill = self.seek_reply.is_none();
        match self.stream_mut(stream_type) {
            Some(stream) => stream.read(reply, fulfill),
            None => {
                let _ = reply.send(StreamRead::EndOfStream);
            }
        }
        handle
    }

    /// Shuts a stream down without removing its source.
    pub fn disable_stream(&mut self, stream_type: StreamType) {
        if self.stream(stream_type).is_some() {
            info!("{}: disabling {} stream", self.config.name, stream_type);
        }
        if let Some(stream) = self.stream_mut(stream_type) {
            stream.shutdown();
        }
        self.check_pending_seek();
        self.notify_ranges_changed();
    }

    /// Whether a live stream of this type exists.
    pub fn has_stream(&self, stream_type: StreamType) -> bool {
        self.stream(stream_type).is_some()
    }

    /// Configuration the reader of `stream_type` should decode with.
    pub fn stream_config(&self, stream_type: StreamType) -> Option<Arc<DecoderConfig>> {
        self.stream(stream_type).map(|s| s.config().clone())
    }

    /// Combined ranges of every live stream.
    pub fn buffered_ranges(&self) -> Ranges<TimeDelta> {
        let streams: Vec<_> = self.streams().collect();
        self.combined_ranges(&streams)
    }

    /// Combined ranges of one source's streams.
    pub fn source_buffered_ranges(&self, id: &str) -> Result<Ranges<TimeDelta>> {
        let handle = self.lookup(id)?;
        let streams: Vec<_> = StreamType::ALL
            .into_iter()
            .filter(|&t| self.source_for(t) == Some(handle))
            .filter_map(|t| self.stream(t))
            .collect();
        Ok(self.combined_ranges(&streams))
    }

    /// Intersection of the streams' ranges. After end of stream the last
    /// range reaches the furthest stream end.
    fn combined_ranges(&self, streams: &[&ChunkDemuxerStream]) -> Ranges<TimeDelta> {
        let duration = self.duration.unwrap_or(TimeDelta::INFINITE);
        let mut iter = streams.iter();
        let Some(first) = iter.next() else {
            return Ranges::new();
        };
        let mut ranges = first.buffered_ranges(duration);
        let mut max_end = ranges.last().map(|(_, end)| end);
        for stream in iter {
            let other = stream.buffered_ranges(duration);
            max_end = max_end.max(other.last().map(|(_, end)| end));
            ranges = ranges.intersection_with(&other);
        }
        if self.state == DemuxerState::Ended
            && let Some(end) = max_end
        {
            ranges.set_last_end(end);
        }
        ranges
    }

    fn increase_duration_if_necessary(&mut self, appended: &Appended) {
        for stream_type in StreamType::ALL {
            let Some(duration) = self.duration else {
                return;
            };
            if duration.is_infinite() {
                return;
            }
            let Some(last) = appended.get(stream_type) else {
                continue;
            };
            if last <= duration {
                continue;
            }
            if let Some(end) = self.stream(stream_type).and_then(|s| s.buffered_end())
                && end > duration
            {
                self.update_duration(end);
            }
        }
    }

    fn update_duration(&mut self, duration: TimeDelta) {
        if self.duration == Some(duration) {
            return;
        }
        debug!("{}: duration changed to {}", self.config.name, duration);
        self.duration = Some(duration);
        if let Some(host) = self.host.as_mut() {
            host.set_duration(duration);
        }
    }

    fn fulfill_reads(&mut self) {
        if self.seek_reply.is_some() {
            return;
        }
        for stream in self.streams_mut() {
            stream.fulfill_pending_reads();
        }
    }

    fn notify_ranges_changed(&mut self) {
        let ranges = self.buffered_ranges();
        if ranges == self.reported_ranges {
            return;
        }
        trace!("{}: buffered {}", self.config.name, ranges);
        if let Some(host) = self.host.as_mut() {
            host.on_buffered_ranges_changed(&ranges);
        }
        self.reported_ranges = ranges;
    }

    fn source_for(&self, stream_type: StreamType) -> Option<SlotHandle> {
        match stream_type {
            StreamType::Audio => self.audio_source,
            StreamType::Video => self.video_source,
        }
    }

    fn stream(&self, stream_type: StreamType) -> Option<&ChunkDemuxerStream> {
        match stream_type {
            StreamType::Audio => self.audio.as_ref(),
            StreamType::Video => self.video.as_ref(),
        }
        .filter(|s| !s.is_shut_down())
    }

    fn stream_mut(&mut self, stream_type: StreamType) -> Option<&mut ChunkDemuxerStream> {
        match stream_type {
            StreamType::Audio => self.audio.as_mut(),
            StreamType::Video => self.video.as_mut(),
        }
    }

    fn streams(&self) -> impl Iterator<Item = &ChunkDemuxerStream> {
        self.audio
            .iter()
            .chain(self.video.iter())
            .filter(|s| !s.is_shut_down())
    }

    fn streams_mut(&mut self) -> impl Iterator<Item = &mut ChunkDemuxerStream> {
        self.audio.iter_mut().chain(self.video.iter_mut())
    }
}

impl Drop for ChunkDemuxer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
