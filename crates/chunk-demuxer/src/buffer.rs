use std::sync::Arc;

use bytes::Bytes;
use media_types::{DecoderConfig, TimeDelta};

/// One demuxed frame handed to a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderBuffer {
    pub timestamp: TimeDelta,
    pub duration: TimeDelta,
    pub keyframe: bool,
    pub data: Bytes,
    /// Configuration that was active when the buffer was appended.
    pub config: Arc<DecoderConfig>,
}

impl DecoderBuffer {
    /// `timestamp + duration`.
    pub fn end(&self) -> TimeDelta {
        self.timestamp + self.duration
    }
}

/// Result of a read on a demuxer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRead {
    Buffer(DecoderBuffer),
    /// No more data will be delivered at the current position.
    EndOfStream,
    /// The next buffer uses a new configuration; fetch it from
    /// [`ChunkDemuxer::stream_config`](crate::ChunkDemuxer::stream_config)
    /// and read again.
    ConfigChanged,
    /// The read was cancelled by a seek or a failure.
    Aborted,
}

/// Status portion of a [`StreamRead`]. End of stream is a successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    ConfigChanged,
    Aborted,
}

impl StreamRead {
    pub fn status(&self) -> ReadStatus {
        match self {
            StreamRead::Buffer(_) | StreamRead::EndOfStream => ReadStatus::Ok,
            StreamRead::ConfigChanged => ReadStatus::ConfigChanged,
            StreamRead::Aborted => ReadStatus::Aborted,
        }
    }

    pub fn buffer(&self) -> Option<&DecoderBuffer> {
        match self {
            StreamRead::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn into_buffer(self) -> Option<DecoderBuffer> {
        match self {
            StreamRead::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, StreamRead::EndOfStream)
    }

    pub fn timestamp(&self) -> Option<TimeDelta> {
        self.buffer().map(|b| b.timestamp)
    }
}
