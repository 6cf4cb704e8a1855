use thiserror::Error;

/// Synchronous errors returned by [`ChunkDemuxer`](crate::ChunkDemuxer) calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DemuxerError {
    /// The content type or codec list cannot be demuxed.
    #[error("Unsupported content type or codecs: {0}")]
    NotSupported(String),

    /// No slot is left for another source of this kind, or initialization has
    /// already completed.
    #[error("Reached source id limit")]
    ReachedIdLimit,

    #[error("Source id {0:?} is already registered")]
    DuplicateId(String),

    /// Unknown source id, including ids whose source has been removed.
    #[error("Source id {0:?} not found")]
    NotFound(String),

    /// The source is in the middle of a cluster.
    #[error("Source {0:?} is parsing a media segment")]
    ParsingMediaSegment(String),

    #[error("Demuxer has been shut down")]
    ShutDown,
}

/// Asynchronous pipeline status reported through handles and the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Initialization did not produce the declared streams.
    #[error("Could not open demuxer")]
    CouldNotOpen,

    /// Malformed input or a timestamp ordering violation.
    #[error("Decode error")]
    Decode,

    #[error("Network error")]
    Network,

    /// The operation was cancelled before it completed.
    #[error("Aborted")]
    Aborted,
}

/// Outcome of a pipeline operation; also the argument to
/// [`ChunkDemuxer::end_of_stream`](crate::ChunkDemuxer::end_of_stream).
pub type PipelineStatus = std::result::Result<(), PipelineError>;

pub type Result<T> = std::result::Result<T, DemuxerError>;

/// Why a source stopped being parsed.
#[derive(Debug, Error)]
pub(crate) enum SourceFailure {
    #[error(transparent)]
    Parse(#[from] webm::WebmError),

    #[error("tracks (audio {has_audio}, video {has_video}) do not match the declared content")]
    TracksMismatch { has_audio: bool, has_video: bool },

    #[error("timestamp {0} is negative after applying the source offset")]
    NegativeTimestamp(media_types::TimeDelta),
}
