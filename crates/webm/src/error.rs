use thiserror::Error;

/// Errors produced while parsing a WebM byte stream.
///
/// Every variant is fatal for the stream being parsed: once the parser has
/// returned an error it refuses further input until [`reset`] is called.
///
/// [`reset`]: crate::WebmStreamParser::reset
#[derive(Debug, Error)]
pub enum WebmError {
    #[error("Invalid EBML variable-length integer (leading byte {0:#04x})")]
    InvalidVint(u8),

    #[error("Element {id:#x} has unknown size, which is not allowed here")]
    UnknownSizeNotAllowed { id: u32 },

    #[error("Element {id:#x} of {size} bytes exceeds the {limit} byte limit")]
    ElementTooLarge { id: u32, size: u64, limit: usize },

    #[error("Element {id:#x} overruns its parent element")]
    ElementOverflow { id: u32 },

    #[error("Unexpected element {id:#x} in {context}")]
    UnexpectedElement { id: u32, context: &'static str },

    #[error("Invalid {element} value: {reason}")]
    InvalidValue {
        element: &'static str,
        reason: String,
    },

    #[error("Missing required element {0}")]
    MissingElement(&'static str),

    #[error("Unsupported DocType {0:?}")]
    UnsupportedDocType(String),

    #[error("Unsupported codec {0:?}")]
    UnsupportedCodec(String),

    #[error("Duplicate track number {0}")]
    DuplicateTrack(u64),

    #[error("Cluster found before Tracks")]
    ClusterBeforeTracks,

    #[error("Block found before the cluster Timecode")]
    BlockBeforeTimecode,

    #[error("Block references unknown track {0}")]
    UnknownTrack(u64),

    #[error("Laced blocks are not supported (track {0})")]
    LacingNotSupported(u64),

    #[error("Block header is truncated")]
    TruncatedBlock,

    #[error("Track {track}: relative timecode {relative} precedes the cluster timecode")]
    TimecodeBeforeCluster { track: u64, relative: i16 },

    #[error("Track {track}: timecode {current} after {previous} is not monotonic")]
    NonMonotonicTimecode {
        track: u64,
        previous: i64,
        current: i64,
    },

    #[error("Parser is in a failed state")]
    ParserFailed,
}

pub type Result<T> = std::result::Result<T, WebmError>;
