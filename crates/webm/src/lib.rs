//! # WebM
//!
//! Incremental parser for WebM byte streams as produced by live or segmented
//! sources. Data may be handed to [`WebmStreamParser::parse`] in arbitrarily
//! sized pieces; the parser keeps any partial element buffered and produces
//! the same [`ParserEvent`] sequence regardless of how the input was split.
//!
//! The parser understands the EBML header, Segment Info, Tracks and Clusters
//! (SimpleBlock and BlockGroup). Seek heads, cues, tags and other metadata
//! elements are skipped without being buffered.
//!
//! ## Example
//!
//! ```ignore
//! let mut parser = WebmStreamParser::new();
//! let mut events = Vec::new();
//! parser.parse(&chunk, &mut events)?;
//! for event in events.drain(..) {
//!     // forward tracks and blocks to the demuxer
//! }
//! ```

mod block;
mod cluster;
pub mod ebml;
pub mod elements;
mod error;
mod info;
mod parser;
mod tracks;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use block::FLAG_KEYFRAME;
pub use cluster::ParsedBlock;
pub use error::{Result, WebmError};
pub use info::SegmentInfo;
pub use parser::{ParserConfig, ParserEvent, WebmStreamParser};
pub use tracks::{AudioTrack, TrackSlot, Tracks, VideoTrack};
