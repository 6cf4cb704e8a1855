//! # Chunk Demuxer
//!
//! Demuxes WebM data that arrives in arbitrary chunks from one or more
//! sources and serves it as buffered audio and video streams.
//!
//! A source is registered with [`ChunkDemuxer::add_source`] and fed with
//! [`ChunkDemuxer::append`]. Once every source has delivered its tracks,
//! initialization resolves with the presentation duration. Readers pull
//! [`DecoderBuffer`]s through [`ChunkDemuxer::read`]; seeks, end of stream
//! and shutdown are coordinated across both streams.
//!
//! ## Example
//!
//! ```ignore
//! let mut demuxer = ChunkDemuxer::new(DemuxerConfig::default());
//! demuxer.add_source("main", "video/webm", &["vorbis", "vp8"])?;
//! let init = demuxer.initialize(Box::new(host));
//! demuxer.append("main", &chunk)?;
//! let duration = init.await?;
//! match demuxer.read(StreamType::Video).await {
//!     StreamRead::Buffer(buffer) => decode(buffer),
//!     other => handle(other),
//! }
//! ```

mod arena;
mod buffer;
mod codecs;
mod config;
mod demuxer;
mod error;
mod handle;
mod host;
mod ranges;
mod source;
mod stream;

pub use buffer::{DecoderBuffer, ReadStatus, StreamRead};
pub use codecs::{SourceKind, source_kind, split_mime_type};
pub use config::DemuxerConfig;
pub use demuxer::{ChunkDemuxer, DemuxerState};
pub use error::{DemuxerError, PipelineError, PipelineStatus, Result};
pub use handle::{Completion, Handle, InitHandle, ReadHandle, SeekHandle};
pub use host::DemuxerHost;
pub use ranges::Ranges;
pub use stream::ChunkDemuxerStream;

pub use media_types::{DecoderConfig, StreamType, TimeDelta};
