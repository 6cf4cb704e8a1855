//! Drives a [`ChunkDemuxer`] over one file and collects per-stream statistics.

use std::fmt;
use std::sync::Arc;

use chunk_demuxer::{
    ChunkDemuxer, DemuxerConfig, DemuxerHost, PipelineError, Ranges, StreamRead, StreamType,
    TimeDelta, split_mime_type,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

const SOURCE_ID: &str = "probe";

pub struct ProbeOptions {
    pub mime_type: String,
    pub chunk_size: usize,
    pub seek: Option<TimeDelta>,
    /// Print every delivered buffer.
    pub dump: bool,
}

/// Host that logs notifications and keeps the reported errors.
struct ProbeHost {
    errors: Arc<Mutex<Vec<PipelineError>>>,
}

impl DemuxerHost for ProbeHost {
    fn set_duration(&mut self, duration: TimeDelta) {
        info!("Duration: {} ms", duration);
    }

    fn on_demuxer_error(&mut self, error: PipelineError) {
        warn!("Demuxer reported {}", error);
        self.errors.lock().push(error);
    }

    fn on_buffered_ranges_changed(&mut self, ranges: &Ranges<TimeDelta>) {
        debug!("Buffered {}", ranges);
    }

    fn on_need_key(&mut self, init_data_type: &str, init_data: &[u8]) {
        info!(
            "Encrypted track ({}, {} bytes of init data)",
            init_data_type,
            init_data.len()
        );
    }
}

#[derive(Debug, Default)]
pub struct StreamSummary {
    pub buffers: usize,
    pub keyframes: usize,
    pub bytes: usize,
    pub config_changes: usize,
    pub first: Option<TimeDelta>,
    pub last_end: Option<TimeDelta>,
    /// The reader stopped at a gap instead of reaching end of stream.
    pub stalled: bool,
}

impl fmt::Display for StreamSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} buffers ({} keyframes, {} bytes)",
            self.buffers, self.keyframes, self.bytes
        )?;
        if let (Some(first), Some(end)) = (self.first, self.last_end) {
            write!(f, ", [{first}, {end}) ms")?;
        }
        if self.config_changes > 0 {
            write!(f, ", {} config changes", self.config_changes)?;
        }
        if self.stalled {
            f.write_str(", stalled at a gap")?;
        }
        Ok(())
    }
}

pub struct ProbeReport {
    pub duration: TimeDelta,
    pub buffered: Ranges<TimeDelta>,
    pub streams: Vec<(StreamType, StreamSummary)>,
    pub errors: Vec<PipelineError>,
}

pub async fn probe(name: &str, data: &[u8], options: &ProbeOptions) -> Result<ProbeReport> {
    let (content_type, codecs) = split_mime_type(&options.mime_type);
    let codecs: Vec<&str> = codecs.iter().map(String::as_str).collect();
    if options.chunk_size == 0 {
        return Err(AppError::InvalidInput("chunk size must be positive".into()));
    }

    let mut demuxer = ChunkDemuxer::new(DemuxerConfig::default().with_name(name));
    demuxer.add_source(SOURCE_ID, &content_type, &codecs)?;

    let errors = Arc::new(Mutex::new(Vec::new()));
    let init = demuxer.initialize(Box::new(ProbeHost {
        errors: errors.clone(),
    }));

    for chunk in data.chunks(options.chunk_size) {
        demuxer.append(SOURCE_ID, chunk)?;
    }
    debug!(
        "Appended {} bytes in chunks of {}",
        data.len(),
        options.chunk_size
    );
    demuxer.end_of_stream(Ok(()));

    let duration = init.await?;

    if let Some(time) = options.seek {
        demuxer.start_waiting_for_seek();
        let mut seek = demuxer.seek(time);
        match seek.try_result() {
            Some(status) => status?,
            None => {
                return Err(AppError::InvalidInput(format!(
                    "seek target {time} ms is not buffered"
                )));
            }
        }
    }

    let mut streams = Vec::new();
    for stream_type in StreamType::ALL {
        if demuxer.has_stream(stream_type) {
            streams.push((stream_type, summarize(&mut demuxer, stream_type, options.dump)));
        }
    }

    let buffered = demuxer.buffered_ranges();
    let duration = demuxer.duration().unwrap_or(duration);
    demuxer.shutdown();

    let errors = errors.lock().clone();
    Ok(ProbeReport {
        duration,
        buffered,
        streams,
        errors,
    })
}

/// Reads a stream to its end. All data is already appended, so every read
/// resolves immediately unless the stream has a gap.
fn summarize(demuxer: &mut ChunkDemuxer, stream_type: StreamType, dump: bool) -> StreamSummary {
    let mut summary = StreamSummary::default();
    loop {
        match demuxer.read(stream_type).try_result() {
            Some(StreamRead::Buffer(buffer)) => {
                if dump {
                    println!(
                        "{stream_type} {:>10} {:>8} {:>6} {}",
                        buffer.timestamp,
                        buffer.duration,
                        buffer.data.len(),
                        if buffer.keyframe { "K" } else { "" }
                    );
                }
                summary.buffers += 1;
                summary.bytes += buffer.data.len();
                if buffer.keyframe {
                    summary.keyframes += 1;
                }
                summary.first.get_or_insert(buffer.timestamp);
                summary.last_end = summary.last_end.max(Some(buffer.end()));
            }
            Some(StreamRead::ConfigChanged) => {
                summary.config_changes += 1;
                if let Some(config) = demuxer.stream_config(stream_type) {
                    info!("{} configuration changed: {}", stream_type, config);
                }
            }
            Some(StreamRead::EndOfStream) | Some(StreamRead::Aborted) => break,
            None => {
                summary.stalled = true;
                break;
            }
        }
    }
    summary
}
