use media_types::TimeDelta;

use crate::error::PipelineError;
use crate::ranges::Ranges;

/// Receiver of demuxer notifications.
///
/// Calls are made synchronously from within the demuxer operation that
/// triggered them.
pub trait DemuxerHost: Send {
    /// The presentation duration changed. `TimeDelta::INFINITE` marks a live
    /// stream.
    fn set_duration(&mut self, duration: TimeDelta);

    /// A fatal error occurred after initialization.
    fn on_demuxer_error(&mut self, error: PipelineError);

    /// The combined buffered ranges changed.
    fn on_buffered_ranges_changed(&mut self, _ranges: &Ranges<TimeDelta>) {}

    /// An encrypted track was found. `init_data_type` names the format of
    /// `init_data` ("webm": the content key id).
    fn on_need_key(&mut self, _init_data_type: &str, _init_data: &[u8]) {}
}
