use media_types::TimeDelta;
use webm::ParserConfig;

/// Configuration for [`ChunkDemuxer`](crate::ChunkDemuxer).
#[derive(Debug, Clone)]
pub struct DemuxerConfig {
    /// Label prefixed to log lines.
    pub name: String,

    /// Multiplier applied to the largest gap seen between consecutive
    /// buffers of a stream. Buffers closer together than the result are
    /// considered contiguous.
    pub fudge_factor: i64,

    /// Lower bound for the contiguity slack.
    pub min_fudge_room: TimeDelta,

    /// Settings for each source's WebM parser.
    pub parser: ParserConfig,
}

impl Default for DemuxerConfig {
    fn default() -> Self {
        Self {
            name: "ChunkDemuxer".to_string(),
            fudge_factor: 2,
            min_fudge_room: TimeDelta::ZERO,
            parser: ParserConfig::default(),
        }
    }
}

impl DemuxerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_fudge_factor(mut self, factor: i64) -> Self {
        self.fudge_factor = factor.max(0);
        self
    }

    pub fn with_min_fudge_room(mut self, room: TimeDelta) -> Self {
        self.min_fudge_room = room;
        self
    }

    pub fn with_max_element_size(mut self, size: usize) -> Self {
        self.parser.max_element_size = size;
        self
    }
}
