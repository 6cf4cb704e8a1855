use media_types::TimeDelta;
use webm::{ParserConfig, WebmStreamParser};

use crate::codecs::SourceKind;

/// A registered append target.
pub(crate) struct Source {
    pub id: String,
    pub kind: SourceKind,
    pub parser: WebmStreamParser,
    /// Added to every timestamp parsed from this source.
    pub timestamp_offset: TimeDelta,
    /// Duration announced by the source's Info element.
    pub duration: Option<TimeDelta>,
    /// Tracks were parsed and matched the declared kind.
    pub initialized: bool,
    /// A decode error stopped this source; further appends are dropped.
    pub failed: bool,
}

impl Source {
    pub fn new(id: &str, kind: SourceKind, parser: ParserConfig) -> Self {
        Self {
            id: id.to_string(),
            kind,
            parser: WebmStreamParser::with_config(parser),
            timestamp_offset: TimeDelta::ZERO,
            duration: None,
            initialized: false,
            failed: false,
        }
    }
}
