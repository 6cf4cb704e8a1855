//! Content type and codec validation for source registration.

use media_types::StreamType;

use crate::error::{DemuxerError, Result};

struct CodecPattern {
    pattern: &'static str,
    stream: StreamType,
}

const fn codec(pattern: &'static str, stream: StreamType) -> CodecPattern {
    CodecPattern { pattern, stream }
}

const AUDIO_WEBM_CODECS: &[CodecPattern] = &[
    codec("vorbis", StreamType::Audio),
    codec("opus", StreamType::Audio),
];

const VIDEO_WEBM_CODECS: &[CodecPattern] = &[
    codec("vp8", StreamType::Video),
    codec("vp8.0", StreamType::Video),
    codec("vp9", StreamType::Video),
    codec("vp9.0", StreamType::Video),
    codec("vp09.*", StreamType::Video),
    codec("av01.*", StreamType::Video),
    codec("vorbis", StreamType::Audio),
    codec("opus", StreamType::Audio),
];

impl CodecPattern {
    fn matches(&self, codec: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => codec.len() > prefix.len() && codec.starts_with(prefix),
            None => codec == self.pattern,
        }
    }
}

/// Which elementary streams a registered source is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceKind {
    pub has_audio: bool,
    pub has_video: bool,
}

/// Validates a content type and its codec list, returning the streams the
/// source will carry.
pub fn source_kind(content_type: &str, codecs: &[&str]) -> Result<SourceKind> {
    let not_supported =
        || DemuxerError::NotSupported(format!("{content_type}; codecs={}", codecs.join(",")));

    let table = match content_type.trim() {
        "audio/webm" => AUDIO_WEBM_CODECS,
        "video/webm" => VIDEO_WEBM_CODECS,
        _ => return Err(not_supported()),
    };
    if codecs.is_empty() {
        return Err(not_supported());
    }

    let mut kind = SourceKind::default();
    for codec in codecs {
        let codec = codec.trim();
        let pattern = table
            .iter()
            .find(|p| p.matches(codec))
            .ok_or_else(not_supported)?;
        match pattern.stream {
            StreamType::Audio => kind.has_audio = true,
            StreamType::Video => kind.has_video = true,
        }
    }
    Ok(kind)
}

/// Splits a MIME type such as `video/webm; codecs="vp8, vorbis"` into its
/// base type and codec list.
pub fn split_mime_type(mime: &str) -> (String, Vec<String>) {
    let mut parts = mime.split(';');
    let base = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let codecs = parts
        .filter_map(|p| p.trim().strip_prefix("codecs="))
        .flat_map(|list| list.trim_matches('"').split(','))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    (base, codecs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("video/webm", &["vp8"], false, true)]
    #[case("video/webm", &["vp8.0"], false, true)]
    #[case("video/webm", &["vp8", "vorbis"], true, true)]
    #[case("video/webm", &["vp9", "opus"], true, true)]
    #[case("video/webm", &["vp09.00.10.08"], false, true)]
    #[case("video/webm", &["av01.0.04M.08", "opus"], true, true)]
    #[case("video/webm", &["vorbis"], true, false)]
    #[case("audio/webm", &["vorbis"], true, false)]
    #[case("audio/webm", &["opus"], true, false)]
    fn test_supported(
        #[case] content_type: &str,
        #[case] codecs: &[&str],
        #[case] has_audio: bool,
        #[case] has_video: bool,
    ) {
        let kind = source_kind(content_type, codecs).unwrap();
        assert_eq!(
            kind,
            SourceKind {
                has_audio,
                has_video
            }
        );
    }

    #[rstest]
    #[case("audio/webm", &["vp8"])]
    #[case("audio/webm", &[])]
    #[case("video/webm", &["vp09"])]
    #[case("video/webm", &["h264"])]
    #[case("video/mp4", &["avc1.4D4041", "mp4a.40.2"])]
    #[case("audio/mp4", &["mp4a.40.2"])]
    #[case("text/plain", &["vorbis"])]
    fn test_not_supported(#[case] content_type: &str, #[case] codecs: &[&str]) {
        assert!(matches!(
            source_kind(content_type, codecs),
            Err(DemuxerError::NotSupported(_))
        ));
    }

    #[test]
    fn test_split_mime_type() {
        let (base, codecs) = split_mime_type("Video/WebM; codecs=\"vp8, vorbis\"");
        assert_eq!(base, "video/webm");
        assert_eq!(codecs, vec!["vp8".to_string(), "vorbis".to_string()]);

        let (base, codecs) = split_mime_type("audio/webm");
        assert_eq!(base, "audio/webm");
        assert!(codecs.is_empty());
    }
}
