//! Shared media domain values used by the WebM parser and the chunk demuxer.

mod config;
mod time;

pub use config::{
    AudioCodec, AudioDecoderConfig, ChannelLayout, DecoderConfig, SampleFormat, VideoCodec,
    VideoDecoderConfig,
};
pub use time::TimeDelta;

/// Video resolution information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    #[inline]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A resolution with a zero dimension cannot be decoded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Kind of elementary stream carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Audio,
    Video,
}

impl StreamType {
    pub const ALL: [StreamType; 2] = [StreamType::Audio, StreamType::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Audio => "audio",
            StreamType::Video => "video",
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_display() {
        let r = Resolution::new(1920, 1080);
        assert_eq!(r.to_string(), "1920x1080");
    }

    #[test]
    fn test_resolution_equality() {
        assert_eq!(Resolution::new(1, 2), Resolution::new(1, 2));
        assert_ne!(Resolution::new(1, 2), Resolution::new(2, 1));
    }

    #[test]
    fn test_resolution_empty() {
        assert!(Resolution::new(0, 240).is_empty());
        assert!(!Resolution::new(320, 240).is_empty());
    }

    #[test]
    fn test_stream_type_display() {
        assert_eq!(StreamType::Audio.to_string(), "audio");
        assert_eq!(StreamType::Video.to_string(), "video");
    }
}
