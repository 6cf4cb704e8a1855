//! Decoder configuration snapshots.
//!
//! The demuxer never interprets codec payloads; configurations are compared by
//! value only, which is what [`AudioDecoderConfig::matches`] and
//! [`VideoDecoderConfig::matches`] expose.

use std::fmt;

use bytes::Bytes;

use crate::{Resolution, StreamType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    Vorbis,
    Opus,
}

impl AudioCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Vorbis => "vorbis",
            AudioCodec::Opus => "opus",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    Vp8,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::Vp8 => "vp8",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Av1 => "av1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Interleaved signed 16-bit.
    S16,
    /// Interleaved 32-bit float.
    F32,
    /// One plane of 32-bit float per channel.
    PlanarF32,
}

impl SampleFormat {
    pub fn bits_per_sample(&self) -> u32 {
        match self {
            SampleFormat::S16 => 16,
            SampleFormat::F32 | SampleFormat::PlanarF32 => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Surround,
    Quad,
    Surround5_1,
    Surround7_1,
    Discrete(u8),
}

impl ChannelLayout {
    /// Default layout for a plain channel count.
    pub fn from_channel_count(channels: u8) -> Self {
        match channels {
            1 => ChannelLayout::Mono,
            2 => ChannelLayout::Stereo,
            3 => ChannelLayout::Surround,
            4 => ChannelLayout::Quad,
            6 => ChannelLayout::Surround5_1,
            8 => ChannelLayout::Surround7_1,
            n => ChannelLayout::Discrete(n),
        }
    }

    pub fn channel_count(&self) -> u8 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::Surround => 3,
            ChannelLayout::Quad => 4,
            ChannelLayout::Surround5_1 => 6,
            ChannelLayout::Surround7_1 => 8,
            ChannelLayout::Discrete(n) => *n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AudioDecoderConfig {
    pub codec: AudioCodec,
    pub sample_format: SampleFormat,
    pub channel_layout: ChannelLayout,
    pub samples_per_second: u32,
    /// Opaque codec private data (Vorbis headers, OpusHead).
    pub extra_data: Bytes,
    pub is_encrypted: bool,
}

impl AudioDecoderConfig {
    pub fn bits_per_channel(&self) -> u32 {
        self.sample_format.bits_per_sample()
    }

    /// Value equality of every decoding parameter.
    pub fn matches(&self, other: &AudioDecoderConfig) -> bool {
        self == other
    }
}

impl fmt::Display for AudioDecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}Hz {}ch",
            self.codec.as_str(),
            self.samples_per_second,
            self.channel_layout.channel_count()
        )?;
        if self.is_encrypted {
            f.write_str(" (encrypted)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoDecoderConfig {
    pub codec: VideoCodec,
    pub coded_size: Resolution,
    pub natural_size: Resolution,
    pub extra_data: Bytes,
    pub is_encrypted: bool,
}

impl VideoDecoderConfig {
    /// Value equality of every decoding parameter.
    pub fn matches(&self, other: &VideoDecoderConfig) -> bool {
        self == other
    }
}

impl fmt::Display for VideoDecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.codec.as_str(), self.coded_size)?;
        if self.natural_size != self.coded_size {
            write!(f, " (display {})", self.natural_size)?;
        }
        if self.is_encrypted {
            f.write_str(" (encrypted)")?;
        }
        Ok(())
    }
}

/// Either kind of configuration, as carried by a demuxed buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DecoderConfig {
    Audio(AudioDecoderConfig),
    Video(VideoDecoderConfig),
}

impl DecoderConfig {
    pub fn stream_type(&self) -> StreamType {
        match self {
            DecoderConfig::Audio(_) => StreamType::Audio,
            DecoderConfig::Video(_) => StreamType::Video,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioDecoderConfig> {
        match self {
            DecoderConfig::Audio(config) => Some(config),
            DecoderConfig::Video(_) => None,
        }
    }

    pub fn as_video(&self) -> Option<&VideoDecoderConfig> {
        match self {
            DecoderConfig::Video(config) => Some(config),
            DecoderConfig::Audio(_) => None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        match self {
            DecoderConfig::Audio(config) => config.is_encrypted,
            DecoderConfig::Video(config) => config.is_encrypted,
        }
    }
}

impl From<AudioDecoderConfig> for DecoderConfig {
    fn from(config: AudioDecoderConfig) -> Self {
        DecoderConfig::Audio(config)
    }
}

impl From<VideoDecoderConfig> for DecoderConfig {
    fn from(config: VideoDecoderConfig) -> Self {
        DecoderConfig::Video(config)
    }
}

impl fmt::Display for DecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderConfig::Audio(config) => fmt::Display::fmt(config, f),
            DecoderConfig::Video(config) => fmt::Display::fmt(config, f),
        }
    }
}
