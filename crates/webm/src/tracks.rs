//! Tracks element parsing and decoder configuration building.

use bytes::Bytes;
use media_types::{
    AudioCodec, AudioDecoderConfig, ChannelLayout, Resolution, SampleFormat, StreamType,
    TimeDelta, VideoCodec, VideoDecoderConfig,
};
use tracing::debug;

use crate::ebml;
use crate::elements;
use crate::error::{Result, WebmError};

/// Matroska default for SamplingFrequency.
const DEFAULT_SAMPLING_FREQUENCY: f64 = 8000.0;
/// Opus always decodes at 48 kHz regardless of the input rate.
const OPUS_OUTPUT_RATE: u32 = 48_000;

/// Raw fields of one TrackEntry.
#[derive(Debug, Default)]
struct TrackEntry {
    number: u64,
    track_type: u64,
    codec_id: String,
    codec_private: Bytes,
    default_duration_ns: Option<u64>,
    video: Option<VideoSettings>,
    audio: Option<AudioSettings>,
    key_id: Option<Bytes>,
}

#[derive(Debug, Default)]
struct VideoSettings {
    pixel_width: u64,
    pixel_height: u64,
    display_width: Option<u64>,
    display_height: Option<u64>,
}

#[derive(Debug)]
struct AudioSettings {
    sampling_frequency: f64,
    channels: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sampling_frequency: DEFAULT_SAMPLING_FREQUENCY,
            channels: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub number: u64,
    pub config: AudioDecoderConfig,
    pub default_duration: Option<TimeDelta>,
    /// ContentEncKeyID of an encrypted track.
    pub key_id: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTrack {
    pub number: u64,
    pub config: VideoDecoderConfig,
    pub default_duration: Option<TimeDelta>,
    pub key_id: Option<Bytes>,
}

/// How blocks of a given track number are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSlot {
    Stream(StreamType),
    /// A known track the demuxer does not deliver (subtitles, extra audio).
    Ignored,
}

/// The audio and video tracks of a Tracks element.
///
/// Only the first audio and the first video track are used; blocks of any
/// other declared track are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tracks {
    pub audio: Option<AudioTrack>,
    pub video: Option<VideoTrack>,
    ignored: Vec<u64>,
}

impl Tracks {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut tracks = Tracks::default();
        let mut seen = Vec::new();

        for child in ebml::children(body) {
            let (id, data) = child?;
            if id != elements::TRACK_ENTRY {
                continue;
            }
            let entry = parse_track_entry(data)?;
            if entry.number == 0 {
                return Err(WebmError::InvalidValue {
                    element: "TrackNumber",
                    reason: "zero".into(),
                });
            }
            if seen.contains(&entry.number) {
                return Err(WebmError::DuplicateTrack(entry.number));
            }
            seen.push(entry.number);

            match entry.track_type {
                elements::TRACK_TYPE_AUDIO if tracks.audio.is_none() => {
                    tracks.audio = Some(build_audio_track(entry)?);
                }
                elements::TRACK_TYPE_VIDEO if tracks.video.is_none() => {
                    tracks.video = Some(build_video_track(entry)?);
                }
                track_type => {
                    debug!(
                        "Ignoring track {} (type {}, codec {})",
                        entry.number, track_type, entry.codec_id
                    );
                    tracks.ignored.push(entry.number);
                }
            }
        }
        Ok(tracks)
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }

    /// Routing for a block's track number, `None` if the track was never declared.
    pub fn slot(&self, number: u64) -> Option<TrackSlot> {
        if self.audio.as_ref().is_some_and(|t| t.number == number) {
            Some(TrackSlot::Stream(StreamType::Audio))
        } else if self.video.as_ref().is_some_and(|t| t.number == number) {
            Some(TrackSlot::Stream(StreamType::Video))
        } else if self.ignored.contains(&number) {
            Some(TrackSlot::Ignored)
        } else {
            None
        }
    }

    pub fn default_duration(&self, stream: StreamType) -> Option<TimeDelta> {
        match stream {
            StreamType::Audio => self.audio.as_ref().and_then(|t| t.default_duration),
            StreamType::Video => self.video.as_ref().and_then(|t| t.default_duration),
        }
    }

    /// Key ids of encrypted tracks, audio first.
    pub fn key_ids(&self) -> impl Iterator<Item = (StreamType, &Bytes)> {
        let audio = self
            .audio
            .as_ref()
            .and_then(|t| t.key_id.as_ref())
            .map(|k| (StreamType::Audio, k));
        let video = self
            .video
            .as_ref()
            .and_then(|t| t.key_id.as_ref())
            .map(|k| (StreamType::Video, k));
        audio.into_iter().chain(video)
    }
}

fn parse_track_entry(body: &[u8]) -> Result<TrackEntry> {
    let mut entry = TrackEntry::default();
    for child in ebml::children(body) {
        let (id, data) = child?;
        match id {
            elements::TRACK_NUMBER => entry.number = ebml::read_uint(data)?,
            elements::TRACK_TYPE => entry.track_type = ebml::read_uint(data)?,
            elements::CODEC_ID => entry.codec_id = ebml::read_string(data),
            elements::CODEC_PRIVATE => entry.codec_private = Bytes::copy_from_slice(data),
            elements::DEFAULT_DURATION => {
                entry.default_duration_ns = Some(ebml::read_uint(data)?);
            }
            elements::VIDEO => entry.video = Some(parse_video(data)?),
            elements::AUDIO => entry.audio = Some(parse_audio(data)?),
            elements::CONTENT_ENCODINGS => entry.key_id = parse_content_encodings(data)?,
            _ => {}
        }
    }
    Ok(entry)
}

fn parse_video(body: &[u8]) -> Result<VideoSettings> {
    let mut video = VideoSettings::default();
    for child in ebml::children(body) {
        let (id, data) = child?;
        match id {
            elements::PIXEL_WIDTH => video.pixel_width = ebml::read_uint(data)?,
            elements::PIXEL_HEIGHT => video.pixel_height = ebml::read_uint(data)?,
            elements::DISPLAY_WIDTH => video.display_width = Some(ebml::read_uint(data)?),
            elements::DISPLAY_HEIGHT => video.display_height = Some(ebml::read_uint(data)?),
            _ => {}
        }
    }
    Ok(video)
}

fn parse_audio(body: &[u8]) -> Result<AudioSettings> {
    let mut audio = AudioSettings::default();
    for child in ebml::children(body) {
        let (id, data) = child?;
        match id {
            elements::SAMPLING_FREQUENCY => audio.sampling_frequency = ebml::read_float(data)?,
            elements::CHANNELS => audio.channels = ebml::read_uint(data)?,
            _ => {}
        }
    }
    Ok(audio)
}

/// Returns the key id of the first ContentEncryption found.
fn parse_content_encodings(body: &[u8]) -> Result<Option<Bytes>> {
    for child in ebml::children(body) {
        let (id, encoding) = child?;
        if id != elements::CONTENT_ENCODING {
            continue;
        }
        for child in ebml::children(encoding) {
            let (id, encryption) = child?;
            if id != elements::CONTENT_ENCRYPTION {
                continue;
            }
            for child in ebml::children(encryption) {
                let (id, data) = child?;
                if id == elements::CONTENT_ENC_KEY_ID && !data.is_empty() {
                    return Ok(Some(Bytes::copy_from_slice(data)));
                }
            }
        }
    }
    Ok(None)
}

fn default_duration(entry: &TrackEntry) -> Option<TimeDelta> {
    entry
        .default_duration_ns
        .filter(|&ns| ns > 0)
        .map(|ns| TimeDelta::from_micros((ns / 1_000) as i64))
}

fn build_audio_track(entry: TrackEntry) -> Result<AudioTrack> {
    let settings = entry.audio.as_ref();
    let rate = settings.map_or(DEFAULT_SAMPLING_FREQUENCY, |a| a.sampling_frequency);
    let channels = settings.map_or(1, |a| a.channels);

    if !(rate.is_finite() && rate >= 1.0) {
        return Err(WebmError::InvalidValue {
            element: "SamplingFrequency",
            reason: rate.to_string(),
        });
    }
    let channels = u8::try_from(channels)
        .ok()
        .filter(|&c| c > 0)
        .ok_or_else(|| WebmError::InvalidValue {
            element: "Channels",
            reason: channels.to_string(),
        })?;

    let (codec, sample_format, samples_per_second) = match entry.codec_id.as_str() {
        "A_VORBIS" => {
            if entry.codec_private.is_empty() {
                return Err(WebmError::MissingElement("CodecPrivate"));
            }
            (AudioCodec::Vorbis, SampleFormat::PlanarF32, rate as u32)
        }
        "A_OPUS" => (AudioCodec::Opus, SampleFormat::F32, OPUS_OUTPUT_RATE),
        other => return Err(WebmError::UnsupportedCodec(other.to_string())),
    };

    Ok(AudioTrack {
        number: entry.number,
        default_duration: default_duration(&entry),
        config: AudioDecoderConfig {
            codec,
            sample_format,
            channel_layout: ChannelLayout::from_channel_count(channels),
            samples_per_second,
            extra_data: entry.codec_private,
            is_encrypted: entry.key_id.is_some(),
        },
        key_id: entry.key_id,
    })
}

fn build_video_track(entry: TrackEntry) -> Result<VideoTrack> {
    let codec = match entry.codec_id.as_str() {
        "V_VP8" => VideoCodec::Vp8,
        "V_VP9" => VideoCodec::Vp9,
        "V_AV1" => VideoCodec::Av1,
        other => return Err(WebmError::UnsupportedCodec(other.to_string())),
    };
    let settings = entry.video.as_ref().ok_or(WebmError::MissingElement("Video"))?;

    let dimension = |value: u64, element: &'static str| {
        u32::try_from(value)
            .ok()
            .filter(|&v| v > 0)
            .ok_or_else(|| WebmError::InvalidValue {
                element,
                reason: value.to_string(),
            })
    };
    let coded_size = Resolution::new(
        dimension(settings.pixel_width, "PixelWidth")?,
        dimension(settings.pixel_height, "PixelHeight")?,
    );
    let natural_size = Resolution::new(
        match settings.display_width {
            Some(w) => dimension(w, "DisplayWidth")?,
            None => coded_size.width,
        },
        match settings.display_height {
            Some(h) => dimension(h, "DisplayHeight")?,
            None => coded_size.height,
        },
    );

    Ok(VideoTrack {
        number: entry.number,
        default_duration: default_duration(&entry),
        config: VideoDecoderConfig {
            codec,
            coded_size,
            natural_size,
            extra_data: entry.codec_private,
            is_encrypted: entry.key_id.is_some(),
        },
        key_id: entry.key_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        element, opus_track_entry, string_element, tracks_body, uint_element, vorbis_track_entry,
        vp8_track_entry, TrackOptions,
    };

    #[test]
    fn test_audio_and_video() {
        let body = tracks_body(&[
            vorbis_track_entry(1, &TrackOptions::default()),
            vp8_track_entry(2, 320, 240, &TrackOptions::default()),
        ]);
        let tracks = Tracks::parse(&body).unwrap();

        let audio = tracks.audio.as_ref().unwrap();
        assert_eq!(audio.config.codec, AudioCodec::Vorbis);
        assert_eq!(audio.config.sample_format, SampleFormat::PlanarF32);
        assert_eq!(audio.config.samples_per_second, 44_100);
        assert_eq!(audio.config.channel_layout, ChannelLayout::Stereo);
        assert!(!audio.config.is_encrypted);

        let video = tracks.video.as_ref().unwrap();
        assert_eq!(video.config.coded_size, Resolution::new(320, 240));
        assert_eq!(video.config.natural_size, Resolution::new(320, 240));

        assert_eq!(tracks.slot(1), Some(TrackSlot::Stream(StreamType::Audio)));
        assert_eq!(tracks.slot(2), Some(TrackSlot::Stream(StreamType::Video)));
        assert_eq!(tracks.slot(3), None);
    }

    #[test]
    fn test_encrypted_tracks_report_key_ids() {
        let options = TrackOptions {
            key_id: Some(b"audio-key".to_vec()),
            ..Default::default()
        };
        let video_options = TrackOptions {
            key_id: Some(b"video-key".to_vec()),
            ..Default::default()
        };
        let body = tracks_body(&[
            vorbis_track_entry(1, &options),
            vp8_track_entry(2, 320, 240, &video_options),
        ]);
        let tracks = Tracks::parse(&body).unwrap();
        assert!(tracks.audio.as_ref().unwrap().config.is_encrypted);
        assert!(tracks.video.as_ref().unwrap().config.is_encrypted);

        let keys: Vec<_> = tracks.key_ids().map(|(s, k)| (s, k.to_vec())).collect();
        assert_eq!(
            keys,
            vec![
                (StreamType::Audio, b"audio-key".to_vec()),
                (StreamType::Video, b"video-key".to_vec())
            ]
        );
    }

    #[test]
    fn test_opus_decodes_at_48k() {
        let body = tracks_body(&[opus_track_entry(1, &TrackOptions::default())]);
        let tracks = Tracks::parse(&body).unwrap();
        let audio = tracks.audio.unwrap();
        assert_eq!(audio.config.codec, AudioCodec::Opus);
        assert_eq!(audio.config.samples_per_second, 48_000);
        assert!(tracks.video.is_none());
    }

    #[test]
    fn test_default_duration() {
        let options = TrackOptions {
            default_duration_ns: Some(33_000_000),
            ..Default::default()
        };
        let body = tracks_body(&[vp8_track_entry(1, 320, 240, &options)]);
        let tracks = Tracks::parse(&body).unwrap();
        assert_eq!(
            tracks.default_duration(StreamType::Video),
            Some(TimeDelta::from_millis(33))
        );
        assert_eq!(tracks.default_duration(StreamType::Audio), None);
    }

    #[test]
    fn test_extra_tracks_are_ignored() {
        let mut subtitle = uint_element(elements::TRACK_NUMBER, 3);
        subtitle.extend(uint_element(elements::TRACK_TYPE, 0x11));
        subtitle.extend(string_element(elements::CODEC_ID, "S_TEXT/WEBVTT"));
        let body = tracks_body(&[
            vorbis_track_entry(1, &TrackOptions::default()),
            opus_track_entry(2, &TrackOptions::default()),
            element(elements::TRACK_ENTRY, &subtitle),
        ]);
        let tracks = Tracks::parse(&body).unwrap();
        assert_eq!(tracks.audio.as_ref().unwrap().number, 1);
        assert_eq!(tracks.slot(2), Some(TrackSlot::Ignored));
        assert_eq!(tracks.slot(3), Some(TrackSlot::Ignored));
    }

    #[test]
    fn test_rejects_unsupported_codec_and_duplicates() {
        let mut entry = uint_element(elements::TRACK_NUMBER, 1);
        entry.extend(uint_element(elements::TRACK_TYPE, elements::TRACK_TYPE_VIDEO));
        entry.extend(string_element(elements::CODEC_ID, "V_MPEG4/ISO/AVC"));
        let body = tracks_body(&[element(elements::TRACK_ENTRY, &entry)]);
        assert!(matches!(
            Tracks::parse(&body),
            Err(WebmError::UnsupportedCodec(id)) if id == "V_MPEG4/ISO/AVC"
        ));

        let body = tracks_body(&[
            vorbis_track_entry(1, &TrackOptions::default()),
            vp8_track_entry(1, 320, 240, &TrackOptions::default()),
        ]);
        assert!(matches!(
            Tracks::parse(&body),
            Err(WebmError::DuplicateTrack(1))
        ));
    }

    #[test]
    fn test_vorbis_requires_private_data() {
        let options = TrackOptions {
            codec_private: Some(Vec::new()),
            ..Default::default()
        };
        let body = tracks_body(&[vorbis_track_entry(1, &options)]);
        assert!(matches!(
            Tracks::parse(&body),
            Err(WebmError::MissingElement("CodecPrivate"))
        ));
    }
}
