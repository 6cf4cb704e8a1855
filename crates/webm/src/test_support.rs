//! Shared WebM test builders.
//!
//! This module is available for local webm tests and optionally for
//! downstream crate tests when the `test-utils` feature is enabled.

use bytes::Bytes;

use crate::block::FLAG_KEYFRAME;
use crate::elements;

/// Size field meaning "unknown", as used by live Segments and Clusters.
pub const UNKNOWN_SIZE: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

pub fn write_id(out: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(3);
    out.extend_from_slice(&bytes[skip..]);
}

/// Writes `size` as the shortest vint that does not collide with the
/// unknown-size pattern.
pub fn write_size(out: &mut Vec<u8>, size: u64) {
    let width = (1..=8usize)
        .find(|&w| size < (1u64 << (7 * w)) - 1)
        .unwrap_or(8);
    let marked = size | (1u64 << (7 * width));
    out.extend_from_slice(&marked.to_be_bytes()[8 - width..]);
}

pub fn element(id: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 12);
    write_id(&mut out, id);
    write_size(&mut out, body.len() as u64);
    out.extend_from_slice(body);
    out
}

pub fn unknown_size_header(id: u32) -> Vec<u8> {
    let mut out = Vec::new();
    write_id(&mut out, id);
    out.extend_from_slice(&UNKNOWN_SIZE);
    out
}

pub fn uint_element(id: u32, value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    element(id, &bytes[skip..])
}

pub fn float_element(id: u32, value: f64) -> Vec<u8> {
    element(id, &value.to_be_bytes())
}

pub fn string_element(id: u32, value: &str) -> Vec<u8> {
    element(id, value.as_bytes())
}

pub fn ebml_header() -> Vec<u8> {
    let mut body = uint_element(elements::EBML_VERSION, 1);
    body.extend(uint_element(elements::EBML_READ_VERSION, 1));
    body.extend(uint_element(elements::EBML_MAX_ID_LENGTH, 4));
    body.extend(uint_element(elements::EBML_MAX_SIZE_LENGTH, 8));
    body.extend(string_element(elements::DOC_TYPE, "webm"));
    body.extend(uint_element(elements::DOC_TYPE_VERSION, 2));
    body.extend(uint_element(elements::DOC_TYPE_READ_VERSION, 2));
    element(elements::EBML, &body)
}

/// Info element with a 1ms timecode scale. `duration_ms` of `None` marks a
/// live stream.
pub fn info_element(duration_ms: Option<f64>) -> Vec<u8> {
    let mut body = uint_element(elements::TIMECODE_SCALE, 1_000_000);
    if let Some(duration) = duration_ms {
        body.extend(float_element(elements::DURATION, duration));
    }
    element(elements::INFO, &body)
}

/// Optional TrackEntry fields.
#[derive(Debug, Clone, Default)]
pub struct TrackOptions {
    /// Overrides the codec's default CodecPrivate.
    pub codec_private: Option<Vec<u8>>,
    pub default_duration_ns: Option<u64>,
    /// Adds ContentEncodings with this key id.
    pub key_id: Option<Vec<u8>>,
}

fn content_encodings(key_id: &[u8]) -> Vec<u8> {
    let mut encryption = uint_element(elements::CONTENT_ENC_ALGO, 5);
    encryption.extend(element(elements::CONTENT_ENC_KEY_ID, key_id));
    let encoding = element(elements::CONTENT_ENCRYPTION, &encryption);
    element(
        elements::CONTENT_ENCODINGS,
        &element(elements::CONTENT_ENCODING, &encoding),
    )
}

fn track_entry(
    number: u64,
    track_type: u64,
    codec_id: &str,
    default_private: &[u8],
    settings: Vec<u8>,
    options: &TrackOptions,
) -> Vec<u8> {
    let mut body = uint_element(elements::TRACK_NUMBER, number);
    body.extend(uint_element(elements::TRACK_UID, number));
    body.extend(uint_element(elements::TRACK_TYPE, track_type));
    body.extend(string_element(elements::CODEC_ID, codec_id));
    let private = options.codec_private.as_deref().unwrap_or(default_private);
    if !private.is_empty() {
        body.extend(element(elements::CODEC_PRIVATE, private));
    }
    if let Some(ns) = options.default_duration_ns {
        body.extend(uint_element(elements::DEFAULT_DURATION, ns));
    }
    body.extend(settings);
    if let Some(key_id) = &options.key_id {
        body.extend(content_encodings(key_id));
    }
    element(elements::TRACK_ENTRY, &body)
}

/// Stand-in for the three Vorbis setup headers.
pub const VORBIS_PRIVATE: &[u8] = &[0x02, 0x1E, 0x3C, 0x01, b'v', b'o', b'r', b'b', b'i', b's'];

pub fn vorbis_track_entry(number: u64, options: &TrackOptions) -> Vec<u8> {
    let mut audio = float_element(elements::SAMPLING_FREQUENCY, 44_100.0);
    audio.extend(uint_element(elements::CHANNELS, 2));
    track_entry(
        number,
        elements::TRACK_TYPE_AUDIO,
        "A_VORBIS",
        VORBIS_PRIVATE,
        element(elements::AUDIO, &audio),
        options,
    )
}

pub fn opus_track_entry(number: u64, options: &TrackOptions) -> Vec<u8> {
    let mut audio = float_element(elements::SAMPLING_FREQUENCY, 48_000.0);
    audio.extend(uint_element(elements::CHANNELS, 2));
    track_entry(
        number,
        elements::TRACK_TYPE_AUDIO,
        "A_OPUS",
        b"OpusHead",
        element(elements::AUDIO, &audio),
        options,
    )
}

pub fn vp8_track_entry(number: u64, width: u64, height: u64, options: &TrackOptions) -> Vec<u8> {
    video_track_entry(number, "V_VP8", width, height, options)
}

pub fn video_track_entry(
    number: u64,
    codec_id: &str,
    width: u64,
    height: u64,
    options: &TrackOptions,
) -> Vec<u8> {
    let mut video = uint_element(elements::PIXEL_WIDTH, width);
    video.extend(uint_element(elements::PIXEL_HEIGHT, height));
    track_entry(
        number,
        elements::TRACK_TYPE_VIDEO,
        codec_id,
        &[],
        element(elements::VIDEO, &video),
        options,
    )
}

pub fn tracks_body(entries: &[Vec<u8>]) -> Vec<u8> {
    entries.concat()
}

pub fn tracks_element(entries: &[Vec<u8>]) -> Vec<u8> {
    element(elements::TRACKS, &tracks_body(entries))
}

/// Track numbers used by [`InitSegment`].
pub const AUDIO_TRACK: u64 = 1;
pub const VIDEO_TRACK: u64 = 2;

/// Builder for an initialization segment: EBML header, an unknown-size
/// Segment header, Info and Tracks.
#[derive(Debug, Clone)]
pub struct InitSegment {
    pub audio: Option<TrackOptions>,
    pub video: Option<TrackOptions>,
    pub video_size: (u64, u64),
    pub duration_ms: Option<f64>,
}

impl Default for InitSegment {
    fn default() -> Self {
        Self {
            audio: Some(TrackOptions::default()),
            video: Some(TrackOptions::default()),
            video_size: (320, 240),
            duration_ms: Some(2744.0),
        }
    }
}

impl InitSegment {
    pub fn audio_only() -> Self {
        Self {
            video: None,
            ..Default::default()
        }
    }

    pub fn video_only() -> Self {
        Self {
            audio: None,
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration_ms: Option<f64>) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_video_size(mut self, width: u64, height: u64) -> Self {
        self.video_size = (width, height);
        self
    }

    pub fn with_audio_private(mut self, private: &[u8]) -> Self {
        if let Some(audio) = self.audio.as_mut() {
            audio.codec_private = Some(private.to_vec());
        }
        self
    }

    pub fn encrypted(mut self) -> Self {
        if let Some(audio) = self.audio.as_mut() {
            audio.key_id = Some(b"audio-key-id".to_vec());
        }
        if let Some(video) = self.video.as_mut() {
            video.key_id = Some(b"video-key-id".to_vec());
        }
        self
    }

    pub fn tracks(&self) -> Vec<u8> {
        let mut entries = Vec::new();
        if let Some(options) = &self.audio {
            entries.push(vorbis_track_entry(AUDIO_TRACK, options));
        }
        if let Some(options) = &self.video {
            let (width, height) = self.video_size;
            entries.push(vp8_track_entry(VIDEO_TRACK, width, height, options));
        }
        tracks_element(&entries)
    }

    pub fn build(&self) -> Bytes {
        let mut out = ebml_header();
        out.extend(unknown_size_header(elements::SEGMENT));
        out.extend(info_element(self.duration_ms));
        out.extend(self.tracks());
        Bytes::from(out)
    }
}

/// Builds one Cluster from blocks given with absolute timecodes.
#[derive(Debug, Default)]
pub struct ClusterBuilder {
    timecode: i64,
    children: Vec<u8>,
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cluster_timecode(&mut self, timecode: i64) -> &mut Self {
        self.timecode = timecode;
        self
    }

    fn block_body(&self, track: u64, timecode: i64, flags: u8, data: &[u8]) -> Vec<u8> {
        let relative = (timecode - self.timecode) as i16;
        let mut body = Vec::with_capacity(data.len() + 4);
        write_size(&mut body, track);
        body.extend_from_slice(&relative.to_be_bytes());
        body.push(flags);
        body.extend_from_slice(data);
        body
    }

    pub fn add_simple_block(
        &mut self,
        track: u64,
        timecode: i64,
        flags: u8,
        data: &[u8],
    ) -> &mut Self {
        let body = self.block_body(track, timecode, flags, data);
        self.children.extend(element(elements::SIMPLE_BLOCK, &body));
        self
    }

    /// Adds a BlockGroup with an explicit duration. Blocks without the
    /// keyframe flag get a ReferenceBlock.
    pub fn add_block_group(
        &mut self,
        track: u64,
        timecode: i64,
        duration: u64,
        flags: u8,
        data: &[u8],
    ) -> &mut Self {
        let block = self.block_body(track, timecode, 0, data);
        let mut group = element(elements::BLOCK, &block);
        group.extend(uint_element(elements::BLOCK_DURATION, duration));
        if flags & FLAG_KEYFRAME == 0 {
            group.extend(element(elements::REFERENCE_BLOCK, &[0xFF]));
        }
        self.children.extend(element(elements::BLOCK_GROUP, &group));
        self
    }

    fn body(&self) -> Vec<u8> {
        let mut body = uint_element(elements::TIMECODE, self.timecode as u64);
        body.extend_from_slice(&self.children);
        body
    }

    /// A cluster with a known size.
    pub fn finish(&self) -> Bytes {
        Bytes::from(element(elements::CLUSTER, &self.body()))
    }

    /// A cluster with an unknown size, terminated by whatever follows it.
    pub fn finish_with_unknown_size(&self) -> Bytes {
        let mut out = unknown_size_header(elements::CLUSTER);
        out.extend(self.body());
        Bytes::from(out)
    }
}

/// Payload used by the block builders: a few bytes derived from the timecode.
pub fn block_payload(timecode: i64) -> Vec<u8> {
    let t = timecode.to_be_bytes();
    vec![0xAB, t[6], t[7], 0xCD]
}
