//! Muxer configuration: caller options merged with the built-in defaults.
//!
//! [`MuxerOptions`] is what callers provide (every field optional, serde
//! friendly). [`MuxerOptions::resolve`] fills the gaps from the defaults
//! below and validates the result into a [`MuxerConfig`] snapshot. The
//! options value is never modified and there is no process-wide default
//! state.

use ms_common::{ChannelLayout, Rational, Resolution};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{RecorderError, RecorderResult};

pub const DEFAULT_OUTPUT: &str = "test.mp4";
pub const DEFAULT_AUDIO_BITRATE: u64 = 22_050;
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 22_050;
pub const DEFAULT_AUDIO_CHANNEL_LAYOUT: ChannelLayout = ChannelLayout::MONO;
pub const DEFAULT_VIDEO_BITRATE: u64 = 256_000;
pub const DEFAULT_VIDEO_WIDTH: u32 = 320;
pub const DEFAULT_VIDEO_HEIGHT: u32 = 240;
pub const DEFAULT_VIDEO_FRAME_RATE: u32 = 25;
/// Packet buffers shared by all streams.
pub const DEFAULT_POOL_SIZE: usize = 128;
pub const MAX_POOL_SIZE: usize = 16_384;

/// Caller-provided settings. `None` selects the default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MuxerOptions {
    pub output: Option<PathBuf>,
    /// Audio bitrate in bits/sec.
    pub audio_bitrate: Option<u64>,
    /// Speaker bitmask, see [`ChannelLayout`].
    pub audio_channel_layout: Option<ChannelLayout>,
    pub audio_sample_rate: Option<u32>,
    /// Video bitrate in bits/sec.
    pub video_bitrate: Option<u64>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    /// Integer frames per second.
    pub video_frame_rate: Option<u32>,
    /// Number of pooled packet buffers.
    pub pool_size: Option<usize>,
    pub enable_audio: Option<bool>,
    pub enable_video: Option<bool>,
}

/// Fully resolved, validated settings. Immutable once a muxer is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MuxerConfig {
    pub output: PathBuf,
    pub audio_bitrate: u64,
    pub audio_channel_layout: ChannelLayout,
    pub audio_sample_rate: u32,
    pub video_bitrate: u64,
    pub video_resolution: Resolution,
    pub video_frame_rate: Rational,
    pub pool_size: usize,
    pub enable_audio: bool,
    pub enable_video: bool,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT),
            audio_bitrate: DEFAULT_AUDIO_BITRATE,
            audio_channel_layout: DEFAULT_AUDIO_CHANNEL_LAYOUT,
            audio_sample_rate: DEFAULT_AUDIO_SAMPLE_RATE,
            video_bitrate: DEFAULT_VIDEO_BITRATE,
            video_resolution: Resolution::new(DEFAULT_VIDEO_WIDTH, DEFAULT_VIDEO_HEIGHT),
            video_frame_rate: Rational::new(DEFAULT_VIDEO_FRAME_RATE, 1),
            pool_size: DEFAULT_POOL_SIZE,
            enable_audio: true,
            enable_video: true,
        }
    }
}

/// Reject an explicit zero; absent values take the default.
fn positive<T>(value: Option<T>, default: T, field: &str) -> RecorderResult<T>
where
    T: PartialEq + Default,
{
    match value {
        Some(v) if v == T::default() => Err(RecorderError::Configuration(format!(
            "{} must be > 0",
            field
        ))),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}

/// Like [`positive`], but a disabled stream's fields are taken as given.
fn stream_field<T>(enabled: bool, value: Option<T>, default: T, field: &str) -> RecorderResult<T>
where
    T: PartialEq + Default,
{
    if enabled {
        positive(value, default, field)
    } else {
        Ok(value.unwrap_or(default))
    }
}

impl MuxerOptions {
    /// Merge with the defaults and validate. Fields of a disabled stream are
    /// not validated.
    pub fn resolve(&self) -> RecorderResult<MuxerConfig> {
        let defaults = MuxerConfig::default();
        let enable_audio = self.enable_audio.unwrap_or(true);
        let enable_video = self.enable_video.unwrap_or(true);
        if !enable_audio && !enable_video {
            return Err(RecorderError::Configuration(
                "At least one of audio or video must be enabled".to_string(),
            ));
        }

        let output = self.output.clone().unwrap_or(defaults.output);
        if output.as_os_str().is_empty() {
            return Err(RecorderError::Configuration(
                "Output path must not be empty".to_string(),
            ));
        }

        let audio_channel_layout = self
            .audio_channel_layout
            .unwrap_or(defaults.audio_channel_layout);
        if enable_audio && audio_channel_layout.is_empty() {
            return Err(RecorderError::Configuration(
                "Audio channel layout must name at least one channel".to_string(),
            ));
        }

        let width = stream_field(enable_video, self.video_width, DEFAULT_VIDEO_WIDTH, "video_width")?;
        let height = stream_field(
            enable_video,
            self.video_height,
            DEFAULT_VIDEO_HEIGHT,
            "video_height",
        )?;
        let video_resolution = Resolution::new(width, height);
        if enable_video && !video_resolution.is_even() {
            return Err(RecorderError::Configuration(format!(
                "Video resolution {} must have even width and height",
                video_resolution
            )));
        }

        let fps = stream_field(
            enable_video,
            self.video_frame_rate,
            DEFAULT_VIDEO_FRAME_RATE,
            "video_frame_rate",
        )?;

        let pool_size = positive(self.pool_size, DEFAULT_POOL_SIZE, "pool_size")?;
        if pool_size > MAX_POOL_SIZE {
            return Err(RecorderError::Configuration(format!(
                "pool_size {} exceeds the maximum of {}",
                pool_size, MAX_POOL_SIZE
            )));
        }

        Ok(MuxerConfig {
            output,
            audio_bitrate: stream_field(
                enable_audio,
                self.audio_bitrate,
                DEFAULT_AUDIO_BITRATE,
                "audio_bitrate",
            )?,
            audio_channel_layout,
            audio_sample_rate: stream_field(
                enable_audio,
                self.audio_sample_rate,
                DEFAULT_AUDIO_SAMPLE_RATE,
                "audio_sample_rate",
            )?,
            video_bitrate: stream_field(
                enable_video,
                self.video_bitrate,
                DEFAULT_VIDEO_BITRATE,
                "video_bitrate",
            )?,
            video_resolution,
            video_frame_rate: Rational::new(fps, 1),
            pool_size,
            enable_audio,
            enable_video,
        })
    }
}
