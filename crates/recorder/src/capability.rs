//! Encoder capabilities and the codec provider seam.
//!
//! Encoding itself happens upstream of the muxer; the recorder only needs to
//! know what an encoder accepts (to negotiate stream parameters) and to open
//! and close it alongside the container.

use ms_common::{
    AudioCodec, ChannelLayout, PixelFormat, Rational, SampleFormat, StreamDescriptor, StreamKind,
    VideoCodec,
};

use crate::error::RecorderResult;

/// Codec identity of an encoder.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CodecId {
    Audio(AudioCodec),
    Video(VideoCodec),
}

impl CodecId {
    pub fn kind(self) -> StreamKind {
        match self {
            Self::Audio(_) => StreamKind::Audio,
            Self::Video(_) => StreamKind::Video,
        }
    }
}

/// What one encoder supports. A `None` or empty list means "anything".
#[derive(Clone, Debug, PartialEq)]
pub struct CodecCapabilities {
    pub name: String,
    pub codec: CodecId,
    pub sample_rates: Option<Vec<u32>>,
    pub channel_layouts: Option<Vec<ChannelLayout>>,
    pub sample_formats: Option<Vec<SampleFormat>>,
    pub pixel_formats: Option<Vec<PixelFormat>>,
    pub frame_rates: Option<Vec<Rational>>,
    /// Options applied when the encoder is opened.
    pub default_options: Vec<(String, String)>,
}

impl CodecCapabilities {
    fn unrestricted(name: &str, codec: CodecId) -> Self {
        Self {
            name: name.to_string(),
            codec,
            sample_rates: None,
            channel_layouts: None,
            sample_formats: None,
            pixel_formats: None,
            frame_rates: None,
            default_options: Vec::new(),
        }
    }

    pub fn audio(name: &str, codec: AudioCodec) -> Self {
        Self::unrestricted(name, CodecId::Audio(codec))
    }

    pub fn video(name: &str, codec: VideoCodec) -> Self {
        Self::unrestricted(name, CodecId::Video(codec))
    }

    pub fn with_sample_rates(mut self, rates: &[u32]) -> Self {
        self.sample_rates = Some(rates.to_vec());
        self
    }

    pub fn with_channel_layouts(mut self, layouts: &[ChannelLayout]) -> Self {
        self.channel_layouts = Some(layouts.to_vec());
        self
    }

    pub fn with_sample_formats(mut self, formats: &[SampleFormat]) -> Self {
        self.sample_formats = Some(formats.to_vec());
        self
    }

    pub fn with_pixel_formats(mut self, formats: &[PixelFormat]) -> Self {
        self.pixel_formats = Some(formats.to_vec());
        self
    }

    pub fn with_frame_rates(mut self, rates: &[Rational]) -> Self {
        self.frame_rates = Some(rates.to_vec());
        self
    }

    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.default_options.push((key.to_string(), value.to_string()));
        self
    }
}

/// An opened encoder. Dropped only after [`CodecHandle::close`].
pub trait CodecHandle: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> StreamKind;

    /// Release the encoder. Calling it more than once is a no-op.
    fn close(&mut self);
}

/// Source of encoders for the muxer.
pub trait CodecProvider {
    /// The audio encoder for the output format, or `None` to skip audio.
    fn audio_encoder(&self) -> Option<CodecCapabilities>;

    /// The video encoder for the output format, or `None` to skip video.
    fn video_encoder(&self) -> Option<CodecCapabilities>;

    /// Open the encoder for a negotiated stream.
    fn open(&self, stream: &StreamDescriptor) -> RecorderResult<Box<dyn CodecHandle>>;
}

/// MPEG-4 audio sampling rates accepted by the AAC encoder.
pub const AAC_SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
    8_000, 7_350,
];

/// AAC audio + H.264 video, the pairing every capture file uses.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCodecs;

impl CodecProvider for DefaultCodecs {
    fn audio_encoder(&self) -> Option<CodecCapabilities> {
        Some(
            CodecCapabilities::audio("aac", AudioCodec::Aac)
                .with_sample_rates(&AAC_SAMPLE_RATES)
                .with_sample_formats(&[SampleFormat::FltP]),
        )
    }

    fn video_encoder(&self) -> Option<CodecCapabilities> {
        Some(
            CodecCapabilities::video("libx264", VideoCodec::H264)
                .with_pixel_formats(&[PixelFormat::Yuv420p])
                .with_option("preset", "fast")
                .with_option("profile", "baseline"),
        )
    }

    fn open(&self, stream: &StreamDescriptor) -> RecorderResult<Box<dyn CodecHandle>> {
        let name = match stream.kind() {
            StreamKind::Audio => "aac",
            StreamKind::Video => "libx264",
        };
        tracing::debug!(
            codec = name,
            options = ?stream.encoder_options,
            "Opened encoder"
        );
        Ok(Box::new(ExternalEncoder {
            name,
            kind: stream.kind(),
            open: true,
        }))
    }
}

/// Handle for an encoder that runs upstream of the muxer. Tracks open/closed
/// state only.
#[derive(Debug)]
struct ExternalEncoder {
    name: &'static str,
    kind: StreamKind,
    open: bool,
}

impl CodecHandle for ExternalEncoder {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            tracing::debug!(codec = self.name, kind = %self.kind, "Closed encoder");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_common::{Resolution, StreamParams};

    #[test]
    fn default_audio_is_aac_with_mpeg4_rates() {
        let caps = DefaultCodecs.audio_encoder().unwrap();
        assert_eq!(caps.codec, CodecId::Audio(AudioCodec::Aac));
        let rates = caps.sample_rates.unwrap();
        assert_eq!(rates.len(), 13);
        assert!(rates.contains(&22_050));
        assert_eq!(caps.sample_formats, Some(vec![SampleFormat::FltP]));
        assert!(caps.channel_layouts.is_none());
    }

    #[test]
    fn default_video_is_h264_baseline() {
        let caps = DefaultCodecs.video_encoder().unwrap();
        assert_eq!(caps.codec.kind(), StreamKind::Video);
        assert_eq!(
            caps.default_options,
            vec![
                ("preset".to_string(), "fast".to_string()),
                ("profile".to_string(), "baseline".to_string()),
            ]
        );
    }

    #[test]
    fn external_encoder_close_is_idempotent() {
        let stream = StreamDescriptor {
            index: 0,
            time_base: Rational::timebase(25),
            bit_rate: 1,
            params: StreamParams::Video {
                codec: VideoCodec::H264,
                resolution: Resolution::QVGA,
                frame_rate: Rational::FPS_25,
                gop_size: 25,
                pixel_format: PixelFormat::Yuv420p,
                max_b_frames: 0,
            },
            extradata: Vec::new(),
            global_header: true,
            encoder_options: Vec::new(),
        };
        let mut handle = DefaultCodecs.open(&stream).unwrap();
        assert_eq!(handle.name(), "libx264");
        assert_eq!(handle.kind(), StreamKind::Video);
        handle.close();
        handle.close();
    }
}
