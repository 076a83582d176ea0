//! Stream negotiation: reconcile requested parameters with what the encoder
//! supports and produce the stream descriptors.

use ms_common::{PixelFormat, Rational, SampleFormat, StreamDescriptor, StreamParams};
use std::fmt::Debug;

use crate::capability::{CodecCapabilities, CodecId};
use crate::config::MuxerConfig;
use crate::error::{RecorderError, RecorderResult};

/// Use `requested` when the encoder accepts anything or lists it; otherwise
/// fall back to the first listed value.
pub fn pick_supported<T: PartialEq + Copy>(requested: T, supported: Option<&[T]>) -> T {
    match supported {
        Some(list) if !list.is_empty() && !list.contains(&requested) => list[0],
        _ => requested,
    }
}

fn pick_logged<T: PartialEq + Copy + Debug>(
    what: &str,
    requested: T,
    supported: Option<&[T]>,
) -> T {
    let chosen = pick_supported(requested, supported);
    if chosen != requested {
        tracing::warn!(
            parameter = what,
            requested = ?requested,
            chosen = ?chosen,
            "Encoder does not support requested value, using its first supported one"
        );
    }
    chosen
}

/// Build the audio stream descriptor. The stream index is assigned later by
/// the container.
pub fn negotiate_audio(
    caps: &CodecCapabilities,
    config: &MuxerConfig,
    global_header: bool,
) -> RecorderResult<StreamDescriptor> {
    let CodecId::Audio(codec) = caps.codec else {
        return Err(RecorderError::Configuration(format!(
            "Encoder {} is not an audio encoder",
            caps.name
        )));
    };

    let sample_rate = pick_logged(
        "sample_rate",
        config.audio_sample_rate,
        caps.sample_rates.as_deref(),
    );
    let channel_layout = pick_logged(
        "channel_layout",
        config.audio_channel_layout,
        caps.channel_layouts.as_deref(),
    );
    let sample_format = pick_supported(SampleFormat::FltP, caps.sample_formats.as_deref());

    if sample_rate == 0 {
        return Err(RecorderError::Configuration(
            "Audio sample rate must be > 0".to_string(),
        ));
    }
    if config.audio_bitrate == 0 {
        return Err(RecorderError::Configuration(
            "Audio bitrate must be > 0".to_string(),
        ));
    }
    if channel_layout.is_empty() {
        return Err(RecorderError::Configuration(
            "Audio channel layout is empty".to_string(),
        ));
    }

    let stream = StreamDescriptor {
        index: 0,
        time_base: Rational::timebase(sample_rate),
        bit_rate: config.audio_bitrate,
        params: StreamParams::Audio {
            codec,
            sample_rate,
            channel_layout,
            channels: channel_layout.channels(),
            sample_format,
        },
        extradata: Vec::new(),
        global_header,
        encoder_options: caps.default_options.clone(),
    };
    tracing::debug!(encoder = %caps.name, stream = %stream, "Negotiated audio stream");
    Ok(stream)
}

/// Build the video stream descriptor.
pub fn negotiate_video(
    caps: &CodecCapabilities,
    config: &MuxerConfig,
    global_header: bool,
) -> RecorderResult<StreamDescriptor> {
    let CodecId::Video(codec) = caps.codec else {
        return Err(RecorderError::Configuration(format!(
            "Encoder {} is not a video encoder",
            caps.name
        )));
    };

    let resolution = config.video_resolution;
    if !resolution.is_positive() {
        return Err(RecorderError::Configuration(format!(
            "Video resolution {} must be positive",
            resolution
        )));
    }
    if config.video_bitrate == 0 {
        return Err(RecorderError::Configuration(
            "Video bitrate must be > 0".to_string(),
        ));
    }

    let frame_rate = pick_logged(
        "frame_rate",
        config.video_frame_rate,
        caps.frame_rates.as_deref(),
    );
    if frame_rate.num == 0 || frame_rate.den == 0 {
        return Err(RecorderError::Configuration(format!(
            "Video frame rate {}/{} must be > 0",
            frame_rate.num, frame_rate.den
        )));
    }

    let pixel_format = match caps.pixel_formats.as_deref() {
        // Full-range-only encoders (MJPEG style) get the JPEG variant.
        Some(list)
            if !list.contains(&PixelFormat::Yuv420p) && list.contains(&PixelFormat::Yuvj420p) =>
        {
            PixelFormat::Yuvj420p
        }
        list => pick_logged("pixel_format", PixelFormat::Yuv420p, list),
    };
    if pixel_format.requires_even_dimensions() && !resolution.is_even() {
        return Err(RecorderError::Configuration(format!(
            "Video resolution {} must have even width and height for {:?}",
            resolution, pixel_format
        )));
    }

    let stream = StreamDescriptor {
        index: 0,
        time_base: frame_rate.invert(),
        bit_rate: config.video_bitrate,
        params: StreamParams::Video {
            codec,
            resolution,
            frame_rate,
            // One keyframe per second.
            gop_size: (frame_rate.num / frame_rate.den).max(1),
            pixel_format,
            max_b_frames: 0,
        },
        extradata: Vec::new(),
        global_header,
        encoder_options: caps.default_options.clone(),
    };
    tracing::debug!(encoder = %caps.name, stream = %stream, "Negotiated video stream");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CodecProvider, DefaultCodecs};
    use ms_common::{AudioCodec, ChannelLayout, Resolution, VideoCodec};

    #[test]
    fn pick_supported_policy() {
        assert_eq!(pick_supported(44_100, None), 44_100);
        assert_eq!(pick_supported(44_100, Some(&[][..])), 44_100);
        assert_eq!(pick_supported(44_100, Some(&[8_000, 44_100][..])), 44_100);
        assert_eq!(
            pick_supported(44_100, Some(&[8_000, 16_000, 32_000][..])),
            8_000
        );
    }

    #[test]
    fn default_audio_negotiation() {
        let caps = DefaultCodecs.audio_encoder().unwrap();
        let stream = negotiate_audio(&caps, &MuxerConfig::default(), true).unwrap();
        assert_eq!(stream.time_base, Rational::timebase(22_050));
        assert_eq!(stream.bit_rate, 22_050);
        assert!(stream.global_header);
        match stream.params {
            StreamParams::Audio {
                codec,
                sample_rate,
                channel_layout,
                channels,
                sample_format,
            } => {
                assert_eq!(codec, AudioCodec::Aac);
                assert_eq!(sample_rate, 22_050);
                assert_eq!(channel_layout, ChannelLayout::MONO);
                assert_eq!(channels, 1);
                assert_eq!(sample_format, SampleFormat::FltP);
            }
            other => panic!("unexpected params {:?}", other),
        }
    }

    #[test]
    fn audio_falls_back_to_first_supported_rate() {
        let caps = CodecCapabilities::audio("test-aac", AudioCodec::Aac)
            .with_sample_rates(&[8_000, 16_000, 32_000])
            .with_channel_layouts(&[ChannelLayout::STEREO])
            .with_sample_formats(&[SampleFormat::S16]);
        let config = MuxerConfig {
            audio_sample_rate: 44_100,
            ..MuxerConfig::default()
        };
        let stream = negotiate_audio(&caps, &config, false).unwrap();
        assert_eq!(stream.time_base, Rational::timebase(8_000));
        let StreamParams::Audio {
            sample_rate,
            channel_layout,
            channels,
            sample_format,
            ..
        } = stream.params
        else {
            panic!("not audio");
        };
        assert_eq!(sample_rate, 8_000);
        assert_eq!(channel_layout, ChannelLayout::STEREO);
        assert_eq!(channels, 2);
        assert_eq!(sample_format, SampleFormat::S16);
    }

    #[test]
    fn default_video_negotiation() {
        let caps = DefaultCodecs.video_encoder().unwrap();
        let stream = negotiate_video(&caps, &MuxerConfig::default(), true).unwrap();
        assert_eq!(stream.time_base, Rational::timebase(25));
        assert_eq!(stream.bit_rate, 256_000);
        assert_eq!(stream.encoder_options.len(), 2);
        let StreamParams::Video {
            codec,
            resolution,
            gop_size,
            pixel_format,
            max_b_frames,
            ..
        } = stream.params
        else {
            panic!("not video");
        };
        assert_eq!(codec, VideoCodec::H264);
        assert_eq!(resolution, Resolution::QVGA);
        assert_eq!(gop_size, 25);
        assert_eq!(pixel_format, PixelFormat::Yuv420p);
        assert_eq!(max_b_frames, 0);
    }

    #[test]
    fn full_range_only_encoder_gets_yuvj() {
        let caps = CodecCapabilities::video("mjpeg-ish", VideoCodec::H264)
            .with_pixel_formats(&[PixelFormat::Yuvj420p]);
        let stream = negotiate_video(&caps, &MuxerConfig::default(), true).unwrap();
        assert!(matches!(
            stream.params,
            StreamParams::Video {
                pixel_format: PixelFormat::Yuvj420p,
                ..
            }
        ));
    }

    #[test]
    fn video_frame_rate_fallback() {
        let caps = CodecCapabilities::video("h264", VideoCodec::H264)
            .with_frame_rates(&[Rational::FPS_30, Rational::FPS_60]);
        let stream = negotiate_video(&caps, &MuxerConfig::default(), true).unwrap();
        assert_eq!(stream.time_base, Rational::timebase(30));
    }

    #[test]
    fn invalid_video_parameters_rejected() {
        let caps = DefaultCodecs.video_encoder().unwrap();
        for resolution in [Resolution::new(0, 240), Resolution::new(321, 240)] {
            let config = MuxerConfig {
                video_resolution: resolution,
                ..MuxerConfig::default()
            };
            assert!(matches!(
                negotiate_video(&caps, &config, true),
                Err(RecorderError::Configuration(_))
            ));
        }
        let config = MuxerConfig {
            video_bitrate: 0,
            ..MuxerConfig::default()
        };
        assert!(negotiate_video(&caps, &config, true).is_err());
    }

    #[test]
    fn zero_denominator_frame_rate_rejected() {
        let caps = CodecCapabilities::video("h264", VideoCodec::H264)
            .with_frame_rates(&[Rational { num: 30, den: 0 }]);
        assert!(matches!(
            negotiate_video(&caps, &MuxerConfig::default(), true),
            Err(RecorderError::Configuration(_))
        ));
    }

    #[test]
    fn odd_resolution_rejected_for_subsampled_format() {
        let caps = CodecCapabilities::video("nv12-only", VideoCodec::H264)
            .with_pixel_formats(&[PixelFormat::Nv12]);
        let config = MuxerConfig {
            video_resolution: Resolution::new(320, 241),
            ..MuxerConfig::default()
        };
        let err = negotiate_video(&caps, &config, true).unwrap_err();
        assert!(err.to_string().contains("Nv12"));
    }

    #[test]
    fn wrong_kind_encoder_rejected() {
        let video_caps = DefaultCodecs.video_encoder().unwrap();
        assert!(negotiate_audio(&video_caps, &MuxerConfig::default(), true).is_err());
        let audio_caps = DefaultCodecs.audio_encoder().unwrap();
        assert!(negotiate_video(&audio_caps, &MuxerConfig::default(), true).is_err());
    }
}
