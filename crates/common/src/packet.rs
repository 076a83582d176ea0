//! Encoded packets and the per-stream descriptors they are muxed against.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::{AudioCodec, ChannelLayout, SampleFormat, StreamKind, VideoCodec};
use crate::color::PixelFormat;
use crate::types::{Rational, Resolution};

/// Per-packet flag bits, forwarded verbatim from the capture pipeline.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketFlags(pub u32);

impl PacketFlags {
    pub const NONE: Self = Self(0);
    /// The packet is a keyframe (IDR for H.264).
    pub const KEYFRAME: Self = Self(0x0001);
    /// The packet content may be damaged.
    pub const CORRUPT: Self = Self(0x0002);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_keyframe(self) -> bool {
        self.contains(Self::KEYFRAME)
    }
}

impl std::ops::BitOr for PacketFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One encoded access unit on its way to the container.
///
/// Instances live in a fixed pool and are refilled in place, so the payload
/// allocation survives across uses.
#[derive(Clone, Debug, Default)]
pub struct MediaPacket {
    /// Encoded payload.
    pub data: Vec<u8>,
    /// Presentation timestamp, in the owning stream's timebase once published.
    pub pts: i64,
    /// Decode timestamp, same unit as `pts`.
    pub dts: i64,
    /// Flag bits (keyframe marker etc.).
    pub flags: PacketFlags,
    /// Index of the stream this packet belongs to.
    pub stream_index: u32,
}

impl MediaPacket {
    /// Copy `payload` into this packet, reusing the existing allocation.
    ///
    /// Both timestamps are set to `pts`: capture payloads carry no B-frame
    /// reordering information.
    pub fn fill(&mut self, payload: &[u8], pts: i64, flags: PacketFlags) {
        self.data.clear();
        self.data.extend_from_slice(payload);
        self.pts = pts;
        self.dts = pts;
        self.flags = flags;
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags.is_keyframe()
    }
}

/// Codec-specific negotiated parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StreamParams {
    Audio {
        codec: AudioCodec,
        sample_rate: u32,
        channel_layout: ChannelLayout,
        channels: u16,
        sample_format: SampleFormat,
    },
    Video {
        codec: VideoCodec,
        resolution: Resolution,
        frame_rate: Rational,
        /// Keyframe interval in frames.
        gop_size: u32,
        pixel_format: PixelFormat,
        max_b_frames: u32,
    },
}

/// Negotiated parameters of one elementary stream.
///
/// Built by the negotiator, given its index by the container when the stream
/// is added, and immutable once the container header is written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Index assigned at add-stream time.
    pub index: u32,
    /// Unit of every timestamp written to this stream.
    pub time_base: Rational,
    /// Target bitrate in bits/sec.
    pub bit_rate: u64,
    pub params: StreamParams,
    /// Codec configuration record (AudioSpecificConfig, SPS/PPS...). May be
    /// empty; the container then derives it where it can.
    pub extradata: Vec<u8>,
    /// Codec headers go into the container rather than in-band.
    pub global_header: bool,
    /// Encoder options (`preset`, `profile`...) applied when the codec is opened.
    pub encoder_options: Vec<(String, String)>,
}

impl StreamDescriptor {
    pub fn kind(&self) -> StreamKind {
        match self.params {
            StreamParams::Audio { .. } => StreamKind::Audio,
            StreamParams::Video { .. } => StreamKind::Video,
        }
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.params {
            StreamParams::Audio {
                codec,
                sample_rate,
                channel_layout,
                ..
            } => write!(
                f,
                "#{} audio {} {} Hz {} @ {} bps",
                self.index,
                codec.display_name(),
                sample_rate,
                channel_layout,
                self.bit_rate
            ),
            StreamParams::Video {
                codec,
                resolution,
                frame_rate,
                ..
            } => write!(
                f,
                "#{} video {} {} @ {} fps, {} bps",
                self.index,
                codec.display_name(),
                resolution,
                frame_rate,
                self.bit_rate
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_keyframe() {
        assert!(PacketFlags::KEYFRAME.is_keyframe());
        assert!(!PacketFlags::NONE.is_keyframe());
        let both = PacketFlags::KEYFRAME | PacketFlags::CORRUPT;
        assert!(both.contains(PacketFlags::CORRUPT));
        assert!(both.is_keyframe());
    }

    #[test]
    fn fill_reuses_allocation() {
        let mut packet = MediaPacket::default();
        packet.fill(&[1u8; 256], 40, PacketFlags::KEYFRAME);
        let cap = packet.data.capacity();
        packet.fill(&[2u8; 16], 80, PacketFlags::NONE);
        assert_eq!(packet.data, vec![2u8; 16]);
        assert_eq!(packet.data.capacity(), cap);
        assert_eq!((packet.pts, packet.dts), (80, 80));
        assert!(!packet.is_keyframe());
    }

    #[test]
    fn descriptor_kind_and_display() {
        let desc = StreamDescriptor {
            index: 1,
            time_base: Rational::timebase(25),
            bit_rate: 256_000,
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
        assert_eq!(desc.kind(), StreamKind::Video);
        assert_eq!(desc.to_string(), "#1 video H.264/AVC 320x240 @ 25 fps, 256000 bps");
    }
}
