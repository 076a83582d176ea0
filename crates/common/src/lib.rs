//! `ms-common` — Shared types for the ms capture muxer.
//!
//! This crate is the foundation that the muxer and recorder crates depend on:
//!
//! - **Types**: `Rational` (frame rates, timebases, rescaling), `Resolution`
//! - **Codecs**: `AudioCodec`, `VideoCodec`, `ChannelLayout`, `SampleFormat`
//! - **Color**: `PixelFormat`
//! - **Packets**: `MediaPacket`, `PacketFlags`, `StreamDescriptor`

pub mod codec;
pub mod color;
pub mod packet;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::{AudioCodec, ChannelLayout, SampleFormat, StreamKind, VideoCodec};
pub use color::PixelFormat;
pub use packet::{MediaPacket, PacketFlags, StreamDescriptor, StreamParams};
pub use types::{Rational, Resolution};
