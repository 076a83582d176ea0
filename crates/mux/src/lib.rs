//! `ms-mux` — container writing for the capture muxer.
//!
//! The recorder only talks to [`ContainerWriter`]; this crate provides the
//! trait, the output sink abstraction and an MP4 (ISO 14496-12) backend.
//!
//! # Architecture
//!
//! - **Pure Rust box writing**, no native muxing library
//! - **Progressive write**: samples are appended to a 64-bit `mdat` as they arrive
//! - **Moov-at-end**: sample tables are emitted by `write_trailer()`
//! - **Codecs**: H.264 (avcC, Annex-B input converted to length-prefixed NALs)
//!   and AAC (esds with a derived AudioSpecificConfig when none is supplied)
//!
//! # Usage
//!
//! ```ignore
//! use ms_mux::{ContainerWriter, Mp4Container, OutputTarget};
//!
//! let mut mp4 = Mp4Container::new();
//! let video = mp4.add_stream(&video_descriptor)?;
//! mp4.open_sink(OutputTarget::Path("capture.mp4".into()))?;
//! mp4.write_header()?;
//! mp4.write_packet(&packet)?;
//! mp4.write_trailer()?;
//! mp4.close_sink()?;
//! ```

pub mod aac;
pub mod atoms;
pub mod container;
pub mod error;
pub mod mp4;
pub mod muxer;
pub mod nal;
pub mod sink;

// Re-export primary API types
pub use container::ContainerWriter;
pub use error::{MuxError, MuxResult};
pub use muxer::Mp4Container;
pub use sink::{OutputTarget, Sink};
