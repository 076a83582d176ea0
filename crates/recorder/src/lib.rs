//! `ms-recorder` — non-blocking capture muxer.
//!
//! Producers hand encoded audio/video packets to a [`Muxer`]; the packets are
//! copied into a fixed pool of reusable buffers and written to the container
//! by a single background thread, so submission never waits on disk I/O.
//!
//! # Architecture
//!
//! - **Packet pool**: `pool_size` preallocated buffers cycling between a free
//!   ring and a ready ring. Submission blocks only when every buffer is in use.
//! - **Writer thread**: drains the ready ring in FIFO order, writes through a
//!   [`ms_mux::ContainerWriter`] and recycles each buffer.
//! - **Negotiation**: requested audio/video parameters are reconciled with
//!   what the encoder supports before any stream is added.
//! - **Ordered teardown**: encoders, pool, writer, trailer, sink; the same
//!   path unwinds a failed startup.
//!
//! # Usage
//!
//! ```ignore
//! use ms_recorder::{Muxer, MuxerOptions};
//! use ms_common::PacketFlags;
//!
//! let muxer = Muxer::init(&MuxerOptions::default())?;
//! muxer.submit_video(PacketFlags::KEYFRAME, &frame, 0)?;
//! muxer.submit_audio(PacketFlags::NONE, &aac, 0)?;
//! let report = muxer.close()?;
//! ```

pub mod capability;
pub mod config;
pub mod error;
pub mod muxer;
pub mod negotiate;
pub mod pool;
pub mod writer;

pub use capability::{CodecCapabilities, CodecHandle, CodecId, CodecProvider, DefaultCodecs};
pub use config::{MuxerConfig, MuxerOptions};
pub use error::{ErrorKind, RecorderError, RecorderResult};
pub use muxer::{CloseReport, Muxer, MuxerState};
pub use pool::{PacketLease, PacketPool, PoolClosed, PoolStats};
pub use writer::{WriterEvent, WriterStats, WRITER_EVENT_CAPACITY};
