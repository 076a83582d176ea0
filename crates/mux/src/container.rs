//! The container-writer abstraction the recorder talks to.

use ms_common::{MediaPacket, StreamDescriptor};

use crate::error::MuxResult;
use crate::sink::OutputTarget;

/// A container format writer.
///
/// Call order: `add_stream`* → `open_sink` → `write_header` →
/// `write_packet`* → `write_trailer` → `close_sink`. Implementations report
/// out-of-order calls as [`MuxError::State`](crate::MuxError::State).
///
/// The recorder moves the writer onto its background thread between header
/// and trailer, hence `Send`.
pub trait ContainerWriter: Send {
    /// Short format name for logs ("mp4").
    fn format_name(&self) -> &'static str;

    /// Whether codec headers must be carried out of band (as extradata).
    fn wants_global_header(&self) -> bool;

    /// Register a stream and return the index packets must carry.
    fn add_stream(&mut self, stream: &StreamDescriptor) -> MuxResult<u32>;

    /// Open the output. Must precede `write_header`.
    fn open_sink(&mut self, target: OutputTarget) -> MuxResult<()>;

    fn write_header(&mut self) -> MuxResult<()>;

    /// Write one packet. Timestamps are in the stream's timebase.
    fn write_packet(&mut self, packet: &MediaPacket) -> MuxResult<()>;

    fn write_trailer(&mut self) -> MuxResult<()>;

    /// Flush and release the output. Calling it again is a no-op.
    fn close_sink(&mut self) -> MuxResult<()>;
}
