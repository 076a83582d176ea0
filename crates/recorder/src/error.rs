//! Recorder error types.

use ms_common::StreamKind;
use ms_mux::MuxError;
use thiserror::Error;

use crate::muxer::MuxerState;

/// Broad classification of a [`RecorderError`], for callers that only need
/// to decide between "fix the config", "retry later" and "bug".
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or unsatisfiable settings. Nothing was left allocated.
    Configuration,
    /// A codec, buffer or output could not be obtained.
    Resource,
    /// Container I/O failed while writing.
    RuntimeIo,
    /// The API was used out of order.
    Programming,
}

/// Errors returned by the muxer lifecycle and submission API.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("No audio or video stream could be created")]
    NoStreams,

    #[error("Resource unavailable: {0}")]
    Resource(String),

    #[error("Muxer is not accepting packets (state: {state})")]
    NotAccepting { state: MuxerState },

    #[error("Muxer already closed")]
    AlreadyClosed,

    #[error("No {0} stream in this muxer")]
    StreamUnavailable(StreamKind),

    #[error("Packet payload is empty")]
    EmptyPayload,

    #[error("Container error: {0}")]
    Mux(#[from] MuxError),

    #[error("Writer thread panicked")]
    WriterPanicked,
}

impl RecorderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::NoStreams => ErrorKind::Configuration,
            Self::Resource(_) | Self::WriterPanicked => ErrorKind::Resource,
            Self::Mux(MuxError::InvalidConfig(_)) => ErrorKind::Configuration,
            Self::Mux(MuxError::State(_)) => ErrorKind::Programming,
            Self::Mux(_) => ErrorKind::RuntimeIo,
            Self::NotAccepting { .. }
            | Self::AlreadyClosed
            | Self::StreamUnavailable(_)
            | Self::EmptyPayload => ErrorKind::Programming,
        }
    }
}

/// Convenience Result type for recorder operations.
pub type RecorderResult<T> = Result<T, RecorderError>;
