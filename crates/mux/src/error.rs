//! Muxer error types.

use thiserror::Error;

/// Errors that can occur while writing a container.
#[derive(Error, Debug)]
pub enum MuxError {
    /// I/O error on the output sink.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Stream parameters the container cannot represent.
    #[error("Invalid muxer config: {0}")]
    InvalidConfig(String),

    /// Track-related error (unknown stream index, duplicate stream...).
    #[error("Track error: {0}")]
    TrackError(String),

    /// Operation issued in the wrong container phase (e.g. packet before header).
    #[error("Invalid container state: {0}")]
    State(String),

    /// A size field overflowed.
    #[error("Buffer full: {0}")]
    BufferFull(String),
}

/// Convenience Result type for mux operations.
pub type MuxResult<T> = Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mux_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let mux_err = MuxError::from(io_err);
        assert!(mux_err.to_string().contains("IO error"));
        assert!(mux_err.to_string().contains("file not found"));
    }

    #[test]
    fn mux_error_display_state() {
        let err = MuxError::State("header not written".into());
        assert_eq!(err.to_string(), "Invalid container state: header not written");
    }

    #[test]
    fn mux_error_display_track_error() {
        let err = MuxError::TrackError("stream 5 not found".into());
        assert_eq!(err.to_string(), "Track error: stream 5 not found");
    }
}
