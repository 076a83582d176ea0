//! Output sinks a container can be written to.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::PathBuf;

use crate::error::MuxResult;

/// Byte sink for container output. MP4 needs `Seek` to patch box sizes.
pub trait Sink: Write + Seek + Send {}

impl<T: Write + Seek + Send> Sink for T {}

/// Where the container bytes go.
pub enum OutputTarget {
    /// Create (truncate) a file at this path.
    Path(PathBuf),
    /// An already-open file descriptor, written from its current position.
    File(File),
    /// Any caller-provided seekable writer.
    Writer(Box<dyn Sink>),
}

impl OutputTarget {
    /// Open the target for writing. Files are buffered.
    pub fn open(self) -> MuxResult<Box<dyn Sink>> {
        Ok(match self {
            Self::Path(path) => Box::new(BufWriter::new(File::create(&path)?)),
            Self::File(file) => Box::new(BufWriter::new(file)),
            Self::Writer(writer) => writer,
        })
    }
}

impl fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::File(file) => f.debug_tuple("File").field(file).finish(),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

impl From<PathBuf> for OutputTarget {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, SeekFrom};

    #[test]
    fn path_target_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut sink = OutputTarget::Path(path.clone()).open().unwrap();
        sink.write_all(b"abcd").unwrap();
        sink.seek(SeekFrom::Start(0)).unwrap();
        sink.write_all(b"x").unwrap();
        sink.flush().unwrap();
        drop(sink);
        assert_eq!(std::fs::read(&path).unwrap(), b"xbcd");
    }

    #[test]
    fn file_target_writes_through() {
        let file = tempfile::tempfile().unwrap();
        let mut sink = OutputTarget::File(file).open().unwrap();
        sink.write_all(b"hello").unwrap();
        assert_eq!(sink.stream_position().unwrap(), 5);
    }

    #[test]
    fn debug_hides_writer() {
        let target = OutputTarget::Writer(Box::new(Cursor::new(Vec::new())));
        assert_eq!(format!("{:?}", target), "Writer(..)");
        let target = OutputTarget::from(PathBuf::from("a.mp4"));
        assert_eq!(format!("{:?}", target), "Path(\"a.mp4\")");
    }
}
