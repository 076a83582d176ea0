//! Background writer thread: drains the ready ring into the container.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Sender};
use ms_mux::ContainerWriter;
use tracing::{debug, info, warn};

use crate::error::{RecorderError, RecorderResult};
use crate::pool::PacketPool;

/// Name of the writer thread.
pub const WRITER_THREAD_NAME: &str = "mux-writer";

/// Capacity of the writer event channel. Failures beyond it are only
/// counted in [`WriterStats`]; the last slot is kept for
/// [`WriterEvent::Drained`].
pub const WRITER_EVENT_CAPACITY: usize = 64;

/// Out-of-band notifications from the writer thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriterEvent {
    /// The container rejected a packet. The packet is dropped, the writer
    /// keeps going.
    WriteFailed {
        stream_index: u32,
        pts: i64,
        error: String,
    },
    /// Shutdown was signaled and every queued packet has been handled.
    Drained {
        packets_written: u64,
        write_errors: u64,
    },
}

/// Counters updated by the writer thread.
#[derive(Debug, Default)]
pub struct WriterStats {
    packets_written: AtomicU64,
    bytes_written: AtomicU64,
    write_errors: AtomicU64,
}

impl WriterStats {
    pub fn packets_written(&self) -> u64 {
        self.packets_written.load(Ordering::Relaxed)
    }

    /// Payload bytes handed to the container.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }
}

/// The running writer thread. Joining it hands the container back.
#[derive(Debug)]
pub struct WriterHandle {
    thread: JoinHandle<Option<Box<dyn ContainerWriter>>>,
}

/// Spawning failed; the container is returned so it can still be closed.
pub struct SpawnFailed {
    pub error: RecorderError,
    pub container: Box<dyn ContainerWriter>,
}

impl std::fmt::Debug for SpawnFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnFailed")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl WriterHandle {
    /// Start the writer thread. It owns `container` until joined.
    pub fn spawn(
        pool: Arc<PacketPool>,
        container: Box<dyn ContainerWriter>,
        stats: Arc<WriterStats>,
        events: Sender<WriterEvent>,
    ) -> Result<Self, SpawnFailed> {
        // The container crosses over only once the thread exists, so a failed
        // spawn does not lose it.
        let (handoff_tx, handoff_rx) = channel::bounded::<Box<dyn ContainerWriter>>(1);

        let spawned = std::thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || {
                let container = handoff_rx.recv().ok()?;
                Some(run(&pool, container, &stats, &events))
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                return Err(SpawnFailed {
                    error: RecorderError::Resource(format!("Failed to spawn writer thread: {e}")),
                    container,
                })
            }
        };

        if let Err(returned) = handoff_tx.send(container) {
            return Err(SpawnFailed {
                error: RecorderError::Resource("Writer thread exited before start".to_string()),
                container: returned.into_inner(),
            });
        }
        debug!(thread = WRITER_THREAD_NAME, "Writer thread started");
        Ok(Self { thread })
    }

    /// Wait for the thread to drain and exit.
    pub fn join(self) -> RecorderResult<Box<dyn ContainerWriter>> {
        match self.thread.join() {
            Ok(Some(container)) => Ok(container),
            Ok(None) => Err(RecorderError::Resource(
                "Writer thread never received its container".to_string(),
            )),
            Err(_) => Err(RecorderError::WriterPanicked),
        }
    }
}

/// Writer loop: consume, write, recycle. Returns when the pool is shut down
/// and drained.
fn run(
    pool: &PacketPool,
    mut container: Box<dyn ContainerWriter>,
    stats: &WriterStats,
    events: &Sender<WriterEvent>,
) -> Box<dyn ContainerWriter> {
    let mut suppressed = 0u64;
    while let Some(packet) = pool.consume_ready() {
        match container.write_packet(&packet) {
            Ok(()) => {
                stats.packets_written.fetch_add(1, Ordering::Relaxed);
                stats
                    .bytes_written
                    .fetch_add(packet.data.len() as u64, Ordering::Relaxed);
            }
            Err(err) => {
                stats.write_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    stream = packet.stream_index,
                    pts = packet.pts,
                    error = %err,
                    "Failed to write packet"
                );
                // This thread is the only sender, so the reserved slot stays free.
                let room = events
                    .capacity()
                    .map_or(true, |cap| events.len() + 1 < cap);
                if room {
                    // Nobody listening is fine.
                    let _ = events.try_send(WriterEvent::WriteFailed {
                        stream_index: packet.stream_index,
                        pts: packet.pts,
                        error: err.to_string(),
                    });
                } else {
                    suppressed += 1;
                }
            }
        }
        pool.release_free(packet);
    }

    let packets_written = stats.packets_written();
    let write_errors = stats.write_errors();
    if suppressed > 0 {
        warn!(suppressed, "Write failures not reported as events, channel was full");
    }
    info!(packets_written, write_errors, "Writer drained");
    let _ = events.try_send(WriterEvent::Drained {
        packets_written,
        write_errors,
    });
    container
}
