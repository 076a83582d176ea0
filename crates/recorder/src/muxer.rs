//! Muxer lifecycle: negotiation, startup, packet submission and shutdown.
//!
//! ```text
//! Created ─> StreamsNegotiated ─> HeaderWritten ─> Accepting ─> Stopping ─> Closed
//!    └──────────────┴──────────────────┴── (failure: unwind) ─────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use crossbeam::channel::{self, Receiver};
use ms_common::{MediaPacket, PacketFlags, Rational, StreamDescriptor, StreamKind};
use ms_mux::{ContainerWriter, Mp4Container, OutputTarget};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::capability::{CodecHandle, CodecProvider, DefaultCodecs};
use crate::config::{MuxerConfig, MuxerOptions};
use crate::error::{RecorderError, RecorderResult};
use crate::negotiate::{negotiate_audio, negotiate_video};
use crate::pool::{PacketPool, PoolStats};
use crate::writer::{
    SpawnFailed, WriterEvent, WriterHandle, WriterStats, WRITER_EVENT_CAPACITY,
};

/// Lifecycle state of a [`Muxer`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MuxerState {
    Created,
    StreamsNegotiated,
    HeaderWritten,
    Accepting,
    Stopping,
    Closed,
}

impl fmt::Display for MuxerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::StreamsNegotiated => "streams_negotiated",
            Self::HeaderWritten => "header_written",
            Self::Accepting => "accepting",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
        })
    }
}

/// Totals reported by [`Muxer::close`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CloseReport {
    pub packets_written: u64,
    /// Payload bytes handed to the container.
    pub bytes_written: u64,
    pub write_errors: u64,
}

/// Everything torn down at close, in the order it is released.
struct Resources {
    codecs: Vec<Box<dyn CodecHandle>>,
    /// Held here until the writer starts, and again after it is joined.
    container: Option<Box<dyn ContainerWriter>>,
    writer: Option<WriterHandle>,
    sink_open: bool,
    header_written: bool,
}

/// A running capture muxer.
///
/// `submit_audio`/`submit_video` may be called concurrently from any
/// threads; packets are copied into a pooled buffer and written by a
/// background thread. Submission blocks only while every buffer is in use.
pub struct Muxer {
    config: MuxerConfig,
    audio: Option<StreamDescriptor>,
    video: Option<StreamDescriptor>,
    state: Mutex<MuxerState>,
    pool: Arc<PacketPool>,
    resources: Mutex<Resources>,
    stats: Arc<WriterStats>,
    events: Receiver<WriterEvent>,
}

impl Muxer {
    /// Create a muxer with the default AAC/H.264 encoders writing MP4 to the
    /// configured output path.
    pub fn init(options: &MuxerOptions) -> RecorderResult<Self> {
        Self::init_with(options, &DefaultCodecs, Box::new(Mp4Container::new()))
    }

    /// Create a muxer with injected collaborators, writing to the configured
    /// output path.
    pub fn init_with(
        options: &MuxerOptions,
        codecs: &dyn CodecProvider,
        container: Box<dyn ContainerWriter>,
    ) -> RecorderResult<Self> {
        let config = options.resolve()?;
        let target = OutputTarget::Path(config.output.clone());
        Self::start(config, codecs, container, target)
    }

    /// Like [`Muxer::init_with`] but writing to an explicit target (an open
    /// file, an in-memory buffer...).
    pub fn init_with_target(
        options: &MuxerOptions,
        codecs: &dyn CodecProvider,
        container: Box<dyn ContainerWriter>,
        target: OutputTarget,
    ) -> RecorderResult<Self> {
        let config = options.resolve()?;
        Self::start(config, codecs, container, target)
    }

    fn start(
        config: MuxerConfig,
        codecs: &dyn CodecProvider,
        mut container: Box<dyn ContainerWriter>,
        target: OutputTarget,
    ) -> RecorderResult<Self> {
        info!(
            output = %config.output.display(),
            format = container.format_name(),
            pool_size = config.pool_size,
            "Muxer created"
        );

        // Nothing is open yet, so a failure here only drops the container.
        let (audio, video) = negotiate_streams(&config, codecs, &mut *container)?;

        let (events_tx, events) = channel::bounded(WRITER_EVENT_CAPACITY);
        let muxer = Self {
            pool: Arc::new(PacketPool::new(config.pool_size)),
            config,
            audio,
            video,
            state: Mutex::new(MuxerState::Created),
            resources: Mutex::new(Resources {
                codecs: Vec::new(),
                container: Some(container),
                writer: None,
                sink_open: false,
                header_written: false,
            }),
            stats: Arc::new(WriterStats::default()),
            events,
        };
        muxer.transition(MuxerState::StreamsNegotiated);

        if let Err(e) = muxer.open(codecs, target, events_tx) {
            error!(error = %e, "Muxer startup failed, releasing resources");
            if let Err(teardown) = muxer.teardown() {
                warn!(error = %teardown, "Error while unwinding failed startup");
            }
            return Err(e);
        }
        Ok(muxer)
    }

    /// Open codecs, sink and header, then start the writer.
    fn open(
        &self,
        codecs: &dyn CodecProvider,
        target: OutputTarget,
        events_tx: channel::Sender<WriterEvent>,
    ) -> RecorderResult<()> {
        let mut guard = self.resources.lock();
        let res = &mut *guard;

        for stream in self.audio.iter().chain(self.video.iter()) {
            let handle = codecs.open(stream)?;
            debug!(codec = handle.name(), kind = %handle.kind(), "Encoder opened");
            res.codecs.push(handle);
        }

        let Some(container) = res.container.as_mut() else {
            return Err(RecorderError::Resource("container already released".into()));
        };
        container
            .open_sink(target)
            .map_err(|e| RecorderError::Resource(format!("Could not open output: {e}")))?;
        res.sink_open = true;
        container.write_header()?;
        res.header_written = true;
        self.transition(MuxerState::HeaderWritten);

        let Some(container) = res.container.take() else {
            return Err(RecorderError::Resource("container already released".into()));
        };
        match WriterHandle::spawn(
            Arc::clone(&self.pool),
            container,
            Arc::clone(&self.stats),
            events_tx,
        ) {
            Ok(writer) => res.writer = Some(writer),
            Err(SpawnFailed { error, container }) => {
                res.container = Some(container);
                return Err(error);
            }
        }
        self.transition(MuxerState::Accepting);
        Ok(())
    }

    /// Queue one encoded audio packet. `pts_ms` is in milliseconds.
    pub fn submit_audio(&self, flags: PacketFlags, payload: &[u8], pts_ms: i64) -> RecorderResult<()> {
        self.submit(StreamKind::Audio, flags, payload, pts_ms)
    }

    /// Queue one encoded video packet. `pts_ms` is in milliseconds.
    pub fn submit_video(&self, flags: PacketFlags, payload: &[u8], pts_ms: i64) -> RecorderResult<()> {
        self.submit(StreamKind::Video, flags, payload, pts_ms)
    }

    fn submit(
        &self,
        kind: StreamKind,
        flags: PacketFlags,
        payload: &[u8],
        pts_ms: i64,
    ) -> RecorderResult<()> {
        let state = self.state();
        if state != MuxerState::Accepting {
            return Err(RecorderError::NotAccepting { state });
        }
        let stream = match kind {
            StreamKind::Audio => self.audio.as_ref(),
            StreamKind::Video => self.video.as_ref(),
        }
        .ok_or(RecorderError::StreamUnavailable(kind))?;
        if payload.is_empty() {
            return Err(RecorderError::EmptyPayload);
        }

        let mut lease = self
            .pool
            .acquire_free()
            .map_err(|_| RecorderError::NotAccepting { state: self.state() })?;
        lease.fill(payload, pts_ms, flags);
        self.pool
            .publish_ready(lease, stream.index, Rational::MILLIS, stream.time_base);
        Ok(())
    }

    /// Drain every queued packet, finalize the container and release all
    /// resources. A second call returns [`RecorderError::AlreadyClosed`].
    pub fn close(&self) -> RecorderResult<CloseReport> {
        {
            // Held across the check so concurrent closes serialize here.
            let mut res = self.resources.lock();
            if matches!(self.state(), MuxerState::Stopping | MuxerState::Closed) {
                return Err(RecorderError::AlreadyClosed);
            }
            self.release(&mut res)?;
        }
        let report = CloseReport {
            packets_written: self.stats.packets_written(),
            bytes_written: self.stats.bytes_written(),
            write_errors: self.stats.write_errors(),
        };
        info!(
            packets_written = report.packets_written,
            bytes_written = report.bytes_written,
            write_errors = report.write_errors,
            "Muxer closed"
        );
        Ok(report)
    }

    fn teardown(&self) -> RecorderResult<()> {
        let mut res = self.resources.lock();
        self.release(&mut res)
    }

    /// Release whatever was acquired. Each step runs at most once; the
    /// first error is returned after every step was attempted.
    fn release(&self, res: &mut Resources) -> RecorderResult<()> {
        self.transition(MuxerState::Stopping);
        let mut first_error: Option<RecorderError> = None;
        let mut record = |e: RecorderError| {
            error!(error = %e, "Teardown step failed");
            first_error.get_or_insert(e);
        };

        // Encoders go first: nothing new can be produced for the queue.
        for codec in res.codecs.iter_mut() {
            codec.close();
        }
        res.codecs.clear();

        self.pool.shutdown();
        if let Some(writer) = res.writer.take() {
            let pending = self.pool.stats();
            debug!(
                ready = pending.ready,
                in_flight = pending.in_flight(),
                "Waiting for writer to drain"
            );
            match writer.join() {
                Ok(container) => res.container = Some(container),
                Err(e) => record(e),
            }
        }

        if let Some(mut container) = res.container.take() {
            if res.header_written {
                if let Err(e) = container.write_trailer() {
                    record(e.into());
                }
            }
            if res.sink_open {
                if let Err(e) = container.close_sink() {
                    record(e.into());
                }
            }
        }
        res.header_written = false;
        res.sink_open = false;

        self.transition(MuxerState::Closed);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn transition(&self, next: MuxerState) {
        let mut state = self.state.lock();
        if *state != next {
            info!(from = %*state, to = %next, "Muxer state changed");
            *state = next;
        }
    }

    pub fn state(&self) -> MuxerState {
        *self.state.lock()
    }

    pub fn config(&self) -> &MuxerConfig {
        &self.config
    }

    pub fn audio_stream(&self) -> Option<&StreamDescriptor> {
        self.audio.as_ref()
    }

    pub fn video_stream(&self) -> Option<&StreamDescriptor> {
        self.video.as_ref()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn writer_stats(&self) -> &WriterStats {
        &self.stats
    }

    /// Write failures and the final drain notice from the writer thread.
    pub fn events(&self) -> &Receiver<WriterEvent> {
        &self.events
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        if self.state() == MuxerState::Closed {
            return;
        }
        warn!(state = %self.state(), "Muxer dropped without close, closing now");
        if let Err(e) = self.close() {
            error!(error = %e, "Failed to close muxer on drop");
        }
    }
}

/// Negotiate and register the audio and video streams. At least one must
/// result.
fn negotiate_streams(
    config: &MuxerConfig,
    codecs: &dyn CodecProvider,
    container: &mut dyn ContainerWriter,
) -> RecorderResult<(Option<StreamDescriptor>, Option<StreamDescriptor>)> {
    let global_header = container.wants_global_header();

    let mut audio = None;
    if config.enable_audio {
        if let Some(caps) = codecs.audio_encoder() {
            let mut stream = negotiate_audio(&caps, config, global_header)?;
            stream.index = container.add_stream(&stream)?;
            info!(stream = %stream, "Audio stream added");
            audio = Some(stream);
        } else {
            debug!("No audio encoder for this output, skipping audio");
        }
    }

    let mut video = None;
    if config.enable_video {
        if let Some(caps) = codecs.video_encoder() {
            let mut stream = negotiate_video(&caps, config, global_header)?;
            stream.index = container.add_stream(&stream)?;
            info!(stream = %stream, "Video stream added");
            video = Some(stream);
        } else {
            debug!("No video encoder for this output, skipping video");
        }
    }

    if audio.is_none() && video.is_none() {
        return Err(RecorderError::NoStreams);
    }
    Ok((audio, video))
}

// Compile-time check: producers on several threads share one muxer.
const _: fn() = || {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Muxer>();
    assert_send_sync::<MediaPacket>();
};
