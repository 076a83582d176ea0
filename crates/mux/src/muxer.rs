//! Progressive MP4 writer behind [`ContainerWriter`].
//!
//! Usage:
//! ```ignore
//! let mut mp4 = Mp4Container::new();
//! let video = mp4.add_stream(&video_descriptor)?;
//! mp4.open_sink(OutputTarget::Path("capture.mp4".into()))?;
//! mp4.write_header()?;              // ftyp + open 64-bit mdat
//! mp4.write_packet(&packet)?;       // appended to mdat
//! mp4.write_trailer()?;             // mdat size patched, moov appended
//! mp4.close_sink()?;
//! ```

use ms_common::{AudioCodec, MediaPacket, StreamDescriptor, StreamKind, StreamParams, VideoCodec};
use std::io::{Seek, Write};

use crate::aac;
use crate::atoms;
use crate::container::ContainerWriter;
use crate::error::{MuxError, MuxResult};
use crate::mp4::{self, SampleInfo, TrackHandler, TrackInfo};
use crate::nal::{self, ParameterSets};
use crate::sink::{OutputTarget, Sink};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    /// Streams may be added and the sink opened.
    Setup,
    /// Header written, accepting packets.
    Writing,
    /// moov written.
    Finished,
    /// Sink released.
    Closed,
}

/// A sample already in `mdat`, timing still in stream ticks.
#[derive(Clone, Debug)]
struct PendingSample {
    offset: u64,
    size: u32,
    dts: i64,
    pts: i64,
    is_sync: bool,
}

struct TrackState {
    stream: StreamDescriptor,
    /// Ticks per stream timebase unit (`time_base.num`).
    tick_scale: i64,
    parameter_sets: ParameterSets,
    samples: Vec<PendingSample>,
}

impl TrackState {
    fn timescale(&self) -> u32 {
        self.stream.time_base.den
    }

    fn last_dts(&self) -> Option<i64> {
        self.samples.last().map(|s| s.dts)
    }
}

/// MP4 container writer. `moov` is written at the end, so the output must be
/// seekable and a file is only playable after [`ContainerWriter::write_trailer`].
pub struct Mp4Container {
    sink: Option<Box<dyn Sink>>,
    tracks: Vec<TrackState>,
    phase: Phase,
    mdat_size_pos: u64,
    /// Reused buffer for Annex-B to length-prefixed conversion.
    scratch: Vec<u8>,
}

impl Default for Mp4Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Mp4Container {
    pub fn new() -> Self {
        Self {
            sink: None,
            tracks: Vec::new(),
            phase: Phase::Setup,
            mdat_size_pos: 0,
            scratch: Vec::new(),
        }
    }

    /// Number of samples written to stream `index`.
    pub fn sample_count(&self, index: u32) -> MuxResult<usize> {
        Ok(self.track(index)?.samples.len())
    }

    /// Payload bytes appended to `mdat` so far.
    pub fn mdat_bytes_written(&self) -> u64 {
        self.tracks
            .iter()
            .flat_map(|t| t.samples.iter())
            .map(|s| s.size as u64)
            .sum()
    }

    fn expect_phase(&self, expected: Phase, operation: &str) -> MuxResult<()> {
        if self.phase != expected {
            return Err(MuxError::State(format!(
                "{} requires {:?}, container is {:?}",
                operation, expected, self.phase
            )));
        }
        Ok(())
    }

    fn sink_mut(&mut self) -> MuxResult<&mut Box<dyn Sink>> {
        self.sink
            .as_mut()
            .ok_or_else(|| MuxError::State("output sink is not open".into()))
    }

    fn track(&self, index: u32) -> MuxResult<&TrackState> {
        self.tracks
            .get(index as usize)
            .ok_or_else(|| MuxError::TrackError(format!("Stream {} not found", index)))
    }

    /// Build the moov description. Video tracks without SPS/PPS cannot be
    /// described and are left out.
    fn track_infos(&self) -> Vec<TrackInfo> {
        let mut infos = Vec::with_capacity(self.tracks.len());
        for (i, track) in self.tracks.iter().enumerate() {
            let handler = match &track.stream.params {
                StreamParams::Video {
                    codec, resolution, ..
                } => {
                    let (Some(sps), Some(pps)) =
                        (&track.parameter_sets.sps, &track.parameter_sets.pps)
                    else {
                        tracing::warn!(
                            stream = i,
                            samples = track.samples.len(),
                            "No SPS/PPS seen, dropping video track from moov"
                        );
                        continue;
                    };
                    TrackHandler::Video {
                        codec: *codec,
                        width: resolution.width,
                        height: resolution.height,
                        sps: sps.clone(),
                        pps: pps.clone(),
                    }
                }
                StreamParams::Audio {
                    codec,
                    sample_rate,
                    channels,
                    ..
                } => TrackHandler::Audio {
                    codec: *codec,
                    sample_rate: *sample_rate,
                    channels: *channels,
                    bit_rate: track.stream.bit_rate,
                    config_data: if track.stream.extradata.is_empty() {
                        aac::audio_specific_config(*sample_rate, *channels)
                    } else {
                        track.stream.extradata.clone()
                    },
                },
            };

            let samples = sample_table(&track.samples, track.tick_scale);
            infos.push(TrackInfo {
                track_id: infos.len() as u32 + 1,
                timescale: track.timescale(),
                duration: samples.iter().map(|s| s.duration as u64).sum(),
                handler,
                samples,
            });
        }
        infos
    }
}

/// Turn DTS-stamped samples into durations: each sample lasts until the next
/// one; the last repeats the previous duration (1 tick for a lone sample).
fn sample_table(pending: &[PendingSample], tick_scale: i64) -> Vec<SampleInfo> {
    let to_u32 = |ticks: i64| ticks.clamp(0, u32::MAX as i64) as u32;
    let mut out: Vec<SampleInfo> = Vec::with_capacity(pending.len());
    for (i, sample) in pending.iter().enumerate() {
        let duration = match pending.get(i + 1) {
            Some(next) => to_u32((next.dts - sample.dts) * tick_scale),
            None => out.last().map_or(1, |prev| prev.duration),
        };
        let offset = (sample.pts - sample.dts) * tick_scale;
        out.push(SampleInfo {
            offset: sample.offset,
            size: sample.size,
            duration,
            composition_offset: offset.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            is_sync: sample.is_sync,
        });
    }
    out
}

impl ContainerWriter for Mp4Container {
    fn format_name(&self) -> &'static str {
        "mp4"
    }

    fn wants_global_header(&self) -> bool {
        true
    }

    fn add_stream(&mut self, stream: &StreamDescriptor) -> MuxResult<u32> {
        self.expect_phase(Phase::Setup, "add_stream")?;
        if self.tracks.iter().any(|t| t.stream.kind() == stream.kind()) {
            return Err(MuxError::TrackError(format!(
                "A {} stream is already present",
                stream.kind()
            )));
        }
        let parameter_sets = match &stream.params {
            StreamParams::Video { codec, .. } => {
                if *codec != VideoCodec::H264 {
                    return Err(MuxError::InvalidConfig(format!(
                        "{} is not supported in MP4 output",
                        codec.display_name()
                    )));
                }
                ParameterSets::from_extradata(&stream.extradata)
            }
            StreamParams::Audio { codec, .. } => {
                if *codec != AudioCodec::Aac {
                    return Err(MuxError::InvalidConfig(format!(
                        "{} is not supported in MP4 output",
                        codec.display_name()
                    )));
                }
                ParameterSets::default()
            }
        };

        let index = self.tracks.len() as u32;
        self.tracks.push(TrackState {
            stream: StreamDescriptor {
                index,
                ..stream.clone()
            },
            tick_scale: stream.time_base.num.max(1) as i64,
            parameter_sets,
            samples: Vec::new(),
        });
        tracing::debug!(index, stream = %stream, "MP4 stream added");
        Ok(index)
    }

    fn open_sink(&mut self, target: OutputTarget) -> MuxResult<()> {
        self.expect_phase(Phase::Setup, "open_sink")?;
        if self.sink.is_some() {
            return Err(MuxError::State("output sink already open".into()));
        }
        tracing::debug!(output = ?target, "Opening MP4 output");
        self.sink = Some(target.open()?);
        Ok(())
    }

    fn write_header(&mut self) -> MuxResult<()> {
        self.expect_phase(Phase::Setup, "write_header")?;
        if self.tracks.is_empty() {
            return Err(MuxError::TrackError("no streams to write".into()));
        }
        let sink = self.sink_mut()?;
        mp4::write_ftyp(sink)?;
        // 64-bit mdat: the final size is unknown and may exceed 4 GiB.
        let size_pos = atoms::large_box_size_placeholder(sink, b"mdat")?;

        self.mdat_size_pos = size_pos;
        self.phase = Phase::Writing;
        tracing::info!(streams = self.tracks.len(), "MP4 header written");
        Ok(())
    }

    fn write_packet(&mut self, packet: &MediaPacket) -> MuxResult<()> {
        self.expect_phase(Phase::Writing, "write_packet")?;
        let index = packet.stream_index as usize;
        let Some(track) = self.tracks.get_mut(index) else {
            return Err(MuxError::TrackError(format!(
                "Stream {} not found",
                packet.stream_index
            )));
        };

        let payload: &[u8] = if track.stream.kind() == StreamKind::Video
            && nal::is_annexb(&packet.data)
        {
            if !track.parameter_sets.is_complete() {
                track.parameter_sets.capture_annexb(&packet.data);
            }
            nal::annexb_to_length_prefixed(&packet.data, &mut self.scratch);
            &self.scratch
        } else {
            &packet.data
        };
        let size = u32::try_from(payload.len()).map_err(|_| {
            MuxError::BufferFull(format!("{} byte sample exceeds 32-bit size", payload.len()))
        })?;

        let mut dts = packet.dts;
        if let Some(last) = track.last_dts() {
            if dts <= last {
                tracing::warn!(
                    stream = index,
                    dts,
                    last_dts = last,
                    "Non-monotonic DTS, clamping"
                );
                dts = last + 1;
            }
        }

        let Some(sink) = self.sink.as_mut() else {
            return Err(MuxError::State("output sink is not open".into()));
        };
        let offset = sink.stream_position()?;
        sink.write_all(payload)?;

        track.samples.push(PendingSample {
            offset,
            size,
            dts,
            pts: packet.pts.max(dts),
            is_sync: packet.is_keyframe() || track.stream.kind() == StreamKind::Audio,
        });
        Ok(())
    }

    fn write_trailer(&mut self) -> MuxResult<()> {
        self.expect_phase(Phase::Writing, "write_trailer")?;
        let infos = self.track_infos();
        let size_pos = self.mdat_size_pos;
        let sink = self.sink_mut()?;
        atoms::fill_large_box_size(sink, size_pos)?;
        mp4::write_moov(sink, &infos)?;
        sink.flush()?;

        self.phase = Phase::Finished;
        tracing::info!(
            tracks = infos.len(),
            mdat_bytes = self.mdat_bytes_written(),
            "MP4 trailer written"
        );
        Ok(())
    }

    fn close_sink(&mut self) -> MuxResult<()> {
        if let Some(mut sink) = self.sink.take() {
            if self.phase == Phase::Writing {
                tracing::warn!("Closing MP4 output without a trailer, file will not play");
            }
            sink.flush()?;
        }
        self.phase = Phase::Closed;
        Ok(())
    }
}
