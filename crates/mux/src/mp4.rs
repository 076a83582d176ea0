//! MP4 box writers for the `ftyp` and `moov` hierarchies.
//!
//! Box hierarchy produced at trailer time:
//! ```text
//! moov
//!   mvhd
//!   trak (per stream)
//!     tkhd
//!     mdia
//!       mdhd
//!       hdlr
//!       minf
//!         vmhd | smhd
//!         dinf > dref > url
//!         stbl
//!           stsd > avc1 > avcC | mp4a > esds
//!           stts, [ctts], [stss], stsc, stsz, stco | co64
//! ```

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Seek, Write};

use ms_common::{AudioCodec, VideoCodec};

use crate::atoms::{
    encode_language, mp4_creation_time, rescale_ticks, write_box, write_fixed_point_16_16,
    write_fixed_point_8_8, write_full_box, write_unity_matrix, write_zeros, MOVIE_TIMESCALE,
};
use crate::error::{MuxError, MuxResult};

/// Placement and timing of one sample inside `mdat`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleInfo {
    /// Absolute file offset of the sample bytes.
    pub offset: u64,
    pub size: u32,
    /// Duration in track timescale units.
    pub duration: u32,
    /// PTS - DTS in track timescale units.
    pub composition_offset: i32,
    /// Keyframe.
    pub is_sync: bool,
}

/// Everything needed to emit one `trak`.
#[derive(Clone, Debug)]
pub struct TrackInfo {
    /// 1-based.
    pub track_id: u32,
    pub timescale: u32,
    /// Sum of sample durations, in `timescale` units.
    pub duration: u64,
    pub handler: TrackHandler,
    pub samples: Vec<SampleInfo>,
}

/// Media-specific part of a track.
#[derive(Clone, Debug)]
pub enum TrackHandler {
    Video {
        codec: VideoCodec,
        width: u32,
        height: u32,
        /// SPS NAL unit without start code.
        sps: Vec<u8>,
        /// PPS NAL unit without start code.
        pps: Vec<u8>,
    },
    Audio {
        codec: AudioCodec,
        sample_rate: u32,
        channels: u16,
        bit_rate: u64,
        /// AudioSpecificConfig.
        config_data: Vec<u8>,
    },
}

impl TrackHandler {
    fn is_video(&self) -> bool {
        matches!(self, Self::Video { .. })
    }
}

/// Write the `ftyp` box. Major brand `isom`, compatible `isom iso2 avc1 mp41`.
pub fn write_ftyp<W: Write + Seek>(writer: &mut W) -> MuxResult<()> {
    write_box(writer, b"ftyp", |w| {
        w.write_all(b"isom")?;
        w.write_u32::<BigEndian>(0x200)?; // minor_version
        for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
            w.write_all(brand)?;
        }
        Ok(())
    })
}

/// Write the complete `moov` box for `tracks`.
pub fn write_moov<W: Write + Seek>(writer: &mut W, tracks: &[TrackInfo]) -> MuxResult<()> {
    let movie_duration = tracks
        .iter()
        .map(|t| rescale_ticks(t.duration, t.timescale, MOVIE_TIMESCALE))
        .max()
        .unwrap_or(0);
    let next_track_id = tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1;
    let now = mp4_creation_time();

    write_box(writer, b"moov", |w| {
        write_mvhd(w, now, movie_duration, next_track_id)?;
        for track in tracks {
            write_trak(w, now, track)?;
        }
        Ok(())
    })
}

/// Version 1 is needed once a time or duration no longer fits 32 bits.
fn needs_wide_fields(now: u64, duration: u64) -> bool {
    now > u32::MAX as u64 || duration > u32::MAX as u64
}

fn write_time_field<W: Write>(writer: &mut W, value: u64, wide: bool) -> MuxResult<()> {
    if wide {
        writer.write_u64::<BigEndian>(value)?;
    } else {
        writer.write_u32::<BigEndian>(value as u32)?;
    }
    Ok(())
}

fn write_mvhd<W: Write + Seek>(
    writer: &mut W,
    now: u64,
    duration: u64,
    next_track_id: u32,
) -> MuxResult<()> {
    let wide = needs_wide_fields(now, duration);
    write_full_box(writer, b"mvhd", wide as u8, 0, |w| {
        write_time_field(w, now, wide)?; // creation_time
        write_time_field(w, now, wide)?; // modification_time
        w.write_u32::<BigEndian>(MOVIE_TIMESCALE)?;
        write_time_field(w, duration, wide)?;
        write_fixed_point_16_16(w, 1.0)?; // rate
        write_fixed_point_8_8(w, 1.0)?; // volume
        write_zeros(w, 10)?;
        write_unity_matrix(w)?;
        write_zeros(w, 24)?; // pre_defined
        w.write_u32::<BigEndian>(next_track_id)?;
        Ok(())
    })
}

fn write_trak<W: Write + Seek>(writer: &mut W, now: u64, track: &TrackInfo) -> MuxResult<()> {
    write_box(writer, b"trak", |w| {
        write_tkhd(w, now, track)?;
        write_box(w, b"mdia", |w| {
            write_mdhd(w, now, track)?;
            write_hdlr(w, &track.handler)?;
            write_minf(w, track)
        })
    })
}

fn write_tkhd<W: Write + Seek>(writer: &mut W, now: u64, track: &TrackInfo) -> MuxResult<()> {
    let duration = rescale_ticks(track.duration, track.timescale, MOVIE_TIMESCALE);
    let wide = needs_wide_fields(now, duration);
    // enabled | in_movie
    write_full_box(writer, b"tkhd", wide as u8, 0x000003, |w| {
        write_time_field(w, now, wide)?;
        write_time_field(w, now, wide)?;
        w.write_u32::<BigEndian>(track.track_id)?;
        write_zeros(w, 4)?;
        write_time_field(w, duration, wide)?;
        write_zeros(w, 8)?;
        w.write_i16::<BigEndian>(0)?; // layer
        w.write_i16::<BigEndian>(0)?; // alternate_group
        match track.handler {
            TrackHandler::Audio { .. } => write_fixed_point_8_8(w, 1.0)?,
            TrackHandler::Video { .. } => w.write_u16::<BigEndian>(0)?,
        }
        write_zeros(w, 2)?;
        write_unity_matrix(w)?;
        let (width, height) = match track.handler {
            TrackHandler::Video { width, height, .. } => (width, height),
            TrackHandler::Audio { .. } => (0, 0),
        };
        write_fixed_point_16_16(w, width as f64)?;
        write_fixed_point_16_16(w, height as f64)?;
        Ok(())
    })
}

fn write_mdhd<W: Write + Seek>(writer: &mut W, now: u64, track: &TrackInfo) -> MuxResult<()> {
    let wide = needs_wide_fields(now, track.duration);
    write_full_box(writer, b"mdhd", wide as u8, 0, |w| {
        write_time_field(w, now, wide)?;
        write_time_field(w, now, wide)?;
        w.write_u32::<BigEndian>(track.timescale)?;
        write_time_field(w, track.duration, wide)?;
        w.write_u16::<BigEndian>(encode_language("und"))?;
        w.write_u16::<BigEndian>(0)?;
        Ok(())
    })
}

fn write_hdlr<W: Write + Seek>(writer: &mut W, handler: &TrackHandler) -> MuxResult<()> {
    let (handler_type, name): (&[u8; 4], &[u8]) = match handler {
        TrackHandler::Video { .. } => (b"vide", b"VideoHandler\0"),
        TrackHandler::Audio { .. } => (b"soun", b"SoundHandler\0"),
    };
    write_full_box(writer, b"hdlr", 0, 0, |w| {
        w.write_u32::<BigEndian>(0)?; // pre_defined
        w.write_all(handler_type)?;
        write_zeros(w, 12)?;
        w.write_all(name)?;
        Ok(())
    })
}

fn write_minf<W: Write + Seek>(writer: &mut W, track: &TrackInfo) -> MuxResult<()> {
    write_box(writer, b"minf", |w| {
        if track.handler.is_video() {
            write_full_box(w, b"vmhd", 0, 1, |w| {
                write_zeros(w, 8)?; // graphicsmode + opcolor
                Ok(())
            })?;
        } else {
            write_full_box(w, b"smhd", 0, 0, |w| {
                write_zeros(w, 4)?; // balance + reserved
                Ok(())
            })?;
        }
        write_box(w, b"dinf", |w| {
            write_full_box(w, b"dref", 0, 0, |w| {
                w.write_u32::<BigEndian>(1)?;
                // Self-contained: data lives in this file.
                write_full_box(w, b"url ", 0, 1, |_| Ok(()))
            })
        })?;
        write_stbl(w, track)
    })
}

/// Write the `stbl` box with every sample table of `track`.
pub fn write_stbl<W: Write + Seek>(writer: &mut W, track: &TrackInfo) -> MuxResult<()> {
    let samples = &track.samples;
    write_box(writer, b"stbl", |w| {
        write_stsd(w, &track.handler)?;
        write_stts(w, samples)?;
        if samples.iter().any(|s| s.composition_offset != 0) {
            write_ctts(w, samples)?;
        }
        if track.handler.is_video() && !samples.iter().all(|s| s.is_sync) {
            write_stss(w, samples)?;
        }
        write_stsc(w, samples)?;
        write_stsz(w, samples)?;
        write_chunk_offsets(w, samples)
    })
}

fn write_stsd<W: Write + Seek>(writer: &mut W, handler: &TrackHandler) -> MuxResult<()> {
    write_full_box(writer, b"stsd", 0, 0, |w| {
        w.write_u32::<BigEndian>(1)?; // entry_count
        match handler {
            TrackHandler::Video {
                codec,
                width,
                height,
                sps,
                pps,
            } => write_visual_entry(w, *codec, *width, *height, sps, pps),
            TrackHandler::Audio {
                codec,
                sample_rate,
                channels,
                bit_rate,
                config_data,
            } => write_audio_entry(w, *codec, *sample_rate, *channels, *bit_rate, config_data),
        }
    })
}

fn write_visual_entry<W: Write + Seek>(
    writer: &mut W,
    codec: VideoCodec,
    width: u32,
    height: u32,
    sps: &[u8],
    pps: &[u8],
) -> MuxResult<()> {
    if codec != VideoCodec::H264 {
        return Err(MuxError::InvalidConfig(format!(
            "{} cannot be stored in MP4 by this muxer",
            codec.display_name()
        )));
    }
    let (width, height) = match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => {
            return Err(MuxError::InvalidConfig(format!(
                "Resolution {}x{} exceeds the 16-bit sample entry fields",
                width, height
            )))
        }
    };

    write_box(writer, b"avc1", |w| {
        write_zeros(w, 6)?;
        w.write_u16::<BigEndian>(1)?; // data_reference_index
        write_zeros(w, 16)?; // pre_defined + reserved
        w.write_u16::<BigEndian>(width)?;
        w.write_u16::<BigEndian>(height)?;
        write_fixed_point_16_16(w, 72.0)?; // horizresolution
        write_fixed_point_16_16(w, 72.0)?; // vertresolution
        write_zeros(w, 4)?;
        w.write_u16::<BigEndian>(1)?; // frame_count
        write_zeros(w, 32)?; // compressorname
        w.write_u16::<BigEndian>(0x0018)?; // depth
        w.write_i16::<BigEndian>(-1)?;
        write_avcc(w, sps, pps)
    })
}

/// AVCDecoderConfigurationRecord with one SPS and one PPS, 4-byte NAL lengths.
fn write_avcc<W: Write + Seek>(writer: &mut W, sps: &[u8], pps: &[u8]) -> MuxResult<()> {
    if sps.len() < 4 || pps.is_empty() {
        return Err(MuxError::InvalidConfig(
            "H.264 track has no usable SPS/PPS".into(),
        ));
    }
    write_box(writer, b"avcC", |w| {
        w.write_u8(1)?; // configurationVersion
        w.write_all(&sps[1..4])?; // profile, compatibility, level
        w.write_u8(0xFF)?; // lengthSizeMinusOne = 3
        w.write_u8(0xE1)?; // one SPS
        w.write_u16::<BigEndian>(sps.len() as u16)?;
        w.write_all(sps)?;
        w.write_u8(1)?; // one PPS
        w.write_u16::<BigEndian>(pps.len() as u16)?;
        w.write_all(pps)?;
        Ok(())
    })
}

fn write_audio_entry<W: Write + Seek>(
    writer: &mut W,
    codec: AudioCodec,
    sample_rate: u32,
    channels: u16,
    bit_rate: u64,
    config_data: &[u8],
) -> MuxResult<()> {
    if codec != AudioCodec::Aac {
        return Err(MuxError::InvalidConfig(format!(
            "{} cannot be stored in MP4 by this muxer",
            codec.display_name()
        )));
    }
    write_box(writer, b"mp4a", |w| {
        write_zeros(w, 6)?;
        w.write_u16::<BigEndian>(1)?; // data_reference_index
        write_zeros(w, 8)?;
        w.write_u16::<BigEndian>(channels)?;
        w.write_u16::<BigEndian>(16)?; // samplesize
        write_zeros(w, 4)?;
        // 16.16 with the integer part only; rates above 65535 Hz are clamped.
        w.write_u32::<BigEndian>(sample_rate.min(u16::MAX as u32) << 16)?;
        write_esds(w, bit_rate, config_data)
    })
}

fn write_esds<W: Write + Seek>(writer: &mut W, bit_rate: u64, config_data: &[u8]) -> MuxResult<()> {
    let bit_rate = bit_rate.min(u32::MAX as u64) as u32;
    let decoder_specific_len = descriptor_header_len(config_data.len()) + config_data.len();
    let decoder_config_len = 13 + decoder_specific_len;
    let es_len = 3 + descriptor_header_len(decoder_config_len) + decoder_config_len + 3;

    write_full_box(writer, b"esds", 0, 0, |w| {
        w.write_u8(0x03)?; // ES_DescrTag
        write_descriptor_length(w, es_len)?;
        w.write_u16::<BigEndian>(1)?; // ES_ID
        w.write_u8(0)?; // flags

        w.write_u8(0x04)?; // DecoderConfigDescrTag
        write_descriptor_length(w, decoder_config_len)?;
        w.write_u8(0x40)?; // MPEG-4 audio
        w.write_u8(0x15)?; // audio stream
        w.write_u24::<BigEndian>(0)?; // bufferSizeDB
        w.write_u32::<BigEndian>(bit_rate)?; // maxBitrate
        w.write_u32::<BigEndian>(bit_rate)?; // avgBitrate

        w.write_u8(0x05)?; // DecSpecificInfoTag
        write_descriptor_length(w, config_data.len())?;
        w.write_all(config_data)?;

        w.write_u8(0x06)?; // SLConfigDescrTag
        write_descriptor_length(w, 1)?;
        w.write_u8(0x02)?;
        Ok(())
    })
}

/// Tag byte plus encoded length.
fn descriptor_header_len(len: usize) -> usize {
    if len < 0x80 {
        2
    } else {
        5
    }
}

/// MPEG-4 descriptor sizes: short lengths take one byte, longer ones are
/// written as 7-bit groups with a continuation bit.
fn write_descriptor_length<W: Write>(writer: &mut W, len: usize) -> MuxResult<()> {
    if len < 0x80 {
        writer.write_u8(len as u8)?;
        return Ok(());
    }
    let groups = [(len >> 21) & 0x7F, (len >> 14) & 0x7F, (len >> 7) & 0x7F];
    for group in groups {
        writer.write_u8(group as u8 | 0x80)?;
    }
    writer.write_u8((len & 0x7F) as u8)?;
    Ok(())
}

fn write_stts<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let runs = run_lengths(samples.iter().map(|s| s.duration));
    write_full_box(writer, b"stts", 0, 0, |w| {
        w.write_u32::<BigEndian>(runs.len() as u32)?;
        for (count, delta) in runs {
            w.write_u32::<BigEndian>(count)?;
            w.write_u32::<BigEndian>(delta)?;
        }
        Ok(())
    })
}

fn write_ctts<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let runs = run_lengths(samples.iter().map(|s| s.composition_offset));
    // Version 1 allows signed offsets.
    let version = runs.iter().any(|(_, offset)| *offset < 0) as u8;
    write_full_box(writer, b"ctts", version, 0, |w| {
        w.write_u32::<BigEndian>(runs.len() as u32)?;
        for (count, offset) in runs {
            w.write_u32::<BigEndian>(count)?;
            w.write_i32::<BigEndian>(offset)?;
        }
        Ok(())
    })
}

/// Collapse consecutive equal values into `(count, value)` entries.
fn run_lengths<T: PartialEq + Copy>(values: impl Iterator<Item = T>) -> Vec<(u32, T)> {
    let mut runs: Vec<(u32, T)> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some((count, last)) if *last == value => *count += 1,
            _ => runs.push((1, value)),
        }
    }
    runs
}

fn write_stss<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let sync: Vec<u32> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_sync)
        .map(|(i, _)| i as u32 + 1)
        .collect();
    write_full_box(writer, b"stss", 0, 0, |w| {
        w.write_u32::<BigEndian>(sync.len() as u32)?;
        for number in sync {
            w.write_u32::<BigEndian>(number)?;
        }
        Ok(())
    })
}

/// Every sample is its own chunk, so one entry covers the whole track.
fn write_stsc<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    write_full_box(writer, b"stsc", 0, 0, |w| {
        if samples.is_empty() {
            w.write_u32::<BigEndian>(0)?;
        } else {
            w.write_u32::<BigEndian>(1)?;
            w.write_u32::<BigEndian>(1)?; // first_chunk
            w.write_u32::<BigEndian>(1)?; // samples_per_chunk
            w.write_u32::<BigEndian>(1)?; // sample_description_index
        }
        Ok(())
    })
}

fn write_stsz<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let uniform = match samples.first() {
        Some(first) if samples.iter().all(|s| s.size == first.size) => first.size,
        _ => 0,
    };
    write_full_box(writer, b"stsz", 0, 0, |w| {
        w.write_u32::<BigEndian>(uniform)?;
        w.write_u32::<BigEndian>(samples.len() as u32)?;
        if uniform == 0 {
            for sample in samples {
                w.write_u32::<BigEndian>(sample.size)?;
            }
        }
        Ok(())
    })
}

/// `stco` while every offset fits 32 bits, `co64` otherwise.
fn write_chunk_offsets<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let wide = samples.iter().any(|s| s.offset > u32::MAX as u64);
    let box_type = if wide { b"co64" } else { b"stco" };
    write_full_box(writer, box_type, 0, 0, |w| {
        w.write_u32::<BigEndian>(samples.len() as u32)?;
        for sample in samples {
            if wide {
                w.write_u64::<BigEndian>(sample.offset)?;
            } else {
                w.write_u32::<BigEndian>(sample.offset as u32)?;
            }
        }
        Ok(())
    })
}
