//! Low-level MP4 atom/box writing primitives.
//!
//! MP4 files are structured as nested boxes (atoms). Each box has:
//! - 4-byte big-endian size (includes header)
//! - 4-byte ASCII type (e.g. "ftyp", "moov", "mdat")
//!
//! "Full boxes" additionally have a 1-byte version and 3-byte flags.
//! Nested boxes are written with a size placeholder that is patched once the
//! body is complete, see [`write_box`].

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{MuxError, MuxResult};

/// Movie-level timescale (1000 = millisecond precision).
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Seconds between the MP4 epoch (1904-01-01) and the Unix epoch.
pub const MP4_EPOCH_OFFSET: u64 = 2_082_844_800;

/// Write a box whose size is only known after `body` has run.
pub fn write_box<W, F>(writer: &mut W, box_type: &[u8; 4], body: F) -> MuxResult<()>
where
    W: Write + Seek,
    F: FnOnce(&mut W) -> MuxResult<()>,
{
    let size_pos = box_size_placeholder(writer)?;
    writer.write_all(box_type)?;
    body(writer)?;
    fill_box_size(writer, size_pos)
}

/// Like [`write_box`], with the version/flags word of a "full box".
pub fn write_full_box<W, F>(
    writer: &mut W,
    box_type: &[u8; 4],
    version: u8,
    flags: u32,
    body: F,
) -> MuxResult<()>
where
    W: Write + Seek,
    F: FnOnce(&mut W) -> MuxResult<()>,
{
    write_box(writer, box_type, |w| {
        write_version_flags(w, version, flags)?;
        body(w)
    })
}

/// Write the combined 1-byte version + 3-byte flags field.
pub fn write_version_flags<W: Write>(writer: &mut W, version: u8, flags: u32) -> MuxResult<()> {
    writer.write_u32::<BigEndian>(((version as u32) << 24) | (flags & 0x00FF_FFFF))?;
    Ok(())
}

/// Write a box size placeholder (4 bytes of zeros) and return the stream
/// position where the size should be patched later.
pub fn box_size_placeholder<W: Write + Seek>(writer: &mut W) -> MuxResult<u64> {
    let pos = writer.stream_position()?;
    writer.write_u32::<BigEndian>(0)?;
    Ok(pos)
}

/// Patch the box size at `size_pos` with the distance to the current position.
pub fn fill_box_size<W: Write + Seek>(writer: &mut W, size_pos: u64) -> MuxResult<()> {
    let current = writer.stream_position()?;
    let size = current - size_pos;
    if size > u32::MAX as u64 {
        return Err(MuxError::BufferFull(format!(
            "Box size {} exceeds 32-bit limit",
            size
        )));
    }

    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u32::<BigEndian>(size as u32)?;
    writer.seek(SeekFrom::Start(current))?;
    Ok(())
}

/// Write the header of a 64-bit box with a zero extended size and return the
/// position of the extended size field.
pub fn large_box_size_placeholder<W: Write + Seek>(
    writer: &mut W,
    box_type: &[u8; 4],
) -> MuxResult<u64> {
    writer.write_u32::<BigEndian>(1)?; // size=1 signals extended size
    writer.write_all(box_type)?;
    let size_pos = writer.stream_position()?;
    writer.write_u64::<BigEndian>(0)?;
    Ok(size_pos)
}

/// Fill in a 64-bit extended size. `size_pos` points at the 8-byte field that
/// follows the 8-byte compact header.
pub fn fill_large_box_size<W: Write + Seek>(writer: &mut W, size_pos: u64) -> MuxResult<()> {
    let current = writer.stream_position()?;
    let total_size = current - (size_pos - 8);
    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u64::<BigEndian>(total_size)?;
    writer.seek(SeekFrom::Start(current))?;
    Ok(())
}

/// Convert `ticks` from one integer timescale to another, rounding to nearest.
pub fn rescale_ticks(ticks: u64, from_timescale: u32, to_timescale: u32) -> u64 {
    if from_timescale == 0 {
        return 0;
    }
    let scaled = (ticks as u128 * to_timescale as u128 + from_timescale as u128 / 2)
        / from_timescale as u128;
    scaled.min(u64::MAX as u128) as u64
}

/// Write a fixed-point 16.16 number.
pub fn write_fixed_point_16_16<W: Write>(writer: &mut W, value: f64) -> MuxResult<()> {
    writer.write_i32::<BigEndian>((value * 65536.0).round() as i32)?;
    Ok(())
}

/// Write a fixed-point 8.8 number.
pub fn write_fixed_point_8_8<W: Write>(writer: &mut W, value: f64) -> MuxResult<()> {
    writer.write_i16::<BigEndian>((value * 256.0).round() as i16)?;
    Ok(())
}

/// Write the 3x3 unity transformation matrix used by mvhd and tkhd.
pub fn write_unity_matrix<W: Write>(writer: &mut W) -> MuxResult<()> {
    for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        writer.write_u32::<BigEndian>(value)?;
    }
    Ok(())
}

/// Write zero padding bytes.
pub fn write_zeros<W: Write>(writer: &mut W, count: usize) -> MuxResult<()> {
    const ZEROS: [u8; 64] = [0; 64];
    let mut left = count;
    while left > 0 {
        let n = left.min(ZEROS.len());
        writer.write_all(&ZEROS[..n])?;
        left -= n;
    }
    Ok(())
}

/// ISO 639-2/T language code packed into 3x5 bits. Falls back to "und".
pub fn encode_language(lang: &str) -> u16 {
    let bytes = lang.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_lowercase) {
        return encode_language("und");
    }
    bytes
        .iter()
        .fold(0u16, |acc, b| (acc << 5) | (b - 0x60) as u16)
}

/// Current wall-clock time as seconds since the MP4 epoch.
pub fn mp4_creation_time() -> u64 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    MP4_EPOCH_OFFSET + unix
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_box_patches_size() {
        let mut cursor = Cursor::new(Vec::new());
        write_box(&mut cursor, b"moov", |w| {
            w.write_all(&[0xAA; 20])?;
            Ok(())
        })
        .unwrap();
        let buf = cursor.into_inner();
        assert_eq!(buf.len(), 28);
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 28]);
        assert_eq!(&buf[4..8], b"moov");
    }

    #[test]
    fn test_nested_boxes() {
        let mut cursor = Cursor::new(Vec::new());
        write_box(&mut cursor, b"trak", |w| {
            write_full_box(w, b"tkhd", 1, 0x000003, |w| {
                w.write_all(&[0u8; 4])?;
                Ok(())
            })
        })
        .unwrap();
        let buf = cursor.into_inner();
        assert_eq!(buf.len(), 8 + 16);
        assert_eq!(u32::from_be_bytes(buf[0..4].try_into().unwrap()), 24);
        assert_eq!(&buf[12..16], b"tkhd");
        assert_eq!(u32::from_be_bytes(buf[8..12].try_into().unwrap()), 16);
        // Version 1, flags 3
        assert_eq!(&buf[16..20], &[0x01, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_large_box_placeholder_and_fill() {
        let mut cursor = Cursor::new(Vec::new());
        let size_pos = large_box_size_placeholder(&mut cursor, b"mdat").unwrap();
        cursor.write_all(&[0xBB; 32]).unwrap();
        fill_large_box_size(&mut cursor, size_pos).unwrap();

        let buf = cursor.into_inner();
        // 4 (size=1) + 4 (type) + 8 (extended size) + 32 (data)
        assert_eq!(buf.len(), 48);
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(u64::from_be_bytes(buf[8..16].try_into().unwrap()), 48);
    }

    #[test]
    fn test_rescale_ticks() {
        assert_eq!(rescale_ticks(25, 25, MOVIE_TIMESCALE), 1000);
        assert_eq!(rescale_ticks(22050, 22050, MOVIE_TIMESCALE), 1000);
        assert_eq!(rescale_ticks(1, 3, 1000), 333);
        assert_eq!(rescale_ticks(10, 0, 1000), 0);
    }

    #[test]
    fn test_fixed_point() {
        let mut buf = Vec::new();
        write_fixed_point_16_16(&mut buf, 1.0).unwrap();
        write_fixed_point_8_8(&mut buf, 1.0).unwrap();
        assert_eq!(&buf, &[0x00, 0x01, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_unity_matrix_is_36_bytes() {
        let mut buf = Vec::new();
        write_unity_matrix(&mut buf).unwrap();
        assert_eq!(buf.len(), 36);
        assert_eq!(&buf[32..36], &[0x40, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_write_zeros_spans_chunks() {
        let mut buf = Vec::new();
        write_zeros(&mut buf, 150).unwrap();
        assert_eq!(buf, vec![0u8; 150]);
    }

    #[test]
    fn test_encode_language() {
        assert_eq!(encode_language("und"), 0x55C4);
        assert_eq!(encode_language("eng"), 5575);
        assert_eq!(encode_language("EN"), 0x55C4);
    }

    #[test]
    fn test_mp4_creation_time_after_epoch_offset() {
        assert!(mp4_creation_time() > MP4_EPOCH_OFFSET);
    }
}
