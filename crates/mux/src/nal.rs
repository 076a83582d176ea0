//! H.264 NAL unit helpers: Annex-B splitting, length-prefix conversion and
//! SPS/PPS capture for the `avcC` record.

/// NAL unit type for H.264.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum H264NalType {
    Slice,
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    Other(u8),
}

impl From<u8> for H264NalType {
    fn from(header: u8) -> Self {
        match header & 0x1F {
            1 => Self::Slice,
            5 => Self::Idr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            other => Self::Other(other),
        }
    }
}

/// 4-byte Annex-B start code.
pub const ANNEXB_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Does `data` begin with a 3- or 4-byte start code?
pub fn is_annexb(data: &[u8]) -> bool {
    data.starts_with(&[0, 0, 1]) || data.starts_with(&ANNEXB_START_CODE)
}

/// Iterate the NAL units of an Annex-B byte stream, start codes stripped.
pub fn split_annexb(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = match find_start_code(data) {
        Some((_, end)) => &data[end..],
        None => &data[data.len()..],
    };
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let nal = match find_start_code(rest) {
            Some((start, end)) => {
                let nal = &rest[..start];
                rest = &rest[end..];
                nal
            }
            None => std::mem::take(&mut rest),
        };
        Some(trim_trailing_zeros(nal))
    })
    .filter(|nal| !nal.is_empty())
}

/// Position of the next `00 00 01` and the index just past it.
fn find_start_code(data: &[u8]) -> Option<(usize, usize)> {
    data.windows(3)
        .position(|w| w == [0, 0, 1])
        .map(|pos| (pos, pos + 3))
}

/// The zero byte of a 4-byte start code belongs to the previous NAL's tail.
fn trim_trailing_zeros(nal: &[u8]) -> &[u8] {
    let end = nal.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &nal[..end]
}

/// Rewrite an Annex-B access unit as 4-byte length-prefixed NAL units into
/// `out`. Access unit delimiters are dropped.
pub fn annexb_to_length_prefixed(data: &[u8], out: &mut Vec<u8>) {
    out.clear();
    for nal in split_annexb(data) {
        if H264NalType::from(nal[0]) == H264NalType::Aud {
            continue;
        }
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
}

/// SPS and PPS found in an access unit or an extradata blob.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterSets {
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
}

impl ParameterSets {
    pub fn is_complete(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    /// Take any parameter sets present in an Annex-B access unit. Already
    /// captured sets are kept.
    pub fn capture_annexb(&mut self, data: &[u8]) {
        for nal in split_annexb(data) {
            match H264NalType::from(nal[0]) {
                H264NalType::Sps if self.sps.is_none() => self.sps = Some(nal.to_vec()),
                H264NalType::Pps if self.pps.is_none() => self.pps = Some(nal.to_vec()),
                _ => {}
            }
        }
    }

    /// Parse codec extradata, either Annex-B or an `avcC` record.
    pub fn from_extradata(extradata: &[u8]) -> Self {
        let mut sets = Self::default();
        if is_annexb(extradata) {
            sets.capture_annexb(extradata);
        } else {
            sets.capture_avcc_record(extradata);
        }
        sets
    }

    fn capture_avcc_record(&mut self, record: &[u8]) {
        // version, profile, compat, level, length size, SPS count
        if record.len() < 6 || record[0] != 1 {
            return;
        }
        let mut pos = 5;
        let sps_count = record[pos] & 0x1F;
        pos += 1;
        for _ in 0..sps_count {
            match read_sized(record, &mut pos) {
                Some(sps) if self.sps.is_none() => self.sps = Some(sps.to_vec()),
                Some(_) => {}
                None => return,
            }
        }
        let Some(&pps_count) = record.get(pos) else {
            return;
        };
        pos += 1;
        for _ in 0..pps_count {
            match read_sized(record, &mut pos) {
                Some(pps) if self.pps.is_none() => self.pps = Some(pps.to_vec()),
                Some(_) => {}
                None => return,
            }
        }
    }
}

/// Read a u16-length-prefixed blob at `pos`, advancing it.
fn read_sized<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let len_bytes = data.get(*pos..*pos + 2)?;
    let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let body = data.get(*pos + 2..*pos + 2 + len)?;
    *pos += 2 + len;
    Some(body)
}
