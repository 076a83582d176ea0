//! AAC AudioSpecificConfig, needed by the `esds` box when the encoder did not
//! supply one.

/// Sampling frequencies addressable by the 4-bit index.
pub const SAMPLING_FREQUENCIES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
    8_000, 7_350,
];

/// AAC-LC audio object type.
const OBJECT_TYPE_AAC_LC: u8 = 2;

/// Index of `sample_rate` in [`SAMPLING_FREQUENCIES`].
pub fn sampling_frequency_index(sample_rate: u32) -> Option<u8> {
    SAMPLING_FREQUENCIES
        .iter()
        .position(|&rate| rate == sample_rate)
        .map(|i| i as u8)
}

/// Build an AAC-LC AudioSpecificConfig for the given rate and channel count.
///
/// Rates outside the index table use the explicit 24-bit escape form.
pub fn audio_specific_config(sample_rate: u32, channels: u16) -> Vec<u8> {
    let channel_config = channels.min(7) as u32;
    let mut bits = BitWriter::default();
    bits.put(OBJECT_TYPE_AAC_LC as u32, 5);
    match sampling_frequency_index(sample_rate) {
        Some(index) => bits.put(index as u32, 4),
        None => {
            bits.put(0x0F, 4);
            bits.put(sample_rate & 0x00FF_FFFF, 24);
        }
    }
    bits.put(channel_config, 4);
    bits.put(0, 3); // frameLength, dependsOnCoreCoder, extensionFlag
    bits.finish()
}

/// MSB-first bit packer.
#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    used: u8,
}

impl BitWriter {
    fn put(&mut self, value: u32, width: u8) {
        for shift in (0..width).rev() {
            if self.used == 0 {
                self.bytes.push(0);
            }
            let bit = ((value >> shift) & 1) as u8;
            if let Some(last) = self.bytes.last_mut() {
                *last |= bit << (7 - self.used);
            }
            self.used = (self.used + 1) % 8;
        }
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}
