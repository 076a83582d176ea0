//! Pixel formats accepted by the video encoders.

use serde::{Deserialize, Serialize};

/// Pixel format of the frames fed to a video encoder.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar 4:2:0, limited range. The default for H.264/H.265.
    #[default]
    Yuv420p,
    /// Planar 4:2:0, full (JPEG) range.
    Yuvj420p,
    /// NV12: Y plane + interleaved UV at half resolution.
    Nv12,
}

impl PixelFormat {
    /// Chroma is subsampled in both directions, so dimensions must be even.
    pub fn requires_even_dimensions(self) -> bool {
        matches!(self, Self::Yuv420p | Self::Yuvj420p | Self::Nv12)
    }
}
