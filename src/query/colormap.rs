//! Fixed 256-entry colormaps for waterfall tiles.
//!
//! Tiles quantise the normalized power of a cell to one of 256 lookup
//! entries, so every cell costs one table read regardless of gradient math.

use serde::{Deserialize, Serialize};

/// Colormap selection for tile rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColormapType {
    /// Viridis (perceptually uniform); the default for spectrum display.
    #[default]
    Viridis,
    /// Black to white.
    Grayscale,
    /// White to black.
    GrayscaleInverted,
}

/// A materialised 256-entry RGB lookup table.
pub struct Colormap {
    lut: [[u8; 3]; 256],
}

impl Colormap {
    pub fn new(kind: ColormapType) -> Self {
        match kind {
            ColormapType::Viridis => Self::from_gradient(&colorgrad::preset::viridis()),
            ColormapType::Grayscale => Self::grayscale(false),
            ColormapType::GrayscaleInverted => Self::grayscale(true),
        }
    }

    /// Sample a `colorgrad` gradient into the lookup table.
    fn from_gradient(gradient: &impl colorgrad::Gradient) -> Self {
        let mut lut = [[0u8; 3]; 256];
        for (i, entry) in lut.iter_mut().enumerate() {
            let t = i as f32 / 255.0;
            let [r, g, b, _] = gradient.at(t).to_rgba8();
            *entry = [r, g, b];
        }
        Self { lut }
    }

    fn grayscale(inverted: bool) -> Self {
        let mut lut = [[0u8; 3]; 256];
        for (i, entry) in lut.iter_mut().enumerate() {
            let v = if inverted { 255 - i as u8 } else { i as u8 };
            *entry = [v, v, v];
        }
        Self { lut }
    }

    /// Map normalized power [0.0, 1.0] to an RGB color.
    pub fn lookup(&self, normalized: f32) -> [u8; 3] {
        let index = (normalized.clamp(0.0, 1.0) * 255.0).round() as usize;
        self.lut[index.min(255)]
    }
}
