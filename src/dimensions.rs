//! Output dimension normalization
//!
//! H.264 with 4:2:0 chroma subsampling needs even frame sizes. Requested sizes
//! are rounded up, never down, so the output is never smaller than asked.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    /// Default frame for single-image-to-video conversion.
    pub const STILL: Dimensions = Dimensions::new(700, 394);
    /// Default frame for multi-layer composition.
    pub const COMPOSITION: Dimensions = Dimensions::new(1280, 720);
    /// Largest side a request may ask for. Larger requests are clamped.
    pub const MAX_SIDE: u32 = 16384;

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn normalized(self) -> Self {
        let (width, height) = normalize(self.width, self.height);
        Self { width, height }
    }

    /// Resolve a requested size against `defaults`, then normalize.
    ///
    /// Each side falls back independently when absent or non-positive, and
    /// is clamped to [`Dimensions::MAX_SIDE`].
    pub fn resolve(width: Option<i64>, height: Option<i64>, defaults: Dimensions) -> Self {
        let pick = |requested: Option<i64>, fallback: u32| match requested {
            Some(v) if v > 0 => v.min(i64::from(Self::MAX_SIDE)) as u32,
            _ => fallback,
        };

        Self::new(
            pick(width, defaults.width),
            pick(height, defaults.height),
        )
        .normalized()
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Round each odd dimension up to the next even number.
///
/// `u32::MAX` has no even successor and saturates to `u32::MAX - 1`. Sizes
/// coming through [`Dimensions::resolve`] never get near it.
pub fn normalize(width: u32, height: u32) -> (u32, u32) {
    (round_up_even(width), round_up_even(height))
}

fn round_up_even(v: u32) -> u32 {
    if v % 2 == 0 {
        v
    } else {
        v.saturating_add(1).min(u32::MAX - 1)
    }
}
