//! Preview size negotiation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

impl PreviewSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Narrowest supported size covering the request on both axes, with minimum
/// area as the tie-break. Sensor sizes are landscape-oriented, so the request
/// is normalized to long-edge-first before comparing. When nothing qualifies
/// the exact request is returned unmodified.
pub fn choose_preview_size(
    supported: &[PreviewSize],
    desired_width: u32,
    desired_height: u32,
) -> PreviewSize {
    let (long, short) = if desired_width > desired_height {
        (desired_width, desired_height)
    } else {
        (desired_height, desired_width)
    };
    supported
        .iter()
        .copied()
        .filter(|s| s.width >= long && s.height >= short)
        .min_by_key(|s| s.area())
        .unwrap_or(PreviewSize::new(desired_width, desired_height))
}
