//! YUV / RGBA conversion, crop and rotation kernels.
//!
//! Coefficients follow ITU-R BT.601:
//!
//! ```text
//! R = 1.164 * (Y-16)                    + 1.596 * (Cr-128)
//! G = 1.164 * (Y-16) - 0.392 * (Cb-128) - 0.813 * (Cr-128)
//! B = 1.164 * (Y-16) + 2.017 * (Cb-128)
//!
//! Y  =  0.257 * R + 0.504 * G + 0.098 * B + 16
//! Cb = -0.148 * R - 0.291 * G + 0.439 * B + 128
//! Cr =  0.439 * R - 0.368 * G - 0.071 * B + 128
//! ```
//!
//! The production kernels use shift-add fixed point instead of float math;
//! on the reference 640x480 stream the fixed-point form measured roughly a
//! quarter faster than the float form at a worst-case cost of a few levels
//! per channel. The float forms survive only in the test module, where they
//! bound the fixed-point error.
//!
//! Semi-planar buffers are laid out as a full-resolution luma plane followed
//! by 2x2-subsampled interleaved chroma rows, Cr before Cb in each pair.
//! All kernels are single fused passes over the source; the 90-degree paths
//! write straight into transposed destination coordinates, never through an
//! intermediate rotated copy.

mod crop;
mod to_rgba;
mod to_yuv;

pub use crop::{
    planar_crop, planar_crop_flip, planar_crop_rotate180, planar_crop_rotate180_flip, yuv_crop,
    yuv_crop_flip, yuv_crop_rotate180, yuv_crop_rotate180_flip,
};
pub use to_rgba::{planar_to_rgba, yuv_to_rgba};
pub use to_yuv::{rgba_to_yuv_rotate90, rgba_to_yuv_rotate90_flip};

/// Borrowed view of a planar YUV image. Chroma planes are 2x2 subsampled and
/// sampled with a per-plane pixel stride, so an interleaved chroma plane can
/// be viewed as two overlapping planes with stride 2.
#[derive(Clone, Copy)]
pub struct PlanarView<'a> {
    pub width: u32,
    pub height: u32,
    pub y: &'a [u8],
    pub cb: &'a [u8],
    pub cr: &'a [u8],
    pub cb_pixel_stride: usize,
    pub cr_pixel_stride: usize,
}

impl<'a> PlanarView<'a> {
    pub(crate) fn assert_capacity(&self) {
        let w = self.width as usize;
        let h = self.height as usize;
        debug_assert!(self.y.len() >= w * h, "luma plane undersized");
        let chroma_samples = (w / 2) * (h / 2);
        if chroma_samples > 0 {
            debug_assert!(
                self.cb.len() >= (chroma_samples - 1) * self.cb_pixel_stride + 1,
                "cb plane undersized for declared pixel stride"
            );
            debug_assert!(
                self.cr.len() >= (chroma_samples - 1) * self.cr_pixel_stride + 1,
                "cr plane undersized for declared pixel stride"
            );
        }
    }
}

/// Byte length of a semi-planar buffer for the given dimensions.
pub fn yuv_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3 / 2
}

/// Side-channel output height: the source width scaled by the display aspect
/// ratio, aligned down to 16 rows.
pub fn aligned_video_height(src_width: u32, output_width: u32, output_height: u32) -> u32 {
    debug_assert!(output_height != 0, "output height must be non-zero");
    (src_width * output_width / output_height) & !0xF
}
