//! Fused crop / rotate / mirror kernels for the non-GPU output path.
//!
//! All variants center-crop the source vertically to a 16-aligned output
//! height while keeping the full width, then apply the named orientation
//! change in the same pass. Mirrored variants keep each chroma pair in
//! Cr-then-Cb order while mirroring the pair positions.

use super::PlanarView;

fn crop_delta(height: usize, output_height: usize) -> usize {
    debug_assert!(output_height > 0, "output height must be non-zero");
    debug_assert!(output_height <= height, "crop cannot grow the image");
    let delta = (height - output_height) / 2;
    debug_assert!(delta % 2 == 0, "crop offset must keep chroma rows aligned");
    delta
}

/// Plain center crop.
pub fn yuv_crop(width: u32, height: u32, yuv: &[u8], output_height: u32, out: &mut [u8]) {
    let w = width as usize;
    let h = height as usize;
    let oh = output_height as usize;
    let delta = crop_delta(h, oh);
    debug_assert!(yuv.len() >= w * h * 3 / 2, "yuv buffer undersized");
    debug_assert!(out.len() >= w * oh * 3 / 2, "output buffer undersized");

    let src_size = w * h;
    let dst_size = w * oh;
    for y in delta..h - delta {
        let dst = (y - delta) * w;
        out[dst..dst + w].copy_from_slice(&yuv[y * w..y * w + w]);
    }
    for r in 0..oh / 2 {
        let src = src_size + (delta / 2 + r) * w;
        let dst = dst_size + r * w;
        out[dst..dst + w].copy_from_slice(&yuv[src..src + w]);
    }
}

/// Center crop plus horizontal mirror.
pub fn yuv_crop_flip(width: u32, height: u32, yuv: &[u8], output_height: u32, out: &mut [u8]) {
    let w = width as usize;
    let h = height as usize;
    let oh = output_height as usize;
    let delta = crop_delta(h, oh);
    debug_assert!(yuv.len() >= w * h * 3 / 2, "yuv buffer undersized");
    debug_assert!(out.len() >= w * oh * 3 / 2, "output buffer undersized");

    let src_size = w * h;
    let dst_size = w * oh;
    for y in delta..h - delta {
        let src = y * w;
        let dst = (y - delta) * w;
        for x in 0..w {
            out[dst + w - 1 - x] = yuv[src + x];
        }
    }
    for r in 0..oh / 2 {
        let src = src_size + (delta / 2 + r) * w;
        let dst = dst_size + r * w;
        for x in (0..w).step_by(2) {
            out[dst + w - 2 - x] = yuv[src + x];
            out[dst + w - 1 - x] = yuv[src + x + 1];
        }
    }
}

/// Center crop plus 180-degree rotation.
pub fn yuv_crop_rotate180(width: u32, height: u32, yuv: &[u8], output_height: u32, out: &mut [u8]) {
    let w = width as usize;
    let h = height as usize;
    let oh = output_height as usize;
    let delta = crop_delta(h, oh);
    debug_assert!(yuv.len() >= w * h * 3 / 2, "yuv buffer undersized");
    debug_assert!(out.len() >= w * oh * 3 / 2, "output buffer undersized");

    let src_size = w * h;
    let dst_size = w * oh;
    for y in delta..h - delta {
        let src = y * w;
        let dst = (oh - 1 - (y - delta)) * w;
        for x in 0..w {
            out[dst + w - 1 - x] = yuv[src + x];
        }
    }
    for r in 0..oh / 2 {
        let src = src_size + (delta / 2 + r) * w;
        let dst = dst_size + (oh / 2 - 1 - r) * w;
        for x in (0..w).step_by(2) {
            out[dst + w - 2 - x] = yuv[src + x];
            out[dst + w - 1 - x] = yuv[src + x + 1];
        }
    }
}

/// Center crop plus 180-degree rotation plus horizontal mirror, which nets
/// out to a vertical flip.
pub fn yuv_crop_rotate180_flip(
    width: u32,
    height: u32,
    yuv: &[u8],
    output_height: u32,
    out: &mut [u8],
) {
    let w = width as usize;
    let h = height as usize;
    let oh = output_height as usize;
    let delta = crop_delta(h, oh);
    debug_assert!(yuv.len() >= w * h * 3 / 2, "yuv buffer undersized");
    debug_assert!(out.len() >= w * oh * 3 / 2, "output buffer undersized");

    let src_size = w * h;
    let dst_size = w * oh;
    for y in delta..h - delta {
        let src = y * w;
        let dst = (oh - 1 - (y - delta)) * w;
        out[dst..dst + w].copy_from_slice(&yuv[src..src + w]);
    }
    for r in 0..oh / 2 {
        let src = src_size + (delta / 2 + r) * w;
        let dst = dst_size + (oh / 2 - 1 - r) * w;
        out[dst..dst + w].copy_from_slice(&yuv[src..src + w]);
    }
}

/// Planar-input equivalent of [`yuv_crop`], emitting a semi-planar buffer.
pub fn planar_crop(img: &PlanarView<'_>, output_height: u32, out: &mut [u8]) {
    img.assert_capacity();
    let w = img.width as usize;
    let h = img.height as usize;
    let oh = output_height as usize;
    let delta = crop_delta(h, oh);
    debug_assert!(out.len() >= w * oh * 3 / 2, "output buffer undersized");

    let dst_size = w * oh;
    for y in delta..h - delta {
        let dst = (y - delta) * w;
        out[dst..dst + w].copy_from_slice(&img.y[y * w..y * w + w]);
    }
    for r in 0..oh / 2 {
        let sy = delta + 2 * r;
        let dst = dst_size + r * w;
        for x in (0..w).step_by(2) {
            let ci = ((sy >> 1) * w + x) >> 1;
            out[dst + x] = img.cr[ci * img.cr_pixel_stride];
            out[dst + x + 1] = img.cb[ci * img.cb_pixel_stride];
        }
    }
}

/// Planar-input equivalent of [`yuv_crop_flip`].
pub fn planar_crop_flip(img: &PlanarView<'_>, output_height: u32, out: &mut [u8]) {
    img.assert_capacity();
    let w = img.width as usize;
    let h = img.height as usize;
    let oh = output_height as usize;
    let delta = crop_delta(h, oh);
    debug_assert!(out.len() >= w * oh * 3 / 2, "output buffer undersized");

    let dst_size = w * oh;
    for y in delta..h - delta {
        let src = y * w;
        let dst = (y - delta) * w;
        for x in 0..w {
            out[dst + w - 1 - x] = img.y[src + x];
        }
    }
    for r in 0..oh / 2 {
        let sy = delta + 2 * r;
        let dst = dst_size + r * w;
        for x in (0..w).step_by(2) {
            let ci = ((sy >> 1) * w + x) >> 1;
            out[dst + w - 2 - x] = img.cr[ci * img.cr_pixel_stride];
            out[dst + w - 1 - x] = img.cb[ci * img.cb_pixel_stride];
        }
    }
}

/// Planar-input equivalent of [`yuv_crop_rotate180`].
pub fn planar_crop_rotate180(img: &PlanarView<'_>, output_height: u32, out: &mut [u8]) {
    img.assert_capacity();
    let w = img.width as usize;
    let h = img.height as usize;
    let oh = output_height as usize;
    let delta = crop_delta(h, oh);
    debug_assert!(out.len() >= w * oh * 3 / 2, "output buffer undersized");

    let dst_size = w * oh;
    for y in delta..h - delta {
        let src = y * w;
        let dst = (oh - 1 - (y - delta)) * w;
        for x in 0..w {
            out[dst + w - 1 - x] = img.y[src + x];
        }
    }
    for r in 0..oh / 2 {
        let sy = delta + 2 * r;
        let dst = dst_size + (oh / 2 - 1 - r) * w;
        for x in (0..w).step_by(2) {
            let ci = ((sy >> 1) * w + x) >> 1;
            out[dst + w - 2 - x] = img.cr[ci * img.cr_pixel_stride];
            out[dst + w - 1 - x] = img.cb[ci * img.cb_pixel_stride];
        }
    }
}

/// Planar-input equivalent of [`yuv_crop_rotate180_flip`].
pub fn planar_crop_rotate180_flip(img: &PlanarView<'_>, output_height: u32, out: &mut [u8]) {
    img.assert_capacity();
    let w = img.width as usize;
    let h = img.height as usize;
    let oh = output_height as usize;
    let delta = crop_delta(h, oh);
    debug_assert!(out.len() >= w * oh * 3 / 2, "output buffer undersized");

    let dst_size = w * oh;
    for y in delta..h - delta {
        let src = y * w;
        let dst = (oh - 1 - (y - delta)) * w;
        out[dst..dst + w].copy_from_slice(&img.y[src..src + w]);
    }
    for r in 0..oh / 2 {
        let sy = delta + 2 * r;
        let dst = dst_size + (oh / 2 - 1 - r) * w;
        for x in (0..w).step_by(2) {
            let ci = ((sy >> 1) * w + x) >> 1;
            out[dst + x] = img.cr[ci * img.cr_pixel_stride];
            out[dst + x + 1] = img.cb[ci * img.cb_pixel_stride];
        }
    }
}
