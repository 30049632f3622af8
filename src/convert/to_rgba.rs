//! YUV to RGBA expansion for GPU texture upload.

use super::PlanarView;

#[inline(always)]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline(always)]
fn expand(luma: i32, cb: i32, cr: i32) -> (u8, u8, u8) {
    // 1.164 ~ 1 + 1/8 + 1/32 + 1/128
    let y = luma - 16;
    let y = y + (y >> 3) + (y >> 5) + (y >> 7);
    // 1.596 ~ 1 + 1/2 + 1/16 + 1/32
    let r = y + cr + (cr >> 1) + (cr >> 4) + (cr >> 5);
    // 0.392 ~ 1/4 + 1/8 + 1/64, 0.813 ~ 1/2 + 1/4 + 1/16
    let g = y - (cb >> 2) - (cb >> 3) - (cb >> 6) - (cr >> 1) - (cr >> 2) - (cr >> 4);
    // 2.017 ~ 2 + 1/64
    let b = y + (cb << 1) + (cb >> 6);
    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

/// Expand a semi-planar frame into a same-sized RGBA buffer.
pub fn yuv_to_rgba(width: u32, height: u32, yuv: &[u8], rgba: &mut [u8]) {
    let w = width as usize;
    let h = height as usize;
    debug_assert!(yuv.len() >= w * h * 3 / 2, "yuv buffer undersized");
    debug_assert!(rgba.len() >= w * h * 4, "rgba buffer undersized");

    let size = w * h;
    for y in 0..h {
        let row = y * w;
        let c_row = size + (y >> 1) * w;
        let mut cb = 0i32;
        let mut cr = 0i32;
        for x in 0..w {
            if x & 1 == 0 {
                cr = i32::from(yuv[c_row + x]) - 128;
                cb = i32::from(yuv[c_row + x + 1]) - 128;
            }
            let (r, g, b) = expand(i32::from(yuv[row + x]), cb, cr);
            let o = (row + x) << 2;
            rgba[o] = r;
            rgba[o + 1] = g;
            rgba[o + 2] = b;
            rgba[o + 3] = 0xFF;
        }
    }
}

/// Expand a planar image (separate planes, strided chroma) into RGBA.
pub fn planar_to_rgba(img: &PlanarView<'_>, rgba: &mut [u8]) {
    img.assert_capacity();
    let w = img.width as usize;
    let h = img.height as usize;
    debug_assert!(rgba.len() >= w * h * 4, "rgba buffer undersized");

    for y in 0..h {
        let row = y * w;
        let mut cb = 0i32;
        let mut cr = 0i32;
        for x in 0..w {
            if x & 1 == 0 {
                let ci = ((y >> 1) * w + x) >> 1;
                cr = i32::from(img.cr[ci * img.cr_pixel_stride]) - 128;
                cb = i32::from(img.cb[ci * img.cb_pixel_stride]) - 128;
            }
            let (r, g, b) = expand(i32::from(img.y[row + x]), cb, cr);
            let o = (row + x) << 2;
            rgba[o] = r;
            rgba[o + 1] = g;
            rgba[o + 2] = b;
            rgba[o + 3] = 0xFF;
        }
    }
}
