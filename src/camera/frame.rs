//! Frame payloads and the release obligation.

use std::fmt;

use bytes::Bytes;

use crate::camera::RotationState;
use crate::convert::PlanarView;

/// Pixel payload in one of the two sensor layouts.
#[derive(Clone)]
pub enum FrameData {
    /// Full luma plane followed by interleaved 2x2-subsampled Cr/Cb rows.
    SemiPlanar(Bytes),
    /// Separate planes; chroma sampled with a per-plane pixel stride.
    Planar {
        y: Bytes,
        cb: Bytes,
        cr: Bytes,
        cb_pixel_stride: usize,
        cr_pixel_stride: usize,
    },
}

/// One captured frame.
///
/// The buffer belongs to the producing backend; the release guard hands it
/// back (buffer reuse) or closes it (image acquisition). It fires exactly
/// once, either through [`Frame::release`] or on drop, so early returns and
/// error paths cannot leak the producer's buffer.
pub struct Frame {
    data: FrameData,
    width: u32,
    height: u32,
    rotation: RotationState,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Frame {
    pub fn new(
        data: FrameData,
        width: u32,
        height: u32,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            data,
            width,
            height,
            rotation: RotationState::default(),
            release: Some(Box::new(release)),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rotation(&self) -> RotationState {
        self.rotation
    }

    pub(crate) fn set_rotation(&mut self, rotation: RotationState) {
        self.rotation = rotation;
    }

    pub fn data(&self) -> &FrameData {
        &self.data
    }

    pub fn semi_planar(&self) -> Option<&[u8]> {
        match &self.data {
            FrameData::SemiPlanar(buf) => Some(buf),
            FrameData::Planar { .. } => None,
        }
    }

    pub fn planar_view(&self) -> Option<PlanarView<'_>> {
        match &self.data {
            FrameData::SemiPlanar(_) => None,
            FrameData::Planar {
                y,
                cb,
                cr,
                cb_pixel_stride,
                cr_pixel_stride,
            } => Some(PlanarView {
                width: self.width,
                height: self.height,
                y,
                cb,
                cr,
                cb_pixel_stride: *cb_pixel_stride,
                cr_pixel_stride: *cr_pixel_stride,
            }),
        }
    }

    /// Explicitly hand the buffer back to its producer.
    pub fn release(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = match self.data {
            FrameData::SemiPlanar(_) => "semi-planar",
            FrameData::Planar { .. } => "planar",
        };
        f.debug_struct("Frame")
            .field("layout", &layout)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rotation", &self.rotation)
            .finish()
    }
}

/// Receives frames on the producing backend's thread.
pub trait FrameConsumer: Send + Sync {
    fn on_frame(&self, frame: Frame);
}
