//! Direct conversion chain: no GPU, crop/rotate/mirror on the camera thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::{ProcessorChain, VideoSink};
use crate::camera::{Frame, FrameConsumer, FrameData, Rotation, RotationState};
use crate::convert;

/// Letterbox/crop placement of the preview inside the display surface.
/// Negative margins crop; the surface is scaled to cover the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceLayout {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
}

struct DirectState {
    video_width: u32,
    video_height: u32,
    output_width: u32,
    output_height: u32,
    rotation: RotationState,
    scratch: Vec<u8>,
    layout: Option<SurfaceLayout>,
}

pub struct DirectChain {
    sink: Arc<dyn VideoSink>,
    front: AtomicBool,
    mirror: AtomicBool,
    state: Mutex<DirectState>,
}

impl DirectChain {
    pub fn new(front: bool, mirror: bool, sink: Arc<dyn VideoSink>) -> Self {
        Self {
            sink,
            front: AtomicBool::new(front),
            mirror: AtomicBool::new(mirror),
            state: Mutex::new(DirectState {
                video_width: 0,
                video_height: 0,
                output_width: 0,
                output_height: 0,
                rotation: RotationState::default(),
                scratch: Vec::new(),
                layout: None,
            }),
        }
    }

    /// Display surface geometry changed.
    pub fn set_output_size(&self, width: u32, height: u32) {
        let mut st = self.state.lock().unwrap();
        st.output_width = width;
        st.output_height = height;
        st.layout = None;
    }

    /// Cover-scaled placement of the video inside the surface, computed once
    /// per geometry change and cached until the geometry moves again.
    pub fn surface_layout(&self) -> Option<SurfaceLayout> {
        let mut st = self.state.lock().unwrap();
        if let Some(layout) = st.layout {
            return Some(layout);
        }
        if st.video_width == 0 || st.output_width == 0 || st.output_height == 0 {
            return None;
        }
        let (mut video_w, mut video_h) = (st.video_width as f32, st.video_height as f32);
        if st.rotation.rotation.is_transposed() {
            std::mem::swap(&mut video_w, &mut video_h);
        }
        let ratio_w = st.output_width as f32 / video_w;
        let ratio_h = st.output_height as f32 / video_h;
        let ratio = ratio_w.max(ratio_h);
        let new_w = (video_w * ratio).round() as u32;
        let new_h = (video_h * ratio).round() as u32;
        let mut layout = SurfaceLayout {
            width: new_w,
            height: new_h,
            left: 0,
            top: 0,
        };
        if ratio_w > ratio_h {
            layout.top = -(((new_h - st.output_height) as f32 / 2.0).ceil() as i32);
        } else {
            layout.left = -(((new_w - st.output_width) as f32 / 2.0).ceil() as i32);
        }
        debug!("surface layout {:?}", layout);
        st.layout = Some(layout);
        Some(layout)
    }
}

impl FrameConsumer for DirectChain {
    fn on_frame(&self, frame: Frame) {
        let width = frame.width();
        let height = frame.height();
        let mut st = self.state.lock().unwrap();
        if st.video_width == 0 {
            // The direct chain never changes the frame size.
            st.video_width = width;
            st.video_height = height;
            st.scratch = vec![0; convert::yuv_len(width, height)];
            st.layout = None;
            self.sink.on_video_size_changed(width, height);
        }
        let vh = st.video_height;
        let rotated = frame.rotation().rotation == Rotation::Deg90;
        let mirrored = self.front.load(Ordering::Acquire) && self.mirror.load(Ordering::Acquire);
        let out = &mut st.scratch;
        match frame.data() {
            FrameData::SemiPlanar(buf) => match (mirrored, rotated) {
                (false, true) => convert::yuv_crop_rotate180(width, height, buf, vh, out),
                (false, false) => convert::yuv_crop(width, height, buf, vh, out),
                (true, true) => convert::yuv_crop_flip(width, height, buf, vh, out),
                (true, false) => convert::yuv_crop_rotate180_flip(width, height, buf, vh, out),
            },
            FrameData::Planar { .. } => {
                let view = frame.planar_view().expect("planar frame has a view");
                match (mirrored, rotated) {
                    (false, true) => convert::planar_crop_rotate180(&view, vh, out),
                    (false, false) => convert::planar_crop(&view, vh, out),
                    (true, true) => convert::planar_crop_flip(&view, vh, out),
                    (true, false) => convert::planar_crop_rotate180_flip(&view, vh, out),
                }
            }
        }
        let len = width as usize * vh as usize * 3 / 2;
        self.sink.on_frame_data(&st.scratch[..len], width, vh);
        drop(st);
        frame.release();
    }
}

impl ProcessorChain for DirectChain {
    fn set_up(&self) {}

    fn on_camera_opened(&self, rotation: RotationState) {
        let mut st = self.state.lock().unwrap();
        st.rotation = rotation;
        st.layout = None;
    }

    // Nothing to suspend: conversion runs synchronously on the camera
    // thread and stops with it.
    fn pause(&self) {}

    fn resume(&self) {}

    fn camera_switched(&self) {
        self.front.fetch_xor(true, Ordering::AcqRel);
    }

    fn switch_mirror(&self) {
        self.mirror.fetch_xor(true, Ordering::AcqRel);
    }

    fn tear_down(&self) {}
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use bytes::Bytes;

    use super::*;
    use crate::camera::Facing;
    use crate::convert::yuv_len;

    struct Recorder {
        sizes: Mutex<Vec<(u32, u32)>>,
        frames: Mutex<Vec<(u32, u32)>>,
    }

    impl VideoSink for Recorder {
        fn on_video_size_changed(&self, width: u32, height: u32) {
            self.sizes.lock().unwrap().push((width, height));
        }

        fn on_frame_data(&self, _yuv: &[u8], width: u32, height: u32) {
            self.frames.lock().unwrap().push((width, height));
        }
    }

    fn frame(width: u32, height: u32, released: Arc<AtomicUsize>) -> Frame {
        Frame::new(
            FrameData::SemiPlanar(Bytes::from(vec![128u8; yuv_len(width, height)])),
            width,
            height,
            move || {
                released.fetch_add(1, Ordering::SeqCst);
            },
        )
    }

    #[test]
    fn forwards_synchronously_and_releases() {
        let recorder = Arc::new(Recorder {
            sizes: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
        });
        let chain = DirectChain::new(false, false, Arc::clone(&recorder) as Arc<dyn VideoSink>);
        let released = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            chain.on_frame(frame(64, 48, Arc::clone(&released)));
        }
        assert_eq!(recorder.sizes.lock().unwrap().as_slice(), &[(64, 48)]);
        assert_eq!(recorder.frames.lock().unwrap().len(), 3);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn layout_letterboxes_the_wider_axis() {
        let recorder = Arc::new(Recorder {
            sizes: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
        });
        let chain = DirectChain::new(false, false, Arc::clone(&recorder) as Arc<dyn VideoSink>);
        chain.set_output_size(100, 200);
        let released = Arc::new(AtomicUsize::new(0));
        chain.on_frame(frame(100, 100, Arc::clone(&released)));

        let layout = chain.surface_layout().expect("geometry is known");
        // Square video covering a 100x200 surface scales to 200x200 and
        // crops half the width on each side.
        assert_eq!(layout.width, 200);
        assert_eq!(layout.height, 200);
        assert_eq!(layout.top, 0);
        assert_eq!(layout.left, -50);
        // Cached until the geometry changes.
        assert_eq!(chain.surface_layout(), Some(layout));

        chain.set_output_size(200, 100);
        let layout = chain.surface_layout().expect("geometry is known");
        assert_eq!(layout.left, 0);
        assert_eq!(layout.top, -50);
    }

    #[test]
    fn rotation_transposes_the_layout_basis() {
        let recorder = Arc::new(Recorder {
            sizes: Mutex::new(Vec::new()),
            frames: Mutex::new(Vec::new()),
        });
        let chain = DirectChain::new(false, false, Arc::clone(&recorder) as Arc<dyn VideoSink>);
        chain.on_camera_opened(RotationState::for_camera(90, 0, Facing::Back));
        chain.set_output_size(90, 160);
        let released = Arc::new(AtomicUsize::new(0));
        chain.on_frame(frame(160, 90, Arc::clone(&released)));

        // 160x90 video, transposed to 90x160 by the 90-degree rotation,
        // fits the portrait surface exactly.
        let layout = chain.surface_layout().expect("geometry is known");
        assert_eq!((layout.width, layout.height), (90, 160));
        assert_eq!((layout.left, layout.top), (0, 0));
    }
}
