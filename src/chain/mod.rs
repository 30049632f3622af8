//! Interchangeable frame-processing strategies.
//!
//! Both variants implement [`ProcessorChain`], so the host can swap the
//! GPU-filtered preview for the direct conversion path without touching
//! anything else.

pub mod direct;
pub mod filtered;

pub use direct::{DirectChain, SurfaceLayout};
pub use filtered::FilteredChain;

use crate::camera::{FrameConsumer, RotationState};
use crate::gpu::FilterSpec;

/// Normalized frame consumer supplied by the host application (e.g. a video
/// encoder).
pub trait VideoSink: Send + Sync {
    /// Invoked exactly once per camera session, as soon as the first frame's
    /// dimensions are known.
    fn on_video_size_changed(&self, width: u32, height: u32);

    /// Invoked for every accepted frame. The buffer is only valid for the
    /// duration of the call; it is reused immediately after.
    fn on_frame_data(&self, yuv: &[u8], width: u32, height: u32);
}

/// Host-supplied filter pack. Filters are composed into the chain in
/// registration order; an identity pass is always appended as the final
/// pass.
pub trait Processor: Send + Sync {
    fn set_up(&self);
    fn filters(&self) -> Vec<FilterSpec>;
    fn tear_down(&self);
}

/// What happens to a frame after capture.
pub trait ProcessorChain: FrameConsumer {
    fn set_up(&self);
    fn on_camera_opened(&self, rotation: RotationState);
    fn pause(&self);
    fn resume(&self);
    fn camera_switched(&self);
    fn switch_mirror(&self);
    fn tear_down(&self);
}
