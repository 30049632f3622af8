//! Injected hardware interfaces for the two camera generations.
//!
//! The platform layer supplies one of the two driver stacks; the selection
//! happens exactly once at session start. Controllers never branch on the
//! generation per call.

use std::time::Duration;

use super::frame::Frame;
use super::size::PreviewSize;
use super::Facing;
use crate::error::CameraError;

/// Frame delivery callback handed to a legacy device. Invoked on the
/// driver's own thread.
pub type FrameSink = Box<dyn FnMut(Frame) + Send>;

/// First-generation hardware: the driver owns a preview buffer pool and a
/// callback thread.
pub trait LegacyDriver: Send {
    fn has_facing(&self, facing: Facing) -> bool;
    fn open(&mut self, facing: Facing) -> Result<Box<dyn LegacyDevice>, CameraError>;
}

pub trait LegacyDevice: Send {
    fn supported_sizes(&self) -> Vec<PreviewSize>;
    /// Fixed mounting angle of the sensor relative to device "up".
    fn sensor_orientation(&self) -> u32;
    fn configure(&mut self, size: PreviewSize) -> Result<(), CameraError>;
    fn set_torch(&mut self, on: bool) -> Result<(), CameraError>;
    /// Begin streaming. Each delivered frame's release guard must return the
    /// underlying buffer to the device's reuse pool; a frame that is never
    /// released stalls subsequent delivery.
    fn start(&mut self, sink: FrameSink) -> Result<(), CameraError>;
    /// Deregister the frame callback and join the delivery thread. Must not
    /// return while a callback is still executing.
    fn stop(&mut self);
}

/// Second-generation hardware: an image queue the controller drains from its
/// own background thread. Dropping the device releases the hardware handle.
pub trait ModernDriver: Send {
    fn has_facing(&self, facing: Facing) -> bool;
    fn open(&mut self, facing: Facing) -> Result<Box<dyn ModernDevice>, CameraError>;
}

pub trait ModernDevice: Send + Sync {
    fn supported_sizes(&self) -> Vec<PreviewSize>;
    fn sensor_orientation(&self) -> u32;
    fn configure(&self, size: PreviewSize) -> Result<(), CameraError>;
    /// Mutates the active capture configuration in place; the frame stream
    /// is not interrupted.
    fn set_torch(&self, on: bool) -> Result<(), CameraError>;
    /// Block until the next image is available or the timeout elapses. The
    /// returned frame's release guard closes the acquired image.
    fn acquire_image(&self, timeout: Duration) -> Result<Option<Frame>, CameraError>;
}

/// The generation the platform probed for this session.
pub enum DriverStack {
    Legacy(Box<dyn LegacyDriver>),
    Modern(Box<dyn ModernDriver>),
}
