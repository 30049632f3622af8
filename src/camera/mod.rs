//! Camera lifecycle abstraction over two hardware generations.

pub mod driver;
pub mod frame;
pub mod legacy;
pub mod modern;
pub mod rotation;
pub mod size;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use driver::{DriverStack, FrameSink, LegacyDevice, LegacyDriver, ModernDevice, ModernDriver};
pub use frame::{Frame, FrameConsumer, FrameData};
pub use legacy::LegacyController;
pub use modern::ModernController;
pub use rotation::{Rotation, RotationState};
pub use size::{choose_preview_size, PreviewSize};

use crate::error::ErrorSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
}

impl Facing {
    pub fn opposite(self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Closed,
    Opening,
    Streaming,
    Closing,
}

/// Session-start notification: the negotiated rotation and preview size,
/// delivered before the first frame flows.
pub trait CameraEvents: Send + Sync {
    fn on_opened(&self, rotation: RotationState, size: PreviewSize);
}

/// One physical camera's lifecycle: `Closed -> Opening -> Streaming ->
/// Closing -> Closed`, plus a torch sub-state valid only while streaming on
/// the back camera.
///
/// `stop` blocks until the capture thread has quiesced, so it must never be
/// called from the render thread: a queued render job waiting on that same
/// thread would deadlock.
pub trait CameraController: Send {
    /// `Closed -> Opening -> Streaming`. Reports Permission/Unknown through
    /// the error sink and returns `false` on failure, leaving the camera
    /// closed.
    fn start(&mut self, facing: Facing, width: u32, height: u32) -> bool;

    /// `Streaming -> Closing -> Closed`. Joins the capture thread and
    /// deregisters frame callbacks before the hardware handle goes away.
    /// Idempotent: stopping a closed camera is a no-op returning `true`.
    fn stop(&mut self) -> bool;

    /// `stop` followed by `start` on the opposite facing with the previously
    /// negotiated size. Refused without touching the stream when the target
    /// facing does not exist; otherwise a failure of either phase leaves the
    /// camera closed and returns `false`. Torch is forced off when switching
    /// to front.
    fn switch_facing(&mut self) -> bool;

    /// No-op returning `false` unless streaming on the back camera.
    fn set_torch(&mut self, on: bool) -> bool;

    fn state(&self) -> CameraState;
    fn facing(&self) -> Facing;
    fn torch_on(&self) -> bool;

    /// Update the display rotation used for subsequent opens.
    fn set_display_rotation(&mut self, degrees: u32);
}

/// Instantiate the controller matching the probed hardware generation.
pub fn create_controller(
    stack: DriverStack,
    consumer: Arc<dyn FrameConsumer>,
    events: Arc<dyn CameraEvents>,
    errors: Arc<dyn ErrorSink>,
    display_rotation: u32,
) -> Box<dyn CameraController> {
    match stack {
        DriverStack::Legacy(driver) => Box::new(LegacyController::new(
            driver,
            consumer,
            events,
            errors,
            display_rotation,
        )),
        DriverStack::Modern(driver) => Box::new(ModernController::new(
            driver,
            consumer,
            events,
            errors,
            display_rotation,
        )),
    }
}
