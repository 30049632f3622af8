//! Controller for the first hardware generation (driver-owned callback
//! thread, recycled preview buffers).

use std::sync::Arc;

use tracing::{info, warn};

use super::driver::{FrameSink, LegacyDevice, LegacyDriver};
use super::frame::FrameConsumer;
use super::rotation::RotationState;
use super::size::{choose_preview_size, PreviewSize};
use super::{CameraController, CameraEvents, CameraState, Facing};
use crate::error::{CameraError, ErrorSink};

pub struct LegacyController {
    driver: Box<dyn LegacyDriver>,
    device: Option<Box<dyn LegacyDevice>>,
    state: CameraState,
    facing: Facing,
    torch_on: bool,
    display_rotation: u32,
    negotiated: Option<PreviewSize>,
    consumer: Arc<dyn FrameConsumer>,
    events: Arc<dyn CameraEvents>,
    errors: Arc<dyn ErrorSink>,
}

impl LegacyController {
    pub fn new(
        driver: Box<dyn LegacyDriver>,
        consumer: Arc<dyn FrameConsumer>,
        events: Arc<dyn CameraEvents>,
        errors: Arc<dyn ErrorSink>,
        display_rotation: u32,
    ) -> Self {
        Self {
            driver,
            device: None,
            state: CameraState::Closed,
            facing: Facing::Back,
            torch_on: false,
            display_rotation,
            negotiated: None,
            consumer,
            events,
            errors,
        }
    }

    fn try_open(&mut self, facing: Facing, width: u32, height: u32) -> Result<(), CameraError> {
        if !self.driver.has_facing(facing) {
            return Err(CameraError::MissingFacing(facing));
        }
        let mut device = self.driver.open(facing)?;
        let size = choose_preview_size(&device.supported_sizes(), width, height);
        device.configure(size)?;
        let rotation =
            RotationState::for_camera(device.sensor_orientation(), self.display_rotation, facing);
        info!(
            "legacy camera opened: {:?} {}x{} rotation {}",
            facing,
            size.width,
            size.height,
            rotation.rotation.degrees()
        );
        self.events.on_opened(rotation, size);

        let consumer = Arc::clone(&self.consumer);
        let sink: FrameSink = Box::new(move |mut frame| {
            frame.set_rotation(rotation);
            consumer.on_frame(frame);
        });
        device.start(sink)?;

        self.device = Some(device);
        self.facing = facing;
        self.negotiated = Some(size);
        Ok(())
    }
}

impl CameraController for LegacyController {
    fn start(&mut self, facing: Facing, width: u32, height: u32) -> bool {
        if self.state != CameraState::Closed {
            warn!("start ignored in state {:?}", self.state);
            return false;
        }
        self.state = CameraState::Opening;
        match self.try_open(facing, width, height) {
            Ok(()) => {
                self.state = CameraState::Streaming;
                true
            }
            Err(e) => {
                warn!("legacy camera open failed: {e}");
                self.errors.on_error(e.code());
                self.device = None;
                self.state = CameraState::Closed;
                false
            }
        }
    }

    fn stop(&mut self) -> bool {
        if self.state == CameraState::Closed {
            return true;
        }
        self.state = CameraState::Closing;
        if let Some(mut device) = self.device.take() {
            // Joins the driver's delivery thread before the handle is
            // dropped, so no callback can fire into a torn-down chain.
            device.stop();
        }
        self.torch_on = false;
        self.state = CameraState::Closed;
        info!("legacy camera stopped");
        true
    }

    fn switch_facing(&mut self) -> bool {
        let Some(size) = self.negotiated else {
            warn!("switch_facing before start");
            return false;
        };
        let target = self.facing.opposite();
        if !self.driver.has_facing(target) {
            warn!("no {target:?} camera, staying on {:?}", self.facing);
            return false;
        }
        if !self.stop() {
            return false;
        }
        if target == Facing::Front {
            self.torch_on = false;
        }
        self.start(target, size.width, size.height)
    }

    fn set_torch(&mut self, on: bool) -> bool {
        if self.facing == Facing::Front || self.state != CameraState::Streaming {
            return false;
        }
        let Some(device) = self.device.as_mut() else {
            return false;
        };
        match device.set_torch(on) {
            Ok(()) => {
                self.torch_on = on;
                true
            }
            Err(e) => {
                warn!("torch change failed: {e}");
                self.errors.on_error(e.code());
                false
            }
        }
    }

    fn state(&self) -> CameraState {
        self.state
    }

    fn facing(&self) -> Facing {
        self.facing
    }

    fn torch_on(&self) -> bool {
        self.torch_on
    }

    fn set_display_rotation(&mut self, degrees: u32) {
        self.display_rotation = degrees;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::super::frame::{Frame, FrameData};
    use super::*;
    use crate::error::ErrorCode;

    struct FakeDevice {
        torch: Arc<AtomicBool>,
    }

    impl LegacyDevice for FakeDevice {
        fn supported_sizes(&self) -> Vec<PreviewSize> {
            vec![PreviewSize::new(640, 480), PreviewSize::new(1280, 720)]
        }

        fn sensor_orientation(&self) -> u32 {
            90
        }

        fn configure(&mut self, _size: PreviewSize) -> Result<(), CameraError> {
            Ok(())
        }

        fn set_torch(&mut self, on: bool) -> Result<(), CameraError> {
            self.torch.store(on, Ordering::SeqCst);
            Ok(())
        }

        fn start(&mut self, mut sink: FrameSink) -> Result<(), CameraError> {
            sink(Frame::new(
                FrameData::SemiPlanar(Bytes::from(vec![0u8; 6])),
                2,
                2,
                || {},
            ));
            Ok(())
        }

        fn stop(&mut self) {}
    }

    struct FakeDriver {
        has_front: bool,
        torch: Arc<AtomicBool>,
    }

    impl LegacyDriver for FakeDriver {
        fn has_facing(&self, facing: Facing) -> bool {
            facing == Facing::Back || self.has_front
        }

        fn open(&mut self, _facing: Facing) -> Result<Box<dyn LegacyDevice>, CameraError> {
            Ok(Box::new(FakeDevice {
                torch: Arc::clone(&self.torch),
            }))
        }
    }

    struct Consumed(AtomicUsize);
    impl FrameConsumer for Consumed {
        fn on_frame(&self, frame: Frame) {
            self.0.fetch_add(1, Ordering::SeqCst);
            frame.release();
        }
    }

    struct Opened(Mutex<Vec<(RotationState, PreviewSize)>>);
    impl CameraEvents for Opened {
        fn on_opened(&self, rotation: RotationState, size: PreviewSize) {
            self.0.lock().unwrap().push((rotation, size));
        }
    }

    struct Errors(Mutex<Vec<ErrorCode>>);
    impl ErrorSink for Errors {
        fn on_error(&self, code: ErrorCode) {
            self.0.lock().unwrap().push(code);
        }
    }

    fn controller(has_front: bool) -> (LegacyController, Arc<Opened>, Arc<Consumed>) {
        let opened = Arc::new(Opened(Mutex::new(Vec::new())));
        let consumed = Arc::new(Consumed(AtomicUsize::new(0)));
        let driver = FakeDriver {
            has_front,
            torch: Arc::new(AtomicBool::new(false)),
        };
        let controller = LegacyController::new(
            Box::new(driver),
            Arc::clone(&consumed) as Arc<dyn FrameConsumer>,
            Arc::clone(&opened) as Arc<dyn CameraEvents>,
            Arc::new(Errors(Mutex::new(Vec::new()))),
            0,
        );
        (controller, opened, consumed)
    }

    #[test]
    fn start_negotiates_and_streams() {
        let (mut controller, opened, consumed) = controller(true);
        assert!(controller.start(Facing::Back, 640, 480));
        assert_eq!(controller.state(), CameraState::Streaming);
        let events = opened.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, PreviewSize::new(640, 480));
        assert_eq!(events[0].0.rotation.degrees(), 90);
        assert_eq!(consumed.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_twice_is_idempotent() {
        let (mut controller, _, _) = controller(true);
        assert!(controller.start(Facing::Back, 640, 480));
        assert!(controller.stop());
        assert_eq!(controller.state(), CameraState::Closed);
        assert!(controller.stop());
        assert_eq!(controller.state(), CameraState::Closed);
    }

    #[test]
    fn switch_without_front_camera_keeps_streaming() {
        let (mut controller, _, _) = controller(false);
        assert!(controller.start(Facing::Back, 640, 480));
        assert!(!controller.switch_facing());
        assert_eq!(controller.state(), CameraState::Streaming);
        assert_eq!(controller.facing(), Facing::Back);
    }

    #[test]
    fn switch_lands_on_front_with_torch_off() {
        let (mut controller, opened, _) = controller(true);
        assert!(controller.start(Facing::Back, 640, 480));
        assert!(controller.set_torch(true));
        assert!(controller.switch_facing());
        assert_eq!(controller.facing(), Facing::Front);
        assert!(!controller.torch_on());
        assert_eq!(opened.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn torch_refused_on_front_or_closed() {
        let (mut controller, _, _) = controller(true);
        assert!(!controller.set_torch(true), "closed camera has no torch");
        assert!(controller.start(Facing::Back, 640, 480));
        assert!(controller.switch_facing());
        assert!(!controller.set_torch(true), "front camera has no torch");
    }
}
