//! Controller for the second hardware generation (image-queue acquisition
//! drained by a controller-owned background thread).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};

use super::driver::{ModernDevice, ModernDriver};
use super::frame::FrameConsumer;
use super::rotation::RotationState;
use super::size::{choose_preview_size, PreviewSize};
use super::{CameraController, CameraEvents, CameraState, Facing};
use crate::error::{CameraError, ErrorSink};

const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

struct Session {
    device: Arc<dyn ModernDevice>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

pub struct ModernController {
    driver: Box<dyn ModernDriver>,
    session: Option<Session>,
    state: CameraState,
    facing: Facing,
    torch_on: bool,
    display_rotation: u32,
    negotiated: Option<PreviewSize>,
    consumer: Arc<dyn FrameConsumer>,
    events: Arc<dyn CameraEvents>,
    errors: Arc<dyn ErrorSink>,
}

impl ModernController {
    pub fn new(
        driver: Box<dyn ModernDriver>,
        consumer: Arc<dyn FrameConsumer>,
        events: Arc<dyn CameraEvents>,
        errors: Arc<dyn ErrorSink>,
        display_rotation: u32,
    ) -> Self {
        Self {
            driver,
            session: None,
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
        let device: Arc<dyn ModernDevice> = Arc::from(self.driver.open(facing)?);
        let size = choose_preview_size(&device.supported_sizes(), width, height);
        device.configure(size)?;
        let rotation =
            RotationState::for_camera(device.sensor_orientation(), self.display_rotation, facing);
        info!(
            "modern camera opened: {:?} {}x{} rotation {}",
            facing,
            size.width,
            size.height,
            rotation.rotation.degrees()
        );
        self.events.on_opened(rotation, size);

        let running = Arc::new(AtomicBool::new(true));
        let worker = {
            let device = Arc::clone(&device);
            let running = Arc::clone(&running);
            let consumer = Arc::clone(&self.consumer);
            let errors = Arc::clone(&self.errors);
            std::thread::Builder::new()
                .name("iris-camera".into())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        match device.acquire_image(ACQUIRE_TIMEOUT) {
                            Ok(Some(mut frame)) => {
                                frame.set_rotation(rotation);
                                consumer.on_frame(frame);
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!("image acquisition failed: {e}");
                                errors.on_error(e.code());
                                break;
                            }
                        }
                    }
                })
                .map_err(|e| CameraError::Hardware(format!("capture thread: {e}")))?
        };

        self.session = Some(Session {
            device,
            running,
            worker: Some(worker),
        });
        self.facing = facing;
        self.negotiated = Some(size);
        Ok(())
    }
}

impl CameraController for ModernController {
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
                warn!("modern camera open failed: {e}");
                self.errors.on_error(e.code());
                self.session = None;
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
        if let Some(mut session) = self.session.take() {
            session.running.store(false, Ordering::Release);
            // Join before the device handle drops: once the worker is gone
            // no frame can fire into a half-torn-down pipeline, and only
            // then is it safe to release the hardware.
            if let Some(worker) = session.worker.take() {
                if worker.join().is_err() {
                    warn!("capture thread panicked during stop");
                    self.errors.on_error(crate::error::ErrorCode::Unknown);
                }
            }
        }
        self.torch_on = false;
        self.state = CameraState::Closed;
        info!("modern camera stopped");
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
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        match session.device.set_torch(on) {
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
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::super::frame::{Frame, FrameData};
    use super::*;
    use crate::error::ErrorCode;

    struct FakeDevice {
        fail_after: Option<usize>,
        acquired: AtomicUsize,
    }

    impl ModernDevice for FakeDevice {
        fn supported_sizes(&self) -> Vec<PreviewSize> {
            vec![PreviewSize::new(640, 480)]
        }

        fn sensor_orientation(&self) -> u32 {
            270
        }

        fn configure(&self, _size: PreviewSize) -> Result<(), CameraError> {
            Ok(())
        }

        fn set_torch(&self, _on: bool) -> Result<(), CameraError> {
            Ok(())
        }

        fn acquire_image(&self, _timeout: Duration) -> Result<Option<Frame>, CameraError> {
            let n = self.acquired.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.fail_after {
                if n >= limit {
                    return Err(CameraError::Hardware("sensor went away".into()));
                }
            }
            std::thread::sleep(Duration::from_millis(1));
            let y = Bytes::from(vec![0u8; 4]);
            let c = Bytes::from(vec![128u8; 2]);
            Ok(Some(Frame::new(
                FrameData::Planar {
                    y,
                    cb: c.clone(),
                    cr: c,
                    cb_pixel_stride: 1,
                    cr_pixel_stride: 1,
                },
                2,
                2,
                || {},
            )))
        }
    }

    struct FakeDriver {
        fail_after: Option<usize>,
    }

    impl ModernDriver for FakeDriver {
        fn has_facing(&self, facing: Facing) -> bool {
            facing == Facing::Back
        }

        fn open(&mut self, _facing: Facing) -> Result<Box<dyn ModernDevice>, CameraError> {
            Ok(Box::new(FakeDevice {
                fail_after: self.fail_after,
                acquired: AtomicUsize::new(0),
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

    struct NoEvents;
    impl CameraEvents for NoEvents {
        fn on_opened(&self, _rotation: RotationState, _size: PreviewSize) {}
    }

    struct Errors(Mutex<Vec<ErrorCode>>);
    impl ErrorSink for Errors {
        fn on_error(&self, code: ErrorCode) {
            self.0.lock().unwrap().push(code);
        }
    }

    fn controller(fail_after: Option<usize>) -> (ModernController, Arc<Consumed>, Arc<Errors>) {
        let consumed = Arc::new(Consumed(AtomicUsize::new(0)));
        let errors = Arc::new(Errors(Mutex::new(Vec::new())));
        let controller = ModernController::new(
            Box::new(FakeDriver { fail_after }),
            Arc::clone(&consumed) as Arc<dyn FrameConsumer>,
            Arc::new(NoEvents),
            Arc::clone(&errors) as Arc<dyn ErrorSink>,
            0,
        );
        (controller, consumed, errors)
    }

    #[test]
    fn stop_joins_the_capture_thread() {
        let (mut controller, consumed, _) = controller(None);
        assert!(controller.start(Facing::Back, 640, 480));
        while consumed.0.load(Ordering::SeqCst) < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(controller.stop());
        let after_stop = consumed.0.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(
            consumed.0.load(Ordering::SeqCst),
            after_stop,
            "no frame may be delivered after stop returns"
        );
        assert!(controller.stop(), "stop stays idempotent");
    }

    #[test]
    fn acquisition_failure_reports_unknown() {
        let (mut controller, _, errors) = controller(Some(2));
        assert!(controller.start(Facing::Back, 640, 480));
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while errors.0.lock().unwrap().is_empty() {
            assert!(std::time::Instant::now() < deadline, "no error reported");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(errors.0.lock().unwrap()[0], ErrorCode::Unknown);
        assert!(controller.stop());
    }

    #[test]
    fn switch_refused_without_front_camera() {
        let (mut controller, _, _) = controller(None);
        assert!(controller.start(Facing::Back, 640, 480));
        assert!(!controller.switch_facing());
        assert_eq!(controller.state(), CameraState::Streaming);
        assert!(controller.stop());
    }
}
