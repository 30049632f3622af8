//! Render-thread coordinator.
//!
//! All cross-thread access to the GPU funnels through two FIFO work queues
//! drained exactly once per display refresh. The queue lock is held only for
//! the swap-and-clear; queued work always executes lock-free, so no thread
//! ever holds a lock across a GPU call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::utils::CachePadded;
use tracing::{error, trace};

use crate::error::{ErrorCode, ErrorSink, GpuError};
use crate::gpu::RenderBackend;

/// Work executed on the render thread with exclusive GPU access.
pub type GpuJob = Box<dyn FnOnce(&mut dyn RenderBackend) -> Result<(), GpuError> + Send>;

#[derive(Default)]
struct Stats {
    accepted: AtomicU64,
    dropped: AtomicU64,
}

pub struct FrameScheduler {
    pre_draw: Mutex<VecDeque<GpuJob>>,
    post_draw: Mutex<VecDeque<GpuJob>>,
    paused: AtomicBool,
    drawing: AtomicBool,
    stats: CachePadded<Stats>,
    errors: Arc<dyn ErrorSink>,
}

impl FrameScheduler {
    pub fn new(errors: Arc<dyn ErrorSink>) -> Self {
        Self {
            pre_draw: Mutex::new(VecDeque::new()),
            post_draw: Mutex::new(VecDeque::new()),
            paused: AtomicBool::new(false),
            drawing: AtomicBool::new(true),
            stats: CachePadded::new(Stats::default()),
            errors,
        }
    }

    /// A previously scheduled job has not drained yet. Producers drop new
    /// frames while this holds, keeping the render thread at most one frame
    /// behind.
    pub fn is_busy(&self) -> bool {
        !self.pre_draw.lock().unwrap().is_empty()
    }

    /// Enqueue the per-frame upload job. Refused (and counted as a drop)
    /// when a job is already pending: at most one frame-upload job may
    /// exist at a time.
    pub fn schedule_frame(&self, job: GpuJob) -> bool {
        let mut queue = self.pre_draw.lock().unwrap();
        if !queue.is_empty() {
            drop(queue);
            self.note_dropped();
            return false;
        }
        queue.push_back(job);
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Record a frame dropped at the producer before a job was built.
    pub fn note_dropped(&self) {
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Enqueue GPU-state mutation (filter swap, resize, rotation change).
    pub fn run_on_draw(&self, job: GpuJob) {
        self.pre_draw.lock().unwrap().push_back(job);
    }

    /// Enqueue work to run after the chain draw of the next tick.
    pub fn run_post_draw(&self, job: GpuJob) {
        self.post_draw.lock().unwrap().push_back(job);
    }

    /// Suspend the chain draw. State-mutation jobs keep draining so resize
    /// and filter-swap work is never starved.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        self.drawing.store(false, Ordering::Release);
    }

    /// Clear the suspension. Drawing actually restarts inside the next
    /// drained frame job, never mid-frame.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Called at the end of a frame job once its upload landed.
    pub fn mark_drawing_resumed(&self) {
        if !self.is_paused() {
            self.drawing.store(true, Ordering::Release);
        }
    }

    pub fn should_draw(&self) -> bool {
        self.drawing.load(Ordering::Acquire)
    }

    pub fn drain_pre_draw(&self, backend: &mut dyn RenderBackend) {
        self.drain(&self.pre_draw, backend);
    }

    pub fn drain_post_draw(&self, backend: &mut dyn RenderBackend) {
        self.drain(&self.post_draw, backend);
    }

    fn drain(&self, queue: &Mutex<VecDeque<GpuJob>>, backend: &mut dyn RenderBackend) {
        let jobs = std::mem::take(&mut *queue.lock().unwrap());
        trace!("draining {} job(s)", jobs.len());
        for job in jobs {
            if let Err(e) = job(backend) {
                // The tick must return cleanly to the display driver no
                // matter what surfaced from queued work.
                error!("render job failed: {e}");
                self.errors.on_error(ErrorCode::Unknown);
            }
        }
    }

    /// (accepted, dropped)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.accepted.load(Ordering::Relaxed),
            self.stats.dropped.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::*;
    use crate::gpu::testing::MockBackend;

    struct Errors(Mutex<Vec<ErrorCode>>);
    impl ErrorSink for Errors {
        fn on_error(&self, code: ErrorCode) {
            self.0.lock().unwrap().push(code);
        }
    }

    fn scheduler() -> (FrameScheduler, Arc<Errors>) {
        let errors = Arc::new(Errors(Mutex::new(Vec::new())));
        (
            FrameScheduler::new(Arc::clone(&errors) as Arc<dyn ErrorSink>),
            errors,
        )
    }

    #[test]
    fn second_pending_frame_is_refused() {
        let (scheduler, _) = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&ran);
        assert!(scheduler.schedule_frame(Box::new(move |_| {
            first.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })));
        assert!(scheduler.is_busy());

        let second = Arc::clone(&ran);
        assert!(!scheduler.schedule_frame(Box::new(move |_| {
            second.fetch_add(100, Ordering::SeqCst);
            Ok(())
        })));

        let mut backend = MockBackend::new();
        scheduler.drain_pre_draw(&mut backend);
        assert_eq!(ran.load(Ordering::SeqCst), 1, "refused job must not run");
        assert_eq!(scheduler.stats(), (1, 1));
        assert!(!scheduler.is_busy());
    }

    #[test]
    fn jobs_drain_in_fifo_order() {
        let (scheduler, _) = scheduler();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            scheduler.run_on_draw(Box::new(move |_| {
                order.lock().unwrap().push(i);
                Ok(())
            }));
        }
        let mut backend = MockBackend::new();
        scheduler.drain_pre_draw(&mut backend);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn job_errors_reach_the_sink_and_do_not_abort_the_drain() {
        let (scheduler, errors) = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));
        scheduler.run_on_draw(Box::new(|_| Err(GpuError::Allocation("oom".into()))));
        let after = Arc::clone(&ran);
        scheduler.run_on_draw(Box::new(move |_| {
            after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let mut backend = MockBackend::new();
        scheduler.drain_pre_draw(&mut backend);
        assert_eq!(errors.0.lock().unwrap().as_slice(), &[ErrorCode::Unknown]);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pause_suspends_drawing_until_the_next_frame_job() {
        let (scheduler, _) = scheduler();
        assert!(scheduler.should_draw());
        scheduler.pause();
        assert!(!scheduler.should_draw());

        // Resume alone is not enough; the flag flips inside the next frame
        // job so drawing never restarts mid-frame.
        scheduler.resume();
        assert!(!scheduler.should_draw());
        scheduler.mark_drawing_resumed();
        assert!(scheduler.should_draw());
    }

    #[test]
    fn mark_resumed_is_inert_while_paused() {
        let (scheduler, _) = scheduler();
        scheduler.pause();
        scheduler.mark_drawing_resumed();
        assert!(!scheduler.should_draw());
    }
}
