//! Per-stage latency profiling.
//!
//! Purely observational: nothing here feeds back into pipeline control flow.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Timestamps marking one frame's trip through the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineClock {
    frame_start: Instant,
    converted: Option<Instant>,
    pre_draw: Option<Instant>,
    draw_done: Option<Instant>,
}

impl PipelineClock {
    pub fn start() -> Self {
        Self {
            frame_start: Instant::now(),
            converted: None,
            pre_draw: None,
            draw_done: None,
        }
    }

    /// Colorspace conversion finished on the camera thread.
    pub fn mark_converted(&mut self) {
        let now = Instant::now();
        self.converted = Some(now);
        metrics::histogram!("convert_time_us")
            .record((now - self.frame_start).as_micros() as f64);
    }

    /// The frame job started executing on the render thread.
    pub fn mark_pre_draw(&mut self) {
        let now = Instant::now();
        self.pre_draw = Some(now);
        if let Some(converted) = self.converted {
            metrics::histogram!("queue_wait_us").record((now - converted).as_micros() as f64);
        }
    }

    /// The filter chain draw completed.
    pub fn mark_draw_done(&mut self) {
        let now = Instant::now();
        self.draw_done = Some(now);
        if let Some(pre_draw) = self.pre_draw {
            metrics::histogram!("draw_time_us").record((now - pre_draw).as_micros() as f64);
        }
    }

    /// One sample per fully drawn frame; `None` until every mark is present.
    pub fn sample(&self) -> Option<StageSample> {
        let converted = self.converted?;
        let pre_draw = self.pre_draw?;
        let draw_done = self.draw_done?;
        Some(StageSample {
            convert: converted - self.frame_start,
            queue_wait: pre_draw - converted,
            draw: draw_done - pre_draw,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSample {
    pub convert: Duration,
    pub queue_wait: Duration,
    pub draw: Duration,
}

/// Rolling window of per-stage samples.
pub struct StageProfile {
    window: Mutex<VecDeque<StageSample>>,
    capacity: usize,
}

impl StageProfile {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record(&self, sample: StageSample) {
        let mut window = self.window.lock().unwrap();
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.window.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn averages(&self) -> StageAverages {
        let window = self.window.lock().unwrap();
        if window.is_empty() {
            return StageAverages::default();
        }
        let mut sum = StageAverages::default();
        for sample in window.iter() {
            sum.convert += sample.convert;
            sum.queue_wait += sample.queue_wait;
            sum.draw += sample.draw;
        }
        let n = window.len() as u32;
        StageAverages {
            convert: sum.convert / n,
            queue_wait: sum.queue_wait / n,
            draw: sum.draw / n,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageAverages {
    pub convert: Duration,
    pub queue_wait: Duration,
    pub draw: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(convert_us: u64, wait_us: u64, draw_us: u64) -> StageSample {
        StageSample {
            convert: Duration::from_micros(convert_us),
            queue_wait: Duration::from_micros(wait_us),
            draw: Duration::from_micros(draw_us),
        }
    }

    #[test]
    fn window_is_bounded() {
        let profile = StageProfile::new(4);
        for i in 0..10 {
            profile.record(sample(i, i, i));
        }
        assert_eq!(profile.len(), 4);
    }

    #[test]
    fn averages_over_window() {
        let profile = StageProfile::new(8);
        profile.record(sample(100, 10, 200));
        profile.record(sample(300, 30, 400));
        let avg = profile.averages();
        assert_eq!(avg.convert, Duration::from_micros(200));
        assert_eq!(avg.queue_wait, Duration::from_micros(20));
        assert_eq!(avg.draw, Duration::from_micros(300));
    }

    #[test]
    fn incomplete_clock_yields_no_sample() {
        let mut clock = PipelineClock::start();
        clock.mark_converted();
        assert!(clock.sample().is_none());
        clock.mark_pre_draw();
        clock.mark_draw_done();
        assert!(clock.sample().is_some());
    }
}
