//! Explicitly owned pipeline handle.
//!
//! One instance ties a camera controller, a processing chain and the
//! configuration surface together. Construction is the only place behavior
//! is chosen; there is no process-wide instance.

use std::sync::Arc;

use tracing::info;

use crate::camera::{
    self, CameraController, CameraEvents, CameraState, DriverStack, Facing, Frame, FrameConsumer,
    PreviewSize, RotationState,
};
use crate::chain::{DirectChain, FilteredChain, Processor, ProcessorChain, VideoSink};
use crate::error::ErrorSink;
use crate::gpu::RenderBackend;
use crate::render::FrameScheduler;
use crate::Config;

/// Which processing strategy the pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStrategy {
    /// GPU filter chain plus converted side channel.
    Filtered,
    /// Color conversion only, no GPU.
    Direct,
}

enum ChainHandle {
    Filtered(Arc<FilteredChain>),
    Direct(Arc<DirectChain>),
}

impl ChainHandle {
    fn as_dyn(&self) -> Arc<dyn ProcessorChain> {
        match self {
            ChainHandle::Filtered(chain) => Arc::clone(chain) as Arc<dyn ProcessorChain>,
            ChainHandle::Direct(chain) => Arc::clone(chain) as Arc<dyn ProcessorChain>,
        }
    }
}

struct ConsumerAdapter(Arc<dyn ProcessorChain>);

impl FrameConsumer for ConsumerAdapter {
    fn on_frame(&self, frame: Frame) {
        self.0.on_frame(frame);
    }
}

/// Re-arms the chain whenever a camera session opens: rotation first, then
/// the resume that lets the renderer sample the new producer.
struct OpenedEvents(Arc<dyn ProcessorChain>);

impl CameraEvents for OpenedEvents {
    fn on_opened(&self, rotation: RotationState, size: PreviewSize) {
        info!(
            "camera opened {}x{}, rotation {}",
            size.width,
            size.height,
            rotation.rotation.degrees()
        );
        self.0.on_camera_opened(rotation);
        self.0.resume();
    }
}

pub struct PipelineBuilder {
    config: Config,
    strategy: ChainStrategy,
    processors: Vec<Arc<dyn Processor>>,
    sink: Arc<dyn VideoSink>,
    errors: Arc<dyn ErrorSink>,
    display_rotation: u32,
}

impl PipelineBuilder {
    pub fn new(sink: Arc<dyn VideoSink>, errors: Arc<dyn ErrorSink>) -> Self {
        Self {
            config: Config::default(),
            strategy: ChainStrategy::Filtered,
            processors: Vec::new(),
            sink,
            errors,
            display_rotation: 0,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn strategy(mut self, strategy: ChainStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Register a filter pack; packs compose in registration order.
    pub fn processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn display_rotation(mut self, degrees: u32) -> Self {
        self.display_rotation = degrees;
        self
    }

    /// Assemble the pipeline over the probed hardware generation.
    pub fn build(self, stack: DriverStack) -> Pipeline {
        let chain = match self.strategy {
            ChainStrategy::Filtered => {
                let scheduler = Arc::new(FrameScheduler::new(Arc::clone(&self.errors)));
                ChainHandle::Filtered(Arc::new(FilteredChain::new(
                    self.processors,
                    &self.config,
                    Arc::clone(&self.sink),
                    Arc::clone(&self.errors),
                    scheduler,
                )))
            }
            ChainStrategy::Direct => ChainHandle::Direct(Arc::new(DirectChain::new(
                self.config.preview.facing == Facing::Front,
                self.config.preview.mirror_enabled,
                Arc::clone(&self.sink),
            ))),
        };
        let dyn_chain = chain.as_dyn();
        let controller = camera::create_controller(
            stack,
            Arc::new(ConsumerAdapter(Arc::clone(&dyn_chain))),
            Arc::new(OpenedEvents(dyn_chain)),
            Arc::clone(&self.errors),
            self.display_rotation,
        );
        Pipeline {
            config: self.config,
            controller,
            chain,
        }
    }
}

pub struct Pipeline {
    config: Config,
    controller: Box<dyn CameraController>,
    chain: ChainHandle,
}

impl Pipeline {
    pub fn builder(sink: Arc<dyn VideoSink>, errors: Arc<dyn ErrorSink>) -> PipelineBuilder {
        PipelineBuilder::new(sink, errors)
    }

    /// Set up the chain and open the configured camera.
    pub fn start(&mut self) -> bool {
        self.chain.as_dyn().set_up();
        let preview = self.config.preview.clone();
        let ok = self
            .controller
            .start(preview.facing, preview.width, preview.height);
        if ok && preview.torch_on {
            self.controller.set_torch(true);
        }
        ok
    }

    /// Stop streaming; blocks until the capture thread quiesced. Never call
    /// from the render thread.
    pub fn stop(&mut self) -> bool {
        self.controller.stop()
    }

    /// Stop plus chain teardown.
    pub fn shutdown(&mut self) -> bool {
        let ok = self.controller.stop();
        self.chain.as_dyn().tear_down();
        ok
    }

    /// Pause the renderer, switch facings, and let the open event resume
    /// drawing once the new producer is live.
    pub fn switch_camera(&mut self) -> bool {
        let chain = self.chain.as_dyn();
        chain.pause();
        chain.camera_switched();
        let ok = self.controller.switch_facing();
        if !ok {
            // Still on the old camera (or closed): undo the facing flip and
            // let drawing continue.
            chain.camera_switched();
            chain.resume();
        }
        ok
    }

    pub fn toggle_torch(&mut self) -> bool {
        let on = !self.controller.torch_on();
        self.controller.set_torch(on)
    }

    pub fn toggle_mirror(&self) {
        self.chain.as_dyn().switch_mirror();
    }

    /// Filtered strategy only; the swap itself happens inside the render
    /// queue.
    pub fn toggle_filter(&self) -> bool {
        match &self.chain {
            ChainHandle::Filtered(chain) => {
                chain.toggle_filter();
                true
            }
            ChainHandle::Direct(_) => false,
        }
    }

    /// Drive one display refresh. Only meaningful for the filtered strategy.
    pub fn render_tick(&self, backend: &mut dyn RenderBackend) {
        if let ChainHandle::Filtered(chain) = &self.chain {
            chain.render_tick(backend);
        }
    }

    /// Propagate a display surface size change to the active strategy.
    pub fn resize_surface(&self, width: u32, height: u32) {
        match &self.chain {
            ChainHandle::Filtered(chain) => chain.resize(width, height),
            ChainHandle::Direct(chain) => chain.set_output_size(width, height),
        }
    }

    pub fn set_display_rotation(&mut self, degrees: u32) {
        self.controller.set_display_rotation(degrees);
    }

    pub fn camera_state(&self) -> CameraState {
        self.controller.state()
    }

    pub fn facing(&self) -> Facing {
        self.controller.facing()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn filtered_chain(&self) -> Option<&Arc<FilteredChain>> {
        match &self.chain {
            ChainHandle::Filtered(chain) => Some(chain),
            ChainHandle::Direct(_) => None,
        }
    }

    pub fn direct_chain(&self) -> Option<&Arc<DirectChain>> {
        match &self.chain {
            ChainHandle::Direct(chain) => Some(chain),
            ChainHandle::Filtered(_) => None,
        }
    }
}
