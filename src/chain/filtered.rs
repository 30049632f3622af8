//! GPU-filtered preview chain with a converted side channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use arc_swap::ArcSwap;
use tracing::{debug, error};

use super::{Processor, ProcessorChain, VideoSink};
use crate::camera::{Frame, FrameConsumer, FrameData, Rotation, RotationState};
use crate::convert;
use crate::error::{ErrorCode, ErrorSink, GpuError};
use crate::filter::{FilterGraph, FilterNode, SideSink};
use crate::gpu::{FilterSpec, RenderBackend, TextureId};
use crate::profile::{PipelineClock, StageAverages, StageProfile};
use crate::render::FrameScheduler;
use crate::Config;

struct ChainShared {
    sink: Arc<dyn VideoSink>,
    errors: Arc<dyn ErrorSink>,
    front: AtomicBool,
    mirror: AtomicBool,
    filter_enabled: AtomicBool,
    rotation: ArcSwap<RotationState>,
    scratch_rgba: Mutex<Vec<u8>>,
    profile: StageProfile,
}

/// State owned by the render thread; every mutation happens inside a
/// scheduler job or the draw tick.
struct RenderState {
    desired: FilterGraph,
    idle: FilterGraph,
    use_desired: bool,
    texture: Option<TextureId>,
    output_width: u32,
    output_height: u32,
    image_width: u32,
    image_height: u32,
    video_width: u32,
    video_height: u32,
    scratch_yuv: Vec<u8>,
    clock: Option<PipelineClock>,
}

pub struct FilteredChain {
    scheduler: Arc<FrameScheduler>,
    shared: Arc<ChainShared>,
    state: Arc<Mutex<RenderState>>,
    processors: Vec<Arc<dyn Processor>>,
}

impl FilteredChain {
    pub fn new(
        processors: Vec<Arc<dyn Processor>>,
        config: &Config,
        sink: Arc<dyn VideoSink>,
        errors: Arc<dyn ErrorSink>,
        scheduler: Arc<FrameScheduler>,
    ) -> Self {
        let preview = &config.preview;
        let shared = Arc::new(ChainShared {
            sink,
            errors,
            front: AtomicBool::new(preview.facing == crate::camera::Facing::Front),
            mirror: AtomicBool::new(preview.mirror_enabled),
            filter_enabled: AtomicBool::new(preview.filter_enabled),
            rotation: ArcSwap::from_pointee(RotationState::default()),
            scratch_rgba: Mutex::new(Vec::new()),
            profile: StageProfile::new(config.profiling.window.max(1)),
        });
        let state = Arc::new(Mutex::new(RenderState {
            desired: FilterGraph::new(Vec::new()),
            idle: FilterGraph::new(vec![FilterNode::Leaf(FilterSpec::identity())]),
            use_desired: preview.filter_enabled,
            texture: None,
            output_width: 0,
            output_height: 0,
            image_width: 0,
            image_height: 0,
            video_width: 0,
            video_height: 0,
            scratch_yuv: Vec::new(),
            clock: None,
        }));
        Self {
            scheduler,
            shared,
            state,
            processors,
        }
    }

    pub fn scheduler(&self) -> &Arc<FrameScheduler> {
        &self.scheduler
    }

    pub fn filter_enabled(&self) -> bool {
        self.shared.filter_enabled.load(Ordering::Acquire)
    }

    /// Orientation negotiated with the current camera session.
    pub fn rotation(&self) -> RotationState {
        **self.shared.rotation.load()
    }

    pub fn profile_averages(&self) -> StageAverages {
        self.shared.profile.averages()
    }

    /// Display surface size changed. Applied inside the render queue.
    pub fn resize(&self, width: u32, height: u32) {
        let state = Arc::clone(&self.state);
        self.scheduler.run_on_draw(Box::new(move |backend| {
            let mut st = state.lock().unwrap();
            st.output_width = width;
            st.output_height = height;
            backend.set_output_size(width, height)?;
            let RenderState {
                desired,
                idle,
                use_desired,
                ..
            } = &mut *st;
            let graph = if *use_desired { desired } else { idle };
            if !graph.is_initialized() {
                graph.init(backend)?;
            }
            graph.resize(width, height, backend)?;
            Ok(())
        }));
    }

    /// Swap between the desired filter set and the identity pass-through.
    /// The swap runs only inside the render-thread work queue, never from a
    /// UI or camera thread.
    pub fn toggle_filter(&self) {
        let state = Arc::clone(&self.state);
        let shared = Arc::clone(&self.shared);
        self.scheduler.run_on_draw(Box::new(move |backend| {
            let mut st = state.lock().unwrap();
            {
                let RenderState {
                    desired,
                    idle,
                    use_desired,
                    ..
                } = &mut *st;
                let outgoing = if *use_desired { desired } else { idle };
                outgoing.destroy(backend);
            }
            st.use_desired = !st.use_desired;
            shared
                .filter_enabled
                .store(st.use_desired, Ordering::Release);
            debug!("filter enabled: {}", st.use_desired);

            let (ow, oh) = (st.output_width, st.output_height);
            let (vw, vh) = (st.video_width, st.video_height);
            let RenderState {
                desired,
                idle,
                use_desired,
                ..
            } = &mut *st;
            let incoming = if *use_desired { desired } else { idle };
            incoming.flatten();
            incoming.init(backend)?;
            if ow != 0 {
                incoming.resize(ow, oh, backend)?;
            }
            if vw != 0 {
                incoming.set_image_size(vw, vh, backend)?;
            }
            Ok(())
        }));
    }

    /// Drain queued work and run the filter chain draw. Called once per
    /// display refresh from the render thread.
    pub fn render_tick(&self, backend: &mut dyn RenderBackend) {
        self.scheduler.drain_pre_draw(backend);
        if self.scheduler.should_draw() {
            let mut st = self.state.lock().unwrap();
            if let Some(texture) = st.texture {
                let drawn = {
                    let RenderState {
                        desired,
                        idle,
                        use_desired,
                        ..
                    } = &mut *st;
                    let graph = if *use_desired { desired } else { idle };
                    if graph.is_initialized() {
                        graph.draw(texture, backend).and_then(|_| backend.present())
                    } else {
                        Ok(())
                    }
                };
                match drawn {
                    Ok(()) => {
                        if let Some(mut clock) = st.clock.take() {
                            clock.mark_draw_done();
                            if let Some(sample) = clock.sample() {
                                self.shared.profile.record(sample);
                            }
                        }
                    }
                    Err(e) => {
                        error!("chain draw failed: {e}");
                        self.shared.errors.on_error(ErrorCode::Unknown);
                    }
                }
            }
        }
        self.scheduler.drain_post_draw(backend);
    }

    fn build_side_sink(shared: &Arc<ChainShared>) -> SideSink {
        let shared = Arc::clone(shared);
        let mut yuv: Vec<u8> = Vec::new();
        Box::new(move |rgba, width, height| {
            let start = Instant::now();
            let needed = width as usize * height as usize * 3 / 2;
            if yuv.len() != needed {
                yuv.resize(needed, 0);
            }
            let front = shared.front.load(Ordering::Acquire);
            let mirror = shared.mirror.load(Ordering::Acquire);
            if front && !mirror {
                convert::rgba_to_yuv_rotate90_flip(width, height, rgba, &mut yuv);
            } else {
                convert::rgba_to_yuv_rotate90(width, height, rgba, &mut yuv);
            }
            // The readback is transposed; the consumer sees it rotated
            // upright again.
            shared.sink.on_frame_data(&yuv, height, width);
            metrics::histogram!("side_channel_us").record(start.elapsed().as_micros() as f64);
        })
    }
}

impl FrameConsumer for FilteredChain {
    fn on_frame(&self, frame: Frame) {
        // Backpressure: while a job is pending the frame is dropped right
        // here, before any conversion work is spent on it.
        if self.scheduler.is_busy() {
            self.scheduler.note_dropped();
            return;
        }
        let width = frame.width();
        let height = frame.height();
        let mut clock = PipelineClock::start();

        let mut rgba = std::mem::take(&mut *self.shared.scratch_rgba.lock().unwrap());
        let needed = width as usize * height as usize * 4;
        if rgba.len() != needed {
            rgba.resize(needed, 0);
        }
        match frame.data() {
            FrameData::SemiPlanar(buf) => convert::yuv_to_rgba(width, height, buf, &mut rgba),
            FrameData::Planar { .. } => {
                let view = frame.planar_view().expect("planar frame has a view");
                convert::planar_to_rgba(&view, &mut rgba);
            }
        }
        clock.mark_converted();

        let shared = Arc::clone(&self.shared);
        let state = Arc::clone(&self.state);
        let scheduler = Arc::clone(&self.scheduler);
        self.scheduler.schedule_frame(Box::new(move |backend| {
            frame_job(&shared, &state, &scheduler, backend, frame, rgba, clock)
        }));
    }
}

fn frame_job(
    shared: &ChainShared,
    state: &Mutex<RenderState>,
    scheduler: &FrameScheduler,
    backend: &mut dyn RenderBackend,
    frame: Frame,
    rgba: Vec<u8>,
    mut clock: PipelineClock,
) -> Result<(), GpuError> {
    clock.mark_pre_draw();
    let result = if scheduler.is_paused() {
        Ok(())
    } else {
        run_frame(shared, state, scheduler, backend, &frame, &rgba, clock)
    };
    // The scratch buffer goes back for the next frame and the sensor buffer
    // goes back to its producer, whatever happened above.
    *shared.scratch_rgba.lock().unwrap() = rgba;
    frame.release();
    result
}

fn run_frame(
    shared: &ChainShared,
    state: &Mutex<RenderState>,
    scheduler: &FrameScheduler,
    backend: &mut dyn RenderBackend,
    frame: &Frame,
    rgba: &[u8],
    clock: PipelineClock,
) -> Result<(), GpuError> {
    let mut st = state.lock().unwrap();
    if st.output_width == 0 || st.output_height == 0 {
        // No surface geometry yet; nothing downstream can size itself.
        return Ok(());
    }
    let width = frame.width();
    let height = frame.height();

    if st.image_width == 0 {
        st.image_width = width;
        st.image_height = height;
        st.video_width = width;
        // The crop cannot exceed the source height.
        st.video_height =
            convert::aligned_video_height(width, st.output_width, st.output_height)
                .min(height & !0xF);
        st.scratch_yuv = vec![0; width as usize * st.video_height as usize * 3 / 2];
        let (vw, vh) = (st.video_width, st.video_height);
        {
            let RenderState {
                desired,
                idle,
                use_desired,
                ..
            } = &mut *st;
            let graph = if *use_desired { desired } else { idle };
            if !graph.is_initialized() {
                graph.init(backend)?;
            }
            graph.set_image_size(vw, vh, backend)?;
        }
        debug!("video size {}x{}", vw, vh);
        shared.sink.on_video_size_changed(vw, vh);
    }

    st.texture = Some(backend.upload_texture(rgba, width, height, st.texture)?);

    // With filtering off the side channel comes straight from the sensor
    // buffer instead of the GPU readback.
    if !shared.filter_enabled.load(Ordering::Acquire) {
        forward_unfiltered(shared, &mut st, frame);
    }

    st.clock = Some(clock);
    scheduler.mark_drawing_resumed();
    Ok(())
}

fn forward_unfiltered(shared: &ChainShared, st: &mut RenderState, frame: &Frame) {
    let width = frame.width();
    let height = frame.height();
    let vh = st.video_height;
    if vh == 0 {
        return;
    }
    let rotated = frame.rotation().rotation == Rotation::Deg90;
    let mirrored =
        shared.front.load(Ordering::Acquire) && shared.mirror.load(Ordering::Acquire);
    let out = &mut st.scratch_yuv;
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
    shared.sink.on_frame_data(&st.scratch_yuv[..len], width, vh);
}

impl ProcessorChain for FilteredChain {
    fn set_up(&self) {
        for processor in &self.processors {
            processor.set_up();
        }
        let mut nodes: Vec<FilterNode> = Vec::new();
        for processor in &self.processors {
            nodes.extend(processor.filters().into_iter().map(FilterNode::Leaf));
        }
        nodes.push(FilterNode::Leaf(FilterSpec::identity()));

        let mut st = self.state.lock().unwrap();
        let mut desired = FilterGraph::new(nodes);
        desired.set_side_sink(Some(Self::build_side_sink(&self.shared)));
        st.desired = desired;
    }

    fn on_camera_opened(&self, rotation: RotationState) {
        self.shared.rotation.store(Arc::new(rotation));
        let state = Arc::clone(&self.state);
        self.scheduler.run_on_draw(Box::new(move |_backend| {
            let mut st = state.lock().unwrap();
            st.desired.set_rotation(rotation);
            st.idle.set_rotation(rotation);
            Ok(())
        }));
    }

    fn pause(&self) {
        self.scheduler.pause();
    }

    fn resume(&self) {
        self.scheduler.resume();
    }

    fn camera_switched(&self) {
        self.shared.front.fetch_xor(true, Ordering::AcqRel);
    }

    fn switch_mirror(&self) {
        self.shared.mirror.fetch_xor(true, Ordering::AcqRel);
    }

    fn tear_down(&self) {
        for processor in &self.processors {
            processor.tear_down();
        }
    }
}
