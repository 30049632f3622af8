//! Ordered, mergeable filter tree and its multi-pass executor.
//!
//! Filters compose as a tree of leaves and groups; execution always runs
//! over the flattened depth-first leaf list. Every pass but the last renders
//! into an offscreen target at the transposed working resolution (the
//! intermediate passes operate in sensor orientation, only the final pass
//! maps to display space).

use tracing::debug;

use crate::camera::RotationState;
use crate::error::GpuError;
use crate::gpu::{
    texture_coords, FilterSpec, ProgramId, RenderBackend, RenderTarget, TextureId, Viewport,
    TEX_FLIP_VERTICAL, TEX_NO_ROTATION,
};

/// A leaf GPU filter or an ordered group of nodes.
#[derive(Debug, Clone)]
pub enum FilterNode {
    Leaf(FilterSpec),
    Group(Vec<FilterNode>),
}

impl FilterNode {
    fn collect(&self, out: &mut Vec<FilterSpec>) {
        match self {
            FilterNode::Leaf(spec) => out.push(spec.clone()),
            FilterNode::Group(children) => {
                for child in children {
                    child.collect(out);
                }
            }
        }
    }
}

/// Depth-first leaf list of a node forest.
pub fn flatten(nodes: &[FilterNode]) -> Vec<FilterSpec> {
    let mut leaves = Vec::new();
    for node in nodes {
        node.collect(&mut leaves);
    }
    leaves
}

struct Pass {
    spec: FilterSpec,
    program: Option<ProgramId>,
}

/// Receives the side-channel readback (pre-final-pass pixels, sensor
/// orientation) on the render thread.
pub type SideSink = Box<dyn FnMut(&[u8], u32, u32) + Send>;

pub struct FilterGraph {
    nodes: Vec<FilterNode>,
    passes: Vec<Pass>,
    targets: Vec<RenderTarget>,
    image_width: u32,
    image_height: u32,
    output_width: u32,
    output_height: u32,
    rotation_coords: [f32; 8],
    side_buf: Vec<u8>,
    side_sink: Option<SideSink>,
    initialized: bool,
}

impl FilterGraph {
    pub fn new(nodes: Vec<FilterNode>) -> Self {
        let mut graph = Self {
            nodes,
            passes: Vec::new(),
            targets: Vec::new(),
            image_width: 0,
            image_height: 0,
            output_width: 0,
            output_height: 0,
            rotation_coords: TEX_NO_ROTATION,
            side_buf: Vec::new(),
            side_sink: None,
            initialized: false,
        };
        graph.flatten();
        graph
    }

    /// Recompute the pass list from the node tree. Must run before any
    /// size or draw operation that depends on the pass count; compiled
    /// programs are rebuilt on the next [`FilterGraph::init`].
    pub fn flatten(&mut self) {
        self.passes = flatten(&self.nodes)
            .into_iter()
            .map(|spec| Pass {
                spec,
                program: None,
            })
            .collect();
        self.initialized = false;
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn leaves(&self) -> Vec<FilterSpec> {
        self.passes.iter().map(|p| p.spec.clone()).collect()
    }

    pub fn set_side_sink(&mut self, sink: Option<SideSink>) {
        self.side_sink = sink;
    }

    /// First-pass texture orientation for the current camera.
    pub fn set_rotation(&mut self, state: RotationState) {
        self.rotation_coords = texture_coords(state);
    }

    /// Compile any pass that does not hold a live program yet.
    pub fn init(&mut self, backend: &mut dyn RenderBackend) -> Result<(), GpuError> {
        for pass in &mut self.passes {
            if pass.program.is_none() {
                pass.program = Some(backend.compile_filter(&pass.spec)?);
            }
        }
        self.initialized = true;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Release every GPU resource this graph owns.
    pub fn destroy(&mut self, backend: &mut dyn RenderBackend) {
        for pass in &mut self.passes {
            if let Some(program) = pass.program.take() {
                backend.destroy_filter(program);
            }
        }
        for target in self.targets.drain(..) {
            backend.destroy_target(target);
        }
        self.initialized = false;
    }

    /// Display-space output size changed.
    pub fn resize(
        &mut self,
        output_width: u32,
        output_height: u32,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), GpuError> {
        self.output_width = output_width;
        self.output_height = output_height;
        self.rebuild_targets(backend)
    }

    /// Sensor-space working size changed; provisions the side-channel
    /// staging buffer and re-runs the resize with the known output size.
    pub fn set_image_size(
        &mut self,
        width: u32,
        height: u32,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), GpuError> {
        self.image_width = width;
        self.image_height = height;
        self.side_buf = vec![0; width as usize * height as usize * 4];
        debug!("filter image size {}x{}", width, height);
        self.rebuild_targets(backend)
    }

    /// Exactly `pass_count - 1` targets, all at the transposed working
    /// resolution; existing targets are destroyed first.
    fn rebuild_targets(&mut self, backend: &mut dyn RenderBackend) -> Result<(), GpuError> {
        for target in self.targets.drain(..) {
            backend.destroy_target(target);
        }
        if self.image_width == 0 || self.passes.is_empty() {
            return Ok(());
        }
        for _ in 0..self.passes.len() - 1 {
            self.targets
                .push(backend.create_target(self.image_height, self.image_width)?);
        }
        Ok(())
    }

    /// Execute the pass chain over `input`.
    ///
    /// Intermediate pass `i` renders into target `i`; the final pass draws
    /// to the output with the edge-inset viewport. The final pass samples
    /// with vertically flipped coordinates when the pass count is even, to
    /// compensate the framebuffer flips accumulated along the chain. The
    /// side channel reads back exactly one pass before the end.
    pub fn draw(
        &mut self,
        input: TextureId,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), GpuError> {
        if !self.initialized || self.passes.is_empty() {
            return Ok(());
        }
        let count = self.passes.len();
        if count > 1 && self.targets.len() != count - 1 {
            // Not sized yet; the first frame job will get here first.
            return Ok(());
        }

        let mut previous = input;
        for i in 0..count {
            let is_last = i == count - 1;
            let program = self.passes[i]
                .program
                .ok_or_else(|| GpuError::Draw("pass not compiled".into()))?;
            let coords = if i == 0 {
                self.rotation_coords
            } else if is_last && count % 2 == 0 {
                TEX_FLIP_VERTICAL
            } else {
                TEX_NO_ROTATION
            };

            if is_last {
                backend.draw_pass(
                    program,
                    previous,
                    None,
                    Viewport::inset(self.output_width, self.output_height),
                    &coords,
                )?;
            } else {
                let target = self.targets[i];
                backend.draw_pass(
                    program,
                    previous,
                    Some(&target),
                    Viewport::exact(target.width, target.height),
                    &coords,
                )?;
                if i + 2 == count && target.width * target.height != 0 {
                    self.dump_side_channel(&target, backend)?;
                }
                previous = target.texture;
            }
        }
        Ok(())
    }

    fn dump_side_channel(
        &mut self,
        target: &RenderTarget,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), GpuError> {
        let Some(sink) = self.side_sink.as_mut() else {
            return Ok(());
        };
        let needed = target.width as usize * target.height as usize * 4;
        debug_assert!(self.side_buf.len() >= needed, "side buffer undersized");
        backend.read_target(target, &mut self.side_buf[..needed])?;
        sink(&self.side_buf[..needed], target.width, target.height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::gpu::testing::{BackendEvent, MockBackend};
    use crate::gpu::EDGE_INSET;

    fn leaf(label: &str) -> FilterNode {
        FilterNode::Leaf(FilterSpec::new(label, "fragment"))
    }

    fn labels(specs: &[FilterSpec]) -> Vec<&str> {
        specs.iter().map(|s| s.label.as_str()).collect()
    }

    #[test]
    fn flatten_is_depth_first() {
        let nodes = vec![
            leaf("a"),
            FilterNode::Group(vec![
                leaf("b"),
                FilterNode::Group(vec![leaf("c"), leaf("d")]),
            ]),
            leaf("e"),
        ];
        assert_eq!(labels(&flatten(&nodes)), ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn flatten_is_idempotent() {
        let nested = vec![FilterNode::Group(vec![
            FilterNode::Group(vec![leaf("a"), leaf("b")]),
            leaf("c"),
        ])];
        let once = flatten(&nested);
        let pre_flattened: Vec<FilterNode> =
            once.iter().cloned().map(FilterNode::Leaf).collect();
        assert_eq!(flatten(&pre_flattened), once);
    }

    fn sized_graph(passes: &[&str]) -> (FilterGraph, MockBackend) {
        let mut backend = MockBackend::new();
        let nodes = passes.iter().map(|l| leaf(l)).collect();
        let mut graph = FilterGraph::new(nodes);
        graph.init(&mut backend).unwrap();
        graph.resize(640, 480, &mut backend).unwrap();
        graph.set_image_size(640, 464, &mut backend).unwrap();
        (graph, backend)
    }

    #[test]
    fn resize_keeps_pass_count_minus_one_transposed_targets() {
        let (mut graph, mut backend) = sized_graph(&["a", "b", "c"]);
        assert_eq!(graph.target_count(), 2);
        assert_eq!(backend.live_targets.len(), 2);

        // 640x480 -> 480x640 -> 640x480; the target dimensions always stay
        // the transposed working size.
        for (w, h) in [(480, 640), (640, 480)] {
            graph.resize(w, h, &mut backend).unwrap();
            assert_eq!(graph.target_count(), 2);
            assert_eq!(backend.live_targets.len(), 2);
        }
        let created: Vec<_> = backend
            .events
            .iter()
            .filter_map(|e| match e {
                BackendEvent::CreateTarget { width, height } => Some((*width, *height)),
                _ => None,
            })
            .collect();
        assert!(created.iter().all(|&(w, h)| (w, h) == (464, 640)));
    }

    #[test]
    fn draw_chains_targets_and_insets_the_final_pass() {
        let (mut graph, mut backend) = sized_graph(&["a", "b", "c"]);
        backend.events.clear();
        graph.draw(TextureId(99), &mut backend).unwrap();

        let draws = backend.draws();
        assert_eq!(draws.len(), 3);
        let mut previous = 99;
        for (i, event) in draws.iter().enumerate() {
            let BackendEvent::Draw {
                input,
                target,
                viewport,
                ..
            } = event
            else {
                unreachable!()
            };
            assert_eq!(*input, previous, "pass {i} input");
            if i < 2 {
                let t = target.expect("intermediate pass needs a target");
                assert_eq!(*viewport, Viewport::exact(464, 640));
                previous = t;
            } else {
                assert!(target.is_none(), "final pass draws to the output");
                assert_eq!(viewport.x, -EDGE_INSET);
                assert_eq!(viewport.width, 640 + 2 * EDGE_INSET);
                assert_eq!(viewport.height, 480 + 2 * EDGE_INSET);
            }
        }
    }

    #[test]
    fn final_coords_flip_only_on_even_pass_counts() {
        let (mut graph, mut backend) = sized_graph(&["a", "b"]);
        graph.draw(TextureId(1), &mut backend).unwrap();
        let BackendEvent::Draw { coords, .. } = backend.draws()[1] else {
            unreachable!()
        };
        assert_eq!(*coords, TEX_FLIP_VERTICAL, "even chain flips");

        let (mut graph, mut backend) = sized_graph(&["a", "b", "c"]);
        graph.draw(TextureId(1), &mut backend).unwrap();
        let BackendEvent::Draw { coords, .. } = backend.draws()[2] else {
            unreachable!()
        };
        assert_eq!(*coords, TEX_NO_ROTATION, "odd chain does not flip");
    }

    #[test]
    fn side_channel_reads_one_pass_before_the_end() {
        let (mut graph, mut backend) = sized_graph(&["a", "b", "c"]);
        let dumps = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&dumps);
        graph.set_side_sink(Some(Box::new(move |_, w, h| {
            assert_eq!((w, h), (464, 640));
            seen.fetch_add(1, Ordering::SeqCst);
        })));
        graph.draw(TextureId(1), &mut backend).unwrap();
        assert_eq!(dumps.load(Ordering::SeqCst), 1);

        // The read lands on the second-to-last pass's target.
        let read_pos = backend
            .events
            .iter()
            .position(|e| matches!(e, BackendEvent::Read(_)))
            .unwrap();
        let second_draw = backend
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, BackendEvent::Draw { .. }))
            .nth(1)
            .unwrap()
            .0;
        let last_draw = backend
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, BackendEvent::Draw { .. }))
            .nth(2)
            .unwrap()
            .0;
        assert!(second_draw < read_pos && read_pos < last_draw);
    }

    #[test]
    fn single_pass_graph_skips_targets_and_side_channel() {
        let (mut graph, mut backend) = sized_graph(&["only"]);
        assert_eq!(graph.target_count(), 0);
        graph.set_side_sink(Some(Box::new(|_, _, _| {
            panic!("no side channel on a single-pass graph")
        })));
        graph.draw(TextureId(1), &mut backend).unwrap();
        assert_eq!(backend.draws().len(), 1);
    }

    #[test]
    fn destroy_releases_all_targets() {
        let (mut graph, mut backend) = sized_graph(&["a", "b", "c"]);
        graph.destroy(&mut backend);
        assert!(backend.live_targets.is_empty());
        assert!(!graph.is_initialized());
    }
}
