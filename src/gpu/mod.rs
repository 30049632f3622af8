//! The render-backend seam.
//!
//! Everything the filter graph needs from a GPU: compiled filter programs,
//! texture upload, offscreen render targets, single passes and readback.
//! The production implementation lives in [`wgpu_backend`]; tests drive the
//! graph against a recording mock.

pub mod wgpu_backend;

pub use wgpu_backend::WgpuBackend;

use crate::camera::RotationState;
use crate::error::GpuError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u32);

/// Offscreen framebuffer + texture pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub id: TargetId,
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
}

/// Inset applied to the final pass so sampling artifacts land past the
/// visible edge of the output.
pub const EDGE_INSET: i32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub fn exact(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width: width as i32,
            height: height as i32,
        }
    }

    /// Final-pass viewport, enlarged past the surface on every side.
    pub fn inset(width: u32, height: u32) -> Self {
        Self {
            x: -EDGE_INSET,
            y: -EDGE_INSET,
            width: width as i32 + 2 * EDGE_INSET,
            height: height as i32 + 2 * EDGE_INSET,
        }
    }
}

/// One leaf GPU filter: a label plus the fragment stage that implements it.
/// The fragment source must expose `fs_main` and sample `frame_tex` with
/// `frame_samp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    pub label: String,
    pub fragment: String,
}

impl FilterSpec {
    pub fn new(label: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            fragment: fragment.into(),
        }
    }

    /// Pass-through filter, always appended as the final pass and used alone
    /// while filtering is disabled.
    pub fn identity() -> Self {
        Self::new(
            "identity",
            r#"
@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(frame_tex, frame_samp, in.uv);
}
"#,
        )
    }
}

/// Quad texture coordinates, one (u, v) pair per corner.
pub const TEX_NO_ROTATION: [f32; 8] = [0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0];

/// Vertical flip of [`TEX_NO_ROTATION`], compensating the framebuffer flip
/// parity of even-length pass chains.
pub const TEX_FLIP_VERTICAL: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

/// Coordinates orienting a sensor frame for the first pass.
pub fn texture_coords(state: RotationState) -> [f32; 8] {
    use crate::camera::Rotation;
    let mut coords = match state.rotation {
        Rotation::Deg0 => TEX_NO_ROTATION,
        Rotation::Deg90 => [1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        Rotation::Deg180 => [1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0],
        Rotation::Deg270 => [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0],
    };
    if state.flip_horizontal {
        for u in coords.iter_mut().step_by(2) {
            *u = 1.0 - *u;
        }
    }
    if state.flip_vertical {
        for v in coords.iter_mut().skip(1).step_by(2) {
            *v = 1.0 - *v;
        }
    }
    coords
}

/// Serialized GPU access used by the filter graph and the frame scheduler.
pub trait RenderBackend {
    fn compile_filter(&mut self, spec: &FilterSpec) -> Result<ProgramId, GpuError>;
    fn destroy_filter(&mut self, program: ProgramId);

    /// Upload RGBA pixels, reusing `reuse` when it matches the dimensions.
    fn upload_texture(
        &mut self,
        rgba: &[u8],
        width: u32,
        height: u32,
        reuse: Option<TextureId>,
    ) -> Result<TextureId, GpuError>;

    fn create_target(&mut self, width: u32, height: u32) -> Result<RenderTarget, GpuError>;
    fn destroy_target(&mut self, target: RenderTarget);

    /// Run one filter pass. `target` of `None` draws to the output surface.
    fn draw_pass(
        &mut self,
        program: ProgramId,
        input: TextureId,
        target: Option<&RenderTarget>,
        viewport: Viewport,
        tex_coords: &[f32; 8],
    ) -> Result<(), GpuError>;

    /// Read a target's pixels back as tightly packed RGBA.
    fn read_target(&mut self, target: &RenderTarget, out: &mut [u8]) -> Result<(), GpuError>;

    /// Resize the final output (surface or offscreen stand-in).
    fn set_output_size(&mut self, width: u32, height: u32) -> Result<(), GpuError>;

    /// Hand the finished frame to the display.
    fn present(&mut self) -> Result<(), GpuError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum BackendEvent {
        Compile(String),
        Upload {
            width: u32,
            height: u32,
            reused: bool,
        },
        CreateTarget {
            width: u32,
            height: u32,
        },
        DestroyTarget(u32),
        Draw {
            program: u32,
            input: u32,
            target: Option<u32>,
            viewport: Viewport,
            coords: [f32; 8],
        },
        Read(u32),
        SetOutput {
            width: u32,
            height: u32,
        },
        Present,
    }

    /// Records every call; readback fills the buffer with a constant.
    #[derive(Default)]
    pub struct MockBackend {
        pub events: Vec<BackendEvent>,
        pub live_targets: HashSet<u32>,
        pub readback_fill: u8,
        next_id: u32,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        fn next(&mut self) -> u32 {
            self.next_id += 1;
            self.next_id
        }

        pub fn draws(&self) -> Vec<&BackendEvent> {
            self.events
                .iter()
                .filter(|e| matches!(e, BackendEvent::Draw { .. }))
                .collect()
        }
    }

    impl RenderBackend for MockBackend {
        fn compile_filter(&mut self, spec: &FilterSpec) -> Result<ProgramId, GpuError> {
            self.events.push(BackendEvent::Compile(spec.label.clone()));
            Ok(ProgramId(self.next()))
        }

        fn destroy_filter(&mut self, _program: ProgramId) {}

        fn upload_texture(
            &mut self,
            _rgba: &[u8],
            width: u32,
            height: u32,
            reuse: Option<TextureId>,
        ) -> Result<TextureId, GpuError> {
            self.events.push(BackendEvent::Upload {
                width,
                height,
                reused: reuse.is_some(),
            });
            Ok(reuse.unwrap_or(TextureId(self.next())))
        }

        fn create_target(&mut self, width: u32, height: u32) -> Result<RenderTarget, GpuError> {
            let id = self.next();
            self.live_targets.insert(id);
            self.events.push(BackendEvent::CreateTarget { width, height });
            Ok(RenderTarget {
                id: TargetId(id),
                texture: TextureId(id),
                width,
                height,
            })
        }

        fn destroy_target(&mut self, target: RenderTarget) {
            self.live_targets.remove(&target.id.0);
            self.events.push(BackendEvent::DestroyTarget(target.id.0));
        }

        fn draw_pass(
            &mut self,
            program: ProgramId,
            input: TextureId,
            target: Option<&RenderTarget>,
            viewport: Viewport,
            tex_coords: &[f32; 8],
        ) -> Result<(), GpuError> {
            self.events.push(BackendEvent::Draw {
                program: program.0,
                input: input.0,
                target: target.map(|t| t.id.0),
                viewport,
                coords: *tex_coords,
            });
            Ok(())
        }

        fn read_target(&mut self, target: &RenderTarget, out: &mut [u8]) -> Result<(), GpuError> {
            self.events.push(BackendEvent::Read(target.id.0));
            out.fill(self.readback_fill);
            Ok(())
        }

        fn set_output_size(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
            self.events.push(BackendEvent::SetOutput { width, height });
            Ok(())
        }

        fn present(&mut self) -> Result<(), GpuError> {
            self.events.push(BackendEvent::Present);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Facing, Rotation};

    #[test]
    fn flip_vertical_inverts_v() {
        let state = RotationState {
            rotation: Rotation::Deg0,
            flip_horizontal: false,
            flip_vertical: true,
        };
        assert_eq!(texture_coords(state), TEX_FLIP_VERTICAL);
    }

    #[test]
    fn front_camera_coords_mirror_u() {
        let state = RotationState::for_camera(0, 0, Facing::Front);
        let coords = texture_coords(state);
        for (i, pair) in TEX_NO_ROTATION.chunks(2).enumerate() {
            assert_eq!(coords[i * 2], 1.0 - pair[0]);
            assert_eq!(coords[i * 2 + 1], pair[1]);
        }
    }

    #[test]
    fn inset_viewport_overscans_every_side() {
        let vp = Viewport::inset(640, 480);
        assert_eq!(vp.x, -7);
        assert_eq!(vp.y, -7);
        assert_eq!(vp.width, 654);
        assert_eq!(vp.height, 494);
    }
}
