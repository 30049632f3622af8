//! WebGPU implementation of the render backend.

use std::collections::HashMap;

use tracing::{info, warn};

use super::{FilterSpec, ProgramId, RenderBackend, RenderTarget, TargetId, TextureId, Viewport};
use crate::error::GpuError;

/// Shared vertex stage plus the bindings every filter fragment samples.
const VERTEX_WGSL: &str = r#"
struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@location(0) pos: vec2<f32>, @location(1) uv: vec2<f32>) -> VsOut {
    var out: VsOut;
    out.position = vec4<f32>(pos, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@group(0) @binding(0) var frame_tex: texture_2d<f32>;
@group(0) @binding(1) var frame_samp: sampler;
"#;

/// Fullscreen quad, triangle-strip order.
const QUAD: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const VERTEX_ATTRS: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

struct TextureEntry {
    texture: wgpu::Texture,
    bind: wgpu::BindGroup,
    width: u32,
    height: u32,
    renderable: bool,
}

struct SurfaceState {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

pub struct WgpuBackend {
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    sampler: wgpu::Sampler,
    bind_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    vertex_buf: wgpu::Buffer,
    programs: HashMap<u32, wgpu::RenderPipeline>,
    textures: HashMap<u32, TextureEntry>,
    readback: Option<(wgpu::Buffer, u64)>,
    surface: Option<SurfaceState>,
    pending_frame: Option<wgpu::SurfaceTexture>,
    output: Option<(wgpu::Texture, u32, u32)>,
    next_id: u32,
}

impl WgpuBackend {
    /// Acquire a device and the fixed pipeline scaffolding. Headless until a
    /// window is attached.
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(GpuError::NoAdapter)?;
        info!("GPU: {}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("iris device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| GpuError::DeviceRequest(e.to_string()))?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("frame sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("filter bindings"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("filter pipeline layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let vertex_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quad vertices"),
            size: 16 * std::mem::size_of::<f32>() as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            sampler,
            bind_layout,
            pipeline_layout,
            vertex_buf,
            programs: HashMap::new(),
            textures: HashMap::new(),
            readback: None,
            surface: None,
            pending_frame: None,
            output: None,
            next_id: 0,
        })
    }

    /// Present into a host window. The surface must support `Rgba8Unorm`,
    /// the format every filter pipeline targets.
    pub fn attach_window<W>(&mut self, window: W, width: u32, height: u32) -> Result<(), GpuError>
    where
        W: raw_window_handle::HasWindowHandle
            + raw_window_handle::HasDisplayHandle
            + Send
            + Sync
            + 'static,
    {
        let surface = self
            .instance
            .create_surface(wgpu::SurfaceTarget::Window(Box::new(window)))
            .map_err(|e| GpuError::Surface(e.to_string()))?;
        let caps = surface.get_capabilities(&self.adapter);
        if !caps.formats.contains(&TARGET_FORMAT) {
            return Err(GpuError::Surface(format!(
                "surface does not support {TARGET_FORMAT:?}"
            )));
        }
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: TARGET_FORMAT,
            width,
            height,
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&self.device, &config);
        self.surface = Some(SurfaceState { surface, config });
        Ok(())
    }

    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn make_entry(&self, width: u32, height: u32, renderable: bool) -> TextureEntry {
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        if renderable {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("frame texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame bindings"),
            layout: &self.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        TextureEntry {
            texture,
            bind,
            width,
            height,
            renderable,
        }
    }

    fn write_pixels(&self, entry: &TextureEntry, rgba: &[u8]) {
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * entry.width),
                rows_per_image: Some(entry.height),
            },
            wgpu::Extent3d {
                width: entry.width,
                height: entry.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn ensure_output(&mut self, width: u32, height: u32) {
        let stale = match &self.output {
            Some((_, w, h)) => (*w, *h) != (width, height),
            None => true,
        };
        if stale {
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("offscreen output"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            self.output = Some((texture, width, height));
        }
    }
}

impl RenderBackend for WgpuBackend {
    fn compile_filter(&mut self, spec: &FilterSpec) -> Result<ProgramId, GpuError> {
        let source = format!("{VERTEX_WGSL}\n{}", spec.fragment);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&spec.label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&spec.label),
                layout: Some(&self.pipeline_layout),
                cache: None,
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: 16,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &VERTEX_ATTRS,
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        let id = self.alloc_id();
        self.programs.insert(id, pipeline);
        Ok(ProgramId(id))
    }

    fn destroy_filter(&mut self, program: ProgramId) {
        self.programs.remove(&program.0);
    }

    fn upload_texture(
        &mut self,
        rgba: &[u8],
        width: u32,
        height: u32,
        reuse: Option<TextureId>,
    ) -> Result<TextureId, GpuError> {
        if let Some(id) = reuse {
            if let Some(entry) = self.textures.get(&id.0) {
                if entry.width == width && entry.height == height {
                    self.write_pixels(entry, rgba);
                    return Ok(id);
                }
            }
            self.textures.remove(&id.0);
        }
        let entry = self.make_entry(width, height, false);
        self.write_pixels(&entry, rgba);
        let id = self.alloc_id();
        self.textures.insert(id, entry);
        Ok(TextureId(id))
    }

    fn create_target(&mut self, width: u32, height: u32) -> Result<RenderTarget, GpuError> {
        let entry = self.make_entry(width, height, true);
        let id = self.alloc_id();
        self.textures.insert(id, entry);
        Ok(RenderTarget {
            id: TargetId(id),
            texture: TextureId(id),
            width,
            height,
        })
    }

    fn destroy_target(&mut self, target: RenderTarget) {
        self.textures.remove(&target.id.0);
    }

    fn draw_pass(
        &mut self,
        program: ProgramId,
        input: TextureId,
        target: Option<&RenderTarget>,
        viewport: Viewport,
        tex_coords: &[f32; 8],
    ) -> Result<(), GpuError> {
        // Interleave positions and the per-draw texture coordinates.
        let mut verts = [0f32; 16];
        for corner in 0..4 {
            verts[corner * 4] = QUAD[corner * 2];
            verts[corner * 4 + 1] = QUAD[corner * 2 + 1];
            verts[corner * 4 + 2] = tex_coords[corner * 2];
            verts[corner * 4 + 3] = tex_coords[corner * 2 + 1];
        }
        let bytes: Vec<u8> = verts.iter().flat_map(|v| v.to_ne_bytes()).collect();
        self.queue.write_buffer(&self.vertex_buf, 0, &bytes);

        if target.is_none() && self.surface.is_some() && self.pending_frame.is_none() {
            let state = self.surface.as_ref().unwrap();
            match state.surface.get_current_texture() {
                Ok(frame) => self.pending_frame = Some(frame),
                Err(e) => return Err(GpuError::Surface(e.to_string())),
            }
        }
        if target.is_none() && self.surface.is_none() {
            let width = viewport.width.max(1) as u32;
            let height = viewport.height.max(1) as u32;
            self.ensure_output(width, height);
        }

        let pipeline = self
            .programs
            .get(&program.0)
            .ok_or_else(|| GpuError::Draw("unknown program".into()))?;
        let input_entry = self
            .textures
            .get(&input.0)
            .ok_or_else(|| GpuError::Draw("unknown input texture".into()))?;

        let view = match target {
            Some(t) => {
                let entry = self
                    .textures
                    .get(&t.id.0)
                    .ok_or_else(|| GpuError::Draw("unknown render target".into()))?;
                if !entry.renderable {
                    return Err(GpuError::Draw("target is not renderable".into()));
                }
                entry
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default())
            }
            None => match (&self.pending_frame, &self.output) {
                (Some(frame), _) => frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default()),
                (None, Some((texture, _, _))) => {
                    texture.create_view(&wgpu::TextureViewDescriptor::default())
                }
                (None, None) => return Err(GpuError::Draw("no output target".into())),
            },
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("filter pass"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("filter pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &input_entry.bind, &[]);
            pass.set_vertex_buffer(0, self.vertex_buf.slice(..));
            pass.set_viewport(
                viewport.x as f32,
                viewport.y as f32,
                viewport.width as f32,
                viewport.height as f32,
                0.0,
                1.0,
            );
            pass.draw(0..4, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_target(&mut self, target: &RenderTarget, out: &mut [u8]) -> Result<(), GpuError> {
        let entry = self
            .textures
            .get(&target.id.0)
            .ok_or_else(|| GpuError::Readback("unknown render target".into()))?;
        let row_bytes = target.width as u64 * 4;
        let padded = (row_bytes + 255) & !255;
        let size = padded * u64::from(target.height);
        if out.len() < (row_bytes * u64::from(target.height)) as usize {
            return Err(GpuError::Readback("output buffer undersized".into()));
        }

        let reuse = matches!(&self.readback, Some((_, s)) if *s == size);
        if !reuse {
            self.readback = Some((
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("readback"),
                    size,
                    usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                    mapped_at_creation: false,
                }),
                size,
            ));
        }
        let (buffer, _) = self.readback.as_ref().unwrap();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(target.height),
                },
            },
            wgpu::Extent3d {
                width: target.width,
                height: target.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| GpuError::Readback("map callback dropped".into()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;
        {
            let data = slice.get_mapped_range();
            for row in 0..target.height as usize {
                let src = row * padded as usize;
                let dst = row * row_bytes as usize;
                out[dst..dst + row_bytes as usize]
                    .copy_from_slice(&data[src..src + row_bytes as usize]);
            }
        }
        buffer.unmap();
        Ok(())
    }

    fn set_output_size(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        if let Some(state) = self.surface.as_mut() {
            state.config.width = width.max(1);
            state.config.height = height.max(1);
            state.surface.configure(&self.device, &state.config);
        } else {
            self.ensure_output(width.max(1), height.max(1));
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), GpuError> {
        if let Some(frame) = self.pending_frame.take() {
            frame.present();
        } else if self.surface.is_some() {
            warn!("present without a drawn frame");
        }
        Ok(())
    }
}
