//! wgpu implementation of [`RenderBackend`].
//!
//! Every shader becomes one render pipeline over the [`ModelVertex`] layout.
//! Uniforms of all draws in a frame are packed into one buffer and selected
//! per draw with a dynamic offset.

use std::{iter, mem, sync::Arc};

use anyhow::anyhow;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::{
    camera::Viewport,
    data_structures::{
        actor::{UniformValue, Uniforms, uniform_names},
        geometry::{GeometryData, ModelVertex},
        transform::{identity, to_cols},
    },
    render::{RenderBackend, RenderCommand, ShaderSource},
};

/// Must match `MAX_JOINTS` of `viewer_vertex.wgsl`.
pub const SHADER_MAX_JOINTS: usize = 64;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct DrawUniforms {
    local_to_world: [[f32; 4]; 4],
    world_to_camera: [[f32; 4]; 4],
    camera_projection: [[f32; 4]; 4],
    time: [f32; 4],
    joint_to_world: [[[f32; 4]; 4]; SHADER_MAX_JOINTS],
    world_to_joint: [[[f32; 4]; 4]; SHADER_MAX_JOINTS],
}

fn matrix_uniform(uniforms: &Uniforms, name: &str) -> [[f32; 4]; 4] {
    match uniforms.get(name) {
        Some(UniformValue::Matrix(m)) => to_cols(m),
        _ => to_cols(&identity()),
    }
}

fn matrix_array_uniform(uniforms: &Uniforms, name: &str) -> [[[f32; 4]; 4]; SHADER_MAX_JOINTS] {
    let mut out = [to_cols(&identity()); SHADER_MAX_JOINTS];
    if let Some(UniformValue::MatrixArray(matrices)) = uniforms.get(name) {
        for (slot, m) in out.iter_mut().zip(matrices.iter()) {
            *slot = to_cols(m);
        }
    }
    out
}

impl DrawUniforms {
    fn from_uniforms(uniforms: &Uniforms) -> Self {
        let time = match uniforms.get(uniform_names::TIME) {
            Some(UniformValue::Float(t)) => *t,
            _ => 0.0,
        };
        Self {
            local_to_world: matrix_uniform(uniforms, uniform_names::LOCAL_TO_WORLD),
            world_to_camera: matrix_uniform(uniforms, uniform_names::WORLD_TO_CAMERA),
            camera_projection: matrix_uniform(uniforms, uniform_names::CAMERA_PROJECTION),
            time: [time, 0.0, 0.0, 0.0],
            joint_to_world: matrix_array_uniform(uniforms, uniform_names::JOINT_TO_WORLD),
            world_to_joint: matrix_array_uniform(uniforms, uniform_names::WORLD_TO_JOINT),
        }
    }
}

fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
        3 => Float32x4,
        4 => Float32x4,
    ];
    wgpu::VertexBufferLayout {
        array_stride: mem::size_of::<ModelVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

#[derive(Debug)]
pub struct GeometryBuffers {
    vertex: wgpu::Buffer,
    index: Option<wgpu::Buffer>,
    element_count: u32,
}

pub type GpuGeometry = Arc<GeometryBuffers>;
pub type GpuShader = Arc<wgpu::RenderPipeline>;

fn mk_render_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    color_format: wgpu::TextureFormat,
    source: &ShaderSource,
) -> wgpu::RenderPipeline {
    let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(source.label.as_ref()),
        source: wgpu::ShaderSource::Wgsl(source.vertex.clone()),
    });
    let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(source.label.as_ref()),
        source: wgpu::ShaderSource::Wgsl(source.fragment.clone()),
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        cache: None,
        label: Some(source.label.as_ref()),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: &vertex,
            entry_point: Some("vs_main"),
            buffers: &[vertex_layout()],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &fragment,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            // glTF assets aren't guaranteed to be closed meshes
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
    })
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("depth_texture"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

/// Uniform blocks of consecutive draws are this far apart.
fn uniform_stride(device: &wgpu::Device) -> u64 {
    let align = device.limits().min_uniform_buffer_offset_alignment as u64;
    let size = mem::size_of::<DrawUniforms>() as u64;
    size.div_ceil(align) * align
}

pub struct WgpuBackend {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    is_surface_configured: bool,
    depth: wgpu::TextureView,
    uniform_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    uniform_capacity: u64,
    alive: bool,
}

impl WgpuBackend {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            #[cfg(not(target_arch = "wasm32"))]
            backends: wgpu::Backends::PRIMARY,
            #[cfg(target_arch = "wasm32")]
            backends: wgpu::Backends::GL,
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone())?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                // WebGL doesn't support all of wgpu's features
                required_limits: if cfg!(target_arch = "wasm32") {
                    wgpu::Limits::downlevel_webgl2_defaults()
                } else {
                    wgpu::Limits::default()
                },
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
                ..Default::default()
            })
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| anyhow!("surface is incompatible with the adapter"))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps
                .present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(mem::size_of::<DrawUniforms>() as u64),
                },
                count: None,
            }],
            label: Some("draw_uniforms_layout"),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Viewer Pipeline Layout"),
            bind_group_layouts: &[&uniform_layout],
            push_constant_ranges: &[],
        });
        let depth = create_depth_view(&device, config.width, config.height);
        let (uniform_buffer, uniform_bind_group) = Self::mk_uniforms(&device, &uniform_layout, 1);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            is_surface_configured: true,
            depth,
            uniform_layout,
            pipeline_layout,
            uniform_buffer,
            uniform_bind_group,
            uniform_capacity: 1,
            alive: true,
        })
    }

    fn mk_uniforms(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        draws: u64,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Draw Uniform Buffer"),
            size: uniform_stride(device) * draws.max(1),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(mem::size_of::<DrawUniforms>() as u64),
                }),
            }],
            label: Some("draw_uniforms_bind_group"),
        });
        (buffer, bind_group)
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);
            self.depth = create_depth_view(&self.device, width, height);
            self.is_surface_configured = true;
        }
    }

    /// Marks the backend as gone, ending any render loop driving it.
    pub fn destroy(&mut self) {
        self.alive = false;
    }
}

impl RenderBackend for WgpuBackend {
    type Geometry = GpuGeometry;
    type Shader = GpuShader;

    async fn create_geometry(&mut self, geometry: &GeometryData) -> anyhow::Result<GpuGeometry> {
        let vertex = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Vertex Buffer"),
            contents: bytemuck::cast_slice(&geometry.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index = geometry.indices.as_ref().map(|indices| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Index Buffer"),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            })
        });
        Ok(Arc::new(GeometryBuffers {
            vertex,
            index,
            element_count: geometry.element_count(),
        }))
    }

    async fn create_shader(&mut self, source: &ShaderSource) -> anyhow::Result<GpuShader> {
        Ok(Arc::new(mk_render_pipeline(
            &self.device,
            &self.pipeline_layout,
            self.config.format,
            source,
        )))
    }

    fn screen_rect(&self) -> Viewport {
        Viewport::new(self.config.width as f32, self.config.height as f32)
    }

    async fn submit(&mut self, commands: Vec<RenderCommand<GpuGeometry, GpuShader>>) -> anyhow::Result<()> {
        if !self.alive {
            return Err(anyhow!("backend was destroyed"));
        }
        if !self.is_surface_configured {
            return Ok(());
        }

        let mut clear_colour = wgpu::Color::BLACK;
        let mut draws = Vec::new();
        for command in commands {
            match command {
                RenderCommand::SetRenderTarget { target, clear_colour: colour } => {
                    if let Some(target) = target {
                        log::warn!("Offscreen target {} isn't supported, drawing to the screen", target);
                    }
                    clear_colour = colour;
                }
                RenderCommand::Draw {
                    geometry,
                    shader,
                    uniforms,
                } => draws.push((geometry, shader, DrawUniforms::from_uniforms(&uniforms))),
            }
        }

        let stride = uniform_stride(&self.device);
        if draws.len() as u64 > self.uniform_capacity {
            let capacity = (draws.len() as u64).next_power_of_two();
            let (buffer, bind_group) = Self::mk_uniforms(&self.device, &self.uniform_layout, capacity);
            self.uniform_buffer = buffer;
            self.uniform_bind_group = bind_group;
            self.uniform_capacity = capacity;
        }
        let mut staging = vec![0u8; (stride * draws.len() as u64) as usize];
        for (idx, (_, _, uniforms)) in draws.iter().enumerate() {
            let start = idx * stride as usize;
            let bytes = bytemuck::bytes_of(uniforms);
            staging[start..start + bytes.len()].copy_from_slice(bytes);
        }
        if !staging.is_empty() {
            self.queue.write_buffer(&self.uniform_buffer, 0, &staging);
        }

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(e @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                let size = self.window.inner_size();
                self.resize(size.width, size.height);
                return Err(anyhow!("surface texture unavailable: {}", e));
            }
            Err(e) => return Err(anyhow!("surface texture unavailable: {}", e)),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear_colour),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            for (idx, (geometry, shader, _)) in draws.iter().enumerate() {
                if geometry.element_count == 0 {
                    continue;
                }
                let offset = (idx as u64 * stride) as wgpu::DynamicOffset;
                render_pass.set_pipeline(shader);
                render_pass.set_bind_group(0, &self.uniform_bind_group, &[offset]);
                render_pass.set_vertex_buffer(0, geometry.vertex.slice(..));
                match &geometry.index {
                    Some(index) => {
                        render_pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint32);
                        render_pass.draw_indexed(0..geometry.element_count, 0, 0..1);
                    }
                    None => render_pass.draw(0..geometry.element_count, 0..1),
                }
            }
        }

        self.queue.submit(iter::once(encoder.finish()));
        self.window.pre_present_notify();
        output.present();
        self.window.request_redraw();
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

