use std::collections::HashMap;

use anyhow::{bail, ensure, Result};
use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::backend::{FrameParams, LayerUniforms, RenderBackend, TextureId, TextureParams};
use crate::layer::{Blending, Interpolation};

/// wgpu implementation of [`RenderBackend`].
///
/// Blend function and color write mask are pipeline state under wgpu, so
/// the backend keeps one render pipeline per `(blending, mask)` combination,
/// created on first use. Per-layer shader inputs travel as one instance per
/// draw in a shared instance buffer. Draws are recorded during the frame and
/// replayed into a single render pass by [`flush`](Self::flush).
///
/// All methods must be called from the thread that owns the GPU context.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    target_format: wgpu::TextureFormat,

    shader: wgpu::ShaderModule,
    texture_bgl: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    frame_ubo: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    quad_vbo: wgpu::Buffer,
    quad_ibo: wgpu::Buffer,

    instance_vbo: Option<wgpu::Buffer>,
    instance_capacity: usize,

    textures: Vec<TextureEntry>,

    // Frame recording state.
    frame: Option<FrameParams>,
    blending: Blending,
    color_mask: [bool; 4],
    instances: Vec<LayerInstance>,
    draws: Vec<DrawOp>,
}

impl WgpuBackend {
    /// Creates the backend for a given surface format.
    ///
    /// Compiles the layer shader and allocates the shared quad geometry and
    /// frame uniform. Shader or resource validation failures surface through
    /// the device's error handler before any frame is rendered.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, target_format: wgpu::TextureFormat) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("tiamat layer shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/layer.wgsl").into()),
        });

        let frame_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tiamat frame bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: Some(frame_ubo_min_binding_size()),
                },
                count: None,
            }],
        });

        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tiamat layer texture bgl"),
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
            label: Some("tiamat layer pipeline layout"),
            bind_group_layouts: &[&frame_bgl, &texture_bgl],
            immediate_size: 0,
        });

        let frame_ubo = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tiamat frame ubo"),
            size: std::mem::size_of::<FrameUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tiamat frame bind group"),
            layout: &frame_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_ubo.as_entire_binding(),
            }],
        });

        let quad_vbo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("tiamat quad vbo"),
            contents: bytemuck::cast_slice(&QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let quad_ibo = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("tiamat quad ibo"),
            contents: bytemuck::cast_slice(&QUAD_INDICES),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            device,
            queue,
            target_format,
            shader,
            texture_bgl,
            pipeline_layout,
            pipelines: HashMap::new(),
            frame_ubo,
            frame_bind_group,
            quad_vbo,
            quad_ibo,
            instance_vbo: None,
            instance_capacity: 0,
            textures: Vec::new(),
            frame: None,
            blending: Blending::None,
            color_mask: [true; 4],
            instances: Vec::new(),
            draws: Vec::new(),
        }
    }

    /// Replays the recorded frame into one render pass on `encoder`.
    ///
    /// Clears with the frame's color, applies its viewport rectangle, and
    /// issues one instanced indexed draw per recorded layer, switching
    /// pipelines as the blend/mask state changes.
    pub fn flush(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) -> Result<()> {
        let Some(frame) = self.frame.take() else {
            bail!("flush called without a recorded frame");
        };

        self.queue.write_buffer(
            &self.frame_ubo,
            0,
            bytemuck::bytes_of(&FrameUniform {
                model: frame.model.0,
                projection: frame.projection.0,
            }),
        );

        if !self.instances.is_empty() {
            self.ensure_instance_capacity(self.instances.len());
            if let Some(instance_vbo) = self.instance_vbo.as_ref() {
                self.queue
                    .write_buffer(instance_vbo, 0, bytemuck::cast_slice(&self.instances));
            }
        }

        // Pipelines must exist before the pass borrows the encoder.
        for op in &self.draws {
            if !self.pipelines.contains_key(&op.key) {
                let pipeline = create_layer_pipeline(
                    &self.device,
                    &self.shader,
                    &self.pipeline_layout,
                    self.target_format,
                    op.key,
                );
                self.pipelines.insert(op.key, pipeline);
            }
        }

        let [r, g, b, a] = frame.clear_color;
        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("tiamat layer pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: f64::from(r),
                        g: f64::from(g),
                        b: f64::from(b),
                        a: f64::from(a),
                    }),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });

        if frame.viewport.is_valid() {
            rpass.set_viewport(
                frame.viewport.x,
                frame.viewport.y,
                frame.viewport.width,
                frame.viewport.height,
                0.0,
                1.0,
            );
        }

        if let Some(instance_vbo) = self.instance_vbo.as_ref().filter(|_| !self.draws.is_empty()) {
            rpass.set_bind_group(0, &self.frame_bind_group, &[]);
            rpass.set_vertex_buffer(0, self.quad_vbo.slice(..));
            rpass.set_vertex_buffer(1, instance_vbo.slice(..));
            rpass.set_index_buffer(self.quad_ibo.slice(..), wgpu::IndexFormat::Uint16);

            for (i, op) in self.draws.iter().enumerate() {
                let Some(pipeline) = self.pipelines.get(&op.key) else { continue };
                let Some(entry) = self.textures.get(op.texture.0 as usize) else { continue };
                let Some(bind_group) = entry.bind_group.as_ref() else { continue };

                rpass.set_pipeline(pipeline);
                rpass.set_bind_group(1, bind_group, &[]);
                rpass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, i as u32..i as u32 + 1);
            }
        }

        drop(rpass);
        self.instances.clear();
        self.draws.clear();
        Ok(())
    }

    fn ensure_instance_capacity(&mut self, required: usize) {
        if required <= self.instance_capacity && self.instance_vbo.is_some() {
            return;
        }

        let new_cap = required.next_power_of_two().max(16);
        self.instance_vbo = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tiamat layer instance vbo"),
            size: (new_cap * std::mem::size_of::<LayerInstance>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        self.instance_capacity = new_cap;
    }

    fn rebuild_texture_binding(&mut self, index: usize, params: &TextureParams) {
        let entry = &mut self.textures[index];

        let address_mode = if params.periodic {
            wgpu::AddressMode::Repeat
        } else {
            // Arbitrary border colors are not expressible on wgpu samplers;
            // the shader substitutes the border color outside [0, 1].
            wgpu::AddressMode::ClampToEdge
        };
        let filter = match params.interpolation {
            Interpolation::Linear => wgpu::FilterMode::Linear,
            Interpolation::Nearest => wgpu::FilterMode::Nearest,
        };

        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("tiamat layer sampler"),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        entry.bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tiamat layer texture bind group"),
            layout: &self.texture_bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&entry.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        }));
        entry.params = Some(*params);
    }
}

impl RenderBackend for WgpuBackend {
    fn create_texture(&mut self, size: (u32, u32)) -> Result<TextureId> {
        ensure!(size.0 > 0 && size.1 > 0, "zero-size texture ({}x{})", size.0, size.1);

        let texture = create_texture_object(&self.device, size);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = TextureId(self.textures.len() as u64);
        self.textures.push(TextureEntry {
            texture,
            view,
            bind_group: None,
            size,
            params: None,
        });
        Ok(id)
    }

    fn upload_texture(
        &mut self,
        id: TextureId,
        pixels: &[u8],
        size: (u32, u32),
        params: &TextureParams,
    ) -> Result<()> {
        let index = id.0 as usize;
        ensure!(index < self.textures.len(), "unknown texture {id:?}");
        let (w, h) = size;
        ensure!(
            pixels.len() as u64 == u64::from(w) * u64::from(h) * 4,
            "{} pixel bytes for a {w}x{h} RGBA upload",
            pixels.len(),
        );

        // Dynamic layers may change dimensions between frames; the handle
        // stays stable while the underlying texture object is swapped.
        if self.textures[index].size != size {
            let texture = create_texture_object(&self.device, size);
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let entry = &mut self.textures[index];
            entry.texture = texture;
            entry.view = view;
            entry.size = size;
            entry.bind_group = None;
            entry.params = None;
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.textures[index].texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * w),
                rows_per_image: Some(h),
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );

        if self.textures[index].params != Some(*params) || self.textures[index].bind_group.is_none()
        {
            self.rebuild_texture_binding(index, params);
        }
        Ok(())
    }

    fn begin_frame(&mut self, params: &FrameParams) -> Result<()> {
        self.frame = Some(*params);
        self.blending = Blending::None;
        self.color_mask = [true; 4];
        self.instances.clear();
        self.draws.clear();
        Ok(())
    }

    fn set_blend(&mut self, blending: Blending) {
        self.blending = blending;
    }

    fn set_color_mask(&mut self, mask: [bool; 4]) {
        self.color_mask = mask;
    }

    fn draw_quad(&mut self, texture: TextureId, uniforms: &LayerUniforms) -> Result<()> {
        ensure!(self.frame.is_some(), "draw_quad outside begin_frame/end_frame");
        let entry = self
            .textures
            .get(texture.0 as usize)
            .ok_or_else(|| anyhow::anyhow!("unknown texture {texture:?}"))?;
        let Some(params) = entry.params else {
            bail!("texture {texture:?} was never uploaded");
        };

        let mut flags = 0u32;
        if params.periodic {
            flags |= INSTANCE_FLAG_PERIODIC;
        }

        self.instances.push(LayerInstance {
            view: uniforms.view.0,
            min_color: uniforms.min_color,
            max_color: uniforms.max_color,
            border_color: params.border_color,
            tex_size: uniforms.tex_size,
            tex_offset: uniforms.tex_offset,
            tex_angle: uniforms.tex_angle,
            flags,
            _pad: [0.0; 2],
        });
        self.draws.push(DrawOp {
            texture,
            key: PipelineKey {
                blending: self.blending,
                mask: self.color_mask,
            },
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        ensure!(self.frame.is_some(), "end_frame without begin_frame");
        Ok(())
    }
}

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    bind_group: Option<wgpu::BindGroup>,
    size: (u32, u32),
    params: Option<TextureParams>,
}

struct DrawOp {
    texture: TextureId,
    key: PipelineKey,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    blending: Blending,
    mask: [bool; 4],
}

fn create_texture_object(device: &wgpu::Device, size: (u32, u32)) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("tiamat layer texture"),
        size: wgpu::Extent3d {
            width: size.0,
            height: size.1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        // Bytes normalize to [0, 1] floats on sample, matching a
        // normalize-then-upload of the same data.
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

fn create_layer_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    format: wgpu::TextureFormat,
    key: PipelineKey,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("tiamat layer pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[QuadVertex::layout(), LayerInstance::layout()],
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(blend_state(key.blending)),
                write_mask: color_writes(key.mask),
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

/// Maps a layer blend mode to its factor pair, applied to color and alpha
/// alike.
fn blend_state(blending: Blending) -> wgpu::BlendState {
    use wgpu::BlendFactor as F;
    let (src_factor, dst_factor) = match blending {
        Blending::Source => (F::SrcAlpha, F::OneMinusSrcAlpha),
        Blending::Destination => (F::DstAlpha, F::OneMinusDstAlpha),
        Blending::InverseSource => (F::OneMinusSrcAlpha, F::SrcAlpha),
        Blending::None => (F::One, F::Zero),
    };
    let component = wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

fn color_writes(mask: [bool; 4]) -> wgpu::ColorWrites {
    let mut writes = wgpu::ColorWrites::empty();
    if mask[0] {
        writes |= wgpu::ColorWrites::RED;
    }
    if mask[1] {
        writes |= wgpu::ColorWrites::GREEN;
    }
    if mask[2] {
        writes |= wgpu::ColorWrites::BLUE;
    }
    if mask[3] {
        writes |= wgpu::ColorWrites::ALPHA;
    }
    writes
}

fn frame_ubo_min_binding_size() -> std::num::NonZeroU64 {
    std::num::NonZeroU64::new(std::mem::size_of::<FrameUniform>() as u64)
        .expect("FrameUniform has non-zero size by construction")
}

// ── shared geometry ───────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct QuadVertex {
    pos: [f32; 3],
    uv: [f32; 2],
}

impl QuadVertex {
    const ATTRS: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

/// Unit quad in design units, UVs flipped so texture row 0 lands at the top
/// of the drawn rectangle.
const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { pos: [-1.0, 0.5, 0.0], uv: [0.0, 1.0] },
    QuadVertex { pos: [1.0, 0.5, 0.0], uv: [1.0, 1.0] },
    QuadVertex { pos: [1.0, -0.5, 0.0], uv: [1.0, 0.0] },
    QuadVertex { pos: [-1.0, -0.5, 0.0], uv: [0.0, 0.0] },
];

const QUAD_INDICES: [u16; 6] = [2, 1, 0, 0, 3, 2];

// ── per-frame GPU structs ─────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct FrameUniform {
    model: [f32; 16],
    projection: [f32; 16],
}

const INSTANCE_FLAG_PERIODIC: u32 = 1;

/// One instance per layer draw.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct LayerInstance {
    view: [f32; 16],
    min_color: [f32; 4],
    max_color: [f32; 4],
    border_color: [f32; 4],
    tex_size: [f32; 2],
    tex_offset: [f32; 2],
    tex_angle: f32,
    flags: u32,
    _pad: [f32; 2],
}

impl LayerInstance {
    const ATTRS: [wgpu::VertexAttribute; 11] = wgpu::vertex_attr_array![
        2 => Float32x4,  // view column 0
        3 => Float32x4,  // view column 1
        4 => Float32x4,  // view column 2
        5 => Float32x4,  // view column 3
        6 => Float32x4,  // min_color
        7 => Float32x4,  // max_color
        8 => Float32x4,  // border_color
        9 => Float32x2,  // tex_size
        10 => Float32x2, // tex_offset
        11 => Float32,   // tex_angle
        12 => Uint32     // flags
    ];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<LayerInstance>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::BlendFactor as F;

    // ── blend mapping ─────────────────────────────────────────────────────

    #[test]
    fn blend_factor_pairs_are_exact() {
        let cases = [
            (Blending::Source, F::SrcAlpha, F::OneMinusSrcAlpha),
            (Blending::Destination, F::DstAlpha, F::OneMinusDstAlpha),
            (Blending::InverseSource, F::OneMinusSrcAlpha, F::SrcAlpha),
            (Blending::None, F::One, F::Zero),
        ];
        for (blending, src, dst) in cases {
            let state = blend_state(blending);
            assert_eq!(state.color.src_factor, src, "{blending:?} src");
            assert_eq!(state.color.dst_factor, dst, "{blending:?} dst");
            assert_eq!(state.color.operation, wgpu::BlendOperation::Add);
            // The pair applies to the alpha channel as well.
            assert_eq!(state.alpha, state.color);
        }
    }

    // ── color mask mapping ────────────────────────────────────────────────

    #[test]
    fn color_mask_maps_per_channel() {
        assert_eq!(color_writes([true; 4]), wgpu::ColorWrites::ALL);
        assert_eq!(color_writes([false; 4]), wgpu::ColorWrites::empty());
        assert_eq!(
            color_writes([false, false, false, true]),
            wgpu::ColorWrites::ALPHA
        );
        assert_eq!(
            color_writes([true, false, true, false]),
            wgpu::ColorWrites::RED | wgpu::ColorWrites::BLUE
        );
    }

    // ── geometry constants ────────────────────────────────────────────────

    #[test]
    fn quad_uses_the_shared_mesh_constants() {
        assert_eq!(QUAD_VERTICES[0].pos, [-1.0, 0.5, 0.0]);
        assert_eq!(QUAD_VERTICES[2].pos, [1.0, -0.5, 0.0]);
        assert_eq!(QUAD_VERTICES[0].uv, [0.0, 1.0]);
        assert_eq!(QUAD_VERTICES[3].uv, [0.0, 0.0]);
        assert_eq!(QUAD_INDICES, [2, 1, 0, 0, 3, 2]);
    }

    #[test]
    fn instance_layout_matches_struct_stride() {
        let layout = LayerInstance::layout();
        assert_eq!(layout.array_stride as usize, std::mem::size_of::<LayerInstance>());
        // Last attribute (+ its size) must fit inside the stride.
        let last = LayerInstance::ATTRS.last().unwrap();
        assert!(last.offset + 4 <= layout.array_stride);
    }
}
