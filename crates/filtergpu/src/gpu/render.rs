use wgpu::util::DeviceExt;

use crate::device::{Device, TextureFormat, TextureLayout};
use crate::error::{FilterError, ShaderStageKind};
use crate::pixels::ImageRef;
use crate::program::{AttributeKind, TranslatedProgram};
use crate::types::{OutputEncoding, TargetSpec};

use super::compile::{create_modules, parse_program};
use super::context::GpuContext;

/// Unit-square quad as two triangles; each corner is `vec4(x, y, 0, 1)`.
const QUAD: [[f32; 4]; 6] = [
    [0.0, 0.0, 0.0, 1.0],
    [1.0, 0.0, 0.0, 1.0],
    [0.0, 1.0, 0.0, 1.0],
    [0.0, 1.0, 0.0, 1.0],
    [1.0, 0.0, 0.0, 1.0],
    [1.0, 1.0, 0.0, 1.0],
];
const QUAD_STRIDE: u64 = std::mem::size_of::<[f32; 4]>() as u64;

struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    spec: TargetSpec,
}

struct SourceTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    layout: TextureLayout,
}

/// Render pipeline plus the uniform buffer sized for its block.
pub struct WgpuProgram {
    pipeline: wgpu::RenderPipeline,
    uniforms: wgpu::Buffer,
}

/// [`Device`] backed by a headless wgpu context.
pub struct WgpuDevice {
    target: Option<RenderTarget>,
    source: Option<SourceTexture>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    quad: wgpu::Buffer,
    context: GpuContext,
}

impl WgpuDevice {
    pub(crate) fn new(context: GpuContext) -> Self {
        let device = &context.device;
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("filter bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("filter pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("filter source sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("filter quad"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Self {
            target: None,
            source: None,
            bind_group_layout,
            pipeline_layout,
            sampler,
            quad,
            context,
        }
    }

    fn check_extent(&self, width: u32, height: u32) -> Result<(), String> {
        let max = self.context.max_dimension;
        if width > max || height > max {
            return Err(format!(
                "GPU max texture dimension is {max}, requested {width}x{height}"
            ));
        }
        Ok(())
    }
}

fn target_format(encoding: OutputEncoding) -> wgpu::TextureFormat {
    match encoding {
        OutputEncoding::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        // Packed by the fragment wrapper, so the copy out is bit-exact.
        OutputEncoding::Rgb565 => wgpu::TextureFormat::R16Uint,
    }
}

fn vertex_format(kind: AttributeKind) -> wgpu::VertexFormat {
    match kind {
        AttributeKind::Vec2 => wgpu::VertexFormat::Float32x2,
        AttributeKind::Vec3 => wgpu::VertexFormat::Float32x3,
        AttributeKind::Vec4 => wgpu::VertexFormat::Float32x4,
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

impl Device for WgpuDevice {
    type Program = WgpuProgram;

    fn make_current(&mut self) -> Result<(), FilterError> {
        // wgpu-hal binds its GL context around every call it makes, so any
        // thread holding the device may drive it.
        Ok(())
    }

    fn allocate_target(&mut self, spec: TargetSpec) -> Result<(), FilterError> {
        self.check_extent(spec.width, spec.height)
            .map_err(FilterError::Initialization)?;
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("filter render target"),
            size: extent(spec.width, spec.height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: target_format(spec.encoding),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.target = Some(RenderTarget {
            texture,
            view,
            spec,
        });
        Ok(())
    }

    fn allocate_texture(&mut self, layout: TextureLayout) -> Result<(), FilterError> {
        self.check_extent(layout.width, layout.height)
            .map_err(FilterError::Device)?;
        let format = match layout.format {
            TextureFormat::Luminance => wgpu::TextureFormat::R8Unorm,
            TextureFormat::Rgba => wgpu::TextureFormat::Rgba8Unorm,
        };
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("filter source"),
            size: extent(layout.width, layout.height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.source = Some(SourceTexture {
            texture,
            view,
            layout,
        });
        Ok(())
    }

    fn write_texture(&mut self, image: &ImageRef<'_>) -> Result<(), FilterError> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| FilterError::Device("source texture not allocated".into()))?;
        let layout = source.layout;
        self.context.queue.write_texture(
            source.texture.as_image_copy(),
            image.data(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(layout.width * layout.format.bytes_per_pixel() as u32),
                rows_per_image: Some(layout.height),
            },
            extent(layout.width, layout.height),
        );
        Ok(())
    }

    fn build_program(&mut self, program: &TranslatedProgram) -> Result<WgpuProgram, FilterError> {
        let modules = parse_program(program)?;
        let device = &self.context.device;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let (vertex_module, fragment_module) = create_modules(device, modules);

        let attributes = [wgpu::VertexAttribute {
            format: vertex_format(program.attribute.unwrap_or(AttributeKind::Vec4)),
            offset: 0,
            shader_location: 0,
        }];
        let buffers: Vec<wgpu::VertexBufferLayout> = program
            .attribute
            .iter()
            .map(|_| wgpu::VertexBufferLayout {
                array_stride: QUAD_STRIDE,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            })
            .collect();

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("filter pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: Some("main"),
                buffers: &buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
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
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format(program.encoding),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });

        let uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("filter uniforms"),
            size: program.layout.size() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(FilterError::compile(ShaderStageKind::Link, error.to_string()));
        }
        tracing::debug!(
            uniform_bytes = program.layout.size(),
            encoding = %program.encoding,
            "filter pipeline built"
        );
        Ok(WgpuProgram { pipeline, uniforms })
    }

    fn draw(&mut self, program: &WgpuProgram, uniforms: &[u8]) -> Result<(), FilterError> {
        let (Some(target), Some(source)) = (&self.target, &self.source) else {
            return Err(FilterError::Device("draw before allocation".into()));
        };
        let device = &self.context.device;
        let queue = &self.context.queue;

        queue.write_buffer(&program.uniforms, 0, uniforms);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("filter bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: program.uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("filter pass"),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("filter pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_pipeline(&program.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.set_vertex_buffer(0, self.quad.slice(..));
            render_pass.set_viewport(
                0.0,
                0.0,
                target.spec.width as f32,
                target.spec.height as f32,
                0.0,
                1.0,
            );
            render_pass.draw(0..QUAD.len() as u32, 0..1);
        }
        queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_back(&mut self, dst: &mut [u8]) -> Result<(), FilterError> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| FilterError::Device("render target not allocated".into()))?;
        let device = &self.context.device;
        let TargetSpec {
            width,
            height,
            encoding,
        } = target.spec;

        let row_bytes = width * encoding.bytes_per_pixel() as u32;
        let padded_row_bytes = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("filter read-back"),
            size: u64::from(padded_row_bytes) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("filter read-back"),
        });
        encoder.copy_texture_to_buffer(
            target.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            extent(width, height),
        );
        self.context.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| FilterError::Device(format!("waiting for read-back failed: {err}")))?;
        rx.recv()
            .map_err(|_| FilterError::Device("read-back map callback never fired".into()))?
            .map_err(|err| FilterError::Device(format!("read-back mapping failed: {err}")))?;

        {
            let mapped = slice.get_mapped_range();
            let row_bytes = row_bytes as usize;
            for (row, out) in dst.chunks_exact_mut(row_bytes).enumerate() {
                let start = row * padded_row_bytes as usize;
                out.copy_from_slice(&mapped[start..start + row_bytes]);
            }
        }
        readback.unmap();
        Ok(())
    }

    fn begin_error_check(&mut self) {
        self.context
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);
    }

    fn end_error_check(&mut self) -> Option<String> {
        pollster::block_on(self.context.device.pop_error_scope()).map(|error| error.to_string())
    }
}
