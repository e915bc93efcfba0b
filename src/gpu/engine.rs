use anyhow::Context as _;
use futures::executor::block_on;

use av_pipe::frame::PlanarFrame;

use crate::context::{EventSender, PipelineEvent};

use super::CapturedFrame;
use super::pool::{TexturePool, TextureRole};

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ResizeParams {
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
}

struct PresentSurface {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    blit: wgpu::RenderPipeline,
    sampler: wgpu::Sampler,
}

/// GPU side of the hub: converts decoded NV12 to RGB, scales captured
/// desktop frames, presents to an optionally attached surface and reads
/// scaled frames back for the network payload.
///
/// Every texture lives in a role-keyed pool, so steady-state frames reuse
/// the previous allocation and a geometry change swaps exactly the slots
/// it touches.
pub struct GpuEngine {
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    nv12_pipeline: wgpu::ComputePipeline,
    resize_pipeline: wgpu::ComputePipeline,
    resize_params: wgpu::Buffer,
    pool: TexturePool,
    staging: Option<wgpu::Buffer>,
    staging_size: u64,
    upload: Vec<u8>,
    surface: Option<PresentSurface>,
    events: EventSender,
    resize_dispatches: u64,
}

impl GpuEngine {
    pub fn new(events: EventSender) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or_else(|| anyhow::anyhow!("no compatible graphics adapter"))?;
        let info = adapter.get_info();
        log::info!("graphics adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("cast-hub"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .context("request graphics device")?;

        let nv12_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("nv12_to_rgb"),
            source: wgpu::ShaderSource::Wgsl(include_str!("nv12_to_rgb.wgsl").into()),
        });
        let nv12_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("nv12_to_rgb"),
            layout: None,
            module: &nv12_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let resize_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("resize"),
            source: wgpu::ShaderSource::Wgsl(include_str!("resize.wgsl").into()),
        });
        let resize_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("resize"),
            layout: None,
            module: &resize_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let resize_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("resize params"),
            size: std::mem::size_of::<ResizeParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            nv12_pipeline,
            resize_pipeline,
            resize_params,
            pool: TexturePool::new(),
            staging: None,
            staging_size: 0,
            upload: Vec::new(),
            surface: None,
            events,
            resize_dispatches: 0,
        })
    }

    /// Attaches a window surface for preview presentation. The surface is
    /// reconfigured to the content size as frames arrive.
    pub fn attach_surface(
        &mut self,
        target: wgpu::SurfaceTarget<'static>,
        width: u32,
        height: u32,
    ) -> anyhow::Result<()> {
        let surface = self
            .instance
            .create_surface(target)
            .context("create presentation surface")?;
        let caps = surface.get_capabilities(&self.adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .context("adapter cannot present to this surface")?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::AutoNoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&self.device, &config);

        let blit_shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit"),
            source: wgpu::ShaderSource::Wgsl(include_str!("blit.wgsl").into()),
        });
        let blit = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("blit"),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &blit_shader,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &blit_shader,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blit sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        self.surface = Some(PresentSurface {
            surface,
            config,
            blit,
            sampler,
        });
        Ok(())
    }

    pub fn detach_surface(&mut self) {
        self.surface = None;
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    /// Drops all pooled textures, called between pipeline runs.
    pub fn release_textures(&mut self) {
        self.pool.clear();
    }

    pub fn pool(&self) -> &TexturePool {
        &self.pool
    }

    /// Resize compute dispatches so far. Stays flat while source and
    /// target geometry match, since that path is a plain texture copy.
    pub fn resize_dispatches(&self) -> u64 {
        self.resize_dispatches
    }

    /// Decode path: upload NV12 planes, run the conversion kernel into the
    /// Present slot and blit it to the surface. Without a surface there is
    /// nothing to show, so the whole path is skipped.
    pub fn render_decoded(&mut self, frame: &PlanarFrame) -> anyhow::Result<()> {
        if self.surface.is_none() {
            return Ok(());
        }
        self.convert_nv12(frame)?;
        self.present_from(TextureRole::Present, frame.width, frame.height)
    }

    /// Runs the NV12 conversion kernel into the Present slot.
    fn convert_nv12(&mut self, frame: &PlanarFrame) -> anyhow::Result<()> {
        let (width, height) = (frame.width, frame.height);
        anyhow::ensure!(width > 0 && height > 0, "empty decoded frame");
        let (cw, ch) = (frame.chroma_width(), frame.chroma_height());
        anyhow::ensure!(
            frame.y_stride >= width as usize && frame.uv_stride >= cw as usize * 2,
            "plane stride smaller than a pixel row"
        );

        self.pool.ensure(
            &self.device,
            TextureRole::WorkLuma,
            width,
            height,
            wgpu::TextureFormat::R8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        self.pool.ensure(
            &self.device,
            TextureRole::WorkChroma,
            cw,
            ch,
            wgpu::TextureFormat::Rg8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        );
        self.pool.ensure(
            &self.device,
            TextureRole::Present,
            width,
            height,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        );

        {
            let luma = self.pool.get(TextureRole::WorkLuma).context("luma slot")?;
            let chroma = self.pool.get(TextureRole::WorkChroma).context("chroma slot")?;
            let present = self.pool.get(TextureRole::Present).context("present slot")?;

            self.queue.write_texture(
                luma.texture.as_image_copy(),
                &frame.y,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(frame.y_stride as u32),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
            self.queue.write_texture(
                chroma.texture.as_image_copy(),
                &frame.uv,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(frame.uv_stride as u32),
                    rows_per_image: Some(ch),
                },
                wgpu::Extent3d {
                    width: cw,
                    height: ch,
                    depth_or_array_layers: 1,
                },
            );

            let luma_view = luma.texture.create_view(&Default::default());
            let chroma_view = chroma.texture.create_view(&Default::default());
            let present_view = present.texture.create_view(&Default::default());
            let bind = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("nv12_to_rgb"),
                layout: &self.nv12_pipeline.get_bind_group_layout(0),
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&luma_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&chroma_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&present_view),
                    },
                ],
            });

            let mut encoder = self.device.create_command_encoder(&Default::default());
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("nv12_to_rgb"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.nv12_pipeline);
                pass.set_bind_group(0, &bind, &[]);
                pass.dispatch_workgroups(width.div_ceil(8), height.div_ceil(8), 1);
            }
            self.queue.submit(Some(encoder.finish()));
        }

        Ok(())
    }

    /// Capture path: upload the BGRA frame (swizzled to RGBA), scale it to
    /// the target size (plain copy when dimensions already match), present
    /// when requested and return the packed RGB payload when `pack` is set.
    pub fn process_captured(
        &mut self,
        frame: &CapturedFrame<'_>,
        target_width: u32,
        target_height: u32,
        preview: bool,
        pack: bool,
    ) -> anyhow::Result<Option<Vec<u8>>> {
        let (sw, sh) = (frame.width, frame.height);
        anyhow::ensure!(sw > 0 && sh > 0, "empty captured frame");
        anyhow::ensure!(target_width > 0 && target_height > 0, "empty capture target");

        let row_bytes = sw as usize * 4;
        self.upload.clear();
        self.upload.reserve(row_bytes * sh as usize);
        for row in 0..sh as usize {
            let start = row * frame.stride;
            let src = frame
                .data
                .get(start..start + row_bytes)
                .context("captured frame shorter than its geometry")?;
            for px in src.chunks_exact(4) {
                self.upload.extend_from_slice(&[px[2], px[1], px[0], 0xff]);
            }
        }

        self.pool.ensure(
            &self.device,
            TextureRole::CaptureCopy,
            sw,
            sh,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
        );
        self.pool.ensure(
            &self.device,
            TextureRole::Scaled,
            target_width,
            target_height,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
        );

        {
            let capture = self
                .pool
                .get(TextureRole::CaptureCopy)
                .context("capture slot")?;
            let scaled = self.pool.get(TextureRole::Scaled).context("scaled slot")?;

            self.queue.write_texture(
                capture.texture.as_image_copy(),
                &self.upload,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(row_bytes as u32),
                    rows_per_image: Some(sh),
                },
                wgpu::Extent3d {
                    width: sw,
                    height: sh,
                    depth_or_array_layers: 1,
                },
            );

            let mut encoder = self.device.create_command_encoder(&Default::default());
            if sw == target_width && sh == target_height {
                encoder.copy_texture_to_texture(
                    capture.texture.as_image_copy(),
                    scaled.texture.as_image_copy(),
                    wgpu::Extent3d {
                        width: sw,
                        height: sh,
                        depth_or_array_layers: 1,
                    },
                );
            } else {
                self.queue.write_buffer(
                    &self.resize_params,
                    0,
                    bytemuck::bytes_of(&ResizeParams {
                        src_w: sw,
                        src_h: sh,
                        dst_w: target_width,
                        dst_h: target_height,
                    }),
                );
                let src_view = capture.texture.create_view(&Default::default());
                let dst_view = scaled.texture.create_view(&Default::default());
                let bind = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("resize"),
                    layout: &self.resize_pipeline.get_bind_group_layout(0),
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&src_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&dst_view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: self.resize_params.as_entire_binding(),
                        },
                    ],
                });
                {
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some("resize"),
                        timestamp_writes: None,
                    });
                    pass.set_pipeline(&self.resize_pipeline);
                    pass.set_bind_group(0, &bind, &[]);
                    pass.dispatch_workgroups(
                        target_width.div_ceil(16),
                        target_height.div_ceil(16),
                        1,
                    );
                }
                self.resize_dispatches += 1;
            }
            self.queue.submit(Some(encoder.finish()));
        }

        if preview {
            self.present_from(TextureRole::Scaled, target_width, target_height)?;
        }
        if pack {
            return Ok(Some(self.read_rgb(TextureRole::Scaled)?));
        }
        Ok(None)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        let Some(ps) = self.surface.as_mut() else {
            return;
        };
        if ps.config.width == width && ps.config.height == height {
            return;
        }
        ps.config.width = width.max(1);
        ps.config.height = height.max(1);
        ps.surface.configure(&self.device, &ps.config);
        let _ = self
            .events
            .send(PipelineEvent::ContentResized { width, height });
    }

    fn present_from(&mut self, role: TextureRole, width: u32, height: u32) -> anyhow::Result<()> {
        if self.surface.is_none() {
            return Ok(());
        }
        self.resize_surface(width, height);
        let Some(ps) = self.surface.as_ref() else {
            return Ok(());
        };
        let slot = self.pool.get(role).context("present source slot")?;

        let frame = match ps.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                ps.surface.configure(&self.device, &ps.config);
                match ps.surface.get_current_texture() {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("surface unavailable after reconfigure: {:?}", e);
                        return Ok(());
                    }
                }
            }
            Err(wgpu::SurfaceError::Timeout) => return Ok(()),
            Err(e) => anyhow::bail!("acquire surface frame: {:?}", e),
        };

        let target = frame.texture.create_view(&Default::default());
        let src_view = slot.texture.create_view(&Default::default());
        let bind = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit"),
            layout: &ps.blit.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&src_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&ps.sampler),
                },
            ],
        });

        let mut encoder = self.device.create_command_encoder(&Default::default());
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&ps.blit);
            pass.set_bind_group(0, &bind, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }

    /// Reads a pooled texture back as tightly packed RGBA rows.
    fn read_rgba(&mut self, role: TextureRole) -> anyhow::Result<(Vec<u8>, u32, u32)> {
        let slot = self.pool.get(role).context("readback slot")?;
        let (width, height) = (slot.width, slot.height);
        let row_bytes = width as usize * 4;
        let padded = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize);
        let size = (padded * height as usize) as u64;

        if self.staging_size < size {
            self.staging = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
            self.staging_size = size;
        }
        let staging = self.staging.as_ref().context("staging buffer")?;

        let mut encoder = self.device.create_command_encoder(&Default::default());
        encoder.copy_texture_to_buffer(
            slot.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(0..size);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .context("map callback dropped")?
            .context("map staging buffer")?;

        let mut out = Vec::with_capacity(row_bytes * height as usize);
        {
            let data = slice.get_mapped_range();
            for row in 0..height as usize {
                let start = row * padded;
                out.extend_from_slice(&data[start..start + row_bytes]);
            }
        }
        staging.unmap();
        Ok((out, width, height))
    }

    fn read_rgb(&mut self, role: TextureRole) -> anyhow::Result<Vec<u8>> {
        let (rgba, _, _) = self.read_rgba(role)?;
        Ok(pack_rgb(&rgba))
    }
}

/// Drops the alpha channel, producing the RGB24 wire layout.
pub fn pack_rgb(rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        out.extend_from_slice(&px[..3]);
    }
    out
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
