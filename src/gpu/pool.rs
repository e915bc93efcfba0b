use std::collections::HashMap;

/// Named slots in the texture arena. Each role holds at most one texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureRole {
    /// Full-resolution luma plane of the frame being converted.
    WorkLuma,
    /// Half-resolution interleaved chroma plane.
    WorkChroma,
    /// Capture-path output at the configured target size.
    Scaled,
    /// Shader-readable copy of the captured desktop image.
    CaptureCopy,
    /// Decode-path RGB output, blitted to the surface when presenting.
    Present,
}

pub struct Slot {
    pub texture: wgpu::Texture,
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
}

/// Lazy texture cache keyed by role. `ensure` reallocates only when the
/// requested geometry or format differs from what the slot holds, so
/// steady-state frames allocate nothing.
pub struct TexturePool {
    slots: HashMap<TextureRole, Slot>,
    allocations: u64,
}

impl TexturePool {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            allocations: 0,
        }
    }

    pub fn ensure(
        &mut self,
        device: &wgpu::Device,
        role: TextureRole,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> &wgpu::Texture {
        let stale = match self.slots.get(&role) {
            Some(slot) => slot.width != width || slot.height != height || slot.format != format,
            None => true,
        };
        if stale {
            log::debug!("allocating {:?} texture {}x{} {:?}", role, width, height, format);
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&format!("{:?}", role)),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            });
            self.slots.insert(
                role,
                Slot {
                    texture,
                    width,
                    height,
                    format,
                },
            );
            self.allocations += 1;
        }
        &self.slots[&role].texture
    }

    pub fn get(&self, role: TextureRole) -> Option<&Slot> {
        self.slots.get(&role)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Total textures created so far, for allocation-behavior assertions.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}
