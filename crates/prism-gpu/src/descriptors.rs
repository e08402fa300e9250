//! Descriptor pool and descriptor set writes.

use crate::error::Result;
use ash::vk;

/// Per-type descriptor counts used to size the device descriptor pool.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorPoolCreation {
    pub samplers: u16,
    pub combined_image_samplers: u16,
    pub sampled_images: u16,
    pub storage_images: u16,
    pub uniform_buffers: u16,
    pub storage_buffers: u16,
    pub uniform_buffers_dynamic: u16,
    pub storage_buffers_dynamic: u16,
    pub max_sets: u16,
}

impl Default for DescriptorPoolCreation {
    fn default() -> Self {
        Self {
            samplers: 256,
            combined_image_samplers: 256,
            sampled_images: 256,
            storage_images: 256,
            uniform_buffers: 256,
            storage_buffers: 256,
            uniform_buffers_dynamic: 256,
            storage_buffers_dynamic: 256,
            max_sets: 1024,
        }
    }
}

impl DescriptorPoolCreation {
    fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        let entries = [
            (vk::DescriptorType::SAMPLER, self.samplers),
            (
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                self.combined_image_samplers,
            ),
            (vk::DescriptorType::SAMPLED_IMAGE, self.sampled_images),
            (vk::DescriptorType::STORAGE_IMAGE, self.storage_images),
            (vk::DescriptorType::UNIFORM_BUFFER, self.uniform_buffers),
            (vk::DescriptorType::STORAGE_BUFFER, self.storage_buffers),
            (
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                self.uniform_buffers_dynamic,
            ),
            (
                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
                self.storage_buffers_dynamic,
            ),
        ];

        entries
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|&(ty, count)| {
                vk::DescriptorPoolSize::default()
                    .ty(ty)
                    .descriptor_count(u32::from(count))
            })
            .collect()
    }
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create the pool from the per-type counts.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, creation: &DescriptorPoolCreation) -> Result<Self> {
        let pool_sizes = creation.pool_sizes();
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(u32::from(creation.max_sets))
            .pool_sizes(&pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = device.create_descriptor_pool(&create_info, None)?;
        Ok(Self { pool })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate one descriptor set.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = device.allocate_descriptor_sets(&alloc_info)?;
        Ok(sets[0])
    }

    /// Return a set to the pool.
    ///
    /// # Safety
    /// The device must be valid and the set must not be in use.
    pub unsafe fn free(&self, device: &ash::Device, set: vk::DescriptorSet) -> Result<()> {
        device.free_descriptor_sets(self.pool, &[set])?;
        Ok(())
    }

    /// Destroy the pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
    }
}

/// One resolved descriptor write.
///
/// Buffer and image info structs must outlive the `update_descriptor_sets`
/// call, so writes are gathered into this owned form first.
pub enum ResolvedWrite {
    Buffer {
        binding: u32,
        ty: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    Image {
        binding: u32,
        ty: vk::DescriptorType,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
}

/// Write a batch of resolved bindings into `set`.
///
/// # Safety
/// The device and every referenced native handle must be valid.
pub unsafe fn write_descriptor_set(
    device: &ash::Device,
    set: vk::DescriptorSet,
    writes: &[ResolvedWrite],
) {
    let mut buffer_infos = Vec::new();
    let mut image_infos = Vec::new();

    // Two passes: infos first so the slices stay stable while the write
    // structs borrow into them.
    for write in writes {
        match *write {
            ResolvedWrite::Buffer {
                buffer,
                offset,
                range,
                ..
            } => {
                buffer_infos.push(
                    vk::DescriptorBufferInfo::default()
                        .buffer(buffer)
                        .offset(offset)
                        .range(range),
                );
            }
            ResolvedWrite::Image {
                view,
                sampler,
                layout,
                ..
            } => {
                image_infos.push(
                    vk::DescriptorImageInfo::default()
                        .image_view(view)
                        .sampler(sampler)
                        .image_layout(layout),
                );
            }
        }
    }

    let mut vk_writes = Vec::with_capacity(writes.len());
    let mut buffer_cursor = 0;
    let mut image_cursor = 0;

    for write in writes {
        match *write {
            ResolvedWrite::Buffer { binding, ty, .. } => {
                vk_writes.push(
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(ty)
                        .buffer_info(std::slice::from_ref(&buffer_infos[buffer_cursor])),
                );
                buffer_cursor += 1;
            }
            ResolvedWrite::Image { binding, ty, .. } => {
                vk_writes.push(
                    vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(binding)
                        .descriptor_type(ty)
                        .image_info(std::slice::from_ref(&image_infos[image_cursor])),
                );
                image_cursor += 1;
            }
        }
    }

    device.update_descriptor_sets(&vk_writes, &[]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_skip_empty_types() {
        let creation = DescriptorPoolCreation {
            samplers: 0,
            storage_buffers_dynamic: 0,
            ..Default::default()
        };

        let sizes = creation.pool_sizes();
        assert_eq!(sizes.len(), 6);
        assert!(sizes
            .iter()
            .all(|s| s.ty != vk::DescriptorType::SAMPLER && s.descriptor_count > 0));
    }
}
