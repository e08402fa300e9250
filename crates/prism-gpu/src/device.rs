//! The GPU device façade.
//!
//! [`GpuDevice`] owns the native instance/device/queues, the swapchain, one
//! resource pool per resource kind, the per-frame synchronization
//! primitives, and the deferred destruction queue. All resource lifetimes
//! and the frame lifecycle flow through it. Pools and frame state are not
//! internally synchronized: the device expects a single submitting thread.

use crate::capabilities::GpuCapabilities;
use crate::command::CommandBuffer;
use crate::deferred::{DeferredResource, DestructionQueue};
use crate::descriptors::{write_descriptor_set, DescriptorPool, DescriptorPoolCreation, ResolvedWrite};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, debug_utils_available, select_physical_device};
use crate::memory::GpuAllocator;
use crate::pipeline;
use crate::profiler::{GpuTimestamp, GpuTimestampManager};
use crate::resource::*;
use crate::surface::SurfaceContext;
use crate::swapchain::{calculate_extent, select_present_mode, select_surface_format, Swapchain};
use crate::sync::FrameSyncManager;

use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use prism_core::ResourcePool;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

/// Upper bound on frame slots rotated by the device.
pub const MAX_FRAMES: u32 = 3;

/// Timeout for swapchain image acquisition.
const ACQUIRE_TIMEOUT_NS: u64 = 4_000_000_000;

const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Slot capacities for every resource pool. Pools never grow; size them
/// for the worst frame at startup.
#[derive(Debug, Clone, Copy)]
pub struct ResourcePoolCreation {
    pub buffers: u16,
    pub textures: u16,
    pub pipelines: u16,
    pub samplers: u16,
    pub descriptor_set_layouts: u16,
    pub descriptor_sets: u16,
    pub render_passes: u16,
    pub shader_states: u16,
}

impl Default for ResourcePoolCreation {
    fn default() -> Self {
        Self {
            buffers: 256,
            textures: 256,
            pipelines: 256,
            samplers: 256,
            descriptor_set_layouts: 256,
            descriptor_sets: 256,
            render_passes: 256,
            shader_states: 256,
        }
    }
}

/// Builder for creating a GPU device.
pub struct GpuDeviceBuilder {
    app_name: String,
    enable_validation: bool,
    enable_gpu_timestamps: bool,
    gpu_time_queries_per_frame: u16,
    present_mode: PresentMode,
    width: u16,
    height: u16,
    display_handle: Option<RawDisplayHandle>,
    window_handle: Option<RawWindowHandle>,
    resource_pools: ResourcePoolCreation,
    descriptor_pool: DescriptorPoolCreation,
    dynamic_per_frame_size: u32,
}

impl Default for GpuDeviceBuilder {
    fn default() -> Self {
        Self {
            app_name: "Prism".to_string(),
            enable_validation: cfg!(debug_assertions),
            enable_gpu_timestamps: false,
            gpu_time_queries_per_frame: 32,
            present_mode: PresentMode::Vsync,
            width: 1,
            height: 1,
            display_handle: None,
            window_handle: None,
            resource_pools: ResourcePoolCreation::default(),
            descriptor_pool: DescriptorPoolCreation::default(),
            dynamic_per_frame_size: 10 * 1024 * 1024,
        }
    }
}

impl GpuDeviceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Attach the window the device presents to.
    pub fn window(
        mut self,
        width: u16,
        height: u16,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Self {
        self.width = width;
        self.height = height;
        self.display_handle = Some(display);
        self.window_handle = Some(window);
        self
    }

    /// Enable GPU timestamp collection with a per-frame query budget.
    pub fn gpu_timestamps(mut self, queries_per_frame: u16) -> Self {
        self.enable_gpu_timestamps = true;
        self.gpu_time_queries_per_frame = queries_per_frame;
        self
    }

    /// Requested presentation pacing.
    pub fn present_mode(mut self, mode: PresentMode) -> Self {
        self.present_mode = mode;
        self
    }

    /// Override pool capacities.
    pub fn resource_pools(mut self, pools: ResourcePoolCreation) -> Self {
        self.resource_pools = pools;
        self
    }

    /// Override descriptor pool sizing.
    pub fn descriptor_pool(mut self, creation: DescriptorPoolCreation) -> Self {
        self.descriptor_pool = creation;
        self
    }

    /// Bytes of dynamic ring space reserved per frame in flight.
    pub fn dynamic_buffer_size(mut self, per_frame_size: u32) -> Self {
        self.dynamic_per_frame_size = per_frame_size;
        self
    }

    /// Build the device.
    pub fn build(self) -> Result<GpuDevice> {
        let display_handle = self.display_handle.ok_or_else(|| {
            GpuError::InvalidState("a window is required to build a device".to_string())
        })?;
        let window_handle = self.window_handle.ok_or_else(|| {
            GpuError::InvalidState("a window is required to build a device".to_string())
        })?;

        // Load Vulkan entry point
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let enable_debug_utils = unsafe { debug_utils_available(&entry) };

        let instance = unsafe {
            create_instance(
                &entry,
                &self.app_name,
                self.enable_validation,
                enable_debug_utils,
            )
        }?;

        let physical_device = unsafe { select_physical_device(&instance) }?;

        let capabilities =
            unsafe { GpuCapabilities::query(&instance, physical_device, enable_debug_utils) };

        if !capabilities.meets_requirements() {
            return Err(GpuError::NoSuitableDevice);
        }

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let queue_families = unsafe { find_queue_families(&instance, physical_device) }?;

        let (device, graphics_queue, compute_queue, transfer_queue) =
            unsafe { create_device(&instance, physical_device, &queue_families)? };

        let device = Arc::new(device);

        let debug_utils = if enable_debug_utils {
            Some(ash::ext::debug_utils::Device::new(&instance, &device))
        } else {
            None
        };

        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        let surface =
            unsafe { SurfaceContext::new(&entry, &instance, &device, display_handle, window_handle) }?;

        if !surface.supports_present(physical_device, queue_families.graphics)? {
            return Err(GpuError::SurfaceCreation(
                "graphics queue cannot present to this surface".to_string(),
            ));
        }

        let surface_caps = surface.capabilities(physical_device)?;
        let surface_format = select_surface_format(&surface_caps.formats);
        let vk_present_mode = select_present_mode(&surface_caps.present_modes, self.present_mode);
        let extent = calculate_extent(&surface_caps.capabilities, u32::from(self.width), u32::from(self.height));

        let swapchain = unsafe {
            Swapchain::new(
                &device,
                &surface.swapchain_loader,
                surface.surface,
                &surface_caps.capabilities,
                surface_format,
                vk_present_mode,
                extent,
                None,
                queue_families.graphics,
            )
        }?;

        let frames_in_flight = (swapchain.image_count() as u32).min(MAX_FRAMES) as usize;
        let sync = unsafe { FrameSyncManager::new(&device, frames_in_flight) }?;

        // One reusable command pool per frame slot, plus a transient pool
        // for instant submissions.
        let mut frame_commands = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            let create_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(queue_families.graphics)
                .flags(vk::CommandPoolCreateFlags::empty());
            let pool = unsafe { device.create_command_pool(&create_info, None) }?;
            frame_commands.push(FrameCommands {
                pool,
                buffers: Vec::new(),
                next: 0,
            });
        }

        let instant_create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_families.graphics)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let instant_pool = unsafe { device.create_command_pool(&instant_create_info, None) }?;

        let descriptor_pool = unsafe { DescriptorPool::new(&device, &self.descriptor_pool) }?;

        // Timestamp ring: only when requested and the device supports it.
        let timestamps_supported = capabilities.supports_timestamp_queries;
        let (timestamp_manager, timestamp_query_pool) =
            if self.enable_gpu_timestamps && timestamps_supported {
                let manager = GpuTimestampManager::new(
                    u32::from(self.gpu_time_queries_per_frame),
                    frames_in_flight as u32,
                );
                let pool_info = vk::QueryPoolCreateInfo::default()
                    .query_type(vk::QueryType::TIMESTAMP)
                    .query_count(manager.query_pool_size());
                let pool = unsafe { device.create_query_pool(&pool_info, None) }?;
                unsafe { device.reset_query_pool(pool, 0, manager.query_pool_size()) };
                (Some(manager), pool)
            } else {
                if self.enable_gpu_timestamps {
                    tracing::warn!("GPU timestamps requested but not supported by this device");
                }
                (None, vk::QueryPool::null())
            };

        let pools = self.resource_pools;
        let mut gpu = GpuDevice {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            debug_utils,

            graphics_queue_family: queue_families.graphics,
            graphics_queue,
            compute_queue,
            transfer_queue,

            surface,
            swapchain,
            present_mode: self.present_mode,
            requested_width: extent.width as u16,
            requested_height: extent.height as u16,
            resized: false,

            sync,
            image_index: 0,
            swapchain_image_prepared: false,

            buffers: ResourcePool::new(u32::from(pools.buffers)),
            textures: ResourcePool::new(u32::from(pools.textures)),
            pipelines: ResourcePool::new(u32::from(pools.pipelines)),
            samplers: ResourcePool::new(u32::from(pools.samplers)),
            descriptor_set_layouts: ResourcePool::new(u32::from(pools.descriptor_set_layouts)),
            descriptor_sets: ResourcePool::new(u32::from(pools.descriptor_sets)),
            render_passes: ResourcePool::new(u32::from(pools.render_passes)),
            shader_states: ResourcePool::new(u32::from(pools.shader_states)),

            descriptor_pool,
            destruction_queue: DestructionQueue::new(frames_in_flight),

            current_frame: 0,
            previous_frame: 0,
            absolute_frame: 0,

            frame_commands,
            instant_pool,
            queued_command_buffers: Vec::new(),

            dynamic_buffer: BufferHandle::INVALID,
            dynamic_per_frame_size: self.dynamic_per_frame_size,
            dynamic_allocated_size: 0,

            timestamp_manager,
            timestamp_query_pool,
            timestamps_enabled: self.enable_gpu_timestamps && timestamps_supported,
            last_resolved_timestamps: Vec::new(),

            swapchain_pass: RenderPassHandle::INVALID,
            swapchain_output: RenderPassOutput::default(),
            depth_texture: TextureHandle::INVALID,
            default_sampler: SamplerHandle::INVALID,
            dummy_texture: TextureHandle::INVALID,
            dummy_constant_buffer: BufferHandle::INVALID,
            fullscreen_vertex_buffer: BufferHandle::INVALID,
        };

        gpu.create_default_resources()?;

        Ok(gpu)
    }
}

struct FrameCommands {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    next: usize,
}

/// Main GPU device owning all native objects and resource pools.
pub struct GpuDevice {
    // Entry must be kept alive for the lifetime of the device
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: Mutex<GpuAllocator>,
    debug_utils: Option<ash::ext::debug_utils::Device>,

    graphics_queue_family: u32,
    graphics_queue: vk::Queue,
    #[allow(dead_code)]
    compute_queue: vk::Queue,
    #[allow(dead_code)]
    transfer_queue: vk::Queue,

    surface: SurfaceContext,
    swapchain: Swapchain,
    present_mode: PresentMode,
    requested_width: u16,
    requested_height: u16,
    resized: bool,

    sync: FrameSyncManager,
    image_index: u32,
    swapchain_image_prepared: bool,

    buffers: ResourcePool<Buffer>,
    textures: ResourcePool<Texture>,
    pipelines: ResourcePool<Pipeline>,
    samplers: ResourcePool<Sampler>,
    descriptor_set_layouts: ResourcePool<DescriptorSetLayout>,
    descriptor_sets: ResourcePool<DescriptorSet>,
    render_passes: ResourcePool<RenderPass>,
    shader_states: ResourcePool<ShaderState>,

    descriptor_pool: DescriptorPool,
    destruction_queue: DestructionQueue,

    current_frame: u32,
    previous_frame: u32,
    absolute_frame: u64,

    frame_commands: Vec<FrameCommands>,
    instant_pool: vk::CommandPool,
    queued_command_buffers: Vec<CommandBuffer>,

    dynamic_buffer: BufferHandle,
    dynamic_per_frame_size: u32,
    dynamic_allocated_size: u32,

    timestamp_manager: Option<GpuTimestampManager>,
    timestamp_query_pool: vk::QueryPool,
    timestamps_enabled: bool,
    last_resolved_timestamps: Vec<GpuTimestamp>,

    swapchain_pass: RenderPassHandle,
    swapchain_output: RenderPassOutput,
    depth_texture: TextureHandle,
    default_sampler: SamplerHandle,
    dummy_texture: TextureHandle,
    dummy_constant_buffer: BufferHandle,
    fullscreen_vertex_buffer: BufferHandle,
}

impl GpuDevice {
    /// Start building a device.
    pub fn builder() -> GpuDeviceBuilder {
        GpuDeviceBuilder::new()
    }

    // Accessors //////////////////////////////////////////////////////////

    /// Get the Vulkan device handle.
    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Current frame slot index.
    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    /// Frame slot of the previously submitted frame.
    pub fn previous_frame(&self) -> u32 {
        self.previous_frame
    }

    /// Monotonic frame counter.
    pub fn absolute_frame(&self) -> u64 {
        self.absolute_frame
    }

    /// Current swapchain dimensions.
    pub fn swapchain_dimensions(&self) -> (u16, u16) {
        (
            self.swapchain.extent.width as u16,
            self.swapchain.extent.height as u16,
        )
    }

    /// The render pass writing to the swapchain.
    pub fn swapchain_pass(&self) -> RenderPassHandle {
        self.swapchain_pass
    }

    /// Formats of the swapchain pass.
    pub fn swapchain_output(&self) -> &RenderPassOutput {
        &self.swapchain_output
    }

    /// The device-owned depth target sized with the swapchain.
    pub fn depth_texture(&self) -> TextureHandle {
        self.depth_texture
    }

    /// Default linear sampler.
    pub fn default_sampler(&self) -> SamplerHandle {
        self.default_sampler
    }

    /// 1x1 placeholder texture.
    pub fn dummy_texture(&self) -> TextureHandle {
        self.dummy_texture
    }

    /// Small placeholder constant buffer.
    pub fn dummy_constant_buffer(&self) -> BufferHandle {
        self.dummy_constant_buffer
    }

    /// Vertex buffer for fullscreen passes that synthesize vertices.
    pub fn fullscreen_vertex_buffer(&self) -> BufferHandle {
        self.fullscreen_vertex_buffer
    }

    pub(crate) fn current_swapchain_image_view(&self) -> vk::ImageView {
        self.swapchain.image_views[self.image_index as usize]
    }

    pub(crate) fn current_swapchain_image(&self) -> vk::Image {
        self.swapchain.images[self.image_index as usize]
    }

    pub(crate) fn swapchain_image_prepared(&self) -> bool {
        self.swapchain_image_prepared
    }

    pub(crate) fn mark_swapchain_image_prepared(&mut self) {
        self.swapchain_image_prepared = true;
    }

    /// Wait for the device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }

    // Resource creation //////////////////////////////////////////////////

    /// Create a buffer.
    pub fn create_buffer(&mut self, creation: &BufferCreation<'_>) -> Result<BufferHandle> {
        if creation.size == 0 {
            return Err(GpuError::InvalidState(
                "buffer size must be non-zero".to_string(),
            ));
        }

        // Children alias their parent's allocation.
        if creation.parent.is_valid() {
            let parent = self
                .buffers
                .get(creation.parent)
                .ok_or(GpuError::InvalidHandle("buffer"))?;
            let host_visible = parent.host_visible;

            let record = Buffer {
                raw: None,
                usage: creation.usage,
                size: creation.size,
                usage_kind: creation.usage_kind,
                parent: creation.parent,
                sub_offset: creation.sub_offset,
                dynamic_offset: 0,
                host_visible,
                name: creation.name.map(str::to_owned),
            };
            return self
                .buffers
                .obtain(record)
                .ok_or(GpuError::PoolExhausted("buffer"));
        }

        // Dynamic buffers alias the per-frame ring.
        if creation.usage_kind == ResourceUsage::Dynamic {
            let record = Buffer {
                raw: None,
                usage: creation.usage,
                size: creation.size,
                usage_kind: ResourceUsage::Dynamic,
                parent: self.dynamic_buffer,
                sub_offset: 0,
                dynamic_offset: 0,
                host_visible: true,
                name: creation.name.map(str::to_owned),
            };
            let handle = self
                .buffers
                .obtain(record)
                .ok_or(GpuError::PoolExhausted("buffer"))?;

            if let Some(data) = creation.initial_data {
                let mapped = self.map_buffer(&MapBufferParameters {
                    buffer: handle,
                    offset: 0,
                    size: creation.size,
                })?;
                mapped[..data.len()].copy_from_slice(data);
            }
            return Ok(handle);
        }

        let host_visible = creation.persistent || creation.usage_kind == ResourceUsage::Stream;
        let location = if host_visible {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };

        // Device-local initial data goes through a staging copy.
        let mut usage = creation.usage;
        if creation.initial_data.is_some() && !host_visible {
            usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }

        let name = creation.name.unwrap_or("buffer");
        let raw = self.allocator.lock().create_buffer(
            u64::from(creation.size),
            usage,
            location,
            name,
        )?;

        if let Some(handle_name) = creation.name {
            self.set_resource_name(raw.buffer, handle_name);
        }

        if let Some(data) = creation.initial_data {
            if host_visible {
                raw.write_bytes(0, data)?;
            } else {
                self.upload_to_buffer(raw.buffer, data)?;
            }
        }

        let record = Buffer {
            raw: Some(raw),
            usage,
            size: creation.size,
            usage_kind: creation.usage_kind,
            parent: BufferHandle::INVALID,
            sub_offset: 0,
            dynamic_offset: 0,
            host_visible,
            name: creation.name.map(str::to_owned),
        };

        self.buffers
            .obtain(record)
            .ok_or(GpuError::PoolExhausted("buffer"))
    }

    /// Create a texture.
    pub fn create_texture(&mut self, creation: &TextureCreation<'_>) -> Result<TextureHandle> {
        if creation.width == 0 || creation.height == 0 || creation.depth == 0 {
            return Err(GpuError::InvalidState(
                "texture dimensions must be non-zero".to_string(),
            ));
        }

        let is_depth = is_depth_format(creation.format);

        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        if creation.flags.contains(TextureFlags::RENDER_TARGET) {
            usage |= if is_depth {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::ImageUsageFlags::COLOR_ATTACHMENT
            };
        }
        if creation.flags.contains(TextureFlags::COMPUTE) {
            usage |= vk::ImageUsageFlags::STORAGE;
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(creation.kind.to_vk_image_type())
            .format(creation.format)
            .extent(vk::Extent3D {
                width: creation.width,
                height: creation.height,
                depth: creation.depth,
            })
            .mip_levels(creation.mip_count)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let name = creation.name.unwrap_or("texture");
        let raw = self
            .allocator
            .lock()
            .create_image(&image_info, MemoryLocation::GpuOnly, name)?;

        let aspect = if is_depth {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(raw.image)
            .view_type(creation.kind.to_vk_view_type())
            .format(creation.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(creation.mip_count)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let view = unsafe { self.device.create_image_view(&view_info, None) }?;

        if let Some(handle_name) = creation.name {
            self.set_resource_name(raw.image, handle_name);
            self.set_resource_name(view, handle_name);
        }

        let mut state = ResourceState::Undefined;
        if let Some(data) = creation.initial_data {
            self.upload_to_texture(raw.image, creation, data)?;
            state = ResourceState::ShaderResource;
        }

        let record = Texture {
            raw,
            view,
            format: creation.format,
            width: creation.width,
            height: creation.height,
            depth: creation.depth,
            mip_count: creation.mip_count,
            flags: creation.flags,
            kind: creation.kind,
            sampler: self.default_sampler,
            state,
            name: creation.name.map(str::to_owned),
        };

        self.textures
            .obtain(record)
            .ok_or(GpuError::PoolExhausted("texture"))
    }

    /// Create a sampler.
    pub fn create_sampler(&mut self, creation: &SamplerCreation<'_>) -> Result<SamplerHandle> {
        let create_info = vk::SamplerCreateInfo::default()
            .min_filter(creation.min_filter)
            .mag_filter(creation.mag_filter)
            .mipmap_mode(creation.mip_filter)
            .address_mode_u(creation.address_mode_u)
            .address_mode_v(creation.address_mode_v)
            .address_mode_w(creation.address_mode_w);

        let raw = unsafe { self.device.create_sampler(&create_info, None) }?;

        if let Some(name) = creation.name {
            self.set_resource_name(raw, name);
        }

        let record = Sampler {
            raw,
            min_filter: creation.min_filter,
            mag_filter: creation.mag_filter,
            mip_filter: creation.mip_filter,
            address_mode_u: creation.address_mode_u,
            address_mode_v: creation.address_mode_v,
            address_mode_w: creation.address_mode_w,
            name: creation.name.map(str::to_owned),
        };

        self.samplers
            .obtain(record)
            .ok_or(GpuError::PoolExhausted("sampler"))
    }

    /// Create a descriptor set layout.
    pub fn create_descriptor_set_layout(
        &mut self,
        creation: &DescriptorSetLayoutCreation<'_>,
    ) -> Result<DescriptorSetLayoutHandle> {
        let vk_bindings: Vec<_> = creation
            .bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.index)
                    .descriptor_type(binding.kind.to_vk())
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages)
            })
            .collect();

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let raw = unsafe { self.device.create_descriptor_set_layout(&layout_info, None) }?;

        if let Some(name) = creation.name {
            self.set_resource_name(raw, name);
        }

        let record = DescriptorSetLayout {
            raw,
            bindings: creation.bindings.clone(),
            name: creation.name.map(str::to_owned),
        };

        self.descriptor_set_layouts
            .obtain(record)
            .ok_or(GpuError::PoolExhausted("descriptor set layout"))
    }

    /// Create a descriptor set and write its bindings.
    pub fn create_descriptor_set(
        &mut self,
        creation: &DescriptorSetCreation<'_>,
    ) -> Result<DescriptorSetHandle> {
        let layout = self
            .descriptor_set_layouts
            .get(creation.layout)
            .ok_or(GpuError::InvalidHandle("descriptor set layout"))?;

        let raw = unsafe { self.descriptor_pool.allocate(&self.device, layout.raw) }?;

        if let Some(name) = creation.name {
            self.set_resource_name(raw, name);
        }

        let record = DescriptorSet {
            raw,
            layout: creation.layout,
            bindings: creation.bindings.clone(),
            name: creation.name.map(str::to_owned),
        };

        let handle = self
            .descriptor_sets
            .obtain(record)
            .ok_or(GpuError::PoolExhausted("descriptor set"))?;

        self.update_descriptor_set(handle)?;
        Ok(handle)
    }

    /// Rewrite a descriptor set's native bindings from its record.
    pub fn update_descriptor_set(&mut self, handle: DescriptorSetHandle) -> Result<()> {
        let set = self
            .descriptor_sets
            .get(handle)
            .ok_or(GpuError::InvalidHandle("descriptor set"))?;
        let layout = self
            .descriptor_set_layouts
            .get(set.layout)
            .ok_or(GpuError::InvalidHandle("descriptor set layout"))?;

        let mut writes = Vec::with_capacity(set.bindings.len());
        for bound in &set.bindings {
            let binding = layout
                .bindings
                .iter()
                .find(|b| b.index == bound.binding)
                .ok_or_else(|| {
                    GpuError::InvalidState(format!(
                        "binding {} is not part of the layout",
                        bound.binding
                    ))
                })?;

            let write = match bound.resource {
                DescriptorResource::Buffer(buffer_handle) => {
                    let buffer = self
                        .buffers
                        .get(buffer_handle)
                        .ok_or(GpuError::InvalidHandle("buffer"))?;

                    // Children and dynamic buffers point the descriptor at
                    // their parent allocation; per-draw offsets arrive as
                    // dynamic offsets at bind time.
                    let (vk_buffer, offset) = if buffer.parent.is_valid() {
                        let parent = self
                            .buffers
                            .get(buffer.parent)
                            .ok_or(GpuError::InvalidHandle("buffer"))?;
                        let raw = parent
                            .raw
                            .as_ref()
                            .ok_or_else(parent_has_no_allocation)?;
                        (raw.buffer, 0)
                    } else {
                        let raw = buffer
                            .raw
                            .as_ref()
                            .ok_or_else(parent_has_no_allocation)?;
                        (raw.buffer, 0)
                    };

                    ResolvedWrite::Buffer {
                        binding: bound.binding,
                        ty: binding.kind.to_vk(),
                        buffer: vk_buffer,
                        offset,
                        range: u64::from(buffer.size),
                    }
                }
                DescriptorResource::Texture(texture_handle) => {
                    let texture = self
                        .textures
                        .get(texture_handle)
                        .ok_or(GpuError::InvalidHandle("texture"))?;
                    let sampler_handle = if texture.sampler.is_valid() {
                        texture.sampler
                    } else {
                        self.default_sampler
                    };
                    let sampler = self
                        .samplers
                        .get(sampler_handle)
                        .ok_or(GpuError::InvalidHandle("sampler"))?;

                    let layout_for_kind = if binding.kind == DescriptorKind::StorageTexture {
                        vk::ImageLayout::GENERAL
                    } else {
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                    };

                    ResolvedWrite::Image {
                        binding: bound.binding,
                        ty: binding.kind.to_vk(),
                        view: texture.view,
                        sampler: sampler.raw,
                        layout: layout_for_kind,
                    }
                }
                DescriptorResource::TextureSampler(texture_handle, sampler_handle) => {
                    let texture = self
                        .textures
                        .get(texture_handle)
                        .ok_or(GpuError::InvalidHandle("texture"))?;
                    let sampler = self
                        .samplers
                        .get(sampler_handle)
                        .ok_or(GpuError::InvalidHandle("sampler"))?;

                    ResolvedWrite::Image {
                        binding: bound.binding,
                        ty: binding.kind.to_vk(),
                        view: texture.view,
                        sampler: sampler.raw,
                        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }
                }
                DescriptorResource::Sampler(sampler_handle) => {
                    let sampler = self
                        .samplers
                        .get(sampler_handle)
                        .ok_or(GpuError::InvalidHandle("sampler"))?;

                    ResolvedWrite::Image {
                        binding: bound.binding,
                        ty: binding.kind.to_vk(),
                        view: vk::ImageView::null(),
                        sampler: sampler.raw,
                        layout: vk::ImageLayout::UNDEFINED,
                    }
                }
            };

            writes.push(write);
        }

        let raw_set = set.raw;
        unsafe { write_descriptor_set(&self.device, raw_set, &writes) };
        Ok(())
    }

    /// Create a render pass.
    pub fn create_render_pass(
        &mut self,
        creation: &RenderPassCreation<'_>,
    ) -> Result<RenderPassHandle> {
        let mut output = RenderPassOutput {
            color_formats: Vec::new(),
            depth_format: vk::Format::UNDEFINED,
            color_operation: creation.color_operation,
            depth_operation: creation.depth_operation,
            stencil_operation: creation.stencil_operation,
        };

        let (width, height) = match creation.kind {
            RenderPassKind::Swapchain => {
                output.color_formats.push(self.swapchain.format);
                output.depth_format = DEPTH_FORMAT;
                self.swapchain_dimensions()
            }
            _ => {
                let mut dimensions = (0u16, 0u16);
                for &target in &creation.color_targets {
                    let texture = self
                        .textures
                        .get(target)
                        .ok_or(GpuError::InvalidHandle("texture"))?;
                    output.color_formats.push(texture.format);
                    dimensions = (texture.width as u16, texture.height as u16);
                }
                if let Some(depth) = self.textures.get(creation.depth_target) {
                    output.depth_format = depth.format;
                    dimensions = (depth.width as u16, depth.height as u16);
                }
                dimensions
            }
        };

        let record = RenderPass {
            kind: creation.kind,
            width,
            height,
            color_targets: creation.color_targets.clone(),
            depth_target: creation.depth_target,
            output,
            name: creation.name.map(str::to_owned),
        };

        self.render_passes
            .obtain(record)
            .ok_or(GpuError::PoolExhausted("render pass"))
    }

    /// Create a shader state from opaque SPIR-V stages.
    pub fn create_shader_state(
        &mut self,
        creation: &ShaderStateCreation<'_>,
    ) -> Result<ShaderStateHandle> {
        let modules = unsafe { pipeline::create_shader_modules(&self.device, creation) }?;

        let is_graphics = !modules
            .iter()
            .any(|&(stage, _)| stage == vk::ShaderStageFlags::COMPUTE);

        let record = ShaderState {
            modules,
            is_graphics,
            name: creation.name.map(str::to_owned),
        };

        self.shader_states
            .obtain(record)
            .ok_or(GpuError::PoolExhausted("shader state"))
    }

    /// Create a pipeline, including its shader state.
    pub fn create_pipeline(&mut self, creation: &PipelineCreation<'_>) -> Result<PipelineHandle> {
        let shader_state = self.create_shader_state(&creation.shaders)?;

        let mut set_layouts = Vec::with_capacity(creation.descriptor_set_layouts.len());
        for &layout_handle in &creation.descriptor_set_layouts {
            let layout = self
                .descriptor_set_layouts
                .get(layout_handle)
                .ok_or(GpuError::InvalidHandle("descriptor set layout"))?;
            set_layouts.push(layout.raw);
        }

        let state = self
            .shader_states
            .get(shader_state)
            .ok_or(GpuError::InvalidHandle("shader state"))?;

        let (raw, layout, bind_point) = if state.is_graphics {
            let (pipeline, layout) = unsafe {
                pipeline::create_graphics_pipeline(
                    &self.device,
                    creation,
                    &state.modules,
                    &set_layouts,
                )
            }?;
            (pipeline, layout, vk::PipelineBindPoint::GRAPHICS)
        } else {
            let module = state.modules[0].1;
            let (pipeline, layout) =
                unsafe { pipeline::create_compute_pipeline(&self.device, module, &set_layouts) }?;
            (pipeline, layout, vk::PipelineBindPoint::COMPUTE)
        };

        if let Some(name) = creation.name {
            self.set_resource_name(raw, name);
        }

        let record = Pipeline {
            raw,
            layout,
            bind_point,
            shader_state,
            descriptor_set_layouts: creation.descriptor_set_layouts.clone(),
            name: creation.name.map(str::to_owned),
        };

        self.pipelines
            .obtain(record)
            .ok_or(GpuError::PoolExhausted("pipeline"))
    }

    // Deferred destruction ///////////////////////////////////////////////

    /// Mark a buffer for destruction once no in-flight frame references it.
    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.queue_destruction(DeferredResource::Buffer(handle), self.buffers.get(handle).is_some())
    }

    /// Mark a texture for destruction.
    pub fn destroy_texture(&mut self, handle: TextureHandle) -> Result<()> {
        self.queue_destruction(DeferredResource::Texture(handle), self.textures.get(handle).is_some())
    }

    /// Mark a pipeline for destruction.
    pub fn destroy_pipeline(&mut self, handle: PipelineHandle) -> Result<()> {
        // The embedded shader state goes with it.
        let shader_state = self
            .pipelines
            .get(handle)
            .map(|p| p.shader_state)
            .ok_or(GpuError::InvalidHandle("pipeline"))?;
        self.queue_destruction(DeferredResource::ShaderState(shader_state), true)?;
        self.queue_destruction(DeferredResource::Pipeline(handle), true)
    }

    /// Mark a sampler for destruction.
    pub fn destroy_sampler(&mut self, handle: SamplerHandle) -> Result<()> {
        self.queue_destruction(DeferredResource::Sampler(handle), self.samplers.get(handle).is_some())
    }

    /// Mark a descriptor set layout for destruction.
    pub fn destroy_descriptor_set_layout(
        &mut self,
        handle: DescriptorSetLayoutHandle,
    ) -> Result<()> {
        self.queue_destruction(
            DeferredResource::DescriptorSetLayout(handle),
            self.descriptor_set_layouts.get(handle).is_some(),
        )
    }

    /// Mark a descriptor set for destruction.
    pub fn destroy_descriptor_set(&mut self, handle: DescriptorSetHandle) -> Result<()> {
        self.queue_destruction(
            DeferredResource::DescriptorSet(handle),
            self.descriptor_sets.get(handle).is_some(),
        )
    }

    /// Mark a render pass for destruction.
    pub fn destroy_render_pass(&mut self, handle: RenderPassHandle) -> Result<()> {
        self.queue_destruction(
            DeferredResource::RenderPass(handle),
            self.render_passes.get(handle).is_some(),
        )
    }

    /// Mark a shader state for destruction.
    pub fn destroy_shader_state(&mut self, handle: ShaderStateHandle) -> Result<()> {
        self.queue_destruction(
            DeferredResource::ShaderState(handle),
            self.shader_states.get(handle).is_some(),
        )
    }

    fn queue_destruction(&mut self, resource: DeferredResource, live: bool) -> Result<()> {
        if !live {
            return Err(GpuError::InvalidHandle("resource"));
        }
        self.destruction_queue.queue(resource, self.absolute_frame);
        Ok(())
    }

    fn destroy_resource_now(&mut self, resource: DeferredResource) {
        match resource {
            DeferredResource::Buffer(handle) => {
                if let Some(record) = self.buffers.release(handle) {
                    self.destroy_buffer_record(record);
                }
            }
            DeferredResource::Texture(handle) => {
                if let Some(record) = self.textures.release(handle) {
                    self.destroy_texture_record(record);
                }
            }
            DeferredResource::Pipeline(handle) => {
                if let Some(record) = self.pipelines.release(handle) {
                    self.destroy_pipeline_record(record);
                }
            }
            DeferredResource::Sampler(handle) => {
                if let Some(record) = self.samplers.release(handle) {
                    self.destroy_sampler_record(record);
                }
            }
            DeferredResource::DescriptorSetLayout(handle) => {
                if let Some(record) = self.descriptor_set_layouts.release(handle) {
                    self.destroy_descriptor_set_layout_record(record);
                }
            }
            DeferredResource::DescriptorSet(handle) => {
                if let Some(record) = self.descriptor_sets.release(handle) {
                    self.destroy_descriptor_set_record(record);
                }
            }
            DeferredResource::RenderPass(handle) => {
                // Nothing native: with dynamic rendering the record is all
                // there is.
                self.render_passes.release(handle);
            }
            DeferredResource::ShaderState(handle) => {
                if let Some(record) = self.shader_states.release(handle) {
                    self.destroy_shader_state_record(record);
                }
            }
        }
    }

    fn destroy_buffer_record(&self, mut record: Buffer) {
        if let Some(ref mut raw) = record.raw {
            if let Err(e) = self.allocator.lock().free_buffer(raw) {
                tracing::warn!("Failed to free buffer: {e}");
            }
        }
    }

    fn destroy_texture_record(&self, mut record: Texture) {
        unsafe { self.device.destroy_image_view(record.view, None) };
        if let Err(e) = self.allocator.lock().free_image(&mut record.raw) {
            tracing::warn!("Failed to free image: {e}");
        }
    }

    fn destroy_pipeline_record(&self, record: Pipeline) {
        unsafe {
            self.device.destroy_pipeline(record.raw, None);
            self.device.destroy_pipeline_layout(record.layout, None);
        }
    }

    fn destroy_sampler_record(&self, record: Sampler) {
        unsafe { self.device.destroy_sampler(record.raw, None) };
    }

    fn destroy_descriptor_set_layout_record(&self, record: DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(record.raw, None) };
    }

    fn destroy_descriptor_set_record(&self, record: DescriptorSet) {
        if let Err(e) = unsafe { self.descriptor_pool.free(&self.device, record.raw) } {
            tracing::warn!("Failed to free descriptor set: {e}");
        }
    }

    fn destroy_shader_state_record(&self, record: ShaderState) {
        unsafe { pipeline::destroy_shader_modules(&self.device, &record.modules) };
    }

    // Queries ////////////////////////////////////////////////////////////

    /// Copy back the live configuration of a buffer.
    pub fn query_buffer(&self, handle: BufferHandle) -> Result<BufferDescription> {
        let buffer = self
            .buffers
            .get(handle)
            .ok_or(GpuError::InvalidHandle("buffer"))?;
        Ok(BufferDescription {
            usage: buffer.usage,
            usage_kind: buffer.usage_kind,
            size: buffer.size,
            parent: buffer.parent,
            host_visible: buffer.host_visible,
            name: buffer.name.clone(),
        })
    }

    /// Copy back the live configuration of a texture.
    pub fn query_texture(&self, handle: TextureHandle) -> Result<TextureDescription> {
        let texture = self
            .textures
            .get(handle)
            .ok_or(GpuError::InvalidHandle("texture"))?;
        Ok(TextureDescription {
            width: texture.width,
            height: texture.height,
            depth: texture.depth,
            mip_count: texture.mip_count,
            format: texture.format,
            kind: texture.kind,
            flags: texture.flags,
            name: texture.name.clone(),
        })
    }

    /// Copy back the live configuration of a sampler.
    pub fn query_sampler(&self, handle: SamplerHandle) -> Result<SamplerDescription> {
        let sampler = self
            .samplers
            .get(handle)
            .ok_or(GpuError::InvalidHandle("sampler"))?;
        Ok(SamplerDescription {
            min_filter: sampler.min_filter,
            mag_filter: sampler.mag_filter,
            mip_filter: sampler.mip_filter,
            address_mode_u: sampler.address_mode_u,
            address_mode_v: sampler.address_mode_v,
            address_mode_w: sampler.address_mode_w,
            name: sampler.name.clone(),
        })
    }

    /// Copy back the live configuration of a descriptor set layout.
    pub fn query_descriptor_set_layout(
        &self,
        handle: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetLayoutDescription> {
        let layout = self
            .descriptor_set_layouts
            .get(handle)
            .ok_or(GpuError::InvalidHandle("descriptor set layout"))?;
        Ok(DescriptorSetLayoutDescription {
            bindings: layout.bindings.clone(),
            name: layout.name.clone(),
        })
    }

    /// Copy back the live configuration of a descriptor set.
    pub fn query_descriptor_set(
        &self,
        handle: DescriptorSetHandle,
    ) -> Result<DescriptorSetDescription> {
        let set = self
            .descriptor_sets
            .get(handle)
            .ok_or(GpuError::InvalidHandle("descriptor set"))?;
        Ok(DescriptorSetDescription {
            layout: set.layout,
            bindings: set.bindings.clone(),
            name: set.name.clone(),
        })
    }

    /// Copy back the live configuration of a pipeline.
    pub fn query_pipeline(&self, handle: PipelineHandle) -> Result<PipelineDescription> {
        let pipeline = self
            .pipelines
            .get(handle)
            .ok_or(GpuError::InvalidHandle("pipeline"))?;
        Ok(PipelineDescription {
            shader_state: pipeline.shader_state,
            descriptor_set_layouts: pipeline.descriptor_set_layouts.clone(),
            name: pipeline.name.clone(),
        })
    }

    /// Copy back the live configuration of a shader state.
    pub fn query_shader_state(&self, handle: ShaderStateHandle) -> Result<ShaderStateDescription> {
        let state = self
            .shader_states
            .get(handle)
            .ok_or(GpuError::InvalidHandle("shader state"))?;
        Ok(ShaderStateDescription {
            stage_count: state.modules.len() as u32,
            is_graphics: state.is_graphics,
            name: state.name.clone(),
        })
    }

    /// Formats and operations a render pass writes.
    pub fn get_render_pass_output(&self, handle: RenderPassHandle) -> Result<RenderPassOutput> {
        let pass = self
            .render_passes
            .get(handle)
            .ok_or(GpuError::InvalidHandle("render pass"))?;
        Ok(pass.output.clone())
    }

    // Accessors into the pools ///////////////////////////////////////////

    pub fn access_buffer(&self, handle: BufferHandle) -> Option<&Buffer> {
        self.buffers.get(handle)
    }

    pub fn access_buffer_mut(&mut self, handle: BufferHandle) -> Option<&mut Buffer> {
        self.buffers.get_mut(handle)
    }

    pub fn access_texture(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(handle)
    }

    pub fn access_texture_mut(&mut self, handle: TextureHandle) -> Option<&mut Texture> {
        self.textures.get_mut(handle)
    }

    pub fn access_pipeline(&self, handle: PipelineHandle) -> Option<&Pipeline> {
        self.pipelines.get(handle)
    }

    pub fn access_sampler(&self, handle: SamplerHandle) -> Option<&Sampler> {
        self.samplers.get(handle)
    }

    pub fn access_descriptor_set_layout(
        &self,
        handle: DescriptorSetLayoutHandle,
    ) -> Option<&DescriptorSetLayout> {
        self.descriptor_set_layouts.get(handle)
    }

    pub fn access_descriptor_set(&self, handle: DescriptorSetHandle) -> Option<&DescriptorSet> {
        self.descriptor_sets.get(handle)
    }

    pub fn access_render_pass(&self, handle: RenderPassHandle) -> Option<&RenderPass> {
        self.render_passes.get(handle)
    }

    pub fn access_shader_state(&self, handle: ShaderStateHandle) -> Option<&ShaderState> {
        self.shader_states.get(handle)
    }

    /// Associate a sampler with a texture for combined-image-sampler writes.
    pub fn link_texture_sampler(
        &mut self,
        texture: TextureHandle,
        sampler: SamplerHandle,
    ) -> Result<()> {
        if self.samplers.get(sampler).is_none() {
            return Err(GpuError::InvalidHandle("sampler"));
        }
        let record = self
            .textures
            .get_mut(texture)
            .ok_or(GpuError::InvalidHandle("texture"))?;
        record.sampler = sampler;
        Ok(())
    }

    // Mapping ////////////////////////////////////////////////////////////

    /// Map a host-visible buffer range for writing.
    ///
    /// Dynamic buffers allocate a fresh region from the per-frame ring and
    /// re-point their dynamic offset; everything written is addressed by
    /// the next `bind_descriptor_sets` through that offset.
    pub fn map_buffer(&mut self, parameters: &MapBufferParameters) -> Result<&mut [u8]> {
        let buffer = self
            .buffers
            .get(parameters.buffer)
            .ok_or(GpuError::InvalidHandle("buffer"))?;

        let size = if parameters.size == 0 {
            buffer.size - parameters.offset
        } else {
            parameters.size
        };

        if buffer.usage_kind == ResourceUsage::Dynamic {
            let ring_offset = self.dynamic_allocate(size)?;

            let record = self
                .buffers
                .get_mut(parameters.buffer)
                .ok_or(GpuError::InvalidHandle("buffer"))?;
            record.dynamic_offset = ring_offset;

            let ring = self
                .buffers
                .get(self.dynamic_buffer)
                .and_then(|b| b.raw.as_ref())
                .ok_or_else(|| GpuError::InvalidState("dynamic ring missing".to_string()))?;
            let base = ring
                .mapped_ptr()
                .ok_or_else(|| GpuError::InvalidState("dynamic ring not mapped".to_string()))?;

            let slice = unsafe {
                std::slice::from_raw_parts_mut(base.add(ring_offset as usize), size as usize)
            };
            return Ok(slice);
        }

        if !buffer.host_visible {
            return Err(GpuError::InvalidState(
                "buffer was not created host-visible".to_string(),
            ));
        }

        let raw = buffer
            .raw
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("sub-allocated buffers map via their parent".to_string()))?;
        let base = raw
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("buffer not mapped".to_string()))?;

        if u64::from(parameters.offset) + u64::from(size) > raw.size {
            return Err(GpuError::InvalidState(
                "map range exceeds buffer size".to_string(),
            ));
        }

        let slice = unsafe {
            std::slice::from_raw_parts_mut(base.add(parameters.offset as usize), size as usize)
        };
        Ok(slice)
    }

    /// Finish a scoped map. Allocations are persistently mapped, so this
    /// only validates the handle.
    pub fn unmap_buffer(&mut self, parameters: &MapBufferParameters) -> Result<()> {
        self.buffers
            .get(parameters.buffer)
            .map(|_| ())
            .ok_or(GpuError::InvalidHandle("buffer"))
    }

    /// Write a slice of plain-old-data values through `map_buffer`.
    pub fn write_buffer<T: bytemuck::NoUninit>(
        &mut self,
        handle: BufferHandle,
        data: &[T],
    ) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mapped = self.map_buffer(&MapBufferParameters {
            buffer: handle,
            offset: 0,
            size: bytes.len() as u32,
        })?;
        mapped.copy_from_slice(bytes);
        self.unmap_buffer(&MapBufferParameters {
            buffer: handle,
            offset: 0,
            size: bytes.len() as u32,
        })
    }

    fn dynamic_allocate(&mut self, size: u32) -> Result<u32> {
        let alignment = self.capabilities.uniform_buffer_alignment.max(1) as u32;
        let aligned = self.dynamic_allocated_size.div_ceil(alignment) * alignment;

        if aligned + size > self.dynamic_per_frame_size {
            return Err(GpuError::AllocationFailed(
                "per-frame dynamic ring exhausted".to_string(),
            ));
        }

        self.dynamic_allocated_size = aligned + size;
        Ok(self.current_frame * self.dynamic_per_frame_size + aligned)
    }

    pub(crate) fn buffer_dynamic_offset(&self, handle: BufferHandle) -> Result<u32> {
        let buffer = self
            .buffers
            .get(handle)
            .ok_or(GpuError::InvalidHandle("buffer"))?;
        Ok(match buffer.usage_kind {
            ResourceUsage::Dynamic => buffer.dynamic_offset,
            _ => buffer.sub_offset,
        })
    }

    pub(crate) fn resolve_buffer_binding(
        &self,
        handle: BufferHandle,
        offset: u32,
    ) -> Result<(vk::Buffer, u64)> {
        let buffer = self
            .buffers
            .get(handle)
            .ok_or(GpuError::InvalidHandle("buffer"))?;

        if buffer.parent.is_valid() {
            let parent = self
                .buffers
                .get(buffer.parent)
                .ok_or(GpuError::InvalidHandle("buffer"))?;
            let raw = parent.raw.as_ref().ok_or_else(parent_has_no_allocation)?;

            let resolved = match buffer.usage_kind {
                ResourceUsage::Dynamic => buffer.dynamic_offset,
                _ => buffer.sub_offset,
            };
            return Ok((raw.buffer, u64::from(resolved)));
        }

        let raw = buffer.raw.as_ref().ok_or_else(parent_has_no_allocation)?;
        Ok((raw.buffer, u64::from(offset)))
    }

    // Command buffers ////////////////////////////////////////////////////

    /// Get a command buffer for this frame in the `Initial` state.
    ///
    /// Buffers are recycled when the frame slot comes around again; queue
    /// them (or drop them) before `present`.
    pub fn get_command_buffer(&mut self, queue_type: QueueType, begin: bool) -> Result<CommandBuffer> {
        let frame = &mut self.frame_commands[self.current_frame as usize];

        let raw = if frame.next < frame.buffers.len() {
            frame.buffers[frame.next]
        } else {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(frame.pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let allocated = unsafe { self.device.allocate_command_buffers(&alloc_info) }?;
            frame.buffers.push(allocated[0]);
            allocated[0]
        };
        frame.next += 1;

        if begin {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(raw, &begin_info) }?;
        }

        Ok(CommandBuffer::new(raw, queue_type, false))
    }

    /// Queue a command buffer for submission at `present`.
    ///
    /// Submission order equals queue order; this FIFO is the only ordering
    /// guarantee across command buffers.
    pub fn queue_command_buffer(&mut self, mut command_buffer: CommandBuffer) {
        command_buffer.mark_submitted();
        self.queued_command_buffers.push(command_buffer);
    }

    /// Record and submit a one-off command buffer, waiting for completion.
    ///
    /// Used for resource uploads outside the frame loop.
    pub fn submit_instant<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.instant_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&alloc_info) }?[0];

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device.begin_command_buffer(cmd, &begin_info)?;
            record(&self.device, cmd);
            self.device.end_command_buffer(cmd)?;

            let cmd_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], vk::Fence::null())?;
            self.device.queue_wait_idle(self.graphics_queue)?;

            self.device.free_command_buffers(self.instant_pool, &[cmd]);
        }

        Ok(())
    }

    // Frame lifecycle ////////////////////////////////////////////////////

    /// Begin a frame: wait for the slot being reused, acquire a swapchain
    /// image (recreating the swapchain locally on OUT_OF_DATE), and rewind
    /// per-frame state.
    pub fn new_frame(&mut self) -> Result<()> {
        if self.resized {
            self.resize_swapchain()?;
            self.resized = false;
        }

        unsafe { self.sync.current().wait(&self.device) }?;

        let (image_index, _suboptimal) = loop {
            let acquired = unsafe {
                self.swapchain.acquire_next_image(
                    &self.surface.swapchain_loader,
                    self.sync.image_acquired,
                    ACQUIRE_TIMEOUT_NS,
                )
            };
            match acquired {
                Ok(pair) => break pair,
                Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {
                    self.resize_swapchain()?;
                }
                Err(e) => return Err(e),
            }
        };
        self.image_index = image_index;
        self.swapchain_image_prepared = false;

        unsafe { self.sync.current().reset(&self.device) }?;

        // Recycle this slot's command buffers.
        let frame = &mut self.frame_commands[self.current_frame as usize];
        unsafe {
            self.device
                .reset_command_pool(frame.pool, vk::CommandPoolResetFlags::empty())?;
        }
        frame.next = 0;

        self.dynamic_allocated_size = 0;

        // Resolve this slot's queries from its previous run, then hand the
        // range back to the new frame.
        if self.timestamps_enabled {
            self.resolve_frame_timestamps()?;
        }

        Ok(())
    }

    /// Submit queued command buffers in FIFO order, present, advance frame
    /// counters, and process matured deferred destructions.
    pub fn present(&mut self) -> Result<()> {
        let mut queued = std::mem::take(&mut self.queued_command_buffers);
        for command_buffer in &mut queued {
            command_buffer.end_current_pass(&self.device);
        }

        // The acquired image must reach PRESENT_SRC; record the transition
        // at the tail of the last command buffer, or in a dedicated one for
        // an empty frame.
        if queued.is_empty() {
            let command_buffer = self.get_command_buffer(QueueType::Graphics, true)?;
            queued.push(command_buffer);
        }
        self.record_present_transition(queued.last().expect("non-empty").raw);

        let mut raw_buffers = Vec::with_capacity(queued.len());
        for command_buffer in &queued {
            unsafe { self.device.end_command_buffer(command_buffer.raw) }?;
            raw_buffers.push(command_buffer.raw);
        }
        drop(queued);

        let wait_semaphores = [self.sync.image_acquired];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.current().render_complete];

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&raw_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.queue_submit(
                self.graphics_queue,
                &[submit_info],
                self.sync.current().command_buffer_executed,
            )?;
        }

        let needs_recreate = unsafe {
            self.swapchain.present(
                &self.surface.swapchain_loader,
                self.graphics_queue,
                self.image_index,
                &signal_semaphores,
            )
        }?;

        if needs_recreate {
            self.resized = true;
        }

        self.frame_counters_advance();

        let matured = self.destruction_queue.drain_ready(self.absolute_frame);
        for resource in matured {
            self.destroy_resource_now(resource);
        }

        Ok(())
    }

    fn record_present_transition(&mut self, cmd: vk::CommandBuffer) {
        // An unprepared image was never rendered to; its contents are
        // allowed to be undefined at present.
        let old_layout = if self.swapchain_image_prepared {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::UNDEFINED
        };

        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE)
            .old_layout(old_layout)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .image(self.current_swapchain_image())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );

        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { self.device.cmd_pipeline_barrier2(cmd, &dependency_info) };

        self.swapchain_image_prepared = false;
    }

    fn frame_counters_advance(&mut self) {
        self.previous_frame = self.current_frame;
        self.sync.advance();
        self.current_frame = self.sync.current_frame() as u32;
        self.absolute_frame += 1;
    }

    /// Request a new swapchain size; applied at the next `new_frame`.
    pub fn resize(&mut self, width: u16, height: u16) {
        self.requested_width = width;
        self.requested_height = height;
        self.resized = true;
    }

    /// Change presentation pacing; applied by recreating the swapchain.
    pub fn set_present_mode(&mut self, mode: PresentMode) {
        if self.present_mode != mode {
            self.present_mode = mode;
            self.resized = true;
        }
    }

    /// Tear down and recreate the swapchain and its dependent targets.
    ///
    /// Independent resources are untouched.
    fn resize_swapchain(&mut self) -> Result<()> {
        self.wait_idle()?;

        let surface_caps = self.surface.capabilities(self.physical_device)?;
        let surface_format = select_surface_format(&surface_caps.formats);
        let vk_present_mode = select_present_mode(&surface_caps.present_modes, self.present_mode);
        let extent = calculate_extent(
            &surface_caps.capabilities,
            u32::from(self.requested_width),
            u32::from(self.requested_height),
        );

        if extent.width == 0 || extent.height == 0 {
            // Minimized; keep the old swapchain until the surface is usable.
            return Ok(());
        }

        let new_swapchain = unsafe {
            Swapchain::new(
                &self.device,
                &self.surface.swapchain_loader,
                self.surface.surface,
                &surface_caps.capabilities,
                surface_format,
                vk_present_mode,
                extent,
                Some(self.swapchain.swapchain),
                self.graphics_queue_family,
            )
        }?;

        unsafe {
            self.swapchain
                .destroy(&self.device, &self.surface.swapchain_loader)
        };
        self.swapchain = new_swapchain;

        tracing::info!(
            "Swapchain recreated at {}x{}",
            extent.width,
            extent.height
        );

        // The depth target follows the swapchain size.
        if self.depth_texture.is_valid() {
            if let Some(record) = self.textures.release(self.depth_texture) {
                self.destroy_texture_record(record);
            }
        }
        self.depth_texture = self.create_texture(
            &TextureCreation::new()
                .set_size(extent.width, extent.height, 1)
                .set_format_kind(DEPTH_FORMAT, TextureKind::Texture2D)
                .set_flags(1, TextureFlags::RENDER_TARGET)
                .set_name("depth_texture"),
        )?;

        // Refresh the swapchain pass dimensions and output.
        self.swapchain_output.color_formats = vec![self.swapchain.format];
        self.swapchain_output.depth_format = DEPTH_FORMAT;
        let (width, height) = self.swapchain_dimensions();
        let output = self.swapchain_output.clone();
        if let Some(pass) = self.render_passes.get_mut(self.swapchain_pass) {
            pass.width = width;
            pass.height = height;
            pass.output = output;
        }

        Ok(())
    }

    // Markers and timestamps /////////////////////////////////////////////

    /// Enable or disable timestamp collection at runtime.
    pub fn set_gpu_timestamps_enable(&mut self, enable: bool) {
        self.timestamps_enabled = enable && self.timestamp_manager.is_some();
    }

    /// Timestamps resolved from the most recently completed frame.
    pub fn get_gpu_timestamps(&self) -> &[GpuTimestamp] {
        &self.last_resolved_timestamps
    }

    pub(crate) fn push_gpu_timestamp(&mut self, cmd: vk::CommandBuffer, name: &str) {
        if !self.timestamps_enabled {
            return;
        }
        let Some(ref mut manager) = self.timestamp_manager else {
            return;
        };
        let Some(query_index) = manager.push(self.current_frame, name) else {
            tracing::warn!("GPU timestamp budget exhausted for this frame");
            return;
        };

        unsafe {
            self.device.cmd_write_timestamp(
                cmd,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                self.timestamp_query_pool,
                query_index,
            );
        }
    }

    pub(crate) fn pop_gpu_timestamp(&mut self, cmd: vk::CommandBuffer) {
        if !self.timestamps_enabled {
            return;
        }
        let Some(ref mut manager) = self.timestamp_manager else {
            return;
        };
        let Some(query_index) = manager.pop(self.current_frame) else {
            return;
        };

        unsafe {
            self.device.cmd_write_timestamp(
                cmd,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                self.timestamp_query_pool,
                query_index,
            );
        }
    }

    pub(crate) fn push_debug_label(&self, cmd: vk::CommandBuffer, name: &str) {
        let Some(ref debug_utils) = self.debug_utils else {
            return;
        };
        let Ok(label_name) = CString::new(name) else {
            return;
        };
        let label = vk::DebugUtilsLabelEXT::default().label_name(&label_name);
        unsafe { debug_utils.cmd_begin_debug_utils_label(cmd, &label) };
    }

    pub(crate) fn pop_debug_label(&self, cmd: vk::CommandBuffer) {
        let Some(ref debug_utils) = self.debug_utils else {
            return;
        };
        unsafe { debug_utils.cmd_end_debug_utils_label(cmd) };
    }

    fn resolve_frame_timestamps(&mut self) -> Result<()> {
        let Some(ref mut manager) = self.timestamp_manager else {
            return Ok(());
        };

        let frame = self.current_frame;
        let count = manager.query_count(frame);
        if count > 0 {
            // The slot's fence has signaled, so the results are final. Only
            // the written queries are readable; the rest of the range was
            // reset and never recorded.
            let first = manager.frame_first_query(frame);
            let written = count * 2;

            let mut ticks = vec![0u64; manager.query_pool_size() as usize];
            let range = &mut ticks[first as usize..(first + written) as usize];
            unsafe {
                self.device.get_query_pool_results::<u64>(
                    self.timestamp_query_pool,
                    first,
                    range,
                    vk::QueryResultFlags::TYPE_64,
                )?;
            }

            let resolved =
                manager.resolve(frame, self.capabilities.timestamp_period, &ticks);
            self.last_resolved_timestamps = resolved.to_vec();
        }

        // Hand the query range back to this frame's recording.
        unsafe {
            self.device.reset_query_pool(
                self.timestamp_query_pool,
                manager.frame_first_query(frame),
                manager.frame_query_capacity(),
            );
        }
        manager.begin_frame(frame);

        Ok(())
    }

    // Internals //////////////////////////////////////////////////////////

    fn set_resource_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(ref debug_utils) = self.debug_utils else {
            return;
        };
        let Ok(object_name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&object_name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            tracing::debug!("Failed to set debug name {name:?}: {e}");
        }
    }

    fn upload_to_buffer(&mut self, dst: vk::Buffer, data: &[u8]) -> Result<()> {
        let mut staging = self.allocator.lock().create_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging",
        )?;
        staging.write_bytes(0, data)?;

        let size = data.len() as u64;
        let src = staging.buffer;
        self.submit_instant(move |device, cmd| {
            let region = vk::BufferCopy::default().size(size);
            unsafe { device.cmd_copy_buffer(cmd, src, dst, &[region]) };
        })?;

        self.allocator.lock().free_buffer(&mut staging)?;
        Ok(())
    }

    fn upload_to_texture(
        &mut self,
        image: vk::Image,
        creation: &TextureCreation<'_>,
        data: &[u8],
    ) -> Result<()> {
        let mut staging = self.allocator.lock().create_buffer(
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging",
        )?;
        staging.write_bytes(0, data)?;

        let src = staging.buffer;
        let extent = vk::Extent3D {
            width: creation.width,
            height: creation.height,
            depth: creation.depth,
        };
        let mip_count = creation.mip_count;

        self.submit_instant(move |device, cmd| {
            let subresource_range = vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(mip_count)
                .base_array_layer(0)
                .layer_count(1);

            let to_transfer = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .image(image)
                .subresource_range(subresource_range);

            let dependency =
                vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&to_transfer));
            unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };

            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_extent(extent);

            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    src,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            let to_sampled = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::FRAGMENT_SHADER)
                .dst_access_mask(vk::AccessFlags2::SHADER_READ)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .image(image)
                .subresource_range(subresource_range);

            let dependency =
                vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&to_sampled));
            unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
        })?;

        self.allocator.lock().free_buffer(&mut staging)?;
        Ok(())
    }

    fn create_default_resources(&mut self) -> Result<()> {
        self.default_sampler = self.create_sampler(
            &SamplerCreation::new()
                .set_min_mag_mip(
                    vk::Filter::LINEAR,
                    vk::Filter::LINEAR,
                    vk::SamplerMipmapMode::LINEAR,
                )
                .set_name("default_sampler"),
        )?;

        let (width, height) = self.swapchain_dimensions();
        self.depth_texture = self.create_texture(
            &TextureCreation::new()
                .set_size(u32::from(width), u32::from(height), 1)
                .set_format_kind(DEPTH_FORMAT, TextureKind::Texture2D)
                .set_flags(1, TextureFlags::RENDER_TARGET)
                .set_name("depth_texture"),
        )?;

        let dummy_pixel = [255u8, 255, 255, 255];
        self.dummy_texture = self.create_texture(
            &TextureCreation::new()
                .set_data(&dummy_pixel)
                .set_name("dummy_texture"),
        )?;

        self.dummy_constant_buffer = self.create_buffer(
            &BufferCreation::new()
                .set_usage(vk::BufferUsageFlags::UNIFORM_BUFFER, ResourceUsage::Immutable)
                .set_size(64)
                .set_persistent(true)
                .set_name("dummy_constant_buffer"),
        )?;

        // Fullscreen passes synthesize their triangle in the vertex shader;
        // the buffer only satisfies the binding interface.
        self.fullscreen_vertex_buffer = self.create_buffer(
            &BufferCreation::new()
                .set_usage(vk::BufferUsageFlags::VERTEX_BUFFER, ResourceUsage::Immutable)
                .set_size(64)
                .set_name("fullscreen_vertex_buffer"),
        )?;

        let frames = self.sync.frames_in_flight() as u32;
        self.dynamic_buffer = self.create_buffer(
            &BufferCreation::new()
                .set_usage(
                    vk::BufferUsageFlags::UNIFORM_BUFFER
                        | vk::BufferUsageFlags::VERTEX_BUFFER
                        | vk::BufferUsageFlags::INDEX_BUFFER,
                    ResourceUsage::Immutable,
                )
                .set_size(self.dynamic_per_frame_size * frames)
                .set_persistent(true)
                .set_name("dynamic_ring_buffer"),
        )?;

        self.swapchain_output = RenderPassOutput {
            color_formats: vec![self.swapchain.format],
            depth_format: DEPTH_FORMAT,
            color_operation: RenderTargetOperation::Clear,
            depth_operation: RenderTargetOperation::Clear,
            stencil_operation: RenderTargetOperation::DontCare,
        };

        self.swapchain_pass = self.create_render_pass(
            &RenderPassCreation::new()
                .set_kind(RenderPassKind::Swapchain)
                .set_operations(
                    RenderTargetOperation::Clear,
                    RenderTargetOperation::Clear,
                    RenderTargetOperation::DontCare,
                )
                .set_name("swapchain_pass"),
        )?;

        Ok(())
    }
}

impl Drop for GpuDevice {
    fn drop(&mut self) {
        if self.wait_idle().is_err() {
            tracing::warn!("Device did not go idle before shutdown");
        }

        // Everything still pending is safe to destroy after wait-idle.
        let pending = self.destruction_queue.drain_all();
        for resource in pending {
            self.destroy_resource_now(resource);
        }

        // Device-owned defaults.
        for handle in [
            self.fullscreen_vertex_buffer,
            self.dummy_constant_buffer,
            self.dynamic_buffer,
        ] {
            if let Some(record) = self.buffers.release(handle) {
                self.destroy_buffer_record(record);
            }
        }
        for handle in [self.dummy_texture, self.depth_texture] {
            if let Some(record) = self.textures.release(handle) {
                self.destroy_texture_record(record);
            }
        }
        if let Some(record) = self.samplers.release(self.default_sampler) {
            self.destroy_sampler_record(record);
        }
        self.render_passes.release(self.swapchain_pass);

        // Leak detection: anything still alive was never destroyed by the
        // application.
        report_leaks("buffer", &self.buffers);
        report_leaks("texture", &self.textures);
        report_leaks("pipeline", &self.pipelines);
        report_leaks("sampler", &self.samplers);
        report_leaks("descriptor set layout", &self.descriptor_set_layouts);
        report_leaks("descriptor set", &self.descriptor_sets);
        report_leaks("render pass", &self.render_passes);
        report_leaks("shader state", &self.shader_states);

        for record in self.buffers.drain_live() {
            self.destroy_buffer_record(record);
        }
        for record in self.textures.drain_live() {
            self.destroy_texture_record(record);
        }
        for record in self.pipelines.drain_live() {
            self.destroy_pipeline_record(record);
        }
        for record in self.samplers.drain_live() {
            self.destroy_sampler_record(record);
        }
        for record in self.descriptor_set_layouts.drain_live() {
            self.destroy_descriptor_set_layout_record(record);
        }
        for record in self.descriptor_sets.drain_live() {
            self.destroy_descriptor_set_record(record);
        }
        self.render_passes.drain_live();
        for record in self.shader_states.drain_live() {
            self.destroy_shader_state_record(record);
        }

        unsafe {
            for frame in &self.frame_commands {
                self.device.destroy_command_pool(frame.pool, None);
            }
            self.device.destroy_command_pool(self.instant_pool, None);

            if self.timestamp_query_pool != vk::QueryPool::null() {
                self.device
                    .destroy_query_pool(self.timestamp_query_pool, None);
            }

            self.descriptor_pool.destroy(&self.device);
            self.sync.destroy(&self.device);
            self.swapchain
                .destroy(&self.device, &self.surface.swapchain_loader);
            self.surface.destroy();

            // Shutdown allocator BEFORE destroying the device; this frees
            // all VkDeviceMemory allocations.
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

fn report_leaks<T>(kind: &str, pool: &ResourcePool<T>) {
    if pool.used() != 0 {
        tracing::warn!("{} pool has {} unfreed resources", kind, pool.used());
    }
}

fn parent_has_no_allocation() -> GpuError {
    GpuError::InvalidState("buffer has no backing allocation".to_string())
}

fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Queue family indices.
struct QueueFamilyIndices {
    graphics: u32,
    compute: u32,
    transfer: u32,
}

/// Find queue families for graphics, compute, and transfer.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices> {
    let queue_families = instance.get_physical_device_queue_family_properties(physical_device);

    let mut graphics_family = None;
    let mut compute_family = None;
    let mut transfer_family = None;

    for (i, family) in queue_families.iter().enumerate() {
        let i = i as u32;

        // Look for dedicated compute queue (no graphics)
        if family.queue_flags.contains(vk::QueueFlags::COMPUTE)
            && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && compute_family.is_none()
        {
            compute_family = Some(i);
        }

        // Look for dedicated transfer queue (no graphics or compute)
        if family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && !family.queue_flags.contains(vk::QueueFlags::COMPUTE)
            && transfer_family.is_none()
        {
            transfer_family = Some(i);
        }

        // Graphics queue (also supports compute and transfer)
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
            graphics_family = Some(i);
        }
    }

    // Graphics queue is required
    let graphics = graphics_family.ok_or(GpuError::NoSuitableDevice)?;

    // Fall back to graphics queue for compute if no dedicated queue
    let compute = compute_family.unwrap_or(graphics);

    // Fall back to compute queue for transfer if no dedicated queue
    let transfer = transfer_family.unwrap_or(compute);

    Ok(QueueFamilyIndices {
        graphics,
        compute,
        transfer,
    })
}

/// Required device extensions.
fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Create the logical device and retrieve queues.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
) -> Result<(ash::Device, vk::Queue, vk::Queue, vk::Queue)> {
    // Collect unique queue families
    let mut unique_families = std::collections::HashSet::new();
    unique_families.insert(queue_families.graphics);
    unique_families.insert(queue_families.compute);
    unique_families.insert(queue_families.transfer);

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extensions = required_device_extensions();
    let extension_names: Vec<*const i8> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    // Enable Vulkan 1.3 features
    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true)
        .maintenance4(true);

    // Host query reset lets the frame loop recycle timestamp queries
    // without a command buffer.
    let mut vulkan_1_2_features =
        vk::PhysicalDeviceVulkan12Features::default().host_query_reset(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    let graphics_queue = device.get_device_queue(queue_families.graphics, 0);
    let compute_queue = device.get_device_queue(queue_families.compute, 0);
    let transfer_queue = device.get_device_queue(queue_families.transfer, 0);

    Ok((device, graphics_queue, compute_queue, transfer_queue))
}
