//! Command buffer recording.
//!
//! A [`CommandBuffer`] is obtained from the device in the `Initial` state,
//! moves to `Recording` on the first recorded operation, and to `Submitted`
//! when queued back to the device; `reset` returns it to `Initial`. Render
//! pass bracketing is lazy: begin/end pairs are emitted only when `bind_pass`
//! actually changes the open graphics pass.

use crate::device::GpuDevice;
use crate::error::{GpuError, Result};
use crate::resource::{
    BufferHandle, DescriptorKind, DescriptorResource, DescriptorSetHandle, ExecutionBarrier,
    IndexKind, PipelineHandle, QueueType, RenderPassHandle, RenderPassKind,
};
use ash::vk;

/// Maximum descriptor sets bound in one call.
pub const MAX_DESCRIPTOR_SETS: usize = 8;

/// An integer rectangle.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u16,
    pub height: u16,
}

/// A viewport rectangle with depth range.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub rect: Rect2D,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            rect: Rect2D::default(),
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Recording lifecycle of a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    Submitted,
}

/// Which render pass, if any, is currently bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassState {
    #[default]
    None,
    /// A graphics pass with native begin/end bracketing open.
    Graphics(RenderPassHandle),
    /// A compute pass; never bracketed.
    Compute(RenderPassHandle),
}

/// Bracketing actions a `bind_pass` call must emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PassTransition {
    pub end_current: bool,
    pub begin_new: bool,
}

/// Decide bracketing for a transition from `current` to `target`.
///
/// Rebinding the identical graphics pass is a no-op; compute passes end an
/// open graphics pass but never open a bracket of their own.
pub(crate) fn pass_transition(
    current: PassState,
    target: RenderPassHandle,
    target_kind: RenderPassKind,
) -> PassTransition {
    let same = match current {
        PassState::Graphics(h) | PassState::Compute(h) => h == target,
        PassState::None => false,
    };

    let end_current = matches!(current, PassState::Graphics(_)) && !same;
    let begin_new = !same && target_kind != RenderPassKind::Compute;

    PassTransition {
        end_current,
        begin_new,
    }
}

/// Derive the viewport to set, flipping Y.
///
/// The viewport origin is top-left by convention; the native clip space is
/// bottom-left, so Y points at the bottom edge and the height is negative.
/// Defaults come from the bound pass dimensions, or the swapchain when no
/// pass is bound.
pub(crate) fn derive_viewport(
    explicit: Option<&Viewport>,
    pass_dimensions: Option<(u16, u16)>,
    swapchain_dimensions: (u16, u16),
) -> vk::Viewport {
    match explicit {
        Some(viewport) => vk::Viewport {
            x: viewport.rect.x as f32,
            y: f32::from(viewport.rect.height) - viewport.rect.y as f32,
            width: f32::from(viewport.rect.width),
            height: -f32::from(viewport.rect.height),
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        },
        None => {
            let (width, height) = pass_dimensions.unwrap_or(swapchain_dimensions);
            vk::Viewport {
                x: 0.0,
                y: f32::from(height),
                width: f32::from(width),
                height: -f32::from(height),
                min_depth: 0.0,
                max_depth: 1.0,
            }
        }
    }
}

/// Derive the scissor rectangle, defaulting to the full swapchain.
pub(crate) fn derive_scissor(explicit: Option<&Rect2D>, swapchain_dimensions: (u16, u16)) -> vk::Rect2D {
    match explicit {
        Some(rect) => vk::Rect2D {
            offset: vk::Offset2D {
                x: rect.x,
                y: rect.y,
            },
            extent: vk::Extent2D {
                width: u32::from(rect.width),
                height: u32::from(rect.height),
            },
        },
        None => vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: u32::from(swapchain_dimensions.0),
                height: u32::from(swapchain_dimensions.1),
            },
        },
    }
}

/// A recording object bound to a device queue type.
pub struct CommandBuffer {
    pub(crate) raw: vk::CommandBuffer,
    pub(crate) queue_type: QueueType,

    state: RecordingState,
    pass_state: PassState,
    current_pipeline: PipelineHandle,

    // Latched clear values applied at the next pass begin.
    clear_color: vk::ClearColorValue,
    clear_depth_stencil: vk::ClearDepthStencilValue,

    /// Baked buffers keep their recorded commands across `reset`.
    pub baked: bool,
}

impl CommandBuffer {
    pub(crate) fn new(raw: vk::CommandBuffer, queue_type: QueueType, baked: bool) -> Self {
        Self {
            raw,
            queue_type,
            state: RecordingState::Initial,
            pass_state: PassState::None,
            current_pipeline: PipelineHandle::INVALID,
            clear_color: vk::ClearColorValue {
                float32: [0.0; 4],
            },
            clear_depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
            baked,
        }
    }

    /// Queue type this buffer records against.
    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// Currently bound pass, if any.
    pub fn pass_state(&self) -> PassState {
        self.pass_state
    }

    /// Whether any operation has been recorded since the last reset.
    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    fn ensure_recordable(&mut self) -> Result<()> {
        if self.state == RecordingState::Submitted {
            return Err(GpuError::InvalidState(
                "command buffer already submitted".to_string(),
            ));
        }
        self.state = RecordingState::Recording;
        Ok(())
    }

    pub(crate) fn mark_submitted(&mut self) {
        self.state = RecordingState::Submitted;
    }

    /// Bind a render pass, lazily bracketing native begin/end rendering.
    pub fn bind_pass(&mut self, gpu: &mut GpuDevice, handle: RenderPassHandle) -> Result<()> {
        self.ensure_recordable()?;

        let (kind, pass_width, pass_height, color_targets, depth_target, color_op, depth_op) = {
            let render_pass = gpu
                .access_render_pass(handle)
                .ok_or(GpuError::InvalidHandle("render pass"))?;
            (
                render_pass.kind,
                render_pass.width,
                render_pass.height,
                render_pass.color_targets.clone(),
                render_pass.depth_target,
                render_pass.output.color_operation,
                render_pass.output.depth_operation,
            )
        };

        let transition = pass_transition(self.pass_state, handle, kind);

        if transition.end_current {
            unsafe { gpu.raw_device().cmd_end_rendering(self.raw) };
        }

        if transition.begin_new {
            let (width, height) = if kind == RenderPassKind::Swapchain {
                gpu.swapchain_dimensions()
            } else {
                (pass_width, pass_height)
            };

            if kind == RenderPassKind::Swapchain {
                self.prepare_swapchain_targets(gpu);
            }

            let render_area = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: u32::from(width),
                    height: u32::from(height),
                },
            };

            let color_load_op = color_op.to_vk_load_op();
            let depth_load_op = depth_op.to_vk_load_op();

            let mut color_attachments = Vec::new();
            let mut depth_attachment = None;

            if kind == RenderPassKind::Swapchain {
                // The swapchain color view rotates with the acquired image.
                color_attachments.push(
                    vk::RenderingAttachmentInfo::default()
                        .image_view(gpu.current_swapchain_image_view())
                        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .load_op(color_load_op)
                        .store_op(vk::AttachmentStoreOp::STORE)
                        .clear_value(vk::ClearValue {
                            color: self.clear_color,
                        }),
                );

                if let Some(depth) = gpu.access_texture(gpu.depth_texture()) {
                    depth_attachment = Some(
                        vk::RenderingAttachmentInfo::default()
                            .image_view(depth.view)
                            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                            .load_op(depth_load_op)
                            .store_op(vk::AttachmentStoreOp::STORE)
                            .clear_value(vk::ClearValue {
                                depth_stencil: self.clear_depth_stencil,
                            }),
                    );
                }
            } else {
                for &target in &color_targets {
                    let texture = gpu
                        .access_texture(target)
                        .ok_or(GpuError::InvalidHandle("texture"))?;
                    color_attachments.push(
                        vk::RenderingAttachmentInfo::default()
                            .image_view(texture.view)
                            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                            .load_op(color_load_op)
                            .store_op(vk::AttachmentStoreOp::STORE)
                            .clear_value(vk::ClearValue {
                                color: self.clear_color,
                            }),
                    );
                }

                if let Some(depth) = gpu.access_texture(depth_target) {
                    depth_attachment = Some(
                        vk::RenderingAttachmentInfo::default()
                            .image_view(depth.view)
                            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                            .load_op(depth_load_op)
                            .store_op(vk::AttachmentStoreOp::STORE)
                            .clear_value(vk::ClearValue {
                                depth_stencil: self.clear_depth_stencil,
                            }),
                    );
                }
            }

            let mut rendering_info = vk::RenderingInfo::default()
                .render_area(render_area)
                .layer_count(1)
                .color_attachments(&color_attachments);

            if let Some(ref depth) = depth_attachment {
                rendering_info = rendering_info.depth_attachment(depth);
            }

            unsafe { gpu.raw_device().cmd_begin_rendering(self.raw, &rendering_info) };
        }

        // Cache the bound pass.
        self.pass_state = if kind == RenderPassKind::Compute {
            PassState::Compute(handle)
        } else {
            PassState::Graphics(handle)
        };

        Ok(())
    }

    /// First swapchain-pass bind of the frame transitions the acquired
    /// image and the depth target into attachment layouts.
    fn prepare_swapchain_targets(&mut self, gpu: &mut GpuDevice) {
        if gpu.swapchain_image_prepared() {
            return;
        }

        let mut barriers = vec![vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
            .dst_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            )
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .image(gpu.current_swapchain_image())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            )];

        let depth_handle = gpu.depth_texture();
        let depth_needs_transition = gpu
            .access_texture(depth_handle)
            .is_some_and(|depth| depth.state == crate::resource::ResourceState::Undefined);
        if depth_needs_transition {
            if let Some(depth) = gpu.access_texture(depth_handle) {
                barriers.push(
                    vk::ImageMemoryBarrier2::default()
                        .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                        .dst_stage_mask(
                            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                                | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
                        )
                        .dst_access_mask(
                            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                        )
                        .old_layout(vk::ImageLayout::UNDEFINED)
                        .new_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                        .image(depth.raw.image)
                        .subresource_range(
                            vk::ImageSubresourceRange::default()
                                .aspect_mask(vk::ImageAspectFlags::DEPTH)
                                .level_count(1)
                                .layer_count(1),
                        ),
                );
            }
        }

        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);
        unsafe { gpu.raw_device().cmd_pipeline_barrier2(self.raw, &dependency_info) };

        if depth_needs_transition {
            if let Some(depth) = gpu.access_texture_mut(depth_handle) {
                depth.state = crate::resource::ResourceState::DepthWrite;
            }
        }
        gpu.mark_swapchain_image_prepared();
    }

    /// Bind a pipeline.
    pub fn bind_pipeline(&mut self, gpu: &GpuDevice, handle: PipelineHandle) -> Result<()> {
        self.ensure_recordable()?;

        let pipeline = gpu
            .access_pipeline(handle)
            .ok_or(GpuError::InvalidHandle("pipeline"))?;

        unsafe {
            gpu.raw_device()
                .cmd_bind_pipeline(self.raw, pipeline.bind_point, pipeline.raw);
        }

        self.current_pipeline = handle;
        Ok(())
    }

    /// Bind a vertex buffer, resolving sub-allocated children to their
    /// parent allocation and effective offset.
    pub fn bind_vertex_buffer(
        &mut self,
        gpu: &GpuDevice,
        handle: BufferHandle,
        binding: u32,
        offset: u32,
    ) -> Result<()> {
        self.ensure_recordable()?;

        let (vk_buffer, resolved_offset) = gpu.resolve_buffer_binding(handle, offset)?;

        unsafe {
            gpu.raw_device().cmd_bind_vertex_buffers(
                self.raw,
                binding,
                &[vk_buffer],
                &[resolved_offset],
            );
        }
        Ok(())
    }

    /// Bind an index buffer, resolving sub-allocated children.
    pub fn bind_index_buffer(
        &mut self,
        gpu: &GpuDevice,
        handle: BufferHandle,
        offset: u32,
        index_kind: IndexKind,
    ) -> Result<()> {
        self.ensure_recordable()?;

        let (vk_buffer, resolved_offset) = gpu.resolve_buffer_binding(handle, offset)?;

        unsafe {
            gpu.raw_device().cmd_bind_index_buffer(
                self.raw,
                vk_buffer,
                resolved_offset,
                index_kind.to_vk(),
            );
        }
        Ok(())
    }

    /// Bind descriptor sets, gathering dynamic uniform offsets from each
    /// set's layout.
    pub fn bind_descriptor_sets(
        &mut self,
        gpu: &GpuDevice,
        handles: &[DescriptorSetHandle],
    ) -> Result<()> {
        self.ensure_recordable()?;

        if handles.len() > MAX_DESCRIPTOR_SETS {
            return Err(GpuError::InvalidState(format!(
                "at most {MAX_DESCRIPTOR_SETS} descriptor sets may be bound at once"
            )));
        }

        let pipeline = gpu
            .access_pipeline(self.current_pipeline)
            .ok_or_else(|| {
                GpuError::InvalidState("bind_descriptor_sets requires a bound pipeline".to_string())
            })?;

        let mut vk_sets = Vec::with_capacity(handles.len());
        let mut dynamic_offsets = Vec::new();

        for &handle in handles {
            let set = gpu
                .access_descriptor_set(handle)
                .ok_or(GpuError::InvalidHandle("descriptor set"))?;
            vk_sets.push(set.raw);

            let layout = gpu
                .access_descriptor_set_layout(set.layout)
                .ok_or(GpuError::InvalidHandle("descriptor set layout"))?;

            // Uniform buffers bind as DYNAMIC descriptors; gather the
            // current per-frame offset of each one, in binding order.
            for binding in &layout.bindings {
                if binding.kind != DescriptorKind::UniformBuffer {
                    continue;
                }

                let bound = set
                    .bindings
                    .iter()
                    .find(|b| b.binding == binding.index)
                    .ok_or_else(|| {
                        GpuError::InvalidState(format!(
                            "descriptor set missing uniform binding {}",
                            binding.index
                        ))
                    })?;

                let DescriptorResource::Buffer(buffer_handle) = bound.resource else {
                    return Err(GpuError::InvalidState(format!(
                        "uniform binding {} is not a buffer",
                        binding.index
                    )));
                };

                dynamic_offsets.push(gpu.buffer_dynamic_offset(buffer_handle)?);
            }
        }

        unsafe {
            gpu.raw_device().cmd_bind_descriptor_sets(
                self.raw,
                pipeline.bind_point,
                pipeline.layout,
                0,
                &vk_sets,
                &dynamic_offsets,
            );
        }
        Ok(())
    }

    /// Set the viewport; `None` derives it from the bound pass or swapchain.
    pub fn set_viewport(&mut self, gpu: &GpuDevice, viewport: Option<&Viewport>) -> Result<()> {
        self.ensure_recordable()?;

        let pass_dimensions = match self.pass_state {
            PassState::Graphics(handle) | PassState::Compute(handle) => gpu
                .access_render_pass(handle)
                .map(|pass| (pass.width, pass.height)),
            PassState::None => None,
        };

        let vk_viewport = derive_viewport(viewport, pass_dimensions, gpu.swapchain_dimensions());

        unsafe {
            gpu.raw_device().cmd_set_viewport(self.raw, 0, &[vk_viewport]);
        }
        Ok(())
    }

    /// Set the scissor; `None` covers the whole swapchain.
    pub fn set_scissor(&mut self, gpu: &GpuDevice, rect: Option<&Rect2D>) -> Result<()> {
        self.ensure_recordable()?;

        let vk_scissor = derive_scissor(rect, gpu.swapchain_dimensions());

        unsafe {
            gpu.raw_device().cmd_set_scissor(self.raw, 0, &[vk_scissor]);
        }
        Ok(())
    }

    /// Latch the color clear value applied at the next pass begin.
    pub fn clear(&mut self, red: f32, green: f32, blue: f32, alpha: f32) {
        self.clear_color = vk::ClearColorValue {
            float32: [red, green, blue, alpha],
        };
    }

    /// Latch the depth/stencil clear value applied at the next pass begin.
    pub fn clear_depth_stencil(&mut self, depth: f32, stencil: u32) {
        self.clear_depth_stencil = vk::ClearDepthStencilValue { depth, stencil };
    }

    /// Record a non-indexed draw.
    pub fn draw(
        &mut self,
        gpu: &GpuDevice,
        first_vertex: u32,
        vertex_count: u32,
        first_instance: u32,
        instance_count: u32,
    ) -> Result<()> {
        self.ensure_recordable()?;
        unsafe {
            gpu.raw_device().cmd_draw(
                self.raw,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
        Ok(())
    }

    /// Record an indexed draw.
    pub fn draw_indexed(
        &mut self,
        gpu: &GpuDevice,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<()> {
        self.ensure_recordable()?;
        unsafe {
            gpu.raw_device().cmd_draw_indexed(
                self.raw,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
        Ok(())
    }

    /// Record a compute dispatch.
    pub fn dispatch(&mut self, gpu: &GpuDevice, group_x: u32, group_y: u32, group_z: u32) -> Result<()> {
        self.ensure_recordable()?;
        unsafe {
            gpu.raw_device()
                .cmd_dispatch(self.raw, group_x, group_y, group_z);
        }
        Ok(())
    }

    /// Fill a buffer range with a repeated 32-bit value. A zero size fills
    /// from `offset` to the end of the buffer.
    pub fn fill_buffer(
        &mut self,
        gpu: &GpuDevice,
        handle: BufferHandle,
        offset: u32,
        size: u32,
        data: u32,
    ) -> Result<()> {
        self.ensure_recordable()?;

        let buffer = gpu
            .access_buffer(handle)
            .ok_or(GpuError::InvalidHandle("buffer"))?;
        let raw = buffer
            .raw
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("cannot fill a sub-allocated buffer".to_string()))?;

        let fill_size = if size == 0 {
            vk::WHOLE_SIZE
        } else {
            u64::from(size)
        };

        unsafe {
            gpu.raw_device().cmd_fill_buffer(
                self.raw,
                raw.buffer,
                u64::from(offset),
                fill_size,
                data,
            );
        }
        Ok(())
    }

    /// Issue a batch of declarative state transitions as one native
    /// synchronization2 barrier, updating the tracked texture states.
    pub fn barrier(&mut self, gpu: &mut GpuDevice, barrier: &ExecutionBarrier) -> Result<()> {
        self.ensure_recordable()?;

        let mut image_barriers = Vec::with_capacity(barrier.texture_transitions.len());
        for transition in &barrier.texture_transitions {
            let texture = gpu
                .access_texture(transition.texture)
                .ok_or(GpuError::InvalidHandle("texture"))?;

            let aspect = if transition.to.to_vk_layout() == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
                || transition.from.to_vk_layout() == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
            {
                vk::ImageAspectFlags::DEPTH
            } else {
                vk::ImageAspectFlags::COLOR
            };

            image_barriers.push(
                vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(transition.from.to_vk_stage())
                    .src_access_mask(transition.from.to_vk_access())
                    .dst_stage_mask(transition.to.to_vk_stage())
                    .dst_access_mask(transition.to.to_vk_access())
                    .old_layout(transition.from.to_vk_layout())
                    .new_layout(transition.to.to_vk_layout())
                    .image(texture.raw.image)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(aspect)
                            .base_mip_level(0)
                            .level_count(texture.mip_count)
                            .base_array_layer(0)
                            .layer_count(1),
                    ),
            );
        }

        let mut buffer_barriers = Vec::with_capacity(barrier.buffer_transitions.len());
        for transition in &barrier.buffer_transitions {
            let buffer = gpu
                .access_buffer(transition.buffer)
                .ok_or(GpuError::InvalidHandle("buffer"))?;
            let Some(ref raw) = buffer.raw else {
                continue;
            };

            buffer_barriers.push(
                vk::BufferMemoryBarrier2::default()
                    .src_stage_mask(transition.from.to_vk_stage())
                    .src_access_mask(transition.from.to_vk_access())
                    .dst_stage_mask(transition.to.to_vk_stage())
                    .dst_access_mask(transition.to.to_vk_access())
                    .buffer(raw.buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE),
            );
        }

        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers);

        unsafe {
            gpu.raw_device()
                .cmd_pipeline_barrier2(self.raw, &dependency_info);
        }

        for transition in &barrier.texture_transitions {
            if let Some(texture) = gpu.access_texture_mut(transition.texture) {
                texture.state = transition.to;
            }
        }

        Ok(())
    }

    /// Open a named span: always a GPU timestamp, plus a native debug label
    /// when the debug-utils capability was negotiated.
    pub fn push_marker(&mut self, gpu: &mut GpuDevice, name: &str) -> Result<()> {
        self.ensure_recordable()?;

        gpu.push_gpu_timestamp(self.raw, name);
        if gpu.capabilities().supports_debug_utils {
            gpu.push_debug_label(self.raw, name);
        }
        Ok(())
    }

    /// Close the innermost span opened by `push_marker`.
    pub fn pop_marker(&mut self, gpu: &mut GpuDevice) -> Result<()> {
        self.ensure_recordable()?;

        gpu.pop_gpu_timestamp(self.raw);
        if gpu.capabilities().supports_debug_utils {
            gpu.pop_debug_label(self.raw);
        }
        Ok(())
    }

    /// End an open graphics pass bracket, if any. Called by the device at
    /// submission.
    pub(crate) fn end_current_pass(&mut self, device: &ash::Device) {
        if matches!(self.pass_state, PassState::Graphics(_)) {
            unsafe { device.cmd_end_rendering(self.raw) };
        }
        self.pass_state = PassState::None;
    }

    /// Return to the `Initial` state.
    ///
    /// Baked buffers keep their recorded native commands; only the
    /// recording-state tracking resets.
    pub fn reset(&mut self) {
        self.state = RecordingState::Initial;
        self.pass_state = PassState::None;
        self.current_pipeline = PipelineHandle::INVALID;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass_record() -> crate::resource::RenderPass {
        crate::resource::RenderPass {
            kind: RenderPassKind::Geometry,
            width: 0,
            height: 0,
            color_targets: Vec::new(),
            depth_target: crate::resource::TextureHandle::INVALID,
            output: Default::default(),
            name: None,
        }
    }

    /// Two distinct pooled pass handles.
    fn two_handles() -> (RenderPassHandle, RenderPassHandle) {
        let mut pool: prism_core::ResourcePool<crate::resource::RenderPass> =
            prism_core::ResourcePool::new(2);
        (
            pool.obtain(pass_record()).unwrap(),
            pool.obtain(pass_record()).unwrap(),
        )
    }

    #[test]
    fn rebinding_same_graphics_pass_is_idempotent() {
        let (pass, _) = two_handles();

        let first = pass_transition(PassState::None, pass, RenderPassKind::Geometry);
        assert!(first.begin_new);
        assert!(!first.end_current);

        let second = pass_transition(PassState::Graphics(pass), pass, RenderPassKind::Geometry);
        assert!(!second.begin_new);
        assert!(!second.end_current);
    }

    #[test]
    fn switching_graphics_passes_ends_then_begins() {
        let (first, second) = two_handles();

        let transition =
            pass_transition(PassState::Graphics(first), second, RenderPassKind::Geometry);
        assert!(transition.end_current);
        assert!(transition.begin_new);
    }

    #[test]
    fn compute_passes_never_bracket() {
        let (graphics, compute) = two_handles();

        // Compute after graphics closes the open bracket but opens none.
        let transition =
            pass_transition(PassState::Graphics(graphics), compute, RenderPassKind::Compute);
        assert!(transition.end_current);
        assert!(!transition.begin_new);

        // Compute from a clean slate does nothing.
        let transition = pass_transition(PassState::None, compute, RenderPassKind::Compute);
        assert!(!transition.end_current);
        assert!(!transition.begin_new);
    }

    #[test]
    fn default_viewport_flips_y() {
        let viewport = derive_viewport(None, Some((1280, 720)), (640, 480));

        assert_eq!(viewport.y, 720.0);
        assert_eq!(viewport.height, -720.0);
        assert_eq!(viewport.width, 1280.0);
        assert_eq!(viewport.min_depth, 0.0);
        assert_eq!(viewport.max_depth, 1.0);
    }

    #[test]
    fn viewport_falls_back_to_swapchain_without_pass() {
        let viewport = derive_viewport(None, None, (640, 480));

        assert_eq!(viewport.y, 480.0);
        assert_eq!(viewport.height, -480.0);
        assert_eq!(viewport.width, 640.0);
    }

    #[test]
    fn explicit_viewport_inverts_with_offset() {
        let explicit = Viewport {
            rect: Rect2D {
                x: 10,
                y: 20,
                width: 100,
                height: 200,
            },
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let viewport = derive_viewport(Some(&explicit), Some((1280, 720)), (640, 480));
        assert_eq!(viewport.x, 10.0);
        assert_eq!(viewport.y, 180.0);
        assert_eq!(viewport.height, -200.0);
    }

    #[test]
    fn default_scissor_covers_swapchain() {
        let scissor = derive_scissor(None, (800, 600));

        assert_eq!(scissor.offset.x, 0);
        assert_eq!(scissor.extent.width, 800);
        assert_eq!(scissor.extent.height, 600);
    }
}
