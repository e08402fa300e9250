//! Pipeline and shader module creation.

use crate::error::{GpuError, Result};
use crate::resource::{PipelineCreation, ShaderStateCreation};
use ash::vk;

/// Create the shader modules for a program from opaque SPIR-V stages.
///
/// # Safety
/// The device must be valid and each stage must carry valid SPIR-V.
pub unsafe fn create_shader_modules(
    device: &ash::Device,
    creation: &ShaderStateCreation<'_>,
) -> Result<Vec<(vk::ShaderStageFlags, vk::ShaderModule)>> {
    if creation.stages.is_empty() {
        return Err(GpuError::ShaderCreation(
            "shader state needs at least one stage".to_string(),
        ));
    }

    let mut modules = Vec::with_capacity(creation.stages.len());
    for stage in &creation.stages {
        let shader_info = vk::ShaderModuleCreateInfo::default().code(stage.code);
        let module = device.create_shader_module(&shader_info, None).map_err(|e| {
            // Clean up the stages created so far before reporting.
            for &(_, created) in &modules {
                device.destroy_shader_module(created, None);
            }
            GpuError::ShaderCreation(format!("{:?}: {e}", stage.stage))
        })?;
        modules.push((stage.stage, module));
    }

    Ok(modules)
}

/// Destroy a program's shader modules.
///
/// # Safety
/// The device must be valid and no pipeline creation may be using them.
pub unsafe fn destroy_shader_modules(
    device: &ash::Device,
    modules: &[(vk::ShaderStageFlags, vk::ShaderModule)],
) {
    for &(_, module) in modules {
        device.destroy_shader_module(module, None);
    }
}

/// Create a graphics pipeline targeting dynamic rendering.
///
/// # Safety
/// The device, modules, and layouts must be valid.
pub unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    creation: &PipelineCreation<'_>,
    modules: &[(vk::ShaderStageFlags, vk::ShaderModule)],
    set_layouts: &[vk::DescriptorSetLayout],
) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
    let shader_stages: Vec<_> = modules
        .iter()
        .map(|&(stage, module)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(stage)
                .module(module)
                .name(c"main")
        })
        .collect();

    // Vertex input
    let vertex_bindings: Vec<_> = creation
        .vertex_input
        .streams
        .iter()
        .map(|stream| {
            vk::VertexInputBindingDescription::default()
                .binding(stream.binding)
                .stride(stream.stride)
                .input_rate(stream.input_rate)
        })
        .collect();

    let vertex_attributes: Vec<_> = creation
        .vertex_input
        .attributes
        .iter()
        .map(|attr| {
            vk::VertexInputAttributeDescription::default()
                .location(attr.location)
                .binding(attr.binding)
                .offset(attr.offset)
                .format(attr.format.to_vk())
        })
        .collect();

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&vertex_bindings)
        .vertex_attribute_descriptions(&vertex_attributes);

    // Input assembly
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(
            creation
                .topology
                .unwrap_or(vk::PrimitiveTopology::TRIANGLE_LIST),
        )
        .primitive_restart_enable(false);

    // Viewport (dynamic)
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    // Rasterization
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(creation.rasterization.polygon_mode)
        .cull_mode(creation.rasterization.cull_mode)
        .front_face(creation.rasterization.front_face)
        .depth_bias_enable(false)
        .line_width(1.0);

    // Multisampling
    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .sample_shading_enable(false);

    // Depth stencil
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(creation.depth_stencil.depth_test)
        .depth_write_enable(creation.depth_stencil.depth_write)
        .depth_compare_op(creation.depth_stencil.depth_compare)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    // Color blending; attachments without an explicit blend state get none.
    let color_blend_attachments: Vec<_> = creation
        .render_pass
        .color_formats
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let state = creation.blend_states.get(i).copied().unwrap_or_default();
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(state.enabled)
                .src_color_blend_factor(state.source)
                .dst_color_blend_factor(state.destination)
                .color_blend_op(state.operation)
                .src_alpha_blend_factor(state.source)
                .dst_alpha_blend_factor(state.destination)
                .alpha_blend_op(state.operation)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        })
        .collect();

    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    // Dynamic state
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    // Pipeline layout
    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);

    let layout = device
        .create_pipeline_layout(&layout_info, None)
        .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;

    // Dynamic rendering info (Vulkan 1.3)
    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&creation.render_pass.color_formats);

    if creation.render_pass.depth_format != vk::Format::UNDEFINED {
        rendering_info = rendering_info.depth_attachment_format(creation.render_pass.depth_format);
    }

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info);

    let pipelines = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        .map_err(|(_pipelines, e)| {
            device.destroy_pipeline_layout(layout, None);
            GpuError::PipelineCreation(e.to_string())
        })?;

    Ok((pipelines[0], layout))
}

/// Create a compute pipeline from a single compute module.
///
/// # Safety
/// The device, module, and layouts must be valid.
pub unsafe fn create_compute_pipeline(
    device: &ash::Device,
    module: vk::ShaderModule,
    set_layouts: &[vk::DescriptorSetLayout],
) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
    let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);

    let layout = device
        .create_pipeline_layout(&layout_info, None)
        .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;

    let stage_info = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(c"main");

    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage_info)
        .layout(layout);

    let pipelines = device
        .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        .map_err(|(_pipelines, e)| {
            device.destroy_pipeline_layout(layout, None);
            GpuError::PipelineCreation(e.to_string())
        })?;

    Ok((pipelines[0], layout))
}
