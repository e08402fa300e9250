//! Vulkan abstraction layer for the Prism engine.
//!
//! This crate provides:
//! - A `GpuDevice` façade owning the instance, device, queues, and swapchain
//! - Handle-based resource pools for every GPU object kind
//! - An ordered `CommandBuffer` recording model with lazy pass bracketing
//! - Deferred multi-frame-in-flight resource destruction
//! - GPU timestamp collection and host-side profiling

pub mod capabilities;
pub mod command;
pub mod deferred;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod profiler;
pub mod resource;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use command::{CommandBuffer, PassState, Rect2D, Viewport};
pub use deferred::{DeferredResource, DestructionQueue};
pub use descriptors::DescriptorPoolCreation;
pub use device::{GpuDevice, GpuDeviceBuilder, ResourcePoolCreation};
pub use error::{GpuError, Result};
pub use profiler::{GpuProfiler, GpuTimestamp, GpuTimestampManager};
pub use resource::{
    BlendState, Buffer, BufferCreation, BufferDescription, BufferHandle, BufferTransition,
    DepthStencilCreation, DescriptorBinding, DescriptorKind, DescriptorResource, DescriptorSet,
    DescriptorSetBinding, DescriptorSetCreation, DescriptorSetDescription, DescriptorSetHandle,
    DescriptorSetLayout, DescriptorSetLayoutCreation, DescriptorSetLayoutDescription,
    DescriptorSetLayoutHandle, ExecutionBarrier, IndexKind, MapBufferParameters, Pipeline,
    PipelineCreation, PipelineDescription, PipelineHandle, PresentMode, QueueType,
    RasterizationCreation, RenderPass, RenderPassCreation, RenderPassHandle, RenderPassKind,
    RenderPassOutput, RenderTargetOperation, ResourceState, ResourceUsage, Sampler,
    SamplerCreation, SamplerDescription, SamplerHandle, ShaderStage, ShaderState,
    ShaderStateCreation, ShaderStateDescription, ShaderStateHandle, Texture, TextureCreation,
    TextureDescription, TextureFlags, TextureHandle, TextureKind, TextureTransition,
    VertexAttribute, VertexComponentFormat, VertexInputCreation, VertexStream,
};
