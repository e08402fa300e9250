//! GPU resource records, creation structs, and query descriptions.
//!
//! Every resource kind is a plain record stored by value inside its pool;
//! records reference dependent resources by handle, never by ownership. The
//! matching `*Creation` structs are plain configuration values with
//! documented defaults and chainable setters.

use crate::memory::{RawBuffer, RawImage};
use ash::vk;
use bitflags::bitflags;
use prism_core::Handle;

pub type BufferHandle = Handle<Buffer>;
pub type TextureHandle = Handle<Texture>;
pub type PipelineHandle = Handle<Pipeline>;
pub type SamplerHandle = Handle<Sampler>;
pub type DescriptorSetLayoutHandle = Handle<DescriptorSetLayout>;
pub type DescriptorSetHandle = Handle<DescriptorSet>;
pub type RenderPassHandle = Handle<RenderPass>;
pub type ShaderStateHandle = Handle<ShaderState>;

/// Queue a command buffer records against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

/// How a buffer's contents change over its lifetime.
///
/// `Dynamic` buffers are sub-allocated from the device's per-frame ring and
/// re-pointed every frame; `Immutable` and `Stream` buffers own their
/// allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceUsage {
    #[default]
    Immutable,
    Dynamic,
    Stream,
}

/// Render pass classification.
///
/// Only graphics passes (`Geometry`, `Swapchain`) are bracketed with native
/// begin/end rendering; `Compute` passes never are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPassKind {
    Geometry,
    Swapchain,
    Compute,
}

/// Load behavior of a render target at pass begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderTargetOperation {
    #[default]
    DontCare,
    Load,
    Clear,
}

impl RenderTargetOperation {
    pub(crate) fn to_vk_load_op(self) -> vk::AttachmentLoadOp {
        match self {
            Self::DontCare => vk::AttachmentLoadOp::DONT_CARE,
            Self::Load => vk::AttachmentLoadOp::LOAD,
            Self::Clear => vk::AttachmentLoadOp::CLEAR,
        }
    }
}

/// Texture dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureKind {
    Texture1D,
    #[default]
    Texture2D,
    Texture3D,
}

impl TextureKind {
    pub(crate) fn to_vk_image_type(self) -> vk::ImageType {
        match self {
            Self::Texture1D => vk::ImageType::TYPE_1D,
            Self::Texture2D => vk::ImageType::TYPE_2D,
            Self::Texture3D => vk::ImageType::TYPE_3D,
        }
    }

    pub(crate) fn to_vk_view_type(self) -> vk::ImageViewType {
        match self {
            Self::Texture1D => vk::ImageViewType::TYPE_1D,
            Self::Texture2D => vk::ImageViewType::TYPE_2D,
            Self::Texture3D => vk::ImageViewType::TYPE_3D,
        }
    }
}

bitflags! {
    /// Texture capability flags beyond plain sampling.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TextureFlags: u8 {
        /// Usable as a color or depth attachment.
        const RENDER_TARGET = 1 << 0;
        /// Usable as a storage image from compute.
        const COMPUTE = 1 << 1;
    }
}

/// Presentation pacing requested for the swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentMode {
    Immediate,
    #[default]
    Vsync,
    VsyncFast,
    VsyncRelaxed,
}

/// Index element width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    #[default]
    U16,
    U32,
}

impl IndexKind {
    pub(crate) fn to_vk(self) -> vk::IndexType {
        match self {
            Self::U16 => vk::IndexType::UINT16,
            Self::U32 => vk::IndexType::UINT32,
        }
    }
}

/// Logical state a resource is in on the GPU timeline, used to derive
/// synchronization2 barriers without exposing native stage/access flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceState {
    #[default]
    Undefined,
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthWrite,
    CopySource,
    CopyDest,
    Present,
}

impl ResourceState {
    pub(crate) fn to_vk_layout(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::ShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::UnorderedAccess => vk::ImageLayout::GENERAL,
            Self::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::DepthWrite => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            Self::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::CopyDest => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    pub(crate) fn to_vk_stage(self) -> vk::PipelineStageFlags2 {
        match self {
            Self::Undefined => vk::PipelineStageFlags2::TOP_OF_PIPE,
            Self::ShaderResource => {
                vk::PipelineStageFlags2::FRAGMENT_SHADER
                    | vk::PipelineStageFlags2::COMPUTE_SHADER
            }
            Self::UnorderedAccess => vk::PipelineStageFlags2::COMPUTE_SHADER,
            Self::RenderTarget => vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            Self::DepthWrite => {
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS
            }
            Self::CopySource | Self::CopyDest => vk::PipelineStageFlags2::TRANSFER,
            Self::Present => vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        }
    }

    pub(crate) fn to_vk_access(self) -> vk::AccessFlags2 {
        match self {
            Self::Undefined | Self::Present => vk::AccessFlags2::NONE,
            Self::ShaderResource => vk::AccessFlags2::SHADER_READ,
            Self::UnorderedAccess => {
                vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE
            }
            Self::RenderTarget => {
                vk::AccessFlags2::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
            }
            Self::DepthWrite => {
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Self::CopySource => vk::AccessFlags2::TRANSFER_READ,
            Self::CopyDest => vk::AccessFlags2::TRANSFER_WRITE,
        }
    }
}

/// Per-vertex attribute component layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexComponentFormat {
    Float,
    Float2,
    Float3,
    Float4,
    Byte4N,
    UByte4N,
    Short2N,
    Short4N,
    Uint,
    Uint2,
    Uint4,
}

impl VertexComponentFormat {
    pub(crate) fn to_vk(self) -> vk::Format {
        match self {
            Self::Float => vk::Format::R32_SFLOAT,
            Self::Float2 => vk::Format::R32G32_SFLOAT,
            Self::Float3 => vk::Format::R32G32B32_SFLOAT,
            Self::Float4 => vk::Format::R32G32B32A32_SFLOAT,
            Self::Byte4N => vk::Format::R8G8B8A8_SNORM,
            Self::UByte4N => vk::Format::R8G8B8A8_UNORM,
            Self::Short2N => vk::Format::R16G16_SNORM,
            Self::Short4N => vk::Format::R16G16B16A16_SNORM,
            Self::Uint => vk::Format::R32_UINT,
            Self::Uint2 => vk::Format::R32G32_UINT,
            Self::Uint4 => vk::Format::R32G32B32A32_UINT,
        }
    }
}

/// Descriptor binding classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// Bound as a dynamic uniform buffer so per-frame ring offsets flow
    /// through `bind_descriptor_set` without descriptor churn.
    UniformBuffer,
    StorageBuffer,
    SampledTexture,
    StorageTexture,
    Sampler,
}

impl DescriptorKind {
    pub(crate) fn to_vk(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            Self::SampledTexture => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::StorageTexture => vk::DescriptorType::STORAGE_IMAGE,
            Self::Sampler => vk::DescriptorType::SAMPLER,
        }
    }
}

// Records ////////////////////////////////////////////////////////////////

/// A pooled buffer record.
///
/// `raw` is `None` for sub-allocated children, whose bytes live inside
/// `parent`'s allocation at `sub_offset`. The per-frame ring cursor for
/// `Dynamic` buffers is tracked separately in `dynamic_offset`; the two
/// offsets are never mixed.
pub struct Buffer {
    pub(crate) raw: Option<RawBuffer>,
    pub usage: vk::BufferUsageFlags,
    pub size: u32,
    pub usage_kind: ResourceUsage,
    pub parent: BufferHandle,
    pub sub_offset: u32,
    pub dynamic_offset: u32,
    pub host_visible: bool,
    pub name: Option<String>,
}

/// A pooled texture record.
pub struct Texture {
    pub(crate) raw: RawImage,
    pub(crate) view: vk::ImageView,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_count: u32,
    pub flags: TextureFlags,
    pub kind: TextureKind,
    /// Sampler used for combined-image-sampler writes; the device default
    /// until `link_texture_sampler` overrides it.
    pub sampler: SamplerHandle,
    pub state: ResourceState,
    pub name: Option<String>,
}

/// A pooled sampler record.
pub struct Sampler {
    pub(crate) raw: vk::Sampler,
    pub min_filter: vk::Filter,
    pub mag_filter: vk::Filter,
    pub mip_filter: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub name: Option<String>,
}

/// One binding slot in a descriptor set layout.
#[derive(Debug, Clone)]
pub struct DescriptorBinding {
    pub kind: DescriptorKind,
    pub index: u32,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    pub fn new(kind: DescriptorKind, index: u32, stages: vk::ShaderStageFlags) -> Self {
        Self {
            kind,
            index,
            count: 1,
            stages,
        }
    }
}

/// A pooled descriptor set layout record.
pub struct DescriptorSetLayout {
    pub(crate) raw: vk::DescriptorSetLayout,
    pub bindings: Vec<DescriptorBinding>,
    pub name: Option<String>,
}

/// Resource bound into one descriptor slot.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorResource {
    Buffer(BufferHandle),
    /// Sampled with the texture's linked sampler.
    Texture(TextureHandle),
    TextureSampler(TextureHandle, SamplerHandle),
    Sampler(SamplerHandle),
}

/// One populated slot of a descriptor set.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorSetBinding {
    pub binding: u32,
    pub resource: DescriptorResource,
}

/// A pooled descriptor set record.
pub struct DescriptorSet {
    pub(crate) raw: vk::DescriptorSet,
    pub layout: DescriptorSetLayoutHandle,
    pub bindings: Vec<DescriptorSetBinding>,
    pub name: Option<String>,
}

/// Formats and load operations a render pass writes to, used both for pass
/// bracketing and for pipeline creation against that pass.
#[derive(Debug, Clone)]
pub struct RenderPassOutput {
    pub color_formats: Vec<vk::Format>,
    /// `vk::Format::UNDEFINED` when the pass has no depth target.
    pub depth_format: vk::Format,
    pub color_operation: RenderTargetOperation,
    pub depth_operation: RenderTargetOperation,
    pub stencil_operation: RenderTargetOperation,
}

impl Default for RenderPassOutput {
    fn default() -> Self {
        Self {
            color_formats: Vec::new(),
            depth_format: vk::Format::UNDEFINED,
            color_operation: RenderTargetOperation::DontCare,
            depth_operation: RenderTargetOperation::DontCare,
            stencil_operation: RenderTargetOperation::DontCare,
        }
    }
}

/// A pooled render pass record.
///
/// With dynamic rendering there is no native pass object; the record only
/// declares targets and dimensions, and bracketing assembles the native
/// begin info on demand. The swapchain pass keeps no target handles: its
/// color view rotates with the acquired image index.
pub struct RenderPass {
    pub kind: RenderPassKind,
    pub width: u16,
    pub height: u16,
    pub color_targets: Vec<TextureHandle>,
    pub depth_target: TextureHandle,
    pub output: RenderPassOutput,
    pub name: Option<String>,
}

/// A pooled shader state record: the compiled modules of one program.
pub struct ShaderState {
    pub(crate) modules: Vec<(vk::ShaderStageFlags, vk::ShaderModule)>,
    pub is_graphics: bool,
    pub name: Option<String>,
}

/// A pooled pipeline record.
pub struct Pipeline {
    pub(crate) raw: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) bind_point: vk::PipelineBindPoint,
    pub shader_state: ShaderStateHandle,
    pub descriptor_set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub name: Option<String>,
}

// Creation structs ///////////////////////////////////////////////////////

/// Buffer creation parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferCreation<'a> {
    pub usage: vk::BufferUsageFlags,
    pub usage_kind: ResourceUsage,
    pub size: u32,
    /// Bytes copied into the buffer at creation; device-local buffers
    /// upload through a staging buffer.
    pub initial_data: Option<&'a [u8]>,
    /// Sub-allocate inside an existing buffer instead of allocating.
    pub parent: BufferHandle,
    pub sub_offset: u32,
    pub persistent: bool,
    pub name: Option<&'a str>,
}

impl<'a> BufferCreation<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_usage(mut self, usage: vk::BufferUsageFlags, kind: ResourceUsage) -> Self {
        self.usage = usage;
        self.usage_kind = kind;
        self
    }

    pub fn set_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn set_data(mut self, data: &'a [u8]) -> Self {
        self.initial_data = Some(data);
        self
    }

    pub fn set_parent(mut self, parent: BufferHandle, sub_offset: u32) -> Self {
        self.parent = parent;
        self.sub_offset = sub_offset;
        self
    }

    pub fn set_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn set_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }
}

/// Texture creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct TextureCreation<'a> {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_count: u32,
    pub flags: TextureFlags,
    pub format: vk::Format,
    pub kind: TextureKind,
    /// Tightly packed level-0 pixels, uploaded through staging.
    pub initial_data: Option<&'a [u8]>,
    pub name: Option<&'a str>,
}

impl Default for TextureCreation<'_> {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth: 1,
            mip_count: 1,
            flags: TextureFlags::empty(),
            format: vk::Format::R8G8B8A8_UNORM,
            kind: TextureKind::Texture2D,
            initial_data: None,
            name: None,
        }
    }
}

impl<'a> TextureCreation<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_size(mut self, width: u32, height: u32, depth: u32) -> Self {
        self.width = width;
        self.height = height;
        self.depth = depth;
        self
    }

    pub fn set_format_kind(mut self, format: vk::Format, kind: TextureKind) -> Self {
        self.format = format;
        self.kind = kind;
        self
    }

    pub fn set_flags(mut self, mip_count: u32, flags: TextureFlags) -> Self {
        self.mip_count = mip_count;
        self.flags = flags;
        self
    }

    pub fn set_data(mut self, data: &'a [u8]) -> Self {
        self.initial_data = Some(data);
        self
    }

    pub fn set_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }
}

/// Sampler creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct SamplerCreation<'a> {
    pub min_filter: vk::Filter,
    pub mag_filter: vk::Filter,
    pub mip_filter: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub name: Option<&'a str>,
}

impl Default for SamplerCreation<'_> {
    fn default() -> Self {
        Self {
            min_filter: vk::Filter::NEAREST,
            mag_filter: vk::Filter::NEAREST,
            mip_filter: vk::SamplerMipmapMode::NEAREST,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            name: None,
        }
    }
}

impl<'a> SamplerCreation<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_min_mag_mip(
        mut self,
        min: vk::Filter,
        mag: vk::Filter,
        mip: vk::SamplerMipmapMode,
    ) -> Self {
        self.min_filter = min;
        self.mag_filter = mag;
        self.mip_filter = mip;
        self
    }

    pub fn set_address_modes(
        mut self,
        u: vk::SamplerAddressMode,
        v: vk::SamplerAddressMode,
        w: vk::SamplerAddressMode,
    ) -> Self {
        self.address_mode_u = u;
        self.address_mode_v = v;
        self.address_mode_w = w;
        self
    }

    pub fn set_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }
}

/// Descriptor set layout creation parameters.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutCreation<'a> {
    pub bindings: Vec<DescriptorBinding>,
    pub name: Option<&'a str>,
}

impl<'a> DescriptorSetLayoutCreation<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(mut self, binding: DescriptorBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn set_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }
}

/// Descriptor set creation parameters.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetCreation<'a> {
    pub layout: DescriptorSetLayoutHandle,
    pub bindings: Vec<DescriptorSetBinding>,
    pub name: Option<&'a str>,
}

impl<'a> DescriptorSetCreation<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_layout(mut self, layout: DescriptorSetLayoutHandle) -> Self {
        self.layout = layout;
        self
    }

    pub fn bind(mut self, binding: u32, resource: DescriptorResource) -> Self {
        self.bindings.push(DescriptorSetBinding { binding, resource });
        self
    }

    pub fn set_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }
}

/// Render pass creation parameters.
#[derive(Debug, Clone)]
pub struct RenderPassCreation<'a> {
    pub kind: RenderPassKind,
    pub color_targets: Vec<TextureHandle>,
    pub depth_target: TextureHandle,
    pub color_operation: RenderTargetOperation,
    pub depth_operation: RenderTargetOperation,
    pub stencil_operation: RenderTargetOperation,
    pub name: Option<&'a str>,
}

impl Default for RenderPassCreation<'_> {
    fn default() -> Self {
        Self {
            kind: RenderPassKind::Geometry,
            color_targets: Vec::new(),
            depth_target: TextureHandle::INVALID,
            color_operation: RenderTargetOperation::DontCare,
            depth_operation: RenderTargetOperation::DontCare,
            stencil_operation: RenderTargetOperation::DontCare,
            name: None,
        }
    }
}

impl<'a> RenderPassCreation<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_kind(mut self, kind: RenderPassKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn add_color_target(mut self, texture: TextureHandle) -> Self {
        self.color_targets.push(texture);
        self
    }

    pub fn set_depth_target(mut self, texture: TextureHandle) -> Self {
        self.depth_target = texture;
        self
    }

    pub fn set_operations(
        mut self,
        color: RenderTargetOperation,
        depth: RenderTargetOperation,
        stencil: RenderTargetOperation,
    ) -> Self {
        self.color_operation = color;
        self.depth_operation = depth;
        self.stencil_operation = stencil;
        self
    }

    pub fn set_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }
}

/// One SPIR-V stage of a shader program. The word stream is opaque.
#[derive(Debug, Clone, Copy)]
pub struct ShaderStage<'a> {
    pub code: &'a [u32],
    pub stage: vk::ShaderStageFlags,
}

/// Shader state creation parameters.
#[derive(Debug, Clone, Default)]
pub struct ShaderStateCreation<'a> {
    pub stages: Vec<ShaderStage<'a>>,
    pub name: Option<&'a str>,
}

impl<'a> ShaderStateCreation<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(mut self, code: &'a [u32], stage: vk::ShaderStageFlags) -> Self {
        self.stages.push(ShaderStage { code, stage });
        self
    }

    pub fn set_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }
}

/// One vertex attribute.
#[derive(Debug, Clone, Copy)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub offset: u32,
    pub format: VertexComponentFormat,
}

/// One vertex buffer binding slot.
#[derive(Debug, Clone, Copy)]
pub struct VertexStream {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
}

/// Vertex input layout.
#[derive(Debug, Clone, Default)]
pub struct VertexInputCreation {
    pub streams: Vec<VertexStream>,
    pub attributes: Vec<VertexAttribute>,
}

/// Rasterizer state.
#[derive(Debug, Clone, Copy)]
pub struct RasterizationCreation {
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub polygon_mode: vk::PolygonMode,
}

impl Default for RasterizationCreation {
    fn default() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            polygon_mode: vk::PolygonMode::FILL,
        }
    }
}

/// Depth/stencil state.
#[derive(Debug, Clone, Copy)]
pub struct DepthStencilCreation {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
}

impl Default for DepthStencilCreation {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::ALWAYS,
        }
    }
}

/// Per-attachment blend state.
#[derive(Debug, Clone, Copy)]
pub struct BlendState {
    pub enabled: bool,
    pub source: vk::BlendFactor,
    pub destination: vk::BlendFactor,
    pub operation: vk::BlendOp,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            enabled: false,
            source: vk::BlendFactor::ONE,
            destination: vk::BlendFactor::ONE,
            operation: vk::BlendOp::ADD,
        }
    }
}

/// Pipeline creation parameters.
#[derive(Debug, Clone, Default)]
pub struct PipelineCreation<'a> {
    pub shaders: ShaderStateCreation<'a>,
    pub vertex_input: VertexInputCreation,
    pub rasterization: RasterizationCreation,
    pub depth_stencil: DepthStencilCreation,
    /// One entry per color target; missing entries default to no blending.
    pub blend_states: Vec<BlendState>,
    pub topology: Option<vk::PrimitiveTopology>,
    pub descriptor_set_layouts: Vec<DescriptorSetLayoutHandle>,
    /// Formats of the pass this pipeline renders into.
    pub render_pass: RenderPassOutput,
    pub name: Option<&'a str>,
}

impl<'a> PipelineCreation<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_shaders(mut self, shaders: ShaderStateCreation<'a>) -> Self {
        self.shaders = shaders;
        self
    }

    pub fn add_descriptor_set_layout(mut self, layout: DescriptorSetLayoutHandle) -> Self {
        self.descriptor_set_layouts.push(layout);
        self
    }

    pub fn set_render_pass_output(mut self, output: RenderPassOutput) -> Self {
        self.render_pass = output;
        self
    }

    pub fn set_name(mut self, name: &'a str) -> Self {
        self.name = Some(name);
        self
    }
}

// Query descriptions /////////////////////////////////////////////////////

/// Live configuration of a buffer, copied back by `query_buffer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescription {
    pub usage: vk::BufferUsageFlags,
    pub usage_kind: ResourceUsage,
    pub size: u32,
    pub parent: BufferHandle,
    pub host_visible: bool,
    pub name: Option<String>,
}

/// Live configuration of a texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescription {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_count: u32,
    pub format: vk::Format,
    pub kind: TextureKind,
    pub flags: TextureFlags,
    pub name: Option<String>,
}

/// Live configuration of a sampler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerDescription {
    pub min_filter: vk::Filter,
    pub mag_filter: vk::Filter,
    pub mip_filter: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub name: Option<String>,
}

/// Live configuration of a descriptor set layout.
#[derive(Debug, Clone)]
pub struct DescriptorSetLayoutDescription {
    pub bindings: Vec<DescriptorBinding>,
    pub name: Option<String>,
}

/// Live configuration of a descriptor set.
#[derive(Debug, Clone)]
pub struct DescriptorSetDescription {
    pub layout: DescriptorSetLayoutHandle,
    pub bindings: Vec<DescriptorSetBinding>,
    pub name: Option<String>,
}

/// Live configuration of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescription {
    pub shader_state: ShaderStateHandle,
    pub descriptor_set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub name: Option<String>,
}

/// Live configuration of a shader state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderStateDescription {
    pub stage_count: u32,
    pub is_graphics: bool,
    pub name: Option<String>,
}

// Mapping and barriers ///////////////////////////////////////////////////

/// Scoped access to a mappable buffer range.
#[derive(Debug, Clone, Copy)]
pub struct MapBufferParameters {
    pub buffer: BufferHandle,
    pub offset: u32,
    /// Zero maps the whole buffer.
    pub size: u32,
}

/// A declarative texture state transition.
#[derive(Debug, Clone, Copy)]
pub struct TextureTransition {
    pub texture: TextureHandle,
    pub from: ResourceState,
    pub to: ResourceState,
}

/// A declarative buffer state transition.
#[derive(Debug, Clone, Copy)]
pub struct BufferTransition {
    pub buffer: BufferHandle,
    pub from: ResourceState,
    pub to: ResourceState,
}

/// A batch of transitions issued as one native barrier.
#[derive(Debug, Clone, Default)]
pub struct ExecutionBarrier {
    pub texture_transitions: Vec<TextureTransition>,
    pub buffer_transitions: Vec<BufferTransition>,
}

impl ExecutionBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_texture(mut self, texture: TextureHandle, from: ResourceState, to: ResourceState) -> Self {
        self.texture_transitions.push(TextureTransition { texture, from, to });
        self
    }

    pub fn add_buffer(mut self, buffer: BufferHandle, from: ResourceState, to: ResourceState) -> Self {
        self.buffer_transitions.push(BufferTransition { buffer, from, to });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_creation_defaults() {
        let creation = BufferCreation::new();

        assert_eq!(creation.size, 0);
        assert_eq!(creation.usage_kind, ResourceUsage::Immutable);
        assert!(creation.initial_data.is_none());
        assert!(!creation.parent.is_valid());
        assert_eq!(creation.sub_offset, 0);
    }

    #[test]
    fn texture_creation_defaults() {
        let creation = TextureCreation::new();

        assert_eq!((creation.width, creation.height, creation.depth), (1, 1, 1));
        assert_eq!(creation.mip_count, 1);
        assert_eq!(creation.kind, TextureKind::Texture2D);
        assert!(creation.flags.is_empty());
    }

    #[test]
    fn creation_setters_chain() {
        let creation = BufferCreation::new()
            .set_usage(vk::BufferUsageFlags::UNIFORM_BUFFER, ResourceUsage::Dynamic)
            .set_size(512)
            .set_name("per-frame constants");

        assert_eq!(creation.size, 512);
        assert_eq!(creation.usage_kind, ResourceUsage::Dynamic);
        assert_eq!(creation.usage, vk::BufferUsageFlags::UNIFORM_BUFFER);
        assert_eq!(creation.name, Some("per-frame constants"));
    }

    #[test]
    fn uniform_buffers_bind_as_dynamic() {
        // Per-frame ring offsets are delivered through dynamic uniform
        // binds, so plain uniform bindings must translate to the DYNAMIC
        // descriptor type.
        assert_eq!(
            DescriptorKind::UniformBuffer.to_vk(),
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        );
    }

    #[test]
    fn resource_state_layout_mapping() {
        assert_eq!(
            ResourceState::RenderTarget.to_vk_layout(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            ResourceState::Present.to_vk_layout(),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(
            ResourceState::Undefined.to_vk_access(),
            vk::AccessFlags2::NONE
        );
    }
}
