use std::ffi::CStr;
use ash::vk;
use color_eyre::Result;
use crate::renderer::graph::pipeline::PipelineStates;

/// Color image plus its view, used as the single attachment of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Shader stage after its module has been created on the device.
pub struct CompiledStage<'a> {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: &'a CStr,
}

pub struct GraphicsPipelineDesc<'a> {
    pub name: &'a str,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub stages: &'a [CompiledStage<'a>],
    pub states: &'a PipelineStates,
}

/// Everything the graph needs from an initialized device.
///
/// Handles returned here are owned by the implementation and live until it is
/// dropped.
pub trait DeviceContext {
    fn queue_family_index(&self) -> u32;

    /// 2D, single mip, single layer, optimal tiling color image usable as a
    /// color attachment and as a transfer source.
    fn create_color_target(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<ColorTarget>;

    /// One color attachment (clear / store, `UNDEFINED` to
    /// `COLOR_ATTACHMENT_OPTIMAL`), one subpass and an external dependency on
    /// the color-attachment-output stage.
    fn create_color_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass>;

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule>;

    fn create_pipeline_layout(
        &self,
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<vk::PipelineLayout>;

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<vk::Pipeline>;

    fn set_debug_name(
        &self,
        object_type: vk::ObjectType,
        handle: u64,
        name: &str,
    ) -> Result<()>;
}

pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub render_area: vk::Rect2D,
    pub clear_color: [f32; 4],
}

/// Command-buffer recording surface used while traversing a compiled graph.
pub trait CommandRecorder {
    fn begin_render_pass(&mut self, begin: &RenderPassBegin);
    fn set_viewport(&mut self, area: vk::Rect2D);
    fn bind_graphics_pipeline(&mut self, pipeline: vk::Pipeline);
    fn push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stage_flags: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn end_render_pass(&mut self);
}
