use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::device::DeviceContext;
use crate::renderer::graph::node::{Command, Draw, PassContent, PassKind, PassNode, PushConstants, StateGroup};
use crate::renderer::graph::pipeline::{FullscreenStates, GraphicsPipelineConfigurator, ShaderSet, ShaderStage};
use crate::renderer::graph::view::View;
use crate::renderer::shaders::{self, FragmentVariant};

/// Size of the `vec4` push-constant block read by the push-constant fragment program.
pub const PUSH_CONSTANT_SIZE: u32 = size_of::<glam::Vec4>() as u32;

/// Builds self-contained pass nodes against a device.
pub struct PassBuilder<'a> {
    device: &'a dyn DeviceContext,
    config: &'a RenderConfig,
}

impl<'a> PassBuilder<'a> {
    pub fn new(device: &'a dyn DeviceContext, config: &'a RenderConfig) -> Self {
        Self { device, config }
    }

    /// Pass that traverses `view`. The view is shared, not copied.
    pub fn scene_pass(&self, view: Arc<View>) -> Result<PassNode> {
        self.pass(PassKind::Scene, PassContent::Scene(view))
    }

    pub fn fullscreen_pass(&self, variant: FragmentVariant) -> Result<PassNode> {
        let kind = match variant {
            FragmentVariant::Simple => PassKind::SimpleFullscreen,
            FragmentVariant::PushConstants => PassKind::PushConstFullscreen,
        };
        let state_group = self.fullscreen_state_group(variant)?;
        self.pass(kind, PassContent::Fullscreen(state_group))
    }

    /// Pipeline configuration and draw commands of a full-screen pass.
    pub fn fullscreen_state_group(&self, variant: FragmentVariant) -> Result<StateGroup> {
        let vert_stage = ShaderStage::new(
            vk::ShaderStageFlags::VERTEX,
            "main",
            shaders::fullscreen_vertex_spirv()?,
        )?;
        let frag_stage = ShaderStage::new(
            vk::ShaderStageFlags::FRAGMENT,
            "main",
            variant.spirv()?,
        )?;

        let mut shader_set = ShaderSet::new([vert_stage, frag_stage]);
        if variant.needs_push_constants() {
            shader_set.add_push_constant_range(
                "pc",
                "",
                vk::ShaderStageFlags::FRAGMENT,
                0,
                PUSH_CONSTANT_SIZE,
            );
        }

        let mut config = GraphicsPipelineConfigurator::new(shader_set);
        config.accept(&mut FullscreenStates);
        let pipeline = config.init(variant.debug_name());

        let mut state_group = StateGroup::new(variant.debug_name(), Arc::new(pipeline));

        if variant.needs_push_constants() {
            state_group.add_child(Command::PushConstants(PushConstants::new(
                vk::ShaderStageFlags::FRAGMENT,
                0,
                self.config.push_constant_color,
            )));
        }

        state_group.add_child(Command::Draw(Draw::FULLSCREEN_TRIANGLE));

        Ok(state_group)
    }

    fn pass(&self, kind: PassKind, content: PassContent) -> Result<PassNode> {
        let extent = self.config.extent;
        let format = self.config.color_format;

        let target = self.device.create_color_target(
            extent,
            format,
            vk::SampleCountFlags::TYPE_1,
        )?;
        let render_pass = self.device.create_color_render_pass(format)?;
        let framebuffer = self.device.create_framebuffer(
            render_pass,
            &[target.view],
            extent,
        )?;

        log::debug!("Built {:?} pass ({}x{})", kind, extent.width, extent.height);

        Ok(PassNode {
            kind,
            target,
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_color: self.config.clear_color,
            content,
        })
    }
}
