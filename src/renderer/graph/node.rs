use std::sync::Arc;
use ash::vk;
use glam::Vec4;
use crate::renderer::device::ColorTarget;
use crate::renderer::graph::pipeline::{GraphicsPipeline, PushConstantSpan};
use crate::renderer::graph::view::View;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Draw {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl Draw {
    /// Full-screen triangle, positions come from the vertex index.
    pub const FULLSCREEN_TRIANGLE: Draw = Draw {
        vertex_count: 3,
        instance_count: 1,
        first_vertex: 0,
        first_instance: 0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PushConstants {
    pub stage_flags: vk::ShaderStageFlags,
    pub offset: u32,
    pub value: Vec4,
}

impl PushConstants {
    pub fn new(stage_flags: vk::ShaderStageFlags, offset: u32, value: Vec4) -> Self {
        Self {
            stage_flags,
            offset,
            value,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.value)
    }

    pub fn span(&self) -> PushConstantSpan {
        PushConstantSpan {
            stage_flags: self.stage_flags,
            offset: self.offset,
            size: self.bytes().len() as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    PushConstants(PushConstants),
    Draw(Draw),
}

/// Binds a pipeline and records its child commands under it.
pub struct StateGroup {
    pub debug_name: String,
    pub pipeline: Arc<GraphicsPipeline>,
    children: Vec<Command>,
}

impl StateGroup {
    pub fn new(debug_name: &str, pipeline: Arc<GraphicsPipeline>) -> Self {
        Self {
            debug_name: debug_name.to_owned(),
            pipeline,
            children: Vec::new(),
        }
    }

    pub fn add_child(&mut self, command: Command) {
        self.children.push(command);
    }

    pub fn children(&self) -> &[Command] {
        &self.children
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Scene,
    SimpleFullscreen,
    PushConstFullscreen,
}

pub enum PassContent {
    Scene(Arc<View>),
    Fullscreen(StateGroup),
}

/// Self-contained unit of rendering work with its own target and framebuffer.
pub struct PassNode {
    pub kind: PassKind,
    pub target: ColorTarget,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub render_area: vk::Rect2D,
    pub clear_color: [f32; 4],
    pub content: PassContent,
}

impl PassNode {
    pub fn view(&self) -> Option<&Arc<View>> {
        match &self.content {
            PassContent::Scene(view) => Some(view),
            PassContent::Fullscreen(_) => None,
        }
    }

    pub fn state_group(&self) -> Option<&StateGroup> {
        match &self.content {
            PassContent::Scene(_) => None,
            PassContent::Fullscreen(group) => Some(group),
        }
    }
}
