use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::device::DeviceContext;
use crate::renderer::graph::node::PassNode;
use crate::renderer::graph::pass_builder::PassBuilder;
use crate::renderer::graph::scenario::{PassSlot, Scenario};
use crate::renderer::shaders::FragmentVariant;

/// Ordered passes recorded into one command buffer for one queue family.
pub struct CommandGraph {
    queue_family: u32,
    children: Vec<PassNode>,
}

impl CommandGraph {
    pub fn new(queue_family: u32) -> Self {
        Self {
            queue_family,
            children: Vec::new(),
        }
    }

    pub fn add_child(&mut self, pass: PassNode) {
        self.children.push(pass);
    }

    pub fn children(&self) -> &[PassNode] {
        &self.children
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }
}

/// Builds the passes selected by `scenario` in slot order and appends them to
/// a new graph.
pub fn assemble(
    device: &dyn DeviceContext,
    queue_family: u32,
    scenario: &Scenario,
    config: &RenderConfig,
) -> Result<CommandGraph> {
    let builder = PassBuilder::new(device, config);
    let mut graph = CommandGraph::new(queue_family);

    for slot in scenario.slots() {
        let pass = match slot {
            PassSlot::FirstScene => builder.scene_pass(scenario.first_scene_view().clone())?,
            PassSlot::SimpleFullscreen => builder.fullscreen_pass(FragmentVariant::Simple)?,
            PassSlot::SecondScene => builder.scene_pass(scenario.second_scene_view().clone())?,
            PassSlot::PushConstFullscreen => builder.fullscreen_pass(FragmentVariant::PushConstants)?,
        };
        graph.add_child(pass);
    }

    log::info!(
        "Assembled command graph with {} pass(es) for queue family {}",
        graph.children.len(),
        queue_family,
    );

    Ok(graph)
}
