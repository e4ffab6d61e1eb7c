use std::collections::HashMap;
use std::sync::Arc;
use ash::vk;
use ash::vk::Handle;
use color_eyre::Result;
use glam::Mat4;
use smallvec::SmallVec;
use crate::renderer::device::{ColorTarget, CommandRecorder, CompiledStage, DeviceContext, GraphicsPipelineDesc, RenderPassBegin};
use crate::renderer::error::GraphError;
use crate::renderer::graph::command_graph::CommandGraph;
use crate::renderer::graph::node::{Command, PassContent, StateGroup};
use crate::renderer::graph::pipeline::{GraphicsPipeline, PipelineId, PipelineLayout};
use crate::renderer::graph::view::View;

/// Index selecting the per-view variant of compiled pipelines.
///
/// Views get indices in first-encounter order. Content outside any view
/// records with [`ViewIndex::DEFAULT`], which is also the first view's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewIndex(pub u32);

impl ViewIndex {
    pub const DEFAULT: ViewIndex = ViewIndex(0);
}

/// Per-view state shared by every pass that references the same [`View`].
pub struct CompiledView {
    pub index: ViewIndex,
    pub view: Arc<View>,
    pub view_matrix: Mat4,
    pub projection: Mat4,
}

impl CompiledView {
    fn new(index: ViewIndex, view: Arc<View>) -> Self {
        Self {
            index,
            view_matrix: view.camera.get_view_mat() * view.scene.transform,
            projection: view.camera.get_proj_mat(),
            view,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// A command graph whose device objects have all been created. Immutable from
/// here on; recorded once per frame.
pub struct CompiledGraph {
    graph: CommandGraph,
    pass_views: Vec<Option<Arc<CompiledView>>>,
    views: Vec<Arc<CompiledView>>,
    pipelines: HashMap<(PipelineId, ViewIndex), CompiledPipeline>,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("queue_family", &self.graph.queue_family())
            .field("passes", &self.graph.children().len())
            .field("views", &self.views.len())
            .field("pipeline_variants", &self.pipelines.len())
            .finish()
    }
}

struct Compiler<'a> {
    device: &'a dyn DeviceContext,
    layouts: HashMap<*const PipelineLayout, vk::PipelineLayout>,
    modules: HashMap<PipelineId, SmallVec<[vk::ShaderModule; 2]>>,
    pipelines: HashMap<(PipelineId, ViewIndex), CompiledPipeline>,
}

/// Creates every shader module, pipeline layout and per-view pipeline the
/// graph references.
pub fn compile(graph: CommandGraph, device: &dyn DeviceContext) -> Result<CompiledGraph> {
    Ok(GraphResources::compile(&graph, device)?.bind(graph))
}

/// Device objects of a graph that has not been handed over yet.
pub(crate) struct GraphResources {
    pass_views: Vec<Option<Arc<CompiledView>>>,
    views: Vec<Arc<CompiledView>>,
    pipelines: HashMap<(PipelineId, ViewIndex), CompiledPipeline>,
}

impl GraphResources {
    pub(crate) fn compile(graph: &CommandGraph, device: &dyn DeviceContext) -> Result<Self> {
        let mut compiler = Compiler {
            device,
            layouts: HashMap::new(),
            modules: HashMap::new(),
            pipelines: HashMap::new(),
        };
        let mut views: Vec<Arc<CompiledView>> = Vec::new();
        let mut pass_views = Vec::with_capacity(graph.children().len());

        for pass in graph.children() {
            match &pass.content {
                PassContent::Scene(view) => {
                    let compiled = match views.iter().find(|c| View::is_same(&c.view, view)) {
                        Some(compiled) => compiled.clone(),
                        None => {
                            let index = ViewIndex(views.len() as u32);
                            let compiled = Arc::new(CompiledView::new(index, view.clone()));
                            views.push(compiled.clone());
                            compiled
                        }
                    };
                    for group in view.scene.children() {
                        compiler.compile_state_group(group, pass.render_pass, compiled.index)?;
                    }
                    pass_views.push(Some(compiled));
                }
                PassContent::Fullscreen(group) => {
                    compiler.compile_state_group(group, pass.render_pass, ViewIndex::DEFAULT)?;
                    pass_views.push(None);
                }
            }
        }

        log::info!(
            "Compiled command graph: {} pass(es), {} view(s), {} pipeline variant(s)",
            graph.children().len(),
            views.len(),
            compiler.pipelines.len(),
        );

        Ok(Self {
            pass_views,
            views,
            pipelines: compiler.pipelines,
        })
    }

    /// `graph` must be the graph these resources were compiled from.
    pub(crate) fn bind(self, graph: CommandGraph) -> CompiledGraph {
        CompiledGraph {
            graph,
            pass_views: self.pass_views,
            views: self.views,
            pipelines: self.pipelines,
        }
    }
}

impl Compiler<'_> {
    fn compile_state_group(
        &mut self,
        group: &StateGroup,
        render_pass: vk::RenderPass,
        view: ViewIndex,
    ) -> Result<()> {
        let pipeline = &group.pipeline;

        for command in group.children() {
            if let Command::PushConstants(push_constants) = command {
                let span = push_constants.span();
                if !pipeline.layout.covers(&span) {
                    return Err(GraphError::PushConstantRangeMismatch {
                        pass: group.debug_name.clone(),
                        stages: span.stage_flags,
                        offset: span.offset,
                        size: span.size,
                    }
                    .into());
                }
            }
        }

        let key = (pipeline.id(), view);
        if self.pipelines.contains_key(&key) {
            return Ok(());
        }

        let layout = self.layout(&pipeline.layout)?;
        let modules = self.modules(pipeline)?;
        let stages = pipeline
            .stages
            .iter()
            .zip(modules)
            .map(|(stage, module)| CompiledStage {
                stage: stage.stage,
                module,
                entry_point: &stage.entry_point,
            })
            .collect::<SmallVec<[_; 2]>>();

        let handle = self.device.create_graphics_pipeline(&GraphicsPipelineDesc {
            name: &group.debug_name,
            layout,
            render_pass,
            stages: &stages,
            states: &pipeline.states,
        })?;
        self.device.set_debug_name(vk::ObjectType::PIPELINE, handle.as_raw(), &group.debug_name)?;

        log::debug!("Compiled pipeline '{}' for {:?}", group.debug_name, view);

        self.pipelines.insert(key, CompiledPipeline {
            pipeline: handle,
            layout,
        });

        Ok(())
    }

    fn layout(&mut self, layout: &Arc<PipelineLayout>) -> Result<vk::PipelineLayout> {
        if let Some(handle) = self.layouts.get(&Arc::as_ptr(layout)) {
            return Ok(*handle);
        }

        let ranges = layout
            .push_constant_ranges()
            .iter()
            .map(|range| range.to_vk())
            .collect::<Vec<_>>();
        let handle = self.device.create_pipeline_layout(&ranges)?;
        self.device.set_debug_name(
            vk::ObjectType::PIPELINE_LAYOUT,
            handle.as_raw(),
            &layout.debug_name,
        )?;

        self.layouts.insert(Arc::as_ptr(layout), handle);
        Ok(handle)
    }

    fn modules(&mut self, pipeline: &GraphicsPipeline) -> Result<SmallVec<[vk::ShaderModule; 2]>> {
        if let Some(modules) = self.modules.get(&pipeline.id()) {
            return Ok(modules.clone());
        }

        let modules = pipeline
            .stages
            .iter()
            .map(|stage| self.device.create_shader_module(&stage.spirv))
            .collect::<Result<SmallVec<[_; 2]>>>()?;

        self.modules.insert(pipeline.id(), modules.clone());
        Ok(modules)
    }
}

impl CompiledGraph {
    pub fn graph(&self) -> &CommandGraph {
        &self.graph
    }

    /// Compiled view of the pass at `index`, `None` for passes outside a view.
    pub fn pass_view(&self, index: usize) -> Option<&Arc<CompiledView>> {
        self.pass_views.get(index).and_then(Option::as_ref)
    }

    pub fn views(&self) -> &[Arc<CompiledView>] {
        &self.views
    }

    pub fn pipeline_variant(&self, pipeline: PipelineId, view: ViewIndex) -> Option<CompiledPipeline> {
        self.pipelines.get(&(pipeline, view)).copied()
    }

    pub fn pipeline_variant_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Target of the last pass, the image a presenting executor shows.
    pub fn present_source(&self) -> Option<ColorTarget> {
        self.graph.children().last().map(|pass| pass.target)
    }

    /// Records every pass in graph order.
    pub fn record(&self, recorder: &mut dyn CommandRecorder) -> Result<()> {
        for (pass, compiled_view) in self.graph.children().iter().zip(&self.pass_views) {
            recorder.begin_render_pass(&RenderPassBegin {
                render_pass: pass.render_pass,
                framebuffer: pass.framebuffer,
                render_area: pass.render_area,
                clear_color: pass.clear_color,
            });
            recorder.set_viewport(pass.render_area);

            match &pass.content {
                PassContent::Scene(view) => {
                    let index = compiled_view
                        .as_ref()
                        .map_or(ViewIndex::DEFAULT, |compiled| compiled.index);
                    for group in view.scene.children() {
                        self.record_state_group(group, index, recorder)?;
                    }
                }
                PassContent::Fullscreen(group) => {
                    self.record_state_group(group, ViewIndex::DEFAULT, recorder)?;
                }
            }

            recorder.end_render_pass();
        }

        Ok(())
    }

    fn record_state_group(
        &self,
        group: &StateGroup,
        view: ViewIndex,
        recorder: &mut dyn CommandRecorder,
    ) -> Result<()> {
        let compiled = self
            .pipeline_variant(group.pipeline.id(), view)
            .ok_or(GraphError::MissingPipelineVariant {
                pipeline: group.pipeline.id(),
                view,
            })?;

        recorder.bind_graphics_pipeline(compiled.pipeline);

        for command in group.children() {
            match command {
                Command::PushConstants(push_constants) => recorder.push_constants(
                    compiled.layout,
                    push_constants.stage_flags,
                    push_constants.offset,
                    push_constants.bytes(),
                ),
                Command::Draw(draw) => recorder.draw(
                    draw.vertex_count,
                    draw.instance_count,
                    draw.first_vertex,
                    draw.first_instance,
                ),
            }
        }

        Ok(())
    }
}
