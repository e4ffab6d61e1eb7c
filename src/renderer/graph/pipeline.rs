use std::ffi::CString;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use ash::vk;
use color_eyre::Result;
use smallvec::SmallVec;

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(u64);

impl PipelineId {
    fn next() -> Self {
        Self(NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub entry_point: CString,
    pub spirv: Arc<[u32]>,
}

impl ShaderStage {
    pub fn new(
        stage: vk::ShaderStageFlags,
        entry_point: &str,
        spirv: Arc<[u32]>,
    ) -> Result<Self> {
        Ok(Self {
            stage,
            entry_point: CString::new(entry_point)?,
            spirv,
        })
    }
}

/// Byte range of a push-constant block as seen by the pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantSpan {
    pub stage_flags: vk::ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

impl PushConstantSpan {
    pub fn to_vk(self) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: self.stage_flags,
            offset: self.offset,
            size: self.size,
        }
    }

    /// True when `self` declares every stage of `other` and its bytes fully
    /// contain `other`'s. A span whose end does not fit in a `u32` is never
    /// covered.
    pub fn covers(&self, other: &PushConstantSpan) -> bool {
        let (Some(end), Some(other_end)) = (self.end(), other.end()) else {
            return false;
        };
        self.stage_flags.contains(other.stage_flags)
            && other.offset >= self.offset
            && other_end <= end
    }

    fn end(&self) -> Option<u32> {
        self.offset.checked_add(self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConstantRange {
    pub name: String,
    pub define: String,
    pub span: PushConstantSpan,
}

/// Shader stages of a pipeline plus the push-constant ranges they declare.
pub struct ShaderSet {
    stages: SmallVec<[ShaderStage; 2]>,
    push_constant_ranges: Vec<PushConstantRange>,
}

impl ShaderSet {
    pub fn new(stages: impl IntoIterator<Item = ShaderStage>) -> Self {
        Self {
            stages: stages.into_iter().collect(),
            push_constant_ranges: Vec::new(),
        }
    }

    /// Must happen before the set is handed to a
    /// [`GraphicsPipelineConfigurator`], the layout is derived from the ranges
    /// declared at that point.
    pub fn add_push_constant_range(
        &mut self,
        name: &str,
        define: &str,
        stage_flags: vk::ShaderStageFlags,
        offset: u32,
        size: u32,
    ) {
        self.push_constant_ranges.push(PushConstantRange {
            name: name.to_owned(),
            define: define.to_owned(),
            span: PushConstantSpan {
                stage_flags,
                offset,
                size,
            },
        });
    }

    pub fn stages(&self) -> &[ShaderStage] {
        &self.stages
    }

    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constant_ranges
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputAssemblyState {
    pub topology: vk::PrimitiveTopology,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizationState {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultisampleState {
    pub samples: vk::SampleCountFlags,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthStencilState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: vk::CompareOp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorBlendAttachment {
    pub blend_enable: bool,
    pub color_write_mask: vk::ColorComponentFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorBlendState {
    pub attachments: SmallVec<[ColorBlendAttachment; 1]>,
}

/// Fixed-function sub-states of a graphics pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    InputAssembly(InputAssemblyState),
    Rasterization(RasterizationState),
    Multisample(MultisampleState),
    DepthStencil(DepthStencilState),
    ColorBlend(ColorBlendState),
}

impl PipelineState {
    pub fn accept(&mut self, visitor: &mut dyn PipelineStateVisitor) {
        match self {
            PipelineState::InputAssembly(state) => visitor.visit_input_assembly(state),
            PipelineState::Rasterization(state) => visitor.visit_rasterization(state),
            PipelineState::Multisample(state) => visitor.visit_multisample(state),
            PipelineState::DepthStencil(state) => visitor.visit_depth_stencil(state),
            PipelineState::ColorBlend(state) => visitor.visit_color_blend(state),
        }
    }
}

/// Per-kind callbacks applied to the sub-states of a pipeline configuration.
/// Unhandled kinds are left untouched.
pub trait PipelineStateVisitor {
    fn visit_input_assembly(&mut self, _state: &mut InputAssemblyState) {}
    fn visit_rasterization(&mut self, _state: &mut RasterizationState) {}
    fn visit_multisample(&mut self, _state: &mut MultisampleState) {}
    fn visit_depth_stencil(&mut self, _state: &mut DepthStencilState) {}
    fn visit_color_blend(&mut self, _state: &mut ColorBlendState) {}
}

/// Overrides used by the full-screen passes: no culling, no blending, no
/// depth test.
pub struct FullscreenStates;

impl PipelineStateVisitor for FullscreenStates {
    fn visit_rasterization(&mut self, state: &mut RasterizationState) {
        state.cull_mode = vk::CullModeFlags::NONE;
    }

    fn visit_depth_stencil(&mut self, state: &mut DepthStencilState) {
        state.depth_test_enable = false;
    }

    fn visit_color_blend(&mut self, state: &mut ColorBlendState) {
        if let Some(attachment) = state.attachments.first_mut() {
            attachment.blend_enable = false;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStates(Vec<PipelineState>);

impl PipelineStates {
    pub fn input_assembly(&self) -> Option<&InputAssemblyState> {
        self.0.iter().find_map(|state| match state {
            PipelineState::InputAssembly(s) => Some(s),
            _ => None,
        })
    }

    pub fn rasterization(&self) -> Option<&RasterizationState> {
        self.0.iter().find_map(|state| match state {
            PipelineState::Rasterization(s) => Some(s),
            _ => None,
        })
    }

    pub fn multisample(&self) -> Option<&MultisampleState> {
        self.0.iter().find_map(|state| match state {
            PipelineState::Multisample(s) => Some(s),
            _ => None,
        })
    }

    pub fn depth_stencil(&self) -> Option<&DepthStencilState> {
        self.0.iter().find_map(|state| match state {
            PipelineState::DepthStencil(s) => Some(s),
            _ => None,
        })
    }

    pub fn color_blend(&self) -> Option<&ColorBlendState> {
        self.0.iter().find_map(|state| match state {
            PipelineState::ColorBlend(s) => Some(s),
            _ => None,
        })
    }
}

/// Layout derived from a shader set when its configuration is finalized.
#[derive(Debug)]
pub struct PipelineLayout {
    pub debug_name: String,
    push_constant_ranges: Vec<PushConstantSpan>,
}

impl PipelineLayout {
    pub fn push_constant_ranges(&self) -> &[PushConstantSpan] {
        &self.push_constant_ranges
    }

    pub fn covers(&self, span: &PushConstantSpan) -> bool {
        self.push_constant_ranges
            .iter()
            .any(|range| range.covers(span))
    }
}

/// Finalized pipeline configuration. Device objects are created per view at
/// compile time.
pub struct GraphicsPipeline {
    id: PipelineId,
    pub layout: Arc<PipelineLayout>,
    pub stages: SmallVec<[ShaderStage; 2]>,
    pub states: PipelineStates,
}

impl GraphicsPipeline {
    pub fn id(&self) -> PipelineId {
        self.id
    }
}

pub struct GraphicsPipelineConfigurator {
    shader_set: ShaderSet,
    states: Vec<PipelineState>,
}

impl GraphicsPipelineConfigurator {
    pub fn new(shader_set: ShaderSet) -> Self {
        Self {
            shader_set,
            states: vec![
                PipelineState::InputAssembly(InputAssemblyState {
                    topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                }),
                PipelineState::Rasterization(RasterizationState {
                    polygon_mode: vk::PolygonMode::FILL,
                    cull_mode: vk::CullModeFlags::BACK,
                    front_face: vk::FrontFace::COUNTER_CLOCKWISE,
                    line_width: 1.0,
                }),
                PipelineState::Multisample(MultisampleState {
                    samples: vk::SampleCountFlags::TYPE_1,
                }),
                PipelineState::DepthStencil(DepthStencilState {
                    depth_test_enable: true,
                    depth_write_enable: true,
                    depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
                }),
                // Enable alpha blending by default
                PipelineState::ColorBlend(ColorBlendState {
                    attachments: smallvec::smallvec![ColorBlendAttachment {
                        blend_enable: true,
                        color_write_mask: vk::ColorComponentFlags::RGBA,
                    }],
                }),
            ],
        }
    }

    pub fn accept(&mut self, visitor: &mut dyn PipelineStateVisitor) {
        for state in &mut self.states {
            state.accept(visitor);
        }
    }

    /// Finalizes the configuration. The layout takes the push-constant ranges
    /// the shader set declares right now.
    pub fn init(self, debug_name: &str) -> GraphicsPipeline {
        let layout = PipelineLayout {
            debug_name: debug_name.to_owned(),
            push_constant_ranges: self
                .shader_set
                .push_constant_ranges
                .iter()
                .map(|range| range.span)
                .collect(),
        };

        GraphicsPipeline {
            id: PipelineId::next(),
            layout: Arc::new(layout),
            stages: self.shader_set.stages,
            states: PipelineStates(self.states),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader_set() -> ShaderSet {
        let code: Arc<[u32]> = Arc::from(vec![0x0723_0203_u32]);
        ShaderSet::new([
            ShaderStage::new(vk::ShaderStageFlags::VERTEX, "main", code.clone()).unwrap(),
            ShaderStage::new(vk::ShaderStageFlags::FRAGMENT, "main", code).unwrap(),
        ])
    }

    #[test]
    fn fullscreen_overrides_touch_only_their_states() {
        let mut config = GraphicsPipelineConfigurator::new(shader_set());
        config.accept(&mut FullscreenStates);
        let pipeline = config.init("test");

        let raster = pipeline.states.rasterization().unwrap();
        assert_eq!(raster.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(raster.polygon_mode, vk::PolygonMode::FILL);
        assert!(!pipeline.states.depth_stencil().unwrap().depth_test_enable);
        assert!(!pipeline.states.color_blend().unwrap().attachments[0].blend_enable);
        assert_eq!(
            pipeline.states.input_assembly().unwrap().topology,
            vk::PrimitiveTopology::TRIANGLE_LIST,
        );
    }

    #[test]
    fn layout_takes_ranges_declared_before_init() {
        let mut set = shader_set();
        set.add_push_constant_range("pc", "", vk::ShaderStageFlags::FRAGMENT, 0, 16);
        let pipeline = GraphicsPipelineConfigurator::new(set).init("pc");

        assert_eq!(
            pipeline.layout.push_constant_ranges(),
            &[PushConstantSpan {
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                offset: 0,
                size: 16,
            }],
        );
    }

    #[test]
    fn layout_without_ranges_covers_nothing() {
        let pipeline = GraphicsPipelineConfigurator::new(shader_set()).init("simple");
        let span = PushConstantSpan {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: 16,
        };

        assert!(pipeline.layout.push_constant_ranges().is_empty());
        assert!(!pipeline.layout.covers(&span));
    }

    #[test]
    fn span_coverage_checks_stages_and_bytes() {
        let range = PushConstantSpan {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: 16,
        };

        assert!(range.covers(&range));
        assert!(!range.covers(&PushConstantSpan {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..range
        }));
        assert!(!range.covers(&PushConstantSpan { offset: 8, ..range }));
    }

    #[test]
    fn span_ending_past_u32_is_not_covered() {
        let range = PushConstantSpan {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: u32::MAX,
        };
        let span = PushConstantSpan {
            offset: u32::MAX - 4,
            size: 16,
            ..range
        };

        assert!(!range.covers(&span));
        assert!(!span.covers(&span));
    }

    #[test]
    fn pipeline_ids_are_unique() {
        let a = GraphicsPipelineConfigurator::new(shader_set()).init("a");
        let b = GraphicsPipelineConfigurator::new(shader_set()).init("b");
        assert_ne!(a.id(), b.id());
    }
}
