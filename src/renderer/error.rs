use ash::vk;
use thiserror::Error;
use crate::renderer::graph::pipeline::PipelineId;
use crate::renderer::graph::ViewIndex;
use crate::renderer::viewer::ViewerState;

/// Harness configuration failures.
///
/// These travel inside `color_eyre::Report`s; use `Report::downcast_ref` to
/// inspect them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// A scenario must draw at least one pass.
    #[error("Scenario selects no passes, need to draw at least something")]
    EmptyPassMask,

    #[error(
        "Push constants in '{pass}' ({stages:?}, offset {offset}, size {size}) \
         are not covered by the pipeline layout"
    )]
    PushConstantRangeMismatch {
        pass: String,
        stages: vk::ShaderStageFlags,
        offset: u32,
        size: u32,
    },

    #[error("Pipeline {pipeline:?} was not compiled for view {view:?}")]
    MissingPipelineVariant {
        pipeline: PipelineId,
        view: ViewIndex,
    },

    #[error("Viewer is {actual:?}, expected {expected:?}")]
    InvalidViewerState {
        expected: ViewerState,
        actual: ViewerState,
    },
}
