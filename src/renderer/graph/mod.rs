//! Description of the rendering work and its compilation into device objects.
//!
//! A [`command_graph::CommandGraph`] is assembled from a
//! [`scenario::Scenario`], then [`compile::compile`]d once into a
//! [`compile::CompiledGraph`] that is recorded every frame.

pub mod command_graph;
pub mod compile;
pub mod node;
pub mod pass_builder;
pub mod pipeline;
pub mod scenario;
pub mod view;

pub use command_graph::{assemble, CommandGraph};
pub use compile::{compile, CompiledGraph, CompiledPipeline, CompiledView, ViewIndex};
pub use scenario::{PassMask, PassSlot, Scenario, ScenarioPreset, SceneViews};
