//! Multi-pass render harness that deterministically drives the push-constant /
//! shared-view validation-layer defect.
//!
//! The graph side (`renderer::graph`) only describes work; GPU objects are
//! created through a [`renderer::device::DeviceContext`] and frames are driven
//! by a [`renderer::viewer::Viewer`] on top of a
//! [`renderer::viewer::FrameExecutor`].

pub mod app;
pub mod renderer;
