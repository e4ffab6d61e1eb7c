pub mod camera;
pub mod config;
pub mod device;
pub mod error;
pub mod graph;
pub mod shaders;
pub mod trace;
pub mod viewer;
pub mod vulkan;
