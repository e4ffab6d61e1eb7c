//! ash backend: instance and device bootstrap, resource creation, command
//! recording and frame execution.

mod device;
mod executor;
mod image;
mod instance;
mod recorder;
mod swapchain;
mod util;

pub use device::{Queue, VulkanDevice};
pub use executor::VulkanExecutor;
pub use instance::{RenderInstance, Surface};
