use ash::vk;
use glam::Vec4;

/// Contains configuration options for the renderer like the resolution, vsync, and other settings
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Extent shared by every pass target.
    pub extent: vk::Extent2D,
    /// Color format shared by every pass target.
    pub color_format: vk::Format,
    pub clear_color: [f32; 4],
    /// Value uploaded by the push-constant full-screen pass.
    pub push_constant_color: Vec4,
    pub frames_in_flight: usize,
    pub vsync: bool,
    /// Request `VK_LAYER_KHRONOS_validation`. The defect only shows up with it.
    pub validation: bool,
}

impl RenderConfig {
    pub const DEFAULT_EXTENT: vk::Extent2D = vk::Extent2D {
        width: 2048,
        height: 1024,
    };
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            extent: Self::DEFAULT_EXTENT,
            color_format: vk::Format::R8G8B8A8_UNORM,
            clear_color: [1.0, 1.0, 0.0, 0.0],
            push_constant_color: Vec4::new(0.0, 1.0, 0.0, 1.0),
            frames_in_flight: 2,
            vsync: false,
            validation: true,
        }
    }
}
