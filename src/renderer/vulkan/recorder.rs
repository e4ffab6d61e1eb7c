use ash::vk;
use crate::renderer::device::{CommandRecorder, RenderPassBegin};

/// Records straight into a command buffer in the recording state.
pub struct AshRecorder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl<'a> AshRecorder<'a> {
    pub fn new(device: &'a ash::Device, cmd: vk::CommandBuffer) -> Self {
        Self { device, cmd }
    }
}

impl CommandRecorder for AshRecorder<'_> {
    fn begin_render_pass(&mut self, begin: &RenderPassBegin) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: begin.clear_color,
            },
        }];
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(begin.render_area)
            .clear_values(&clear_values);

        unsafe {
            self.device.cmd_begin_render_pass(self.cmd, &info, vk::SubpassContents::INLINE);
        }
    }

    fn set_viewport(&mut self, area: vk::Rect2D) {
        let viewport = vk::Viewport {
            x: area.offset.x as f32,
            y: area.offset.y as f32,
            width: area.extent.width as f32,
            height: area.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            self.device.cmd_set_viewport(self.cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(self.cmd, 0, &[area]);
        }
    }

    fn bind_graphics_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stage_flags: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(self.cmd, layout, stage_flags, offset, data);
        }
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw(self.cmd, vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    fn end_render_pass(&mut self) {
        unsafe {
            self.device.cmd_end_render_pass(self.cmd);
        }
    }
}
