//! GPU-free backend. Handles are fabricated from a counter and every call is
//! recorded so the graph and the frame loop can be inspected without a device.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use ash::vk;
use ash::vk::Handle;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use winit::event::WindowEvent;
use crate::renderer::device::{ColorTarget, CommandRecorder, DeviceContext, GraphicsPipelineDesc, RenderPassBegin};
use crate::renderer::graph::pipeline::{PipelineStates, PushConstantSpan};
use crate::renderer::viewer::FrameExecutor;

const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceObject {
    Image,
    ImageView,
    RenderPass,
    Framebuffer,
    ShaderModule,
    PipelineLayout,
    Pipeline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Created {
        kind: TraceObject,
        handle: u64,
    },
    DebugName {
        object_type: vk::ObjectType,
        handle: u64,
        name: String,
    },
}

/// Graphics pipeline as it was requested from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct TracedPipeline {
    pub handle: vk::Pipeline,
    pub name: String,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub stages: Vec<vk::ShaderStageFlags>,
    pub states: PipelineStates,
}

pub struct TraceDevice {
    queue_family: u32,
    next_handle: AtomicU64,
    events: Mutex<Vec<TraceEvent>>,
    layouts: Mutex<HashMap<vk::PipelineLayout, Vec<PushConstantSpan>>>,
    pipelines: Mutex<Vec<TracedPipeline>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TraceDevice {
    pub fn new(queue_family: u32) -> Self {
        Self {
            queue_family,
            next_handle: AtomicU64::new(1),
            events: Mutex::new(Vec::new()),
            layouts: Mutex::new(HashMap::new()),
            pipelines: Mutex::new(Vec::new()),
        }
    }

    fn create<H: Handle>(&self, kind: TraceObject) -> H {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        lock(&self.events).push(TraceEvent::Created { kind, handle });
        log::trace!("Created {:?} {:#x}", kind, handle);
        H::from_raw(handle)
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        lock(&self.events).clone()
    }

    pub fn created_count(&self, kind: TraceObject) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| matches!(event, TraceEvent::Created { kind: k, .. } if *k == kind))
            .count()
    }

    /// Last debug name assigned to `handle`.
    pub fn debug_name(&self, handle: u64) -> Option<String> {
        lock(&self.events).iter().rev().find_map(|event| match event {
            TraceEvent::DebugName { handle: h, name, .. } if *h == handle => Some(name.clone()),
            _ => None,
        })
    }

    pub fn layout_ranges(&self, layout: vk::PipelineLayout) -> Option<Vec<PushConstantSpan>> {
        lock(&self.layouts).get(&layout).cloned()
    }

    pub fn pipelines(&self) -> Vec<TracedPipeline> {
        lock(&self.pipelines).clone()
    }
}

impl DeviceContext for TraceDevice {
    fn queue_family_index(&self) -> u32 {
        self.queue_family
    }

    fn create_color_target(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        _samples: vk::SampleCountFlags,
    ) -> Result<ColorTarget> {
        if extent.width == 0 || extent.height == 0 {
            return Err(eyre!("Cannot create a {}x{} color target", extent.width, extent.height));
        }

        Ok(ColorTarget {
            image: self.create(TraceObject::Image),
            view: self.create(TraceObject::ImageView),
            format,
            extent,
        })
    }

    fn create_color_render_pass(&self, _format: vk::Format) -> Result<vk::RenderPass> {
        Ok(self.create(TraceObject::RenderPass))
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        Ok(self.create(TraceObject::Framebuffer))
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        if code.first() != Some(&SPIRV_MAGIC) {
            return Err(eyre!("Shader code is not SPIR-V"));
        }
        Ok(self.create(TraceObject::ShaderModule))
    }

    fn create_pipeline_layout(
        &self,
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<vk::PipelineLayout> {
        let layout = self.create(TraceObject::PipelineLayout);
        let ranges = push_constant_ranges
            .iter()
            .map(|range| PushConstantSpan {
                stage_flags: range.stage_flags,
                offset: range.offset,
                size: range.size,
            })
            .collect();
        lock(&self.layouts).insert(layout, ranges);
        Ok(layout)
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<vk::Pipeline> {
        let handle = self.create(TraceObject::Pipeline);
        lock(&self.pipelines).push(TracedPipeline {
            handle,
            name: desc.name.to_owned(),
            layout: desc.layout,
            render_pass: desc.render_pass,
            stages: desc.stages.iter().map(|stage| stage.stage).collect(),
            states: desc.states.clone(),
        });
        Ok(handle)
    }

    fn set_debug_name(
        &self,
        object_type: vk::ObjectType,
        handle: u64,
        name: &str,
    ) -> Result<()> {
        lock(&self.events).push(TraceEvent::DebugName {
            object_type,
            handle,
            name: name.to_owned(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: (u32, u32),
        clear_color: [f32; 4],
    },
    SetViewport {
        width: u32,
        height: u32,
    },
    BindGraphicsPipeline {
        pipeline: vk::Pipeline,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stage_flags: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    EndRenderPass,
}

/// Records commands and reports push constants the bound layout does not
/// declare, the way the validation layer would.
pub struct TraceRecorder<'a> {
    device: &'a TraceDevice,
    commands: Vec<RecordedCommand>,
}

impl<'a> TraceRecorder<'a> {
    pub fn new(device: &'a TraceDevice) -> Self {
        Self {
            device,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<RecordedCommand> {
        self.commands
    }
}

impl CommandRecorder for TraceRecorder<'_> {
    fn begin_render_pass(&mut self, begin: &RenderPassBegin) {
        self.commands.push(RecordedCommand::BeginRenderPass {
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
            extent: (begin.render_area.extent.width, begin.render_area.extent.height),
            clear_color: begin.clear_color,
        });
    }

    fn set_viewport(&mut self, area: vk::Rect2D) {
        self.commands.push(RecordedCommand::SetViewport {
            width: area.extent.width,
            height: area.extent.height,
        });
    }

    fn bind_graphics_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.commands.push(RecordedCommand::BindGraphicsPipeline { pipeline });
    }

    fn push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        stage_flags: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        let span = PushConstantSpan {
            stage_flags,
            offset,
            size: data.len() as u32,
        };
        let covered = self
            .device
            .layout_ranges(layout)
            .is_some_and(|ranges| ranges.iter().any(|range| range.covers(&span)));
        if !covered {
            log::error!("vkCmdPushConstants: {:?} not declared by layout {:?}", span, layout);
        }

        self.commands.push(RecordedCommand::PushConstants {
            layout,
            stage_flags,
            offset,
            data: data.to_vec(),
        });
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.commands.push(RecordedCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn end_render_pass(&mut self) {
        self.commands.push(RecordedCommand::EndRenderPass);
    }
}

/// Frame executor over a [`TraceDevice`]. Runs a fixed number of frames and
/// keeps the commands of the last one.
pub struct TraceExecutor {
    device: Arc<TraceDevice>,
    frame_limit: u64,
    frames: u64,
    pending_events: VecDeque<WindowEvent>,
    last_frame: Vec<RecordedCommand>,
    last_present_source: Option<ColorTarget>,
    submits: u64,
    presents: u64,
    log_commands: bool,
}

impl TraceExecutor {
    pub fn new(device: Arc<TraceDevice>, frame_limit: u64) -> Self {
        Self {
            device,
            frame_limit,
            frames: 0,
            pending_events: VecDeque::new(),
            last_frame: Vec::new(),
            last_present_source: None,
            submits: 0,
            presents: 0,
            log_commands: false,
        }
    }

    /// Log every recorded command at `info`.
    pub fn with_command_logging(mut self, log_commands: bool) -> Self {
        self.log_commands = log_commands;
        self
    }

    /// Queues a window event for the next event poll.
    pub fn push_event(&mut self, event: WindowEvent) {
        self.pending_events.push_back(event);
    }

    pub fn trace_device(&self) -> &Arc<TraceDevice> {
        &self.device
    }

    pub fn last_frame(&self) -> &[RecordedCommand] {
        &self.last_frame
    }

    pub fn last_present_source(&self) -> Option<ColorTarget> {
        self.last_present_source
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn submit_count(&self) -> u64 {
        self.submits
    }

    pub fn present_count(&self) -> u64 {
        self.presents
    }
}

impl FrameExecutor for TraceExecutor {
    fn device(&self) -> &dyn DeviceContext {
        self.device.as_ref()
    }

    fn advance_to_next_frame(&mut self) -> Result<bool> {
        if self.frames >= self.frame_limit {
            return Ok(false);
        }
        self.frames += 1;
        Ok(true)
    }

    fn poll_events(&mut self) -> Vec<WindowEvent> {
        self.pending_events.drain(..).collect()
    }

    fn record_and_submit(
        &mut self,
        record: &mut dyn FnMut(&mut dyn CommandRecorder) -> Result<()>,
        present_source: Option<ColorTarget>,
    ) -> Result<()> {
        let mut recorder = TraceRecorder::new(&self.device);
        record(&mut recorder)?;

        if self.log_commands {
            for command in recorder.commands() {
                log::info!("[frame {}] {:?}", self.frames, command);
            }
        }

        self.last_frame = recorder.into_commands();
        self.last_present_source = present_source;
        self.submits += 1;
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        self.presents += 1;
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_and_logged() {
        let device = TraceDevice::new(0);
        let a = device.create_color_render_pass(vk::Format::R8G8B8A8_UNORM).unwrap();
        let b = device.create_color_render_pass(vk::Format::R8G8B8A8_UNORM).unwrap();

        assert_ne!(a, b);
        assert_eq!(device.created_count(TraceObject::RenderPass), 2);
    }

    #[test]
    fn rejects_non_spirv_code() {
        let device = TraceDevice::new(0);
        assert!(device.create_shader_module(&[0xdead_beef]).is_err());
        assert!(device.create_shader_module(&[SPIRV_MAGIC]).is_ok());
    }

    #[test]
    fn debug_names_are_queryable_by_handle() {
        let device = TraceDevice::new(0);
        let layout = device.create_pipeline_layout(&[]).unwrap();
        device
            .set_debug_name(vk::ObjectType::PIPELINE_LAYOUT, layout.as_raw(), "layout")
            .unwrap();

        assert_eq!(device.debug_name(layout.as_raw()).as_deref(), Some("layout"));
        assert_eq!(device.layout_ranges(layout), Some(Vec::new()));
    }

    #[test]
    fn executor_stops_at_frame_limit() {
        let mut executor = TraceExecutor::new(Arc::new(TraceDevice::new(0)), 2);

        assert!(executor.advance_to_next_frame().unwrap());
        assert!(executor.advance_to_next_frame().unwrap());
        assert!(!executor.advance_to_next_frame().unwrap());
        assert_eq!(executor.frames(), 2);
    }
}
