mod fps;

use std::time::{Duration, Instant};
use color_eyre::Result;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::keyboard::{Key, NamedKey};
use crate::renderer::device::{ColorTarget, CommandRecorder, DeviceContext};
use crate::renderer::error::GraphError;
use crate::renderer::graph::compile::GraphResources;
use crate::renderer::graph::{CommandGraph, CompiledGraph};

pub use fps::FpsCounter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    Uninitialized,
    /// Command graphs assigned, nothing created on the device yet.
    Assigned,
    Compiled,
    Running,
    Terminated,
}

/// Owns frame rotation, submission and presentation for a [`Viewer`].
pub trait FrameExecutor {
    fn device(&self) -> &dyn DeviceContext;

    /// Waits for the next frame slot. `false` once no more frames can be
    /// produced.
    fn advance_to_next_frame(&mut self) -> Result<bool>;

    fn poll_events(&mut self) -> Vec<WindowEvent>;

    /// Records one frame through `record` and submits it. `present_source` is
    /// the image to show when the frame is presented.
    fn record_and_submit(
        &mut self,
        record: &mut dyn FnMut(&mut dyn CommandRecorder) -> Result<()>,
        present_source: Option<ColorTarget>,
    ) -> Result<()>;

    fn present(&mut self) -> Result<()>;

    fn wait_idle(&mut self) -> Result<()>;
}

/// Source of window events for executors that own a window.
pub trait EventSource {
    fn pump_events(&mut self) -> Vec<WindowEvent>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    Continue,
    Close,
}

pub trait EventHandler {
    fn handle(&mut self, event: &WindowEvent) -> HandlerAction;
}

/// Stops the loop on window close or `Escape`.
pub struct CloseHandler;

impl EventHandler for CloseHandler {
    fn handle(&mut self, event: &WindowEvent) -> HandlerAction {
        match event {
            WindowEvent::CloseRequested => HandlerAction::Close,
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: Key::Named(NamedKey::Escape),
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => HandlerAction::Close,
            _ => HandlerAction::Continue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameStamp {
    pub frame_count: u64,
    pub simulation_time: Duration,
}

/// Drives compiled command graphs frame by frame until the executor runs out
/// of frames or a handler asks to close.
pub struct Viewer<E: FrameExecutor> {
    executor: E,
    state: ViewerState,
    graphs: Vec<CommandGraph>,
    compiled: Vec<CompiledGraph>,
    handlers: Vec<Box<dyn EventHandler>>,
    frame_stamp: FrameStamp,
    start_time: Instant,
    fps: FpsCounter,
    close_requested: bool,
}

impl<E: FrameExecutor> Viewer<E> {
    pub fn new(executor: E) -> Self {
        let now = Instant::now();
        Self {
            executor,
            state: ViewerState::Uninitialized,
            graphs: Vec::new(),
            compiled: Vec::new(),
            handlers: Vec::new(),
            frame_stamp: FrameStamp::default(),
            start_time: now,
            fps: FpsCounter::new(now),
            close_requested: false,
        }
    }

    pub fn add_event_handler(&mut self, handler: impl EventHandler + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn assign(&mut self, graphs: Vec<CommandGraph>) -> Result<()> {
        self.expect_state(ViewerState::Uninitialized)?;
        self.graphs = graphs;
        self.transition(ViewerState::Assigned);
        Ok(())
    }

    /// Creates the device objects of every assigned graph. Only valid once.
    ///
    /// The graphs stay assigned if any of them fails to compile.
    pub fn compile(&mut self) -> Result<()> {
        self.expect_state(ViewerState::Assigned)?;

        let resources = self
            .graphs
            .iter()
            .map(|graph| GraphResources::compile(graph, self.executor.device()))
            .collect::<Result<Vec<_>>>()?;

        self.compiled = std::mem::take(&mut self.graphs)
            .into_iter()
            .zip(resources)
            .map(|(graph, resources)| resources.bind(graph))
            .collect();

        self.transition(ViewerState::Compiled);
        Ok(())
    }

    /// Graphs waiting for [`Viewer::compile`].
    pub fn assigned_graphs(&self) -> &[CommandGraph] {
        &self.graphs
    }

    pub fn advance_to_next_frame(&mut self) -> Result<bool> {
        if self.close_requested || !self.executor.advance_to_next_frame()? {
            return Ok(false);
        }
        self.frame_stamp.frame_count += 1;
        Ok(true)
    }

    pub fn handle_events(&mut self) {
        for event in self.executor.poll_events() {
            for handler in &mut self.handlers {
                if handler.handle(&event) == HandlerAction::Close {
                    log::info!("Close requested by {:?}", event);
                    self.close_requested = true;
                }
            }
        }
    }

    pub fn update(&mut self) {
        self.frame_stamp.simulation_time = self.start_time.elapsed();
    }

    pub fn record_and_submit(&mut self) -> Result<()> {
        let compiled = &self.compiled;
        let present_source = compiled.last().and_then(CompiledGraph::present_source);

        self.executor.record_and_submit(
            &mut |recorder| {
                for graph in compiled {
                    graph.record(recorder)?;
                }
                Ok(())
            },
            present_source,
        )
    }

    pub fn present(&mut self) -> Result<()> {
        self.executor.present()
    }

    /// Runs one full frame. Returns `false` without rendering once there are no
    /// more frames.
    pub fn frame(&mut self) -> Result<bool> {
        match self.state {
            ViewerState::Compiled => self.transition(ViewerState::Running),
            ViewerState::Running => {}
            actual => {
                return Err(GraphError::InvalidViewerState {
                    expected: ViewerState::Compiled,
                    actual,
                }
                .into());
            }
        }

        if !self.advance_to_next_frame()? {
            return Ok(false);
        }

        self.handle_events();
        self.update();
        self.record_and_submit()?;
        self.present()?;

        if let Some(fps) = self.fps.frame_completed(Instant::now()) {
            println!("FPS: {}", fps);
        }

        Ok(true)
    }

    /// Runs frames until the executor stops or a close is requested, then
    /// waits for the device to go idle. Returns the number of frames rendered.
    pub fn run_loop(&mut self) -> Result<u64> {
        self.fps = FpsCounter::new(Instant::now());

        while self.frame()? {}

        self.executor.wait_idle()?;
        self.transition(ViewerState::Terminated);

        Ok(self.frame_stamp.frame_count)
    }

    /// Stops the loop before the next frame.
    pub fn close(&mut self) {
        self.close_requested = true;
    }

    pub fn state(&self) -> ViewerState {
        self.state
    }

    pub fn frame_stamp(&self) -> FrameStamp {
        self.frame_stamp
    }

    pub fn compiled_graphs(&self) -> &[CompiledGraph] {
        &self.compiled
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    fn expect_state(&self, expected: ViewerState) -> Result<()> {
        if self.state != expected {
            return Err(GraphError::InvalidViewerState {
                expected,
                actual: self.state,
            }
            .into());
        }
        Ok(())
    }

    fn transition(&mut self, state: ViewerState) {
        log::debug!("Viewer {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use super::*;
    use crate::renderer::config::RenderConfig;
    use crate::renderer::graph::{assemble, ScenarioPreset, SceneViews};
    use crate::renderer::trace::{TraceDevice, TraceExecutor};

    fn viewer(frame_limit: u64) -> Viewer<TraceExecutor> {
        let device = Arc::new(TraceDevice::new(0));
        let config = RenderConfig::default();
        let scenario = ScenarioPreset::PushConstOnly
            .build(&SceneViews::new(&config))
            .unwrap();
        let graph = assemble(device.as_ref(), 0, &scenario, &config).unwrap();

        let mut viewer = Viewer::new(TraceExecutor::new(device, frame_limit));
        viewer.add_event_handler(CloseHandler);
        viewer.assign(vec![graph]).unwrap();
        viewer
    }

    fn state_error(err: &color_eyre::Report) -> Option<&GraphError> {
        err.downcast_ref::<GraphError>()
    }

    #[test]
    fn failed_compile_keeps_graphs_assigned() {
        use glam::Vec4;
        use crate::renderer::camera::Camera;
        use crate::renderer::graph::node::{Command, PushConstants};
        use crate::renderer::graph::pass_builder::PassBuilder;
        use crate::renderer::graph::view::{SceneRoot, View};
        use crate::renderer::graph::{PassMask, Scenario};
        use crate::renderer::shaders::FragmentVariant;

        let device = Arc::new(TraceDevice::new(0));
        let config = RenderConfig::default();
        let valid = ScenarioPreset::PushConstOnly
            .build(&SceneViews::new(&config))
            .unwrap();

        // Push constants on a layout without ranges
        let mut group = PassBuilder::new(device.as_ref(), &config)
            .fullscreen_state_group(FragmentVariant::Simple)
            .unwrap();
        group.add_child(Command::PushConstants(PushConstants::new(
            ash::vk::ShaderStageFlags::FRAGMENT,
            0,
            Vec4::ONE,
        )));
        let view = View::new(Camera::new(config.extent), SceneRoot::new().with_child(group));
        let invalid = Scenario::new(PassMask::FIRST_SCENE, view.clone(), view).unwrap();

        let mut viewer = Viewer::new(TraceExecutor::new(device.clone(), 1));
        viewer
            .assign(vec![
                assemble(device.as_ref(), 0, &valid, &config).unwrap(),
                assemble(device.as_ref(), 0, &invalid, &config).unwrap(),
            ])
            .unwrap();

        let err = viewer.compile().unwrap_err();
        assert!(matches!(
            state_error(&err),
            Some(GraphError::PushConstantRangeMismatch { .. })
        ));
        assert_eq!(viewer.state(), ViewerState::Assigned);
        assert_eq!(viewer.assigned_graphs().len(), 2);
        assert!(viewer.compiled_graphs().is_empty());
    }

    #[test]
    fn compile_is_only_valid_once() {
        let mut viewer = viewer(1);
        viewer.compile().unwrap();

        let err = viewer.compile().unwrap_err();
        assert_eq!(
            state_error(&err),
            Some(&GraphError::InvalidViewerState {
                expected: ViewerState::Assigned,
                actual: ViewerState::Compiled,
            }),
        );
    }

    #[test]
    fn run_loop_requires_compile() {
        let mut viewer = viewer(1);
        let err = viewer.run_loop().unwrap_err();

        assert!(matches!(
            state_error(&err),
            Some(GraphError::InvalidViewerState { actual: ViewerState::Assigned, .. }),
        ));
    }

    #[test]
    fn runs_until_executor_is_exhausted() {
        let mut viewer = viewer(5);
        viewer.compile().unwrap();

        assert_eq!(viewer.run_loop().unwrap(), 5);
        assert_eq!(viewer.state(), ViewerState::Terminated);
        assert_eq!(viewer.executor().submit_count(), 5);
        assert_eq!(viewer.executor().present_count(), 5);
    }

    #[test]
    fn close_request_stops_after_current_frame() {
        let mut viewer = viewer(100);
        viewer.compile().unwrap();
        viewer.executor_mut().push_event(WindowEvent::CloseRequested);

        assert_eq!(viewer.run_loop().unwrap(), 1);
        assert_eq!(viewer.state(), ViewerState::Terminated);
    }

    #[test]
    fn external_close_renders_nothing() {
        let mut viewer = viewer(100);
        viewer.compile().unwrap();
        viewer.close();

        assert_eq!(viewer.run_loop().unwrap(), 0);
        assert_eq!(viewer.executor().submit_count(), 0);
    }

    #[test]
    fn frame_stamp_advances_per_frame() {
        let mut viewer = viewer(3);
        viewer.compile().unwrap();

        assert!(viewer.frame().unwrap());
        assert!(viewer.frame().unwrap());
        assert_eq!(viewer.frame_stamp().frame_count, 2);
        assert_eq!(viewer.state(), ViewerState::Running);
    }
}
