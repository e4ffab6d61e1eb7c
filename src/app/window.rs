use std::sync::Arc;
use std::time::Duration;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowId};
use crate::renderer::viewer::EventSource;

const STARTUP_PUMP_TIMEOUT: Duration = Duration::from_millis(10);
const STARTUP_PUMP_ATTEMPTS: u32 = 500;

struct WindowState {
    size: vk::Extent2D,
    window: Option<Arc<Window>>,
    pending: Vec<WindowEvent>,
    create_error: Option<String>,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("pushconst-repro")
            .with_inner_size(PhysicalSize::new(self.size.width, self.size.height))
            .with_resizable(false);
        match event_loop.create_window(attributes) {
            Ok(window) => self.window = Some(Arc::new(window)),
            Err(e) => {
                self.create_error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().is_some_and(|window| window.id() == window_id) {
            self.pending.push(event);
        }
    }
}

/// Window plus the event loop feeding it, pumped once per frame.
pub struct WindowEvents {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl WindowEvents {
    /// Opens a window of `size` physical pixels.
    pub fn new(size: vk::Extent2D) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let mut events = Self {
            event_loop,
            state: WindowState {
                size,
                window: None,
                pending: Vec::new(),
                create_error: None,
            },
        };

        // The window is created on the first resume
        for _ in 0..STARTUP_PUMP_ATTEMPTS {
            let status = events
                .event_loop
                .pump_app_events(Some(STARTUP_PUMP_TIMEOUT), &mut events.state);
            if let Some(e) = events.state.create_error.take() {
                return Err(eyre!("Failed to create window: {}", e));
            }
            if events.state.window.is_some() {
                return Ok(events);
            }
            if let PumpStatus::Exit(code) = status {
                return Err(eyre!("Event loop exited with {} before the window was created", code));
            }
        }

        Err(eyre!("Window was not created"))
    }

    pub fn window(&self) -> Option<&Arc<Window>> {
        self.state.window.as_ref()
    }
}

impl EventSource for WindowEvents {
    fn pump_events(&mut self) -> Vec<WindowEvent> {
        if let PumpStatus::Exit(_) = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state)
        {
            self.state.pending.push(WindowEvent::CloseRequested);
        }
        std::mem::take(&mut self.state.pending)
    }
}
