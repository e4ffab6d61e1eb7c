mod args;
mod window;

use std::process::ExitCode;
use std::sync::Arc;
use color_eyre::Result;
use crate::renderer::config::RenderConfig;
use crate::renderer::device::DeviceContext;
use crate::renderer::graph::{assemble, CommandGraph, Scenario, SceneViews};
use crate::renderer::trace::{TraceDevice, TraceExecutor};
use crate::renderer::viewer::{CloseHandler, EventSource, FrameExecutor, Viewer};
use crate::renderer::vulkan::{RenderInstance, VulkanDevice, VulkanExecutor};

pub use args::{Args, DEFAULT_DRY_RUN_FRAMES, DEFAULT_HEADLESS_FRAMES};
pub use window::WindowEvents;

/// Exit status when the device cannot be brought up.
const BOOTSTRAP_FAILURE: u8 = 255;

pub struct App {
    args: Args,
    config: RenderConfig,
}

impl App {
    pub fn new(args: Args) -> Self {
        let config = args.render_config();
        Self { args, config }
    }

    pub fn run(self) -> Result<ExitCode> {
        // Reject bad scenarios before anything touches the GPU
        let views = SceneViews::new(&self.config);
        let scenario = self.args.scenario(&views)?;
        log::info!("Running {:?}", scenario);

        if self.args.dry_run {
            self.run_traced(&scenario)?;
            return Ok(ExitCode::SUCCESS);
        }

        let (device, events) = match Self::bootstrap(&self.config, self.args.headless) {
            Ok(bootstrapped) => bootstrapped,
            Err(e) => {
                eprintln!("Failed to create device: {:?}", e);
                return Ok(ExitCode::from(BOOTSTRAP_FAILURE));
            }
        };

        let graph = assemble(
            device.as_ref(),
            device.queue_family_index(),
            &scenario,
            &self.config,
        )?;
        let executor = VulkanExecutor::new(device, &self.config, events, self.args.frame_limit())?;
        drive(executor, graph)?;

        Ok(ExitCode::SUCCESS)
    }

    fn run_traced(&self, scenario: &Scenario) -> Result<u64> {
        let device = Arc::new(TraceDevice::new(0));
        let graph = assemble(device.as_ref(), 0, scenario, &self.config)?;
        let executor = TraceExecutor::new(device, self.args.frame_limit().unwrap_or(DEFAULT_DRY_RUN_FRAMES))
            .with_command_logging(true);
        drive(executor, graph)
    }

    fn bootstrap(
        config: &RenderConfig,
        headless: bool,
    ) -> Result<(Arc<VulkanDevice>, Option<Box<dyn EventSource>>)> {
        let window_events = if headless {
            None
        } else {
            Some(WindowEvents::new(config.extent)?)
        };

        let instance = {
            let window = window_events
                .as_ref()
                .and_then(|events| events.window())
                .map(|window| window.as_ref());
            Arc::new(RenderInstance::new(config, window)?)
        };
        let device = Arc::new(VulkanDevice::new(instance)?);

        Ok((
            device,
            window_events.map(|events| Box::new(events) as Box<dyn EventSource>),
        ))
    }
}

/// Compiles `graph` on the executor's device and runs it until the executor
/// stops or the window closes.
fn drive<E: FrameExecutor>(executor: E, graph: CommandGraph) -> Result<u64> {
    let mut viewer = Viewer::new(executor);
    viewer.add_event_handler(CloseHandler);
    viewer.assign(vec![graph])?;
    viewer.compile()?;

    let frames = viewer.run_loop()?;
    log::info!("Terminated after {} frame(s)", frames);

    Ok(frames)
}
