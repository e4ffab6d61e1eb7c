use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use winit::event::WindowEvent;
use crate::renderer::config::RenderConfig;
use crate::renderer::device::{ColorTarget, CommandRecorder, DeviceContext};
use crate::renderer::viewer::{EventSource, FrameExecutor};
use crate::renderer::vulkan::device::VulkanDevice;
use crate::renderer::vulkan::recorder::AshRecorder;
use crate::renderer::vulkan::swapchain::Swapchain;
use crate::renderer::vulkan::util;

/// Per-slot synchronization of a frame in flight.
#[derive(Debug, Clone, Copy)]
struct FrameSlot {
    command_buffer: vk::CommandBuffer,

    // Signals when the swapchain image is ready to be written.
    image_available: vk::Semaphore,

    // Signals when the slot can be reused.
    in_flight: vk::Fence,
}

/// One semaphore per swapchain image, signaled by the submit that renders into
/// the image and waited on by its present. A semaphore is only signaled again
/// after its image has been reacquired, which happens once the previous
/// present is done with it.
#[derive(Debug, Default)]
struct PresentSemaphores {
    semaphores: Vec<vk::Semaphore>,
}

impl PresentSemaphores {
    fn get(&self, image: u32) -> Result<vk::Semaphore> {
        self.semaphores
            .get(image as usize)
            .copied()
            .ok_or_else(|| eyre!("No present semaphore for swapchain image {}", image))
    }

    fn len(&self) -> usize {
        self.semaphores.len()
    }

    /// Grows or shrinks the set to `count` semaphores. Unused semaphores
    /// are kept as they are.
    fn resize(
        &mut self,
        count: usize,
        mut create: impl FnMut() -> Result<vk::Semaphore>,
        mut destroy: impl FnMut(vk::Semaphore),
    ) -> Result<()> {
        while self.semaphores.len() > count {
            if let Some(semaphore) = self.semaphores.pop() {
                destroy(semaphore);
            }
        }
        while self.semaphores.len() < count {
            self.semaphores.push(create()?);
        }
        Ok(())
    }

    fn destroy_all(&mut self, destroy: impl FnMut(vk::Semaphore)) {
        self.semaphores.drain(..).for_each(destroy);
    }
}

pub struct VulkanExecutor {
    frames: Vec<FrameSlot>,
    current: usize,
    command_pool: vk::CommandPool,

    swapchain: Option<Swapchain>,
    render_finished: PresentSemaphores,
    acquired_image: Option<u32>,
    needs_recreate: bool,
    fallback_extent: vk::Extent2D,

    frame_count: u64,
    max_frames: Option<u64>,

    device: Arc<VulkanDevice>,
    // Owns the window, so it goes after the device and its surface
    events: Option<Box<dyn EventSource>>,
}

impl VulkanExecutor {
    /// Presents to a swapchain when the device's instance has a surface,
    /// otherwise renders headless.
    pub fn new(
        device: Arc<VulkanDevice>,
        config: &RenderConfig,
        events: Option<Box<dyn EventSource>>,
        max_frames: Option<u64>,
    ) -> Result<Self> {
        let logical = &device.logical;

        let command_pool = unsafe {
            logical.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(device.graphics_queue.family_index)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )?
        };

        let command_buffers = unsafe {
            logical.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(config.frames_in_flight.max(1) as u32),
            )?
        };

        let frames = command_buffers
            .into_iter()
            .map(|command_buffer| {
                let image_available = unsafe {
                    logical.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
                };
                let in_flight = unsafe {
                    logical.create_fence(
                        &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                        None,
                    )?
                };
                Ok(FrameSlot {
                    command_buffer,
                    image_available,
                    in_flight,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let swapchain = match device.instance().surface() {
            Some(_) => Some(Swapchain::new(&device, config.extent, config.vsync)?),
            None => None,
        };

        let mut render_finished = PresentSemaphores::default();
        render_finished.resize(
            swapchain.as_ref().map_or(0, |swapchain| swapchain.images.len()),
            || create_semaphore(logical),
            |semaphore| unsafe { logical.destroy_semaphore(semaphore, None) },
        )?;

        log::info!(
            "Frame executor ready: {} frame(s) in flight, {}",
            frames.len(),
            if swapchain.is_some() { "presenting" } else { "headless" },
        );

        Ok(Self {
            frames,
            current: 0,
            command_pool,

            swapchain,
            render_finished,
            acquired_image: None,
            needs_recreate: false,
            fallback_extent: config.extent,

            frame_count: 0,
            max_frames,

            device,
            events,
        })
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        unsafe { self.device.logical.device_wait_idle()? };
        if let Some(swapchain) = self.swapchain.as_mut() {
            swapchain.recreate(&self.device, self.fallback_extent)?;

            let logical = self.device.logical.as_ref();
            self.render_finished.resize(
                swapchain.images.len(),
                || create_semaphore(logical),
                |semaphore| unsafe { logical.destroy_semaphore(semaphore, None) },
            )?;
        }
        self.needs_recreate = false;
        Ok(())
    }

    fn acquire(&mut self, signal: vk::Semaphore) -> Result<Option<u32>> {
        for _ in 0..2 {
            let Some(swapchain) = self.swapchain.as_ref() else {
                return Ok(None);
            };
            match swapchain.acquire_next_image(signal)? {
                Some(index) => return Ok(Some(index)),
                None => self.recreate_swapchain()?,
            }
        }
        Err(eyre!("Swapchain stayed out of date after recreation"))
    }

    /// Copies `source` into the acquired swapchain image and leaves it ready
    /// for presentation.
    fn record_present_blit(&self, cmd: vk::CommandBuffer, source: ColorTarget, index: u32) -> Result<()> {
        let Some(swapchain) = self.swapchain.as_ref() else {
            return Ok(());
        };
        let target = *swapchain
            .images
            .get(index as usize)
            .ok_or_else(|| eyre!("Swapchain image {} out of range", index))?;
        let logical = self.device.logical.as_ref();

        util::transition_image_layout(
            logical,
            cmd,
            source.image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        util::transition_image_layout(
            logical,
            cmd,
            target,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        util::blit_image_to_image(
            logical,
            cmd,
            source.image,
            source.extent,
            target,
            swapchain.extent,
        );
        util::transition_image_layout(
            logical,
            cmd,
            target,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        Ok(())
    }
}

impl FrameExecutor for VulkanExecutor {
    fn device(&self) -> &dyn DeviceContext {
        self.device.as_ref()
    }

    fn advance_to_next_frame(&mut self) -> Result<bool> {
        if self.max_frames.is_some_and(|max| self.frame_count >= max) {
            return Ok(false);
        }

        self.current = (self.frame_count % self.frames.len() as u64) as usize;
        let frame = self.frames[self.current];

        unsafe {
            self.device.logical.wait_for_fences(&[frame.in_flight], true, u64::MAX)?;
        }

        if self.needs_recreate {
            self.recreate_swapchain()?;
        }
        self.acquired_image = self.acquire(frame.image_available)?;

        self.frame_count += 1;
        Ok(true)
    }

    fn poll_events(&mut self) -> Vec<WindowEvent> {
        self.events
            .as_mut()
            .map(|events| events.pump_events())
            .unwrap_or_default()
    }

    fn record_and_submit(
        &mut self,
        record: &mut dyn FnMut(&mut dyn CommandRecorder) -> Result<()>,
        present_source: Option<ColorTarget>,
    ) -> Result<()> {
        let frame = self.frames[self.current];
        let cmd = frame.command_buffer;
        let logical = self.device.logical.clone();

        unsafe {
            logical.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            logical.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }

        record(&mut AshRecorder::new(&logical, cmd))?;

        if let (Some(index), Some(source)) = (self.acquired_image, present_source) {
            self.record_present_blit(cmd, source, index)?;
        }

        unsafe {
            logical.end_command_buffer(cmd)?;
        }

        let command_buffer_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd)];
        let wait_infos = [vk::SemaphoreSubmitInfo::default()
            .semaphore(frame.image_available)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)];
        let signal_infos = self
            .acquired_image
            .map(|index| self.render_finished.get(index))
            .transpose()?
            .map(|semaphore| {
                [vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)]
            });

        // Headless frames have no swapchain image to wait on or hand over
        let (waits, signals): (&[vk::SemaphoreSubmitInfo], &[vk::SemaphoreSubmitInfo]) =
            match &signal_infos {
                Some(signal_infos) => (&wait_infos, signal_infos),
                None => (&[], &[]),
            };
        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffer_infos)
            .wait_semaphore_infos(waits)
            .signal_semaphore_infos(signals);

        unsafe {
            logical.reset_fences(&[frame.in_flight])?;
            logical.queue_submit2(
                self.device.graphics_queue.handle,
                &[submit_info],
                frame.in_flight,
            )?;
        }

        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        let (Some(swapchain), Some(index)) = (self.swapchain.as_ref(), self.acquired_image.take()) else {
            return Ok(());
        };
        let wait = self.render_finished.get(index)?;

        if swapchain.present(self.device.graphics_queue.handle, wait, index)? {
            self.needs_recreate = true;
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device.logical.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for VulkanExecutor {
    fn drop(&mut self) {
        let logical = &self.device.logical;
        unsafe {
            if let Err(e) = logical.device_wait_idle() {
                log::error!("Failed to wait for device idle: {}", e);
            }
            for frame in self.frames.drain(..) {
                logical.destroy_semaphore(frame.image_available, None);
                logical.destroy_fence(frame.in_flight, None);
            }
            self.render_finished
                .destroy_all(|semaphore| logical.destroy_semaphore(semaphore, None));
            logical.destroy_command_pool(self.command_pool, None);
        }
    }
}

fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    Ok(unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use ash::vk::Handle;
    use super::*;

    /// Fabricated handles, counting up from 1.
    struct FakeSemaphores {
        next: u64,
        destroyed: RefCell<Vec<vk::Semaphore>>,
    }

    impl FakeSemaphores {
        fn new() -> Self {
            Self {
                next: 1,
                destroyed: RefCell::new(Vec::new()),
            }
        }
    }

    fn resize(set: &mut PresentSemaphores, fake: &mut FakeSemaphores, count: usize) {
        let destroyed = &fake.destroyed;
        let mut next = fake.next;
        set.resize(
            count,
            || {
                let semaphore = vk::Semaphore::from_raw(next);
                next += 1;
                Ok(semaphore)
            },
            |semaphore| destroyed.borrow_mut().push(semaphore),
        )
        .unwrap();
        fake.next = next;
    }

    #[test]
    fn each_swapchain_image_gets_its_own_semaphore() {
        let mut fake = FakeSemaphores::new();
        let mut set = PresentSemaphores::default();
        resize(&mut set, &mut fake, 3);

        let semaphores = (0..3).map(|image| set.get(image).unwrap()).collect::<Vec<_>>();
        assert_eq!(set.len(), 3);
        assert_ne!(semaphores[0], semaphores[1]);
        assert_ne!(semaphores[1], semaphores[2]);
        assert_ne!(semaphores[0], semaphores[2]);
        assert!(set.get(3).is_err());
    }

    #[test]
    fn more_images_than_frames_in_flight_never_share() {
        let frames_in_flight = RenderConfig::default().frames_in_flight;
        let mut fake = FakeSemaphores::new();
        let mut set = PresentSemaphores::default();
        resize(&mut set, &mut fake, frames_in_flight + 1);

        // Frame 0 and frame `frames_in_flight` use the same slot but different images
        let first = set.get(0).unwrap();
        let wrapped = set.get(frames_in_flight as u32).unwrap();
        assert_ne!(first, wrapped);
    }

    #[test]
    fn resize_follows_recreated_swapchain() {
        let mut fake = FakeSemaphores::new();
        let mut set = PresentSemaphores::default();
        resize(&mut set, &mut fake, 3);
        let kept = set.get(1).unwrap();

        resize(&mut set, &mut fake, 2);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(1).unwrap(), kept);
        assert_eq!(fake.destroyed.borrow().len(), 1);

        resize(&mut set, &mut fake, 4);
        assert_eq!(set.len(), 4);
        assert_eq!(fake.destroyed.borrow().len(), 1);
        assert_ne!(set.get(3).unwrap(), set.get(2).unwrap());
    }

    #[test]
    fn headless_has_no_present_semaphores() {
        let mut fake = FakeSemaphores::new();
        let mut set = PresentSemaphores::default();
        resize(&mut set, &mut fake, 0);

        assert_eq!(set.len(), 0);
        assert!(set.get(0).is_err());

        resize(&mut set, &mut fake, 2);
        let mut destroyed = Vec::new();
        set.destroy_all(|semaphore| destroyed.push(semaphore));
        assert_eq!(destroyed.len(), 2);
        assert_eq!(set.len(), 0);
    }
}
