use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::vulkan::device::VulkanDevice;
use crate::renderer::vulkan::instance::Surface;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub extent: vk::Extent2D,
    pub format: vk::SurfaceFormatKHR,
    vsync: bool,
}

impl Swapchain {
    pub fn new(
        device: &VulkanDevice,
        fallback_extent: vk::Extent2D,
        vsync: bool,
    ) -> Result<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(
            &device.instance().instance,
            &device.logical,
        );
        let (swapchain, format, extent) = Self::create_swapchain(
            device,
            &swapchain_loader,
            fallback_extent,
            vsync,
            vk::SwapchainKHR::null(),
        )?;
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };

        log::info!(
            "Created swapchain: {} image(s), {}x{}, {:?}",
            images.len(),
            extent.width,
            extent.height,
            format.format,
        );

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            extent,
            format,
            vsync,
        })
    }

    /// Replaces the swapchain after the surface changed. The device must be idle.
    pub fn recreate(&mut self, device: &VulkanDevice, fallback_extent: vk::Extent2D) -> Result<()> {
        let (swapchain, format, extent) = Self::create_swapchain(
            device,
            &self.swapchain_loader,
            fallback_extent,
            self.vsync,
            self.swapchain,
        )?;
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }

        self.swapchain = swapchain;
        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };
        self.format = format;
        self.extent = extent;

        log::debug!("Recreated swapchain at {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Index of the next image, or `None` when the swapchain is out of date.
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<Option<u32>> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, _suboptimal)) => Ok(Some(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Queues `index` for presentation. Returns `true` when the swapchain
    /// should be recreated.
    pub fn present(&self, queue: vk::Queue, wait: vk::Semaphore, index: u32) -> Result<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn create_swapchain(
        device: &VulkanDevice,
        swapchain_loader: &ash::khr::swapchain::Device,
        fallback_extent: vk::Extent2D,
        vsync: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<(vk::SwapchainKHR, vk::SurfaceFormatKHR, vk::Extent2D)> {
        let Surface { surface, loader } = device
            .instance()
            .surface()
            .ok_or_eyre("Swapchain requires a surface")?;
        let physical_device = device.physical;

        let surface_capabilities = unsafe {
            loader.get_physical_device_surface_capabilities(physical_device, *surface)?
        };
        let surface_formats = unsafe {
            loader.get_physical_device_surface_formats(physical_device, *surface)?
        };
        let surface_present_modes = unsafe {
            loader.get_physical_device_surface_present_modes(physical_device, *surface)?
        };

        let surface_format = surface_formats
            .iter()
            .find(|format| {
                format.format == vk::Format::B8G8R8A8_UNORM
                    && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| surface_formats.first())
            .copied()
            .ok_or_eyre("No suitable surface format found")?;

        let present_mode = if vsync {
            vk::PresentModeKHR::FIFO
        } else {
            [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
                .into_iter()
                .find(|mode| surface_present_modes.contains(mode))
                .unwrap_or(vk::PresentModeKHR::FIFO)
        };

        let image_extent = if surface_capabilities.current_extent.width != u32::MAX {
            surface_capabilities.current_extent
        } else {
            vk::Extent2D {
                width: fallback_extent.width.clamp(
                    surface_capabilities.min_image_extent.width,
                    surface_capabilities.max_image_extent.width,
                ),
                height: fallback_extent.height.clamp(
                    surface_capabilities.min_image_extent.height,
                    surface_capabilities.max_image_extent.height,
                ),
            }
        };

        let min_image_count = {
            let min = surface_capabilities.min_image_count;
            let max = surface_capabilities.max_image_count;
            // One more than the minimum so acquiring does not wait on the driver
            if max > 0 && min + 1 > max {
                max
            } else {
                min + 1
            }
        };
        let pre_transform = if surface_capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            surface_capabilities.current_transform
        };

        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(*surface)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(image_extent)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe {
            swapchain_loader.create_swapchain(&swapchain_info, None)?
        };

        Ok((swapchain, surface_format, image_extent))
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
