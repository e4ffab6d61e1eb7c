use std::ffi::{c_char, CStr, CString};
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use crate::renderer::device::{ColorTarget, DeviceContext, GraphicsPipelineDesc};
use crate::renderer::vulkan::image::Image;
use crate::renderer::vulkan::instance::{RenderInstance, Surface};

#[derive(Debug, Clone, Copy)]
pub struct Queue {
    pub family_index: u32,
    pub handle: vk::Queue,
}

/// Objects created through [`DeviceContext`], destroyed with the device.
#[derive(Default)]
struct Resources {
    images: Vec<Image>,
    render_passes: Vec<vk::RenderPass>,
    framebuffers: Vec<vk::Framebuffer>,
    shader_modules: Vec<vk::ShaderModule>,
    pipeline_layouts: Vec<vk::PipelineLayout>,
    pipelines: Vec<vk::Pipeline>,
}

/// Logical device with a single graphics queue that can also present when a
/// surface exists.
pub struct VulkanDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub graphics_queue: Queue,

    memory_allocator: Option<Arc<Mutex<Allocator>>>,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    resources: Mutex<Resources>,

    instance: Arc<RenderInstance>,
}

impl VulkanDevice {
    pub fn new(instance: Arc<RenderInstance>) -> Result<Self> {
        let surface = instance.surface();
        let (physical_device, graphics_queue_family) = Self::select_physical_device(
            &instance.instance,
            surface,
        )?;

        let (logical_device, graphics_queue) = Self::create_logical_device(
            &instance.instance,
            physical_device,
            graphics_queue_family,
            surface.is_some(),
        )?;

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: logical_device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: true,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: true,
                log_frees: true,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        let debug_utils = instance
            .debug_utils_enabled()
            .then(|| ash::ext::debug_utils::Device::new(&instance.instance, &logical_device));

        let props = unsafe { instance.instance.get_physical_device_properties(physical_device) };
        log::info!(
            "Selected {:?} ({:?}), graphics queue family {}",
            props.device_name_as_c_str().unwrap_or(c"<unknown>"),
            props.device_type,
            graphics_queue.family_index,
        );

        Ok(Self {
            logical: Arc::new(logical_device),
            physical: physical_device,
            graphics_queue,

            memory_allocator: Some(Arc::new(Mutex::new(memory_allocator))),
            debug_utils,
            resources: Mutex::new(Resources::default()),

            instance,
        })
    }

    pub fn instance(&self) -> &Arc<RenderInstance> {
        &self.instance
    }

    fn memory_allocator(&self) -> Result<Arc<Mutex<Allocator>>> {
        self.memory_allocator
            .clone()
            .ok_or_eyre("Memory allocator already destroyed")
    }

    fn track(&self, f: impl FnOnce(&mut Resources)) -> Result<()> {
        let mut resources = self.resources
            .lock()
            .map_err(|e| eyre!(e.to_string()))?;
        f(&mut resources);
        Ok(())
    }

    fn select_physical_device(
        instance: &ash::Instance,
        surface: Option<&Surface>,
    ) -> Result<(vk::PhysicalDevice, u32)> {
        let req_device_exts = Self::get_required_device_extensions(surface.is_some());
        let devices = unsafe { instance.enumerate_physical_devices()? };

        devices
            .into_iter()
            // Command recording relies on core 1.3 entry points
            .filter(|device| {
                let props = unsafe { instance.get_physical_device_properties(*device) };
                props.api_version >= vk::API_VERSION_1_3
            })
            // Filter out devices that do not contain the required device extensions
            .filter(|device| {
                let supported_extensions = unsafe {
                    instance
                        .enumerate_device_extension_properties(*device)
                        .unwrap_or_default()
                };

                req_device_exts.iter().all(|req_ext| {
                    supported_extensions
                        .iter()
                        .filter_map(|sup_ext| sup_ext.extension_name_as_c_str().ok())
                        .any(|sup_ext| sup_ext == *req_ext)
                })
            })
            // Filter out devices without a graphics queue, which must also
            // present when there is something to present to
            .filter_map(|device| {
                let props = unsafe {
                    instance.get_physical_device_queue_family_properties(device)
                };

                props
                    .iter()
                    .enumerate()
                    .position(|(i, q)| {
                        let supports_graphics = q.queue_flags.contains(vk::QueueFlags::GRAPHICS);
                        let supports_present = surface.is_none_or(|surface| unsafe {
                            surface.loader
                                .get_physical_device_surface_support(device, i as u32, surface.surface)
                                .unwrap_or(false)
                        });
                        supports_graphics && supports_present
                    })
                    .map(|index| (device, index as u32))
            })
            .min_by_key(|(device, _)| {
                let props = unsafe { instance.get_physical_device_properties(*device) };
                match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                    vk::PhysicalDeviceType::CPU => 3,
                    vk::PhysicalDeviceType::OTHER => 4,
                    _ => 5,
                }
            })
            .ok_or_eyre("No suitable physical device found")
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        presents: bool,
    ) -> Result<(ash::Device, Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos = [
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(graphics_queue_family)
                .queue_priorities(&queue_priorities),
        ];

        let enabled_extension_names = Self::get_required_device_extensions(presents)
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let supported = unsafe { instance.get_physical_device_features(physical_device) };
        if supported.sampler_anisotropy == vk::FALSE {
            log::warn!("samplerAnisotropy not supported, leaving it disabled");
        }
        let enabled_features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(supported.sampler_anisotropy == vk::TRUE);
        let mut synchronization2_features =
            vk::PhysicalDeviceSynchronization2Features::default()
                .synchronization2(true);

        let device = {
            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&enabled_extension_names)
                .enabled_features(&enabled_features)
                .push_next(&mut synchronization2_features);

            unsafe {
                instance.create_device(physical_device, &device_create_info, None)?
            }
        };

        let graphics_queue = Queue {
            family_index: graphics_queue_family,
            handle: unsafe { device.get_device_queue(graphics_queue_family, 0) },
        };

        Ok((device, graphics_queue))
    }

    fn get_required_device_extensions(presents: bool) -> Vec<&'static CStr> {
        let mut exts = Vec::new();
        if presents {
            exts.push(ash::khr::swapchain::NAME);
        }

        #[cfg(target_os = "macos")]
        exts.push(ash::khr::portability_subset::NAME);

        exts
    }

    fn create_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<vk::Pipeline> {
        let states = desc.states;
        let stages = desc
            .stages
            .iter()
            .map(|stage| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage.stage)
                    .module(stage.module)
                    .name(stage.entry_point)
            })
            .collect::<Vec<_>>();

        // Full-screen geometry comes from the vertex index alone
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(
                states
                    .input_assembly()
                    .map_or(vk::PrimitiveTopology::TRIANGLE_LIST, |s| s.topology),
            );

        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = {
            let info = vk::PipelineRasterizationStateCreateInfo::default()
                .polygon_mode(vk::PolygonMode::FILL)
                .cull_mode(vk::CullModeFlags::NONE)
                .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
                .line_width(1.0);
            match states.rasterization() {
                Some(s) => info
                    .polygon_mode(s.polygon_mode)
                    .cull_mode(s.cull_mode)
                    .front_face(s.front_face)
                    .line_width(s.line_width),
                None => info,
            }
        };

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(
                states
                    .multisample()
                    .map_or(vk::SampleCountFlags::TYPE_1, |s| s.samples),
            );

        let depth_stencil = match states.depth_stencil() {
            Some(s) => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(s.depth_test_enable)
                .depth_write_enable(s.depth_write_enable)
                .depth_compare_op(s.depth_compare_op),
            None => vk::PipelineDepthStencilStateCreateInfo::default(),
        };

        let blend_attachments = states
            .color_blend()
            .map(|s| {
                s.attachments
                    .iter()
                    .map(|attachment| {
                        vk::PipelineColorBlendAttachmentState::default()
                            .blend_enable(attachment.blend_enable)
                            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                            .color_blend_op(vk::BlendOp::ADD)
                            .src_alpha_blend_factor(vk::BlendFactor::ONE)
                            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                            .alpha_blend_op(vk::BlendOp::ADD)
                            .color_write_mask(attachment.color_write_mask)
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default()
            .dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.logical
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
                .map_err(|(_, e)| e)?
        };

        pipelines
            .into_iter()
            .next()
            .ok_or_eyre("Pipeline creation returned no pipeline")
    }
}

impl DeviceContext for VulkanDevice {
    fn queue_family_index(&self) -> u32 {
        self.graphics_queue.family_index
    }

    fn create_color_target(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<ColorTarget> {
        let image = Image::new_color_target(
            extent,
            format,
            samples,
            "Pass color target",
            self.memory_allocator()?,
            self.logical.clone(),
        )?;
        let target = ColorTarget {
            image: image.image,
            view: image.view,
            format: image.format,
            extent: image.extent,
        };
        self.track(|r| r.images.push(image))?;
        Ok(target)
    }

    fn create_color_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass> {
        let attachments = [
            vk::AttachmentDescription::default()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        ];
        let color_refs = [
            vk::AttachmentReference::default()
                .attachment(0)
                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        ];
        let subpasses = [
            vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&color_refs),
        ];
        let dependencies = [color_pass_dependency()];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { self.logical.create_render_pass(&info, None)? };
        self.track(|r| r.render_passes.push(render_pass))?;
        Ok(render_pass)
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { self.logical.create_framebuffer(&info, None)? };
        self.track(|r| r.framebuffers.push(framebuffer))?;
        Ok(framebuffer)
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        let module = unsafe { self.logical.create_shader_module(&info, None)? };
        self.track(|r| r.shader_modules.push(module))?;
        Ok(module)
    }

    fn create_pipeline_layout(
        &self,
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::default()
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe { self.logical.create_pipeline_layout(&info, None)? };
        self.track(|r| r.pipeline_layouts.push(layout))?;
        Ok(layout)
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<vk::Pipeline> {
        let pipeline = self.create_pipeline(desc)?;
        self.track(|r| r.pipelines.push(pipeline))?;
        Ok(pipeline)
    }

    fn set_debug_name(
        &self,
        object_type: vk::ObjectType,
        handle: u64,
        name: &str,
    ) -> Result<()> {
        let Some(debug_utils) = &self.debug_utils else {
            return Ok(());
        };

        let name = CString::new(name)?;
        let info = vk::DebugUtilsObjectNameInfoEXT {
            object_type,
            object_handle: handle,
            p_object_name: name.as_ptr(),
            ..Default::default()
        };
        unsafe {
            debug_utils.set_debug_utils_object_name(&info)?;
        }
        Ok(())
    }
}

/// External dependency of every color pass. The clear waits for earlier
/// attachment writes and for the present blit reading the same target in a
/// previous frame.
fn color_pass_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::TRANSFER,
        )
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.logical.device_wait_idle() {
                log::error!("Failed to wait for device idle: {}", e);
            }

            if let Ok(mut resources) = self.resources.lock() {
                for pipeline in resources.pipelines.drain(..).rev() {
                    self.logical.destroy_pipeline(pipeline, None);
                }
                for layout in resources.pipeline_layouts.drain(..).rev() {
                    self.logical.destroy_pipeline_layout(layout, None);
                }
                for module in resources.shader_modules.drain(..).rev() {
                    self.logical.destroy_shader_module(module, None);
                }
                for framebuffer in resources.framebuffers.drain(..).rev() {
                    self.logical.destroy_framebuffer(framebuffer, None);
                }
                for render_pass in resources.render_passes.drain(..).rev() {
                    self.logical.destroy_render_pass(render_pass, None);
                }
                while let Some(image) = resources.images.pop() {
                    drop(image);
                }
            }

            // Allocator must go before the device it allocates from
            self.memory_allocator.take();
            self.logical.destroy_device(None);
        }
    }
}
