use std::ffi::{c_char, c_void, CStr};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;
use crate::renderer::config::RenderConfig;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
}

/// Initializes Vulkan and keeps the Vulkan instance alive
pub struct RenderInstance {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface: Option<Surface>,
}

impl RenderInstance {
    pub fn new(config: &RenderConfig, window: Option<&Window>) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| eyre!("Failed to load the Vulkan library: {}", e))?;

        let layers = if config.validation {
            Self::available_validation_layers(&entry)?
        } else {
            Vec::new()
        };
        let enable_debug_utils = !layers.is_empty();

        let instance = Self::create_instance(&entry, window, &layers, enable_debug_utils)?;

        let debug_utils = if enable_debug_utils {
            Some(Self::create_debug_utils_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface = match window {
            Some(window) => Some(Self::create_surface(&entry, &instance, window)?),
            None => None,
        };

        log::info!(
            "Created Vulkan instance (validation: {}, surface: {})",
            enable_debug_utils,
            surface.is_some(),
        );

        Ok(Self {
            entry,
            instance,
            debug_utils,
            surface,
        })
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    /// Whether `VK_EXT_debug_utils` is enabled, which object names need.
    pub fn debug_utils_enabled(&self) -> bool {
        self.debug_utils.is_some()
    }

    fn create_instance(
        entry: &ash::Entry,
        window: Option<&Window>,
        layers: &[&CStr],
        enable_debug_utils: bool,
    ) -> Result<ash::Instance> {
        let application_info = vk::ApplicationInfo::default()
            .application_name(c"pushconst-repro")
            .api_version(vk::API_VERSION_1_3);
        let enabled_layer_names = layers
            .iter()
            .map(|layer| layer.as_ptr())
            .collect::<Vec<*const c_char>>();
        let enabled_extension_names = Self::get_required_instance_extensions(
            window,
            enable_debug_utils,
        )?;

        let mut debug_info = debug_utils_messenger_create_info();
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        if enable_debug_utils {
            // Also reports problems during instance creation and destruction
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info
            .flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        Ok(unsafe {
            entry.create_instance(&instance_info, None)?
        })
    }

    fn create_debug_utils_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils_loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let debug_utils_info = debug_utils_messenger_create_info();
        let debug_utils_messenger = unsafe {
            debug_utils_loader.create_debug_utils_messenger(&debug_utils_info, None)?
        };
        Ok((debug_utils_loader, debug_utils_messenger))
    }

    fn create_surface(
        entry: &ash::Entry,
        instance: &ash::Instance,
        window: &Window,
    ) -> Result<Surface> {
        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        let loader = ash::khr::surface::Instance::new(entry, instance);
        Ok(Surface { surface, loader })
    }

    fn get_required_instance_extensions(
        window: Option<&Window>,
        enable_debug_utils: bool,
    ) -> Result<Vec<*const c_char>> {
        let mut exts = match window {
            Some(window) => ash_window::enumerate_required_extensions(
                window.display_handle()?.as_raw()
            )?.to_vec(),
            None => Vec::new(),
        };

        if enable_debug_utils {
            exts.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        #[cfg(target_os = "macos")]
        {
            exts.push(ash::khr::portability_enumeration::NAME.as_ptr());
            exts.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
        }

        Ok(exts)
    }

    /// The validation layer if it is installed. Running without it is allowed
    /// but will not reproduce anything.
    fn available_validation_layers(entry: &ash::Entry) -> Result<Vec<&'static CStr>> {
        let supported_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        let supported = supported_layers
            .iter()
            .filter_map(|props| props.layer_name_as_c_str().ok())
            .any(|name| name == VALIDATION_LAYER);

        if supported {
            Ok(vec![VALIDATION_LAYER])
        } else {
            log::warn!("Validation layer {:?} not available, continuing without it", VALIDATION_LAYER);
            Ok(Vec::new())
        }
    }
}

impl Drop for RenderInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some(surface) = self.surface.take() {
                surface.loader.destroy_surface(surface.surface, None);
            }
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn debug_utils_messenger_create_info(
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || unsafe { (*p_callback_data).p_message.is_null() } {
        return vk::FALSE;
    }
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) };

    let level = match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Info,
        _ => log::Level::Trace,
    };
    log::log!(level, "[{:?}] {}", message_type, message.to_string_lossy());

    vk::FALSE
}
