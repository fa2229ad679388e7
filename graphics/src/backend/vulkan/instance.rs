//! Headless Vulkan instance creation.

use std::ffi::CStr;

use ash::vk;

use crate::error::GraphicsError;

use super::debug;

/// Vulkan 1.3 for core dynamic rendering and timeline semaphores.
pub(super) const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance-level handles shared by the backend and every device it creates.
///
/// Devices keep this alive so the instance is destroyed after the last of
/// them.
pub(super) struct InstanceShared {
    pub(super) entry: ash::Entry,
    pub(super) instance: ash::Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl InstanceShared {
    /// Load Vulkan and create an instance without any surface extensions.
    pub(super) fn new(validation: bool) -> Result<Self, GraphicsError> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GraphicsError::DeviceInit(format!("failed to load Vulkan: {e}")))?;

        let validation = if validation && !has_validation_layer(&entry) {
            log::warn!("Validation layers requested but not available");
            false
        } else {
            validation
        };

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"Vista")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Vista")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(REQUIRED_API_VERSION);

        let mut extensions = Vec::new();
        let mut layers = Vec::new();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            layers.push(VALIDATION_LAYER_NAME.as_ptr());
        }

        #[allow(unused_mut)]
        let mut flags = vk::InstanceCreateFlags::empty();
        #[cfg(target_os = "macos")]
        {
            extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
            flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        }

        let create_info = vk::InstanceCreateInfo::default()
            .flags(flags)
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
            GraphicsError::DeviceInit(format!("failed to create Vulkan instance: {e:?}"))
        })?;

        let debug = if validation {
            let utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match debug::create_debug_messenger(&utils) {
                Ok(messenger) => Some((utils, messenger)),
                Err(e) => {
                    log::warn!("{e}");
                    None
                }
            }
        } else {
            None
        };

        log::info!("Vulkan instance created (validation: {})", debug.is_some());

        Ok(Self {
            entry,
            instance,
            debug,
        })
    }
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        unsafe {
            if let Some((utils, messenger)) = self.debug.take() {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn has_validation_layer(entry: &ash::Entry) -> bool {
    let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER_NAME))
}
