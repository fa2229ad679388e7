//! Vulkan adapter enumeration and logical device creation.

use ash::vk;

use crate::device::DeviceCapabilities;
use crate::error::GraphicsError;
use crate::instance::{AdapterInfo, AdapterType};
use crate::queue::{QueueCapabilities, QueueFamilyInfo, QueueFamilyRequest};

use super::instance::REQUIRED_API_VERSION;

/// A physical device that meets the API version requirement.
pub(super) struct Adapter {
    pub(super) physical_device: vk::PhysicalDevice,
    pub(super) info: AdapterInfo,
    pub(super) capabilities: DeviceCapabilities,
    pub(super) families: Vec<QueueFamilyInfo>,
}

/// List usable adapters, discrete GPUs first.
pub(super) fn enumerate_adapters(instance: &ash::Instance) -> Result<Vec<Adapter>, GraphicsError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        GraphicsError::DeviceInit(format!("failed to enumerate physical devices: {e:?}"))
    })?;

    let mut adapters: Vec<Adapter> = devices
        .into_iter()
        .filter_map(|physical_device| {
            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            let name = properties
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "Unknown".to_string());

            if properties.api_version < REQUIRED_API_VERSION {
                log::info!(
                    "Skipping GPU {} (Vulkan {}.{})",
                    name,
                    vk::api_version_major(properties.api_version),
                    vk::api_version_minor(properties.api_version)
                );
                return None;
            }

            let device_type = match properties.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => AdapterType::Discrete,
                vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterType::Integrated,
                vk::PhysicalDeviceType::CPU => AdapterType::Software,
                _ => AdapterType::Unknown,
            };
            log::info!("Found GPU: {} (type: {:?})", name, device_type);

            let limits = properties.limits;
            Some(Adapter {
                physical_device,
                info: AdapterInfo {
                    name,
                    vendor: vendor_name(properties.vendor_id).to_string(),
                    device_type,
                },
                capabilities: DeviceCapabilities {
                    max_image_dimension: limits.max_image_dimension2_d,
                    max_buffer_size: limits.max_storage_buffer_range as u64,
                    max_push_constant_size: limits.max_push_constants_size,
                    compute_shaders: true,
                    timeline_semaphores: true,
                },
                families: queue_families(instance, physical_device),
            })
        })
        .collect();

    adapters.sort_by_key(|a| match a.info.device_type {
        AdapterType::Discrete => 0,
        AdapterType::Integrated => 1,
        AdapterType::Software => 2,
        AdapterType::Unknown => 3,
    });
    Ok(adapters)
}

fn queue_families(instance: &ash::Instance, device: vk::PhysicalDevice) -> Vec<QueueFamilyInfo> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    families
        .iter()
        .enumerate()
        .map(|(index, family)| {
            let mut capabilities = QueueCapabilities::empty();
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                capabilities |= QueueCapabilities::GRAPHICS;
            }
            if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
                capabilities |= QueueCapabilities::COMPUTE;
            }
            if family.queue_flags.contains(vk::QueueFlags::TRANSFER) {
                capabilities |= QueueCapabilities::TRANSFER;
            }
            QueueFamilyInfo::new(index as u32, capabilities, family.queue_count)
        })
        .collect()
}

fn vendor_name(vendor_id: u32) -> &'static str {
    match vendor_id {
        0x1002 => "AMD",
        0x10DE => "NVIDIA",
        0x8086 => "Intel",
        0x13B5 => "ARM",
        0x5143 => "Qualcomm",
        0x106B => "Apple",
        0x10005 => "Mesa",
        _ => "Unknown",
    }
}

/// Create a logical device with exactly the requested queues.
///
/// Timeline semaphores and dynamic rendering are enabled.
pub(super) fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    requests: &[QueueFamilyRequest],
) -> Result<ash::Device, GraphicsError> {
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = requests
        .iter()
        .map(|request| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(request.family_index)
                .queue_priorities(&request.priorities)
        })
        .collect();

    let mut vulkan_12_features =
        vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
    let mut vulkan_13_features =
        vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .push_next(&mut vulkan_12_features)
        .push_next(&mut vulkan_13_features);

    unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        GraphicsError::DeviceInit(format!("failed to create logical device: {e:?}"))
    })
}
