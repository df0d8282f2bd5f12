//! Instance, physical device selection and logical device

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;

use vh_core::gpu_debug;

use super::library::device_name;
use super::{GpuError, VkResultExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Physical device plus the queue family rendering runs on
pub(super) struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub name: String,
}

pub(super) fn create_instance(entry: &ash::Entry, validation: bool) -> Result<ash::Instance, GpuError> {
    let app_name = c"voodoo-hle";
    let app_info = vk::ApplicationInfo::default()
        .application_name(app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(app_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_1);

    let mut layers = Vec::new();
    if validation {
        // SAFETY: plain enumeration through loaded entry points
        let available = unsafe { entry.enumerate_instance_layer_properties() }.unwrap_or_default();
        let found = available
            .iter()
            .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
        if found {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            tracing::warn!("Validation requested but {VALIDATION_LAYER:?} is not installed");
        }
    }

    let instance_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layers);

    // SAFETY: create info and everything it points to outlive the call
    unsafe { entry.create_instance(&instance_info, None) }.step("vkCreateInstance")
}

/// First device with a graphics queue, preferring discrete GPUs
pub(super) fn select_physical_device(instance: &ash::Instance) -> Result<SelectedDevice, GpuError> {
    // SAFETY: the instance is live for the duration of the call
    let devices = unsafe { instance.enumerate_physical_devices() }.step("vkEnumeratePhysicalDevices")?;

    let mut best: Option<(SelectedDevice, bool)> = None;
    for physical_device in devices {
        // SAFETY: handles come from this instance
        let (props, families) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_queue_family_properties(physical_device),
            )
        };
        let Some(queue_family) = families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        else {
            continue;
        };
        let discrete = props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
        if best.as_ref().is_some_and(|(_, best_discrete)| *best_discrete || !discrete) {
            continue;
        }
        best = Some((
            SelectedDevice {
                physical_device,
                queue_family: queue_family as u32,
                name: device_name(&props),
            },
            discrete,
        ));
    }
    best.map(|(sel, _)| sel).ok_or(GpuError::NoSuitableDevice)
}

/// Instance and logical device with one graphics queue.
///
/// Dropping destroys the device before the instance; everything created
/// from the device must already be gone.
pub struct GpuDevice {
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub queue_family: u32,
    pub name: String,
    /// `dualSrcBlend` was enabled at device creation
    pub dual_source_blend: bool,
    _entry: Arc<ash::Entry>,
}

impl GpuDevice {
    pub fn create(entry: Arc<ash::Entry>, validation: bool) -> Result<Self, GpuError> {
        let instance = create_instance(&entry, validation)?;
        match Self::open(&instance) {
            Ok((selected, device, queue, dual_source_blend)) => {
                gpu_debug!(
                    device = %selected.name,
                    family = selected.queue_family,
                    dual_source_blend,
                    "Vulkan device created"
                );
                Ok(Self {
                    instance,
                    physical_device: selected.physical_device,
                    device,
                    queue,
                    queue_family: selected.queue_family,
                    name: selected.name,
                    dual_source_blend,
                    _entry: entry,
                })
            }
            Err(e) => {
                // SAFETY: no child objects were created
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    fn open(instance: &ash::Instance) -> Result<(SelectedDevice, ash::Device, vk::Queue, bool), GpuError> {
        let selected = select_physical_device(instance)?;
        // SAFETY: physical device belongs to `instance`
        let supported = unsafe { instance.get_physical_device_features(selected.physical_device) };
        let dual_source_blend = supported.dual_src_blend == vk::TRUE;
        let features = vk::PhysicalDeviceFeatures::default().dual_src_blend(dual_source_blend);

        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(selected.queue_family)
            .queue_priorities(&priorities);
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .enabled_features(&features);

        // SAFETY: physical device belongs to `instance`
        let device = unsafe { instance.create_device(selected.physical_device, &device_info, None) }
            .step("vkCreateDevice")?;
        // SAFETY: one queue was requested from this family
        let queue = unsafe { device.get_device_queue(selected.queue_family, 0) };
        Ok((selected, device, queue, dual_source_blend))
    }

    /// Block until the queue drains; errors are only logged
    pub fn wait_idle(&self) {
        // SAFETY: device is live
        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            tracing::warn!("vkDeviceWaitIdle failed: {e}");
        }
    }
}

impl Drop for GpuDevice {
    fn drop(&mut self) {
        self.wait_idle();
        // SAFETY: owners of child objects release them before the device is dropped
        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        gpu_debug!(device = %self.name, "Vulkan device destroyed");
    }
}
