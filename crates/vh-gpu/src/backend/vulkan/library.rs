//! Process-wide Vulkan loader
//!
//! Loading `libvulkan` happens at most once per [`VulkanLibrary`]. The
//! outcome (entry points or the load error) is cached until [`reset`] so
//! every backend sees the same answer.
//!
//! [`reset`]: VulkanLibrary::reset

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use vh_core::gpu_debug;

use super::device::{create_instance, select_physical_device};
use super::GpuError;

static GLOBAL: Lazy<Arc<VulkanLibrary>> = Lazy::new(|| Arc::new(VulkanLibrary::new()));

#[derive(Default)]
struct LoaderState {
    outcome: Option<Result<Arc<ash::Entry>, String>>,
    attempts: u32,
}

/// Owner of the loaded Vulkan entry points
#[derive(Default)]
pub struct VulkanLibrary {
    state: Mutex<LoaderState>,
}

impl VulkanLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared instance used by [`create_backend`](crate::backend::create_backend)
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Load the Vulkan library on first call; later calls return the cached outcome
    pub fn ensure_initialized(&self) -> Result<Arc<ash::Entry>, GpuError> {
        let mut state = self.state.lock();
        if state.outcome.is_none() {
            state.attempts += 1;
            // SAFETY: the loaded library stays alive as long as any Arc<Entry> does
            let loaded = unsafe { ash::Entry::load() };
            let outcome = match loaded {
                Ok(entry) => {
                    gpu_debug!("Vulkan loader initialized");
                    Ok(Arc::new(entry))
                }
                Err(e) => Err(e.to_string()),
            };
            state.outcome = Some(outcome);
        }
        match &state.outcome {
            Some(Ok(entry)) => Ok(Arc::clone(entry)),
            Some(Err(msg)) => Err(GpuError::Loader(msg.clone())),
            None => Err(GpuError::Loader("loader state missing".into())),
        }
    }

    /// Whether a load has been attempted (successfully or not)
    pub fn is_initialized(&self) -> bool {
        self.state.lock().outcome.is_some()
    }

    /// Number of times the library was actually loaded
    pub fn load_attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// Forget the cached outcome so the next call loads again
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.outcome = None;
        state.attempts = 0;
    }
}

/// What the capability probe found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
}

/// Check that Vulkan loads and exposes a device with a graphics queue
pub fn probe_vulkan(library: &VulkanLibrary) -> Result<AdapterInfo, GpuError> {
    let entry = library.ensure_initialized()?;
    let instance = create_instance(&entry, false)?;
    let selected = select_physical_device(&instance);
    let info = selected.map(|sel| {
        // SAFETY: the physical device was enumerated from this live instance
        let props = unsafe { instance.get_physical_device_properties(sel.physical_device) };
        AdapterInfo {
            name: sel.name,
            device_type: props.device_type,
            api_version: props.api_version,
        }
    });
    // SAFETY: nothing created from the instance outlives this call
    unsafe { instance.destroy_instance(None) };
    info
}

/// Device name from its properties, lossily decoded
pub(super) fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
    props
        .device_name_as_c_str()
        .map(CStr::to_string_lossy)
        .map(|name| name.into_owned())
        .unwrap_or_else(|_| "unknown device".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_at_most_once() {
        let library = VulkanLibrary::new();
        assert!(!library.is_initialized());

        let first = library.ensure_initialized();
        let second = library.ensure_initialized();
        assert_eq!(library.load_attempts(), 1);
        assert!(library.is_initialized());
        match (first, second) {
            (Ok(a), Ok(b)) => assert!(Arc::ptr_eq(&a, &b)),
            (Err(a), Err(b)) => assert_eq!(a.to_string(), b.to_string()),
            _ => panic!("loader outcome changed between calls"),
        }
    }

    #[test]
    fn test_reset_allows_reload() {
        let library = VulkanLibrary::new();
        let _ = library.ensure_initialized();
        library.reset();
        assert!(!library.is_initialized());
        assert_eq!(library.load_attempts(), 0);
        let _ = library.ensure_initialized();
        assert_eq!(library.load_attempts(), 1);
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&VulkanLibrary::global(), &VulkanLibrary::global()));
    }

    #[test]
    fn test_probe_reports_or_errors() {
        // Either outcome is fine; the probe must not panic without a driver
        match probe_vulkan(&VulkanLibrary::new()) {
            Ok(info) => assert!(!info.name.is_empty()),
            Err(e) => assert!(!e.to_string().is_empty()),
        }
    }
}
