//! Vulkan instance creation.

use std::ffi::{c_char, CStr, CString};

use ash::vk;
use cryptic_core::constants::ENGINE_NAME;
use raw_window_handle::RawDisplayHandle;

use crate::debug::{messenger_create_info, DebugMessenger};
use crate::error::{GpuError, Result};

/// Validation layer requested when validation is enabled.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Check whether every requested layer is among the available ones.
pub fn layers_supported(requested: &[&CStr], available: &[vk::LayerProperties]) -> bool {
    requested.iter().all(|layer| {
        available
            .iter()
            .any(|props| props.layer_name_as_c_str().ok() == Some(*layer))
    })
}

/// Vulkan instance together with its loader and optional debug messenger.
///
/// Dropping it destroys the messenger first, then the instance.
pub struct Instance {
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
}

impl Instance {
    /// Load Vulkan and create an instance able to present to `display`.
    ///
    /// If validation is requested but the layer is missing, a warning is
    /// logged and the instance is created without it.
    pub fn new(app_name: &str, display: RawDisplayHandle, enable_validation: bool) -> Result<Self> {
        // SAFETY: loading the system Vulkan library has no preconditions beyond
        // the library itself being well behaved.
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let validation = enable_validation && {
            // SAFETY: entry is valid
            let available = unsafe { entry.enumerate_instance_layer_properties()? };
            let supported = layers_supported(&[VALIDATION_LAYER], &available);
            if !supported {
                tracing::warn!("Validation layers not supported!");
            }
            supported
        };

        let app_name = CString::new(app_name)
            .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;
        let engine_name = CString::new(ENGINE_NAME)
            .map_err(|e| GpuError::Other(format!("Invalid engine name: {e}")))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extension_names: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display)
                .map_err(|e| GpuError::SurfaceCreation(format!("No surface extensions: {e}")))?
                .to_vec();
        if validation {
            extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layer_names: Vec<*const c_char> = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let mut debug_info = messenger_create_info();
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);
        if validation {
            tracing::info!("Creating debug Vulkan instance...");
            create_info = create_info.push_next(&mut debug_info);
        }

        // SAFETY: all pointers in create_info outlive this call
        let instance = unsafe { entry.create_instance(&create_info, None)? };
        tracing::info!("Successfully created a Vulkan instance!");

        log_available_extensions(&entry);

        let debug = if validation {
            // SAFETY: instance was created with debug utils enabled
            match unsafe { DebugMessenger::new(&entry, &instance) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    // SAFETY: nothing else references the instance yet
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug,
        })
    }

    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the instance handle.
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Whether the validation layer and debug messenger are active.
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // SAFETY: every child object is owned by something dropped before us
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn log_available_extensions(entry: &ash::Entry) {
    if !tracing::enabled!(tracing::Level::TRACE) {
        return;
    }
    // SAFETY: entry is valid
    match unsafe { entry.enumerate_instance_extension_properties(None) } {
        Ok(extensions) => {
            tracing::trace!("Available Vulkan extensions:");
            for ext in &extensions {
                if let Ok(name) = ext.extension_name_as_c_str() {
                    tracing::trace!("\t{}", name.to_string_lossy());
                }
            }
        }
        Err(e) => tracing::trace!("Could not enumerate instance extensions: {e}"),
    }
}
