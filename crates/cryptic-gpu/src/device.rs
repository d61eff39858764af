//! Physical device selection and logical device creation.

use std::collections::BTreeSet;
use std::ffi::CStr;

use ash::vk;

use crate::error::{GpuError, Result};
use crate::surface::Surface;

/// Device extensions every candidate must support.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [ash::khr::swapchain::NAME];

/// Queue family indices, possibly incomplete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both a graphics and a present family were found.
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Resolve into concrete indices.
    pub fn resolve(self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Resolved queue family indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Graphics and present work go to the same family.
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, in ascending order.
    pub fn unique(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics, self.present])
            .into_iter()
            .collect()
    }
}

/// Pick graphics and present families.
///
/// A family that can do both is preferred; otherwise the first family with
/// each capability is used.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Result<QueueFamilyIndices>
where
    F: FnMut(u32) -> Result<bool>,
{
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        let graphics = family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = family.queue_count > 0 && supports_present(i)?;

        if graphics && present {
            return Ok(QueueFamilyIndices {
                graphics: Some(i),
                present: Some(i),
            });
        }
        if graphics && indices.graphics.is_none() {
            indices.graphics = Some(i);
        }
        if present && indices.present.is_none() {
            indices.present = Some(i);
        }
    }

    Ok(indices)
}

/// Check that every required extension is in the available list.
pub fn extensions_supported(required: &[&CStr], available: &[vk::ExtensionProperties]) -> bool {
    required.iter().all(|ext| {
        available
            .iter()
            .any(|props| props.extension_name_as_c_str().ok() == Some(*ext))
    })
}

/// Score a suitable device; higher is better.
pub fn score_device(device_type: vk::PhysicalDeviceType, families: &QueueFamilies) -> u32 {
    let mut score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };

    // One family for both avoids concurrent image sharing
    if families.is_shared() {
        score += 5;
    }

    score
}

/// A physical device that passed the suitability checks.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub families: QueueFamilies,
    pub score: u32,
}

/// Select the best physical device able to present to the surface.
///
/// # Safety
/// The instance must be valid and own the surface.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: &Surface,
) -> Result<PhysicalDeviceInfo> {
    // SAFETY: instance is valid
    let devices = unsafe { instance.enumerate_physical_devices()? };

    let mut best: Option<PhysicalDeviceInfo> = None;
    for device in devices {
        // SAFETY: device was enumerated from this instance
        let Some(info) = (unsafe { inspect_device(instance, surface, device)? }) else {
            continue;
        };
        tracing::debug!("Suitable GPU: {} (score {})", info.name, info.score);
        if best.as_ref().map_or(true, |b| info.score > b.score) {
            best = Some(info);
        }
    }

    best.ok_or(GpuError::NoSuitableDevice)
}

/// Returns `None` when the device cannot run this application.
unsafe fn inspect_device(
    instance: &ash::Instance,
    surface: &Surface,
    device: vk::PhysicalDevice,
) -> Result<Option<PhysicalDeviceInfo>> {
    // SAFETY: caller guarantees device belongs to instance
    let (properties, queue_families, extensions) = unsafe {
        (
            instance.get_physical_device_properties(device),
            instance.get_physical_device_queue_family_properties(device),
            instance.enumerate_device_extension_properties(device)?,
        )
    };
    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let indices = find_queue_families(&queue_families, |i| surface.supports_present(device, i))?;
    let Some(families) = indices.resolve() else {
        tracing::debug!("Skipping {name}: missing graphics or present queue");
        return Ok(None);
    };

    if !extensions_supported(&REQUIRED_DEVICE_EXTENSIONS, &extensions) {
        tracing::debug!("Skipping {name}: swapchain extension not supported");
        return Ok(None);
    }

    if !surface.support(device)?.is_adequate() {
        tracing::debug!("Skipping {name}: no surface formats or present modes");
        return Ok(None);
    }

    Ok(Some(PhysicalDeviceInfo {
        handle: device,
        score: score_device(properties.device_type, &families),
        name,
        device_type: properties.device_type,
        families,
    }))
}

/// Create the logical device and retrieve its graphics and present queues.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: &QueueFamilies,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let queue_priority = [1.0_f32];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&queue_priority)
        })
        .collect();

    let extension_names: Vec<*const std::ffi::c_char> = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    // SAFETY: caller guarantees instance and physical device are valid
    unsafe {
        let device = instance.create_device(physical_device, &create_info, None)?;
        let graphics_queue = device.get_device_queue(families.graphics, 0);
        let present_queue = device.get_device_queue(families.present, 0);
        Ok((device, graphics_queue, present_queue))
    }
}
