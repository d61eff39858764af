//! Validation-layer message routing.
//!
//! Messages from `VK_EXT_debug_utils` are forwarded to `tracing` on the
//! [`VULKAN`](cryptic_core::logging::targets::VULKAN) target at the level
//! matching their severity.

use std::ffi::{c_void, CStr};

use ash::vk;
use cryptic_core::logging::targets;

use crate::error::Result;

/// Log level a validation message is forwarded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Trace,
    Info,
    Warn,
    Error,
}

impl MessageLevel {
    /// Map a debug-utils severity to a log level.
    ///
    /// When several bits are set the most severe one wins.
    pub fn from_severity(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            Self::Error
        } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            Self::Warn
        } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            Self::Info
        } else {
            Self::Trace
        }
    }
}

/// Messenger create info covering every severity and message type.
///
/// Also chained into instance creation so that instance create/destroy is
/// reported.
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the loader passes either null or a valid callback data pointer
    // whose message is a nul-terminated string for the duration of the call.
    let message = unsafe {
        callback_data
            .as_ref()
            .filter(|data| !data.p_message.is_null())
            .map_or_else(
                || "<no message>".into(),
                |data| CStr::from_ptr(data.p_message).to_string_lossy(),
            )
    };

    match MessageLevel::from_severity(severity) {
        MessageLevel::Trace => tracing::trace!(target: targets::VULKAN, ?message_type, "{message}"),
        MessageLevel::Info => tracing::info!(target: targets::VULKAN, ?message_type, "{message}"),
        MessageLevel::Warn => tracing::warn!(target: targets::VULKAN, ?message_type, "{message}"),
        MessageLevel::Error => tracing::error!(target: targets::VULKAN, ?message_type, "{message}"),
    }

    vk::FALSE
}

/// An installed debug-utils messenger.
///
/// Owned by [`Instance`](crate::instance::Instance), which destroys it before
/// the instance itself.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Install a messenger on the instance.
    ///
    /// # Safety
    /// The entry and instance must be valid and the instance must have been
    /// created with `VK_EXT_debug_utils` enabled.
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = messenger_create_info();
        // SAFETY: caller guarantees the extension is enabled on a valid instance
        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None)? };
        Ok(Self { loader, messenger })
    }

    /// Destroy the messenger.
    ///
    /// # Safety
    /// The owning instance must still be alive.
    pub unsafe fn destroy(&self) {
        // SAFETY: caller guarantees the instance is alive
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}
