// Vulkan instance bootstrap
//
// Loads the Vulkan library, creates the instance with the surface
// extensions the host window needs, and optionally wires the Khronos
// validation layer into the log. Created first, destroyed last.

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use std::ffi::{c_char, CStr, CString};

use super::error::RendererError;

pub const VALIDATION_LAYERS: [&CStr; 1] = [c"VK_LAYER_KHRONOS_validation"];

pub struct Instance {
    pub surface_loader: khr::Surface,
    pub instance: ash::Instance,
    pub entry: Entry,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    /// Create the Vulkan instance.
    ///
    /// # Arguments
    /// * `app_name` - Application name reported to the driver
    /// * `surface_extensions` - Instance extensions the host window requires
    /// * `enable_validation` - Enable the Khronos validation layer
    pub fn new(
        app_name: &str,
        surface_extensions: &[&'static CStr],
        enable_validation: bool,
    ) -> Result<Self> {
        log::info!("Creating Vulkan instance: {}", app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        if enable_validation {
            check_validation_layer_support(&entry)?;
        }

        let app_name_cstr = CString::new(app_name)?;
        let engine_name = c"No Engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extensions = instance_extensions(surface_extensions, enable_validation);
        let extension_names: Vec<*const c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();

        let layers: &[&CStr] = if enable_validation { &VALIDATION_LAYERS } else { &[] };
        let layer_names: Vec<*const c_char> = layers.iter().map(|layer| layer.as_ptr()).collect();

        for ext in &extensions {
            log::debug!("Instance extension: {}", ext.to_string_lossy());
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        let debug_utils = if enable_validation {
            match setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!(
            "Vulkan instance ready (validation {})",
            if enable_validation { "on" } else { "off" }
        );

        let surface_loader = khr::Surface::new(&entry, &instance);

        Ok(Self {
            surface_loader,
            instance,
            entry,
            debug_utils,
        })
    }

    /// Layers the instance was created with.
    pub fn enabled_layers(&self) -> &'static [&'static CStr] {
        if self.debug_utils.is_some() {
            &VALIDATION_LAYERS
        } else {
            &[]
        }
    }

    pub fn destroy_surface(&self, surface: vk::SurfaceKHR) {
        if surface == vk::SurfaceKHR::null() {
            return;
        }
        unsafe { self.surface_loader.destroy_surface(surface, None) }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance...");

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Host surface extensions plus debug utils when validating.
pub fn instance_extensions(
    surface_extensions: &[&'static CStr],
    enable_validation: bool,
) -> Vec<&'static CStr> {
    let mut extensions = surface_extensions.to_vec();

    if enable_validation && !extensions.contains(&DebugUtils::name()) {
        extensions.push(DebugUtils::name());
    }

    extensions
}

fn check_validation_layer_support(entry: &Entry) -> Result<()> {
    let available: Vec<String> = entry
        .enumerate_instance_layer_properties()
        .context("Failed to enumerate instance layers")?
        .iter()
        .map(|layer| {
            unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }
                .to_string_lossy()
                .into_owned()
        })
        .collect();

    match first_missing_layer(&available, &VALIDATION_LAYERS) {
        Some(missing) => Err(RendererError::MissingValidationLayer(
            missing.to_string_lossy().into_owned(),
        )
        .into()),
        None => Ok(()),
    }
}

/// First requested layer that `available` does not list.
pub fn first_missing_layer<'a>(available: &[String], requested: &[&'a CStr]) -> Option<&'a CStr> {
    requested
        .iter()
        .copied()
        .find(|layer| !available.iter().any(|name| name.as_str() == layer.to_string_lossy()))
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = DebugUtils::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .context("Failed to create debug messenger")?;

    Ok((debug_utils, messenger))
}

// Routes validation output into the log by severity
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
