use crate::gpu::{queues::get_graphics_family_index, GpuData};

use std::collections::HashSet;
use std::sync::Mutex;

use lazy_static::lazy_static;
use thiserror::Error;
use vulkanalia::{
    loader::{LibloadingLoader, LIBRARY},
    prelude::v1_0::*,
    vk::ExtDebugUtilsExtension,
    Version,
};
use anyhow::{anyhow, Result};
use log::*;

pub const VALIDATION_ENABLED: bool = cfg!(debug_assertions);
pub const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");
pub const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);

// The macro will create an error type with a Display impl that prints the
// given string.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct SuitabilityError(pub &'static str);

lazy_static! {
    // The Vulkan dynamic library must be initialized at most once per
    // process. Loading it is idempotent at the OS level, but engine
    // constructors may race, so serializing them through this gate
    // guarantees every racer observes a fully loaded library.
    static ref LOADER_GATE: Mutex<()> = Mutex::new(());
}

/// Load the Vulkan library and create an entry point. Serialized
/// process-wide; each engine gets its own entry handle onto the single
/// loaded library.
pub unsafe fn load_entry() -> Result<Entry> {
    let _gate = LOADER_GATE.lock().unwrap();
    let loader = LibloadingLoader::new(LIBRARY).map_err(|b| anyhow!("{}", b))?;
    Entry::new(loader).map_err(|b| anyhow!("{}", b))
}

pub unsafe fn create_instance(entry: &Entry, data: &mut GpuData) -> Result<Instance> {
    // Validation layers hook into Vulkan calls to apply additional checks
    // and debug operations; there is very little default error checking
    // otherwise. They can only be used if installed on the system, so
    // first get the list of available layers...
    let available_layers = entry
        .enumerate_instance_layer_properties()?
        .iter()
        .map(|l| l.layer_name)
        .collect::<HashSet<_>>();

    // ...then check if validation layers are available...
    if VALIDATION_ENABLED && !available_layers.contains(&VALIDATION_LAYER) {
        return Err(anyhow!("Validation layer not available."));
    }

    // ...and finally put in our layers list, which we will give to Vulkan
    // later.
    let layers = if VALIDATION_ENABLED {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let application_info = vk::ApplicationInfo::builder()
        .application_name(b"ariel\0")
        .application_version(vk::make_version(1, 0, 0))
        .engine_name(b"ariel\0")
        .engine_version(vk::make_version(1, 0, 0))
        .api_version(vk::make_version(1, 0, 0));

    // The engine renders to offscreen images only, so no window-system
    // extensions are requested; the debug utils extension is added when
    // the validation layers are enabled.
    let mut extensions: Vec<*const std::os::raw::c_char> = Vec::new();
    if VALIDATION_ENABLED {
        extensions.push(vk::EXT_DEBUG_UTILS_EXTENSION.name.as_ptr());
    }

    // Some platforms have not a fully compliant Vulkan implementation,
    // and need since v1.3.216 of the Vulkan API to enable special
    // portability extensions; one of those platforms is macOS.
    let flags = if cfg!(target_os = "macos") && entry.version()? >= PORTABILITY_MACOS_VERSION {
        info!("Enabling extensions for macOS portability.");
        extensions.push(vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION.name.as_ptr());
        extensions.push(vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name.as_ptr());

        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    };

    let mut info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .flags(flags);

    // Debug info: set up a debug messenger for the validation layers,
    // calling our debug callback to print messages for all severity
    // levels and types of events.
    let mut debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
        .message_type(vk::DebugUtilsMessageTypeFlagsEXT::all())
        .user_callback(Some(debug_callback));

    if VALIDATION_ENABLED {
        info = info.push_next(&mut debug_info);
    }

    let instance = entry.create_instance(&info, None)?;

    if VALIDATION_ENABLED {
        data.debug_messenger = instance.create_debug_utils_messenger_ext(&debug_info, None)?;
    }

    info!("Vulkan instance created.");
    Ok(instance)
}

extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // Route validation messages through our own log system instead of the
    // standard output. The 'extern "system"' bit links the function to
    // the system ABI, which is required for Vulkan to call it directly.
    let data = unsafe { *data };
    let message = unsafe { std::ffi::CStr::from_ptr(data.message) }.to_string_lossy();

    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        error!("({type_:?}) {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        warn!("({type_:?}) {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        debug!("({type_:?}) {message}");
    } else {
        trace!("({type_:?}) {message}");
    }

    vk::FALSE
}

unsafe fn check_physical_device(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<()> {
    // Each device has a number of associated queue families that
    // represent the supported functionalities. Offscreen rendering only
    // needs graphics operations.
    get_graphics_family_index(instance, physical_device)?;

    Ok(())
}

pub unsafe fn pick_physical_device(instance: &Instance, data: &mut GpuData) -> Result<()> {
    // There can be more than one graphics device on the system (one
    // dedicated and one integrated graphics card at the same time, for
    // example); we stick to listing the available physical devices and
    // picking the first graphics-capable one.
    for device in instance.enumerate_physical_devices()? {
        let properties = instance.get_physical_device_properties(device);

        if let Err(error) = check_physical_device(instance, device) {
            warn!("Skipping physical device ({}): {}", properties.device_name, error);
        } else {
            info!("Selected physical device: {}", properties.device_name);
            data.physical_device = device;
            data.graphics_queue_family = get_graphics_family_index(instance, device)?;
            return Ok(());
        }
    }

    Err(anyhow!(SuitabilityError("Failed to find suitable physical device.")))
}

pub unsafe fn create_logical_device(
    entry: &Entry,
    instance: &Instance,
    data: &mut GpuData,
) -> Result<Device> {
    // The logical device is the interface between a physical device and
    // the application. We request a single graphics queue; the priorities
    // array is required even for one queue.
    let priorities = &[1.0];
    let graphics_queues = &[vk::DeviceQueueCreateInfo::builder()
        .queue_family_index(data.graphics_queue_family)
        .queue_priorities(priorities)
        .build()];

    // Previous implementations of Vulkan made a distinction between
    // instance and device specific validation layers, but this is no
    // longer the case; setting them anyway stays compatible with older
    // implementations.
    let layers = if VALIDATION_ENABLED {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    // No device extensions are required for offscreen rendering, except
    // the portability subset on non-conformant implementations.
    let mut extensions: Vec<*const std::os::raw::c_char> = Vec::new();
    if cfg!(target_os = "macos") && entry.version()? >= PORTABILITY_MACOS_VERSION {
        extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
    }

    let features = vk::PhysicalDeviceFeatures::builder();

    let info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(graphics_queues)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    let device = instance.create_device(data.physical_device, &info, None)?;
    data.graphics_queue = device.get_device_queue(data.graphics_queue_family, 0);

    info!("Logical device created.");
    Ok(device)
}
