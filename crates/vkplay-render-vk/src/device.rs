// SPDX-License-Identifier: CEPL-1.0
//! Instance, physical-device selection, logical device and queue.
//!
//! Built once per process and destroyed last. Everything else in this crate
//! borrows it.

use std::any::Any;
use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::{Arc, Mutex};

use ash::ext::debug_utils;
use ash::khr::{portability_enumeration, surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::HasDisplayHandle;
use tracing::{debug, info, warn};
use vkplay_core::{DiagnosticSink, FatalHandler, Severity};

use crate::error::{InitError, VkCallError, VkResultExt, VkStatusExt};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
// Provisional; not exported by ash.
const PORTABILITY_SUBSET: &CStr = c"VK_KHR_portability_subset";

#[derive(Clone, Debug)]
pub struct DeviceOptions {
    pub app_name: String,
    /// Enable the Khronos validation layer and a debug messenger when available.
    pub validation: bool,
    /// Also forward info and verbose messages.
    pub verbose: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            app_name: "Vulkan Playground".to_owned(),
            validation: cfg!(debug_assertions),
            verbose: false,
        }
    }
}

/// Device limits surfaced in the device report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_image_dimension_2d: u32,
    pub max_framebuffer_width: u32,
    pub max_framebuffer_height: u32,
    pub max_viewports: u32,
    pub max_color_attachments: u32,
    pub max_bound_descriptor_sets: u32,
    pub max_push_constants_size: u32,
    pub framebuffer_color_sample_counts: vk::SampleCountFlags,
    /// Nanoseconds per timestamp tick, as raw `f32` bits to keep `Eq`.
    pub timestamp_period_bits: u32,
}

impl DeviceLimits {
    pub fn timestamp_period(&self) -> f32 {
        f32::from_bits(self.timestamp_period_bits)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSummary {
    pub name: String,
    pub kind: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub limits: DeviceLimits,
}

impl DeviceSummary {
    pub fn from_properties(props: &vk::PhysicalDeviceProperties) -> Self {
        let name = props
            .device_name_as_c_str()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_owned());
        let l = &props.limits;
        Self {
            name,
            kind: props.device_type,
            api_version: props.api_version,
            limits: DeviceLimits {
                max_image_dimension_2d: l.max_image_dimension2_d,
                max_framebuffer_width: l.max_framebuffer_width,
                max_framebuffer_height: l.max_framebuffer_height,
                max_viewports: l.max_viewports,
                max_color_attachments: l.max_color_attachments,
                max_bound_descriptor_sets: l.max_bound_descriptor_sets,
                max_push_constants_size: l.max_push_constants_size,
                framebuffer_color_sample_counts: l.framebuffer_color_sample_counts,
                timestamp_period_bits: l.timestamp_period.to_bits(),
            },
        }
    }
}

pub fn api_version_string(v: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(v),
        vk::api_version_minor(v),
        vk::api_version_patch(v)
    )
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let l = &self.limits;
        write!(
            f,
            "{} ({:?}, Vulkan {}) max2D={} fb={}x{} viewports={} color_attachments={} \
             sets={} push={}B samples={:?} timestamp={}ns",
            self.name,
            self.kind,
            api_version_string(self.api_version),
            l.max_image_dimension_2d,
            l.max_framebuffer_width,
            l.max_framebuffer_height,
            l.max_viewports,
            l.max_color_attachments,
            l.max_bound_descriptor_sets,
            l.max_push_constants_size,
            l.framebuffer_color_sample_counts,
            l.timestamp_period(),
        )
    }
}

/// First discrete GPU, else the first device of any kind.
pub fn pick_device_index(kinds: &[vk::PhysicalDeviceType]) -> Option<usize> {
    kinds
        .iter()
        .position(|&k| k == vk::PhysicalDeviceType::DISCRETE_GPU)
        .or_else(|| (!kinds.is_empty()).then_some(0))
}

pub fn graphics_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|q| q.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|i| i as u32)
}

pub fn severity_from_flags(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Severity {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if flags.contains(S::ERROR) {
        Severity::Error
    } else if flags.contains(S::WARNING) {
        Severity::Warning
    } else if flags.contains(S::INFO) {
        Severity::Info
    } else {
        Severity::Verbose
    }
}

type PanicPayload = Box<dyn Any + Send + 'static>;

/// Owned by the context and handed to the messenger as user data.
///
/// A fatal handler that unwinds cannot do so through the driver's stack, so
/// the callback catches it and parks the payload in `deferred`; the context
/// resumes the unwind on the next call from Rust.
struct DebugBridge {
    sink: Arc<dyn DiagnosticSink>,
    fatal: Arc<dyn FatalHandler>,
    deferred: Mutex<Option<PanicPayload>>,
}

impl DebugBridge {
    fn new(sink: Arc<dyn DiagnosticSink>, fatal: Arc<dyn FatalHandler>) -> Self {
        Self {
            sink,
            fatal,
            deferred: Mutex::new(None),
        }
    }

    fn defer(&self, payload: PanicPayload) {
        let mut slot = self.deferred.lock().unwrap_or_else(|e| e.into_inner());
        // Keep the first failure; later ones are usually fallout.
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    fn take_deferred(&self) -> Option<PanicPayload> {
        self.deferred
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Re-raise a failure caught inside the debug callback.
    fn raise_deferred(&self) {
        if let Some(payload) = self.take_deferred() {
            panic::resume_unwind(payload);
        }
    }

    #[track_caller]
    fn relay(&self, severity: Severity, message: Option<&CStr>) {
        match message {
            Some(msg) => self.sink.report(severity, &msg.to_string_lossy()),
            None => self
                .fatal
                .fatal(Location::caller(), "malformed debug report (null message)"),
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    user: *mut c_void,
) -> vk::Bool32 {
    if user.is_null() {
        return vk::FALSE;
    }
    // SAFETY: user data is the boxed bridge, alive until the messenger is destroyed.
    let bridge = &*(user as *const DebugBridge);
    let message = if data.is_null() || (*data).p_message.is_null() {
        None
    } else {
        Some(CStr::from_ptr((*data).p_message))
    };
    let severity = severity_from_flags(severity);
    let relayed = panic::catch_unwind(AssertUnwindSafe(|| bridge.relay(severity, message)));
    if let Err(payload) = relayed {
        bridge.defer(payload);
    }
    vk::FALSE
}

struct Messenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
    bridge: Box<DebugBridge>,
}

pub struct DeviceContext {
    entry: Entry,
    instance: Instance,
    messenger: Option<Messenger>,
    phys: vk::PhysicalDevice,
    device: ash::Device,
    queue_family: u32,
    queue: vk::Queue,
    surface_loader: surface::Instance,
    swapchain_loader: swapchain::Device,
    devices: Vec<DeviceSummary>,
    selected: usize,
}

fn has_extension(props: &[vk::ExtensionProperties], name: &CStr) -> bool {
    props.iter().any(|e| e.extension_name_as_c_str() == Ok(name))
}

unsafe fn create_instance(
    entry: &Entry,
    display: &dyn HasDisplayHandle,
    options: &DeviceOptions,
) -> Result<(Instance, bool), InitError> {
    let app = CString::new(options.app_name.as_str()).unwrap_or_default();
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: c"vkplay".as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let raw_display = display.display_handle()?.as_raw();
    let mut extensions = ash_window::enumerate_required_extensions(raw_display)
        .vk("enumerate_required_extensions")?
        .to_vec();
    let available = entry
        .enumerate_instance_extension_properties(None)
        .vk("enumerate_instance_extension_properties")?;

    let mut flags = vk::InstanceCreateFlags::empty();
    if has_extension(&available, portability_enumeration::NAME) {
        extensions.push(portability_enumeration::NAME.as_ptr());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let mut layers = Vec::new();
    let mut debug = false;
    if options.validation {
        let have_layer = entry
            .enumerate_instance_layer_properties()
            .vk("enumerate_instance_layer_properties")?
            .iter()
            .any(|l| l.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
        if have_layer {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        if has_extension(&available, debug_utils::NAME) {
            extensions.push(debug_utils::NAME.as_ptr());
            debug = true;
        }
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        flags,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };
    let instance = entry
        .create_instance(&create_info, None)
        .vk("create_instance")?;
    Ok((instance, debug))
}

unsafe fn create_messenger(
    entry: &Entry,
    instance: &Instance,
    verbose: bool,
    bridge: Box<DebugBridge>,
) -> Result<Messenger, VkCallError> {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    let mut severity = S::WARNING | S::ERROR;
    if verbose {
        severity |= S::INFO | S::VERBOSE;
    }
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: severity,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        p_user_data: &*bridge as *const DebugBridge as *mut c_void,
        ..Default::default()
    };
    let handle = loader
        .create_debug_utils_messenger(&ci, None)
        .vk("create_debug_utils_messenger")?;
    Ok(Messenger {
        loader,
        handle,
        bridge,
    })
}

unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<ash::Device, VkCallError> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let available = instance
        .enumerate_device_extension_properties(phys)
        .vk("enumerate_device_extension_properties")?;
    let mut extensions = vec![swapchain::NAME.as_ptr()];
    if has_extension(&available, PORTABILITY_SUBSET) {
        extensions.push(PORTABILITY_SUBSET.as_ptr());
    }

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };
    instance
        .create_device(phys, &dinfo, None)
        .vk("create_device")
}

impl DeviceContext {
    /// Load Vulkan, create the instance (plus debug messenger when validation
    /// is on), pick a device and create it with a single graphics queue.
    pub fn create(
        display: &dyn HasDisplayHandle,
        options: &DeviceOptions,
        sink: Arc<dyn DiagnosticSink>,
        fatal: Arc<dyn FatalHandler>,
    ) -> Result<Self, InitError> {
        unsafe {
            let entry = Entry::load()?;
            let (instance, debug) = create_instance(&entry, display, options)?;

            // From here on the instance must be destroyed on every error path.
            match Self::finish(entry.clone(), instance.clone(), debug, options, sink, fatal) {
                Ok(ctx) => Ok(ctx),
                Err(e) => {
                    instance.destroy_instance(None);
                    Err(e)
                }
            }
        }
    }

    unsafe fn finish(
        entry: Entry,
        instance: Instance,
        debug: bool,
        options: &DeviceOptions,
        sink: Arc<dyn DiagnosticSink>,
        fatal: Arc<dyn FatalHandler>,
    ) -> Result<Self, InitError> {
        let physicals = instance
            .enumerate_physical_devices()
            .vk("enumerate_physical_devices")?;
        let devices: Vec<DeviceSummary> = physicals
            .iter()
            .map(|&p| DeviceSummary::from_properties(&instance.get_physical_device_properties(p)))
            .collect();
        let kinds: Vec<_> = devices.iter().map(|d| d.kind).collect();
        let selected = pick_device_index(&kinds).ok_or(InitError::NoPhysicalDevice)?;
        let phys = physicals[selected];

        let families = instance.get_physical_device_queue_family_properties(phys);
        let queue_family =
            graphics_queue_family(&families).ok_or_else(|| InitError::NoGraphicsQueue {
                name: devices[selected].name.clone(),
            })?;

        let messenger = if debug {
            let bridge = Box::new(DebugBridge::new(sink, fatal));
            Some(create_messenger(&entry, &instance, options.verbose, bridge)?)
        } else {
            None
        };

        let device = match create_logical_device(&instance, phys, queue_family) {
            Ok(d) => d,
            Err(e) => {
                if let Some(m) = &messenger {
                    m.loader.destroy_debug_utils_messenger(m.handle, None);
                }
                return Err(e.into());
            }
        };
        let queue = device.get_device_queue(queue_family, 0);
        let surface_loader = surface::Instance::new(&entry, &instance);
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        info!(
            "vk: device {} (queue family {}, {} candidates, validation={})",
            devices[selected],
            queue_family,
            devices.len(),
            messenger.is_some()
        );

        Ok(Self {
            entry,
            instance,
            messenger,
            phys,
            device,
            queue_family,
            queue,
            surface_loader,
            swapchain_loader,
            devices,
            selected,
        })
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    /// Every enumerated device, in enumeration order.
    pub fn summaries(&self) -> &[DeviceSummary] {
        &self.devices
    }

    pub fn selected(&self) -> &DeviceSummary {
        &self.devices[self.selected]
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        unsafe {
            self.instance
                .get_physical_device_memory_properties(self.phys)
        }
    }

    /// Resume an unwind raised by the fatal handler inside the debug callback.
    /// Aborting handlers never get here.
    pub fn check_fatal(&self) {
        if let Some(m) = &self.messenger {
            m.bridge.raise_deferred();
        }
    }

    pub fn wait_idle(&self) -> Result<(), VkCallError> {
        unsafe { self.device.device_wait_idle() }.status("device_wait_idle")
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            warn!("vk: {e} during shutdown");
        }
        unsafe {
            self.device.destroy_device(None);
            if let Some(m) = self.messenger.take() {
                m.loader.destroy_debug_utils_messenger(m.handle, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("vk: device context destroyed");
    }
}
