// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::BTreeSet;
use std::ffi::{c_void, CStr, CString};
use tracing::{debug, error, info, trace, warn, Level};

use crate::commands;
use crate::device::{
    find_memory_type, find_supported_format, Device, QueueFamilyIndices, SubmitDesc,
    SurfaceSupport,
};
use crate::error::RenderError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const DESCRIPTORS_PER_TYPE: u32 = 1000;

#[derive(Clone, Debug)]
pub struct ContextConfig {
    pub app_name: String,
    /// Silently downgraded when the Khronos layer is not installed.
    pub validation: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            app_name: "lumen".to_owned(),
            validation: cfg!(debug_assertions),
        }
    }
}

/// Discrete GPUs get +1000 on top of their max 2D image dimension.
pub fn rate_device(props: &vk::PhysicalDeviceProperties) -> u64 {
    let mut score = u64::from(props.limits.max_image_dimension2_d);
    if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += 1000;
    }
    score
}

/// Highest score wins; on a tie the earlier candidate is kept.
pub fn pick_best<T>(candidates: impl IntoIterator<Item = (T, u64)>) -> Option<(T, u64)> {
    candidates.into_iter().fold(None, |best, (item, score)| match best {
        Some((_, best_score)) if best_score >= score => best,
        _ => Some((item, score)),
    })
}

pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    use vk::DebugUtilsMessageSeverityFlagsEXT as S;
    if severity.contains(S::ERROR) {
        Level::ERROR
    } else if severity.contains(S::WARNING) {
        Level::WARN
    } else if severity.contains(S::INFO) {
        Level::DEBUG
    } else {
        Level::TRACE
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback-data struct for the duration of the call.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();
    let level = severity_level(severity);
    if level == Level::ERROR {
        error!(target: "vulkan", "{msg}");
    } else if level == Level::WARN {
        warn!(target: "vulkan", "{msg}");
    } else if level == Level::DEBUG {
        debug!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

/// Instance-level objects. Null members are skipped on drop so a partially
/// built core cleans up after itself.
struct InstanceCore {
    entry: Entry,
    instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl Drop for InstanceCore {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

struct DeviceCore {
    device: ash::Device,
    swapchain_loader: swapchain::Device,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
}

impl Drop for DeviceCore {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            if self.descriptor_pool != vk::DescriptorPool::null() {
                self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            }
            if self.command_pool != vk::CommandPool::null() {
                self.device.destroy_command_pool(self.command_pool, None);
            }
            self.device.destroy_device(None);
        }
    }
}

fn validation_layer_available(entry: &Entry) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|l| unsafe { CStr::from_ptr(l.layer_name.as_ptr()) } == VALIDATION_LAYER)
}

fn create_instance_core(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    config: &ContextConfig,
) -> Result<(InstanceCore, bool)> {
    let dh = display
        .display_handle()
        .map_err(|e| anyhow!("{e}"))?
        .as_raw();
    let wh = window
        .window_handle()
        .map_err(|e| anyhow!("{e}"))?
        .as_raw();

    let entry = Entry::linked();

    let mut validation = config.validation;
    if validation && !validation_layer_available(&entry) {
        warn!("validation requested but VK_LAYER_KHRONOS_validation is not installed");
        validation = false;
    }

    let app_name = CString::new(config.app_name.as_str()).context("app name contains NUL")?;
    let engine_name = c"lumen";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: engine_name.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_2,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(dh)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut flags = vk::InstanceCreateFlags::empty();
    if cfg!(target_os = "macos") {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        extensions.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }
    if validation {
        extensions.push(debug_utils::NAME.as_ptr());
    }

    let layers = [VALIDATION_LAYER.as_ptr()];
    // Chained so instance creation and destruction are covered too.
    let instance_debug_ci = messenger_create_info();
    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_next: if validation {
            (&instance_debug_ci as *const vk::DebugUtilsMessengerCreateInfoEXT).cast()
        } else {
            std::ptr::null()
        },
        flags,
        p_application_info: &app_info,
        enabled_layer_count: if validation { layers.len() as u32 } else { 0 },
        pp_enabled_layer_names: layers.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        ..Default::default()
    };
    let instance = unsafe { entry.create_instance(&create_info, None) }
        .context("vkCreateInstance (on hybrid-GPU Windows setups, overlay layers are a common culprit)")?;

    let surface_loader = surface::Instance::new(&entry, &instance);
    let mut core = InstanceCore {
        entry,
        instance,
        debug: None,
        surface_loader,
        surface: vk::SurfaceKHR::null(),
    };

    if validation {
        let loader = debug_utils::Instance::new(&core.entry, &core.instance);
        match unsafe { loader.create_debug_utils_messenger(&messenger_create_info(), None) } {
            Ok(messenger) => core.debug = Some((loader, messenger)),
            Err(e) => warn!("debug messenger unavailable: {e}"),
        }
        info!("validation layers enabled: {}", VALIDATION_LAYER.to_string_lossy());
    }

    core.surface = unsafe { ash_window::create_surface(&core.entry, &core.instance, dh, wh, None) }
        .context("ash_window::create_surface")?;
    Ok((core, validation))
}

fn required_device_extensions() -> Vec<&'static CStr> {
    let mut exts = vec![swapchain::NAME];
    if cfg!(target_os = "macos") {
        exts.push(ash::khr::portability_subset::NAME);
    }
    exts
}

struct Candidate {
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
}

fn query_surface_support(
    loader: &surface::Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> VkResult<SurfaceSupport> {
    unsafe {
        Ok(SurfaceSupport {
            capabilities: loader.get_physical_device_surface_capabilities(physical_device, surface)?,
            formats: loader.get_physical_device_surface_formats(physical_device, surface)?,
            present_modes: loader
                .get_physical_device_surface_present_modes(physical_device, surface)?,
        })
    }
}

/// Suitable = graphics + present families, the required extensions and a
/// surface with at least one format and present mode.
fn evaluate_device(core: &InstanceCore, physical_device: vk::PhysicalDevice) -> Option<Candidate> {
    let instance = &core.instance;
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let queue_families = QueueFamilyIndices::find(&families, |i| unsafe {
        core.surface_loader
            .get_physical_device_surface_support(physical_device, i, core.surface)
            .unwrap_or(false)
    });
    if !queue_families.is_complete() {
        return None;
    }

    let available =
        unsafe { instance.enumerate_device_extension_properties(physical_device) }.ok()?;
    let has = |name: &CStr| {
        available
            .iter()
            .any(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) } == name)
    };
    if !required_device_extensions().into_iter().all(has) {
        return None;
    }

    let support = query_surface_support(&core.surface_loader, physical_device, core.surface).ok()?;
    if !support.is_adequate() {
        return None;
    }
    Some(Candidate {
        physical_device,
        queue_families,
    })
}

fn create_device_core(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
    supported: &vk::PhysicalDeviceFeatures,
) -> Result<(DeviceCore, vk::PhysicalDeviceFeatures)> {
    let (graphics, present) = queue_families
        .graphics_and_present()
        .ok_or(RenderError::NoSuitableDevice)?;
    let unique: BTreeSet<u32> = [Some(graphics), Some(present), queue_families.compute, queue_families.transfer]
        .into_iter()
        .flatten()
        .collect();

    let priorities = [1.0_f32];
    let queue_infos: Vec<_> = unique
        .iter()
        .map(|&family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    // Only what the device actually supports.
    let enabled = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: supported.sampler_anisotropy,
        fill_mode_non_solid: supported.fill_mode_non_solid,
        wide_lines: supported.wide_lines,
        ..Default::default()
    };

    let extensions: Vec<*const std::ffi::c_char> = required_device_extensions()
        .into_iter()
        .map(CStr::as_ptr)
        .collect();
    let create_info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        p_enabled_features: &enabled,
        ..Default::default()
    };
    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .context("vkCreateDevice")?;

    let mut core = DeviceCore {
        swapchain_loader: swapchain::Device::new(instance, &device),
        device,
        command_pool: vk::CommandPool::null(),
        descriptor_pool: vk::DescriptorPool::null(),
    };

    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        queue_family_index: graphics,
        ..Default::default()
    };
    core.command_pool = unsafe { core.device.create_command_pool(&pool_info, None) }
        .context("vkCreateCommandPool")?;

    let pool_sizes = [
        vk::DescriptorType::SAMPLER,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        vk::DescriptorType::SAMPLED_IMAGE,
        vk::DescriptorType::STORAGE_IMAGE,
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        vk::DescriptorType::STORAGE_TEXEL_BUFFER,
        vk::DescriptorType::UNIFORM_BUFFER,
        vk::DescriptorType::STORAGE_BUFFER,
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        vk::DescriptorType::INPUT_ATTACHMENT,
    ]
    .map(|ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: DESCRIPTORS_PER_TYPE,
    });
    let descriptor_info = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        flags: vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
        max_sets: DESCRIPTORS_PER_TYPE * pool_sizes.len() as u32,
        pool_size_count: pool_sizes.len() as u32,
        p_pool_sizes: pool_sizes.as_ptr(),
        ..Default::default()
    };
    core.descriptor_pool = unsafe { core.device.create_descriptor_pool(&descriptor_info, None) }
        .context("vkCreateDescriptorPool")?;

    Ok((core, enabled))
}

/// Instance, surface, chosen GPU, logical device, queues and the shared
/// command and descriptor pools.
///
/// STRICT TEARDOWN ORDER (field order): device wait idle, pools, device,
/// then surface, messenger, instance. Everything created from this context
/// holds an `Rc` to it, so it is always dropped last.
pub struct GpuContext {
    core: DeviceCore,
    instance: InstanceCore,

    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    enabled_features: vk::PhysicalDeviceFeatures,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    compute_queue: Option<vk::Queue>,
    transfer_queue: Option<vk::Queue>,
    validation: bool,
}

impl GpuContext {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        config: ContextConfig,
    ) -> Result<Self> {
        let (instance, validation) =
            create_instance_core(window, display, &config).context("create instance")?;

        let physical_devices = unsafe { instance.instance.enumerate_physical_devices() }
            .context("vkEnumeratePhysicalDevices")?;
        if physical_devices.is_empty() {
            error!("no GPU with Vulkan support found");
        }
        let scored = physical_devices.into_iter().filter_map(|pd| {
            let candidate = evaluate_device(&instance, pd)?;
            let props = unsafe { instance.instance.get_physical_device_properties(pd) };
            Some((candidate, rate_device(&props)))
        });
        let (chosen, score) = pick_best(scored).ok_or(RenderError::NoSuitableDevice)?;
        let physical_device = chosen.physical_device;
        let queue_families = chosen.queue_families;

        let (properties, memory_properties, supported) = unsafe {
            (
                instance.instance.get_physical_device_properties(physical_device),
                instance
                    .instance
                    .get_physical_device_memory_properties(physical_device),
                instance.instance.get_physical_device_features(physical_device),
            )
        };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();
        info!(
            "GPU: {} ({:?}, score {})",
            name, properties.device_type, score
        );
        debug!(?queue_families, "queue families");

        let (core, enabled_features) =
            create_device_core(&instance.instance, physical_device, &queue_families, &supported)
                .context("create logical device")?;

        let queue = |family: u32| unsafe { core.device.get_device_queue(family, 0) };
        let (graphics, present) = queue_families
            .graphics_and_present()
            .ok_or(RenderError::NoSuitableDevice)?;
        let graphics_queue = queue(graphics);
        let present_queue = queue(present);
        let compute_queue = queue_families.compute.map(queue);
        let transfer_queue = queue_families.transfer.map(queue);

        info!("Vulkan context ready");
        Ok(Self {
            core,
            instance,
            physical_device,
            properties,
            enabled_features,
            memory_properties,
            queue_families,
            graphics_queue,
            present_queue,
            compute_queue,
            transfer_queue,
            validation,
        })
    }

    pub fn raw(&self) -> &ash::Device {
        &self.core.device
    }

    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.instance.surface
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// Features that were actually enabled at device creation.
    pub fn features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.enabled_features
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn compute_queue(&self) -> Option<vk::Queue> {
        self.compute_queue
    }

    pub fn transfer_queue(&self) -> Option<vk::Queue> {
        self.transfer_queue
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.core.command_pool
    }

    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.core.descriptor_pool
    }

    pub fn validation_enabled(&self) -> bool {
        self.validation
    }

    pub fn find_memory_type(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<u32, RenderError> {
        find_memory_type(&self.memory_properties, type_bits, flags)
    }

    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format, RenderError> {
        find_supported_format(candidates, tiling, features, |f| self.format_properties(f))
    }

    pub fn begin_single_time_commands(&self) -> Result<vk::CommandBuffer> {
        commands::begin_single_time_commands(self)
    }

    pub fn end_single_time_commands(&self, cmd: vk::CommandBuffer) -> Result<()> {
        commands::end_single_time_commands(self, cmd)
    }

    pub fn immediate_submit(&self, record: impl FnOnce(vk::CommandBuffer) -> Result<()>) -> Result<()> {
        commands::immediate_submit(self, record)
    }
}

impl Device for GpuContext {
    fn surface_support(&self) -> VkResult<SurfaceSupport> {
        query_surface_support(
            &self.instance.surface_loader,
            self.physical_device,
            self.instance.surface,
        )
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        let info = vk::SwapchainCreateInfoKHR {
            surface: self.instance.surface,
            ..*info
        };
        unsafe { self.core.swapchain_loader.create_swapchain(&info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.core.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.core.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.core.swapchain_loader.acquire_next_image(
                swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        unsafe {
            self.core
                .swapchain_loader
                .queue_present(self.present_queue, &present)
        }
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        unsafe { self.core.device.create_image(info, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.core.device.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        unsafe { self.core.device.bind_image_memory(image, memory, 0) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.core.device.destroy_image(image, None) }
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory> {
        unsafe { self.core.device.allocate_memory(info, None) }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.core.device.free_memory(memory, None) }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        unsafe { self.core.device.create_image_view(info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.core.device.destroy_image_view(view, None) }
    }

    fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass> {
        unsafe { self.core.device.create_render_pass(info, None) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.core.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        unsafe { self.core.device.create_framebuffer(info, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.core.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> VkResult<vk::Sampler> {
        unsafe { self.core.device.create_sampler(info, None) }
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.core.device.destroy_sampler(sampler, None) }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.core.device.create_fence(&info, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.core.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        unsafe { self.core.device.wait_for_fences(&[fence], true, timeout) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.core.device.reset_fences(&[fence]) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        unsafe { self.core.device.create_semaphore(&info, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.core.device.destroy_semaphore(semaphore, None) }
    }

    fn allocate_command_buffers(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.core.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.core.device.allocate_command_buffers(&info) }
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe {
            self.core
                .device
                .free_command_buffers(self.core.command_pool, buffers)
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.core
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags,
            ..Default::default()
        };
        unsafe { self.core.device.begin_command_buffer(cmd, &begin) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.core.device.end_command_buffer(cmd) }
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo<'_>) {
        unsafe {
            self.core
                .device
                .cmd_begin_render_pass(cmd, info, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.core.device.cmd_end_render_pass(cmd) }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.core.device.cmd_set_viewport(cmd, 0, &[viewport]) }
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.core.device.cmd_set_scissor(cmd, 0, &[scissor]) }
    }

    fn queue_submit(&self, submit: &SubmitDesc<'_>) -> VkResult<()> {
        let info = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: submit.wait_semaphores.len() as u32,
            p_wait_semaphores: submit.wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: submit.wait_stages.as_ptr(),
            command_buffer_count: submit.command_buffers.len() as u32,
            p_command_buffers: submit.command_buffers.as_ptr(),
            signal_semaphore_count: submit.signal_semaphores.len() as u32,
            p_signal_semaphores: submit.signal_semaphores.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.core.device.queue_submit(
                self.graphics_queue,
                std::slice::from_ref(&info),
                submit.fence,
            )
        }
    }

    fn queue_wait_idle(&self) -> VkResult<()> {
        unsafe { self.core.device.queue_wait_idle(self.graphics_queue) }
    }

    fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.core.device.device_wait_idle() }
    }
}
