// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (first suitable device wins)
// - Queue family discovery for graphics and present
// - Logical device + queue + command pool creation
// - Raw buffer/memory helpers and on-demand surface queries

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::prelude::VkResult;
use ash::vk;
use std::collections::{BTreeSet, HashSet};
use std::ffi::{c_char, CStr};

use super::error::RendererError;
use super::frame::record_triangle_pass;
use super::gpu::{FrameRecording, GpuDevice};
use super::instance::Instance;

/// Device extensions the renderer cannot run without.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![khr::Swapchain::name()]
}

/// Graphics and present queue family indices. Both must be set for a device
/// to be usable; they may point at the same family.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scans every family without stopping early, so when several families
    /// qualify the last one wins. This differs from physical device
    /// selection, which takes the first match.
    pub fn find(families: &[QueueFamilySupport]) -> Self {
        let mut indices = Self::default();

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;

            if family.flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics_family = Some(index);
            }

            if family.present {
                indices.present_family = Some(index);
            }
        }

        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// De-duplicated set of families to request queues from.
    pub fn unique_families(&self) -> BTreeSet<u32> {
        self.graphics_family
            .into_iter()
            .chain(self.present_family)
            .collect()
    }

    pub fn graphics(&self) -> Result<u32> {
        self.graphics_family.context("No graphics queue family")
    }

    pub fn present(&self) -> Result<u32> {
        self.present_family.context("No present queue family")
    }
}

/// What a single queue family can do, as seen against one surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilySupport {
    pub flags: vk::QueueFlags,
    pub present: bool,
}

/// Surface capabilities, formats and present modes for one device/surface
/// pair. Queried fresh every time it is needed.
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        surface_loader: &khr::Surface,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)
                    .context("Failed to query surface capabilities")?,
                formats: surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)
                    .context("Failed to query surface formats")?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)
                    .context("Failed to query surface present modes")?,
            })
        }
    }

    /// At least one format and one present mode.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Capability snapshot of one physical device. Built during selection and
/// thrown away afterwards.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub extensions: HashSet<String>,
    pub queue_families: Vec<QueueFamilySupport>,
    /// Only queried when the required extensions are present.
    pub swapchain_support: Option<SwapchainSupportDetails>,
}

impl PhysicalDeviceCandidate {
    pub fn query(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        handle: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        required_extensions: &[&CStr],
    ) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }
            .context("Failed to enumerate device extensions")?
            .iter()
            .map(|ext| {
                unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        let families = unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let mut queue_families = Vec::with_capacity(families.len());
        for (index, family) in families.iter().enumerate() {
            let present = unsafe {
                surface_loader.get_physical_device_surface_support(handle, index as u32, surface)
            }
            .context("Failed to query surface support")?;

            queue_families.push(QueueFamilySupport {
                flags: family.queue_flags,
                present,
            });
        }

        let mut candidate = Self {
            handle,
            name,
            extensions,
            queue_families,
            swapchain_support: None,
        };

        if candidate.supports_extensions(required_extensions) {
            candidate.swapchain_support =
                Some(SwapchainSupportDetails::query(surface_loader, handle, surface)?);
        }

        Ok(candidate)
    }

    pub fn supports_extensions(&self, required: &[&CStr]) -> bool {
        required
            .iter()
            .all(|ext| self.extensions.contains(ext.to_string_lossy().as_ref()))
    }

    pub fn queue_family_indices(&self) -> QueueFamilyIndices {
        QueueFamilyIndices::find(&self.queue_families)
    }

    pub fn is_suitable(&self, required_extensions: &[&CStr]) -> bool {
        let swapchain_adequate = self
            .swapchain_support
            .as_ref()
            .is_some_and(SwapchainSupportDetails::is_adequate);

        self.supports_extensions(required_extensions)
            && swapchain_adequate
            && self.queue_family_indices().is_complete()
    }
}

/// Walks `devices` in enumeration order and returns the first suitable one.
/// Devices after the first match are never probed.
pub fn pick_physical_device<F>(
    devices: &[vk::PhysicalDevice],
    required_extensions: &[&CStr],
    mut probe: F,
) -> Result<PhysicalDeviceCandidate>
where
    F: FnMut(vk::PhysicalDevice) -> Result<PhysicalDeviceCandidate>,
{
    if devices.is_empty() {
        return Err(RendererError::NoVulkanGpu.into());
    }

    for &device in devices {
        let candidate = probe(device)?;

        if candidate.is_suitable(required_extensions) {
            return Ok(candidate);
        }

        log::debug!("Skipping unsuitable GPU: {}", candidate.name);
    }

    Err(RendererError::NoSuitableGpu.into())
}

/// One queue create info per unique family, each with a single queue.
/// `priorities` must outlive the returned structs.
pub fn queue_create_infos(
    indices: &QueueFamilyIndices,
    priorities: &[f32],
) -> Vec<vk::DeviceQueueCreateInfo> {
    indices
        .unique_families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(priorities)
                .build()
        })
        .collect()
}

/// Find a memory type index allowed by `type_filter` that has all of
/// `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);

        has_type && has_properties
    })
}

/// Logical device wrapper with automatic cleanup.
///
/// Move-only: it owns the device handle and the command pool, and moving it
/// moves that ownership. Dropping it destroys the pool, then the device.
pub struct LogicalDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub command_pool: vk::CommandPool,

    // Device properties (cached at creation)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,

    instance: ash::Instance,
    surface_loader: khr::Surface,
    swapchain_loader: khr::Swapchain,
}

impl LogicalDevice {
    /// Pick the first suitable GPU for `surface` and build a device on it.
    pub fn new(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        device_extensions: &[&CStr],
    ) -> Result<Self> {
        let devices = unsafe { instance.instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        log::info!("Found {} Vulkan device(s)", devices.len());

        let candidate = pick_physical_device(&devices, device_extensions, |handle| {
            PhysicalDeviceCandidate::query(
                &instance.instance,
                &instance.surface_loader,
                handle,
                surface,
                device_extensions,
            )
        })?;

        log::info!("Selected GPU: {}", candidate.name);

        Self::with_physical_device(
            instance,
            candidate.handle,
            candidate.queue_family_indices(),
            device_extensions,
        )
    }

    /// Build a device on an already chosen physical device.
    pub fn with_physical_device(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilyIndices,
        device_extensions: &[&CStr],
    ) -> Result<Self> {
        let graphics_family = queue_families.graphics()?;
        let present_family = queue_families.present()?;

        log::info!(
            "Queue families: graphics={}, present={}",
            graphics_family,
            present_family
        );

        let priorities = [1.0_f32];
        let queue_infos = queue_create_infos(&queue_families, &priorities);

        let extension_names: Vec<*const c_char> =
            device_extensions.iter().map(|ext| ext.as_ptr()).collect();

        // Device layers are ignored by modern loaders but older ones still
        // read them; only set in debug builds.
        let layer_names: Vec<*const c_char> = if cfg!(debug_assertions) {
            instance.enabled_layers().iter().map(|layer| layer.as_ptr()).collect()
        } else {
            Vec::new()
        };

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .instance
                .create_device(physical_device, &create_info, None)
        }
        .map_err(RendererError::DeviceCreation)
        .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(RendererError::CommandPoolCreation(e))
                    .context("Failed to create command pool");
            }
        };

        let properties = unsafe { instance.instance.get_physical_device_properties(physical_device) };
        let memory_properties = unsafe {
            instance
                .instance
                .get_physical_device_memory_properties(physical_device)
        };

        let swapchain_loader = khr::Swapchain::new(&instance.instance, &device);

        Ok(Self {
            device,
            physical_device,
            queue_families,
            graphics_queue,
            present_queue,
            command_pool,
            properties,
            memory_properties,
            instance: instance.instance.clone(),
            surface_loader: instance.surface_loader.clone(),
            swapchain_loader,
        })
    }

    pub fn device_name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    pub fn create_buffer(&self, info: &vk::BufferCreateInfo) -> Result<vk::Buffer> {
        unsafe { self.device.create_buffer(info, None) }.context("Failed to create buffer")
    }

    pub fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> Result<vk::DeviceMemory> {
        unsafe { self.device.allocate_memory(info, None) }
            .context("Failed to allocate device memory")
    }

    pub fn memory_type_index(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        find_memory_type(&self.memory_properties, type_filter, properties)
            .ok_or(RendererError::NoSuitableMemoryType)
            .with_context(|| format!("No memory type with {:?}", properties))
    }
}

impl GpuDevice for LogicalDevice {
    fn query_swapchain_support(&self, surface: vk::SurfaceKHR) -> Result<SwapchainSupportDetails> {
        SwapchainSupportDetails::query(&self.surface_loader, self.physical_device, surface)
    }

    fn find_queue_families(&self, surface: vk::SurfaceKHR) -> Result<QueueFamilyIndices> {
        let families = unsafe {
            self.instance
                .get_physical_device_queue_family_properties(self.physical_device)
        };

        let mut support = Vec::with_capacity(families.len());
        for (index, family) in families.iter().enumerate() {
            let present = unsafe {
                self.surface_loader.get_physical_device_surface_support(
                    self.physical_device,
                    index as u32,
                    surface,
                )
            }
            .context("Failed to query surface support")?;

            support.push(QueueFamilySupport {
                flags: family.queue_flags,
                present,
            });
        }

        Ok(QueueFamilyIndices::find(&support))
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> Result<vk::SwapchainKHR> {
        unsafe { self.swapchain_loader.create_swapchain(info, None) }
            .map_err(RendererError::SwapchainCreation)
            .context("Failed to create swapchain")
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .map_err(RendererError::SwapchainCreation)
            .context("Failed to get swapchain images")
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> Result<vk::ImageView> {
        unsafe { self.device.create_image_view(info, None) }
            .map_err(RendererError::SwapchainCreation)
            .context("Failed to create image view")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> Result<vk::RenderPass> {
        unsafe { self.device.create_render_pass(info, None) }
            .map_err(RendererError::SwapchainCreation)
            .context("Failed to create render pass")
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> Result<vk::Framebuffer> {
        unsafe { self.device.create_framebuffer(info, None) }
            .map_err(RendererError::SwapchainCreation)
            .context("Failed to create framebuffer")
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

        unsafe { self.device.create_shader_module(&create_info, None) }
            .map_err(RendererError::PipelineCreation)
            .context("Failed to create shader module")
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo,
    ) -> Result<vk::PipelineLayout> {
        unsafe { self.device.create_pipeline_layout(info, None) }
            .map_err(RendererError::PipelineCreation)
            .context("Failed to create pipeline layout")
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> Result<vk::Pipeline> {
        let pipelines = unsafe {
            self.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(info),
                None,
            )
        }
        .map_err(|(_, e)| RendererError::PipelineCreation(e))
        .context("Failed to create graphics pipeline")?;

        pipelines
            .into_iter()
            .next()
            .context("Driver returned no graphics pipeline")
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();

        unsafe { self.device.create_semaphore(&info, None) }
            .map_err(RendererError::SyncObjectCreation)
            .context("Failed to create semaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);

        unsafe { self.device.create_fence(&info, None) }
            .map_err(RendererError::SyncObjectCreation)
            .context("Failed to create fence")
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .context("Failed to wait for in-flight fence")
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence]) }.context("Failed to reset in-flight fence")
    }

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(RendererError::CommandRecording)
            .context("Failed to allocate command buffers")
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe { self.device.free_command_buffers(self.command_pool, buffers) }
    }

    fn record_frame(&self, cmd: vk::CommandBuffer, frame: &FrameRecording) -> Result<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(RendererError::CommandRecording)
        .context("Failed to reset command buffer")?;

        record_triangle_pass(&self.device, cmd, frame)
            .map_err(RendererError::CommandRecording)
            .context("Failed to record command buffer")
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
        }
    }

    fn submit(&self, info: &vk::SubmitInfo, fence: vk::Fence) -> VkResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, std::slice::from_ref(info), fence)
        }
    }

    fn present(&self, info: &vk::PresentInfoKHR) -> VkResult<bool> {
        unsafe { self.swapchain_loader.queue_present(self.present_queue, info) }
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        log::info!("Destroying logical device...");

        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
    }
}
