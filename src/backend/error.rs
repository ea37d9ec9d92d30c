// Renderer error taxonomy
//
// Everything in here is fatal: the frame loop stops and the host tears the
// renderer down. Stale/suboptimal swapchains are not errors and never show
// up here (see frame::FrameStatus).

use ash::vk;

/// Fatal renderer failures.
///
/// Backend functions return `anyhow::Result` with one of these at the root
/// of the chain, so callers can `downcast_ref::<RendererError>()` to find
/// out what went wrong.
#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    #[error("failed to find GPUs with Vulkan support")]
    NoVulkanGpu,

    #[error("failed to find a suitable GPU")]
    NoSuitableGpu,

    #[error("requested validation layer `{0}` is not available")]
    MissingValidationLayer(String),

    #[error("window system is not supported for surface creation")]
    UnsupportedPlatform,

    #[error("failed to create logical device: {0}")]
    DeviceCreation(vk::Result),

    #[error("failed to create command pool: {0}")]
    CommandPoolCreation(vk::Result),

    #[error("failed to create swapchain resources: {0}")]
    SwapchainCreation(vk::Result),

    #[error("failed to create graphics pipeline: {0}")]
    PipelineCreation(vk::Result),

    #[error("shader bytecode length {len} is not a multiple of 4")]
    InvalidShaderCode { len: usize },

    #[error("failed to create synchronization objects: {0}")]
    SyncObjectCreation(vk::Result),

    #[error("failed to record command buffer: {0}")]
    CommandRecording(vk::Result),

    #[error("no memory type matches the requested properties")]
    NoSuitableMemoryType,

    #[error("failed to acquire swapchain image: {0}")]
    AcquireFailed(vk::Result),

    #[error("failed to submit draw command buffer: {0}")]
    SubmitFailed(vk::Result),

    #[error("failed to present swapchain image: {0}")]
    PresentFailed(vk::Result),
}
