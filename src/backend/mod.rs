// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Everything above the instance/device level
// talks to the GPU through `GpuDevice`, so swapchain, pipeline and frame
// logic can be exercised without a driver.

pub mod device;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod instance;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use device::LogicalDevice;
pub use error::RendererError;
pub use frame::{FrameRenderer, FrameStatus};
pub use gpu::GpuDevice;
pub use instance::Instance;
pub use pipeline::GraphicsPipeline;
pub use swapchain::Swapchain;
pub use sync::MAX_FRAMES_IN_FLIGHT;
