// Synchronization primitives
//
// Per-frame semaphores and fence. Each frame slot waits on its own fence
// before reusing its command buffer, so at most MAX_FRAMES_IN_FLIGHT frames
// are queued on the GPU at once.

use anyhow::Result;
use ash::vk;

use super::gpu::GpuDevice;

/// Frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Frame synchronization - one per frame in flight
#[derive(Debug, Default)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    /// The fence starts signaled so the first wait on it returns at once.
    pub fn new<D: GpuDevice>(device: &D) -> Result<Self> {
        let mut sync = Self::default();

        let created = (|| -> Result<()> {
            sync.image_available = device.create_semaphore()?;
            sync.render_finished = device.create_semaphore()?;
            sync.in_flight_fence = device.create_fence(true)?;
            Ok(())
        })();

        if let Err(e) = created {
            sync.destroy(device);
            return Err(e);
        }

        Ok(sync)
    }

    /// Skips handles that were never created; safe to call twice.
    pub fn destroy<D: GpuDevice>(&mut self, device: &D) {
        if self.image_available != vk::Semaphore::null() {
            device.destroy_semaphore(self.image_available);
            self.image_available = vk::Semaphore::null();
        }

        if self.render_finished != vk::Semaphore::null() {
            device.destroy_semaphore(self.render_finished);
            self.render_finished = vk::Semaphore::null();
        }

        if self.in_flight_fence != vk::Fence::null() {
            device.destroy_fence(self.in_flight_fence);
            self.in_flight_fence = vk::Fence::null();
        }
    }
}

/// Cycles through frame slots `0..MAX_FRAMES_IN_FLIGHT`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameIndex(usize);

impl FrameIndex {
    pub fn current(self) -> usize {
        self.0
    }

    /// Move to the next slot, wrapping around.
    pub fn advance(&mut self) {
        self.0 = (self.0 + 1) % MAX_FRAMES_IN_FLIGHT;
    }
}
