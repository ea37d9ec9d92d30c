// Hundred Kilometers - Vulkan renderer core
//
// Device selection, swapchain lifecycle, a fixed triangle pipeline and a
// double-buffered frame loop. `Renderer` ties them together for a host
// window; `main.rs` is that host.

pub mod backend;
pub mod config;
pub mod renderer;
pub mod resources;

pub use config::Config;
pub use renderer::{FrameOutcome, Renderer};
