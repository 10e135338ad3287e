//! Graphics!
//!
//! A small Direct3D 12 style frame engine: committed resources, fixed
//! descriptor heaps, staged texture uploads, a single command
//! allocator/list pair paced by a fence, a CPU-simulated particle burst drawn
//! with instancing, and the frame loop that ties them together.
//!
//! ## Platforms
//!
//! On Windows everything goes through D3D12. Elsewhere a headless CPU device
//! with the same surface area stands in for it. It executes command lists on
//! its own timeline thread, so fences, barriers and copies behave like they
//! do on a real queue, and the core can be exercised without a GPU.
//!
//! ## Synchronization
//!
//! There is exactly one frame in flight. Every frame ends with
//! [`CommandContext::signal_and_wait`], and nothing the CPU writes (upload
//! buffers, the command allocator, staging memory) is touched again until
//! that wait returns.

mod command;
mod constants;
mod descriptor;
mod device;
mod error;
mod format;
mod frame;
mod particles;
mod pipeline;
mod resource;
mod submission;
mod surface;
mod upload;

#[cfg(target_os = "windows")]
mod dx12;

#[cfg(target_os = "windows")]
use dx12 as platform;

#[cfg(not(target_os = "windows"))]
mod headless;

#[cfg(not(target_os = "windows"))]
use headless as platform;

#[cfg(all(test, not(target_os = "windows")))]
mod tests;

pub use command::CommandList;
pub use constants::{DirectionalLight, Material, TransformationMatrix};
pub use descriptor::{CpuDescriptor, DescriptorHeap, DescriptorKind, GpuDescriptor, UI_RESERVED_SLOT};
pub use device::Device;
pub use error::{Error, Result};
pub use format::{copyable_footprints, mip_extent, Footprints, Format, SubresourceLayout};
pub use frame::{
    DepthTarget, DrawItem, FrameInputs, FrameLoop, FrameReport, FrameStage, InstanceCount, Overlay,
    TextureSelector, CLEAR_COLOR,
};
pub use particles::{
    serialize_live, tick, InstanceRecord, Particle, ParticleSystem, DELTA_TIME,
    DEFAULT_PARTICLE_CAPACITY,
};
pub use pipeline::{
    BlendMode, CullMode, DepthState, InputElement, Pipeline, PipelineDesc, RootParameter,
    ShaderStage,
};
pub use resource::{
    Dimension, GpuResource, HeapKind, ResourceDesc, ResourceState, UploadBuffer,
    DEPTH_CLEAR_VALUE,
};
pub use submission::{CommandContext, FenceValue};
pub use surface::Swapchain;
pub use upload::{upload_buffer, upload_texture, DecodedImage, ImageMetadata, Staging, SubresourceData};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PowerPreference {
    #[default]
    DontCare,
    LowPower,
    HiPower,
}

/// Options for configuring the graphics device on initialization. Once set,
/// these options cannot be changed without recreating the device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsConfig {
    /// Influences adapter selection on multi-GPU systems. The software
    /// adapter is used when no hardware adapter matches.
    pub power_preference: PowerPreference,

    /// Whether or not to enable the debug layer.
    ///
    /// Defaults to `None`, which enables it in debug builds. Override with
    /// `Some(true)` or `Some(false)` to force it on or off.
    pub debug_mode: Option<bool>,
}

impl GraphicsConfig {
    #[must_use]
    pub fn debug_enabled(&self) -> bool {
        self.debug_mode.unwrap_or(cfg!(debug_assertions))
    }
}
