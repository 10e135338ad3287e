use geometry::{Extent, Px};
use raw_window_handle::{HasRawWindowHandle, RawWindowHandle};

use crate::{
    descriptor::{CpuDescriptor, DescriptorHeap, DescriptorKind},
    error::Result,
    format::Format,
    platform::RawSwapchain,
    resource::{GpuResource, HeapKind, ResourceDesc, ResourceState},
    submission::CommandContext,
    Device,
};

/// A double-buffered presentation surface and its render target views.
pub struct Swapchain {
    raw: RawSwapchain,
    extent: Extent<u32, Px>,
    buffers: Vec<GpuResource>,
    rtv_heap: DescriptorHeap,
}

impl Swapchain {
    pub const BUFFER_COUNT: u32 = 2;

    /// Buffers are plain RGBA8. Render target views reinterpret them as sRGB
    /// so shader output is gamma-encoded on write.
    pub const BUFFER_FORMAT: Format = Format::Rgba8Unorm;
    pub const VIEW_FORMAT: Format = Format::Rgba8UnormSrgb;

    pub fn new(
        device: &Device,
        context: &CommandContext,
        window: &impl HasRawWindowHandle,
        extent: Extent<u32, Px>,
    ) -> Result<Self> {
        Self::create(device, context, Some(window.raw_window_handle()), extent)
    }

    /// A swapchain with no window behind it. Presentation still flips
    /// buffers and validates their state.
    #[cfg(not(target_os = "windows"))]
    pub fn offscreen(
        device: &Device,
        context: &CommandContext,
        extent: Extent<u32, Px>,
    ) -> Result<Self> {
        Self::create(device, context, None, extent)
    }

    fn create(
        device: &Device,
        context: &CommandContext,
        window: Option<RawWindowHandle>,
        extent: Extent<u32, Px>,
    ) -> Result<Self> {
        let raw = device.raw.create_swapchain(
            context.queue(),
            window,
            extent,
            Self::BUFFER_FORMAT,
            Self::BUFFER_COUNT,
        )?;

        let mut rtv_heap =
            DescriptorHeap::new(device, DescriptorKind::RenderTarget, Self::BUFFER_COUNT)?;

        let desc = ResourceDesc::texture_2d(extent.width, extent.height, 1, 1, Self::BUFFER_FORMAT);
        let mut buffers = Vec::with_capacity(Self::BUFFER_COUNT as usize);
        for index in 0..Self::BUFFER_COUNT {
            let buffer = GpuResource::from_raw(
                device,
                raw.buffer(index)?,
                desc,
                HeapKind::Default,
                ResourceState::Present,
            );

            let slot = rtv_heap.allocate()?;
            debug_assert_eq!(slot, index);
            rtv_heap.write_render_target_view(device, slot, &buffer, Self::VIEW_FORMAT);
            buffers.push(buffer);
        }

        log::info!(
            "created {}x{} swapchain with {} buffers",
            extent.width,
            extent.height,
            Self::BUFFER_COUNT
        );

        Ok(Self {
            raw,
            extent,
            buffers,
            rtv_heap,
        })
    }

    #[must_use]
    pub fn extent(&self) -> Extent<u32, Px> {
        self.extent
    }

    /// The index of the buffer that will be presented next.
    #[must_use]
    pub fn current_index(&self) -> u32 {
        self.raw.current_index()
    }

    #[must_use]
    pub fn backbuffer(&self, index: u32) -> &GpuResource {
        &self.buffers[index as usize]
    }

    #[must_use]
    pub fn rtv(&self, index: u32) -> CpuDescriptor {
        self.rtv_heap.cpu_handle(index)
    }

    pub(crate) fn present(&self, sync_interval: u32) -> Result<()> {
        self.raw.present(sync_interval)
    }
}
