use geometry::{Extent, Px};
use raw_window_handle::RawWindowHandle;
use windows::{
    core::ComInterface,
    Win32::{
        Foundation::HWND,
        Graphics::{
            Direct3D12::ID3D12Resource,
            Dxgi::{Common::*, *},
        },
    },
};

use crate::{
    error::{Error, Result},
    format::Format,
};

use super::{dxgi_format, RawQueue, RawResource};

pub struct RawSwapchain {
    swapchain: IDXGISwapChain3,
}

impl RawSwapchain {
    pub(super) fn new(
        gi: &IDXGIFactory6,
        queue: &RawQueue,
        window: Option<RawWindowHandle>,
        extent: Extent<u32, Px>,
        format: Format,
        buffer_count: u32,
    ) -> Result<Self> {
        let window = match window {
            Some(RawWindowHandle::Win32(handle)) => HWND(handle.hwnd as _),
            _ => return Err(Error::UnsupportedWindow),
        };

        let swapchain: IDXGISwapChain3 = unsafe {
            gi.CreateSwapChainForHwnd(
                &queue.queue,
                window,
                &DXGI_SWAP_CHAIN_DESC1 {
                    Width: extent.width,
                    Height: extent.height,
                    Format: dxgi_format(format),
                    Stereo: false.into(),
                    SampleDesc: DXGI_SAMPLE_DESC {
                        Count: 1,
                        Quality: 0,
                    },
                    BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                    BufferCount: buffer_count,
                    Scaling: DXGI_SCALING_STRETCH,
                    // Flip-model swapchains can't be created with an sRGB
                    // buffer format; views reinterpret the buffers instead.
                    SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                    AlphaMode: DXGI_ALPHA_MODE_IGNORE,
                    Flags: 0,
                },
                None,
                None,
            )
        }?
        .cast()?;

        // Disable fullscreen transitions
        unsafe { gi.MakeWindowAssociation(window, DXGI_MWA_NO_ALT_ENTER) }?;

        Ok(Self { swapchain })
    }

    pub fn current_index(&self) -> u32 {
        unsafe { self.swapchain.GetCurrentBackBufferIndex() }
    }

    pub fn buffer(&self, index: u32) -> Result<RawResource> {
        let buffer: ID3D12Resource = unsafe { self.swapchain.GetBuffer(index) }?;
        Ok(RawResource::from_swapchain(buffer))
    }

    pub fn present(&self, sync_interval: u32) -> Result<()> {
        unsafe { self.swapchain.Present(sync_interval, 0) }.ok()?;
        Ok(())
    }
}
