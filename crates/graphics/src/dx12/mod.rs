//! The Direct3D 12 device.

use std::{ffi::c_void, mem::ManuallyDrop};

use windows::{
    core::{ComInterface, PCSTR},
    Win32::Graphics::{
        Direct3D::D3D_FEATURE_LEVEL_11_0,
        Direct3D12::*,
        Dxgi::{Common::*, *},
    },
};

use crate::{
    descriptor::{CpuDescriptor, DescriptorKind, ViewDesc},
    error::{Error, Result},
    format::{Footprints, Format, SubresourceLayout},
    pipeline::PipelineDesc,
    resource::{Dimension, HeapKind, ResourceDesc, ResourceState, DEPTH_CLEAR_VALUE},
    PowerPreference,
};

mod commands;
mod pipeline;
mod surface;

pub use commands::{RawCommandAllocator, RawCommandList, RawFence, RawQueue};
pub use pipeline::RawPipeline;
pub use surface::RawSwapchain;

pub struct Device {
    is_debug: bool,
    gi: IDXGIFactory6,
    adapter_name: String,
    device: ID3D12Device,
}

impl Device {
    pub fn new(power_preference: PowerPreference, debug: bool) -> Result<Self> {
        // Use IDXGIFactory6 for power preference selection
        let gi: IDXGIFactory6 = {
            let flags = if debug { DXGI_CREATE_FACTORY_DEBUG } else { 0 };
            unsafe { CreateDXGIFactory2(flags) }?
        };

        let power_preference = match power_preference {
            PowerPreference::DontCare => DXGI_GPU_PREFERENCE_UNSPECIFIED,
            PowerPreference::LowPower => DXGI_GPU_PREFERENCE_MINIMUM_POWER,
            PowerPreference::HiPower => DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE,
        };

        let adapter: IDXGIAdapter = unsafe { gi.EnumAdapterByGpuPreference(0, power_preference) }
            .or_else(|_| unsafe { gi.EnumWarpAdapter() })
            .map_err(|_| Error::NoAdapter)?;

        let adapter_name = unsafe { adapter.GetDesc() }
            .map(|desc| {
                String::from_utf16_lossy(&desc.Description)
                    .trim_end_matches('\0')
                    .to_owned()
            })
            .unwrap_or_else(|_| "unknown adapter".to_owned());

        if debug {
            let mut dx_debug: Option<ID3D12Debug> = None;
            unsafe { D3D12GetDebugInterface(&mut dx_debug) }?;
            if let Some(dx_debug) = dx_debug {
                unsafe { dx_debug.EnableDebugLayer() };
            }
        }

        let device = {
            let mut device: Option<ID3D12Device> = None;
            unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }?;
            device.ok_or(Error::NoAdapter)?
        };

        if debug {
            match device.cast::<ID3D12InfoQueue1>() {
                Ok(queue) => {
                    let mut cookie = 0;
                    unsafe {
                        queue.RegisterMessageCallback(
                            Some(debug_callback),
                            D3D12_MESSAGE_CALLBACK_IGNORE_FILTERS,
                            std::ptr::null(),
                            &mut cookie,
                        )
                    }?;
                }
                Err(_) => log::warn!("ID3D12InfoQueue1 is unavailable, debug messages will not be logged"),
            }
        }

        Ok(Self {
            is_debug: debug,
            gi,
            adapter_name,
            device,
        })
    }

    pub fn adapter_name(&self) -> String {
        self.adapter_name.clone()
    }

    pub fn descriptor_stride(&self, kind: DescriptorKind) -> u64 {
        u64::from(unsafe {
            self.device
                .GetDescriptorHandleIncrementSize(descriptor_heap_type(kind))
        })
    }

    pub fn copyable_footprints(&self, desc: &ResourceDesc) -> Footprints {
        let count = desc.subresource_count() as usize;
        let mut placed = vec![D3D12_PLACED_SUBRESOURCE_FOOTPRINT::default(); count];
        let mut rows = vec![0u32; count];
        let mut row_sizes = vec![0u64; count];
        let mut total_size = 0;

        unsafe {
            self.device.GetCopyableFootprints(
                &resource_desc(desc),
                0,
                count as u32,
                0,
                Some(placed.as_mut_ptr()),
                Some(rows.as_mut_ptr()),
                Some(row_sizes.as_mut_ptr()),
                Some(&mut total_size),
            );
        }

        let layouts = placed
            .iter()
            .zip(rows)
            .zip(row_sizes)
            .map(|((placed, rows), row_size)| SubresourceLayout {
                offset: placed.Offset,
                format: desc.format,
                width: placed.Footprint.Width,
                height: placed.Footprint.Height,
                row_pitch: placed.Footprint.RowPitch,
                rows,
                row_size,
            })
            .collect();

        Footprints {
            layouts,
            total_size,
        }
    }

    pub fn create_resource(
        &self,
        desc: &ResourceDesc,
        heap: HeapKind,
        state: ResourceState,
    ) -> Result<RawResource> {
        let heap_properties = D3D12_HEAP_PROPERTIES {
            Type: match heap {
                HeapKind::Upload => D3D12_HEAP_TYPE_UPLOAD,
                HeapKind::Default => D3D12_HEAP_TYPE_DEFAULT,
            },
            CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
            MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
            CreationNodeMask: 0,
            VisibleNodeMask: 0,
        };

        let clear_value = D3D12_CLEAR_VALUE {
            Format: dxgi_format(desc.format),
            Anonymous: D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                    Depth: DEPTH_CLEAR_VALUE,
                    Stencil: 0,
                },
            },
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &heap_properties,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc(desc),
                resource_state(state),
                desc.format.is_depth().then_some(&clear_value as *const _),
                &mut resource,
            )
        }?;
        let resource = resource.ok_or(Error::InvalidCall("CreateCommittedResource returned nothing"))?;

        // Upload memory is mapped once and stays mapped until release.
        let mapped = if heap == HeapKind::Upload {
            let mut ptr = std::ptr::null_mut();
            unsafe { resource.Map(0, None, Some(&mut ptr)) }?;
            ptr.cast()
        } else {
            std::ptr::null_mut()
        };

        Ok(RawResource { resource, mapped })
    }

    pub fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<RawDescriptorHeap> {
        let heap: ID3D12DescriptorHeap = unsafe {
            self.device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: descriptor_heap_type(kind),
                NumDescriptors: capacity,
                Flags: if shader_visible {
                    D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
                } else {
                    D3D12_DESCRIPTOR_HEAP_FLAG_NONE
                },
                NodeMask: 0,
            })
        }?;

        let cpu_start = unsafe { heap.GetCPUDescriptorHandleForHeapStart() }.ptr;
        let gpu_start =
            shader_visible.then(|| unsafe { heap.GetGPUDescriptorHandleForHeapStart() }.ptr);

        Ok(RawDescriptorHeap {
            heap,
            cpu_start,
            gpu_start,
        })
    }

    pub fn write_view(&self, resource: &RawResource, view: &ViewDesc, dst: CpuDescriptor) {
        let handle = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: dst.0 };

        match *view {
            ViewDesc::RenderTarget { format } => unsafe {
                self.device.CreateRenderTargetView(
                    &resource.resource,
                    Some(&D3D12_RENDER_TARGET_VIEW_DESC {
                        Format: dxgi_format(format),
                        ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
                        Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_RTV {
                                MipSlice: 0,
                                PlaneSlice: 0,
                            },
                        },
                    }),
                    handle,
                );
            },
            ViewDesc::DepthStencil { format } => unsafe {
                self.device.CreateDepthStencilView(
                    &resource.resource,
                    Some(&D3D12_DEPTH_STENCIL_VIEW_DESC {
                        Format: dxgi_format(format),
                        ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
                        Flags: D3D12_DSV_FLAG_NONE,
                        Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
                        },
                    }),
                    handle,
                );
            },
            ViewDesc::Texture2D { format, mip_levels } => unsafe {
                self.device.CreateShaderResourceView(
                    &resource.resource,
                    Some(&D3D12_SHADER_RESOURCE_VIEW_DESC {
                        Format: dxgi_format(format),
                        ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
                        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                        Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_SRV {
                                MostDetailedMip: 0,
                                MipLevels: u32::from(mip_levels),
                                PlaneSlice: 0,
                                ResourceMinLODClamp: 0.0,
                            },
                        },
                    }),
                    handle,
                );
            },
            ViewDesc::StructuredBuffer { count, stride } => unsafe {
                self.device.CreateShaderResourceView(
                    &resource.resource,
                    Some(&D3D12_SHADER_RESOURCE_VIEW_DESC {
                        Format: DXGI_FORMAT_UNKNOWN,
                        ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
                        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                        Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                            Buffer: D3D12_BUFFER_SRV {
                                FirstElement: 0,
                                NumElements: count,
                                StructureByteStride: stride,
                                Flags: D3D12_BUFFER_SRV_FLAG_NONE,
                            },
                        },
                    }),
                    handle,
                );
            },
        }
    }

    pub fn create_queue(&self) -> Result<RawQueue> {
        RawQueue::new(&self.device)
    }

    pub fn create_command_allocator(&self) -> Result<RawCommandAllocator> {
        RawCommandAllocator::new(&self.device)
    }

    pub fn create_command_list(&self, allocator: &RawCommandAllocator) -> Result<RawCommandList> {
        RawCommandList::new(&self.device, allocator)
    }

    pub fn create_fence(&self, initial: u64) -> Result<RawFence> {
        RawFence::new(&self.device, initial)
    }

    pub fn create_swapchain(
        &self,
        queue: &RawQueue,
        window: Option<raw_window_handle::RawWindowHandle>,
        extent: geometry::Extent<u32, geometry::Px>,
        format: Format,
        buffer_count: u32,
    ) -> Result<RawSwapchain> {
        RawSwapchain::new(&self.gi, queue, window, extent, format, buffer_count)
    }

    pub fn create_pipeline(&self, desc: &PipelineDesc) -> Result<RawPipeline> {
        RawPipeline::new(&self.device, desc)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.is_debug {
            if let Ok(dxgi_debug) = unsafe { DXGIGetDebugInterface1::<IDXGIDebug1>(0) } {
                let _ = unsafe {
                    dxgi_debug.ReportLiveObjects(
                        DXGI_DEBUG_ALL,
                        DXGI_DEBUG_RLO_SUMMARY | DXGI_DEBUG_RLO_IGNORE_INTERNAL,
                    )
                };
            }
        }
    }
}

extern "system" fn debug_callback(
    _category: D3D12_MESSAGE_CATEGORY,
    severity: D3D12_MESSAGE_SEVERITY,
    id: D3D12_MESSAGE_ID,
    description: PCSTR,
    _context: *mut c_void,
) {
    let description = unsafe { description.display() };
    match severity {
        D3D12_MESSAGE_SEVERITY_CORRUPTION | D3D12_MESSAGE_SEVERITY_ERROR => {
            log::error!("D3D12 {id:?}: {description}");
        }
        D3D12_MESSAGE_SEVERITY_WARNING => log::warn!("D3D12 {id:?}: {description}"),
        D3D12_MESSAGE_SEVERITY_INFO => log::info!("D3D12 {id:?}: {description}"),
        _ => log::debug!("D3D12 {id:?}: {description}"),
    }
}

#[derive(Clone)]
pub struct RawResource {
    resource: ID3D12Resource,
    mapped: *mut u8,
}

impl RawResource {
    pub(super) fn from_swapchain(resource: ID3D12Resource) -> Self {
        Self {
            resource,
            mapped: std::ptr::null_mut(),
        }
    }

    pub fn map(&self) -> Result<*mut u8> {
        if self.mapped.is_null() {
            Err(Error::NotMappable)
        } else {
            Ok(self.mapped)
        }
    }

    pub fn gpu_address(&self) -> u64 {
        unsafe { self.resource.GetGPUVirtualAddress() }
    }
}

pub struct RawDescriptorHeap {
    heap: ID3D12DescriptorHeap,
    cpu_start: usize,
    gpu_start: Option<u64>,
}

impl RawDescriptorHeap {
    pub fn cpu_start(&self) -> usize {
        self.cpu_start
    }

    pub fn gpu_start(&self) -> Option<u64> {
        self.gpu_start
    }
}

fn transition_barrier(
    resource: &ID3D12Resource,
    state_before: D3D12_RESOURCE_STATES,
    state_after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: ManuallyDrop::new(Some(unsafe { std::mem::transmute_copy(resource) })),
                StateBefore: state_before,
                StateAfter: state_after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

fn resource_desc(desc: &ResourceDesc) -> D3D12_RESOURCE_DESC {
    let (dimension, layout, format) = match desc.dimension {
        Dimension::Buffer => (
            D3D12_RESOURCE_DIMENSION_BUFFER,
            D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            DXGI_FORMAT_UNKNOWN,
        ),
        Dimension::Texture2D => (
            D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            D3D12_TEXTURE_LAYOUT_UNKNOWN,
            dxgi_format(desc.format),
        ),
    };

    D3D12_RESOURCE_DESC {
        Dimension: dimension,
        Alignment: 0,
        Width: desc.width,
        Height: desc.height,
        DepthOrArraySize: desc.array_size,
        MipLevels: desc.mip_levels,
        Format: format,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Layout: layout,
        Flags: if desc.format.is_depth() {
            D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL
        } else {
            D3D12_RESOURCE_FLAG_NONE
        },
    }
}

fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
    }
}

fn descriptor_heap_type(kind: DescriptorKind) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match kind {
        DescriptorKind::RenderTarget => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorKind::DepthStencil => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
        DescriptorKind::ShaderResource => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
    }
}

fn dxgi_format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::Rgba8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        Format::Rg32Float => DXGI_FORMAT_R32G32_FLOAT,
        Format::Rgb32Float => DXGI_FORMAT_R32G32B32_FLOAT,
        Format::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
    }
}
