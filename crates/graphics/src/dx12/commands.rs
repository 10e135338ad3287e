use std::mem::ManuallyDrop;

use geometry::{Px, Rect};
use windows::{
    core::ComInterface,
    Win32::{
        Foundation::{CloseHandle, HANDLE, RECT},
        Graphics::{
            Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
            Direct3D12::*,
            Dxgi::Common::DXGI_FORMAT_R32_UINT,
        },
        System::Threading::{CreateEventW, WaitForSingleObject},
    },
};

use crate::{
    descriptor::{CpuDescriptor, GpuDescriptor},
    error::{Error, Result},
    format::SubresourceLayout,
    resource::ResourceState,
};

use super::{
    dxgi_format, resource_state, transition_barrier, RawDescriptorHeap, RawPipeline, RawResource,
};

pub struct RawQueue {
    pub(super) queue: ID3D12CommandQueue,
}

impl RawQueue {
    pub(super) fn new(device: &ID3D12Device) -> Result<Self> {
        let queue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })
        }?;

        Ok(Self { queue })
    }

    pub fn execute(&self, list: &RawCommandList) -> Result<()> {
        let list: ID3D12CommandList = list.list.cast()?;
        unsafe { self.queue.ExecuteCommandLists(&[Some(list)]) };
        Ok(())
    }

    pub fn signal(&self, fence: &RawFence, value: u64) -> Result<()> {
        unsafe { self.queue.Signal(&fence.fence, value) }?;
        Ok(())
    }
}

pub struct RawCommandAllocator {
    allocator: ID3D12CommandAllocator,
}

impl RawCommandAllocator {
    pub(super) fn new(device: &ID3D12Device) -> Result<Self> {
        let allocator = unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }?;
        Ok(Self { allocator })
    }

    pub fn reset(&self) -> Result<()> {
        unsafe { self.allocator.Reset() }?;
        Ok(())
    }
}

pub struct RawCommandList {
    list: ID3D12GraphicsCommandList,
}

impl RawCommandList {
    pub(super) fn new(device: &ID3D12Device, allocator: &RawCommandAllocator) -> Result<Self> {
        let list = unsafe {
            device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator.allocator, None)
        }?;

        Ok(Self { list })
    }

    pub fn close(&mut self) -> Result<()> {
        unsafe { self.list.Close() }?;
        Ok(())
    }

    pub fn reset(&mut self, allocator: &RawCommandAllocator) -> Result<()> {
        unsafe { self.list.Reset(&allocator.allocator, None) }?;
        Ok(())
    }

    pub fn transition(&mut self, resource: &RawResource, before: ResourceState, after: ResourceState) {
        unsafe {
            self.list.ResourceBarrier(&[transition_barrier(
                &resource.resource,
                resource_state(before),
                resource_state(after),
            )]);
        }
    }

    pub fn copy_to_subresource(
        &mut self,
        dst: &RawResource,
        subresource: u32,
        src: &RawResource,
        footprint: &SubresourceLayout,
    ) {
        let dst_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: ManuallyDrop::new(Some(unsafe { std::mem::transmute_copy(&dst.resource) })),
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                SubresourceIndex: subresource,
            },
        };

        let src_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: ManuallyDrop::new(Some(unsafe { std::mem::transmute_copy(&src.resource) })),
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: footprint.offset,
                    Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: dxgi_format(footprint.format),
                        Width: footprint.width,
                        Height: footprint.height,
                        Depth: 1,
                        RowPitch: footprint.row_pitch,
                    },
                },
            },
        };

        unsafe {
            self.list
                .CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
        }
    }

    pub fn set_render_target(&mut self, rtv: CpuDescriptor, dsv: Option<CpuDescriptor>) {
        let rtv = cpu_handle(rtv);
        let dsv = dsv.map(cpu_handle);
        unsafe {
            self.list.OMSetRenderTargets(
                1,
                Some(&rtv),
                false,
                dsv.as_ref().map(|dsv| dsv as *const _),
            );
        }
    }

    pub fn clear_render_target(&mut self, rtv: CpuDescriptor, color: [f32; 4]) {
        unsafe {
            self.list
                .ClearRenderTargetView(cpu_handle(rtv), color.as_ptr(), &[]);
        }
    }

    pub fn clear_depth(&mut self, dsv: CpuDescriptor, depth: f32) {
        unsafe {
            self.list
                .ClearDepthStencilView(cpu_handle(dsv), D3D12_CLEAR_FLAG_DEPTH, depth, 0, &[]);
        }
    }

    pub fn set_descriptor_heap(&mut self, heap: &RawDescriptorHeap) {
        unsafe { self.list.SetDescriptorHeaps(&[Some(heap.heap.clone())]) };
    }

    pub fn set_viewport(&mut self, rect: Rect<u32, Px>) {
        let origin = rect.top_left();
        let extent = rect.extent();
        unsafe {
            self.list.RSSetViewports(&[D3D12_VIEWPORT {
                TopLeftX: origin.x as f32,
                TopLeftY: origin.y as f32,
                Width: extent.width as f32,
                Height: extent.height as f32,
                MinDepth: 0.0,
                MaxDepth: 1.0,
            }]);
        }
    }

    pub fn set_scissor(&mut self, rect: Rect<u32, Px>) {
        let top_left = rect.top_left();
        let bottom_right = rect.bottom_right();
        unsafe {
            self.list.RSSetScissorRects(&[RECT {
                left: top_left.x as i32,
                top: top_left.y as i32,
                right: bottom_right.x as i32,
                bottom: bottom_right.y as i32,
            }]);
        }
    }

    pub fn set_pipeline(&mut self, pipeline: &RawPipeline) {
        unsafe {
            self.list.SetGraphicsRootSignature(&pipeline.root_signature);
            self.list.SetPipelineState(&pipeline.pipeline_state);
            self.list
                .IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
        }
    }

    pub fn set_vertex_buffer(&mut self, resource: &RawResource, stride: u32, size: u32) {
        let view = D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: resource.gpu_address(),
            SizeInBytes: size,
            StrideInBytes: stride,
        };
        unsafe { self.list.IASetVertexBuffers(0, Some(&[view])) };
    }

    pub fn set_index_buffer(&mut self, resource: &RawResource, size: u32) {
        let view = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: resource.gpu_address(),
            SizeInBytes: size,
            Format: DXGI_FORMAT_R32_UINT,
        };
        unsafe { self.list.IASetIndexBuffer(Some(&view)) };
    }

    pub fn set_root_constant_buffer(&mut self, index: u32, address: u64) {
        unsafe { self.list.SetGraphicsRootConstantBufferView(index, address) };
    }

    pub fn set_root_descriptor_table(&mut self, index: u32, table: GpuDescriptor) {
        unsafe {
            self.list.SetGraphicsRootDescriptorTable(
                index,
                D3D12_GPU_DESCRIPTOR_HANDLE { ptr: table.0 },
            );
        }
    }

    pub fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32) {
        unsafe { self.list.DrawInstanced(vertex_count, instance_count, 0, 0) };
    }

    pub fn draw_indexed_instanced(&mut self, index_count: u32, instance_count: u32) {
        unsafe {
            self.list
                .DrawIndexedInstanced(index_count, instance_count, 0, 0, 0);
        }
    }
}

pub struct RawFence {
    fence: ID3D12Fence,
    event: HANDLE,
    device: ID3D12Device,
}

impl RawFence {
    pub(super) fn new(device: &ID3D12Device, initial: u64) -> Result<Self> {
        let fence = unsafe { device.CreateFence(initial, D3D12_FENCE_FLAG_NONE) }?;
        let event = unsafe { CreateEventW(None, false, false, None) }?;

        Ok(Self {
            fence,
            event,
            device: device.clone(),
        })
    }

    pub fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    /// Blocks until the fence reaches `value`. There is no timeout.
    pub fn wait(&self, value: u64) -> Result<()> {
        if self.completed_value() < value {
            unsafe {
                self.fence.SetEventOnCompletion(value, self.event)?;
                WaitForSingleObject(self.event, u32::MAX);
            }
        }

        // A removed device signals every fence with u64::MAX.
        if self.completed_value() == u64::MAX {
            let reason = unsafe { self.device.GetDeviceRemovedReason() };
            return Err(Error::DeviceRemoved(match reason {
                Ok(()) => "fence reached u64::MAX".to_owned(),
                Err(e) => e.message().to_string_lossy(),
            }));
        }

        Ok(())
    }
}

impl Drop for RawFence {
    fn drop(&mut self) {
        if unsafe { CloseHandle(self.event) }.ok().is_err() {
            log::warn!("failed to close fence event");
        }
    }
}

fn cpu_handle(descriptor: CpuDescriptor) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: descriptor.0 }
}
