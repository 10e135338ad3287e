//! Fixed-capacity descriptor heaps.
//!
//! Slots are handed out once, in order, and never reclaimed. Slot 0 of the
//! shader-resource heap belongs to the debug overlay, so the cursor for that
//! heap starts at 1.

use crate::{
    error::{Error, Result},
    format::Format,
    platform::RawDescriptorHeap,
    resource::{Dimension, GpuResource},
    Device,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    RenderTarget,
    DepthStencil,
    /// Constant buffer, shader resource and unordered access views.
    ShaderResource,
}

impl DescriptorKind {
    #[must_use]
    pub fn is_shader_visible(self) -> bool {
        self == DescriptorKind::ShaderResource
    }
}

/// The slot in the shader-resource heap reserved for the debug overlay.
pub const UI_RESERVED_SLOT: u32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuDescriptor(pub(crate) usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GpuDescriptor(pub(crate) u64);

/// What a descriptor describes. Platforms translate this into their native
/// view description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewDesc {
    RenderTarget { format: Format },
    DepthStencil { format: Format },
    Texture2D { format: Format, mip_levels: u16 },
    StructuredBuffer { count: u32, stride: u32 },
}

pub struct DescriptorHeap {
    raw: RawDescriptorHeap,
    kind: DescriptorKind,
    capacity: u32,
    stride: u64,
    cpu_start: usize,
    gpu_start: Option<u64>,
    cursor: u32,
}

impl DescriptorHeap {
    pub fn new(device: &Device, kind: DescriptorKind, capacity: u32) -> Result<Self> {
        assert!(capacity > 0, "descriptor heaps need at least one slot");

        let raw = device
            .raw
            .create_descriptor_heap(kind, capacity, kind.is_shader_visible())?;

        let cpu_start = raw.cpu_start();
        let gpu_start = raw.gpu_start();

        log::debug!("created {kind:?} descriptor heap with {capacity} slots");

        Ok(Self {
            raw,
            kind,
            capacity,
            stride: device.descriptor_stride(kind),
            cpu_start,
            gpu_start,
            cursor: if kind == DescriptorKind::ShaderResource {
                UI_RESERVED_SLOT + 1
            } else {
                0
            },
        })
    }

    #[must_use]
    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// The number of slots handed out so far, including the reserved one.
    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.cursor
    }

    /// Returns the CPU and (for shader-visible heaps) GPU handles of `index`.
    ///
    /// # Panics
    ///
    /// If `index` is not less than the heap's capacity.
    #[must_use]
    pub fn slot_handle(&self, index: u32) -> (CpuDescriptor, Option<GpuDescriptor>) {
        assert!(
            index < self.capacity,
            "descriptor slot {index} is out of range for a {:?} heap of {} slots",
            self.kind,
            self.capacity
        );

        let offset = u64::from(index) * self.stride;
        (
            CpuDescriptor(self.cpu_start + offset as usize),
            self.gpu_start.map(|start| GpuDescriptor(start + offset)),
        )
    }

    #[must_use]
    pub fn cpu_handle(&self, index: u32) -> CpuDescriptor {
        self.slot_handle(index).0
    }

    /// # Panics
    ///
    /// If the heap is not shader-visible.
    #[must_use]
    pub fn gpu_handle(&self, index: u32) -> GpuDescriptor {
        self.slot_handle(index)
            .1
            .unwrap_or_else(|| panic!("{:?} heaps have no GPU handles", self.kind))
    }

    /// Hands out the next unused slot.
    pub fn allocate(&mut self) -> Result<u32> {
        if self.cursor == self.capacity {
            return Err(Error::DescriptorHeapFull {
                kind: self.kind,
                capacity: self.capacity,
            });
        }

        let slot = self.cursor;
        self.cursor += 1;
        Ok(slot)
    }

    pub fn write_render_target_view(
        &self,
        device: &Device,
        slot: u32,
        resource: &GpuResource,
        format: Format,
    ) {
        assert_eq!(self.kind, DescriptorKind::RenderTarget);
        self.write(device, slot, resource, ViewDesc::RenderTarget { format });
    }

    pub fn write_depth_stencil_view(&self, device: &Device, slot: u32, resource: &GpuResource) {
        assert_eq!(self.kind, DescriptorKind::DepthStencil);
        assert!(resource.desc().format.is_depth());
        self.write(
            device,
            slot,
            resource,
            ViewDesc::DepthStencil {
                format: resource.desc().format,
            },
        );
    }

    /// Writes a view of every mip of a 2D texture.
    pub fn write_texture_view(&self, device: &Device, slot: u32, resource: &GpuResource) {
        assert_eq!(self.kind, DescriptorKind::ShaderResource);
        assert_eq!(resource.desc().dimension, Dimension::Texture2D);

        let desc = resource.desc();
        self.write(
            device,
            slot,
            resource,
            ViewDesc::Texture2D {
                format: desc.format,
                mip_levels: desc.mip_levels,
            },
        );
    }

    /// Writes a view of a buffer as `count` elements of `stride` bytes each.
    pub fn write_structured_buffer_view(
        &self,
        device: &Device,
        slot: u32,
        resource: &GpuResource,
        count: u32,
        stride: u32,
    ) {
        assert_eq!(self.kind, DescriptorKind::ShaderResource);
        assert_eq!(resource.desc().dimension, Dimension::Buffer);
        assert!(
            u64::from(count) * u64::from(stride) <= resource.desc().width,
            "structured buffer view is larger than its buffer"
        );

        self.write(
            device,
            slot,
            resource,
            ViewDesc::StructuredBuffer { count, stride },
        );
    }

    fn write(&self, device: &Device, slot: u32, resource: &GpuResource, view: ViewDesc) {
        assert!(
            !(self.kind == DescriptorKind::ShaderResource && slot == UI_RESERVED_SLOT),
            "shader-resource slot {UI_RESERVED_SLOT} is reserved for the overlay"
        );

        let (cpu, _) = self.slot_handle(slot);
        device.raw.write_view(resource.raw(), &view, cpu);
    }

    pub(crate) fn raw(&self) -> &RawDescriptorHeap {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{upload::ImageMetadata, GraphicsConfig};

    fn device() -> Device {
        Device::new(&GraphicsConfig::default()).unwrap()
    }

    #[test]
    fn slot_handles_advance_by_one_stride() {
        let device = device();

        for kind in [
            DescriptorKind::RenderTarget,
            DescriptorKind::DepthStencil,
            DescriptorKind::ShaderResource,
        ] {
            let heap = DescriptorHeap::new(&device, kind, 16).unwrap();
            let stride = heap.stride();
            assert!(stride > 0);

            for i in 1..heap.capacity() {
                let (prev_cpu, prev_gpu) = heap.slot_handle(i - 1);
                let (cpu, gpu) = heap.slot_handle(i);

                assert_eq!(cpu.0 - prev_cpu.0, stride as usize);
                match (prev_gpu, gpu) {
                    (Some(prev), Some(this)) => assert_eq!(this.0 - prev.0, stride),
                    (None, None) => assert!(!kind.is_shader_visible()),
                    _ => unreachable!(),
                }
            }
        }
    }

    #[test]
    fn slot_handles_never_overlap() {
        let device = device();
        let heap = DescriptorHeap::new(&device, DescriptorKind::ShaderResource, 128).unwrap();

        let mut handles: Vec<_> = (0..heap.capacity()).map(|i| heap.cpu_handle(i)).collect();
        handles.sort();
        handles.dedup();
        assert_eq!(handles.len(), 128);
    }

    #[test]
    fn separate_heaps_do_not_share_handles() {
        let device = device();
        let a = DescriptorHeap::new(&device, DescriptorKind::ShaderResource, 8).unwrap();
        let b = DescriptorHeap::new(&device, DescriptorKind::ShaderResource, 8).unwrap();

        for i in 0..8 {
            for j in 0..8 {
                assert_ne!(a.slot_handle(i), b.slot_handle(j));
            }
        }
    }

    #[test]
    fn shader_resource_allocation_skips_reserved_slot() {
        let device = device();
        let mut heap = DescriptorHeap::new(&device, DescriptorKind::ShaderResource, 3).unwrap();

        assert_eq!(heap.allocate().unwrap(), 1);
        assert_eq!(heap.allocate().unwrap(), 2);
        assert!(matches!(
            heap.allocate(),
            Err(Error::DescriptorHeapFull { capacity: 3, .. })
        ));
    }

    #[test]
    fn cpu_only_heaps_start_at_zero() {
        let device = device();
        let mut heap = DescriptorHeap::new(&device, DescriptorKind::RenderTarget, 2).unwrap();

        assert_eq!(heap.allocate().unwrap(), 0);
        assert_eq!(heap.slot_handle(0).1, None);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn slot_beyond_capacity_panics() {
        let device = device();
        let heap = DescriptorHeap::new(&device, DescriptorKind::DepthStencil, 1).unwrap();
        let _ = heap.slot_handle(1);
    }

    #[test]
    #[should_panic(expected = "reserved for the overlay")]
    fn reserved_slot_cannot_be_written() {
        let device = device();
        let heap = DescriptorHeap::new(&device, DescriptorKind::ShaderResource, 4).unwrap();
        let texture = device
            .create_texture_2d(&ImageMetadata::new_2d(4, 4, 1, Format::Rgba8Unorm))
            .unwrap();

        heap.write_texture_view(&device, UI_RESERVED_SLOT, &texture);
    }
}
