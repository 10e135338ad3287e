use std::{cell::Cell, marker::PhantomData, ptr::NonNull};

use bytemuck::Pod;
use geometry::{Extent, Px};

use crate::{
    error::{Error, Result},
    format::Format,
    platform::RawResource,
    upload::ImageMetadata,
    Device,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dimension {
    Buffer,
    Texture2D,
}

/// Which memory pool a resource is committed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapKind {
    /// Host-visible, write-combined memory. Always mappable.
    Upload,
    /// Device-local memory. Only reachable through copies.
    Default,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    Present,
    RenderTarget,
    CopyDest,
    GenericRead,
    DepthWrite,
}

/// The immutable shape of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceDesc {
    pub dimension: Dimension,
    /// Bytes for buffers, texels for textures.
    pub width: u64,
    pub height: u32,
    pub array_size: u16,
    pub mip_levels: u16,
    pub format: Format,
}

impl ResourceDesc {
    #[must_use]
    pub fn buffer(size: u64) -> Self {
        Self {
            dimension: Dimension::Buffer,
            width: size,
            height: 1,
            array_size: 1,
            mip_levels: 1,
            format: Format::Unknown,
        }
    }

    #[must_use]
    pub fn texture_2d(
        width: u32,
        height: u32,
        mip_levels: u16,
        array_size: u16,
        format: Format,
    ) -> Self {
        Self {
            dimension: Dimension::Texture2D,
            width: u64::from(width),
            height,
            array_size,
            mip_levels,
            format,
        }
    }

    #[must_use]
    pub fn subresource_count(&self) -> u32 {
        u32::from(self.array_size) * u32::from(self.mip_levels)
    }
}

/// Clear value baked into depth targets at creation.
pub const DEPTH_CLEAR_VALUE: f32 = 1.0;

/// A single-owner handle to device memory.
///
/// Consumers borrow it (`&GpuResource`) for as long as they need it. The
/// tracked state is the state the resource will be in once every command
/// recorded so far has executed, and changes only through
/// [`CommandList::transition`](crate::CommandList::transition).
pub struct GpuResource {
    raw: RawResource,
    desc: ResourceDesc,
    heap: HeapKind,
    size: u64,
    state: Cell<ResourceState>,
}

impl GpuResource {
    pub(crate) fn from_raw(
        device: &Device,
        raw: RawResource,
        desc: ResourceDesc,
        heap: HeapKind,
        state: ResourceState,
    ) -> Self {
        Self {
            raw,
            desc,
            heap,
            size: device.copyable_footprints(&desc).total_size,
            state: Cell::new(state),
        }
    }

    #[must_use]
    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    #[must_use]
    pub fn heap(&self) -> HeapKind {
        self.heap
    }

    #[must_use]
    pub fn state(&self) -> ResourceState {
        self.state.get()
    }

    /// The number of bytes a buffer copy of the whole resource takes, as laid
    /// out by the device that created it. For buffers this is exactly the
    /// size that was requested.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn gpu_address(&self) -> u64 {
        self.raw.gpu_address()
    }

    /// Maps the whole resource for CPU access.
    ///
    /// Upload-heap memory stays mapped for the resource's lifetime, so this is
    /// cheap to call repeatedly. Writes are only safe while the GPU is not
    /// reading the resource, which the per-frame fence wait guarantees.
    pub fn map(&mut self) -> Result<&mut [u8]> {
        let ptr = self.mapped_ptr()?;
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.desc.width as usize) })
    }

    fn mapped_ptr(&self) -> Result<NonNull<u8>> {
        if self.heap != HeapKind::Upload || self.desc.dimension != Dimension::Buffer {
            return Err(Error::NotMappable);
        }

        NonNull::new(self.raw.map()?).ok_or(Error::NotMappable)
    }

    pub(crate) fn raw(&self) -> &RawResource {
        &self.raw
    }

    pub(crate) fn set_state(&self, state: ResourceState) {
        self.state.set(state);
    }
}

impl std::fmt::Debug for GpuResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuResource")
            .field("desc", &self.desc)
            .field("heap", &self.heap)
            .field("state", &self.state.get())
            .finish()
    }
}

impl Device {
    /// Allocates `size` bytes of host-visible memory in the upload heap.
    pub fn create_buffer(&self, size: u64) -> Result<GpuResource> {
        assert!(size > 0, "zero-sized buffers cannot be created");

        let desc = ResourceDesc::buffer(size);
        let raw = self
            .raw
            .create_resource(&desc, HeapKind::Upload, ResourceState::GenericRead)?;

        log::debug!("created {size} byte upload buffer");
        Ok(GpuResource::from_raw(
            self,
            raw,
            desc,
            HeapKind::Upload,
            ResourceState::GenericRead,
        ))
    }

    /// Allocates a device-local texture shaped like `metadata`. Its contents
    /// arrive through [`upload_texture`](crate::upload_texture), so it starts
    /// out as a copy destination.
    pub fn create_texture_2d(&self, metadata: &ImageMetadata) -> Result<GpuResource> {
        if metadata.dimension != Dimension::Texture2D {
            return Err(Error::LayoutMismatch(format!(
                "{:?} images cannot back a 2D texture",
                metadata.dimension
            )));
        }

        let desc = ResourceDesc::texture_2d(
            metadata.width,
            metadata.height,
            metadata.mip_levels,
            metadata.array_size,
            metadata.format,
        );

        let raw = self
            .raw
            .create_resource(&desc, HeapKind::Default, ResourceState::CopyDest)?;

        log::debug!(
            "created {}x{} texture with {} mips",
            metadata.width,
            metadata.height,
            metadata.mip_levels
        );

        Ok(GpuResource::from_raw(
            self,
            raw,
            desc,
            HeapKind::Default,
            ResourceState::CopyDest,
        ))
    }

    /// Allocates a D24S8 depth target that clears to [`DEPTH_CLEAR_VALUE`].
    pub fn create_depth_stencil(&self, extent: Extent<u32, Px>) -> Result<GpuResource> {
        let desc = ResourceDesc::texture_2d(extent.width, extent.height, 1, 1, Format::D24UnormS8Uint);
        let raw = self
            .raw
            .create_resource(&desc, HeapKind::Default, ResourceState::DepthWrite)?;

        Ok(GpuResource::from_raw(
            self,
            raw,
            desc,
            HeapKind::Default,
            ResourceState::DepthWrite,
        ))
    }
}

/// A persistently mapped upload buffer holding `len` values of `T`.
///
/// Used for everything the CPU rewrites between frames: constants, transforms
/// and particle instance records.
pub struct UploadBuffer<T> {
    resource: GpuResource,
    ptr: NonNull<T>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> UploadBuffer<T> {
    pub fn new(device: &Device, len: usize) -> Result<Self> {
        assert!(len > 0, "upload buffers must hold at least one element");

        let resource = device.create_buffer((len * std::mem::size_of::<T>()) as u64)?;
        let ptr = resource.mapped_ptr()?.cast::<T>();

        let mut buffer = Self {
            resource,
            ptr,
            len,
            _marker: PhantomData,
        };

        buffer.as_mut_slice().fill(T::zeroed());
        Ok(buffer)
    }

    pub fn with_contents(device: &Device, contents: &[T]) -> Result<Self> {
        let mut buffer = Self::new(device, contents.len())?;
        buffer.as_mut_slice().copy_from_slice(contents);
        Ok(buffer)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    #[must_use]
    pub fn resource(&self) -> &GpuResource {
        &self.resource
    }
}

impl<T: Pod> UploadBuffer<T> {
    /// Overwrites the first element. Convenient for single-value constant
    /// buffers.
    pub fn write(&mut self, value: T) {
        self.as_mut_slice()[0] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphicsConfig;

    fn device() -> Device {
        Device::new(&GraphicsConfig::default()).unwrap()
    }

    #[test]
    fn buffer_size_matches_request() {
        let device = device();
        for size in [1, 4, 256, 1000, 65_537] {
            let buffer = device.create_buffer(size).unwrap();
            assert_eq!(buffer.size_bytes(), size);
            assert_eq!(buffer.state(), ResourceState::GenericRead);
            assert_eq!(buffer.heap(), HeapKind::Upload);
        }
    }

    #[test]
    fn mapped_buffer_round_trip() {
        let device = device();
        let mut buffer = device.create_buffer(1024).unwrap();

        let pattern: Vec<u8> = (0..1024u32).map(|i| (i * 7 % 251) as u8).collect();
        buffer.map().unwrap().copy_from_slice(&pattern);

        assert_eq!(buffer.map().unwrap(), pattern.as_slice());
    }

    #[test]
    fn textures_start_as_copy_destinations() {
        let device = device();
        let texture = device
            .create_texture_2d(&ImageMetadata::new_2d(16, 8, 5, Format::Rgba8UnormSrgb))
            .unwrap();

        assert_eq!(texture.state(), ResourceState::CopyDest);
        assert_eq!(texture.heap(), HeapKind::Default);
        assert_eq!(texture.desc().subresource_count(), 5);
    }

    #[test]
    fn texture_size_follows_the_device_layout() {
        let device = device();
        let texture = device
            .create_texture_2d(&ImageMetadata::new_2d(100, 10, 1, Format::Rgba8UnormSrgb))
            .unwrap();

        let footprints = device.copyable_footprints(texture.desc());
        assert_eq!(texture.size_bytes(), footprints.total_size);
        // 400-byte rows are padded out to the 256-byte pitch.
        assert!(texture.size_bytes() >= 9 * 512 + 400);
    }

    #[test]
    fn default_heap_is_not_mappable() {
        let device = device();
        let mut depth = device.create_depth_stencil(Extent::new(4, 4)).unwrap();

        assert_eq!(depth.state(), ResourceState::DepthWrite);
        assert!(matches!(depth.map(), Err(Error::NotMappable)));
    }

    #[test]
    fn upload_buffer_is_zeroed_and_writable() {
        let device = device();
        let mut buffer = UploadBuffer::<[f32; 4]>::new(&device, 3).unwrap();

        assert!(buffer.as_slice().iter().all(|v| *v == [0.0; 4]));
        buffer.write([1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buffer.as_slice()[0], [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(buffer.resource().size_bytes(), 48);
    }
}
