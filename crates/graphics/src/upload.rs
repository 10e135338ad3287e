//! Getting CPU data into GPU resources.
//!
//! Textures live in the default heap and are filled through a staging buffer:
//!
//! 1. lay out every subresource of the destination for a buffer copy,
//! 2. allocate a staging buffer of the total size,
//! 3. copy texel rows into it at the aligned pitch,
//! 4. record one copy per subresource,
//! 5. record a `CopyDest -> GenericRead` barrier on the destination.
//!
//! Nothing runs until the frame loop submits the list, and the staging
//! buffer must outlive that submission. [`upload_texture`] hands it back as a
//! [`Staging`] for [`CommandContext::retire`], which drops it only after the
//! fence has passed.
//!
//! Vertex and index data skip all of this: upload-heap buffers are mapped and
//! written directly.

use bytemuck::Pod;

use crate::{
    error::{Error, Result},
    format::{mip_extent, Format},
    resource::{Dimension, GpuResource, ResourceState},
    submission::{CommandContext, FenceValue},
    Device,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u16,
    pub array_size: u16,
    pub format: Format,
    pub dimension: Dimension,
}

impl ImageMetadata {
    #[must_use]
    pub fn new_2d(width: u32, height: u32, mip_levels: u16, format: Format) -> Self {
        Self {
            width,
            height,
            mip_levels,
            array_size: 1,
            format,
            dimension: Dimension::Texture2D,
        }
    }
}

/// Tightly packed texel rows for one subresource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubresourceData {
    pub row_pitch: usize,
    pub slice_pitch: usize,
    pub data: Vec<u8>,
}

/// Decoded texels with their mip chain, in subresource order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub metadata: ImageMetadata,
    pub subresources: Vec<SubresourceData>,
}

/// A staging buffer that must stay alive until the GPU reaches `ready_at`.
#[must_use = "staging buffers must be retired, not dropped, until the GPU has used them"]
pub struct Staging {
    resource: GpuResource,
    ready_at: FenceValue,
}

impl Staging {
    #[must_use]
    pub fn ready_at(&self) -> FenceValue {
        self.ready_at
    }

    #[must_use]
    pub fn resource(&self) -> &GpuResource {
        &self.resource
    }
    pub(crate) fn stamp(&mut self, ready_at: FenceValue) {
        self.ready_at = ready_at;
    }
}

/// Records the upload of `image` into `dst`, which must be a copy
/// destination shaped like the image.
pub fn upload_texture(
    device: &Device,
    context: &mut CommandContext,
    dst: &GpuResource,
    image: &DecodedImage,
) -> Result<Staging> {
    check_matches(dst, image)?;

    let footprints = device.copyable_footprints(dst.desc());
    let mut staging = device.create_buffer(footprints.total_size)?;

    {
        let bytes = staging.map()?;
        for (layout, source) in footprints.layouts.iter().zip(&image.subresources) {
            let row_size = layout.row_size as usize;
            for row in 0..layout.rows as usize {
                let src = &source.data[row * source.row_pitch..][..row_size];
                let dst = layout.offset as usize + row * layout.row_pitch as usize;
                bytes[dst..dst + row_size].copy_from_slice(src);
            }
        }
    }

    let list = context.command_list();
    for (index, layout) in footprints.layouts.iter().enumerate() {
        list.copy_to_subresource(dst, index as u32, &staging, layout);
    }
    list.transition(dst, ResourceState::GenericRead);

    log::debug!(
        "staged {} bytes for a {}x{} texture ({} subresources)",
        footprints.total_size,
        image.metadata.width,
        image.metadata.height,
        footprints.layouts.len()
    );

    Ok(Staging {
        resource: staging,
        ready_at: context.pending_value(),
    })
}

/// Copies `contents` into a new upload-heap buffer.
pub fn upload_buffer<T: Pod>(device: &Device, contents: &[T]) -> Result<GpuResource> {
    let bytes: &[u8] = bytemuck::cast_slice(contents);
    let mut buffer = device.create_buffer(bytes.len() as u64)?;
    buffer.map()?.copy_from_slice(bytes);
    Ok(buffer)
}

fn check_matches(dst: &GpuResource, image: &DecodedImage) -> Result<()> {
    let desc = dst.desc();
    let meta = &image.metadata;

    if dst.state() != ResourceState::CopyDest {
        return Err(Error::LayoutMismatch(format!(
            "destination is in {:?}, not CopyDest",
            dst.state()
        )));
    }

    if (desc.width, desc.height, desc.mip_levels, desc.array_size, desc.format)
        != (
            u64::from(meta.width),
            meta.height,
            meta.mip_levels,
            meta.array_size,
            meta.format,
        )
    {
        return Err(Error::LayoutMismatch(format!(
            "image is {meta:?} but the texture is {desc:?}"
        )));
    }

    if image.subresources.len() != desc.subresource_count() as usize {
        return Err(Error::LayoutMismatch(format!(
            "expected {} subresources, got {}",
            desc.subresource_count(),
            image.subresources.len()
        )));
    }

    let bytes_per_pixel = meta.format.bytes_per_pixel() as usize;
    for (index, sub) in image.subresources.iter().enumerate() {
        let mip = (index % meta.mip_levels as usize) as u16;
        let width = mip_extent(meta.width, mip) as usize;
        let height = mip_extent(meta.height, mip) as usize;

        if sub.row_pitch < width * bytes_per_pixel || sub.data.len() < sub.row_pitch * height {
            return Err(Error::LayoutMismatch(format!(
                "subresource {index} holds {} bytes, too few for {width}x{height}",
                sub.data.len()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphicsConfig;

    fn solid(width: u32, height: u32, mips: u16, texel: [u8; 4]) -> DecodedImage {
        let subresources = (0..mips)
            .map(|mip| {
                let w = mip_extent(width, mip) as usize;
                let h = mip_extent(height, mip) as usize;
                SubresourceData {
                    row_pitch: w * 4,
                    slice_pitch: w * h * 4,
                    data: texel.repeat(w * h),
                }
            })
            .collect();

        DecodedImage {
            metadata: ImageMetadata::new_2d(width, height, mips, Format::Rgba8UnormSrgb),
            subresources,
        }
    }

    #[test]
    fn staging_waits_on_the_pending_fence_value() {
        let device = Device::new(&GraphicsConfig::default()).unwrap();
        let mut context = CommandContext::new(&device).unwrap();

        let image = solid(8, 8, 4, [1, 2, 3, 4]);
        let texture = device.create_texture_2d(&image.metadata).unwrap();
        let staging = upload_texture(&device, &mut context, &texture, &image).unwrap();

        assert_eq!(staging.ready_at(), context.pending_value());
        assert!(staging.resource().size_bytes() >= 8 * 8 * 4);
        assert_eq!(texture.state(), ResourceState::GenericRead);
        context.retire(staging);
    }

    #[test]
    fn mismatched_images_are_rejected() {
        let device = Device::new(&GraphicsConfig::default()).unwrap();
        let mut context = CommandContext::new(&device).unwrap();

        let texture = device
            .create_texture_2d(&ImageMetadata::new_2d(8, 8, 1, Format::Rgba8UnormSrgb))
            .unwrap();

        let wrong_size = solid(4, 4, 1, [0; 4]);
        assert!(matches!(
            upload_texture(&device, &mut context, &texture, &wrong_size),
            Err(Error::LayoutMismatch(_))
        ));

        let mut truncated = solid(8, 8, 1, [0; 4]);
        truncated.subresources[0].data.truncate(10);
        assert!(matches!(
            upload_texture(&device, &mut context, &texture, &truncated),
            Err(Error::LayoutMismatch(_))
        ));

        assert_eq!(texture.state(), ResourceState::CopyDest);
    }

    #[test]
    fn buffers_upload_without_staging() {
        let device = Device::new(&GraphicsConfig::default()).unwrap();
        let vertices = [[1.0f32, 2.0, 3.0, 1.0], [4.0, 5.0, 6.0, 1.0]];

        let mut buffer = upload_buffer(&device, &vertices).unwrap();

        assert_eq!(buffer.size_bytes(), 32);
        assert_eq!(
            bytemuck::cast_slice::<u8, [f32; 4]>(buffer.map().unwrap()),
            &vertices
        );
    }
}
