use smallvec::SmallVec;

use crate::resource::{Dimension, ResourceDesc};

/// Row pitch alignment for buffer-to-texture copies.
pub const TEXTURE_PITCH_ALIGNMENT: u64 = 256;

/// Offset alignment of each subresource inside a copy buffer.
pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Unknown,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    D24UnormS8Uint,
    Rg32Float,
    Rgb32Float,
    Rgba32Float,
}

impl Format {
    #[must_use]
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::Unknown => 1,
            Format::Rgba8Unorm | Format::Rgba8UnormSrgb | Format::D24UnormS8Uint => 4,
            Format::Rg32Float => 8,
            Format::Rgb32Float => 12,
            Format::Rgba32Float => 16,
        }
    }

    #[must_use]
    pub fn is_depth(self) -> bool {
        self == Format::D24UnormS8Uint
    }

    #[must_use]
    pub fn is_srgb(self) -> bool {
        self == Format::Rgba8UnormSrgb
    }
}

/// Where one subresource lives inside a linear copy buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceLayout {
    pub offset: u64,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub row_pitch: u32,
    pub rows: u32,
    pub row_size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Footprints {
    pub layouts: SmallVec<[SubresourceLayout; 16]>,
    pub total_size: u64,
}

/// Computes the linear layout used to copy `desc` through a buffer, in
/// subresource order (mip-major within each array slice).
#[must_use]
pub fn copyable_footprints(desc: &ResourceDesc) -> Footprints {
    if desc.dimension == Dimension::Buffer {
        let layout = SubresourceLayout {
            offset: 0,
            format: Format::Unknown,
            width: desc.width as u32,
            height: 1,
            row_pitch: desc.width as u32,
            rows: 1,
            row_size: desc.width,
        };

        return Footprints {
            layouts: smallvec::smallvec![layout],
            total_size: desc.width,
        };
    }

    let bytes_per_pixel = u64::from(desc.format.bytes_per_pixel());
    let mut layouts = SmallVec::new();
    let mut offset = 0;
    let mut total_size = 0;

    for _ in 0..desc.array_size {
        for mip in 0..desc.mip_levels {
            let width = mip_extent(desc.width as u32, mip);
            let height = mip_extent(desc.height, mip);

            let row_size = u64::from(width) * bytes_per_pixel;
            let row_pitch = next_multiple_of(row_size, TEXTURE_PITCH_ALIGNMENT);

            offset = next_multiple_of(offset, TEXTURE_PLACEMENT_ALIGNMENT);
            layouts.push(SubresourceLayout {
                offset,
                format: desc.format,
                width,
                height,
                row_pitch: row_pitch as u32,
                rows: height,
                row_size,
            });

            total_size = offset + row_pitch * u64::from(height - 1) + row_size;
            offset += row_pitch * u64::from(height);
        }
    }

    Footprints {
        layouts,
        total_size,
    }
}

#[must_use]
pub fn mip_extent(base: u32, level: u16) -> u32 {
    (base >> level).max(1)
}

pub(crate) fn next_multiple_of(value: u64, multiple: u64) -> u64 {
    let remainder = value % multiple;
    if remainder == 0 {
        value
    } else {
        value + multiple - remainder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_footprint_is_exact() {
        let footprints = copyable_footprints(&ResourceDesc::buffer(1000));
        assert_eq!(footprints.layouts.len(), 1);
        assert_eq!(footprints.total_size, 1000);
    }

    #[test]
    fn texture_rows_and_subresources_are_aligned() {
        let desc = ResourceDesc::texture_2d(3, 3, 2, 1, Format::Rgba8UnormSrgb);
        let footprints = copyable_footprints(&desc);

        let [base, mip] = [footprints.layouts[0], footprints.layouts[1]];
        assert_eq!(base.offset, 0);
        assert_eq!(base.row_pitch, 256);
        assert_eq!(base.row_size, 12);
        assert_eq!(base.rows, 3);

        // 256 * 2 + 12 = 524 bytes, rounded up to the next 512 boundary.
        assert_eq!(mip.offset, 1024);
        assert_eq!((mip.width, mip.height), (1, 1));
        assert_eq!(footprints.total_size, 1028);
    }

    #[test]
    fn array_slices_follow_full_mip_chains() {
        let desc = ResourceDesc::texture_2d(64, 64, 3, 2, Format::Rgba8Unorm);
        let footprints = copyable_footprints(&desc);

        assert_eq!(footprints.layouts.len(), 6);
        assert_eq!(footprints.layouts[3].width, 64);
        assert_eq!(footprints.layouts[5].width, 16);
        assert!(footprints
            .layouts
            .iter()
            .all(|l| l.offset % TEXTURE_PLACEMENT_ALIGNMENT == 0));
    }

    #[test]
    fn next_multiple() {
        assert_eq!(next_multiple_of(0, 256), 0);
        assert_eq!(next_multiple_of(1, 256), 256);
        assert_eq!(next_multiple_of(256, 256), 256);
        assert_eq!(next_multiple_of(257, 256), 512);
    }
}
