use std::{io::Read, path::Path};

use graphics::{DecodedImage, Format, ImageMetadata, SubresourceData};

use crate::{Error, Result};

const BYTES_PER_PIXEL: usize = 4;

/// Loads a PNG as sRGB RGBA8 with a full mip chain.
pub fn load_png(path: &Path) -> Result<DecodedImage> {
    let image = decode_png(crate::open(path)?)?;

    log::debug!(
        "loaded {} ({}x{}, {} mips)",
        path.display(),
        image.metadata.width,
        image.metadata.height,
        image.metadata.mip_levels
    );

    Ok(image)
}

pub fn decode_png(reader: impl Read) -> Result<DecodedImage> {
    let mut decoder = png::Decoder::new(reader);
    // Expands palettes and low bit depths, strips 16-bit channels.
    decoder.set_transformations(png::Transformations::normalize_to_color8());

    let mut reader = decoder.read_info()?;
    let mut buffer = vec![0; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buffer)?;
    let pixels = &buffer[..frame.buffer_size()];

    let rgba = match frame.color_type {
        png::ColorType::Rgba => pixels.to_vec(),
        png::ColorType::Rgb => pixels
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        png::ColorType::GrayscaleAlpha => pixels
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        png::ColorType::Grayscale => pixels.iter().flat_map(|&g| [g, g, g, 255]).collect(),
        other @ png::ColorType::Indexed => {
            return Err(Error::UnsupportedImage(format!("{other:?} pixels after expansion")))
        }
    };

    Ok(generate_mips(frame.width, frame.height, rgba))
}

/// Builds the full mip chain for tightly packed sRGB RGBA8 texels, down to
/// 1x1. Each level is a 2x2 box filter of the one above it, averaged in
/// linear space.
///
/// # Panics
///
/// If `rgba` does not hold exactly `width * height` texels.
#[must_use]
pub fn generate_mips(width: u32, height: u32, rgba: Vec<u8>) -> DecodedImage {
    assert_eq!(rgba.len(), width as usize * height as usize * BYTES_PER_PIXEL);

    let mip_levels = (u32::BITS - width.max(height).max(1).leading_zeros()) as u16;
    let mut subresources = Vec::with_capacity(mip_levels as usize);

    let (mut w, mut h) = (width, height);
    subresources.push(subresource(w, rgba));

    for _ in 1..mip_levels {
        let next = downsample(&subresources[subresources.len() - 1].data, w, h);
        w = (w / 2).max(1);
        h = (h / 2).max(1);
        subresources.push(subresource(w, next));
    }

    DecodedImage {
        metadata: ImageMetadata::new_2d(width, height, mip_levels, Format::Rgba8UnormSrgb),
        subresources,
    }
}

fn subresource(width: u32, data: Vec<u8>) -> SubresourceData {
    SubresourceData {
        row_pitch: width as usize * BYTES_PER_PIXEL,
        slice_pitch: data.len(),
        data,
    }
}

fn downsample(src: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (width, height) = (width as usize, height as usize);
    let (dst_width, dst_height) = ((width / 2).max(1), (height / 2).max(1));
    let texel = |x: usize, y: usize| {
        let offset = (y.min(height - 1) * width + x.min(width - 1)) * BYTES_PER_PIXEL;
        &src[offset..offset + BYTES_PER_PIXEL]
    };

    let mut dst = Vec::with_capacity(dst_width * dst_height * BYTES_PER_PIXEL);
    for y in 0..dst_height {
        for x in 0..dst_width {
            let quad = [
                texel(2 * x, 2 * y),
                texel(2 * x + 1, 2 * y),
                texel(2 * x, 2 * y + 1),
                texel(2 * x + 1, 2 * y + 1),
            ];

            for channel in 0..3 {
                let sum: f32 = quad.iter().map(|t| to_linear(t[channel])).sum();
                dst.push(to_srgb(sum / 4.0));
            }

            let alpha: u32 = quad.iter().map(|t| u32::from(t[3])).sum();
            dst.push(((alpha + 2) / 4) as u8);
        }
    }

    dst
}

fn to_linear(value: u8) -> f32 {
    let c = f32::from(value) / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn to_srgb(linear: f32) -> u8 {
    let c = linear.clamp(0.0, 1.0);
    let c = if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    };
    (c * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(width: u32, height: u32, color: png::ColorType, pixels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut bytes, width, height);
            encoder.set_color(color);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(pixels).unwrap();
        }
        bytes
    }

    #[test]
    fn mip_chain_reaches_one_by_one() {
        let image = generate_mips(4, 2, vec![255; 4 * 2 * 4]);

        assert_eq!(image.metadata.mip_levels, 3);
        assert_eq!(image.metadata.format, Format::Rgba8UnormSrgb);

        let sizes: Vec<_> = image
            .subresources
            .iter()
            .map(|s| (s.row_pitch, s.data.len()))
            .collect();
        assert_eq!(sizes, [(16, 32), (8, 8), (4, 4)]);
    }

    #[test]
    fn uniform_texels_survive_filtering() {
        let texel = [200, 100, 50, 128];
        let image = generate_mips(8, 8, texel.repeat(64));

        for sub in &image.subresources {
            assert!(sub.data.chunks_exact(4).all(|t| t == texel));
        }
    }

    #[test]
    fn filtering_averages_in_linear_space() {
        let black_white = [0, 0, 0, 255, 255, 255, 255, 255].repeat(2);
        let image = generate_mips(2, 2, black_white);

        // Half intensity in linear light, gamma-encoded.
        assert_eq!(image.subresources[1].data, [188, 188, 188, 255]);
    }

    #[test]
    fn odd_sizes_clamp_at_the_edge() {
        let image = generate_mips(3, 1, [10, 20, 30, 255].repeat(3));
        assert_eq!(image.metadata.mip_levels, 2);
        assert_eq!(image.subresources[1].data, [10, 20, 30, 255]);
    }

    #[test]
    fn rgb_png_is_expanded_to_rgba() {
        let bytes = encode(2, 1, png::ColorType::Rgb, &[255, 0, 0, 0, 0, 255]);
        let image = decode_png(bytes.as_slice()).unwrap();

        assert_eq!((image.metadata.width, image.metadata.height), (2, 1));
        assert_eq!(image.subresources[0].data, [255, 0, 0, 255, 0, 0, 255, 255]);
        assert_eq!(image.subresources.len(), 2);
    }

    #[test]
    fn grayscale_alpha_png_is_expanded() {
        let bytes = encode(1, 1, png::ColorType::GrayscaleAlpha, &[90, 30]);
        let image = decode_png(bytes.as_slice()).unwrap();
        assert_eq!(image.subresources[0].data, [90, 90, 90, 30]);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            decode_png(&b"definitely not a png"[..]),
            Err(Error::Png(_))
        ));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = load_png(Path::new("does/not/exist.png")).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.png"));
    }
}
