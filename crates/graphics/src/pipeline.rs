use crate::{
    error::{Error, Result},
    format::Format,
    platform::RawPipeline,
    Device,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

/// One entry of a root signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootParameter {
    /// A root constant buffer view at `b{register}`.
    ConstantBuffer { register: u32, stage: ShaderStage },
    /// A descriptor table holding one shader resource view at `t{register}`.
    ShaderResourceTable { register: u32, stage: ShaderStage },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputElement {
    /// Nul-terminated HLSL semantic name.
    pub semantic: &'static [u8],
    pub format: Format,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    Opaque,
    /// `src * src_alpha + dst` for color; alpha is written through.
    Additive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullMode {
    None,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
}

pub struct PipelineDesc<'a> {
    pub root_parameters: &'a [RootParameter],
    pub input_layout: &'a [InputElement],
    pub vertex_shader: &'a [u8],
    pub pixel_shader: &'a [u8],
    pub blend: BlendMode,
    pub cull: CullMode,
    pub depth: DepthState,
    pub render_target_format: Format,
    pub depth_format: Option<Format>,
}

/// A root signature and the pipeline state built against it.
pub struct Pipeline {
    raw: RawPipeline,
    root_parameters: u32,
}

impl Pipeline {
    pub const MATERIAL: u32 = 0;
    pub const TRANSFORM: u32 = 1;
    pub const TEXTURE: u32 = 2;
    pub const LIGHT: u32 = 3;
    pub const INSTANCES: u32 = 4;

    const ROOT_PARAMETERS: [RootParameter; 5] = [
        RootParameter::ConstantBuffer {
            register: 0,
            stage: ShaderStage::Pixel,
        },
        RootParameter::ConstantBuffer {
            register: 0,
            stage: ShaderStage::Vertex,
        },
        RootParameter::ShaderResourceTable {
            register: 0,
            stage: ShaderStage::Pixel,
        },
        RootParameter::ConstantBuffer {
            register: 1,
            stage: ShaderStage::Pixel,
        },
        RootParameter::ShaderResourceTable {
            register: 0,
            stage: ShaderStage::Vertex,
        },
    ];

    const INPUT_LAYOUT: [InputElement; 3] = [
        InputElement {
            semantic: b"POSITION\0",
            format: Format::Rgba32Float,
        },
        InputElement {
            semantic: b"TEXCOORD\0",
            format: Format::Rg32Float,
        },
        InputElement {
            semantic: b"NORMAL\0",
            format: Format::Rgb32Float,
        },
    ];

    const VERTEX_SHADER: &'static [u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/particle_vs.cso"));
    const PIXEL_SHADER: &'static [u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/particle_ps.cso"));

    pub fn new(device: &Device, desc: &PipelineDesc) -> Result<Self> {
        for element in desc.input_layout {
            assert_eq!(
                element.semantic.last(),
                Some(&0),
                "semantic names must be nul-terminated"
            );
        }

        let raw = device.raw.create_pipeline(desc)?;
        Ok(Self {
            raw,
            root_parameters: desc.root_parameters.len() as u32,
        })
    }

    /// The pipeline used for every draw: material, transform and light
    /// constants, one texture, and the instance buffer read by the vertex
    /// shader. Particles blend additively against a depth buffer they test
    /// but never write.
    pub fn instanced(device: &Device) -> Result<Self> {
        // Only the D3D12 device executes shaders; the build leaves the
        // artifacts empty elsewhere.
        if cfg!(target_os = "windows")
            && (Self::VERTEX_SHADER.is_empty() || Self::PIXEL_SHADER.is_empty())
        {
            return Err(Error::MissingShader("particle.hlsl"));
        }

        let pipeline = Self::new(
            device,
            &PipelineDesc {
                root_parameters: &Self::ROOT_PARAMETERS,
                input_layout: &Self::INPUT_LAYOUT,
                vertex_shader: Self::VERTEX_SHADER,
                pixel_shader: Self::PIXEL_SHADER,
                blend: BlendMode::Additive,
                cull: CullMode::None,
                depth: DepthState {
                    test: true,
                    write: false,
                },
                render_target_format: Format::Rgba8UnormSrgb,
                depth_format: Some(Format::D24UnormS8Uint),
            },
        )?;

        log::debug!("created instanced pipeline");
        Ok(pipeline)
    }

    #[must_use]
    pub fn root_parameter_count(&self) -> u32 {
        self.root_parameters
    }

    pub(crate) fn raw(&self) -> &RawPipeline {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphicsConfig;

    #[test]
    fn instanced_pipeline_has_five_root_parameters() {
        let device = Device::new(&GraphicsConfig::default()).unwrap();
        let pipeline = Pipeline::instanced(&device).unwrap();

        assert_eq!(pipeline.root_parameter_count(), 5);
        assert!(Pipeline::INSTANCES < pipeline.root_parameter_count());
    }
}
