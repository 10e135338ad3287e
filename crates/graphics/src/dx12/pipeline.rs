use std::mem::ManuallyDrop;

use windows::{
    core::PCSTR,
    Win32::Graphics::{
        Direct3D::ID3DBlob,
        Direct3D12::*,
        Dxgi::Common::{DXGI_FORMAT_UNKNOWN, DXGI_SAMPLE_DESC},
    },
};

use crate::{
    error::Result,
    pipeline::{BlendMode, CullMode, PipelineDesc, RootParameter, ShaderStage},
};

use super::dxgi_format;

pub struct RawPipeline {
    pub(super) root_signature: ID3D12RootSignature,
    pub(super) pipeline_state: ID3D12PipelineState,
}

impl RawPipeline {
    pub(super) fn new(device: &ID3D12Device, desc: &PipelineDesc) -> Result<Self> {
        let root_signature = create_root_signature(device, desc.root_parameters)?;

        let input_elements = desc
            .input_layout
            .iter()
            .map(|element| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(element.semantic.as_ptr()),
                SemanticIndex: 0,
                Format: dxgi_format(element.format),
                InputSlot: 0,
                AlignedByteOffset: D3D12_APPEND_ALIGNED_ELEMENT,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            })
            .collect::<Vec<_>>();

        let mut blend_targets = [D3D12_RENDER_TARGET_BLEND_DESC::default(); 8];
        blend_targets[0] = match desc.blend {
            BlendMode::Opaque => D3D12_RENDER_TARGET_BLEND_DESC {
                BlendEnable: false.into(),
                LogicOpEnable: false.into(),
                SrcBlend: D3D12_BLEND_ONE,
                DestBlend: D3D12_BLEND_ZERO,
                BlendOp: D3D12_BLEND_OP_ADD,
                SrcBlendAlpha: D3D12_BLEND_ONE,
                DestBlendAlpha: D3D12_BLEND_ZERO,
                BlendOpAlpha: D3D12_BLEND_OP_ADD,
                LogicOp: D3D12_LOGIC_OP_NOOP,
                RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
            },
            BlendMode::Additive => D3D12_RENDER_TARGET_BLEND_DESC {
                BlendEnable: true.into(),
                LogicOpEnable: false.into(),
                SrcBlend: D3D12_BLEND_SRC_ALPHA,
                DestBlend: D3D12_BLEND_ONE,
                BlendOp: D3D12_BLEND_OP_ADD,
                SrcBlendAlpha: D3D12_BLEND_ONE,
                DestBlendAlpha: D3D12_BLEND_ZERO,
                BlendOpAlpha: D3D12_BLEND_OP_ADD,
                LogicOp: D3D12_LOGIC_OP_NOOP,
                RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
            },
        };

        let mut render_target_formats = [DXGI_FORMAT_UNKNOWN; 8];
        render_target_formats[0] = dxgi_format(desc.render_target_format);

        let stencil_op = D3D12_DEPTH_STENCILOP_DESC {
            StencilFailOp: D3D12_STENCIL_OP_KEEP,
            StencilDepthFailOp: D3D12_STENCIL_OP_KEEP,
            StencilPassOp: D3D12_STENCIL_OP_KEEP,
            StencilFunc: D3D12_COMPARISON_FUNC_ALWAYS,
        };

        let pipeline_info = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: ManuallyDrop::new(Some(unsafe {
                std::mem::transmute_copy(&root_signature)
            })),
            VS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: desc.vertex_shader.as_ptr().cast(),
                BytecodeLength: desc.vertex_shader.len(),
            },
            PS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: desc.pixel_shader.as_ptr().cast(),
                BytecodeLength: desc.pixel_shader.len(),
            },
            BlendState: D3D12_BLEND_DESC {
                AlphaToCoverageEnable: false.into(),
                IndependentBlendEnable: false.into(),
                RenderTarget: blend_targets,
            },
            SampleMask: u32::MAX,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: D3D12_FILL_MODE_SOLID,
                CullMode: match desc.cull {
                    CullMode::None => D3D12_CULL_MODE_NONE,
                    CullMode::Back => D3D12_CULL_MODE_BACK,
                },
                FrontCounterClockwise: false.into(),
                DepthBias: 0,
                DepthBiasClamp: 0.0,
                SlopeScaledDepthBias: 0.0,
                DepthClipEnable: true.into(),
                MultisampleEnable: false.into(),
                AntialiasedLineEnable: false.into(),
                ForcedSampleCount: 0,
                ConservativeRaster: D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF,
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: desc.depth.test.into(),
                DepthWriteMask: if desc.depth.write {
                    D3D12_DEPTH_WRITE_MASK_ALL
                } else {
                    D3D12_DEPTH_WRITE_MASK_ZERO
                },
                DepthFunc: D3D12_COMPARISON_FUNC_LESS_EQUAL,
                StencilEnable: false.into(),
                StencilReadMask: D3D12_DEFAULT_STENCIL_READ_MASK as u8,
                StencilWriteMask: D3D12_DEFAULT_STENCIL_WRITE_MASK as u8,
                FrontFace: stencil_op,
                BackFace: stencil_op,
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: input_elements.as_ptr(),
                NumElements: input_elements.len() as _,
            },
            PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            NumRenderTargets: 1,
            RTVFormats: render_target_formats,
            DSVFormat: desc.depth_format.map_or(DXGI_FORMAT_UNKNOWN, dxgi_format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            NodeMask: 0,
            Flags: D3D12_PIPELINE_STATE_FLAG_NONE,
            ..Default::default()
        };

        let pipeline_state = unsafe { device.CreateGraphicsPipelineState(&pipeline_info) }?;

        Ok(Self {
            root_signature,
            pipeline_state,
        })
    }
}

fn create_root_signature(
    device: &ID3D12Device,
    parameters: &[RootParameter],
) -> Result<ID3D12RootSignature> {
    // Every table holds a single SRV. The ranges must outlive serialization.
    let ranges = parameters
        .iter()
        .map(|parameter| match *parameter {
            RootParameter::ShaderResourceTable { register, .. } => D3D12_DESCRIPTOR_RANGE {
                RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
                NumDescriptors: 1,
                BaseShaderRegister: register,
                RegisterSpace: 0,
                OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
            },
            RootParameter::ConstantBuffer { .. } => D3D12_DESCRIPTOR_RANGE::default(),
        })
        .collect::<Vec<_>>();

    let root_parameters = parameters
        .iter()
        .zip(&ranges)
        .map(|(parameter, range)| match *parameter {
            RootParameter::ConstantBuffer { register, stage } => D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    Descriptor: D3D12_ROOT_DESCRIPTOR {
                        ShaderRegister: register,
                        RegisterSpace: 0,
                    },
                },
                ShaderVisibility: visibility(stage),
            },
            RootParameter::ShaderResourceTable { stage, .. } => D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                        NumDescriptorRanges: 1,
                        pDescriptorRanges: range,
                    },
                },
                ShaderVisibility: visibility(stage),
            },
        })
        .collect::<Vec<_>>();

    let sampler = D3D12_STATIC_SAMPLER_DESC {
        Filter: D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        AddressU: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressV: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressW: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
        MaxLOD: D3D12_FLOAT32_MAX,
        ShaderRegister: 0,
        ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
        ..Default::default()
    };

    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: root_parameters.len() as u32,
        pParameters: root_parameters.as_ptr(),
        NumStaticSamplers: 1,
        pStaticSamplers: &sampler,
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
    };

    let mut blob: Option<ID3DBlob> = None;
    let mut error: Option<ID3DBlob> = None;
    let serialized = unsafe {
        D3D12SerializeRootSignature(
            &desc,
            D3D_ROOT_SIGNATURE_VERSION_1,
            &mut blob,
            Some(&mut error),
        )
    };

    if let Err(e) = serialized {
        if let Some(error) = error {
            log::error!("root signature rejected: {}", unsafe { blob_text(&error) });
        }
        return Err(e.into());
    }

    let blob = blob.ok_or(crate::Error::InvalidCall("root signature serialized to nothing"))?;
    let bytes = unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
    };

    Ok(unsafe { device.CreateRootSignature(0, bytes) }?)
}

fn visibility(stage: ShaderStage) -> D3D12_SHADER_VISIBILITY {
    match stage {
        ShaderStage::Vertex => D3D12_SHADER_VISIBILITY_VERTEX,
        ShaderStage::Pixel => D3D12_SHADER_VISIBILITY_PIXEL,
    }
}

unsafe fn blob_text(blob: &ID3DBlob) -> String {
    let bytes = std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
    String::from_utf8_lossy(bytes).trim_end_matches('\0').to_owned()
}
