use crate::descriptor::DescriptorKind;

/// Failures reported by the device or by resource creation.
///
/// Misuse of the API (out-of-range descriptor slots, writes to the reserved
/// UI slot, out-of-order frame stages) panics instead; those are programming
/// errors rather than runtime conditions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[cfg(target_os = "windows")]
    #[error("D3D12 call failed: {0}")]
    Platform(#[from] windows::core::Error),

    #[error("no hardware or software adapter is available")]
    NoAdapter,

    #[error("the device was removed: {0}")]
    DeviceRemoved(String),

    #[error("descriptor heap ({kind:?}) is full: all {capacity} slots are in use")]
    DescriptorHeapFull { kind: DescriptorKind, capacity: u32 },

    #[error("only upload-heap resources can be mapped")]
    NotMappable,

    #[error("image does not match the destination texture: {0}")]
    LayoutMismatch(String),

    #[error("unsupported window handle")]
    UnsupportedWindow,

    #[error("shader bytecode for {0} is missing")]
    MissingShader(&'static str),

    #[error("the particle pool is empty")]
    EmptyParticlePool,

    #[error("invalid command list operation: {0}")]
    InvalidCall(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
