use crate::{
    descriptor::DescriptorKind,
    error::Result,
    format::Footprints,
    platform,
    resource::ResourceDesc,
    GraphicsConfig,
};

/// The explicit device context. Every component that creates or describes
/// GPU objects borrows it; nothing holds it globally.
pub struct Device {
    pub(crate) raw: platform::Device,
    adapter: String,
    is_debug: bool,
}

impl Device {
    pub fn new(config: &GraphicsConfig) -> Result<Self> {
        let is_debug = config.debug_enabled();
        let raw = platform::Device::new(config.power_preference, is_debug)?;
        let adapter = raw.adapter_name();

        log::info!(
            "graphics device ready on {adapter} (debug layer {})",
            if is_debug { "on" } else { "off" }
        );

        Ok(Self {
            raw,
            adapter,
            is_debug,
        })
    }

    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter
    }

    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.is_debug
    }

    /// The device-reported distance in bytes between two slots of a `kind`
    /// heap.
    #[must_use]
    pub fn descriptor_stride(&self, kind: DescriptorKind) -> u64 {
        self.raw.descriptor_stride(kind)
    }

    /// The linear layout of each subresource of `desc` inside a copy buffer.
    #[must_use]
    pub fn copyable_footprints(&self, desc: &ResourceDesc) -> Footprints {
        self.raw.copyable_footprints(desc)
    }
}
