use geometry::{Extent, Px, Rect};

use crate::{
    command::CommandList,
    descriptor::{CpuDescriptor, DescriptorHeap, DescriptorKind, GpuDescriptor},
    error::Result,
    pipeline::Pipeline,
    resource::{GpuResource, ResourceState, DEPTH_CLEAR_VALUE},
    submission::{CommandContext, FenceValue},
    surface::Swapchain,
    Device,
};

pub const CLEAR_COLOR: [f32; 4] = [0.1, 0.25, 0.5, 1.0];

/// Where a frame is in its cycle. Frames always walk the stages in
/// declaration order and wrap back to `Idle`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameStage {
    #[default]
    Idle,
    Acquire,
    BarrierIn,
    Record,
    BarrierOut,
    Submit,
    Present,
    Sync,
}

impl FrameStage {
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            FrameStage::Idle => FrameStage::Acquire,
            FrameStage::Acquire => FrameStage::BarrierIn,
            FrameStage::BarrierIn => FrameStage::Record,
            FrameStage::Record => FrameStage::BarrierOut,
            FrameStage::BarrierOut => FrameStage::Submit,
            FrameStage::Submit => FrameStage::Present,
            FrameStage::Present => FrameStage::Sync,
            FrameStage::Sync => FrameStage::Idle,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceCount {
    /// Repeat the mesh a fixed number of times.
    Fixed(u32),
    /// One instance per live particle this frame.
    LiveParticles,
}

impl InstanceCount {
    fn resolve(self, live_particles: u32) -> u32 {
        match self {
            InstanceCount::Fixed(count) => count,
            InstanceCount::LiveParticles => live_particles,
        }
    }
}

/// Everything needed to issue one instanced draw with the instanced pipeline.
#[derive(Clone, Copy, Debug)]
pub struct DrawItem<'a> {
    pub vertices: &'a GpuResource,
    pub vertex_stride: u32,
    /// 32-bit indices. Draws are non-indexed without them.
    pub indices: Option<&'a GpuResource>,
    /// Vertex count, or index count for indexed draws.
    pub element_count: u32,
    pub material: &'a GpuResource,
    pub transform: &'a GpuResource,
    pub light: &'a GpuResource,
    pub texture: GpuDescriptor,
    pub instance_table: GpuDescriptor,
    pub instances: InstanceCount,
}

/// Which of two textures a draw samples. Resolved once per frame, before
/// recording starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextureSelector {
    #[default]
    Primary,
    Alternate,
}

impl TextureSelector {
    pub fn toggle(&mut self) {
        *self = match self {
            TextureSelector::Primary => TextureSelector::Alternate,
            TextureSelector::Alternate => TextureSelector::Primary,
        };
    }

    #[must_use]
    pub fn resolve(self, primary: GpuDescriptor, alternate: GpuDescriptor) -> GpuDescriptor {
        match self {
            TextureSelector::Primary => primary,
            TextureSelector::Alternate => alternate,
        }
    }
}

/// The debug overlay's hook into the frame.
///
/// `record` runs after every scene draw and before the back buffer is
/// transitioned back for presentation. The overlay owns slot
/// [`UI_RESERVED_SLOT`](crate::UI_RESERVED_SLOT) of `heap`, which is already
/// bound.
pub trait Overlay {
    fn record(&mut self, list: &mut CommandList, heap: &DescriptorHeap);
}

/// A depth buffer and the one-slot heap holding its view.
pub struct DepthTarget {
    resource: GpuResource,
    heap: DescriptorHeap,
}

impl DepthTarget {
    pub fn new(device: &Device, extent: Extent<u32, Px>) -> Result<Self> {
        let resource = device.create_depth_stencil(extent)?;
        let mut heap = DescriptorHeap::new(device, DescriptorKind::DepthStencil, 1)?;

        let slot = heap.allocate()?;
        heap.write_depth_stencil_view(device, slot, &resource);

        Ok(Self { resource, heap })
    }

    #[must_use]
    pub fn resource(&self) -> &GpuResource {
        &self.resource
    }

    #[must_use]
    pub fn dsv(&self) -> CpuDescriptor {
        self.heap.cpu_handle(0)
    }
}

/// What a frame draws into and with.
pub struct FrameInputs<'a> {
    pub swapchain: &'a Swapchain,
    pub depth: &'a DepthTarget,
    pub heap: &'a DescriptorHeap,
    pub pipeline: &'a Pipeline,
    pub draws: &'a [DrawItem<'a>],
    /// The instance count for [`InstanceCount::LiveParticles`] draws.
    pub live_particles: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub backbuffer: u32,
    pub fence: FenceValue,
    pub draw_calls: u32,
    pub instances: u32,
}

#[derive(Debug, Default)]
pub struct FrameLoop {
    stage: FrameStage,
    frames: u64,
}

impl FrameLoop {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    /// Frames completed so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Records, submits and presents one frame, then blocks until the GPU has
    /// finished it.
    ///
    /// Any error leaves the loop mid-frame; callers treat it as fatal.
    pub fn run_frame(
        &mut self,
        context: &mut CommandContext,
        inputs: &FrameInputs,
        overlay: Option<&mut dyn Overlay>,
    ) -> Result<FrameReport> {
        let swapchain = inputs.swapchain;

        self.advance(FrameStage::Acquire);
        context.begin_frame()?;
        let index = swapchain.current_index();
        let backbuffer = swapchain.backbuffer(index);

        self.advance(FrameStage::BarrierIn);
        let list = context.command_list();
        list.transition(backbuffer, ResourceState::RenderTarget);

        self.advance(FrameStage::Record);
        let rtv = swapchain.rtv(index);
        let dsv = inputs.depth.dsv();
        list.set_render_target(rtv, Some(dsv));
        list.clear_render_target(rtv, CLEAR_COLOR);
        list.clear_depth(dsv, DEPTH_CLEAR_VALUE);

        let area = Rect::from_extent(swapchain.extent());
        list.set_descriptor_heap(inputs.heap);
        list.set_viewport(area);
        list.set_scissor(area);
        list.set_pipeline(inputs.pipeline);

        for draw in inputs.draws {
            record_draw(list, draw, inputs.live_particles);
        }

        if let Some(overlay) = overlay {
            overlay.record(list, inputs.heap);
        }

        self.advance(FrameStage::BarrierOut);
        list.transition(backbuffer, ResourceState::Present);
        let (draw_calls, instances) = list.draw_statistics();

        self.advance(FrameStage::Submit);
        context.submit()?;

        self.advance(FrameStage::Present);
        context.present(swapchain)?;

        self.advance(FrameStage::Sync);
        let fence = context.signal_and_wait()?;

        self.advance(FrameStage::Idle);
        self.frames += 1;

        Ok(FrameReport {
            backbuffer: index,
            fence,
            draw_calls,
            instances,
        })
    }

    fn advance(&mut self, to: FrameStage) {
        assert_eq!(
            self.stage.next(),
            to,
            "frame stage {:?} cannot advance to {to:?}",
            self.stage
        );
        log::trace!("frame {}: {:?} -> {to:?}", self.frames, self.stage);
        self.stage = to;
    }
}

fn record_draw(list: &mut CommandList, draw: &DrawItem, live_particles: u32) {
    let instances = draw.instances.resolve(live_particles);
    if instances == 0 {
        return;
    }

    list.set_vertex_buffer(draw.vertices, draw.vertex_stride);
    list.set_constant_buffer(Pipeline::MATERIAL, draw.material);
    list.set_constant_buffer(Pipeline::TRANSFORM, draw.transform);
    list.set_descriptor_table(Pipeline::TEXTURE, draw.texture);
    list.set_constant_buffer(Pipeline::LIGHT, draw.light);
    list.set_descriptor_table(Pipeline::INSTANCES, draw.instance_table);

    match draw.indices {
        Some(indices) => {
            list.set_index_buffer(indices);
            list.draw_indexed_instanced(draw.element_count, instances);
        }
        None => list.draw_instanced(draw.element_count, instances),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_cycle_back_to_idle() {
        let mut stage = FrameStage::Idle;
        let mut seen = vec![stage];
        for _ in 0..7 {
            stage = stage.next();
            seen.push(stage);
        }

        assert_eq!(
            seen,
            [
                FrameStage::Idle,
                FrameStage::Acquire,
                FrameStage::BarrierIn,
                FrameStage::Record,
                FrameStage::BarrierOut,
                FrameStage::Submit,
                FrameStage::Present,
                FrameStage::Sync,
            ]
        );
        assert_eq!(stage.next(), FrameStage::Idle);
    }

    #[test]
    #[should_panic(expected = "cannot advance")]
    fn skipping_a_stage_panics() {
        let mut frame = FrameLoop::new();
        frame.advance(FrameStage::Record);
    }

    #[test]
    fn selector_toggles_between_textures() {
        let primary = GpuDescriptor(64);
        let alternate = GpuDescriptor(96);
        let mut selector = TextureSelector::default();

        assert_eq!(selector.resolve(primary, alternate), primary);
        selector.toggle();
        assert_eq!(selector.resolve(primary, alternate), alternate);
        selector.toggle();
        assert_eq!(selector.resolve(primary, alternate), primary);
    }

    #[test]
    fn instance_counts_resolve() {
        assert_eq!(InstanceCount::Fixed(3).resolve(7), 3);
        assert_eq!(InstanceCount::LiveParticles.resolve(7), 7);
    }
}
