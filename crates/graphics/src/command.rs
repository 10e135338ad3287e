use geometry::{Px, Rect};

use crate::{
    descriptor::{CpuDescriptor, DescriptorHeap, GpuDescriptor},
    error::Result,
    format::SubresourceLayout,
    pipeline::Pipeline,
    platform::{RawCommandAllocator, RawCommandList},
    resource::{Dimension, GpuResource, ResourceState},
};

/// The recording half of the command submission context.
///
/// Wraps the platform list with the bookkeeping the frame loop relies on:
/// resource state tracking for barriers and root-parameter bounds checks for
/// the currently bound pipeline.
pub struct CommandList {
    raw: RawCommandList,
    root_parameters: Option<u32>,
    draw_calls: u32,
    instances: u32,
}

impl CommandList {
    pub(crate) fn new(raw: RawCommandList) -> Self {
        Self {
            raw,
            root_parameters: None,
            draw_calls: 0,
            instances: 0,
        }
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.raw.close()
    }

    pub(crate) fn reset(&mut self, allocator: &RawCommandAllocator) -> Result<()> {
        self.raw.reset(allocator)?;
        self.root_parameters = None;
        self.draw_calls = 0;
        self.instances = 0;
        Ok(())
    }

    pub(crate) fn raw(&self) -> &RawCommandList {
        &self.raw
    }

    /// Draw calls and total instances recorded since the last reset.
    #[must_use]
    pub fn draw_statistics(&self) -> (u32, u32) {
        (self.draw_calls, self.instances)
    }

    /// Records a transition barrier from the resource's tracked state to
    /// `after`. Does nothing if the resource is already in `after`.
    pub fn transition(&mut self, resource: &GpuResource, after: ResourceState) {
        let before = resource.state();
        if before != after {
            self.raw.transition(resource.raw(), before, after);
            resource.set_state(after);
        }
    }

    /// Copies one subresource out of a buffer laid out as `footprint`.
    pub fn copy_to_subresource(
        &mut self,
        dst: &GpuResource,
        subresource: u32,
        src: &GpuResource,
        footprint: &SubresourceLayout,
    ) {
        assert_eq!(
            dst.state(),
            ResourceState::CopyDest,
            "copy destinations must be in the CopyDest state"
        );
        assert!(subresource < dst.desc().subresource_count());
        assert_eq!(src.desc().dimension, Dimension::Buffer);

        self.raw
            .copy_to_subresource(dst.raw(), subresource, src.raw(), footprint);
    }

    pub fn set_render_target(&mut self, rtv: CpuDescriptor, dsv: Option<CpuDescriptor>) {
        self.raw.set_render_target(rtv, dsv);
    }

    pub fn clear_render_target(&mut self, rtv: CpuDescriptor, color: [f32; 4]) {
        self.raw.clear_render_target(rtv, color);
    }

    pub fn clear_depth(&mut self, dsv: CpuDescriptor, depth: f32) {
        self.raw.clear_depth(dsv, depth);
    }

    pub fn set_descriptor_heap(&mut self, heap: &DescriptorHeap) {
        assert!(
            heap.kind().is_shader_visible(),
            "only shader-visible heaps can be bound"
        );
        self.raw.set_descriptor_heap(heap.raw());
    }

    pub fn set_viewport(&mut self, rect: Rect<u32, Px>) {
        self.raw.set_viewport(rect);
    }

    pub fn set_scissor(&mut self, rect: Rect<u32, Px>) {
        self.raw.set_scissor(rect);
    }

    /// Binds the pipeline state and its root signature.
    pub fn set_pipeline(&mut self, pipeline: &Pipeline) {
        self.raw.set_pipeline(pipeline.raw());
        self.root_parameters = Some(pipeline.root_parameter_count());
    }

    pub fn set_vertex_buffer(&mut self, buffer: &GpuResource, stride: u32) {
        assert_eq!(buffer.desc().dimension, Dimension::Buffer);
        self.raw
            .set_vertex_buffer(buffer.raw(), stride, buffer.desc().width as u32);
    }

    /// Binds a buffer of `u32` indices.
    pub fn set_index_buffer(&mut self, buffer: &GpuResource) {
        assert_eq!(buffer.desc().dimension, Dimension::Buffer);
        self.raw
            .set_index_buffer(buffer.raw(), buffer.desc().width as u32);
    }

    pub fn set_constant_buffer(&mut self, root_index: u32, buffer: &GpuResource) {
        self.check_root_index(root_index);
        assert_eq!(buffer.desc().dimension, Dimension::Buffer);
        self.raw
            .set_root_constant_buffer(root_index, buffer.gpu_address());
    }

    pub fn set_descriptor_table(&mut self, root_index: u32, table: GpuDescriptor) {
        self.check_root_index(root_index);
        self.raw.set_root_descriptor_table(root_index, table);
    }

    pub fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32) {
        assert!(self.root_parameters.is_some(), "draw without a pipeline");
        self.raw.draw_instanced(vertex_count, instance_count);
        self.count_draw(instance_count);
    }

    pub fn draw_indexed_instanced(&mut self, index_count: u32, instance_count: u32) {
        assert!(self.root_parameters.is_some(), "draw without a pipeline");
        self.raw.draw_indexed_instanced(index_count, instance_count);
        self.count_draw(instance_count);
    }

    fn count_draw(&mut self, instance_count: u32) {
        self.draw_calls += 1;
        self.instances += instance_count;
    }

    fn check_root_index(&self, root_index: u32) {
        let count = self.root_parameters.expect("no pipeline is bound");
        assert!(
            root_index < count,
            "root parameter {root_index} is out of range ({count} parameters)"
        );
    }
}
