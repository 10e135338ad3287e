//! A CPU reference device.
//!
//! Resources are plain host allocations and descriptor handles are addresses
//! in a synthetic address space with fixed per-kind strides. Command lists
//! record into a `Vec` and execute on a dedicated timeline thread, so
//! submission is asynchronous exactly like a hardware queue and a fence wait
//! is a real wait. The timeline validates what the debug layer would:
//! barriers must name the state a resource is actually in, copies must target
//! copy destinations and clears and draws must target render targets.

use std::{
    collections::HashMap,
    ptr::NonNull,
    sync::{
        atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam::channel::Sender;
use geometry::{Extent, Px, Rect};
use parking_lot::{Condvar, Mutex};
use raw_window_handle::RawWindowHandle;

use crate::{
    descriptor::{CpuDescriptor, DescriptorKind, GpuDescriptor, ViewDesc},
    error::{Error, Result},
    format::{copyable_footprints, next_multiple_of, Footprints, Format, SubresourceLayout},
    pipeline::PipelineDesc,
    resource::{Dimension, HeapKind, ResourceDesc, ResourceState},
    PowerPreference,
};

mod timeline;

use timeline::{Command, Job};

const ADDRESS_ALIGNMENT: u64 = 0x1_0000;

/// Host alignment of resource memory, enough for any constant buffer view.
const MEMORY_ALIGNMENT: usize = 256;

const RTV_STRIDE: u64 = 32;
const DSV_STRIDE: u64 = 8;
const SRV_STRIDE: u64 = 32;

/// Counters kept by the timeline, for tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    pub submissions: u64,
    pub draw_calls: u64,
    pub instances: u64,
}

pub(super) struct Shared {
    next_address: AtomicU64,
    views: Mutex<HashMap<usize, View>>,
    removed: Mutex<Option<String>>,
    statistics: Mutex<Statistics>,
}

impl Shared {
    fn reserve(&self, bytes: u64) -> u64 {
        let size = next_multiple_of(bytes.max(1), ADDRESS_ALIGNMENT);
        self.next_address.fetch_add(size, Ordering::Relaxed)
    }

    fn view(&self, descriptor: CpuDescriptor) -> View {
        self.views
            .lock()
            .get(&descriptor.0)
            .cloned()
            .unwrap_or_else(|| panic!("descriptor {descriptor:?} was never written"))
    }

    pub(super) fn remove(&self, reason: String) {
        let mut removed = self.removed.lock();
        if removed.is_none() {
            log::error!("headless device removed: {reason}");
            *removed = Some(reason);
        }
    }

    pub(super) fn is_removed(&self) -> bool {
        self.removed.lock().is_some()
    }

    fn check(&self) -> Result<()> {
        match &*self.removed.lock() {
            Some(reason) => Err(Error::DeviceRemoved(reason.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
pub(super) struct View {
    resource: RawResource,
    desc: ViewDesc,
}

pub struct Device {
    shared: Arc<Shared>,
}

impl Device {
    pub fn new(power_preference: PowerPreference, debug: bool) -> Result<Self> {
        log::debug!(
            "creating headless device (power preference {power_preference:?}, debug {debug})"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                next_address: AtomicU64::new(ADDRESS_ALIGNMENT),
                views: Mutex::new(HashMap::new()),
                removed: Mutex::new(None),
                statistics: Mutex::new(Statistics::default()),
            }),
        })
    }

    pub fn adapter_name(&self) -> String {
        "Headless Reference Device".to_owned()
    }

    pub fn descriptor_stride(&self, kind: DescriptorKind) -> u64 {
        match kind {
            DescriptorKind::RenderTarget => RTV_STRIDE,
            DescriptorKind::DepthStencil => DSV_STRIDE,
            DescriptorKind::ShaderResource => SRV_STRIDE,
        }
    }

    pub fn copyable_footprints(&self, desc: &ResourceDesc) -> Footprints {
        copyable_footprints(desc)
    }

    pub fn create_resource(
        &self,
        desc: &ResourceDesc,
        heap: HeapKind,
        state: ResourceState,
    ) -> Result<RawResource> {
        if heap == HeapKind::Upload && desc.dimension != Dimension::Buffer {
            return Err(Error::InvalidCall("upload heaps only hold buffers"));
        }

        let len = copyable_footprints(desc).total_size.max(1);
        let address = self.shared.reserve(len);
        let memory = Memory::new(*desc, heap, state, address, len as usize)?;
        Ok(RawResource(Arc::new(memory)))
    }

    pub fn create_descriptor_heap(
        &self,
        kind: DescriptorKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<RawDescriptorHeap> {
        let size = u64::from(capacity) * self.descriptor_stride(kind);
        let cpu_start = self.shared.reserve(size);
        let gpu_start = shader_visible.then(|| self.shared.reserve(size));

        Ok(RawDescriptorHeap {
            cpu_start: cpu_start as usize,
            gpu_start,
        })
    }

    pub fn write_view(&self, resource: &RawResource, view: &ViewDesc, dst: CpuDescriptor) {
        let desc = &resource.0.desc;
        match view {
            ViewDesc::RenderTarget { .. } | ViewDesc::DepthStencil { .. } => {
                assert_eq!(desc.dimension, Dimension::Texture2D);
            }
            ViewDesc::Texture2D { mip_levels, .. } => {
                assert_eq!(desc.dimension, Dimension::Texture2D);
                assert!(*mip_levels <= desc.mip_levels);
            }
            ViewDesc::StructuredBuffer { count, stride } => {
                assert_eq!(desc.dimension, Dimension::Buffer);
                assert!(u64::from(*count) * u64::from(*stride) <= desc.width);
            }
        }

        self.shared.views.lock().insert(
            dst.0,
            View {
                resource: resource.clone(),
                desc: *view,
            },
        );
    }

    pub fn create_queue(&self) -> Result<RawQueue> {
        let (jobs, receiver) = crossbeam::channel::unbounded();
        let shared = self.shared.clone();

        // The thread exits once every sender (queue and swapchains) is gone.
        std::thread::Builder::new()
            .name("headless-timeline".to_owned())
            .spawn(move || timeline::run(&receiver, &shared))
            .map_err(|e| Error::DeviceRemoved(format!("timeline thread failed to start: {e}")))?;

        Ok(RawQueue { jobs })
    }

    pub fn create_command_allocator(&self) -> Result<RawCommandAllocator> {
        Ok(RawCommandAllocator {
            executing: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn create_command_list(&self, allocator: &RawCommandAllocator) -> Result<RawCommandList> {
        Ok(RawCommandList {
            shared: self.shared.clone(),
            executing: allocator.executing.clone(),
            commands: Vec::new(),
            open: true,
            render_target: None,
            depth_target: None,
        })
    }

    pub fn create_fence(&self, initial: u64) -> Result<RawFence> {
        Ok(RawFence(Arc::new(FenceState {
            value: Mutex::new(initial),
            reached: Condvar::new(),
            shared: self.shared.clone(),
        })))
    }

    pub fn create_swapchain(
        &self,
        queue: &RawQueue,
        _window: Option<RawWindowHandle>,
        extent: Extent<u32, Px>,
        format: Format,
        buffer_count: u32,
    ) -> Result<RawSwapchain> {
        let desc = ResourceDesc::texture_2d(extent.width, extent.height, 1, 1, format);
        let buffers = (0..buffer_count)
            .map(|_| self.create_resource(&desc, HeapKind::Default, ResourceState::Present))
            .collect::<Result<Vec<_>>>()?;

        Ok(RawSwapchain {
            buffers,
            index: AtomicU32::new(0),
            jobs: queue.jobs.clone(),
        })
    }

    pub fn create_pipeline(&self, desc: &PipelineDesc) -> Result<RawPipeline> {
        if desc.root_parameters.is_empty() || desc.render_target_format.is_depth() {
            return Err(Error::InvalidCall("malformed pipeline description"));
        }

        Ok(RawPipeline {
            root_parameters: desc.root_parameters.len(),
        })
    }

    pub fn statistics(&self) -> Statistics {
        *self.shared.statistics.lock()
    }
}

pub(super) struct Memory {
    desc: ResourceDesc,
    heap: HeapKind,
    address: u64,
    state: Mutex<ResourceState>,
    bytes: NonNull<u8>,
    len: usize,
}

// The bytes are only touched through raw copies, and the fence orders CPU
// access against the timeline.
unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}

impl Memory {
    fn new(
        desc: ResourceDesc,
        heap: HeapKind,
        state: ResourceState,
        address: u64,
        len: usize,
    ) -> Result<Self> {
        let layout = Self::layout(len)?;
        let bytes = NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
            .ok_or_else(|| Error::DeviceRemoved(format!("out of memory allocating {len} bytes")))?;

        Ok(Self {
            desc,
            heap,
            address,
            state: Mutex::new(state),
            bytes,
            len,
        })
    }

    fn layout(len: usize) -> Result<std::alloc::Layout> {
        std::alloc::Layout::from_size_align(len, MEMORY_ALIGNMENT)
            .map_err(|_| Error::InvalidCall("resource size overflows the address space"))
    }

    fn write(&self, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= self.len, "write past the end of a resource");
        unsafe {
            std::ptr::copy(src.as_ptr(), self.bytes.as_ptr().add(offset), src.len());
        }
    }

    fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(offset + len <= self.len, "read past the end of a resource");
        let mut out = vec![0; len];
        unsafe {
            std::ptr::copy(self.bytes.as_ptr().add(offset), out.as_mut_ptr(), len);
        }
        out
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        if let Ok(layout) = Self::layout(self.len) {
            unsafe { std::alloc::dealloc(self.bytes.as_ptr(), layout) };
        }
    }
}

#[derive(Clone)]
pub struct RawResource(Arc<Memory>);

impl RawResource {
    pub fn map(&self) -> Result<*mut u8> {
        if self.0.heap == HeapKind::Upload {
            Ok(self.0.bytes.as_ptr())
        } else {
            Err(Error::NotMappable)
        }
    }

    pub fn gpu_address(&self) -> u64 {
        self.0.address
    }

    /// The state the timeline has actually observed, as opposed to the state
    /// tracked while recording.
    pub fn gpu_state(&self) -> ResourceState {
        *self.0.state.lock()
    }

    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        self.0.read(offset, len)
    }
}

pub struct RawDescriptorHeap {
    cpu_start: usize,
    gpu_start: Option<u64>,
}

impl RawDescriptorHeap {
    pub fn cpu_start(&self) -> usize {
        self.cpu_start
    }

    pub fn gpu_start(&self) -> Option<u64> {
        self.gpu_start
    }
}

pub struct RawQueue {
    jobs: Sender<Job>,
}

impl RawQueue {
    pub fn execute(&self, list: &RawCommandList) -> Result<()> {
        if list.open {
            return Err(Error::InvalidCall("executed a command list that was not closed"));
        }

        list.executing.fetch_add(1, Ordering::AcqRel);
        self.send(Job::Execute {
            commands: list.commands.clone(),
            executing: list.executing.clone(),
        })
    }

    pub fn signal(&self, fence: &RawFence, value: u64) -> Result<()> {
        self.send(Job::Signal {
            fence: fence.0.clone(),
            value,
        })
    }

    fn send(&self, job: Job) -> Result<()> {
        self.jobs
            .send(job)
            .map_err(|_| Error::DeviceRemoved("the timeline thread has exited".to_owned()))
    }
}

pub struct RawCommandAllocator {
    executing: Arc<AtomicUsize>,
}

impl RawCommandAllocator {
    pub fn reset(&self) -> Result<()> {
        if self.executing.load(Ordering::Acquire) > 0 {
            Err(Error::InvalidCall(
                "command allocator reset while its commands are executing",
            ))
        } else {
            Ok(())
        }
    }
}

pub struct RawCommandList {
    shared: Arc<Shared>,
    executing: Arc<AtomicUsize>,
    commands: Vec<Command>,
    open: bool,
    render_target: Option<RawResource>,
    depth_target: Option<RawResource>,
}

impl RawCommandList {
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Err(Error::InvalidCall("closed a command list twice"));
        }
        self.open = false;
        Ok(())
    }

    pub fn reset(&mut self, allocator: &RawCommandAllocator) -> Result<()> {
        if self.open {
            return Err(Error::InvalidCall("reset a command list that is still open"));
        }

        self.commands.clear();
        self.executing = allocator.executing.clone();
        self.render_target = None;
        self.depth_target = None;
        self.open = true;
        Ok(())
    }

    pub fn transition(&mut self, resource: &RawResource, before: ResourceState, after: ResourceState) {
        self.record(Command::Barrier {
            resource: resource.clone(),
            before,
            after,
        });
    }

    pub fn copy_to_subresource(
        &mut self,
        dst: &RawResource,
        subresource: u32,
        src: &RawResource,
        footprint: &SubresourceLayout,
    ) {
        let dst_layout = copyable_footprints(&dst.0.desc).layouts[subresource as usize];
        self.record(Command::CopyToSubresource {
            dst: dst.clone(),
            dst_layout,
            src: src.clone(),
            src_layout: *footprint,
        });
    }

    pub fn set_render_target(&mut self, rtv: CpuDescriptor, dsv: Option<CpuDescriptor>) {
        self.render_target = Some(self.shared.view(rtv).resource);
        self.depth_target = dsv.map(|dsv| self.shared.view(dsv).resource);
    }

    pub fn clear_render_target(&mut self, rtv: CpuDescriptor, color: [f32; 4]) {
        let view = self.shared.view(rtv);
        let ViewDesc::RenderTarget { format } = view.desc else {
            panic!("{rtv:?} is not a render target view");
        };

        self.record(Command::ClearColor {
            target: view.resource,
            format,
            color,
        });
    }

    pub fn clear_depth(&mut self, dsv: CpuDescriptor, depth: f32) {
        let view = self.shared.view(dsv);
        assert!(
            matches!(view.desc, ViewDesc::DepthStencil { .. }),
            "{dsv:?} is not a depth stencil view"
        );

        self.record(Command::ClearDepth {
            target: view.resource,
            depth,
        });
    }

    pub fn set_descriptor_heap(&mut self, heap: &RawDescriptorHeap) {
        assert!(
            heap.gpu_start.is_some(),
            "only shader-visible heaps can be bound"
        );
    }

    pub fn set_viewport(&mut self, _rect: Rect<u32, Px>) {}

    pub fn set_scissor(&mut self, _rect: Rect<u32, Px>) {}

    pub fn set_pipeline(&mut self, pipeline: &RawPipeline) {
        debug_assert!(pipeline.root_parameters > 0);
    }

    pub fn set_vertex_buffer(&mut self, resource: &RawResource, _stride: u32, size: u32) {
        assert!(u64::from(size) <= resource.0.desc.width);
    }

    pub fn set_index_buffer(&mut self, resource: &RawResource, size: u32) {
        assert!(u64::from(size) <= resource.0.desc.width);
    }

    pub fn set_root_constant_buffer(&mut self, _index: u32, address: u64) {
        assert_ne!(address, 0, "null constant buffer address");
    }

    pub fn set_root_descriptor_table(&mut self, _index: u32, _table: GpuDescriptor) {}

    pub fn draw_instanced(&mut self, vertex_count: u32, instance_count: u32) {
        self.draw(vertex_count, instance_count);
    }

    pub fn draw_indexed_instanced(&mut self, index_count: u32, instance_count: u32) {
        self.draw(index_count, instance_count);
    }

    fn draw(&mut self, elements: u32, instances: u32) {
        let target = self
            .render_target
            .clone()
            .unwrap_or_else(|| panic!("draw recorded without a render target"));

        self.record(Command::Draw {
            target,
            depth: self.depth_target.clone(),
            elements,
            instances,
        });
    }

    fn record(&mut self, command: Command) {
        assert!(self.open, "recorded into a closed command list");
        self.commands.push(command);
    }
}

pub(super) struct FenceState {
    value: Mutex<u64>,
    reached: Condvar,
    shared: Arc<Shared>,
}

impl FenceState {
    pub(super) fn signal(&self, value: u64) {
        let mut current = self.value.lock();
        *current = (*current).max(value);
        self.reached.notify_all();
    }
}

pub struct RawFence(Arc<FenceState>);

impl RawFence {
    pub fn completed_value(&self) -> u64 {
        *self.0.value.lock()
    }

    /// Blocks until the timeline has passed `value`. There is no timeout.
    pub fn wait(&self, value: u64) -> Result<()> {
        let mut current = self.0.value.lock();
        while *current < value {
            self.0.reached.wait(&mut current);
        }
        drop(current);

        self.0.shared.check()
    }
}

pub struct RawSwapchain {
    buffers: Vec<RawResource>,
    index: AtomicU32,
    jobs: Sender<Job>,
}

impl RawSwapchain {
    pub fn current_index(&self) -> u32 {
        self.index.load(Ordering::Acquire)
    }

    pub fn buffer(&self, index: u32) -> Result<RawResource> {
        self.buffers
            .get(index as usize)
            .cloned()
            .ok_or(Error::InvalidCall("swapchain buffer index out of range"))
    }

    /// Queues the current buffer for presentation and flips to the next one.
    pub fn present(&self, sync_interval: u32) -> Result<()> {
        let index = self.current_index();
        log::trace!("present buffer {index} (interval {sync_interval})");

        self.jobs
            .send(Job::Present {
                buffer: self.buffers[index as usize].clone(),
            })
            .map_err(|_| Error::DeviceRemoved("the timeline thread has exited".to_owned()))?;

        self.index
            .store((index + 1) % self.buffers.len() as u32, Ordering::Release);
        Ok(())
    }
}

pub struct RawPipeline {
    root_parameters: usize,
}
