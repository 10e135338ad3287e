//! Whole frames against the headless device.

use geometry::{Camera, Extent, Mat4};
use rand::{rngs::StdRng, SeedableRng};

use crate::*;

fn extent() -> Extent<u32, geometry::Px> {
    Extent::new(64, 32)
}

/// Two triangles, nine floats a vertex: position, texcoord, normal.
const QUAD: [[f32; 9]; 6] = [
    [-1.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, -1.0],
    [1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, -1.0],
    [-1.0, -1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, -1.0],
    [-1.0, -1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, -1.0],
    [1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, -1.0],
    [1.0, -1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0, -1.0],
];

struct Scene {
    device: Device,
    swapchain: Swapchain,
    depth: DepthTarget,
    heap: DescriptorHeap,
    pipeline: Pipeline,
    vertices: GpuResource,
    material: UploadBuffer<Material>,
    transform: UploadBuffer<TransformationMatrix>,
    light: UploadBuffer<DirectionalLight>,
    texture: GpuResource,
    texture_view: GpuDescriptor,
}

impl Scene {
    /// The context is kept apart so draws can borrow the scene while a frame
    /// runs.
    fn new() -> (Self, CommandContext) {
        let device = Device::new(&GraphicsConfig::default()).unwrap();
        let mut context = CommandContext::new(&device).unwrap();
        let swapchain = Swapchain::offscreen(&device, &context, extent()).unwrap();
        let depth = DepthTarget::new(&device, extent()).unwrap();
        let mut heap = DescriptorHeap::new(&device, DescriptorKind::ShaderResource, 16).unwrap();
        let pipeline = Pipeline::instanced(&device).unwrap();

        let vertices = upload_buffer(&device, &QUAD).unwrap();
        let view_projection = Camera::default().view_projection(2.0);
        let material = UploadBuffer::with_contents(&device, &[Material::default()]).unwrap();
        let transform = UploadBuffer::with_contents(
            &device,
            &[TransformationMatrix::new(&Mat4::identity(), &view_projection)],
        )
        .unwrap();
        let light = UploadBuffer::with_contents(&device, &[DirectionalLight::default()]).unwrap();

        let image = checker(4, 4);
        let texture = device.create_texture_2d(&image.metadata).unwrap();
        let staging = upload_texture(&device, &mut context, &texture, &image).unwrap();
        context.retire(staging);

        let slot = heap.allocate().unwrap();
        heap.write_texture_view(&device, slot, &texture);
        let texture_view = heap.gpu_handle(slot);

        let scene = Self {
            device,
            swapchain,
            depth,
            heap,
            pipeline,
            vertices,
            material,
            transform,
            light,
            texture,
            texture_view,
        };
        (scene, context)
    }

    fn draw(&self, instance_table: GpuDescriptor, instances: InstanceCount) -> DrawItem<'_> {
        DrawItem {
            vertices: &self.vertices,
            vertex_stride: std::mem::size_of::<[f32; 9]>() as u32,
            indices: None,
            element_count: QUAD.len() as u32,
            material: self.material.resource(),
            transform: self.transform.resource(),
            light: self.light.resource(),
            texture: self.texture_view,
            instance_table,
            instances,
        }
    }
}

fn checker(width: u32, height: u32) -> DecodedImage {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let value = if (x + y) % 2 == 0 { 255 } else { 0 };
            data.extend_from_slice(&[value, value, value, 255]);
        }
    }

    DecodedImage {
        metadata: ImageMetadata::new_2d(width, height, 1, Format::Rgba8UnormSrgb),
        subresources: vec![SubresourceData {
            row_pitch: (width * 4) as usize,
            slice_pitch: data.len(),
            data,
        }],
    }
}

fn run(
    frame: &mut FrameLoop,
    context: &mut CommandContext,
    scene: &Scene,
    draws: &[DrawItem],
    live_particles: u32,
    overlay: Option<&mut dyn Overlay>,
) -> FrameReport {
    let inputs = FrameInputs {
        swapchain: &scene.swapchain,
        depth: &scene.depth,
        heap: &scene.heap,
        pipeline: &scene.pipeline,
        draws,
        live_particles,
    };
    frame.run_frame(context, &inputs, overlay).unwrap()
}

#[test]
fn uploaded_texture_is_readable_after_first_frame() {
    let (scene, mut context) = Scene::new();
    let mut frame = FrameLoop::new();

    assert_eq!(scene.texture.state(), ResourceState::GenericRead);
    assert_eq!(scene.texture.raw().gpu_state(), ResourceState::CopyDest);
    assert_eq!(context.retired_count(), 1);

    run(&mut frame, &mut context, &scene, &[], 0, None);

    assert_eq!(scene.texture.raw().gpu_state(), ResourceState::GenericRead);
    assert_eq!(context.retired_count(), 0);

    let row = scene.texture.raw().read(0, 16);
    assert_eq!(
        row,
        [255, 255, 255, 255, 0, 0, 0, 255, 255, 255, 255, 255, 0, 0, 0, 255]
    );
}

#[test]
fn staging_outlives_a_flush_before_submit() {
    let (scene, mut context) = Scene::new();

    context.flush().unwrap();
    assert!(context.is_recording());
    assert_eq!(context.retired_count(), 1);
    assert_eq!(scene.texture.raw().gpu_state(), ResourceState::CopyDest);

    context.submit().unwrap();
    assert_eq!(context.retired_count(), 1);

    context.signal_and_wait().unwrap();
    assert_eq!(context.retired_count(), 0);
    assert_eq!(scene.texture.raw().gpu_state(), ResourceState::GenericRead);
    assert_eq!(scene.texture.raw().read(0, 4), [255, 255, 255, 255]);
}

#[test]
fn frames_flip_backbuffers_and_return_them_to_present() {
    let (scene, mut context) = Scene::new();
    let mut frame = FrameLoop::new();

    let mut fences = Vec::new();
    for expected in [0, 1, 0, 1] {
        let report = run(&mut frame, &mut context, &scene, &[], 0, None);
        assert_eq!(report.backbuffer, expected);
        assert_eq!(frame.stage(), FrameStage::Idle);

        let backbuffer = scene.swapchain.backbuffer(report.backbuffer);
        assert_eq!(backbuffer.state(), ResourceState::Present);
        assert_eq!(backbuffer.raw().gpu_state(), ResourceState::Present);
        assert_eq!(context.completed_value(), report.fence);
        fences.push(report.fence);
    }

    assert!(fences.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(frame.frames(), 4);
    assert_eq!(scene.device.raw.statistics().submissions, 4);
}

#[test]
fn backbuffer_is_cleared_to_the_gamma_encoded_clear_color() {
    let (scene, mut context) = Scene::new();
    let mut frame = FrameLoop::new();

    let report = run(&mut frame, &mut context, &scene, &[], 0, None);
    let texel = scene
        .swapchain
        .backbuffer(report.backbuffer)
        .raw()
        .read(0, 4);

    assert_eq!(texel, [89, 137, 188, 255]);
}

#[test]
fn particle_draw_uses_the_live_count() {
    let (mut scene, mut context) = Scene::new();
    let mut frame = FrameLoop::new();
    let mut rng = StdRng::seed_from_u64(7);
    let mut particles = ParticleSystem::new(
        &scene.device,
        &mut scene.heap,
        DEFAULT_PARTICLE_CAPACITY,
        &mut rng,
    )
    .unwrap();

    let view_projection = Camera::default().view_projection(2.0);
    let mut total_instances = 0;
    for _ in 0..240 {
        let live = particles.update(&view_projection);
        let draws = [
            scene.draw(particles.instance_table(), InstanceCount::Fixed(1)),
            scene.draw(particles.instance_table(), InstanceCount::LiveParticles),
        ];

        let report = run(&mut frame, &mut context, &scene, &draws, live, None);
        assert_eq!(report.instances, 1 + live);
        assert_eq!(report.draw_calls, if live == 0 { 1 } else { 2 });
        total_instances += u64::from(report.instances);
    }

    // Lifetimes are under three seconds, so four seconds in the burst is over.
    assert_eq!(particles.live_count(), 0);
    assert_eq!(scene.device.raw.statistics().instances, total_instances);
}

#[test]
fn overlay_records_after_scene_draws() {
    struct Counter {
        seen: Option<(u32, u32)>,
    }

    impl Overlay for Counter {
        fn record(&mut self, list: &mut CommandList, heap: &DescriptorHeap) {
            assert_eq!(heap.kind(), DescriptorKind::ShaderResource);
            self.seen = Some(list.draw_statistics());
            list.draw_instanced(3, 1);
        }
    }

    let (scene, mut context) = Scene::new();
    let mut frame = FrameLoop::new();
    let mut overlay = Counter { seen: None };

    let draws = [scene.draw(scene.texture_view, InstanceCount::Fixed(2))];
    let report = run(&mut frame, &mut context, &scene, &draws, 0, Some(&mut overlay));

    assert_eq!(overlay.seen, Some((1, 2)));
    assert_eq!(report.draw_calls, 2);
    assert_eq!(report.instances, 3);
    assert_eq!(scene.device.raw.statistics().draw_calls, 2);
}
