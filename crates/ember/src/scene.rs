use std::path::Path;

use anyhow::{Context, Result};
use assets::ModelVertex;
use geometry::{Camera, Mat4};
use graphics::{
    upload_buffer, upload_texture, CommandContext, DepthTarget, DescriptorHeap, DescriptorKind,
    Device, DirectionalLight, DrawItem, FrameInputs, FrameLoop, FrameReport, GpuDescriptor,
    GpuResource, InstanceCount, Material, ParticleSystem, Pipeline, Swapchain, TextureSelector,
    TransformationMatrix, UploadBuffer,
};
use rand::{rngs::StdRng, SeedableRng};
use shell::{ButtonState, Key, Window, WindowControl, WindowHandler};

use crate::config::Args;

const SHADER_RESOURCE_SLOTS: u32 = 128;

const MESH: &str = "plane.obj";
const DEFAULT_TEXTURE: &str = "uvChecker.png";
const ALTERNATE_TEXTURE: &str = "monsterBall.png";

/// Everything the frame reads, apart from the command context.
struct Scene {
    swapchain: Swapchain,
    depth: DepthTarget,
    heap: DescriptorHeap,
    pipeline: Pipeline,
    vertices: GpuResource,
    vertex_count: u32,
    material: UploadBuffer<Material>,
    transform: UploadBuffer<TransformationMatrix>,
    light: UploadBuffer<DirectionalLight>,
    // Textures stay alive for as long as their views are in use.
    _textures: [GpuResource; 2],
    primary: GpuDescriptor,
    alternate: GpuDescriptor,
}

pub struct App {
    // Dropped first: its flush must finish before the resources it used go.
    context: CommandContext,
    scene: Scene,
    particles: ParticleSystem,
    frame: FrameLoop,
    selector: TextureSelector,
    view_projection: Mat4,
    _device: Device,
}

impl App {
    pub fn new(args: &Args, window: Window) -> Result<Self> {
        let extent = window.inner_size();
        let device = Device::new(&args.graphics()).context("creating the graphics device")?;
        let mut context = CommandContext::new(&device)?;

        let swapchain = Swapchain::new(&device, &context, &window, extent)?;
        let depth = DepthTarget::new(&device, extent)?;
        let mut heap =
            DescriptorHeap::new(&device, DescriptorKind::ShaderResource, SHADER_RESOURCE_SLOTS)?;
        let pipeline = Pipeline::instanced(&device)?;

        let mesh_path = args.resources.join(MESH);
        let mesh = assets::load_obj(&mesh_path)
            .with_context(|| format!("loading {}", mesh_path.display()))?;
        let vertices = upload_buffer(&device, &mesh.vertices)?;

        let primary_path = mesh
            .material
            .texture
            .unwrap_or_else(|| args.resources.join(DEFAULT_TEXTURE));
        let (primary_texture, primary) =
            load_texture(&device, &mut context, &mut heap, &primary_path)?;
        let (alternate_texture, alternate) = load_texture(
            &device,
            &mut context,
            &mut heap,
            &args.resources.join(ALTERNATE_TEXTURE),
        )?;

        let aspect = extent.width as f32 / extent.height as f32;
        let view_projection = Camera::default().view_projection(aspect);

        let material = UploadBuffer::with_contents(&device, &[Material::default()])?;
        let transform = UploadBuffer::with_contents(
            &device,
            &[TransformationMatrix::new(&Mat4::identity(), &view_projection)],
        )?;
        let light = UploadBuffer::with_contents(&device, &[DirectionalLight::default()])?;

        let mut rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let particles = ParticleSystem::new(&device, &mut heap, args.particles, &mut rng)?;

        log::info!(
            "scene ready: {} vertices, {} of {} shader resource slots in use",
            mesh.vertices.len(),
            heap.allocated(),
            heap.capacity()
        );

        Ok(Self {
            context,
            scene: Scene {
                swapchain,
                depth,
                heap,
                pipeline,
                vertices,
                vertex_count: mesh.vertices.len() as u32,
                material,
                transform,
                light,
                _textures: [primary_texture, alternate_texture],
                primary,
                alternate,
            },
            particles,
            frame: FrameLoop::new(),
            selector: TextureSelector::default(),
            view_projection,
            _device: device,
        })
    }

    fn render(&mut self) -> graphics::Result<FrameReport> {
        let live = self.particles.update(&self.view_projection);
        let texture = self.selector.resolve(self.scene.primary, self.scene.alternate);

        let scene = &self.scene;
        let draws = [DrawItem {
            vertices: &scene.vertices,
            vertex_stride: std::mem::size_of::<ModelVertex>() as u32,
            indices: None,
            element_count: scene.vertex_count,
            material: scene.material.resource(),
            transform: scene.transform.resource(),
            light: scene.light.resource(),
            texture,
            instance_table: self.particles.instance_table(),
            instances: InstanceCount::LiveParticles,
        }];

        let inputs = FrameInputs {
            swapchain: &scene.swapchain,
            depth: &scene.depth,
            heap: &scene.heap,
            pipeline: &scene.pipeline,
            draws: &draws,
            live_particles: live,
        };

        self.frame.run_frame(&mut self.context, &inputs, None)
    }
}

impl WindowHandler for App {
    fn on_key(&mut self, control: &mut dyn WindowControl, key: Key, state: ButtonState) {
        if state != ButtonState::Pressed {
            return;
        }

        match key {
            Key::M => {
                self.selector.toggle();
                log::info!("texture: {:?}", self.selector);
            }
            Key::Space => {
                let running = !self.particles.is_running();
                self.particles.set_running(running);
                log::info!("particles {}", if running { "running" } else { "paused" });
            }
            Key::Escape => control.exit(),
        }
    }

    fn on_frame(&mut self, _control: &mut dyn WindowControl) {
        match self.render() {
            Ok(report) => log::trace!("{report:?}"),
            Err(e) => crate::fatal(e),
        }
    }

    fn on_destroy(&mut self) {
        log::info!("shutting down after {} frames", self.frame.frames());
        if let Err(e) = self.context.flush() {
            crate::fatal(e);
        }
    }
}

/// Decodes a PNG, records its upload and writes its shader view. The staging
/// memory is retired to the context and released once the first frame's
/// fence completes.
fn load_texture(
    device: &Device,
    context: &mut CommandContext,
    heap: &mut DescriptorHeap,
    path: &Path,
) -> Result<(GpuResource, GpuDescriptor)> {
    let image =
        assets::load_png(path).with_context(|| format!("loading texture {}", path.display()))?;

    let texture = device.create_texture_2d(&image.metadata)?;
    let staging = upload_texture(device, context, &texture, &image)?;
    context.retire(staging);

    let slot = heap.allocate()?;
    heap.write_texture_view(device, slot, &texture);

    Ok((texture, heap.gpu_handle(slot)))
}
