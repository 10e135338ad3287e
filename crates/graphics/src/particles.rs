//! A one-shot particle burst, simulated on the CPU and drawn with instancing.
//!
//! The pool is spawned once. Particles are never recycled: once a particle's
//! `current_time` reaches its `lifetime` it is left out of the instance
//! buffer for good, and the burst fades out as the pool empties.

use bytemuck::{Pod, Zeroable};
use geometry::{Mat4, Transform, Vec3};
use rand::Rng;

use crate::{
    descriptor::{DescriptorHeap, GpuDescriptor},
    error::{Error, Result},
    resource::UploadBuffer,
    Device,
};

/// The simulation step. Fixed regardless of how long a frame took.
pub const DELTA_TIME: f32 = 1.0 / 60.0;

pub const DEFAULT_PARTICLE_CAPACITY: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    pub transform: Transform,
    pub velocity: Vec3,
    pub color: [f32; 4],
    pub lifetime: f32,
    pub current_time: f32,
}

impl Particle {
    /// A particle at a random position in the unit cube, drifting in a random
    /// direction with a random color, living between one and three seconds.
    pub fn spawn(rng: &mut impl Rng) -> Self {
        let mut unit = || rng.gen_range(-1.0_f32..=1.0);
        let translate = Vec3::new(unit(), unit(), unit());
        let velocity = Vec3::new(unit(), unit(), unit());

        Self {
            transform: Transform {
                scale: Vec3::new(0.5, 0.5, 0.5),
                rotate: Vec3::new(0.0, 3.0, 0.0),
                translate,
            },
            velocity,
            color: [rng.gen(), rng.gen(), rng.gen(), 1.0],
            lifetime: rng.gen_range(1.0..3.0),
            current_time: 0.0,
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.current_time < self.lifetime
    }

    /// Remaining fraction of the particle's life. Only meaningful while alive.
    #[must_use]
    pub fn alpha(&self) -> f32 {
        1.0 - self.current_time / self.lifetime
    }

    fn advance(&mut self, dt: f32) {
        self.transform.translate += self.velocity * dt;
        self.current_time += dt;
    }
}

/// Per-instance data read by the vertex shader through a structured buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    pub wvp: [[f32; 4]; 4],
    pub world: [[f32; 4]; 4],
    pub color: [f32; 4],
}

/// Advances every particle by `dt`.
///
/// Expired particles keep integrating. They are never drawn again, so this
/// only keeps `current_time` an honest count of elapsed ticks.
pub fn tick(particles: &mut [Particle], dt: f32) {
    for particle in particles {
        particle.advance(dt);
    }
}

/// Writes one record per live particle into `out`, packed from index 0 in
/// pool order, and returns how many were written.
///
/// # Panics
///
/// If `out` is shorter than `particles`.
pub fn serialize_live(particles: &[Particle], view_projection: &Mat4, out: &mut [InstanceRecord]) -> u32 {
    assert!(
        out.len() >= particles.len(),
        "instance buffer holds {} records but the pool has {} particles",
        out.len(),
        particles.len()
    );

    let mut live = 0;
    for particle in particles.iter().filter(|p| p.is_alive()) {
        let world = particle.transform.to_matrix();
        let [r, g, b, _] = particle.color;

        out[live] = InstanceRecord {
            wvp: world.then(view_projection).to_arrays(),
            world: world.to_arrays(),
            color: [r, g, b, particle.alpha()],
        };
        live += 1;
    }

    live as u32
}

/// The particle pool, its instance buffer and the buffer's shader view.
pub struct ParticleSystem {
    particles: Vec<Particle>,
    instances: UploadBuffer<InstanceRecord>,
    instance_table: GpuDescriptor,
    live_count: u32,
    running: bool,
}

impl ParticleSystem {
    /// Spawns `capacity` particles from `rng`.
    pub fn new(
        device: &Device,
        heap: &mut DescriptorHeap,
        capacity: usize,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let particles = (0..capacity).map(|_| Particle::spawn(rng)).collect();
        Self::with_particles(device, heap, particles)
    }

    /// Takes ownership of an existing pool. Fails with
    /// [`Error::EmptyParticlePool`] if `particles` is empty.
    pub fn with_particles(
        device: &Device,
        heap: &mut DescriptorHeap,
        particles: Vec<Particle>,
    ) -> Result<Self> {
        if particles.is_empty() {
            return Err(Error::EmptyParticlePool);
        }

        let capacity = particles.len();
        let instances = UploadBuffer::<InstanceRecord>::new(device, capacity)?;

        let slot = heap.allocate()?;
        heap.write_structured_buffer_view(
            device,
            slot,
            instances.resource(),
            capacity as u32,
            std::mem::size_of::<InstanceRecord>() as u32,
        );

        log::info!("spawned {capacity} particles (instance view in slot {slot})");

        Ok(Self {
            particles,
            instances,
            instance_table: heap.gpu_handle(slot),
            live_count: 0,
            running: true,
        })
    }

    /// Steps the simulation (unless paused) and rewrites the instance buffer.
    /// Returns the number of live particles, which is the instance count for
    /// this frame's particle draw.
    ///
    /// Must only be called between frames, once the previous frame's fence
    /// wait has returned.
    pub fn update(&mut self, view_projection: &Mat4) -> u32 {
        if self.running {
            tick(&mut self.particles, DELTA_TIME);
        }

        let live = serialize_live(&self.particles, view_projection, self.instances.as_mut_slice());

        if live == 0 && self.live_count > 0 {
            log::info!("particle burst finished");
        }

        self.live_count = live;
        live
    }

    #[must_use]
    pub fn live_count(&self) -> u32 {
        self.live_count
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.particles.len()
    }

    #[must_use]
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// The descriptor table for the instance buffer's structured view.
    #[must_use]
    pub fn instance_table(&self) -> GpuDescriptor {
        self.instance_table
    }

    #[must_use]
    pub fn instances(&self) -> &[InstanceRecord] {
        &self.instances.as_slice()[..self.live_count as usize]
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{DescriptorKind, GraphicsConfig};

    fn particle(lifetime: f32) -> Particle {
        Particle {
            transform: Transform::identity(),
            velocity: Vec3::new(1.0, 0.0, 0.0),
            color: [0.25, 0.5, 0.75, 1.0],
            lifetime,
            current_time: 0.0,
        }
    }

    fn records(n: usize) -> Vec<InstanceRecord> {
        vec![InstanceRecord::zeroed(); n]
    }

    #[test]
    fn spawn_follows_the_burst_distribution() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..1000 {
            let p = Particle::spawn(&mut rng);
            assert_eq!(p.transform.scale, Vec3::new(0.5, 0.5, 0.5));
            assert_eq!(p.current_time, 0.0);
            assert!((1.0..3.0).contains(&p.lifetime));
            assert_eq!(p.color[3], 1.0);
            assert!(p.color[..3].iter().all(|c| (0.0..=1.0).contains(c)));
            for v in [p.transform.translate, p.velocity] {
                assert!([v.x, v.y, v.z].iter().all(|c| (-1.0..=1.0).contains(c)));
            }
        }
    }

    #[test]
    fn same_seed_same_burst() {
        let a = Particle::spawn(&mut StdRng::seed_from_u64(42));
        let b = Particle::spawn(&mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn tick_integrates_velocity() {
        let mut particles = [particle(1.0)];
        tick(&mut particles, 0.5);

        assert_eq!(particles[0].transform.translate, Vec3::new(0.5, 0.0, 0.0));
        assert_eq!(particles[0].current_time, 0.5);
    }

    #[test]
    fn alpha_is_remaining_life_fraction() {
        let mut particles = [particle(2.0), particle(3.0)];
        let mut out = records(2);

        for _ in 0..30 {
            tick(&mut particles, DELTA_TIME);
            let live = serialize_live(&particles, &Mat4::identity(), &mut out);
            assert_eq!(live, 2);

            for (record, p) in out.iter().zip(&particles) {
                let expected = 1.0 - p.current_time / p.lifetime;
                assert!((record.color[3] - expected).abs() < 1e-6);
                assert!((0.0..=1.0).contains(&record.color[3]));
            }
        }
    }

    #[test]
    fn live_particles_are_packed_in_pool_order() {
        let mut particles = [particle(1.0), particle(1.0), particle(1.0)];
        particles[0].color = [1.0, 0.0, 0.0, 1.0];
        particles[1].current_time = 1.0;
        particles[2].color = [0.0, 0.0, 1.0, 1.0];

        let mut out = records(3);
        assert_eq!(serialize_live(&particles, &Mat4::identity(), &mut out), 2);
        assert_eq!(out[0].color[..3], [1.0, 0.0, 0.0]);
        assert_eq!(out[1].color[..3], [0.0, 0.0, 1.0]);
        assert_eq!(out[0].world, particles[0].transform.to_matrix().to_arrays());
    }

    #[test]
    fn expired_particles_never_reappear() {
        let mut rng = StdRng::seed_from_u64(1234);
        let mut particles: Vec<_> = (0..64).map(|_| Particle::spawn(&mut rng)).collect();
        let mut out = records(particles.len());
        let mut expired = vec![false; particles.len()];
        let mut last_live = particles.len() as u32;

        for _ in 0..240 {
            tick(&mut particles, DELTA_TIME);
            let live = serialize_live(&particles, &Mat4::identity(), &mut out);

            for (i, p) in particles.iter().enumerate() {
                if expired[i] {
                    assert!(!p.is_alive(), "particle {i} came back to life");
                }
                expired[i] |= !p.is_alive();
            }

            assert!(live <= last_live);
            assert_eq!(live as usize, expired.iter().filter(|e| !**e).count());
            last_live = live;
        }

        // Every lifetime is under three seconds.
        assert_eq!(last_live, 0);
    }

    #[test]
    fn two_second_burst_is_gone_after_121_ticks() {
        let mut particles = vec![particle(2.0); 10];
        let mut out = records(10);

        for _ in 0..121 {
            tick(&mut particles, DELTA_TIME);
        }

        for p in &particles {
            assert!(p.current_time >= 121.0 / 60.0 - 1e-4, "{}", p.current_time);
            assert!(!p.is_alive());
        }
        assert_eq!(serialize_live(&particles, &Mat4::identity(), &mut out), 0);
    }

    #[test]
    #[should_panic(expected = "instance buffer holds")]
    fn undersized_instance_buffer_panics() {
        let particles = [particle(1.0), particle(1.0)];
        serialize_live(&particles, &Mat4::identity(), &mut records(1));
    }

    #[test]
    fn system_writes_instance_buffer_and_pauses() {
        let device = Device::new(&GraphicsConfig::default()).unwrap();
        let mut heap = DescriptorHeap::new(&device, DescriptorKind::ShaderResource, 8).unwrap();

        let particles = vec![particle(1.0), particle(0.5), particle(2.0)];
        let mut system = ParticleSystem::with_particles(&device, &mut heap, particles).unwrap();
        assert_eq!(heap.allocated(), 2);
        assert_eq!(system.instance_table(), heap.gpu_handle(1));

        assert_eq!(system.update(&Mat4::identity()), 3);
        assert_eq!(system.instances().len(), 3);

        system.set_running(false);
        for _ in 0..60 {
            assert_eq!(system.update(&Mat4::identity()), 3);
        }

        system.set_running(true);
        for _ in 0..60 {
            system.update(&Mat4::identity());
        }
        assert_eq!(system.live_count(), 1);
        assert_eq!(system.instances()[0].color[..3], [0.25, 0.5, 0.75]);
    }

    #[test]
    fn empty_pool_is_an_error() {
        let device = Device::new(&GraphicsConfig::default()).unwrap();
        let mut heap = DescriptorHeap::new(&device, DescriptorKind::ShaderResource, 8).unwrap();

        assert!(matches!(
            ParticleSystem::with_particles(&device, &mut heap, Vec::new()),
            Err(Error::EmptyParticlePool)
        ));
        assert_eq!(heap.allocated(), 1);
    }
}
