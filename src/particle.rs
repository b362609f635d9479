//! Suspended coffee-ground particles and the reaction-force field they write.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{info, warn};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

use crate::Float;
use crate::config::BedConfig;
use crate::geometry::{Geometry, GridDims};
use crate::macroscopic::FluidFieldView;

#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub position: Vector3<Float>,
    pub velocity: Vector3<Float>,
    pub radius: Float,
    pub mass: Float,
    pub active: bool,
    /// Drag applied during the last coupling step
    pub drag_force: Vector3<Float>,
    /// Relaxed drag carried into the next coupling step
    pub previous_drag: Vector3<Float>,
    /// Fluid velocity sampled at the particle centre
    pub fluid_velocity: Vector3<Float>,
    pub reynolds: Float,
}

impl Particle {
    /// Sphere of the given material density, at rest.
    pub fn new(position: Vector3<Float>, radius: Float, material_density: Float) -> Self {
        let mass = material_density * sphere_volume(radius);
        Self::with_mass(position, radius, mass)
    }

    pub fn with_mass(position: Vector3<Float>, radius: Float, mass: Float) -> Self {
        Self {
            position,
            velocity: Vector3::zeros(),
            radius,
            mass,
            active: true,
            drag_force: Vector3::zeros(),
            previous_drag: Vector3::zeros(),
            fluid_velocity: Vector3::zeros(),
            reynolds: 0.0,
        }
    }

    /// Finite kinematics, positive radius and positive mass.
    pub fn is_valid(&self) -> bool {
        self.position.iter().all(|c| c.is_finite())
            && self.velocity.iter().all(|c| c.is_finite())
            && self.radius.is_finite()
            && self.radius > 0.0
            && self.mass.is_finite()
            && self.mass > 0.0
    }

    pub fn material_density(&self) -> Float {
        self.mass / sphere_volume(self.radius)
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.drag_force = Vector3::zeros();
        self.previous_drag = Vector3::zeros();
    }
}

pub fn sphere_volume(radius: Float) -> Float {
    4.0 / 3.0 * PI * radius * radius * radius
}

fn atomic_add(cell: &AtomicU64, value: Float) {
    // The closure never returns None, so the update always succeeds
    let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
        Some((Float::from_bits(bits) + value).to_bits())
    });
}

/// Per-node reaction forces from the particles, rebuilt every coupling step.
///
/// Many particles can share a grid node, so contributions are accumulated with
/// compare-and-swap adds on the bit patterns of `f64` values.
#[derive(Debug)]
pub struct ReactionForceField {
    dims: GridDims,
    data: Vec<[AtomicU64; 3]>,
}

impl ReactionForceField {
    pub fn new(dims: GridDims) -> Self {
        let zero = 0.0f64.to_bits();
        Self {
            dims,
            data: (0..dims.len())
                .map(|_| [AtomicU64::new(zero), AtomicU64::new(zero), AtomicU64::new(zero)])
                .collect(),
        }
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn clear(&mut self) {
        let zero = 0.0f64.to_bits();
        for node in &mut self.data {
            for c in node.iter_mut() {
                *c.get_mut() = zero;
            }
        }
    }

    /// Additive write, safe to call from many threads at once.
    #[inline]
    pub fn add(&self, idx: usize, force: [Float; 3]) {
        let node = &self.data[idx];
        for a in 0..3 {
            if force[a] != 0.0 {
                atomic_add(&node[a], force[a]);
            }
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> [Float; 3] {
        let node = &self.data[idx];
        [
            Float::from_bits(node[0].load(Ordering::Relaxed)),
            Float::from_bits(node[1].load(Ordering::Relaxed)),
            Float::from_bits(node[2].load(Ordering::Relaxed)),
        ]
    }

    pub fn total(&self) -> [Float; 3] {
        (0..self.data.len()).fold([0.0; 3], |acc, idx| {
            let f = self.get(idx);
            [acc[0] + f[0], acc[1] + f[1], acc[2] + f[2]]
        })
    }
}

const MIN_SPACING: Float = 0.5;

fn is_open(geometry: &Geometry, position: &Vector3<Float>) -> bool {
    geometry.dims.contains_point(position)
        && !geometry.is_solid(
            position.x.round() as usize,
            position.y.round() as usize,
            position.z.round() as usize,
        )
}

/// Unjittered cubic sites inside the slab, bottom layer first.
fn bed_sites(bed: &BedConfig, geometry: &Geometry, spacing: Float) -> Vec<Vector3<Float>> {
    let dims = geometry.dims;
    let mut sites = Vec::new();
    let mut z = bed.z_min + 0.5 * spacing;
    while z <= bed.z_max {
        let mut y = 0.5 * spacing;
        while y <= (dims.ny - 1) as Float {
            let mut x = 0.5 * spacing;
            while x <= (dims.nx - 1) as Float {
                let site = Vector3::new(x, y, z);
                if is_open(geometry, &site) {
                    sites.push(site);
                }
                x += spacing;
            }
            y += spacing;
        }
        z += spacing;
    }
    sites
}

#[derive(Debug)]
pub struct ParticleSystem {
    particles: Vec<Particle>,
    reaction: ReactionForceField,
    error_count: usize,
}

impl ParticleSystem {
    pub fn new(dims: GridDims) -> Self {
        Self {
            particles: Vec::new(),
            reaction: ReactionForceField::new(dims),
            error_count: 0,
        }
    }

    pub fn with_particles(dims: GridDims, particles: Vec<Particle>) -> Self {
        Self {
            particles,
            ..Self::new(dims)
        }
    }

    /// Fill the bed slab with particles on a jittered cubic arrangement.
    ///
    /// Spacing starts from the slab's fluid volume per particle and shrinks until
    /// enough non-solid sites exist. Jitter that would land a particle in a solid
    /// cell is discarded.
    pub fn pack_bed(bed: &BedConfig, geometry: &Geometry) -> Self {
        let dims = geometry.dims;
        let mut system = Self::new(dims);
        if bed.count == 0 {
            return system;
        }
        let mut rng = StdRng::seed_from_u64(bed.seed);
        let radius_dist = Normal::new(bed.radius_mean, bed.radius_std.max(0.0)).ok();

        let slab_nodes = (0..dims.len())
            .filter(|&idx| {
                let z = dims.coords(idx).2 as Float;
                !geometry.is_solid_index(idx) && z >= bed.z_min && z <= bed.z_max
            })
            .count()
            .max(1);
        let mut spacing = (slab_nodes as Float / bed.count as Float).cbrt();
        let mut sites = bed_sites(bed, geometry, spacing);
        while sites.len() < bed.count && spacing > MIN_SPACING {
            spacing = (spacing * 0.9).max(MIN_SPACING);
            sites = bed_sites(bed, geometry, spacing);
        }

        let jitter = 0.25 * spacing;
        for site in sites.into_iter().take(bed.count) {
            let jittered = Vector3::new(
                site.x + rng.gen_range(-jitter..=jitter),
                site.y + rng.gen_range(-jitter..=jitter),
                (site.z + rng.gen_range(-jitter..=jitter)).clamp(bed.z_min, bed.z_max),
            );
            let position = if is_open(geometry, &jittered) { jittered } else { site };
            let radius = radius_dist
                .as_ref()
                .map_or(bed.radius_mean, |d| d.sample(&mut rng))
                .max(0.05 * bed.radius_mean);
            system
                .particles
                .push(Particle::new(position, radius, bed.particle_density));
        }

        if system.particles.len() < bed.count {
            warn!(
                "Bed slab fits {} of {} requested particles",
                system.particles.len(),
                bed.count
            );
        }
        info!(
            "Packed {} particles in z = [{:.1}, {:.1}] with spacing {:.2}",
            system.particles.len(),
            bed.z_min,
            bed.z_max,
            spacing
        );
        system
    }

    pub fn push(&mut self, particle: Particle) {
        self.particles.push(particle);
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.particles.iter().filter(|p| p.active).count()
    }

    pub fn reaction(&self) -> &ReactionForceField {
        &self.reaction
    }

    /// Particles deactivated because of invalid state, over the system's lifetime.
    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub(crate) fn record_errors(&mut self, count: usize) {
        self.error_count += count;
    }

    /// Split borrow for the coupler: particles to mutate, reaction field to add into.
    pub(crate) fn coupling_parts(&mut self) -> (&mut [Particle], &ReactionForceField) {
        (&mut self.particles, &self.reaction)
    }

    pub(crate) fn clear_reaction(&mut self) {
        self.reaction.clear();
    }

    /// Explicit Euler step from the relaxed drag and buoyancy-corrected gravity.
    ///
    /// Returns the number of particles deactivated because they left the domain,
    /// entered a solid cell or became non-finite.
    pub fn integrate(
        &mut self,
        view: &FluidFieldView,
        gravity: [Float; 3],
        fluid_density: Float,
        dt: Float,
    ) -> usize {
        let g = Vector3::new(gravity[0], gravity[1], gravity[2]);
        let lost = self
            .particles
            .par_iter_mut()
            .filter(|p| p.active)
            .map(|p| {
                let buoyancy = 1.0 - fluid_density / p.material_density();
                let acceleration = p.drag_force / p.mass + g * buoyancy;
                p.velocity += acceleration * dt;
                p.position += p.velocity * dt;
                if !p.is_valid() || view.is_solid_at(&p.position) != Some(false) {
                    p.deactivate();
                    1
                } else {
                    0
                }
            })
            .sum::<usize>();
        if lost > 0 {
            warn!("{} particles deactivated during integration", lost);
        }
        self.error_count += lost;
        lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macroscopic::MacroscopicFields;

    #[test]
    fn test_particle_mass_from_density() {
        let p = Particle::new(Vector3::new(1.0, 1.0, 1.0), 0.5, 2.0);
        assert!((p.mass - 2.0 * 4.0 / 3.0 * PI * 0.125).abs() < 1e-12);
        assert!((p.material_density() - 2.0).abs() < 1e-12);
        assert!(p.is_valid());
    }

    #[test]
    fn test_invalid_particles() {
        let mut p = Particle::with_mass(Vector3::new(1.0, 1.0, 1.0), 0.3, 0.0);
        assert!(!p.is_valid());
        p.mass = 1.0;
        p.velocity.x = Float::NAN;
        assert!(!p.is_valid());
        p.velocity.x = 0.0;
        p.radius = Float::INFINITY;
        assert!(!p.is_valid());
    }

    #[test]
    fn test_reaction_field_accumulates_concurrently() {
        let dims = GridDims::new(2, 2, 2);
        let mut field = ReactionForceField::new(dims);
        (0..1000).into_par_iter().for_each(|n| {
            field.add(n % 8, [0.001, -0.002, 0.0]);
        });
        let total = field.total();
        assert!((total[0] - 1.0).abs() < 1e-10);
        assert!((total[1] + 2.0).abs() < 1e-10);
        assert_eq!(total[2], 0.0);
        let node = field.get(3);
        assert!((node[0] - 0.125).abs() < 1e-12);

        field.clear();
        assert_eq!(field.total(), [0.0; 3]);
    }

    #[test]
    fn test_pack_bed_places_particles_in_slab() {
        let dims = GridDims::new(12, 12, 16);
        let geometry = Geometry::enclosed(dims, 1);
        let bed = BedConfig {
            count: 40,
            radius_mean: 0.3,
            radius_std: 0.05,
            particle_density: 1.3,
            z_min: 2.0,
            z_max: 8.0,
            seed: 7,
        };
        let system = ParticleSystem::pack_bed(&bed, &geometry);
        assert_eq!(system.len(), 40);
        for p in system.particles() {
            assert!(p.active);
            assert!(p.position.z >= 2.0 && p.position.z <= 8.0);
            assert!(p.radius > 0.0);
            assert!(!geometry.is_solid(
                p.position.x.round() as usize,
                p.position.y.round() as usize,
                p.position.z.round() as usize
            ));
        }

        let again = ParticleSystem::pack_bed(&bed, &geometry);
        assert_eq!(again.particles()[5], system.particles()[5]);
    }

    #[test]
    fn test_integrate_settles_heavy_particle_and_deactivates_escapees() {
        let dims = GridDims::new(6, 6, 6);
        let fields = MacroscopicFields::new(dims);
        let solid = vec![false; dims.len()];
        let view = fields.view(&solid);

        let mut system = ParticleSystem::new(dims);
        system.push(Particle::new(Vector3::new(3.0, 3.0, 3.0), 0.3, 2.0));
        let mut runaway = Particle::new(Vector3::new(3.0, 3.0, 4.9), 0.3, 2.0);
        runaway.velocity = Vector3::new(0.0, 0.0, 1.0);
        system.push(runaway);

        let lost = system.integrate(&view, [0.0, 0.0, -1e-3], 1.0, 1.0);
        assert_eq!(lost, 1);
        assert_eq!(system.error_count(), 1);
        assert_eq!(system.active_count(), 1);
        let settled = &system.particles()[0];
        assert!((settled.velocity.z + 0.5e-3).abs() < 1e-15);
        assert!(!system.particles()[1].active);
    }
}
