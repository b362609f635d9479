use log::{debug, info, warn};
use rayon::prelude::*;

use crate::Float;
use crate::boundary::{BoundaryConditionManager, BoundaryConditions};
use crate::collision::CollisionStreamingEngine;
use crate::config::PhysicsConfig;
use crate::distribution::DistributionStore;
use crate::error::SolverError;
use crate::external::ExternalInputs;
use crate::forcing::{BodyForceAccumulator, VectorField, relaxation_time};
use crate::geometry::{Geometry, GridDims};
use crate::lattice::{D3Q19, equilibrium_set};
use crate::macroscopic::{FluidFieldView, MacroscopicFields};
use crate::particle::ParticleSystem;

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: u64,
    /// Sum of the populations over fluid nodes after the step
    pub total_mass: Float,
    pub max_speed: Float,
    /// True when the boundary rules failed and the inline copy was used
    pub boundary_fallback: bool,
}

/// The lattice-Boltzmann fluid solver.
///
/// Owns every grid field. A step runs its phases in a fixed order with a full
/// barrier between them: force assembly, macroscopic pass, fused collision and
/// streaming, buffer swap, boundary rules, macroscopic refresh, divergence check.
pub struct LatticeBoltzmannCore {
    physics: PhysicsConfig,
    tau_water: Float,
    geometry: Geometry,
    store: DistributionStore,
    fields: MacroscopicFields,
    forces: BodyForceAccumulator,
    tau: Vec<Float>,
    engine: CollisionStreamingEngine,
    boundary: Box<dyn BoundaryConditions>,
    prepared: bool,
    step: u64,
}

impl LatticeBoltzmannCore {
    pub fn new(physics: PhysicsConfig, geometry: Geometry) -> Self {
        let dims = geometry.dims;
        info!(
            "Initializing LBM core with domain size: {}x{}x{} ({} fluid, {} solid nodes)",
            dims.nx,
            dims.ny,
            dims.nz,
            geometry.fluid_count(),
            geometry.solid_count()
        );
        let tau_water = physics.calculate_tau();
        let mut core = Self {
            store: DistributionStore::new(dims, physics.density),
            fields: MacroscopicFields::new(dims),
            forces: BodyForceAccumulator::new(dims),
            tau: vec![tau_water; dims.len()],
            engine: CollisionStreamingEngine::new(),
            boundary: Box::new(BoundaryConditionManager::new(physics.density)),
            prepared: false,
            step: 0,
            tau_water,
            geometry,
            physics,
        };
        core.refresh_macroscopic();
        core
    }

    /// Replace the boundary rules, e.g. with a variant for a different brewer.
    pub fn with_boundary_conditions(mut self, boundary: Box<dyn BoundaryConditions>) -> Self {
        self.boundary = boundary;
        self
    }

    /// Set every fluid node to equilibrium at (`density`, `velocity`).
    pub fn initialize_uniform(&mut self, density: Float, velocity: [Float; 3]) {
        let f = equilibrium_set(density, velocity);
        for idx in 0..self.dims().len() {
            if !self.geometry.is_solid_index(idx) {
                self.store.set_node(idx, &f);
            }
        }
        self.forces.zero();
        self.refresh_macroscopic();
    }

    pub fn dims(&self) -> GridDims {
        self.geometry.dims
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn physics(&self) -> &PhysicsConfig {
        &self.physics
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn density(&self) -> &[Float] {
        &self.fields.density
    }

    pub fn velocity(&self) -> &VectorField {
        &self.fields.velocity
    }

    pub fn relaxation_times(&self) -> &[Float] {
        &self.tau
    }

    pub fn body_force(&self) -> &VectorField {
        self.forces.field()
    }

    pub fn distributions(&self) -> &DistributionStore {
        &self.store
    }

    /// Direct access for seeding non-equilibrium initial states. Call
    /// `refresh_macroscopic` afterwards.
    pub fn distributions_mut(&mut self) -> &mut DistributionStore {
        &mut self.store
    }

    /// Read-only fields for collaborators.
    pub fn view(&self) -> FluidFieldView<'_> {
        self.fields.view(self.geometry.solid_mask())
    }

    pub fn total_mass(&self) -> Float {
        self.store
            .total_mass(|idx| !self.geometry.is_solid_index(idx))
    }

    pub fn refresh_macroscopic(&mut self) {
        self.fields
            .compute(&self.store, self.geometry.solid_mask(), &self.forces);
    }

    /// Zero the body force, add gravity and collaborator forces, and rebuild the
    /// relaxation-time field.
    pub fn begin_step(&mut self, external: &ExternalInputs) -> Result<(), SolverError> {
        external.check_shapes(self.dims().len())?;
        let solid = self.geometry.solid_mask();

        self.forces.zero();
        self.forces.add_gravity(
            &self.fields.density,
            external.phase_fraction,
            self.physics.gravity,
            self.physics.air_gravity_scale,
            solid,
        );
        if let Some(resistance) = external.porous_resistance {
            self.forces.add_field(resistance);
        }
        if let Some(tension) = external.surface_tension {
            self.forces.add_field(tension);
        }

        let (tau_water, tau_air) = (self.tau_water, self.physics.tau_air);
        self.tau.par_iter_mut().enumerate().for_each(|(idx, tau)| {
            let phi = external.phase_fraction.map_or(1.0, |p| p[idx]);
            let nu_t = external.eddy_viscosity.map_or(0.0, |v| v[idx]);
            *tau = relaxation_time(phi, tau_water, tau_air, nu_t);
        });

        self.prepared = true;
        Ok(())
    }

    /// Merge the particle reaction field from the last coupling step into this
    /// step's body force.
    pub fn add_reaction_forces(&mut self, particles: &ParticleSystem) -> Result<(), SolverError> {
        let reaction = particles.reaction();
        let expected = self.dims().len();
        let actual = reaction.dims().len();
        if actual != expected {
            return Err(SolverError::ParticleGridMismatch { expected, actual });
        }
        if !self.prepared {
            self.begin_step(&ExternalInputs::none())?;
        }
        self.forces.add_reaction_forces(reaction);
        Ok(())
    }

    /// Run the fluid phases of one step with the forces assembled so far.
    pub fn advance(&mut self) -> Result<StepReport, SolverError> {
        if !self.prepared {
            self.begin_step(&ExternalInputs::none())?;
        }
        self.prepared = false;
        self.step += 1;

        self.refresh_macroscopic();
        self.engine.collide_and_stream(
            &mut self.store,
            &self.fields,
            &self.forces,
            &self.tau,
            self.geometry.solid_mask(),
        );

        let solid = self.geometry.solid_mask();
        let boundary_fallback =
            match self.boundary.apply(&mut self.store, &mut self.fields, solid) {
                Ok(()) => false,
                Err(e) => {
                    warn!(
                        "Boundary rules failed at step {}: {}; using inline fallback",
                        self.step, e
                    );
                    apply_boundaries_inline(
                        &mut self.store,
                        &mut self.fields,
                        solid,
                        self.physics.density,
                    );
                    true
                }
            };

        self.refresh_macroscopic();
        self.check_divergence()?;

        let report = StepReport {
            step: self.step,
            total_mass: self.total_mass(),
            max_speed: self.view().max_speed(),
            boundary_fallback,
        };
        debug!(
            "Step {}: mass {:.9}, max |u| {:.5}",
            report.step, report.total_mass, report.max_speed
        );
        Ok(report)
    }

    /// One full fluid cycle without collaborators or particles.
    pub fn step(&mut self) -> Result<StepReport, SolverError> {
        self.step_with(&ExternalInputs::none())
    }

    pub fn step_with(&mut self, external: &ExternalInputs) -> Result<StepReport, SolverError> {
        self.begin_step(external)?;
        self.advance()
    }

    /// Fails on the first fluid node with non-finite state or a speed above
    /// `max_mach * c_s`.
    fn check_divergence(&self) -> Result<(), SolverError> {
        let limit = self.physics.max_mach * D3Q19::CS2.sqrt();
        let solid = self.geometry.solid_mask();
        let fields = &self.fields;
        let bad = (0..self.dims().len()).into_par_iter().find_first(|&idx| {
            if solid[idx] {
                return false;
            }
            let u = fields.velocity.data[idx];
            let finite = fields.density[idx].is_finite() && u.iter().all(|c| c.is_finite());
            !finite || fields.speed_sq[idx].sqrt() > limit
        });
        let Some(idx) = bad else {
            return Ok(());
        };

        let node = self.dims().coords(idx);
        let speed = self.fields.speed_sq[idx].sqrt();
        if speed.is_finite() && self.fields.density[idx].is_finite() {
            Err(SolverError::Divergence {
                step: self.step,
                node,
                speed,
                limit,
            })
        } else {
            Err(SolverError::NonFinite {
                step: self.step,
                node,
            })
        }
    }
}

/// Standalone copy of the boundary rules used when the configured
/// `BoundaryConditions` implementation fails. Must stay equivalent to
/// `BoundaryConditionManager`.
fn apply_boundaries_inline(
    store: &mut DistributionStore,
    fields: &mut MacroscopicFields,
    solid: &[bool],
    rest_density: Float,
) {
    let d = store.dims();
    let (nx, ny, nz) = (d.nx, d.ny, d.nz);
    let n = d.len();
    let solid_at = |idx: usize| solid.get(idx).copied().unwrap_or(true);

    // Solid nodes back to rest
    let rest = equilibrium_set(rest_density, [0.0; 3]);
    for idx in (0..n).filter(|&idx| solid_at(idx)) {
        store.set_node(idx, &rest);
    }

    // Open top
    if nz >= 2 {
        let layer = (nz - 1) * nx * ny;
        for idx in layer..n {
            if solid_at(idx) {
                continue;
            }
            let below = idx - nx * ny;
            let rho = if solid_at(below) {
                fields.density[idx]
            } else {
                fields.density[below]
            };
            let u = fields.velocity.data[idx];
            store.set_node(idx, &equilibrium_set(rho, u));
            fields.set(idx, rho, u);
        }
    }

    // Closed bottom
    for idx in (0..nx * ny).filter(|&idx| !solid_at(idx)) {
        let rho: Float = store.node(idx).iter().sum();
        store.set_node(idx, &equilibrium_set(rho, [0.0; 3]));
        fields.set(idx, rho, [0.0; 3]);
    }

    // Side outlets
    let last_i = nx.saturating_sub(1);
    let last_j = ny.saturating_sub(1);
    for idx in 0..n {
        let (i, j, k) = d.coords(idx);
        if !(i == 0 || j == 0 || i == last_i || j == last_j) || solid_at(idx) {
            continue;
        }
        let si = i.max(1).min(nx.saturating_sub(2));
        let sj = j.max(1).min(ny.saturating_sub(2));
        let source = d.index(si, sj, k);
        let (rho, u) = if solid_at(source) {
            let own = fields.density[idx];
            (if own > 0.0 { own } else { rest_density }, [0.0; 3])
        } else {
            (fields.density[source], fields.velocity.data[source])
        };
        store.set_node(idx, &equilibrium_set(rho, u));
        fields.set(idx, rho, u);
    }
}
