//! Two-way momentum exchange between the lattice fluid and the particles.
//!
//! Per active particle: sample the fluid velocity trilinearly, evaluate the
//! Reynolds-dependent drag, under-relax it against the previous step, and spread
//! the opposite force back onto the same 8 nodes. The reaction field is consumed
//! by the next collision step.

use std::f64::consts::PI;

use log::{debug, warn};
use nalgebra::Vector3;
use rayon::prelude::*;

use crate::Float;
use crate::config::{ParticleConfig, PhysicsConfig};
use crate::macroscopic::FluidFieldView;
use crate::particle::{Particle, ParticleSystem, ReactionForceField};

/// Upper Reynolds number of the Stokes regime.
pub const STOKES_LIMIT: Float = 0.1;
/// Reynolds number above which the drag coefficient is constant.
pub const NEWTON_LIMIT: Float = 1000.0;
pub const NEWTON_DRAG_COEFFICIENT: Float = 0.44;

#[inline]
fn schiller_naumann(re: Float) -> Float {
    24.0 / re * (1.0 + 0.15 * re.powf(0.687))
}

/// Factor that makes the Schiller-Naumann branch meet the Stokes value at
/// `STOKES_LIMIT` and the Newton value at `NEWTON_LIMIT`, varying log-linearly
/// in between. It stays within 3% of unity over the whole branch.
#[inline]
fn regime_match(re: Float) -> Float {
    let low = (24.0 / STOKES_LIMIT / schiller_naumann(STOKES_LIMIT)).ln();
    let high = (NEWTON_DRAG_COEFFICIENT / schiller_naumann(NEWTON_LIMIT)).ln();
    let t = (re.ln() - STOKES_LIMIT.ln()) / (NEWTON_LIMIT.ln() - STOKES_LIMIT.ln());
    (low + (high - low) * t).exp()
}

/// Drag coefficient of a sphere, continuous across both regime boundaries.
pub fn drag_coefficient(reynolds: Float) -> Float {
    let re = reynolds.max(Float::MIN_POSITIVE);
    if re < STOKES_LIMIT {
        24.0 / re
    } else if re < NEWTON_LIMIT {
        schiller_naumann(re) * regime_match(re)
    } else {
        NEWTON_DRAG_COEFFICIENT
    }
}

/// `alpha * fresh + (1 - alpha) * previous`
#[inline]
pub fn under_relax(alpha: Float, fresh: Vector3<Float>, previous: Vector3<Float>) -> Vector3<Float> {
    fresh * alpha + previous * (1.0 - alpha)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CouplingReport {
    pub active: usize,
    pub deactivated: usize,
    /// Sum of the drag applied to all particles this step
    pub total_drag: Vector3<Float>,
    /// Sum of everything written into the reaction field this step
    pub total_reaction: Vector3<Float>,
    pub max_reynolds: Float,
}

enum Outcome {
    Inactive,
    Deactivated,
    Coupled { drag: Vector3<Float>, reynolds: Float },
}

#[derive(Debug, Clone)]
pub struct ParticleMomentumCoupler {
    pub alpha: Float,
    pub max_drag_acceleration: Float,
    pub min_relative_speed: Float,
    /// Dynamic viscosity of the carrier fluid
    pub viscosity: Float,
    /// Used when every corner of a particle's cell is solid
    pub reference_density: Float,
}

impl ParticleMomentumCoupler {
    pub fn new(particles: &ParticleConfig, physics: &PhysicsConfig) -> Self {
        Self {
            alpha: particles.relaxation_alpha,
            max_drag_acceleration: particles.max_drag_acceleration,
            min_relative_speed: particles.min_relative_speed,
            viscosity: physics.density * physics.water_viscosity(),
            reference_density: physics.density,
        }
    }

    /// Rebuild the reaction field and update every particle's drag history.
    pub fn couple(&self, view: &FluidFieldView, system: &mut ParticleSystem) -> CouplingReport {
        system.clear_reaction();
        let (particles, reaction) = system.coupling_parts();

        let report = particles
            .par_iter_mut()
            .map(|p| self.couple_particle(view, reaction, p))
            .fold(CouplingReport::default, |mut report, outcome| {
                match outcome {
                    Outcome::Inactive => {}
                    Outcome::Deactivated => report.deactivated += 1,
                    Outcome::Coupled { drag, reynolds } => {
                        report.active += 1;
                        report.total_drag += drag;
                        report.max_reynolds = report.max_reynolds.max(reynolds);
                    }
                }
                report
            })
            .reduce(CouplingReport::default, |a, b| CouplingReport {
                active: a.active + b.active,
                deactivated: a.deactivated + b.deactivated,
                total_drag: a.total_drag + b.total_drag,
                total_reaction: Vector3::zeros(),
                max_reynolds: a.max_reynolds.max(b.max_reynolds),
            });

        let total = reaction.total();
        let report = CouplingReport {
            total_reaction: Vector3::new(total[0], total[1], total[2]),
            ..report
        };

        if report.deactivated > 0 {
            warn!("Deactivated {} particles with invalid state", report.deactivated);
        }
        system.record_errors(report.deactivated);
        debug!(
            "Coupled {} particles, total drag {:?}, max Re {:.3}",
            report.active, report.total_drag, report.max_reynolds
        );
        report
    }

    fn couple_particle(
        &self,
        view: &FluidFieldView,
        reaction: &ReactionForceField,
        p: &mut Particle,
    ) -> Outcome {
        if !p.active {
            return Outcome::Inactive;
        }
        if !p.is_valid() {
            p.deactivate();
            return Outcome::Deactivated;
        }
        let Some(stencil) = view.trilinear_stencil(&p.position) else {
            p.deactivate();
            return Outcome::Deactivated;
        };

        let mut fluid_velocity = Vector3::zeros();
        for &(idx, w) in &stencil {
            let u = view.velocity.data[idx];
            fluid_velocity += Vector3::new(u[0], u[1], u[2]) * w;
        }
        let density = view
            .sample_density(&p.position)
            .unwrap_or(self.reference_density);
        p.fluid_velocity = fluid_velocity;

        let relative = fluid_velocity - p.velocity;
        let speed = relative.norm();
        if speed < self.min_relative_speed {
            p.reynolds = 0.0;
            p.drag_force = Vector3::zeros();
            p.previous_drag = Vector3::zeros();
            return Outcome::Coupled {
                drag: Vector3::zeros(),
                reynolds: 0.0,
            };
        }

        let reynolds = density * speed * 2.0 * p.radius / self.viscosity;
        let cd = drag_coefficient(reynolds);
        let area = PI * p.radius * p.radius;
        let ceiling = self.max_drag_acceleration * p.mass;
        // Quadratic law: F = 0.5 rho Cd A |u_rel| u_rel, so |F| scales with |u_rel|^2
        let magnitude = (0.5 * density * cd * area * speed * speed).min(ceiling);
        let fresh = relative * (magnitude / speed);

        let applied = under_relax(self.alpha, fresh, p.previous_drag);
        p.previous_drag = applied;
        p.drag_force = applied;
        p.reynolds = reynolds;

        for &(idx, w) in &stencil {
            if w > 0.0 {
                reaction.add(idx, [-applied.x * w, -applied.y * w, -applied.z * w]);
            }
        }

        Outcome::Coupled {
            drag: applied,
            reynolds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GridDims;
    use crate::macroscopic::MacroscopicFields;
    use proptest::prelude::*;

    fn coupler(alpha: Float) -> ParticleMomentumCoupler {
        ParticleMomentumCoupler {
            alpha,
            max_drag_acceleration: 1.0,
            min_relative_speed: 1e-8,
            viscosity: 0.1,
            reference_density: 1.0,
        }
    }

    fn uniform_fields(dims: GridDims, u: [Float; 3]) -> MacroscopicFields {
        let mut fields = MacroscopicFields::new(dims);
        for idx in 0..dims.len() {
            fields.set(idx, 1.0, u);
        }
        fields
    }

    #[test]
    fn test_drag_law_regimes() {
        assert!((drag_coefficient(0.05) - 480.0).abs() < 1e-9);
        assert_eq!(drag_coefficient(5000.0), NEWTON_DRAG_COEFFICIENT);
        // Within a few percent of plain Schiller-Naumann in the middle regime
        let re = 10.0;
        assert!((drag_coefficient(re) / schiller_naumann(re) - 1.0).abs() < 0.03);
    }

    #[test]
    fn test_drag_law_continuity() {
        for boundary in [STOKES_LIMIT, NEWTON_LIMIT] {
            let eps = boundary * 1e-12;
            let below = drag_coefficient(boundary - eps);
            let at = drag_coefficient(boundary);
            let above = drag_coefficient(boundary + eps);
            assert!((below - at).abs() / at < 1e-9, "jump below {}", boundary);
            assert!((above - at).abs() / at < 1e-9, "jump above {}", boundary);
        }
    }

    #[test]
    fn test_under_relaxation_halves_error() {
        let target = Vector3::new(5.0, 0.0, 0.0);
        let mut previous = Vector3::zeros();
        let mut error = (previous - target).norm();
        for _ in 0..10 {
            previous = under_relax(0.5, target, previous);
            let next_error = (previous - target).norm();
            assert!((next_error - 0.5 * error).abs() < 1e-12);
            error = next_error;
        }
    }

    #[test]
    fn test_momentum_reciprocity() {
        let dims = GridDims::new(6, 6, 6);
        let fields = uniform_fields(dims, [0.01, -0.02, 0.005]);
        let solid = vec![false; dims.len()];
        let view = fields.view(&solid);

        let mut system = ParticleSystem::new(dims);
        for n in 0..20 {
            let t = n as Float * 0.2;
            let mut p = Particle::new(Vector3::new(1.0 + t, 2.5, 1.2 + 0.1 * t), 0.3, 1.5);
            p.velocity = Vector3::new(0.0, 0.0, -0.01 * t);
            system.push(p);
        }
        // Several particles share nodes
        system.push(Particle::new(Vector3::new(2.5, 2.5, 2.5), 0.3, 1.5));
        system.push(Particle::new(Vector3::new(2.5, 2.5, 2.5), 0.4, 1.5));

        let report = coupler(0.8).couple(&view, &mut system);
        assert_eq!(report.active, 22);
        let drag_sum: Vector3<Float> = system.particles().iter().map(|p| p.drag_force).sum();
        assert!((drag_sum - report.total_drag).norm() < 1e-15);
        assert!((report.total_drag + report.total_reaction).norm() < 1e-14);
        assert!(report.total_drag.norm() > 0.0);
    }

    #[test]
    fn test_uncapped_drag_matches_quadratic_law() {
        let dims = GridDims::new(4, 4, 4);
        let fields = uniform_fields(dims, [0.0, 0.0, -0.02]);
        let solid = vec![false; dims.len()];
        let mut system = ParticleSystem::new(dims);
        system.push(Particle::new(Vector3::new(1.5, 1.5, 1.5), 0.3, 1.5));

        // alpha = 1 and a ceiling of 1 per unit mass leave the fresh drag untouched
        coupler(1.0).couple(&fields.view(&solid), &mut system);
        let p = &system.particles()[0];

        let re = 1.0 * 0.02 * 2.0 * 0.3 / 0.1;
        let magnitude = 0.5 * 1.0 * drag_coefficient(re) * PI * 0.3 * 0.3 * 0.02 * 0.02;
        assert!(magnitude < p.mass);
        assert!((p.reynolds - re).abs() < 1e-12);
        assert!(p.drag_force.x.abs() < 1e-18 && p.drag_force.y.abs() < 1e-18);
        assert!((p.drag_force.z + magnitude).abs() < 1e-12 * magnitude);
    }

    #[test]
    fn test_drag_is_capped_by_mass() {
        let dims = GridDims::new(4, 4, 4);
        let fields = uniform_fields(dims, [0.3, 0.0, 0.0]);
        let solid = vec![false; dims.len()];
        let mut system = ParticleSystem::new(dims);
        system.push(Particle::with_mass(Vector3::new(1.5, 1.5, 1.5), 0.45, 0.01));

        let mut c = coupler(1.0);
        c.max_drag_acceleration = 0.1;
        c.couple(&fields.view(&solid), &mut system);
        let p = &system.particles()[0];
        assert!((p.drag_force.norm() - 0.001).abs() < 1e-15);
        assert!(p.drag_force.x > 0.0);
    }

    #[test]
    fn test_negligible_relative_speed_skips_distribution() {
        let dims = GridDims::new(4, 4, 4);
        let fields = uniform_fields(dims, [0.01, 0.0, 0.0]);
        let solid = vec![false; dims.len()];
        let mut system = ParticleSystem::new(dims);
        let mut p = Particle::new(Vector3::new(1.5, 1.5, 1.5), 0.3, 1.2);
        p.velocity = Vector3::new(0.01, 0.0, 0.0);
        p.previous_drag = Vector3::new(1.0, 0.0, 0.0);
        system.push(p);

        let report = coupler(0.8).couple(&fields.view(&solid), &mut system);
        assert_eq!(report.total_reaction, Vector3::zeros());
        assert_eq!(system.particles()[0].drag_force, Vector3::zeros());
    }

    #[test]
    fn test_invalid_particles_are_deactivated() {
        let dims = GridDims::new(4, 4, 4);
        let fields = uniform_fields(dims, [0.01, 0.0, 0.0]);
        let solid = vec![false; dims.len()];
        let mut system = ParticleSystem::new(dims);
        system.push(Particle::with_mass(Vector3::new(1.5, 1.5, 1.5), 0.3, -1.0));
        system.push(Particle::new(Vector3::new(Float::NAN, 1.5, 1.5), 0.3, 1.2));
        system.push(Particle::new(Vector3::new(9.0, 1.5, 1.5), 0.3, 1.2));
        system.push(Particle::new(Vector3::new(1.5, 1.5, 1.5), 0.3, 1.2));

        let report = coupler(0.8).couple(&fields.view(&solid), &mut system);
        assert_eq!(report.deactivated, 3);
        assert_eq!(report.active, 1);
        assert_eq!(system.error_count(), 3);
        assert_eq!(system.active_count(), 1);
        assert!((report.total_drag + report.total_reaction).norm() < 1e-15);

        // Deactivated particles stay in the system but are skipped from then on
        let again = coupler(0.8).couple(&fields.view(&solid), &mut system);
        assert_eq!(again.deactivated, 0);
        assert_eq!(system.len(), 4);
    }

    proptest! {
        #[test]
        fn prop_drag_coefficient_positive_and_decreasing(re in 1e-3f64..1e4) {
            let cd = drag_coefficient(re);
            prop_assert!(cd.is_finite() && cd > 0.0);
            prop_assert!(drag_coefficient(re * 1.01) <= cd + 1e-12);
        }
    }
}
