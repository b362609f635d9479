use log::info;

use crate::Float;
use crate::config::Config;
use crate::coupling::{CouplingReport, ParticleMomentumCoupler};
use crate::error::{ConfigError, SolverError};
use crate::external::ExternalInputs;
use crate::geometry::Geometry;
use crate::particle::ParticleSystem;
use crate::solver::{LatticeBoltzmannCore, StepReport};

/// Fluid core, particle bed and the two-way coupling between them.
///
/// Each step the grid first receives the reaction forces left by the previous
/// coupling pass, then the fluid advances, then particles are coupled against
/// the fresh fields and optionally moved.
pub struct CoupledSimulation {
    config: Config,
    core: LatticeBoltzmannCore,
    particles: ParticleSystem,
    coupler: ParticleMomentumCoupler,
}

impl CoupledSimulation {
    pub fn new(config: Config, geometry: Geometry) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut core = LatticeBoltzmannCore::new(config.physics.clone(), geometry);
        core.initialize_uniform(config.physics.density, config.simulation.initial_velocity);
        let particles = match &config.particles.bed {
            Some(bed) => ParticleSystem::pack_bed(bed, core.geometry()),
            None => ParticleSystem::new(core.dims()),
        };
        Ok(Self::from_parts(config, core, particles))
    }

    /// Assemble from an already prepared core and particle set.
    pub fn from_parts(config: Config, core: LatticeBoltzmannCore, particles: ParticleSystem) -> Self {
        let coupler = ParticleMomentumCoupler::new(&config.particles, &config.physics);
        Self {
            config,
            core,
            particles,
            coupler,
        }
    }

    pub fn core(&self) -> &LatticeBoltzmannCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut LatticeBoltzmannCore {
        &mut self.core
    }

    pub fn particles(&self) -> &ParticleSystem {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut ParticleSystem {
        &mut self.particles
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn step(&mut self) -> Result<(StepReport, CouplingReport), SolverError> {
        self.step_with(&ExternalInputs::none())
    }

    pub fn step_with(
        &mut self,
        external: &ExternalInputs,
    ) -> Result<(StepReport, CouplingReport), SolverError> {
        self.core.begin_step(external)?;
        self.core.add_reaction_forces(&self.particles)?;
        let fluid = self.core.advance()?;

        let view = self.core.view();
        let coupling = self.coupler.couple(&view, &mut self.particles);
        if self.config.particles.integrate {
            self.particles.integrate(
                &view,
                self.config.physics.gravity,
                self.config.physics.density,
                1.0,
            );
        }
        Ok((fluid, coupling))
    }

    /// Run `steps` coupled steps, logging every `log_frequency` steps and
    /// handing each pair of reports to `on_step`.
    pub fn run<F>(&mut self, steps: usize, mut on_step: F) -> Result<(), SolverError>
    where
        F: FnMut(&StepReport, &CouplingReport),
    {
        let log_every = self.config.simulation.log_frequency.max(1);
        let initial_mass = self.core.total_mass();
        info!(
            "Running {} steps with {} particles (initial mass {:.6})",
            steps,
            self.particles.len(),
            initial_mass
        );

        for n in 0..steps {
            let (fluid, coupling) = self.step()?;
            if (n + 1) % log_every == 0 {
                let drift: Float = (fluid.total_mass - initial_mass) / initial_mass;
                info!(
                    "Step {}: max |u| {:.5}, mass drift {:.3e}, {} active particles, max Re {:.3}",
                    fluid.step, fluid.max_speed, drift, coupling.active, coupling.max_reynolds
                );
            }
            on_step(&fluid, &coupling);
        }

        info!(
            "Finished after {} steps; {} particles deactivated",
            self.core.step_count(),
            self.particles.error_count()
        );
        Ok(())
    }
}
