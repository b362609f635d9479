pub mod boundary;
pub mod collision;
pub mod config;
pub mod coupling;
pub mod distribution;
pub mod error;
pub mod external;
pub mod forcing;
pub mod geometry;
pub mod lattice;
pub mod macroscopic;
pub mod particle;
pub mod simulation;
pub mod solver;

pub use boundary::{BoundaryConditionManager, BoundaryConditions};
pub use config::Config;
pub use coupling::{CouplingReport, ParticleMomentumCoupler};
pub use distribution::DistributionStore;
pub use error::{BoundaryError, ConfigError, SolverError};
pub use external::ExternalInputs;
pub use forcing::{BodyForceAccumulator, VectorField};
pub use geometry::{Geometry, GridDims};
pub use lattice::D3Q19;
pub use macroscopic::{FluidFieldView, MacroscopicFields};
pub use particle::{Particle, ParticleSystem, ReactionForceField};
pub use simulation::CoupledSimulation;
pub use solver::{LatticeBoltzmannCore, StepReport};

pub type Float = f64;
