use crate::Float;

/// Step-level solver failures. Any of these halts the outer loop.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("Velocity diverged at step {step}, node {node:?}: |u| = {speed} exceeds limit {limit}")]
    Divergence {
        step: u64,
        node: (usize, usize, usize),
        speed: Float,
        limit: Float,
    },
    #[error("Non-finite macroscopic state at step {step}, node {node:?}")]
    NonFinite {
        step: u64,
        node: (usize, usize, usize),
    },
    #[error("External field `{name}` has {actual} entries, grid has {expected}")]
    FieldShape {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Particle system was built for {actual} nodes, solver grid has {expected}")]
    ParticleGridMismatch { expected: usize, actual: usize },
}

/// Failures raised by a boundary-condition implementation.
#[derive(Debug, thiserror::Error)]
pub enum BoundaryError {
    #[error("Boundary buffer `{name}` has {actual} entries, expected {expected}")]
    ShapeMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Axis {axis} has {len} nodes; boundary extrapolation needs at least 3")]
    DegenerateAxis { axis: char, len: usize },
    #[error("Boundary rule `{rule}` failed: {reason}")]
    Rule { rule: &'static str, reason: String },
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Grid dimensions must be at least 3 nodes along each axis, got {nx}x{ny}x{nz}")]
    InvalidDimensions { nx: usize, ny: usize, nz: usize },
    #[error("Wall thickness {thickness} leaves no fluid interior")]
    InvalidWallThickness { thickness: usize },
    #[error("Relaxation time {name} = {value} must lie in (0.5, 2.0]")]
    InvalidRelaxationTime { name: &'static str, value: Float },
    #[error("Reference density must be positive, got {0}")]
    InvalidDensity(Float),
    #[error("Under-relaxation factor must lie in (0, 1], got {0}")]
    InvalidRelaxationFactor(Float),
    #[error("Mach limit must lie in (0, 1), got {0}")]
    InvalidMachLimit(Float),
    #[error("Drag acceleration ceiling must be positive, got {0}")]
    InvalidDragCeiling(Float),
    #[error("Bed slab z range [{z_min}, {z_max}] is empty or outside the domain")]
    InvalidBedBounds { z_min: Float, z_max: Float },
    #[error("Bed particle {name} must be positive, got {value}")]
    InvalidBedParticle { name: &'static str, value: Float },
}
