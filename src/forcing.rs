//! Guo forcing, relaxation-time selection, and the per-step body-force accumulator.

use rayon::prelude::*;

use crate::Float;
use crate::geometry::GridDims;
use crate::lattice::D3Q19;
use crate::particle::ReactionForceField;

/// Bound on |S(q)| for the Guo source term, applied in every forcing evaluation.
pub const MAX_FORCING: Float = 0.01;

/// Stability window for the local relaxation time.
pub const TAU_MIN: Float = 0.55;
pub const TAU_MAX: Float = 1.9;

/// Per-node 3-vector field, same shape as the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField {
    pub dims: GridDims,
    pub data: Vec<[Float; 3]>,
}

impl VectorField {
    pub fn zeros(dims: GridDims) -> Self {
        Self {
            dims,
            data: vec![[0.0; 3]; dims.len()],
        }
    }

    pub fn uniform(dims: GridDims, value: [Float; 3]) -> Self {
        Self {
            dims,
            data: vec![value; dims.len()],
        }
    }

    #[inline]
    pub fn get(&self, idx: usize) -> [Float; 3] {
        self.data[idx]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn fill(&mut self, value: [Float; 3]) {
        self.data.fill(value);
    }

    pub fn sum(&self) -> [Float; 3] {
        self.data.iter().fold([0.0; 3], |acc, v| {
            [acc[0] + v[0], acc[1] + v[1], acc[2] + v[2]]
        })
    }
}

/// Guo source term for direction `q`, clamped to `MAX_FORCING`.
///
/// `w (1 - 1/2tau) [3 (e - u)·F + 9 (e·u)(e·F)]`, the full Guo form. This
/// departs from the shorter `3 (e·F) + 9 (e·u)(e·F)` bracket, which sums over
/// `q` to a mass source of `3 (1 - 1/2tau) u·F` per node. The extra `-3 u·F`
/// term gives a zero zeroth moment and vanishes at `u = 0`. `velocity` is the
/// half-force corrected velocity.
#[inline]
pub fn guo_source(q: usize, tau: Float, velocity: [Float; 3], force: [Float; 3]) -> Float {
    if force == [0.0; 3] {
        return 0.0;
    }
    let ef = D3Q19::project(q, force);
    let eu = D3Q19::project(q, velocity);
    let uf = velocity[0] * force[0] + velocity[1] * force[1] + velocity[2] * force[2];
    let prefactor = D3Q19::WEIGHTS[q] * (1.0 - 0.5 / tau);
    let s = prefactor * (3.0 * (ef - uf) + 9.0 * eu * ef);
    s.clamp(-MAX_FORCING, MAX_FORCING)
}

/// Local relaxation time from the water fraction and an optional eddy viscosity.
///
/// Molecular part blends water and air linearly in the phase fraction; the
/// turbulent part adds `nu_t / cs^2`. The result is clamped to `[TAU_MIN, TAU_MAX]`.
#[inline]
pub fn relaxation_time(
    phase_fraction: Float,
    tau_water: Float,
    tau_air: Float,
    eddy_viscosity: Float,
) -> Float {
    let phi = phase_fraction.clamp(0.0, 1.0);
    let molecular = phi * tau_water + (1.0 - phi) * tau_air;
    let turbulent = eddy_viscosity.max(0.0) / D3Q19::CS2;
    let tau = molecular + turbulent;
    if tau.is_nan() {
        return TAU_MAX;
    }
    tau.clamp(TAU_MIN, TAU_MAX)
}

/// Total body force per node for the current step.
///
/// Zeroed at the start of every step, then gravity, external resistance and
/// tension forces, and the particle reaction field are summed into it.
#[derive(Debug, Clone)]
pub struct BodyForceAccumulator {
    field: VectorField,
}

impl BodyForceAccumulator {
    pub fn new(dims: GridDims) -> Self {
        Self {
            field: VectorField::zeros(dims),
        }
    }

    pub fn zero(&mut self) {
        self.field.fill([0.0; 3]);
    }

    #[inline]
    pub fn force(&self, idx: usize) -> [Float; 3] {
        self.field.data[idx]
    }

    pub fn field(&self) -> &VectorField {
        &self.field
    }

    /// Gravity as a force density `rho * g`, scaled down in the air phase.
    pub fn add_gravity(
        &mut self,
        density: &[Float],
        phase_fraction: Option<&[Float]>,
        gravity: [Float; 3],
        air_gravity_scale: Float,
        solid: &[bool],
    ) {
        if gravity == [0.0; 3] {
            return;
        }
        self.field
            .data
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, f)| {
                if solid[idx] {
                    return;
                }
                let phi = phase_fraction.map_or(1.0, |p| p[idx].clamp(0.0, 1.0));
                let scale = density[idx] * (phi + (1.0 - phi) * air_gravity_scale);
                f[0] += scale * gravity[0];
                f[1] += scale * gravity[1];
                f[2] += scale * gravity[2];
            });
    }

    /// Add an externally computed force field (porous resistance, surface tension).
    pub fn add_field(&mut self, other: &VectorField) {
        self.field
            .data
            .par_iter_mut()
            .zip(other.data.par_iter())
            .for_each(|(f, g)| {
                f[0] += g[0];
                f[1] += g[1];
                f[2] += g[2];
            });
    }

    /// Merge the particle reaction forces from the last coupling step.
    pub fn add_reaction_forces(&mut self, reaction: &ReactionForceField) {
        self.field
            .data
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, f)| {
                let r = reaction.get(idx);
                f[0] += r[0];
                f[1] += r[1];
                f[2] += r[2];
            });
    }
}
