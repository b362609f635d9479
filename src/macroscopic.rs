use nalgebra::Vector3;
use rayon::prelude::*;

use crate::Float;
use crate::distribution::DistributionStore;
use crate::forcing::{BodyForceAccumulator, VectorField};
use crate::geometry::GridDims;
use crate::lattice::D3Q19;

/// Below this density the velocity is reported as zero.
pub const DENSITY_FLOOR: Float = 1e-12;

/// Density, velocity and cached `|u|^2` for every node.
///
/// Solid nodes carry zero density and zero velocity; they are never read as fluid.
#[derive(Debug, Clone)]
pub struct MacroscopicFields {
    pub dims: GridDims,
    pub density: Vec<Float>,
    pub velocity: VectorField,
    pub speed_sq: Vec<Float>,
}

impl MacroscopicFields {
    pub fn new(dims: GridDims) -> Self {
        Self {
            dims,
            density: vec![0.0; dims.len()],
            velocity: VectorField::zeros(dims),
            speed_sq: vec![0.0; dims.len()],
        }
    }

    /// Recompute every fluid node from the front populations.
    ///
    /// `u = (sum f e + F/2) / rho`, the half-force term being the Guo correction.
    pub fn compute(
        &mut self,
        store: &DistributionStore,
        solid: &[bool],
        forces: &BodyForceAccumulator,
    ) {
        self.density
            .par_iter_mut()
            .zip(self.velocity.data.par_iter_mut())
            .zip(self.speed_sq.par_iter_mut())
            .enumerate()
            .for_each(|(idx, ((rho, u), u2))| {
                if solid[idx] {
                    *rho = 0.0;
                    *u = [0.0; 3];
                    *u2 = 0.0;
                    return;
                }
                let (density, velocity) = moments(&store.node(idx), forces.force(idx));
                *rho = density;
                *u = velocity;
                *u2 = velocity[0] * velocity[0] + velocity[1] * velocity[1] + velocity[2] * velocity[2];
            });
    }

    /// Overwrite one node, keeping the cached speed in sync.
    #[inline]
    pub fn set(&mut self, idx: usize, density: Float, velocity: [Float; 3]) {
        self.density[idx] = density;
        self.velocity.data[idx] = velocity;
        self.speed_sq[idx] = velocity[0] * velocity[0] + velocity[1] * velocity[1] + velocity[2] * velocity[2];
    }

    pub fn view<'a>(&'a self, solid: &'a [bool]) -> FluidFieldView<'a> {
        FluidFieldView {
            dims: self.dims,
            density: &self.density,
            velocity: &self.velocity,
            solid,
        }
    }
}

/// Density and Guo-corrected velocity of a single population set.
#[inline]
pub fn moments(f: &[Float; 19], force: [Float; 3]) -> (Float, [Float; 3]) {
    let mut density = 0.0;
    let mut momentum = [0.0; 3];
    for (q, fq) in f.iter().enumerate() {
        density += fq;
        let c = D3Q19::VELOCITIES[q];
        momentum[0] += fq * c[0] as Float;
        momentum[1] += fq * c[1] as Float;
        momentum[2] += fq * c[2] as Float;
    }
    if density > DENSITY_FLOOR {
        let velocity = [
            (momentum[0] + 0.5 * force[0]) / density,
            (momentum[1] + 0.5 * force[1]) / density,
            (momentum[2] + 0.5 * force[2]) / density,
        ];
        (density, velocity)
    } else {
        (density, [0.0; 3])
    }
}

/// Read-only view of the fluid state handed to collaborators.
#[derive(Debug, Clone, Copy)]
pub struct FluidFieldView<'a> {
    pub dims: GridDims,
    pub density: &'a [Float],
    pub velocity: &'a VectorField,
    pub solid: &'a [bool],
}

impl<'a> FluidFieldView<'a> {
    /// The 8 enclosing nodes and their trilinear weights, or `None` when the
    /// point is non-finite or outside the node hull.
    pub fn trilinear_stencil(&self, position: &Vector3<Float>) -> Option<[(usize, Float); 8]> {
        trilinear_stencil(self.dims, position)
    }

    pub fn sample_velocity(&self, position: &Vector3<Float>) -> Option<Vector3<Float>> {
        let stencil = self.trilinear_stencil(position)?;
        let mut u = Vector3::zeros();
        for (idx, w) in stencil {
            let v = self.velocity.data[idx];
            u += Vector3::new(v[0], v[1], v[2]) * w;
        }
        Some(u)
    }

    /// Density averaged over the fluid corners only; `None` if all corners are solid.
    pub fn sample_density(&self, position: &Vector3<Float>) -> Option<Float> {
        let stencil = self.trilinear_stencil(position)?;
        let (mut sum, mut weight) = (0.0, 0.0);
        for (idx, w) in stencil {
            if !self.solid[idx] {
                sum += self.density[idx] * w;
                weight += w;
            }
        }
        (weight > 0.0).then(|| sum / weight)
    }

    /// Solid flag of the nearest node, or `None` outside the node hull.
    pub fn is_solid_at(&self, position: &Vector3<Float>) -> Option<bool> {
        if !self.dims.contains_point(position) {
            return None;
        }
        let i = position.x.round() as usize;
        let j = position.y.round() as usize;
        let k = position.z.round() as usize;
        Some(self.solid[self.dims.index(i, j, k)])
    }

    pub fn max_speed(&self) -> Float {
        self.velocity
            .data
            .iter()
            .zip(self.solid)
            .filter(|(_, s)| !**s)
            .map(|(v, _)| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt())
            .fold(0.0, Float::max)
    }
}

pub fn trilinear_stencil(dims: GridDims, position: &Vector3<Float>) -> Option<[(usize, Float); 8]> {
    if !position.iter().all(|c| c.is_finite()) || !dims.contains_point(position) {
        return None;
    }
    let axis = |p: Float, n: usize| -> (usize, Float) {
        if n < 2 {
            return (0, 0.0);
        }
        let base = (p.floor() as usize).min(n - 2);
        (base, (p - base as Float).clamp(0.0, 1.0))
    };
    let (i0, fx) = axis(position.x, dims.nx);
    let (j0, fy) = axis(position.y, dims.ny);
    let (k0, fz) = axis(position.z, dims.nz);
    let step = |n: usize| usize::from(n >= 2);
    let (di, dj, dk) = (step(dims.nx), step(dims.ny), step(dims.nz));

    let mut stencil = [(0usize, 0.0); 8];
    let mut corner = 0;
    for (oz, wz) in [(0, 1.0 - fz), (dk, fz)] {
        for (oy, wy) in [(0, 1.0 - fy), (dj, fy)] {
            for (ox, wx) in [(0, 1.0 - fx), (di, fx)] {
                stencil[corner] = (dims.index(i0 + ox, j0 + oy, k0 + oz), wx * wy * wz);
                corner += 1;
            }
        }
    }
    Some(stencil)
}
