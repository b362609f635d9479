//! Fused BGK collision and streaming with in-kernel bounce-back.
//!
//! The sweep is written in pull form: slot `(q, x)` of the back buffer receives
//! the post-collision population `q` of its upstream node `x - e_q`. This is the
//! same assignment as pushing `f_post(x, q)` to `x + e_q`, but every write target
//! is owned by exactly one task, so directions and nodes run in parallel without
//! locks.
//!
//! | upstream `x - e_q`     | value written to `(q, x)`              |
//! |------------------------|----------------------------------------|
//! | in domain, fluid       | `f_post(x - e_q, q)`                   |
//! | in domain, solid       | `f_post(x, opp(q))` (bounce-back)      |
//! | below the floor `k=0`  | `f_post(x, opp(q))` (bounce-back)      |
//! | outside, other faces   | untouched, rebuilt by the boundary pass |

use rayon::prelude::*;

use crate::Float;
use crate::distribution::DistributionStore;
use crate::forcing::{BodyForceAccumulator, guo_source};
use crate::lattice::{D3Q19, equilibrium};
use crate::macroscopic::MacroscopicFields;

#[derive(Debug, Default, Clone, Copy)]
pub struct CollisionStreamingEngine;

impl CollisionStreamingEngine {
    pub fn new() -> Self {
        Self
    }

    /// `f - (f - f_eq) / tau + S`
    #[inline]
    pub fn post_collision(
        q: usize,
        f: Float,
        density: Float,
        velocity: [Float; 3],
        speed_sq: Float,
        tau: Float,
        force: [Float; 3],
    ) -> Float {
        let f_eq = equilibrium(q, density, velocity, speed_sq);
        f - (f - f_eq) / tau + guo_source(q, tau, velocity, force)
    }

    /// Collide every fluid node, stream into the back buffer, then swap buffers.
    pub fn collide_and_stream(
        &self,
        store: &mut DistributionStore,
        fields: &MacroscopicFields,
        forces: &BodyForceAccumulator,
        tau: &[Float],
        solid: &[bool],
    ) {
        let dims = store.dims();
        let n = dims.len();
        let layer = dims.nx * dims.ny;
        let (front, back) = store.read_write();

        let post = |q: usize, node: usize| {
            Self::post_collision(
                q,
                front[q * n + node],
                fields.density[node],
                fields.velocity.data[node],
                fields.speed_sq[node],
                tau[node],
                forces.force(node),
            )
        };

        back.par_chunks_mut(n).enumerate().for_each(|(q, slot)| {
            let c = D3Q19::VELOCITIES[q];
            let upstream = [-c[0], -c[1], -c[2]];
            let opposite = D3Q19::OPPOSITE[q];

            slot.par_iter_mut().enumerate().for_each(|(idx, out)| {
                if solid[idx] {
                    *out = front[q * n + idx];
                    return;
                }
                match dims.offset(idx, upstream) {
                    Some(source) if !solid[source] => *out = post(q, source),
                    Some(_) => *out = post(opposite, idx),
                    None if idx < layer && c[2] > 0 => *out = post(opposite, idx),
                    None => {}
                }
            });
        });

        store.swap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Geometry, GridDims};
    use crate::lattice::equilibrium_set;

    fn relaxation(dims: GridDims, tau: Float) -> Vec<Float> {
        vec![tau; dims.len()]
    }

    #[test]
    fn test_post_collision_at_equilibrium_is_identity() {
        let f = equilibrium_set(1.05, [0.01, 0.02, -0.01]);
        let u2 = 0.01 * 0.01 + 0.02 * 0.02 + 0.01 * 0.01;
        for q in 0..D3Q19::Q {
            let post = CollisionStreamingEngine::post_collision(
                q,
                f[q],
                1.05,
                [0.01, 0.02, -0.01],
                u2,
                0.8,
                [0.0; 3],
            );
            assert!((post - f[q]).abs() < 1e-15);
        }
    }

    #[test]
    fn test_streaming_moves_populations_downstream() {
        let dims = GridDims::new(5, 5, 5);
        let geometry = Geometry::enclosed(dims, 1);
        let mut store = DistributionStore::new(dims, 1.0);
        let centre = dims.index(2, 2, 2);
        // tau = 1 means post-collision equals equilibrium, so perturb via the macros
        let mut fields = MacroscopicFields::new(dims);
        let forces = BodyForceAccumulator::new(dims);
        fields.compute(&store, geometry.solid_mask(), &forces);
        fields.set(centre, 1.0, [0.05, 0.0, 0.0]);

        let engine = CollisionStreamingEngine::new();
        engine.collide_and_stream(
            &mut store,
            &fields,
            &forces,
            &relaxation(dims, 1.0),
            geometry.solid_mask(),
        );

        let expected = equilibrium_set(1.0, [0.05, 0.0, 0.0]);
        let east = dims.index(3, 2, 2);
        let west = dims.index(1, 2, 2);
        assert!((store.get(1, east) - expected[1]).abs() < 1e-15);
        assert!((store.get(2, west) - expected[2]).abs() < 1e-15);
        assert!((store.get(0, centre) - expected[0]).abs() < 1e-15);
    }

    #[test]
    fn test_isolated_node_bounces_every_population() {
        let dims = GridDims::new(3, 3, 3);
        let geometry = Geometry::enclosed(dims, 1);
        let centre = dims.index(1, 1, 1);
        let mut store = DistributionStore::new(dims, 1.0);

        let mut f = equilibrium_set(1.0, [0.0; 3]);
        f[1] += 0.01; // +x
        f[9] += 0.005; // (-1, 1, 0)
        f[10] += 0.005; // (-1, -1, 0)
        f[5] += 0.003; // +z
        f[6] += 0.003; // -z
        store.set_node(centre, &f);

        let forces = BodyForceAccumulator::new(dims);
        let mut fields = MacroscopicFields::new(dims);
        fields.compute(&store, geometry.solid_mask(), &forces);
        assert!(fields.speed_sq[centre] < 1e-30);

        let tau = 0.8;
        let post: Vec<Float> = (0..D3Q19::Q)
            .map(|q| {
                CollisionStreamingEngine::post_collision(
                    q,
                    f[q],
                    fields.density[centre],
                    fields.velocity.data[centre],
                    fields.speed_sq[centre],
                    tau,
                    [0.0; 3],
                )
            })
            .collect();

        CollisionStreamingEngine::new().collide_and_stream(
            &mut store,
            &fields,
            &forces,
            &relaxation(dims, tau),
            geometry.solid_mask(),
        );

        for q in 0..D3Q19::Q {
            let got = store.get(q, centre);
            assert!(
                (got - post[D3Q19::OPPOSITE[q]]).abs() < 1e-15,
                "slot {} holds {}, expected {}",
                q,
                got,
                post[D3Q19::OPPOSITE[q]]
            );
        }
        fields.compute(&store, geometry.solid_mask(), &forces);
        assert!(fields.speed_sq[centre].sqrt() < 1e-15);
    }

    #[test]
    fn test_floor_reflects_outgoing_populations() {
        let dims = GridDims::new(4, 4, 4);
        let geometry = Geometry::open(dims);
        let node = dims.index(1, 2, 0);
        let mut store = DistributionStore::new(dims, 1.0);
        let forces = BodyForceAccumulator::new(dims);
        let mut fields = MacroscopicFields::new(dims);
        fields.compute(&store, geometry.solid_mask(), &forces);
        fields.set(node, 1.02, [0.01, -0.02, -0.03]);

        let tau = 0.9;
        let before = store.node(node);
        let post = |q: usize| {
            CollisionStreamingEngine::post_collision(
                q,
                before[q],
                1.02,
                [0.01, -0.02, -0.03],
                fields.speed_sq[node],
                tau,
                [0.0; 3],
            )
        };
        let expected: Vec<(usize, Float)> = (0..D3Q19::Q)
            .filter(|&q| D3Q19::VELOCITIES[q][2] > 0)
            .map(|q| (q, post(D3Q19::OPPOSITE[q])))
            .collect();

        CollisionStreamingEngine::new().collide_and_stream(
            &mut store,
            &fields,
            &forces,
            &relaxation(dims, tau),
            geometry.solid_mask(),
        );

        assert_eq!(expected.len(), 5);
        for (q, value) in expected {
            assert!((store.get(q, node) - value).abs() < 1e-15, "slot {}", q);
        }
    }
}
