//! Domain-edge and solid cleanup rules applied after every streaming sweep.
//!
//! Rules run in order, later ones overriding nodes touched by earlier ones:
//! 1. solid cleanup: solid nodes are reset to rest equilibrium;
//! 2. top face: open outflow, density from the node below, current velocity kept;
//! 3. bottom face: closed; the streaming sweep already bounced the upward
//!    populations back, here the node is rebuilt at rest with its density kept;
//! 4. side faces: outlet extrapolation from the adjacent interior node.
//!
//! Only fluid nodes on a face are touched by rules 2-4.

use crate::Float;
use crate::distribution::DistributionStore;
use crate::error::BoundaryError;
use crate::lattice::equilibrium_set;
use crate::macroscopic::MacroscopicFields;

/// A complete set of boundary rules. The solver falls back to its inline copy of
/// the rules when an implementation returns an error.
pub trait BoundaryConditions: Send + Sync {
    fn apply(
        &self,
        store: &mut DistributionStore,
        fields: &mut MacroscopicFields,
        solid: &[bool],
    ) -> Result<(), BoundaryError>;
}

#[derive(Debug, Clone)]
pub struct BoundaryConditionManager {
    rest_density: Float,
}

impl BoundaryConditionManager {
    pub fn new(rest_density: Float) -> Self {
        Self { rest_density }
    }

    fn check_shapes(
        store: &DistributionStore,
        fields: &MacroscopicFields,
        solid: &[bool],
    ) -> Result<(), BoundaryError> {
        let dims = store.dims();
        let expected = dims.len();
        for (name, actual) in [
            ("solid", solid.len()),
            ("density", fields.density.len()),
            ("velocity", fields.velocity.len()),
        ] {
            if actual != expected {
                return Err(BoundaryError::ShapeMismatch {
                    name,
                    expected,
                    actual,
                });
            }
        }
        for (axis, len) in [('x', dims.nx), ('y', dims.ny), ('z', dims.nz)] {
            if len < 3 {
                return Err(BoundaryError::DegenerateAxis { axis, len });
            }
        }
        Ok(())
    }

    pub fn clean_solids(&self, store: &mut DistributionStore, solid: &[bool]) {
        let rest = equilibrium_set(self.rest_density, [0.0; 3]);
        for (idx, _) in solid.iter().enumerate().filter(|(_, s)| **s) {
            store.set_node(idx, &rest);
        }
    }

    pub fn apply_top(
        &self,
        store: &mut DistributionStore,
        fields: &mut MacroscopicFields,
        solid: &[bool],
    ) -> Result<(), BoundaryError> {
        let d = store.dims();
        let k = d.nz - 1;
        for j in 0..d.ny {
            for i in 0..d.nx {
                let idx = d.index(i, j, k);
                if solid[idx] {
                    continue;
                }
                let below = d.index(i, j, k - 1);
                let density = if solid[below] {
                    fields.density[idx]
                } else {
                    fields.density[below]
                };
                if !density.is_finite() {
                    return Err(BoundaryError::Rule {
                        rule: "top",
                        reason: format!("non-finite density below node ({i}, {j}, {k})"),
                    });
                }
                let velocity = fields.velocity.data[idx];
                store.set_equilibrium(idx, density, velocity);
                fields.set(idx, density, velocity);
            }
        }
        Ok(())
    }

    /// Rest equilibrium at the node's own density, so no mass crosses the floor.
    pub fn apply_bottom(&self, store: &mut DistributionStore, fields: &mut MacroscopicFields, solid: &[bool]) {
        let d = store.dims();
        for j in 0..d.ny {
            for i in 0..d.nx {
                let idx = d.index(i, j, 0);
                if solid[idx] {
                    continue;
                }
                let density: Float = store.node(idx).iter().sum();
                store.set_equilibrium(idx, density, [0.0; 3]);
                fields.set(idx, density, [0.0; 3]);
            }
        }
    }

    pub fn apply_sides(&self, store: &mut DistributionStore, fields: &mut MacroscopicFields, solid: &[bool]) {
        let d = store.dims();
        for k in 0..d.nz {
            for j in 0..d.ny {
                for i in 0..d.nx {
                    let on_side = i == 0 || j == 0 || i + 1 == d.nx || j + 1 == d.ny;
                    let idx = d.index(i, j, k);
                    if !on_side || solid[idx] {
                        continue;
                    }
                    let interior = d.index(i.clamp(1, d.nx - 2), j.clamp(1, d.ny - 2), k);
                    let (density, velocity) = if solid[interior] {
                        let own = fields.density[idx];
                        (if own > 0.0 { own } else { self.rest_density }, [0.0; 3])
                    } else {
                        (fields.density[interior], fields.velocity.data[interior])
                    };
                    store.set_equilibrium(idx, density, velocity);
                    fields.set(idx, density, velocity);
                }
            }
        }
    }
}

impl BoundaryConditions for BoundaryConditionManager {
    fn apply(
        &self,
        store: &mut DistributionStore,
        fields: &mut MacroscopicFields,
        solid: &[bool],
    ) -> Result<(), BoundaryError> {
        Self::check_shapes(store, fields, solid)?;
        self.clean_solids(store, solid);
        self.apply_top(store, fields, solid)?;
        self.apply_bottom(store, fields, solid);
        self.apply_sides(store, fields, solid);
        Ok(())
    }
}
