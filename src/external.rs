//! Per-step inputs supplied by collaborators outside the fluid core.
//!
//! The multiphase, turbulence and porous-media models live elsewhere; the core
//! only borrows their fields for the duration of a step.

use crate::Float;
use crate::error::SolverError;
use crate::forcing::VectorField;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalInputs<'a> {
    /// Water fraction per node in [0, 1]; absent means all water
    pub phase_fraction: Option<&'a [Float]>,
    /// Turbulent eddy viscosity per node, added into the relaxation time
    pub eddy_viscosity: Option<&'a [Float]>,
    /// Darcy/Forchheimer resistance force from the filter and bed model
    pub porous_resistance: Option<&'a VectorField>,
    /// Surface-tension force from the interface model
    pub surface_tension: Option<&'a VectorField>,
}

impl<'a> ExternalInputs<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_phase_fraction(mut self, phase: &'a [Float]) -> Self {
        self.phase_fraction = Some(phase);
        self
    }

    pub fn with_eddy_viscosity(mut self, nu_t: &'a [Float]) -> Self {
        self.eddy_viscosity = Some(nu_t);
        self
    }

    pub fn with_porous_resistance(mut self, force: &'a VectorField) -> Self {
        self.porous_resistance = Some(force);
        self
    }

    pub fn with_surface_tension(mut self, force: &'a VectorField) -> Self {
        self.surface_tension = Some(force);
        self
    }

    /// Every supplied field must cover the whole grid.
    pub fn check_shapes(&self, expected: usize) -> Result<(), SolverError> {
        let lengths = [
            ("phase_fraction", self.phase_fraction.map(<[Float]>::len)),
            ("eddy_viscosity", self.eddy_viscosity.map(<[Float]>::len)),
            ("porous_resistance", self.porous_resistance.map(VectorField::len)),
            ("surface_tension", self.surface_tension.map(VectorField::len)),
        ];
        for (name, len) in lengths {
            if let Some(actual) = len {
                if actual != expected {
                    return Err(SolverError::FieldShape {
                        name,
                        expected,
                        actual,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GridDims;

    #[test]
    fn test_shape_check() {
        let phase = vec![1.0; 8];
        let tension = VectorField::zeros(GridDims::new(2, 2, 2));
        let inputs = ExternalInputs::none()
            .with_phase_fraction(&phase)
            .with_surface_tension(&tension);
        assert!(inputs.check_shapes(8).is_ok());

        let short = vec![0.0; 3];
        let bad = inputs.with_eddy_viscosity(&short);
        assert!(matches!(
            bad.check_shapes(8),
            Err(SolverError::FieldShape { name: "eddy_viscosity", actual: 3, .. })
        ));
    }
}
