use serde::{Deserialize, Serialize};

use crate::Float;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub domain: DomainConfig,
    #[serde(default)]
    pub physics: PhysicsConfig,
    #[serde(default)]
    pub particles: ParticleConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Solid layers on the side walls and the bottom plate
    #[serde(default = "default_wall_thickness")]
    pub wall_thickness: usize,
    #[serde(default)]
    pub closed_top: bool,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            nx: 32,
            ny: 32,
            nz: 48,
            wall_thickness: default_wall_thickness(),
            closed_top: false,
        }
    }
}

fn default_wall_thickness() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Reference density in lattice units
    pub density: Float,
    /// Gravitational acceleration in lattice units
    pub gravity: [Float; 3],
    /// Fraction of gravity felt by the air phase
    pub air_gravity_scale: Float,
    pub tau_water: Option<Float>,
    /// Kinematic viscosity of water; used when `tau_water` is absent
    pub water_viscosity: Option<Float>,
    pub tau_air: Float,
    /// Divergence threshold as a multiple of the lattice sound speed
    pub max_mach: Float,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            density: 1.0,
            gravity: [0.0, 0.0, -1.0e-5],
            air_gravity_scale: 0.0,
            tau_water: None,
            water_viscosity: None,
            tau_air: 0.6,
            max_mach: 0.3,
        }
    }
}

impl PhysicsConfig {
    pub fn calculate_tau(&self) -> Float {
        if let Some(tau) = self.tau_water {
            tau
        } else if let Some(nu) = self.water_viscosity {
            // nu = cs^2 (tau - 1/2)
            nu / crate::lattice::D3Q19::CS2 + 0.5
        } else {
            0.8
        }
    }

    /// Kinematic viscosity of the water phase
    pub fn water_viscosity(&self) -> Float {
        crate::lattice::D3Q19::CS2 * (self.calculate_tau() - 0.5)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    /// Weight of the fresh drag force in the under-relaxed update
    pub relaxation_alpha: Float,
    /// Drag magnitude ceiling per unit particle mass
    pub max_drag_acceleration: Float,
    /// Relative speeds below this produce no drag
    pub min_relative_speed: Float,
    /// Advance particle positions and velocities after coupling
    pub integrate: bool,
    pub bed: Option<BedConfig>,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            relaxation_alpha: 0.8,
            max_drag_acceleration: 0.05,
            min_relative_speed: 1.0e-8,
            integrate: true,
            bed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BedConfig {
    pub count: usize,
    pub radius_mean: Float,
    #[serde(default)]
    pub radius_std: Float,
    /// Particle material density relative to the lattice reference density
    #[serde(default = "default_particle_density")]
    pub particle_density: Float,
    pub z_min: Float,
    pub z_max: Float,
    #[serde(default)]
    pub seed: u64,
}

fn default_particle_density() -> Float {
    1.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub steps: usize,
    pub log_frequency: usize,
    pub initial_velocity: [Float; 3],
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps: 1000,
            log_frequency: 100,
            initial_velocity: [0.0; 3],
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.domain;
        if d.nx < 3 || d.ny < 3 || d.nz < 3 {
            return Err(ConfigError::InvalidDimensions {
                nx: d.nx,
                ny: d.ny,
                nz: d.nz,
            });
        }
        if 2 * d.wall_thickness >= d.nx.min(d.ny) || d.wall_thickness >= d.nz {
            return Err(ConfigError::InvalidWallThickness {
                thickness: d.wall_thickness,
            });
        }

        let p = &self.physics;
        if !(p.density > 0.0) {
            return Err(ConfigError::InvalidDensity(p.density));
        }
        for (name, value) in [("tau_water", p.calculate_tau()), ("tau_air", p.tau_air)] {
            if !(value > 0.5 && value <= 2.0) {
                return Err(ConfigError::InvalidRelaxationTime { name, value });
            }
        }
        if !(p.max_mach > 0.0 && p.max_mach < 1.0) {
            return Err(ConfigError::InvalidMachLimit(p.max_mach));
        }

        let pc = &self.particles;
        if !(pc.relaxation_alpha > 0.0 && pc.relaxation_alpha <= 1.0) {
            return Err(ConfigError::InvalidRelaxationFactor(pc.relaxation_alpha));
        }
        if !(pc.max_drag_acceleration > 0.0) {
            return Err(ConfigError::InvalidDragCeiling(pc.max_drag_acceleration));
        }
        if let Some(bed) = &pc.bed {
            let top = (d.nz - 1) as Float;
            if !(bed.z_min < bed.z_max) || bed.z_min < 0.0 || bed.z_max > top {
                return Err(ConfigError::InvalidBedBounds {
                    z_min: bed.z_min,
                    z_max: bed.z_max,
                });
            }
            if !(bed.radius_mean > 0.0) {
                return Err(ConfigError::InvalidBedParticle {
                    name: "radius_mean",
                    value: bed.radius_mean,
                });
            }
            if !(bed.particle_density > 0.0) {
                return Err(ConfigError::InvalidBedParticle {
                    name: "particle_density",
                    value: bed.particle_density,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let json = r#"{ "domain": { "nx": 8, "ny": 8, "nz": 12 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.domain.wall_thickness, 1);
        assert!(!config.domain.closed_top);
        assert_eq!(config.physics.density, 1.0);
        assert_eq!(config.particles.relaxation_alpha, 0.8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tau_from_viscosity() {
        let physics = PhysicsConfig {
            water_viscosity: Some(0.1),
            ..Default::default()
        };
        assert!((physics.calculate_tau() - 0.8).abs() < 1e-12);
        assert!((physics.water_viscosity() - 0.1).abs() < 1e-12);

        let explicit = PhysicsConfig {
            tau_water: Some(1.1),
            water_viscosity: Some(0.1),
            ..Default::default()
        };
        assert_eq!(explicit.calculate_tau(), 1.1);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.domain.nx = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDimensions { .. })
        ));

        let mut config = Config::default();
        config.physics.tau_water = Some(0.5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRelaxationTime { name: "tau_water", .. })
        ));

        let mut config = Config::default();
        config.particles.relaxation_alpha = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRelaxationFactor(_))
        ));

        let mut config = Config::default();
        config.particles.bed = Some(BedConfig {
            count: 10,
            radius_mean: 0.4,
            radius_std: 0.0,
            particle_density: 1.3,
            z_min: 10.0,
            z_max: 5.0,
            seed: 0,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBedBounds { .. })
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "domain": {{ "nx": 10, "ny": 10, "nz": 20, "wall_thickness": 2 }},
                "physics": {{ "tau_water": 0.9, "gravity": [0.0, 0.0, -2e-5] }},
                "particles": {{
                    "relaxation_alpha": 0.5,
                    "bed": {{ "count": 20, "radius_mean": 0.35, "z_min": 2.0, "z_max": 8.0 }}
                }},
                "simulation": {{ "steps": 50 }}
            }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.domain.wall_thickness, 2);
        assert_eq!(config.physics.calculate_tau(), 0.9);
        assert_eq!(config.simulation.steps, 50);
        let bed = config.particles.bed.unwrap();
        assert_eq!(bed.count, 20);
        assert_eq!(bed.particle_density, 1.3);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "domain": {{ "nx": 1, "ny": 10, "nz": 10 }} }}"#).unwrap();
        assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
    }
}
