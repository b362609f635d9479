use crate::Float;

/// D3Q19 Lattice-Boltzmann model constants
pub struct D3Q19;

impl D3Q19 {
    /// Number of discrete velocities
    pub const Q: usize = 19;

    /// Discrete velocities (19 directions in 3D)
    pub const VELOCITIES: [[i32; 3]; 19] = [
        // Center
        [0, 0, 0],
        // Face neighbors (6)
        [1, 0, 0], [-1, 0, 0], [0, 1, 0], [0, -1, 0], [0, 0, 1], [0, 0, -1],
        // Edge neighbors (12)
        [1, 1, 0], [1, -1, 0], [-1, 1, 0], [-1, -1, 0],
        [1, 0, 1], [1, 0, -1], [-1, 0, 1], [-1, 0, -1],
        [0, 1, 1], [0, 1, -1], [0, -1, 1], [0, -1, -1],
    ];

    /// Weights for each direction
    pub const WEIGHTS: [Float; 19] = [
        // Center
        1.0 / 3.0,
        // Face neighbors (6)
        1.0 / 18.0, 1.0 / 18.0, 1.0 / 18.0, 1.0 / 18.0, 1.0 / 18.0, 1.0 / 18.0,
        // Edge neighbors (12)
        1.0 / 36.0, 1.0 / 36.0, 1.0 / 36.0, 1.0 / 36.0,
        1.0 / 36.0, 1.0 / 36.0, 1.0 / 36.0, 1.0 / 36.0,
        1.0 / 36.0, 1.0 / 36.0, 1.0 / 36.0, 1.0 / 36.0,
    ];

    /// Opposite directions for bounce-back, paired by component negation
    pub const OPPOSITE: [usize; 19] = opposite_table();

    /// Speed of sound squared
    pub const CS2: Float = 1.0 / 3.0;

    /// Lattice velocity of direction `q` as floats
    #[inline]
    pub fn direction(q: usize) -> [Float; 3] {
        let c = Self::VELOCITIES[q];
        [c[0] as Float, c[1] as Float, c[2] as Float]
    }

    /// `e_q · v`
    #[inline]
    pub fn project(q: usize, v: [Float; 3]) -> Float {
        let c = Self::VELOCITIES[q];
        c[0] as Float * v[0] + c[1] as Float * v[1] + c[2] as Float * v[2]
    }
}

const fn opposite_table() -> [usize; 19] {
    let mut table = [usize::MAX; 19];
    let mut q = 0;
    while q < D3Q19::Q {
        let c = D3Q19::VELOCITIES[q];
        let mut p = 0;
        while p < D3Q19::Q {
            let d = D3Q19::VELOCITIES[p];
            if d[0] == -c[0] && d[1] == -c[1] && d[2] == -c[2] {
                table[q] = p;
            }
            p += 1;
        }
        q += 1;
    }
    table
}

/// Second-order equilibrium distribution for direction `q`.
///
/// `speed_sq` is `u·u`, passed in because the macroscopic pass already caches it.
#[inline]
pub fn equilibrium(q: usize, density: Float, velocity: [Float; 3], speed_sq: Float) -> Float {
    let cu = D3Q19::project(q, velocity);
    D3Q19::WEIGHTS[q] * density * (1.0 + 3.0 * cu + 4.5 * cu * cu - 1.5 * speed_sq)
}

/// All 19 equilibrium populations for a node at (`density`, `velocity`).
pub fn equilibrium_set(density: Float, velocity: [Float; 3]) -> [Float; 19] {
    let u2 = velocity[0] * velocity[0] + velocity[1] * velocity[1] + velocity[2] * velocity[2];
    let mut f = [0.0; 19];
    for (q, slot) in f.iter_mut().enumerate() {
        *slot = equilibrium(q, density, velocity, u2);
    }
    f
}
