use crate::Float;
use crate::geometry::GridDims;
use crate::lattice::{D3Q19, equilibrium_set};

/// Double-buffered populations, one contiguous scalar field per direction.
///
/// Slot `(q, idx)` lives at `q * n + idx`. Reads come from the front buffer; the
/// streaming sweep writes the back buffer and `swap` exchanges them.
#[derive(Debug, Clone)]
pub struct DistributionStore {
    dims: GridDims,
    front: Vec<Float>,
    back: Vec<Float>,
}

impl DistributionStore {
    /// Store initialised to rest equilibrium at `density`.
    pub fn new(dims: GridDims, density: Float) -> Self {
        let n = dims.len();
        let mut store = Self {
            dims,
            front: vec![0.0; n * D3Q19::Q],
            back: vec![0.0; n * D3Q19::Q],
        };
        let rest = equilibrium_set(density, [0.0; 3]);
        for idx in 0..n {
            store.set_node(idx, &rest);
        }
        store.back.copy_from_slice(&store.front);
        store
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    #[inline]
    pub fn get(&self, q: usize, idx: usize) -> Float {
        self.front[q * self.dims.len() + idx]
    }

    #[inline]
    pub fn set(&mut self, q: usize, idx: usize, value: Float) {
        let n = self.dims.len();
        self.front[q * n + idx] = value;
    }

    /// All 19 populations of one node.
    #[inline]
    pub fn node(&self, idx: usize) -> [Float; 19] {
        let n = self.dims.len();
        let mut f = [0.0; 19];
        for (q, slot) in f.iter_mut().enumerate() {
            *slot = self.front[q * n + idx];
        }
        f
    }

    #[inline]
    pub fn set_node(&mut self, idx: usize, f: &[Float; 19]) {
        let n = self.dims.len();
        for (q, value) in f.iter().enumerate() {
            self.front[q * n + idx] = *value;
        }
    }

    /// Rebuild one node from equilibrium at (`density`, `velocity`).
    pub fn set_equilibrium(&mut self, idx: usize, density: Float, velocity: [Float; 3]) {
        self.set_node(idx, &equilibrium_set(density, velocity));
    }

    /// Front buffer for reading, back buffer for writing.
    pub fn read_write(&mut self) -> (&[Float], &mut [Float]) {
        (&self.front, &mut self.back)
    }

    pub fn front(&self) -> &[Float] {
        &self.front
    }

    pub fn swap(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
    }

    /// Zeroth moment summed over nodes where `include` is true.
    pub fn total_mass(&self, include: impl Fn(usize) -> bool) -> Float {
        let n = self.dims.len();
        (0..n)
            .filter(|&idx| include(idx))
            .map(|idx| (0..D3Q19::Q).map(|q| self.front[q * n + idx]).sum::<Float>())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_store_is_rest_equilibrium() {
        let dims = GridDims::new(3, 3, 3);
        let store = DistributionStore::new(dims, 1.0);
        let f = store.node(13);
        assert!((f[0] - 1.0 / 3.0).abs() < 1e-15);
        assert!((f[1] - 1.0 / 18.0).abs() < 1e-15);
        assert!((f[7] - 1.0 / 36.0).abs() < 1e-15);
        assert!((store.total_mass(|_| true) - 27.0).abs() < 1e-12);
    }

    #[test]
    fn test_swap_exchanges_buffers() {
        let dims = GridDims::new(3, 1, 1);
        let mut store = DistributionStore::new(dims, 1.0);
        {
            let (_, back) = store.read_write();
            back.fill(0.5);
        }
        assert!((store.get(4, 1) - 1.0 / 18.0).abs() < 1e-15);
        store.swap();
        assert_eq!(store.get(4, 1), 0.5);
        assert_eq!(store.node(2), [0.5; 19]);
    }

    #[test]
    fn test_set_node_roundtrip() {
        let dims = GridDims::new(2, 2, 2);
        let mut store = DistributionStore::new(dims, 1.0);
        let mut f = [0.0; 19];
        for (q, v) in f.iter_mut().enumerate() {
            *v = q as Float;
        }
        store.set_node(5, &f);
        assert_eq!(store.node(5), f);
        assert_eq!(store.get(18, 5), 18.0);
        store.set(18, 5, -1.0);
        assert_eq!(store.get(18, 5), -1.0);
    }
}
