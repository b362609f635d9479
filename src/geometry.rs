use nalgebra::{Point3, Vector3};
use stl_io::read_stl;

use crate::Float;
use crate::config::DomainConfig;

/// Grid extent in lattice units. Nodes are stored x-fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDims {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

impl GridDims {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self { nx, ny, nz }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.nx * (j + self.ny * k)
    }

    #[inline]
    pub fn coords(&self, idx: usize) -> (usize, usize, usize) {
        let i = idx % self.nx;
        let j = (idx / self.nx) % self.ny;
        let k = idx / (self.nx * self.ny);
        (i, j, k)
    }

    /// Index of the node at `idx + offset`, or `None` when that lies outside the grid.
    #[inline]
    pub fn offset(&self, idx: usize, offset: [i32; 3]) -> Option<usize> {
        let (i, j, k) = self.coords(idx);
        let ni = i as i64 + offset[0] as i64;
        let nj = j as i64 + offset[1] as i64;
        let nk = k as i64 + offset[2] as i64;
        if ni < 0
            || nj < 0
            || nk < 0
            || ni >= self.nx as i64
            || nj >= self.ny as i64
            || nk >= self.nz as i64
        {
            return None;
        }
        Some(self.index(ni as usize, nj as usize, nk as usize))
    }

    /// True for nodes on any of the six domain faces.
    #[inline]
    pub fn is_face(&self, i: usize, j: usize, k: usize) -> bool {
        i == 0 || j == 0 || k == 0 || i + 1 == self.nx || j + 1 == self.ny || k + 1 == self.nz
    }

    /// True when a continuous position lies inside the node hull `[0, n-1]^3`.
    #[inline]
    pub fn contains_point(&self, p: &Vector3<Float>) -> bool {
        p.x >= 0.0
            && p.y >= 0.0
            && p.z >= 0.0
            && p.x <= (self.nx - 1) as Float
            && p.y <= (self.ny - 1) as Float
            && p.z <= (self.nz - 1) as Float
    }
}

/// Solid/fluid classification of every grid node. Immutable once the solver is built.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub dims: GridDims,
    solid: Vec<bool>,
}

impl Geometry {
    /// All-fluid domain; every face is handled by the boundary manager.
    pub fn open(dims: GridDims) -> Self {
        Self {
            dims,
            solid: vec![false; dims.len()],
        }
    }

    /// Solid shell of `thickness` layers on all six faces.
    pub fn enclosed(dims: GridDims, thickness: usize) -> Self {
        let mut geometry = Self::open(dims);
        geometry.mark_layers(thickness, true, true);
        geometry
    }

    /// Brewer walls: side walls and bottom plate, top left open (or closed on request).
    pub fn from_domain(domain: &DomainConfig) -> Self {
        let dims = GridDims::new(domain.nx, domain.ny, domain.nz);
        let mut geometry = Self::open(dims);
        geometry.mark_layers(domain.wall_thickness, true, domain.closed_top);
        geometry
    }

    fn mark_layers(&mut self, thickness: usize, bottom: bool, top: bool) {
        if thickness == 0 {
            return;
        }
        let d = self.dims;
        for k in 0..d.nz {
            for j in 0..d.ny {
                for i in 0..d.nx {
                    let side = i < thickness
                        || j < thickness
                        || i + thickness >= d.nx
                        || j + thickness >= d.ny;
                    let floor = bottom && k < thickness;
                    let lid = top && k + thickness >= d.nz;
                    if side || floor || lid {
                        self.solid[d.index(i, j, k)] = true;
                    }
                }
            }
        }
    }

    pub fn set_solid(&mut self, i: usize, j: usize, k: usize, solid: bool) {
        let idx = self.dims.index(i, j, k);
        self.solid[idx] = solid;
    }

    #[inline]
    pub fn is_solid(&self, i: usize, j: usize, k: usize) -> bool {
        self.solid[self.dims.index(i, j, k)]
    }

    #[inline]
    pub fn is_solid_index(&self, idx: usize) -> bool {
        self.solid[idx]
    }

    pub fn solid_mask(&self) -> &[bool] {
        &self.solid
    }

    pub fn fluid_count(&self) -> usize {
        self.solid.iter().filter(|s| !**s).count()
    }

    pub fn solid_count(&self) -> usize {
        self.dims.len() - self.fluid_count()
    }

    /// Voxelise an STL surface (dripper cone, filter walls) into the solid mask.
    ///
    /// Mesh coordinates are in lattice units. A node becomes solid when most of the
    /// sample points in its cell lie within 0.8 cells of a triangle.
    pub fn add_stl(&mut self, stl_path: &str) -> anyhow::Result<usize> {
        let mut file = std::fs::File::open(stl_path)?;
        let stl = read_stl(&mut file)?;

        let before = self.solid_count();
        for face in &stl.faces {
            let vertex = |n: usize| {
                let v = stl.vertices[face.vertices[n]];
                Point3::new(v[0] as Float, v[1] as Float, v[2] as Float)
            };
            let triangle = [vertex(0), vertex(1), vertex(2)];
            self.voxelize_triangle(&triangle);
        }
        let added = self.solid_count() - before;
        log::info!(
            "Voxelised {} triangles from {}: {} new solid nodes",
            stl.faces.len(),
            stl_path,
            added
        );
        Ok(added)
    }

    fn voxelize_triangle(&mut self, triangle: &[Point3<Float>; 3]) {
        let d = self.dims;
        let axis_range = |axis: usize, n: usize| {
            let lo = triangle.iter().map(|v| v[axis]).fold(Float::INFINITY, Float::min);
            let hi = triangle.iter().map(|v| v[axis]).fold(Float::NEG_INFINITY, Float::max);
            let max = n as i64 - 1;
            let lo = (lo.floor() as i64 - 1).clamp(0, max) as usize;
            let hi = (hi.ceil() as i64 + 1).clamp(0, max) as usize;
            (lo, hi)
        };
        let (i_min, i_max) = axis_range(0, d.nx);
        let (j_min, j_max) = axis_range(1, d.ny);
        let (k_min, k_max) = axis_range(2, d.nz);

        const SAMPLES: usize = 3;
        const THICKNESS: Float = 0.8;

        for k in k_min..=k_max {
            for j in j_min..=j_max {
                for i in i_min..=i_max {
                    let mut inside = 0;
                    for si in 0..SAMPLES {
                        for sj in 0..SAMPLES {
                            for sk in 0..SAMPLES {
                                let offset = |s: usize| (s as Float + 0.5) / SAMPLES as Float - 0.5;
                                let point = Point3::new(
                                    i as Float + offset(si),
                                    j as Float + offset(sj),
                                    k as Float + offset(sk),
                                );
                                if point_triangle_distance(&point, triangle) < THICKNESS {
                                    inside += 1;
                                }
                            }
                        }
                    }
                    if inside > SAMPLES * SAMPLES * SAMPLES / 2 {
                        self.solid[d.index(i, j, k)] = true;
                    }
                }
            }
        }
    }
}

fn point_triangle_distance(point: &Point3<Float>, triangle: &[Point3<Float>; 3]) -> Float {
    let v0 = triangle[1] - triangle[0];
    let v1 = triangle[2] - triangle[0];
    let v2 = point - triangle[0];

    let dot00 = v0.dot(&v0);
    let dot01 = v0.dot(&v1);
    let dot02 = v0.dot(&v2);
    let dot11 = v1.dot(&v1);
    let dot12 = v1.dot(&v2);

    let denom = dot00 * dot11 - dot01 * dot01;
    if denom.abs() > Float::EPSILON {
        let u = (dot11 * dot02 - dot01 * dot12) / denom;
        let v = (dot00 * dot12 - dot01 * dot02) / denom;
        if u >= 0.0 && v >= 0.0 && u + v <= 1.0 {
            let normal = v0.cross(&v1).normalize();
            return v2.dot(&normal).abs();
        }
    }

    // Outside the triangle (or degenerate): nearest edge
    let d1 = point_segment_distance(point, &triangle[0], &triangle[1]);
    let d2 = point_segment_distance(point, &triangle[1], &triangle[2]);
    let d3 = point_segment_distance(point, &triangle[2], &triangle[0]);
    d1.min(d2).min(d3)
}

fn point_segment_distance(point: &Point3<Float>, a: &Point3<Float>, b: &Point3<Float>) -> Float {
    let ab = b - a;
    let ap = point - a;
    let ab_len_sq = ab.dot(&ab);
    if ab_len_sq == 0.0 {
        return ap.magnitude();
    }
    let t = (ap.dot(&ab) / ab_len_sq).clamp(0.0, 1.0);
    (point - (a + ab * t)).magnitude()
}
