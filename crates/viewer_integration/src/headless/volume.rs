use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use shared::{
    domain::{Window, WorldCoord},
    protocol::{VolumeGeometry, VolumeSpec},
};

use crate::{SpatialTransform, Volume};

/// Axis-aligned grid space: `grid = (world - origin) / spacing`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpace {
    dim: [usize; 3],
    spacing: [f64; 3],
    origin: [f64; 3],
}

impl GridSpace {
    pub fn new(dim: [usize; 3], spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self {
            dim,
            spacing,
            origin,
        }
    }

    pub fn dim(&self) -> [usize; 3] {
        self.dim
    }
}

impl From<VolumeGeometry> for GridSpace {
    fn from(geometry: VolumeGeometry) -> Self {
        Self::new(geometry.dim, geometry.spacing, geometry.origin)
    }
}

impl SpatialTransform for GridSpace {
    fn world_to_grid(&self, world: WorldCoord) -> Result<[f64; 3]> {
        if !world.is_finite() {
            bail!("non-finite world coordinate {:?}", world.0);
        }
        let mut grid = [0.0; 3];
        for (axis, slot) in grid.iter_mut().enumerate() {
            let spacing = self.spacing[axis];
            if spacing == 0.0 || !spacing.is_finite() {
                return Err(anyhow!("degenerate spacing on axis {axis}: {spacing}"));
            }
            *slot = (world.0[axis] - self.origin[axis]) / spacing;
        }
        Ok(grid)
    }

    fn grid_to_world(&self, grid: [f64; 3]) -> Result<WorldCoord> {
        if grid.iter().any(|g| !g.is_finite()) {
            bail!("non-finite grid coordinate {grid:?}");
        }
        let mut world = [0.0; 3];
        for (axis, slot) in world.iter_mut().enumerate() {
            *slot = self.origin[axis] + grid[axis] * self.spacing[axis];
        }
        Ok(WorldCoord(world))
    }
}

/// Dense float volume stored column-major (`i` varies fastest).
pub struct DenseVolume {
    space: Arc<GridSpace>,
    data: Vec<f32>,
}

impl DenseVolume {
    pub fn new(space: GridSpace, data: Vec<f32>) -> Result<Self> {
        let expected = space.dim().iter().product::<usize>();
        if data.len() != expected {
            bail!(
                "volume data length {} does not match dim {:?}",
                data.len(),
                space.dim()
            );
        }
        Ok(Self {
            space: Arc::new(space),
            data,
        })
    }

    pub fn from_spec(spec: &VolumeSpec) -> Result<Self> {
        let geometry = spec.geometry()?;
        let data = spec.samples().iter().map(|v| *v as f32).collect();
        Self::new(GridSpace::from(geometry), data)
    }

    fn offset(&self, i: usize, j: usize, k: usize) -> Option<usize> {
        let [di, dj, dk] = self.space.dim();
        (i < di && j < dj && k < dk).then(|| i + j * di + k * di * dj)
    }
}

impl Volume for DenseVolume {
    fn dim(&self) -> [usize; 3] {
        self.space.dim()
    }

    fn space(&self) -> Arc<dyn SpatialTransform> {
        self.space.clone()
    }

    fn value_at(&self, i: usize, j: usize, k: usize) -> Option<f64> {
        self.offset(i, j, k).map(|offset| self.data[offset] as f64)
    }

    fn range(&self) -> Option<Window> {
        self.data
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<Window>, v| {
                let v = *v as f64;
                Some(match acc {
                    Some([lo, hi]) => [lo.min(v), hi.max(v)],
                    None => [v, v],
                })
            })
    }
}
