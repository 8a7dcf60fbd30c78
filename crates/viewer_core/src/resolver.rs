//! World coordinate to voxel index and per-layer intensity resolution.
//!
//! Nothing here fails: transform errors, missing inputs, and out-of-grid
//! positions all resolve to `None`.

use shared::{
    domain::{LayerId, VoxelCoord, WorldCoord},
    protocol::IntensityMap,
};
use viewer_integration::{LayerStack, SpatialTransform, Viewer};

/// Nearest integer with halves away from zero; `None` for values that have no index.
pub fn round_index(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let rounded = value.round();
    if rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
        return None;
    }
    Some(rounded as i64)
}

pub fn world_to_voxel(
    world: Option<WorldCoord>,
    space: Option<&dyn SpatialTransform>,
) -> Option<VoxelCoord> {
    let grid = space?.world_to_grid(world?).ok()?;
    Some(VoxelCoord([
        round_index(grid[0])?,
        round_index(grid[1])?,
        round_index(grid[2])?,
    ]))
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSample {
    pub id: LayerId,
    pub value: Option<f64>,
}

/// Samples every layer of `stack`, bottom first, each through its own volume's transform.
pub fn sample_intensities(world: Option<WorldCoord>, stack: &dyn LayerStack) -> Vec<LayerSample> {
    stack
        .layer_ids()
        .into_iter()
        .map(|id| {
            let value = world.and_then(|world| {
                let layer = stack.layer(&id)?;
                let space = layer.volume.space();
                let voxel = world_to_voxel(Some(world), Some(space.as_ref()))?;
                if !voxel.within(layer.volume.dim()) {
                    return None;
                }
                let [i, j, k] = voxel.as_indices()?;
                layer.volume.value_at(i, j, k)
            });
            LayerSample { id, value }
        })
        .collect()
}

pub fn intensity_map(samples: &[LayerSample]) -> IntensityMap {
    samples
        .iter()
        .map(|sample| (sample.id.clone(), sample.value))
        .collect()
}

/// Where the pointer is, or the crosshair when the pointer is not over a view.
pub fn pointer_coord(viewer: &dyn Viewer) -> Option<WorldCoord> {
    viewer
        .mouse_state()
        .and_then(|state| state.world)
        .or_else(|| viewer.current_coord())
}
