use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position in patient/world space: Left-Right, Posterior-Anterior, Inferior-Superior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldCoord(pub [f64; 3]);

impl WorldCoord {
    pub const ORIGIN: WorldCoord = WorldCoord([0.0, 0.0, 0.0]);

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self([x, y, z])
    }

    /// Builds a coordinate from the first three components of a host array.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [x, y, z, ..] => Some(Self([*x, *y, *z])),
            _ => None,
        }
    }

    pub fn x(&self) -> f64 {
        self.0[0]
    }

    pub fn y(&self) -> f64 {
        self.0[1]
    }

    pub fn z(&self) -> f64 {
        self.0[2]
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    pub fn lerp(&self, to: &WorldCoord, fraction: f64) -> WorldCoord {
        let mut out = [0.0; 3];
        for (axis, slot) in out.iter_mut().enumerate() {
            *slot = self.0[axis] + (to.0[axis] - self.0[axis]) * fraction;
        }
        WorldCoord(out)
    }
}

/// Rounded grid indices into one volume's sample array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoxelCoord(pub [i64; 3]);

impl VoxelCoord {
    pub fn within(&self, dim: [usize; 3]) -> bool {
        self.0
            .iter()
            .zip(dim.iter())
            .all(|(index, extent)| *index >= 0 && (*index as u64) < *extent as u64)
    }

    pub fn as_indices(&self) -> Option<[usize; 3]> {
        let [i, j, k] = self.0;
        Some([
            usize::try_from(i).ok()?,
            usize::try_from(j).ok()?,
            usize::try_from(k).ok()?,
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub String);

impl LayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(format!("layer_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LayerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewPlane {
    Axial,
    Coronal,
    Sagittal,
}

impl ViewPlane {
    pub const ALL: [ViewPlane; 3] = [ViewPlane::Axial, ViewPlane::Coronal, ViewPlane::Sagittal];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    /// Maps a DOM `MouseEvent.button` code; anything but primary/secondary reads as middle.
    pub fn from_dom_code(code: u16) -> Self {
        match code {
            0 => MouseButton::Left,
            2 => MouseButton::Right,
            _ => MouseButton::Middle,
        }
    }
}

/// Two-element numeric window (display range or threshold band).
pub type Window = [f64; 2];
