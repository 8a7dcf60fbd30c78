use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    domain::{LayerId, MouseButton, ViewPlane, VoxelCoord, Window, WorldCoord},
    error::{PayloadError, PayloadField},
};

pub const DEFAULT_COLORMAP: &str = "Greys";
pub const DEFAULT_BACKGROUND_ID: &str = "background";
pub const DEFAULT_THRESHOLD: Window = [0.0, 0.0];
pub const FALLBACK_RANGE: Window = [0.0, 1.0];
pub const DEFAULT_SPACING: [f64; 3] = [1.0, 1.0, 1.0];
pub const DEFAULT_ORIGIN: [f64; 3] = [0.0, 0.0, 0.0];

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A sampled 3-D grid as the host ships it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    #[serde(default)]
    pub dim: Option<Vec<usize>>,
    #[serde(default)]
    pub spacing: Option<[f64; 3]>,
    #[serde(default)]
    pub origin: Option<[f64; 3]>,
    /// `null` samples (missing values on the host side) become `NaN`.
    #[serde(default, deserialize_with = "nullable_samples")]
    pub data: Option<Vec<f64>>,
    /// Axis labels from the host; accepted but not used for construction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axes: Option<Value>,
}

fn nullable_samples<'de, D>(deserializer: D) -> Result<Option<Vec<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let samples: Option<Vec<Option<f64>>> = Option::deserialize(deserializer)?;
    Ok(samples.map(|samples| {
        samples
            .into_iter()
            .map(|sample| sample.unwrap_or(f64::NAN))
            .collect()
    }))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeGeometry {
    pub dim: [usize; 3],
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
}

impl VolumeGeometry {
    pub fn sample_count(&self) -> usize {
        self.dim.iter().product()
    }
}

impl VolumeSpec {
    pub fn new(dim: [usize; 3], data: Vec<f64>) -> Self {
        Self {
            dim: Some(dim.to_vec()),
            spacing: None,
            origin: None,
            data: Some(data),
            axes: None,
        }
    }

    /// Checks the payload and resolves defaults; fails before anything is built from it.
    pub fn geometry(&self) -> Result<VolumeGeometry, PayloadError> {
        let dim = self
            .dim
            .as_ref()
            .ok_or(PayloadError::Missing(PayloadField::Dim))?;
        let data = self
            .data
            .as_ref()
            .ok_or(PayloadError::Missing(PayloadField::Data))?;

        let dim: [usize; 3] = match dim.as_slice() {
            [i, j, k] if *i > 0 && *j > 0 && *k > 0 => [*i, *j, *k],
            other => return Err(PayloadError::BadDim(other.to_vec())),
        };

        let expected = dim.iter().product::<usize>();
        if data.len() != expected {
            return Err(PayloadError::SampleCount {
                dim,
                expected,
                actual: data.len(),
            });
        }

        let spacing = self.spacing.unwrap_or(DEFAULT_SPACING);
        if spacing.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(PayloadError::BadSpacing(spacing));
        }

        Ok(VolumeGeometry {
            dim,
            spacing,
            origin: self.origin.unwrap_or(DEFAULT_ORIGIN),
        })
    }

    pub fn samples(&self) -> &[f64] {
        self.data.as_deref().unwrap_or_default()
    }
}

/// Configuration payload pushed by the host on every render of a mount.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WidgetConfig {
    #[serde(default)]
    pub bg_volume: Option<VolumeSpec>,
    #[serde(default)]
    pub bg_range: Option<Window>,
    #[serde(default)]
    pub bg_threshold: Option<Window>,
    #[serde(default)]
    pub bg_colormap: Option<String>,
    #[serde(default)]
    pub bg_id: Option<String>,
    #[serde(default)]
    pub show_sidebar: Option<bool>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default, deserialize_with = "lenient_commands")]
    pub commands: Vec<Command>,
}

impl WidgetConfig {
    pub fn background_volume(&self) -> Result<&VolumeSpec, PayloadError> {
        self.bg_volume
            .as_ref()
            .ok_or(PayloadError::Missing(PayloadField::Volume))
    }

    pub fn background_id(&self) -> LayerId {
        match self.bg_id.as_deref() {
            Some(id) if !id.is_empty() => LayerId::new(id),
            _ => LayerId::new(DEFAULT_BACKGROUND_ID),
        }
    }

    pub fn background_colormap(&self) -> &str {
        match self.bg_colormap.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_COLORMAP,
        }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug == Some(true)
    }

    pub fn sidebar_visible(&self) -> bool {
        self.show_sidebar != Some(false)
    }
}

/// Drops inline commands that do not parse instead of rejecting the whole configuration.
fn lenient_commands<'de, D>(deserializer: D) -> Result<Vec<Command>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Array(items)) => items.into_iter().map(Command::from_value).collect(),
        _ => Vec::new(),
    })
}

/// A host command. Type-specific fields are optional so that an under-specified
/// command still parses and can be dropped by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    AddLayer {
        #[serde(default)]
        layer_id: Option<LayerId>,
        #[serde(default)]
        volume: Option<VolumeSpec>,
        #[serde(default)]
        colormap: Option<String>,
        #[serde(default)]
        range: Option<Window>,
        #[serde(default)]
        threshold: Option<Window>,
        #[serde(default)]
        opacity: Option<f64>,
    },
    SetWindow {
        #[serde(default)]
        layer_id: Option<LayerId>,
        #[serde(default)]
        range: Option<Window>,
    },
    SetThreshold {
        #[serde(default)]
        layer_id: Option<LayerId>,
        #[serde(default)]
        threshold: Option<Window>,
    },
    SetColormap {
        #[serde(default)]
        layer_id: Option<LayerId>,
        #[serde(default)]
        colormap: Option<String>,
    },
    SetOpacity {
        #[serde(default)]
        layer_id: Option<LayerId>,
        #[serde(default)]
        opacity: Option<f64>,
    },
    SetLayerVisible {
        #[serde(default)]
        layer_id: Option<LayerId>,
        #[serde(default)]
        visible: Option<bool>,
    },
    SetCrosshair {
        #[serde(default)]
        coord: Option<Vec<f64>>,
        #[serde(default)]
        animate: Option<bool>,
        #[serde(default)]
        duration: Option<f64>,
    },
    GetCrosshair {
        #[serde(default)]
        request_id: Option<Value>,
    },
    SetLayerOrder {
        #[serde(default)]
        layer_ids: Option<Vec<LayerId>>,
    },
    RemoveLayer {
        #[serde(default)]
        layer_id: Option<LayerId>,
    },
    GetLayers {
        #[serde(default)]
        request_id: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

impl Command {
    /// Parses one command leniently; anything unreadable becomes `Unknown`.
    pub fn from_value(value: Value) -> Command {
        serde_json::from_value(value).unwrap_or(Command::Unknown)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Command::AddLayer { .. } => "add-layer",
            Command::SetWindow { .. } => "set-window",
            Command::SetThreshold { .. } => "set-threshold",
            Command::SetColormap { .. } => "set-colormap",
            Command::SetOpacity { .. } => "set-opacity",
            Command::SetLayerVisible { .. } => "set-layer-visible",
            Command::SetCrosshair { .. } => "set-crosshair",
            Command::GetCrosshair { .. } => "get-crosshair",
            Command::SetLayerOrder { .. } => "set-layer-order",
            Command::RemoveLayer { .. } => "remove-layer",
            Command::GetLayers { .. } => "get-layers",
            Command::Unknown => "unknown",
        }
    }
}

/// Out-of-band command addressed to one mount: `{ "id": "<mount>", "type": ..., ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedCommand {
    pub id: String,
    #[serde(flatten)]
    pub command: Command,
}

impl RoutedCommand {
    pub fn from_value(value: Value) -> Option<RoutedCommand> {
        let id = value.get("id")?.as_str()?.to_string();
        Some(RoutedCommand {
            id,
            command: Command::from_value(value),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostEventKind {
    Click,
    DoubleClick,
    RightClick,
    Hover,
    Crosshair,
    CrosshairResponse,
    LayersResponse,
}

impl HostEventKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            HostEventKind::Click => "click",
            HostEventKind::DoubleClick => "dblclick",
            HostEventKind::RightClick => "rightclick",
            HostEventKind::Hover => "hover",
            HostEventKind::Crosshair => "crosshair",
            HostEventKind::CrosshairResponse => "crosshair_response",
            HostEventKind::LayersResponse => "layers_response",
        }
    }

    /// Event name as the host sees it, e.g. `viewer1_click`.
    pub fn qualified(&self, mount_id: &str) -> String {
        format!("{mount_id}_{}", self.suffix())
    }
}

/// One fire-and-forget message to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMessage {
    pub name: String,
    pub payload: Value,
}

pub type IntensityMap = BTreeMap<LayerId, Option<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerEventType {
    Click,
    Dblclick,
    Rightclick,
    Hover,
}

impl PointerEventType {
    pub fn host_event(&self) -> HostEventKind {
        match self {
            PointerEventType::Click => HostEventKind::Click,
            PointerEventType::Dblclick => HostEventKind::DoubleClick,
            PointerEventType::Rightclick => HostEventKind::RightClick,
            PointerEventType::Hover => HostEventKind::Hover,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerEventPayload {
    pub world: Option<WorldCoord>,
    pub voxel: Option<VoxelCoord>,
    pub intensity: IntensityMap,
    pub view: Option<ViewPlane>,
    #[serde(rename = "type")]
    pub kind: PointerEventType,
    pub button: Option<MouseButton>,
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoverLeavePayload {
    pub world: Option<WorldCoord>,
    pub voxel: Option<VoxelCoord>,
    pub intensity: IntensityMap,
    pub view: Option<ViewPlane>,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: i64,
}

impl HoverLeavePayload {
    pub fn now() -> Self {
        Self {
            world: None,
            voxel: None,
            intensity: IntensityMap::new(),
            view: None,
            kind: "leave".to_string(),
            timestamp: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrosshairPayload {
    pub world: WorldCoord,
    pub voxel: Option<VoxelCoord>,
    pub intensity: IntensityMap,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrosshairResponse {
    pub request_id: Option<Value>,
    pub world: Option<WorldCoord>,
    pub voxel: Option<VoxelCoord>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub id: LayerId,
    pub visible: bool,
    pub opacity: f64,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayersResponse {
    pub request_id: Option<Value>,
    pub layers: Vec<LayerSummary>,
    pub timestamp: i64,
}
