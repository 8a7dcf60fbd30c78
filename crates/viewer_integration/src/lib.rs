//! Capability surfaces the orthogonal viewer engine drives: volumes and their
//! spatial transforms, the layer stack, the composite image layer, the viewer
//! itself, the host transport, and the passive UI consumers around it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::{LayerId, ViewPlane, Window, WorldCoord},
    protocol::{HostMessage, VolumeSpec},
};
use tokio::sync::broadcast;

pub mod colormap;
pub mod headless;
pub mod transport;

pub use colormap::ColorMap;
pub use transport::ChannelHostTransport;

/// World <-> grid mapping of one volume.
pub trait SpatialTransform: Send + Sync {
    fn world_to_grid(&self, world: WorldCoord) -> anyhow::Result<[f64; 3]>;
    fn grid_to_world(&self, grid: [f64; 3]) -> anyhow::Result<WorldCoord>;
}

/// A 3-D sample grid.
pub trait Volume: Send + Sync {
    fn dim(&self) -> [usize; 3];
    fn space(&self) -> Arc<dyn SpatialTransform>;
    fn value_at(&self, i: usize, j: usize, k: usize) -> Option<f64>;
    /// Volume-derived display range, `None` when the samples cannot produce one.
    fn range(&self) -> Option<Window>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerProperties {
    pub colormap: Option<ColorMap>,
    pub range: Window,
    pub threshold: Window,
    pub alpha: Option<f64>,
    /// Older layer implementations carry opacity under this name; `alpha` wins when both exist.
    pub opacity: Option<f64>,
    pub visible: Option<bool>,
}

impl LayerProperties {
    pub fn effective_opacity(&self) -> f64 {
        self.alpha.or(self.opacity).unwrap_or(1.0)
    }

    pub fn is_visible(&self) -> bool {
        self.visible != Some(false)
    }

    pub fn apply(&mut self, update: &LayerUpdate) {
        match update {
            LayerUpdate::Range(range) => self.range = *range,
            LayerUpdate::Threshold(threshold) => self.threshold = *threshold,
            LayerUpdate::Colormap(colormap) => self.colormap = colormap.clone(),
            LayerUpdate::Alpha(alpha) => self.alpha = Some(*alpha),
            LayerUpdate::Visible(visible) => self.visible = Some(*visible),
        }
    }
}

/// One property mutation broadcast to every image-layer instance.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerUpdate {
    Range(Window),
    Threshold(Window),
    Colormap(Option<ColorMap>),
    Alpha(f64),
    Visible(bool),
}

/// A layer ready to be placed on a stack.
#[derive(Clone)]
pub struct VolLayer {
    pub id: LayerId,
    pub volume: Arc<dyn Volume>,
    pub properties: LayerProperties,
}

impl VolLayer {
    pub fn new(
        id: LayerId,
        volume: Arc<dyn Volume>,
        colormap: Option<ColorMap>,
        range: Window,
        threshold: Window,
        alpha: f64,
    ) -> Self {
        Self {
            id,
            volume,
            properties: LayerProperties {
                colormap,
                range,
                threshold,
                alpha: Some(alpha),
                opacity: None,
                visible: Some(true),
            },
        }
    }
}

/// Read view of one stacked layer.
#[derive(Clone)]
pub struct LayerSnapshot {
    pub id: LayerId,
    pub volume: Arc<dyn Volume>,
    pub properties: LayerProperties,
}

pub trait LayerStack: Send + Sync {
    fn layer_ids(&self) -> Vec<LayerId>;
    fn layer(&self, id: &LayerId) -> Option<LayerSnapshot>;
    fn move_layer(&self, id: &LayerId, index: usize) -> anyhow::Result<()>;
    fn remove_layer(&self, id: &LayerId) -> anyhow::Result<()>;

    fn len(&self) -> usize {
        self.layer_ids().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Composite of a layer stack as seen by one view.
pub trait ImageLayer: Send + Sync {
    fn stack(&self) -> Arc<dyn LayerStack>;
    fn layer_ids(&self) -> Vec<LayerId>;
    fn add_vol_layer(&self, layer: VolLayer) -> anyhow::Result<()>;
    fn update_layer(&self, id: &LayerId, update: &LayerUpdate) -> anyhow::Result<()>;
    fn layer_properties(&self, id: &LayerId) -> Option<LayerProperties>;
    /// Spatial frame of the composite (the background volume's space).
    fn reference_space(&self) -> Option<Arc<dyn SpatialTransform>>;
    fn reference_dim(&self) -> Option<[usize; 3]>;
    /// Independent per-view instance sharing this composite's stack.
    fn view_copy(&self) -> Arc<dyn ImageLayer>;
}

pub trait SliceView: Send + Sync {
    fn render_slice(&self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseState {
    pub world: Option<WorldCoord>,
    pub view: Option<ViewPlane>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicePosition {
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceInfo {
    pub axial: SlicePosition,
    pub coronal: SlicePosition,
    pub sagittal: SlicePosition,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerInfo {
    /// DOM button code: 0 primary, 1 auxiliary, 2 secondary.
    pub button: u16,
    pub shift: bool,
    pub ctrl: bool,
    pub meta: bool,
    pub alt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    pub key: String,
    pub shift: bool,
}

impl KeyInput {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            shift: false,
        }
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

/// Interaction signals observed on the viewer surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    PointerMove(PointerInfo),
    PointerLeave,
    Click(PointerInfo),
    DoubleClick(PointerInfo),
    ContextMenu(PointerInfo),
    KeyDown(KeyInput),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    LeftTall,
}

#[derive(Clone)]
pub struct ViewerOptions {
    pub container: Arc<dyn MountSurface>,
    pub image_layer: Arc<dyn ImageLayer>,
    pub layout: Layout,
    pub show_crosshair: bool,
    pub show_slider: bool,
}

pub trait Viewer: Send + Sync {
    fn image_layer(&self) -> Arc<dyn ImageLayer>;
    fn resize(&self, width: u32, height: u32);
    fn current_coord(&self) -> Option<WorldCoord>;
    fn set_world_coord(&self, coord: WorldCoord);
    fn mouse_state(&self) -> Option<MouseState>;
    fn slice_info(&self) -> Option<SliceInfo>;
    fn slice_view(&self, plane: ViewPlane) -> Option<Arc<dyn SliceView>>;
    /// The main composite followed by every per-view instance.
    fn image_layers(&self) -> Vec<Arc<dyn ImageLayer>>;
    fn subscribe_interactions(&self) -> broadcast::Receiver<Interaction>;

    /// Push notification of crosshair moves; `None` means callers must poll.
    fn coord_changes(&self) -> Option<broadcast::Receiver<WorldCoord>> {
        None
    }
}

/// Constructors of the rendering library.
#[async_trait]
pub trait ViewerToolkit: Send + Sync {
    fn build_volume(&self, spec: &VolumeSpec) -> anyhow::Result<Arc<dyn Volume>>;
    fn colormap(&self, name: &str) -> anyhow::Result<ColorMap>;
    /// Seeds a stack with `background` and wraps it in a composite image layer.
    fn compose(&self, background: VolLayer) -> anyhow::Result<Arc<dyn ImageLayer>>;
    async fn create_viewer(&self, options: ViewerOptions) -> anyhow::Result<Arc<dyn Viewer>>;
}

/// Element the viewer is mounted into.
pub trait MountSurface: Send + Sync {
    fn id(&self) -> &str;
    fn is_attached(&self) -> bool;
    fn prefers_reduced_motion(&self) -> bool;
}

/// Message channel to the host application.
pub trait HostTransport: Send + Sync {
    fn is_connected(&self) -> bool;
    fn emit(&self, name: &str, payload: Value);
    /// Named messages pushed by the host outside of configuration renders.
    fn subscribe_messages(&self) -> broadcast::Receiver<HostMessage>;
}

pub struct MissingHostTransport;

impl HostTransport for MissingHostTransport {
    fn is_connected(&self) -> bool {
        false
    }

    fn emit(&self, name: &str, _payload: Value) {
        tracing::trace!(event = name, "no host transport; event dropped");
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<HostMessage> {
        let (_tx, rx) = broadcast::channel(1);
        rx
    }
}

/// Side panel showing per-layer controls. It does not notice a reassigned
/// image layer by itself; callers refresh it explicitly.
pub trait LayerPanel: Send + Sync {
    fn attach(&self, image_layer: Arc<dyn ImageLayer>, viewer: Option<Arc<dyn Viewer>>);
    fn set_visible(&self, visible: bool);
    fn refresh_from_image_layer(&self);
    fn request_update(&self);
}

pub struct NoopLayerPanel;

impl LayerPanel for NoopLayerPanel {
    fn attach(&self, _image_layer: Arc<dyn ImageLayer>, _viewer: Option<Arc<dyn Viewer>>) {}

    fn set_visible(&self, _visible: bool) {}

    fn refresh_from_image_layer(&self) {}

    fn request_update(&self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntensityItem {
    pub label: String,
    pub value: String,
}

/// Rendered status-bar strings.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReadout {
    pub world: String,
    pub voxel: Option<String>,
    pub intensities: Vec<IntensityItem>,
    pub intensity_text: String,
    pub slice: String,
    pub accessible_label: String,
}

pub trait StatusDisplay: Send + Sync {
    fn show(&self, readout: &StatusReadout);
}

pub struct NoopStatusDisplay;

impl StatusDisplay for NoopStatusDisplay {
    fn show(&self, _readout: &StatusReadout) {}
}

/// Convenience for transports that record messages.
pub fn host_message(name: &str, payload: Value) -> HostMessage {
    HostMessage {
        name: name.to_string(),
        payload,
    }
}
