use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, RwLock,
};

use shared::domain::{ViewPlane, WorldCoord};
use tokio::sync::broadcast;

use super::{read, write};
use crate::{
    ImageLayer, Interaction, MouseState, SliceInfo, SlicePosition, SliceView, Viewer,
    ViewerOptions,
};

pub struct HeadlessSliceView {
    plane: ViewPlane,
    renders: AtomicUsize,
}

impl HeadlessSliceView {
    fn new(plane: ViewPlane) -> Self {
        Self {
            plane,
            renders: AtomicUsize::new(0),
        }
    }

    pub fn plane(&self) -> ViewPlane {
        self.plane
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl SliceView for HeadlessSliceView {
    fn render_slice(&self) {
        self.renders.fetch_add(1, Ordering::SeqCst);
    }
}

struct PlaneView {
    plane: ViewPlane,
    image_layer: Arc<dyn ImageLayer>,
    slice_view: Arc<HeadlessSliceView>,
}

/// Three-pane viewer without a rendering backend. Records what it is told
/// to do so that callers can observe it.
pub struct HeadlessViewer {
    options: ViewerOptions,
    views: Vec<PlaneView>,
    coord: RwLock<Option<WorldCoord>>,
    coord_history: RwLock<Vec<WorldCoord>>,
    mouse: RwLock<Option<MouseState>>,
    size: RwLock<Option<(u32, u32)>>,
    interactions: broadcast::Sender<Interaction>,
    coord_changes: Option<broadcast::Sender<WorldCoord>>,
}

impl HeadlessViewer {
    pub fn new(options: ViewerOptions, notify_coord_changes: bool) -> Self {
        let views = ViewPlane::ALL
            .iter()
            .map(|plane| PlaneView {
                plane: *plane,
                image_layer: options.image_layer.view_copy(),
                slice_view: Arc::new(HeadlessSliceView::new(*plane)),
            })
            .collect();
        let initial = center_of(options.image_layer.as_ref());
        let (interactions, _) = broadcast::channel(256);
        let coord_changes = notify_coord_changes.then(|| broadcast::channel(256).0);
        Self {
            options,
            views,
            coord: RwLock::new(initial),
            coord_history: RwLock::new(Vec::new()),
            mouse: RwLock::new(None),
            size: RwLock::new(None),
            interactions,
            coord_changes,
        }
    }

    pub fn options(&self) -> &ViewerOptions {
        &self.options
    }

    /// Every coordinate passed to `set_world_coord`, oldest first.
    pub fn coord_history(&self) -> Vec<WorldCoord> {
        read(&self.coord_history).clone()
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        *read(&self.size)
    }

    pub fn render_count(&self, plane: ViewPlane) -> usize {
        self.views
            .iter()
            .find(|view| view.plane == plane)
            .map(|view| view.slice_view.render_count())
            .unwrap_or_default()
    }

    pub fn view_layer(&self, plane: ViewPlane) -> Option<Arc<dyn ImageLayer>> {
        self.views
            .iter()
            .find(|view| view.plane == plane)
            .map(|view| view.image_layer.clone())
    }

    /// Simulates the pointer resting over `plane` at `world`.
    pub fn hover(&self, world: WorldCoord, plane: ViewPlane) {
        *write(&self.mouse) = Some(MouseState {
            world: Some(world),
            view: Some(plane),
        });
    }

    pub fn clear_mouse(&self) {
        *write(&self.mouse) = None;
    }

    /// Delivers a surface interaction to subscribers. Returns false when nobody listens.
    pub fn interact(&self, interaction: Interaction) -> bool {
        self.interactions.send(interaction).is_ok()
    }
}

fn center_of(image_layer: &dyn ImageLayer) -> Option<WorldCoord> {
    let space = image_layer.reference_space()?;
    let dim = image_layer.reference_dim()?;
    let mut grid = [0.0; 3];
    for (axis, slot) in grid.iter_mut().enumerate() {
        *slot = (dim[axis].saturating_sub(1) / 2) as f64;
    }
    space.grid_to_world(grid).ok()
}

impl Viewer for HeadlessViewer {
    fn image_layer(&self) -> Arc<dyn ImageLayer> {
        self.options.image_layer.clone()
    }

    fn resize(&self, width: u32, height: u32) {
        *write(&self.size) = Some((width, height));
    }

    fn current_coord(&self) -> Option<WorldCoord> {
        *read(&self.coord)
    }

    fn set_world_coord(&self, coord: WorldCoord) {
        *write(&self.coord) = Some(coord);
        write(&self.coord_history).push(coord);
        if let Some(changes) = &self.coord_changes {
            let _ = changes.send(coord);
        }
    }

    fn mouse_state(&self) -> Option<MouseState> {
        *read(&self.mouse)
    }

    fn slice_info(&self) -> Option<SliceInfo> {
        let coord = self.current_coord()?;
        let space = self.options.image_layer.reference_space()?;
        let dim = self.options.image_layer.reference_dim()?;
        let grid = space.world_to_grid(coord).ok()?;
        let position = |axis: usize| {
            let max = dim[axis].saturating_sub(1) as f64;
            SlicePosition {
                index: grid[axis].round().clamp(0.0, max) as usize,
                total: dim[axis],
            }
        };
        Some(SliceInfo {
            axial: position(2),
            coronal: position(1),
            sagittal: position(0),
        })
    }

    fn slice_view(&self, plane: ViewPlane) -> Option<Arc<dyn SliceView>> {
        self.views
            .iter()
            .find(|view| view.plane == plane)
            .map(|view| view.slice_view.clone() as Arc<dyn SliceView>)
    }

    fn image_layers(&self) -> Vec<Arc<dyn ImageLayer>> {
        std::iter::once(self.options.image_layer.clone())
            .chain(self.views.iter().map(|view| view.image_layer.clone()))
            .collect()
    }

    fn subscribe_interactions(&self) -> broadcast::Receiver<Interaction> {
        self.interactions.subscribe()
    }

    fn coord_changes(&self) -> Option<broadcast::Receiver<WorldCoord>> {
        self.coord_changes.as_ref().map(|tx| tx.subscribe())
    }
}
