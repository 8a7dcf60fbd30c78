//! In-memory implementation of the viewer toolkit, used by the CLI driver and tests.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use shared::protocol::VolumeSpec;

use crate::{
    ColorMap, ImageLayer, LayerPanel, MountSurface, StatusDisplay, StatusReadout, Viewer,
    ViewerOptions, ViewerToolkit, VolLayer, Volume,
};

mod layers;
mod viewer;
mod volume;

pub use layers::{HeadlessImageLayer, HeadlessStack};
pub use viewer::{HeadlessSliceView, HeadlessViewer};
pub use volume::{DenseVolume, GridSpace};

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct HeadlessToolkit {
    notify_coord_changes: bool,
    create_delay: Option<Duration>,
    viewers: RwLock<Vec<Arc<HeadlessViewer>>>,
}

impl HeadlessToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Viewers built by this toolkit publish crosshair changes instead of requiring polling.
    pub fn with_coord_notifications(mut self) -> Self {
        self.notify_coord_changes = true;
        self
    }

    /// Makes viewer construction take `delay`, like an asynchronous GPU/canvas setup.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn viewers_created(&self) -> usize {
        read(&self.viewers).len()
    }

    pub fn last_viewer(&self) -> Option<Arc<HeadlessViewer>> {
        read(&self.viewers).last().cloned()
    }
}

#[async_trait]
impl ViewerToolkit for HeadlessToolkit {
    fn build_volume(&self, spec: &VolumeSpec) -> Result<Arc<dyn Volume>> {
        Ok(Arc::new(DenseVolume::from_spec(spec)?))
    }

    fn colormap(&self, name: &str) -> Result<ColorMap> {
        ColorMap::from_preset(name)
    }

    fn compose(&self, background: VolLayer) -> Result<Arc<dyn ImageLayer>> {
        let stack = Arc::new(HeadlessStack::new(background));
        Ok(Arc::new(HeadlessImageLayer::new(stack)))
    }

    async fn create_viewer(&self, options: ViewerOptions) -> Result<Arc<dyn Viewer>> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        let viewer = Arc::new(HeadlessViewer::new(options, self.notify_coord_changes));
        write(&self.viewers).push(viewer.clone());
        Ok(viewer)
    }
}

pub struct HeadlessSurface {
    id: String,
    attached: AtomicBool,
    reduced_motion: AtomicBool,
}

impl HeadlessSurface {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attached: AtomicBool::new(true),
            reduced_motion: AtomicBool::new(false),
        }
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub fn set_reduced_motion(&self, reduced: bool) {
        self.reduced_motion.store(reduced, Ordering::SeqCst);
    }
}

impl MountSurface for HeadlessSurface {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn prefers_reduced_motion(&self) -> bool {
        self.reduced_motion.load(Ordering::SeqCst)
    }
}

/// Layer panel that only counts what it was asked to do.
#[derive(Default)]
pub struct RecordingPanel {
    attached: RwLock<Option<Arc<dyn ImageLayer>>>,
    has_viewer: AtomicBool,
    hidden: AtomicBool,
    refreshes: AtomicUsize,
    updates: AtomicUsize,
}

impl RecordingPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn is_visible(&self) -> bool {
        !self.hidden.load(Ordering::SeqCst)
    }

    pub fn has_viewer(&self) -> bool {
        self.has_viewer.load(Ordering::SeqCst)
    }

    pub fn attached_layer_ids(&self) -> Vec<String> {
        read(&self.attached)
            .as_ref()
            .map(|layer| {
                layer
                    .layer_ids()
                    .into_iter()
                    .map(|id| id.0)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl LayerPanel for RecordingPanel {
    fn attach(&self, image_layer: Arc<dyn ImageLayer>, viewer: Option<Arc<dyn Viewer>>) {
        *write(&self.attached) = Some(image_layer);
        if viewer.is_some() {
            self.has_viewer.store(true, Ordering::SeqCst);
        }
    }

    fn set_visible(&self, visible: bool) {
        self.hidden.store(!visible, Ordering::SeqCst);
    }

    fn refresh_from_image_layer(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn request_update(&self) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

/// Status display that keeps the latest readout.
#[derive(Default)]
pub struct RecordingStatusDisplay {
    latest: RwLock<Option<StatusReadout>>,
    shown: AtomicUsize,
}

impl RecordingStatusDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<StatusReadout> {
        read(&self.latest).clone()
    }

    pub fn shown(&self) -> usize {
        self.shown.load(Ordering::SeqCst)
    }
}

impl StatusDisplay for RecordingStatusDisplay {
    fn show(&self, readout: &StatusReadout) {
        *write(&self.latest) = Some(readout.clone());
        self.shown.fetch_add(1, Ordering::SeqCst);
    }
}
