use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use shared::{
    domain::{LayerId, ViewPlane},
    protocol::{WidgetConfig, DEFAULT_COLORMAP, DEFAULT_THRESHOLD, FALLBACK_RANGE},
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use viewer_integration::{
    ColorMap, ImageLayer, LayerPanel, LayerSnapshot, LayerStack, Layout, MountSurface, Viewer,
    ViewerOptions, ViewerToolkit, VolLayer,
};

use crate::{bridge::EventBridge, error::SessionError, status::StatusReporter};

/// Everything a constructed viewer hands out, cached for the life of the mount.
#[derive(Clone)]
pub struct ViewerHandles {
    pub viewer: Arc<dyn Viewer>,
    pub image_layer: Arc<dyn ImageLayer>,
    pub stack: Arc<dyn LayerStack>,
}

type ReadyFuture = Shared<BoxFuture<'static, Result<Option<ViewerHandles>, SessionError>>>;

#[derive(Default)]
struct SessionState {
    config: Option<Arc<WidgetConfig>>,
    ready: Option<ReadyFuture>,
    handles: Option<ViewerHandles>,
}

/// Owns the lazily constructed viewer of one mount.
pub struct ViewerSession {
    mount: Arc<dyn MountSurface>,
    toolkit: Arc<dyn ViewerToolkit>,
    panel: Arc<dyn LayerPanel>,
    status: Arc<StatusReporter>,
    bridge: Arc<EventBridge>,
    debug: AtomicBool,
    state: Mutex<SessionState>,
}

impl ViewerSession {
    pub fn new(
        mount: Arc<dyn MountSurface>,
        toolkit: Arc<dyn ViewerToolkit>,
        panel: Arc<dyn LayerPanel>,
        status: Arc<StatusReporter>,
        bridge: Arc<EventBridge>,
    ) -> Self {
        Self {
            mount,
            toolkit,
            panel,
            status,
            bridge,
            debug: AtomicBool::new(false),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn mount_id(&self) -> &str {
        self.mount.id()
    }

    pub fn mount(&self) -> &Arc<dyn MountSurface> {
        &self.mount
    }

    pub fn toolkit(&self) -> &Arc<dyn ViewerToolkit> {
        &self.toolkit
    }

    pub fn panel(&self) -> &Arc<dyn LayerPanel> {
        &self.panel
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Stores the latest configuration. An existing viewer is kept as is.
    pub async fn set_config(&self, config: Option<WidgetConfig>) {
        if let Some(config) = &config {
            self.debug.store(config.debug_enabled(), Ordering::Relaxed);
            self.panel.set_visible(config.sidebar_visible());
        }
        self.state.lock().await.config = config.map(Arc::new);
    }

    pub async fn config(&self) -> Option<Arc<WidgetConfig>> {
        self.state.lock().await.config.clone()
    }

    pub async fn handles(&self) -> Option<ViewerHandles> {
        self.state.lock().await.handles.clone()
    }

    /// Resolves to the viewer, constructing it on first call. Concurrent callers share
    /// the one in-flight construction; its outcome, success or failure, is kept.
    /// Without a configuration this is `Ok(None)` and nothing is remembered.
    pub async fn ensure_ready(self: &Arc<Self>) -> Result<Option<ViewerHandles>, SessionError> {
        let ready = {
            let mut state = self.state.lock().await;
            if let Some(ready) = &state.ready {
                ready.clone()
            } else {
                let Some(config) = state.config.clone() else {
                    return Ok(None);
                };
                let session = Arc::clone(self);
                let ready = async move { session.initialize(config).await }
                    .boxed()
                    .shared();
                state.ready = Some(ready.clone());
                ready
            }
        };
        ready.await
    }

    async fn initialize(
        self: Arc<Self>,
        config: Arc<WidgetConfig>,
    ) -> Result<Option<ViewerHandles>, SessionError> {
        let result = self.construct(&config).await;
        match &result {
            Ok(handles) => {
                self.state.lock().await.handles = Some(handles.clone());
                self.panel
                    .attach(handles.image_layer.clone(), Some(handles.viewer.clone()));
                self.panel.request_update();
                self.bridge.install(handles);
                self.status.refresh_soon(handles);
                info!(mount = self.mount_id(), "viewer ready");
            }
            Err(err) => error!(mount = self.mount_id(), %err, "viewer initialization failed"),
        }
        result.map(Some)
    }

    async fn construct(&self, config: &WidgetConfig) -> Result<ViewerHandles, SessionError> {
        let spec = config.background_volume()?;
        spec.geometry()?;
        let volume = self
            .toolkit
            .build_volume(spec)
            .map_err(SessionError::volume)?;

        let range = config
            .bg_range
            .or_else(|| volume.range())
            .unwrap_or(FALLBACK_RANGE);
        let threshold = config.bg_threshold.unwrap_or(DEFAULT_THRESHOLD);
        let colormap = self.resolve_colormap(config.background_colormap());
        let id = config.background_id();
        if self.debug_enabled() {
            debug!(mount = self.mount_id(), layer = %id, ?range, "building background layer");
        }

        let background = VolLayer::new(id, volume, colormap, range, threshold, 1.0);
        let image_layer = self
            .toolkit
            .compose(background)
            .map_err(SessionError::compose)?;
        let viewer = self
            .toolkit
            .create_viewer(ViewerOptions {
                container: self.mount.clone(),
                image_layer: image_layer.clone(),
                layout: Layout::LeftTall,
                show_crosshair: true,
                show_slider: true,
            })
            .await
            .map_err(SessionError::viewer_creation)?;

        Ok(ViewerHandles {
            stack: image_layer.stack(),
            image_layer,
            viewer,
        })
    }

    /// Looks up a colormap preset, falling back to the default one with a warning.
    pub fn resolve_colormap(&self, name: &str) -> Option<ColorMap> {
        match self.toolkit.colormap(name) {
            Ok(colormap) => Some(colormap),
            Err(err) => {
                warn!(
                    mount = self.mount_id(),
                    colormap = name,
                    fallback = DEFAULT_COLORMAP,
                    %err,
                    "colormap lookup failed; using fallback"
                );
                self.toolkit.colormap(DEFAULT_COLORMAP).ok()
            }
        }
    }

    pub async fn resize(&self, width: u32, height: u32) {
        if let Some(handles) = self.handles().await {
            handles.viewer.resize(width, height);
        }
    }

    /// The layer `id` names, or the most recently added one when `id` is absent or empty.
    pub fn resolve_layer(handles: &ViewerHandles, id: Option<&LayerId>) -> Option<LayerSnapshot> {
        match id {
            Some(id) if !id.as_str().is_empty() => handles.stack.layer(id),
            _ => {
                let last = handles.image_layer.layer_ids().pop()?;
                handles.stack.layer(&last)
            }
        }
    }

    /// Redraws the current slice of every plane; property updates alone do not.
    pub fn force_rerender(handles: &ViewerHandles) {
        for plane in ViewPlane::ALL {
            if let Some(view) = handles.viewer.slice_view(plane) {
                view.render_slice();
            }
        }
    }

    /// Hands the panel the current image layer and makes it rebuild its rows.
    pub fn refresh_panel(&self, handles: &ViewerHandles) {
        self.panel
            .attach(handles.image_layer.clone(), Some(handles.viewer.clone()));
        self.panel.refresh_from_image_layer();
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
