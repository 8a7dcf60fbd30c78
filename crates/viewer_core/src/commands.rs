use std::sync::Arc;

use serde_json::Value;
use shared::{
    domain::{LayerId, Window, WorldCoord},
    protocol::{
        now_millis, Command, CrosshairResponse, HostEventKind, LayerSummary, LayersResponse,
        VolumeSpec, DEFAULT_COLORMAP, DEFAULT_THRESHOLD, FALLBACK_RANGE,
    },
};
use tracing::{debug, warn};
use viewer_integration::{HostTransport, LayerUpdate, VolLayer};

use crate::{
    animator::CrosshairAnimator,
    bridge::emit_event,
    config::WidgetSettings,
    error::SessionError,
    resolver::world_to_voxel,
    session::{ViewerHandles, ViewerSession},
};

struct AddLayer {
    layer_id: Option<LayerId>,
    volume: Option<VolumeSpec>,
    colormap: Option<String>,
    range: Option<Window>,
    threshold: Option<Window>,
    opacity: Option<f64>,
}

/// Applies host commands to one mount's viewer.
pub struct CommandEngine {
    session: Arc<ViewerSession>,
    transport: Arc<dyn HostTransport>,
    animator: Arc<CrosshairAnimator>,
    settings: WidgetSettings,
}

impl CommandEngine {
    pub fn new(
        session: Arc<ViewerSession>,
        transport: Arc<dyn HostTransport>,
        animator: Arc<CrosshairAnimator>,
        settings: WidgetSettings,
    ) -> Self {
        Self {
            session,
            transport,
            animator,
            settings,
        }
    }

    /// Waits for the viewer, then applies `command`. Only a failed viewer
    /// construction is an error; unusable commands are dropped.
    pub async fn apply(&self, command: Command) -> Result<(), SessionError> {
        let Some(handles) = self.session.ensure_ready().await? else {
            debug!(
                mount = self.session.mount_id(),
                command = command.kind(),
                "no configuration yet; command dropped"
            );
            return Ok(());
        };
        if self.session.debug_enabled() {
            debug!(mount = self.session.mount_id(), command = command.kind(), "applying command");
        }

        match command {
            Command::AddLayer {
                layer_id,
                volume,
                colormap,
                range,
                threshold,
                opacity,
            } => self.add_layer(
                &handles,
                AddLayer {
                    layer_id,
                    volume,
                    colormap,
                    range,
                    threshold,
                    opacity,
                },
            ),
            Command::SetWindow { layer_id, range } => {
                if let Some(range) = range {
                    self.update_layer(&handles, layer_id.as_ref(), LayerUpdate::Range(range));
                }
            }
            Command::SetThreshold {
                layer_id,
                threshold,
            } => {
                if let Some(threshold) = threshold {
                    self.update_layer(
                        &handles,
                        layer_id.as_ref(),
                        LayerUpdate::Threshold(threshold),
                    );
                }
            }
            Command::SetColormap { layer_id, colormap } => {
                self.set_colormap(&handles, layer_id.as_ref(), colormap.as_deref())
            }
            Command::SetOpacity { layer_id, opacity } => {
                if let Some(alpha) = opacity.and_then(normalize_opacity) {
                    self.update_layer(&handles, layer_id.as_ref(), LayerUpdate::Alpha(alpha));
                }
            }
            Command::SetLayerVisible { layer_id, visible } => self.update_layer(
                &handles,
                layer_id.as_ref(),
                LayerUpdate::Visible(visible != Some(false)),
            ),
            Command::SetCrosshair {
                coord,
                animate,
                duration,
            } => self.set_crosshair(&handles, coord.as_deref(), animate, duration),
            Command::GetCrosshair { request_id } => self.get_crosshair(&handles, request_id),
            Command::SetLayerOrder { layer_ids } => {
                if let Some(layer_ids) = layer_ids {
                    self.set_layer_order(&handles, &layer_ids);
                }
            }
            Command::RemoveLayer { layer_id } => self.remove_layer(&handles, layer_id.as_ref()),
            Command::GetLayers { request_id } => self.get_layers(&handles, request_id),
            Command::Unknown => {
                debug!(mount = self.session.mount_id(), "unknown command ignored");
            }
        }
        Ok(())
    }

    fn add_layer(&self, handles: &ViewerHandles, command: AddLayer) {
        let mount = self.session.mount_id();
        let Some(spec) = command.volume else {
            debug!(mount, "add-layer without a volume ignored");
            return;
        };
        if let Err(err) = spec.geometry() {
            warn!(mount, %err, "add-layer skipped");
            return;
        }
        let volume = match self.session.toolkit().build_volume(&spec) {
            Ok(volume) => volume,
            Err(err) => {
                warn!(mount, err = %format!("{err:#}"), "add-layer skipped: volume construction failed");
                return;
            }
        };

        let colormap = match command.colormap.as_deref() {
            Some(name) if !name.is_empty() => self.session.resolve_colormap(name),
            _ => self.session.resolve_colormap(DEFAULT_COLORMAP),
        };
        let range = command
            .range
            .or_else(|| volume.range())
            .unwrap_or(FALLBACK_RANGE);
        let threshold = command.threshold.unwrap_or(DEFAULT_THRESHOLD);
        let alpha = command.opacity.and_then(normalize_opacity).unwrap_or(1.0);
        let id = match command.layer_id {
            Some(id) if !id.as_str().is_empty() => id,
            _ => LayerId::generate(),
        };

        let layer = VolLayer::new(id.clone(), volume, colormap, range, threshold, alpha);
        if let Err(err) = handles.image_layer.add_vol_layer(layer) {
            warn!(mount, layer = %id, %err, "add-layer rejected");
            return;
        }
        ViewerSession::force_rerender(handles);
        self.session.refresh_panel(handles);
    }

    /// Applies `update` to the resolved layer on every image-layer instance, then redraws.
    fn update_layer(&self, handles: &ViewerHandles, layer_id: Option<&LayerId>, update: LayerUpdate) {
        let Some(layer) = ViewerSession::resolve_layer(handles, layer_id) else {
            debug!(mount = self.session.mount_id(), ?layer_id, "target layer not found");
            return;
        };
        for image_layer in handles.viewer.image_layers() {
            if let Err(err) = image_layer.update_layer(&layer.id, &update) {
                warn!(mount = self.session.mount_id(), layer = %layer.id, %err, "layer update failed on one view");
            }
        }
        ViewerSession::force_rerender(handles);
    }

    fn set_colormap(&self, handles: &ViewerHandles, layer_id: Option<&LayerId>, name: Option<&str>) {
        let Some(name) = name.filter(|name| !name.is_empty()) else {
            return;
        };
        match self.session.toolkit().colormap(name) {
            Ok(colormap) => {
                self.update_layer(handles, layer_id, LayerUpdate::Colormap(Some(colormap)))
            }
            Err(err) => warn!(
                mount = self.session.mount_id(),
                colormap = name,
                %err,
                "set-colormap ignored"
            ),
        }
    }

    fn set_crosshair(
        &self,
        handles: &ViewerHandles,
        coord: Option<&[f64]>,
        animate: Option<bool>,
        duration: Option<f64>,
    ) {
        let Some(target) = coord.and_then(WorldCoord::from_slice) else {
            return;
        };
        let viewer = &handles.viewer;
        match (animate == Some(true), viewer.current_coord()) {
            (true, Some(from)) => {
                let duration = duration.unwrap_or(self.settings.animation_duration_ms);
                self.animator.animate(
                    viewer.clone(),
                    from,
                    target,
                    duration,
                    self.session.mount().prefers_reduced_motion(),
                );
            }
            _ => self.animator.jump(viewer.as_ref(), target),
        }
    }

    fn get_crosshair(&self, handles: &ViewerHandles, request_id: Option<Value>) {
        if !self.transport.is_connected() {
            debug!(mount = self.session.mount_id(), "no host connection; get-crosshair dropped");
            return;
        }
        let world = handles.viewer.current_coord();
        let space = handles.image_layer.reference_space();
        let response = CrosshairResponse {
            request_id,
            world,
            voxel: world_to_voxel(world, space.as_deref()),
            timestamp: now_millis(),
        };
        emit_event(
            self.transport.as_ref(),
            self.session.mount_id(),
            HostEventKind::CrosshairResponse,
            &response,
        );
    }

    fn set_layer_order(&self, handles: &ViewerHandles, layer_ids: &[LayerId]) {
        for (index, id) in layer_ids.iter().enumerate() {
            if let Err(err) = handles.stack.move_layer(id, index) {
                warn!(mount = self.session.mount_id(), layer = %id, index, %err, "failed to move layer");
            }
        }
        ViewerSession::force_rerender(handles);
        self.session.refresh_panel(handles);
    }

    fn remove_layer(&self, handles: &ViewerHandles, layer_id: Option<&LayerId>) {
        let Some(id) = layer_id.filter(|id| !id.as_str().is_empty()) else {
            return;
        };
        if handles.stack.layer(id).is_none() {
            debug!(mount = self.session.mount_id(), layer = %id, "remove-layer: unknown layer");
            return;
        }
        match handles.stack.remove_layer(id) {
            Ok(()) => {
                ViewerSession::force_rerender(handles);
                self.session.refresh_panel(handles);
            }
            Err(err) => warn!(mount = self.session.mount_id(), layer = %id, %err, "failed to remove layer"),
        }
    }

    fn get_layers(&self, handles: &ViewerHandles, request_id: Option<Value>) {
        if !self.transport.is_connected() {
            debug!(mount = self.session.mount_id(), "no host connection; get-layers dropped");
            return;
        }
        let layers = handles
            .stack
            .layer_ids()
            .into_iter()
            .enumerate()
            .filter_map(|(index, id)| {
                let layer = handles.stack.layer(&id)?;
                Some(LayerSummary {
                    visible: layer.properties.is_visible(),
                    opacity: layer.properties.effective_opacity(),
                    index,
                    id,
                })
            })
            .collect();
        let response = LayersResponse {
            request_id,
            layers,
            timestamp: now_millis(),
        };
        emit_event(
            self.transport.as_ref(),
            self.session.mount_id(),
            HostEventKind::LayersResponse,
            &response,
        );
    }
}

fn normalize_opacity(opacity: f64) -> Option<f64> {
    opacity.is_finite().then(|| opacity.clamp(0.0, 1.0))
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
