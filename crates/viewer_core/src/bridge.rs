//! Viewer interactions to host events, and the change watchers behind the
//! status bar and the `crosshair` event.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use shared::{
    domain::{MouseButton, ViewPlane, WorldCoord},
    protocol::{
        now_millis, CrosshairPayload, HostEventKind, HoverLeavePayload, PointerEventPayload,
        PointerEventType,
    },
};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, trace, warn};
use viewer_integration::{HostTransport, Interaction, KeyInput, MountSurface, PointerInfo};

use crate::{
    animator::CrosshairAnimator,
    config::WidgetSettings,
    lock,
    resolver::{intensity_map, pointer_coord, sample_intensities, world_to_voxel},
    scheduler::{spawn_watch, Throttle, WatchTrigger},
    session::ViewerHandles,
    status::StatusReporter,
};

/// Whether the surface should still run its own default handling of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    PassThrough,
    Handled,
}

/// Serializes `payload` and sends it as `<mount>_<event>`.
pub(crate) fn emit_event<T: Serialize>(
    transport: &dyn HostTransport,
    mount_id: &str,
    kind: HostEventKind,
    payload: &T,
) {
    let name = kind.qualified(mount_id);
    match serde_json::to_value(payload) {
        Ok(value) => transport.emit(&name, value),
        Err(err) => warn!(event = %name, %err, "failed to encode host event"),
    }
}

#[derive(Default)]
struct BridgeState {
    installed: bool,
    last_status_coord: Option<WorldCoord>,
    last_crosshair_coord: Option<WorldCoord>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct EventBridge {
    mount: Arc<dyn MountSurface>,
    transport: Arc<dyn HostTransport>,
    status: Arc<StatusReporter>,
    animator: Arc<CrosshairAnimator>,
    settings: WidgetSettings,
    hover: Throttle,
    state: Mutex<BridgeState>,
}

impl EventBridge {
    pub fn new(
        mount: Arc<dyn MountSurface>,
        transport: Arc<dyn HostTransport>,
        status: Arc<StatusReporter>,
        animator: Arc<CrosshairAnimator>,
        settings: WidgetSettings,
    ) -> Self {
        Self {
            hover: Throttle::new(settings.hover_throttle()),
            mount,
            transport,
            status,
            animator,
            settings,
            state: Mutex::new(BridgeState::default()),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_installed(&self) -> bool {
        lock(&self.state).installed
    }

    /// Wires the watchers and the interaction pump for `handles`. Only the first call does anything.
    pub fn install(self: &Arc<Self>, handles: &ViewerHandles) {
        {
            let mut state = lock(&self.state);
            if state.installed {
                return;
            }
            state.installed = true;
        }

        let period = self.settings.poll_interval();
        let status_watch = {
            let bridge = Arc::clone(self);
            let on_detach = Arc::clone(self);
            let handles = handles.clone();
            spawn_watch(
                "status",
                WatchTrigger::new(period, handles.viewer.coord_changes()),
                self.mount.clone(),
                move || bridge.poll_status(&handles),
                move || on_detach.teardown(),
            )
        };
        let crosshair_watch = {
            let bridge = Arc::clone(self);
            let handles = handles.clone();
            spawn_watch(
                "crosshair",
                WatchTrigger::new(period, handles.viewer.coord_changes()),
                self.mount.clone(),
                move || bridge.poll_crosshair(&handles),
                || {},
            )
        };
        let pump = self.spawn_interaction_pump(handles);

        lock(&self.state).tasks = vec![status_watch, crosshair_watch, pump];
        // A watcher may have seen the detach before the handles were stored.
        if !self.mount.is_attached() {
            self.teardown();
            return;
        }
        debug!(mount = self.mount.id(), "event handlers installed");
    }

    fn spawn_interaction_pump(self: &Arc<Self>, handles: &ViewerHandles) -> JoinHandle<()> {
        let bridge = Arc::clone(self);
        let handles = handles.clone();
        let mut interactions = handles.viewer.subscribe_interactions();
        tokio::spawn(async move {
            loop {
                match interactions.recv().await {
                    Ok(interaction) => {
                        if !bridge.mount.is_attached() {
                            break;
                        }
                        bridge.handle_interaction(&handles, interaction);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        trace!(skipped, "interaction pump lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stops the hover throttle and every background task.
    pub fn teardown(&self) {
        self.hover.cancel();
        let tasks = std::mem::take(&mut lock(&self.state).tasks);
        for task in tasks {
            task.abort();
        }
    }

    fn poll_status(&self, handles: &ViewerHandles) {
        let Some(coord) = handles.viewer.current_coord() else {
            return;
        };
        {
            let mut state = lock(&self.state);
            if state.last_status_coord == Some(coord) {
                return;
            }
            state.last_status_coord = Some(coord);
        }
        self.status.refresh_soon(handles);
    }

    fn poll_crosshair(&self, handles: &ViewerHandles) {
        let Some(coord) = handles.viewer.current_coord() else {
            return;
        };
        {
            let mut state = lock(&self.state);
            if state.last_crosshair_coord == Some(coord) {
                return;
            }
            state.last_crosshair_coord = Some(coord);
        }
        let space = handles.image_layer.reference_space();
        let payload = CrosshairPayload {
            world: coord,
            voxel: world_to_voxel(Some(coord), space.as_deref()),
            intensity: intensity_map(&sample_intensities(Some(coord), handles.stack.as_ref())),
            timestamp: now_millis(),
        };
        emit_event(
            self.transport.as_ref(),
            self.mount.id(),
            HostEventKind::Crosshair,
            &payload,
        );
    }

    pub fn handle_interaction(
        self: &Arc<Self>,
        handles: &ViewerHandles,
        interaction: Interaction,
    ) -> Disposition {
        match interaction {
            Interaction::PointerMove(pointer) => {
                self.status.refresh_soon(handles);
                self.schedule_hover(handles, pointer);
                Disposition::PassThrough
            }
            Interaction::PointerLeave => {
                self.hover.cancel();
                emit_event(
                    self.transport.as_ref(),
                    self.mount.id(),
                    HostEventKind::Hover,
                    &HoverLeavePayload::now(),
                );
                Disposition::PassThrough
            }
            Interaction::Click(pointer) => {
                self.emit_pointer(handles, PointerEventType::Click, pointer);
                Disposition::PassThrough
            }
            Interaction::DoubleClick(pointer) => {
                self.emit_pointer(handles, PointerEventType::Dblclick, pointer);
                Disposition::PassThrough
            }
            Interaction::ContextMenu(pointer) => {
                self.emit_pointer(handles, PointerEventType::Rightclick, pointer);
                Disposition::PassThrough
            }
            Interaction::KeyDown(key) => self.handle_key(handles, &key),
        }
    }

    fn schedule_hover(self: &Arc<Self>, handles: &ViewerHandles, pointer: PointerInfo) {
        let bridge = Arc::clone(self);
        let handles = handles.clone();
        self.hover.schedule(async move {
            let Some(mouse) = handles.viewer.mouse_state() else {
                return;
            };
            let Some(world) = mouse.world else {
                return;
            };
            let payload = bridge.pointer_payload(
                &handles,
                Some(world),
                mouse.view,
                PointerEventType::Hover,
                pointer,
            );
            emit_event(
                bridge.transport.as_ref(),
                bridge.mount.id(),
                HostEventKind::Hover,
                &payload,
            );
        });
    }

    fn emit_pointer(&self, handles: &ViewerHandles, kind: PointerEventType, pointer: PointerInfo) {
        let coord = pointer_coord(handles.viewer.as_ref());
        let view = handles.viewer.mouse_state().and_then(|mouse| mouse.view);
        let payload = self.pointer_payload(handles, coord, view, kind, pointer);
        emit_event(
            self.transport.as_ref(),
            self.mount.id(),
            kind.host_event(),
            &payload,
        );
    }

    fn pointer_payload(
        &self,
        handles: &ViewerHandles,
        world: Option<WorldCoord>,
        view: Option<ViewPlane>,
        kind: PointerEventType,
        pointer: PointerInfo,
    ) -> PointerEventPayload {
        let space = handles.image_layer.reference_space();
        PointerEventPayload {
            world,
            voxel: world_to_voxel(world, space.as_deref()),
            intensity: intensity_map(&sample_intensities(world, handles.stack.as_ref())),
            view,
            kind,
            button: Some(MouseButton::from_dom_code(pointer.button)),
            shift: pointer.shift,
            ctrl: pointer.ctrl || pointer.meta,
            alt: pointer.alt,
            timestamp: now_millis(),
        }
    }

    /// Arrows move in-plane (x, y), page keys move through planes (z).
    fn handle_key(&self, handles: &ViewerHandles, key: &KeyInput) -> Disposition {
        let step = if key.shift {
            self.settings.keyboard_fast_step
        } else {
            self.settings.keyboard_step
        };
        let (axis, delta) = match key.key.as_str() {
            "ArrowLeft" => (0, -step),
            "ArrowRight" => (0, step),
            "ArrowUp" => (1, step),
            "ArrowDown" => (1, -step),
            "PageUp" => (2, step),
            "PageDown" => (2, -step),
            _ => return Disposition::PassThrough,
        };
        let Some(mut coord) = handles.viewer.current_coord() else {
            return Disposition::PassThrough;
        };
        coord.0[axis] += delta;
        self.animator.jump(handles.viewer.as_ref(), coord);
        self.status.refresh(handles);
        Disposition::Handled
    }
}

#[cfg(test)]
#[path = "tests/bridge_tests.rs"]
mod tests;
