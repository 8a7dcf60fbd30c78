use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};
use shared::{
    domain::{LayerId, WorldCoord},
    protocol::{HostMessage, WidgetConfig},
};
use tokio::sync::broadcast;
use viewer_core::{CommandRouter, Disposition, OrthoWidget, SessionError, WidgetSettings};
use viewer_integration::{
    headless::{HeadlessSurface, HeadlessToolkit, RecordingPanel, RecordingStatusDisplay},
    ChannelHostTransport, Interaction, KeyInput, MountSurface, Viewer,
};

const COMMAND_MESSAGE: &str = "ortho-viewer-command";

struct Mounted {
    mount: Arc<HeadlessSurface>,
    toolkit: Arc<HeadlessToolkit>,
    transport: Arc<ChannelHostTransport>,
    panel: Arc<RecordingPanel>,
    display: Arc<RecordingStatusDisplay>,
    widget: Arc<OrthoWidget>,
    events: broadcast::Receiver<HostMessage>,
}

fn mount(id: &str) -> Mounted {
    let mount = Arc::new(HeadlessSurface::new(id));
    let toolkit = Arc::new(HeadlessToolkit::new());
    let transport = Arc::new(ChannelHostTransport::new(512));
    let panel = Arc::new(RecordingPanel::new());
    let display = Arc::new(RecordingStatusDisplay::new());
    let events = transport.subscribe_events();
    let widget = OrthoWidget::new_with_dependencies(
        mount.clone(),
        toolkit.clone(),
        transport.clone(),
        panel.clone(),
        display.clone(),
        WidgetSettings::default(),
    );
    Mounted {
        mount,
        toolkit,
        transport,
        panel,
        display,
        widget,
        events,
    }
}

fn ramp(n: usize) -> Value {
    let data: Vec<f64> = (0..n * n * n).map(|v| v as f64).collect();
    json!({ "dim": [n, n, n], "data": data })
}

fn config(value: Value) -> WidgetConfig {
    serde_json::from_value(value).expect("config")
}

fn routed(payload: Value) -> HostMessage {
    HostMessage {
        name: COMMAND_MESSAGE.to_string(),
        payload,
    }
}

async fn next_named(events: &mut broadcast::Receiver<HostMessage>, name: &str) -> HostMessage {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let message = events.recv().await.expect("transport open");
            if message.name == name {
                return message;
            }
        }
    })
    .await
    .expect("event in time")
}

fn drain_named(events: &mut broadcast::Receiver<HostMessage>, name: &str) -> Vec<HostMessage> {
    let mut found = Vec::new();
    while let Ok(message) = events.try_recv() {
        if message.name == name {
            found.push(message);
        }
    }
    found
}

#[tokio::test]
async fn inline_commands_apply_in_order_and_host_queries_see_them() {
    let mut mounted = mount("viewer1");
    let router = Arc::new(CommandRouter::new(COMMAND_MESSAGE));
    router.register(&mounted.widget).await;
    let listener = router.spawn(mounted.transport.as_ref());

    mounted
        .widget
        .render_value(Some(config(json!({
            "bg_volume": ramp(4),
            "commands": [
                { "type": "add-layer", "layer_id": "seg", "volume": ramp(2), "opacity": 0.5 },
                { "type": "set-window", "range": [0, 10] },
                { "type": "not-a-command" },
                "garbage"
            ]
        }))))
        .await
        .expect("render");

    let viewer = mounted.toolkit.last_viewer().expect("viewer");
    let seg = viewer
        .image_layer()
        .layer_properties(&LayerId::new("seg"))
        .expect("seg");
    assert_eq!(seg.range, [0.0, 10.0]);
    assert_eq!(mounted.panel.refreshes(), 1);

    assert!(mounted.transport.push_message(
        COMMAND_MESSAGE,
        json!({ "id": "viewer1", "type": "get-layers", "request_id": "r1" }),
    ));
    let response = next_named(&mut mounted.events, "viewer1_layers_response").await;
    assert_eq!(response.payload["request_id"], "r1");
    assert_eq!(response.payload["layers"][0]["id"], "background");
    assert_eq!(response.payload["layers"][1]["id"], "seg");
    assert_eq!(response.payload["layers"][1]["opacity"], 0.5);

    listener.abort();
}

#[tokio::test]
async fn router_only_delivers_to_live_named_mounts() {
    let mounted = mount("viewer1");
    let router = CommandRouter::new(COMMAND_MESSAGE);
    router.register(&mounted.widget).await;
    assert_eq!(router.mounted().await, vec!["viewer1".to_string()]);

    let query = json!({ "id": "viewer1", "type": "get-layers" });
    assert!(router.dispatch(routed(query.clone())).await);
    assert!(
        !router
            .dispatch(HostMessage {
                name: "something-else".into(),
                payload: query.clone(),
            })
            .await
    );
    assert!(!router.dispatch(routed(json!({ "type": "get-layers" }))).await);
    assert!(
        !router
            .dispatch(routed(json!({ "id": "viewer2", "type": "get-layers" })))
            .await
    );

    let Mounted { widget, .. } = mounted;
    drop(widget);
    assert!(router.mounted().await.is_empty());
    assert!(!router.dispatch(routed(query)).await);
    assert!(!router.unregister("viewer1").await);
}

#[tokio::test]
async fn commands_wait_for_configuration_and_renders_reuse_the_viewer() {
    let mounted = mount("viewer1");
    mounted
        .widget
        .apply_command(shared::protocol::Command::GetLayers { request_id: None })
        .await
        .expect("dropped quietly");
    mounted.widget.render_value(None).await.expect("no config");
    assert_eq!(mounted.toolkit.viewers_created(), 0);
    assert!(mounted.widget.ensure_ready().await.expect("ok").is_none());

    let value = json!({ "bg_volume": ramp(3), "show_sidebar": false });
    mounted
        .widget
        .render_value(Some(config(value.clone())))
        .await
        .expect("render");
    mounted
        .widget
        .render_value(Some(config(value)))
        .await
        .expect("re-render");
    assert_eq!(mounted.toolkit.viewers_created(), 1);
    assert!(!mounted.panel.is_visible());

    mounted.widget.resize(320, 200).await;
    let viewer = mounted.toolkit.last_viewer().expect("viewer");
    assert_eq!(viewer.size(), Some((320, 200)));
}

#[tokio::test]
async fn malformed_background_fails_every_later_command() {
    let mounted = mount("viewer1");
    let err = mounted
        .widget
        .render_value(Some(config(json!({
            "bg_volume": { "dim": [2, 2], "data": [0, 1, 2, 3] }
        }))))
        .await
        .expect_err("bad dim");
    assert!(matches!(err, SessionError::InvalidPayload(_)));

    let again = mounted
        .widget
        .apply_command(shared::protocol::Command::GetLayers { request_id: None })
        .await;
    assert_eq!(again, Err(err));
    assert_eq!(mounted.toolkit.viewers_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn animated_crosshair_lands_exactly_and_is_reported() {
    let mut mounted = mount("viewer1");
    let router = CommandRouter::new(COMMAND_MESSAGE);
    router.register(&mounted.widget).await;
    mounted
        .widget
        .render_value(Some(config(json!({ "bg_volume": ramp(8) }))))
        .await
        .expect("render");

    router
        .dispatch(routed(json!({
            "id": "viewer1",
            "type": "set-crosshair",
            "coord": [6, 2, 5],
            "animate": true,
            "duration": 200
        })))
        .await;
    tokio::time::sleep(Duration::from_millis(450)).await;

    router
        .dispatch(routed(json!({ "id": "viewer1", "type": "get-crosshair", "request_id": 9 })))
        .await;
    let responses = drain_named(&mut mounted.events, "viewer1_crosshair_response");
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].payload["world"], json!([6.0, 2.0, 5.0]));
    assert_eq!(responses[0].payload["voxel"], json!([6, 2, 5]));
    assert_eq!(responses[0].payload["request_id"], 9);

    let readout = mounted.widget.status().expect("status");
    assert_eq!(readout.world, "L 6.0 | P 2.0 | S 5.0");
}

#[tokio::test(start_paused = true)]
async fn keyboard_needs_a_viewer_and_shutdown_silences_events() {
    let mut mounted = mount("viewer1");
    assert_eq!(
        mounted
            .widget
            .handle_interaction(Interaction::KeyDown(KeyInput::new("ArrowUp")))
            .await,
        None
    );

    mounted
        .widget
        .render_value(Some(config(json!({ "bg_volume": ramp(4) }))))
        .await
        .expect("render");
    assert_eq!(
        mounted
            .widget
            .handle_interaction(Interaction::KeyDown(KeyInput::new("ArrowUp")))
            .await,
        Some(Disposition::Handled)
    );
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!drain_named(&mut mounted.events, "viewer1_crosshair").is_empty());
    assert!(mounted.display.shown() > 0);

    mounted.widget.shutdown();
    let viewer = mounted.toolkit.last_viewer().expect("viewer");
    viewer.set_world_coord(WorldCoord::new(0.0, 0.0, 0.0));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(drain_named(&mut mounted.events, "viewer1_crosshair").is_empty());
    assert!(mounted.mount.is_attached());
}

#[tokio::test(start_paused = true)]
async fn widget_without_a_host_still_tracks_the_viewer() {
    let toolkit = Arc::new(HeadlessToolkit::new());
    let widget = OrthoWidget::new(
        Arc::new(HeadlessSurface::new("offline")),
        toolkit.clone(),
        WidgetSettings::default(),
    );
    widget
        .render_value(Some(config(json!({
            "bg_volume": ramp(4),
            "commands": [
                { "type": "set-crosshair", "coord": [3, 2, 0] },
                { "type": "get-crosshair", "request_id": 1 }
            ]
        }))))
        .await
        .expect("render");

    let viewer = toolkit.last_viewer().expect("viewer");
    assert_eq!(viewer.current_coord(), Some(WorldCoord::new(3.0, 2.0, 0.0)));
    tokio::time::sleep(Duration::from_millis(300)).await;
    let readout = widget.status().expect("status");
    assert_eq!(readout.world, "L 3.0 | P 2.0 | S 0.0");
}
