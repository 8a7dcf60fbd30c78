use serde_json::json;
use shared::domain::ViewPlane;
use viewer_integration::Viewer;

use super::*;
use crate::tests_support::{colormap_name, config_with, ramp_volume, Harness};

fn add_layer(id: Option<&str>, opacity: Option<f64>) -> Command {
    Command::AddLayer {
        layer_id: id.map(LayerId::new),
        volume: Some(ramp_volume(2)),
        colormap: None,
        range: None,
        threshold: None,
        opacity,
    }
}

fn get_layers(request_id: &str) -> Command {
    Command::GetLayers {
        request_id: Some(json!(request_id)),
    }
}

fn layer_ids(payload: &Value) -> Vec<String> {
    payload["layers"]
        .as_array()
        .expect("layers")
        .iter()
        .map(|layer| layer["id"].as_str().expect("id").to_string())
        .collect()
}

async fn layers_response(harness: &mut Harness) -> Value {
    harness.engine.apply(get_layers("q")).await.expect("get-layers");
    let mut responses = harness.events_named("viewer1_layers_response");
    assert_eq!(responses.len(), 1);
    responses.remove(0).payload
}

#[tokio::test]
async fn added_layer_is_reported_at_the_tail_with_its_opacity() {
    let mut harness = Harness::new();
    harness.ready().await;

    harness
        .engine
        .apply(add_layer(Some("overlay"), Some(0.4)))
        .await
        .expect("add");
    harness.engine.apply(add_layer(None, None)).await.expect("add");

    let payload = layers_response(&mut harness).await;
    assert_eq!(payload["request_id"], "q");
    let ids = layer_ids(&payload);
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], "background");
    assert_eq!(ids[1], "overlay");
    assert!(ids[2].starts_with("layer_"));

    let layers = payload["layers"].as_array().expect("layers");
    assert_eq!(layers[1]["opacity"], 0.4);
    assert_eq!(layers[1]["index"], 1);
    assert_eq!(layers[2]["opacity"], 1.0);
    assert_eq!(layers[2]["visible"], true);
    assert!(payload["timestamp"].as_i64().expect("timestamp") > 0);
}

#[tokio::test]
async fn add_layer_rerenders_and_refreshes_the_panel() {
    let harness = Harness::new();
    harness.ready().await;
    harness
        .engine
        .apply(add_layer(Some("overlay"), None))
        .await
        .expect("add");

    let viewer = harness.viewer();
    for plane in ViewPlane::ALL {
        assert_eq!(viewer.render_count(plane), 1);
    }
    assert_eq!(harness.panel.refreshes(), 1);
    assert_eq!(
        harness.panel.attached_layer_ids(),
        vec!["background".to_string(), "overlay".to_string()]
    );
}

#[tokio::test]
async fn add_layer_recovers_colormap_and_skips_bad_volumes() {
    let harness = Harness::new();
    let handles = harness.ready().await;

    harness
        .engine
        .apply(Command::AddLayer {
            layer_id: Some(LayerId::new("tinted")),
            volume: Some(ramp_volume(2)),
            colormap: Some("NotAPreset".into()),
            range: Some([1.0, 2.0]),
            threshold: Some([0.5, 0.6]),
            opacity: None,
        })
        .await
        .expect("add");
    let tinted = handles.stack.layer(&LayerId::new("tinted")).expect("tinted");
    assert_eq!(colormap_name(&tinted), "Greys");
    assert_eq!(tinted.properties.range, [1.0, 2.0]);
    assert_eq!(tinted.properties.threshold, [0.5, 0.6]);

    harness
        .engine
        .apply(Command::AddLayer {
            layer_id: Some(LayerId::new("broken")),
            volume: Some(VolumeSpec::new([2, 2, 2], vec![0.0; 3])),
            colormap: None,
            range: None,
            threshold: None,
            opacity: None,
        })
        .await
        .expect("add");
    harness
        .engine
        .apply(Command::AddLayer {
            layer_id: Some(LayerId::new("empty")),
            volume: None,
            colormap: None,
            range: None,
            threshold: None,
            opacity: None,
        })
        .await
        .expect("add");
    assert_eq!(handles.stack.len(), 2);
    assert_eq!(harness.panel.refreshes(), 1);
}

#[tokio::test]
async fn add_layer_with_missing_samples_is_kept() {
    let harness = Harness::new();
    let handles = harness.ready().await;

    let command = Command::from_value(json!({
        "type": "add-layer",
        "layer_id": "stats",
        "volume": { "dim": [2, 1, 1], "data": [2.5, null] }
    }));
    harness.engine.apply(command).await.expect("add");

    let stats = handles.stack.layer(&LayerId::new("stats")).expect("stats");
    assert_eq!(stats.properties.range, [2.5, 2.5]);
    assert_eq!(handles.stack.len(), 2);
    assert_eq!(harness.panel.refreshes(), 1);
}

#[tokio::test]
async fn removing_an_unknown_layer_changes_nothing() {
    let harness = Harness::new();
    let handles = harness.ready().await;
    harness
        .engine
        .apply(add_layer(Some("overlay"), None))
        .await
        .expect("add");
    let before = handles.stack.layer_ids();

    harness
        .engine
        .apply(Command::RemoveLayer {
            layer_id: Some(LayerId::new("missing")),
        })
        .await
        .expect("remove");
    harness
        .engine
        .apply(Command::RemoveLayer { layer_id: None })
        .await
        .expect("remove");
    assert_eq!(handles.stack.layer_ids(), before);
    assert_eq!(harness.panel.refreshes(), 1);

    harness
        .engine
        .apply(Command::RemoveLayer {
            layer_id: Some(LayerId::new("overlay")),
        })
        .await
        .expect("remove");
    assert_eq!(handles.stack.layer_ids(), vec![LayerId::new("background")]);
    assert_eq!(harness.panel.refreshes(), 2);
}

#[tokio::test]
async fn set_window_reaches_every_view_and_redraws() {
    let harness = Harness::new();
    let handles = harness.ready().await;
    let id = LayerId::new("background");

    harness
        .engine
        .apply(Command::SetWindow {
            layer_id: Some(id.clone()),
            range: Some([10.0, 200.0]),
        })
        .await
        .expect("set-window");

    assert_eq!(handles.stack.layer(&id).expect("layer").properties.range, [10.0, 200.0]);
    let viewer = harness.viewer();
    for plane in ViewPlane::ALL {
        let view = viewer.view_layer(plane).expect("view layer");
        assert_eq!(view.layer_properties(&id).expect("props").range, [10.0, 200.0]);
        assert_eq!(viewer.render_count(plane), 1);
    }

    harness
        .engine
        .apply(Command::SetWindow {
            layer_id: Some(id.clone()),
            range: None,
        })
        .await
        .expect("set-window");
    assert_eq!(viewer.render_count(ViewPlane::Axial), 1);
}

#[tokio::test]
async fn property_commands_target_the_last_layer_by_default() {
    let mut harness = Harness::new();
    let handles = harness.ready().await;
    harness
        .engine
        .apply(add_layer(Some("overlay"), Some(0.3)))
        .await
        .expect("add");

    for command in [
        Command::SetThreshold {
            layer_id: None,
            threshold: Some([2.0, 3.0]),
        },
        Command::SetColormap {
            layer_id: None,
            colormap: Some("viridis".into()),
        },
        Command::SetOpacity {
            layer_id: None,
            opacity: Some(1.7),
        },
        Command::SetLayerVisible {
            layer_id: None,
            visible: Some(false),
        },
    ] {
        harness.engine.apply(command).await.expect("apply");
    }

    let overlay = handles.stack.layer(&LayerId::new("overlay")).expect("overlay");
    assert_eq!(overlay.properties.threshold, [2.0, 3.0]);
    assert_eq!(colormap_name(&overlay), "Viridis");
    assert_eq!(overlay.properties.effective_opacity(), 1.0);
    assert!(!overlay.properties.is_visible());

    harness
        .engine
        .apply(Command::SetLayerVisible {
            layer_id: Some(LayerId::new("overlay")),
            visible: None,
        })
        .await
        .expect("visible");
    let payload = layers_response(&mut harness).await;
    assert_eq!(payload["layers"][1]["visible"], true);
}

#[tokio::test]
async fn unknown_colormap_leaves_the_layer_untouched() {
    let harness = Harness::new();
    let handles = harness.ready().await;
    harness
        .engine
        .apply(Command::SetColormap {
            layer_id: None,
            colormap: Some("Sparkles".into()),
        })
        .await
        .expect("set-colormap");
    let background = handles.stack.layer(&LayerId::new("background")).expect("bg");
    assert_eq!(colormap_name(&background), "Greys");
    assert_eq!(harness.viewer().render_count(ViewPlane::Axial), 0);
}

#[tokio::test]
async fn immediate_crosshair_is_reported_back() {
    let mut harness = Harness::new();
    harness.ready().await;

    harness
        .engine
        .apply(Command::SetCrosshair {
            coord: Some(vec![5.0, 5.0, 5.0]),
            animate: Some(false),
            duration: None,
        })
        .await
        .expect("set-crosshair");
    assert_eq!(harness.viewer().coord_history(), vec![WorldCoord::new(5.0, 5.0, 5.0)]);

    harness
        .engine
        .apply(Command::GetCrosshair {
            request_id: Some(json!(7)),
        })
        .await
        .expect("get-crosshair");
    let responses = harness.events_named("viewer1_crosshair_response");
    assert_eq!(responses.len(), 1);
    let payload = &responses[0].payload;
    assert_eq!(payload["world"], json!([5.0, 5.0, 5.0]));
    assert_eq!(payload["voxel"], json!([5, 5, 5]));
    assert_eq!(payload["request_id"], 7);
}

#[tokio::test]
async fn short_coordinates_are_ignored() {
    let harness = Harness::new();
    harness.ready().await;
    harness
        .engine
        .apply(Command::SetCrosshair {
            coord: Some(vec![1.0, 2.0]),
            animate: None,
            duration: None,
        })
        .await
        .expect("set-crosshair");
    assert!(harness.viewer().coord_history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn animated_crosshair_eases_to_the_target() {
    let harness = Harness::new();
    harness.ready().await;

    harness
        .engine
        .apply(Command::SetCrosshair {
            coord: Some(vec![11.0, 1.0, 1.0]),
            animate: Some(true),
            duration: None,
        })
        .await
        .expect("set-crosshair");
    harness.advance(600).await;

    let xs: Vec<f64> = harness
        .viewer()
        .coord_history()
        .iter()
        .map(|coord| coord.x())
        .collect();
    assert!(xs.len() > 10);
    assert!(xs.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(
        harness.viewer().current_coord(),
        Some(WorldCoord::new(11.0, 1.0, 1.0))
    );
}

#[tokio::test(start_paused = true)]
async fn zero_duration_or_reduced_motion_sets_immediately() {
    let harness = Harness::new();
    harness.ready().await;

    harness
        .engine
        .apply(Command::SetCrosshair {
            coord: Some(vec![3.0, 3.0, 3.0]),
            animate: Some(true),
            duration: Some(0.0),
        })
        .await
        .expect("set-crosshair");
    assert_eq!(harness.viewer().coord_history().len(), 1);

    harness.mount.set_reduced_motion(true);
    harness
        .engine
        .apply(Command::SetCrosshair {
            coord: Some(vec![0.0, 0.0, 0.0]),
            animate: Some(true),
            duration: Some(400.0),
        })
        .await
        .expect("set-crosshair");
    assert_eq!(
        harness.viewer().coord_history(),
        vec![WorldCoord::new(3.0, 3.0, 3.0), WorldCoord::ORIGIN]
    );
}

#[tokio::test]
async fn unknown_commands_do_not_stop_later_ones() {
    let harness = Harness::new();
    let handles = harness.ready().await;
    let before = handles.stack.layer_ids();

    harness.engine.apply(Command::Unknown).await.expect("unknown");
    assert_eq!(handles.stack.layer_ids(), before);
    assert_eq!(harness.viewer().render_count(ViewPlane::Coronal), 0);

    harness
        .engine
        .apply(add_layer(Some("after"), None))
        .await
        .expect("add");
    assert_eq!(handles.stack.len(), 2);
}

#[tokio::test]
async fn layer_order_moves_known_ids_and_skips_failures() {
    let harness = Harness::new();
    let handles = harness.ready().await;
    for id in ["a", "b"] {
        harness.engine.apply(add_layer(Some(id), None)).await.expect("add");
    }

    harness
        .engine
        .apply(Command::SetLayerOrder {
            layer_ids: Some(vec![LayerId::new("b"), LayerId::new("ghost"), LayerId::new("a")]),
        })
        .await
        .expect("order");

    assert_eq!(
        handles.stack.layer_ids(),
        vec![LayerId::new("b"), LayerId::new("background"), LayerId::new("a")]
    );
    assert_eq!(harness.viewer().render_count(ViewPlane::Sagittal), 3);
    assert_eq!(harness.panel.refreshes(), 3);
}

#[tokio::test]
async fn queries_need_a_connected_host() {
    let mut harness = Harness::new();
    harness.ready().await;
    harness.transport.set_connected(false);

    harness.engine.apply(get_layers("x")).await.expect("get-layers");
    harness
        .engine
        .apply(Command::GetCrosshair { request_id: None })
        .await
        .expect("get-crosshair");
    harness.transport.set_connected(true);

    assert!(harness.events_named("viewer1_layers_response").is_empty());
}

#[tokio::test]
async fn commands_before_configuration_are_dropped() {
    let harness = Harness::new();
    harness
        .engine
        .apply(add_layer(Some("early"), None))
        .await
        .expect("no error");
    assert_eq!(harness.toolkit.viewers_created(), 0);
}

#[tokio::test]
async fn failed_initialization_blocks_commands() {
    let harness = Harness::new();
    harness
        .session
        .set_config(Some(config_with(VolumeSpec::default())))
        .await;
    let err = harness
        .engine
        .apply(add_layer(Some("x"), None))
        .await
        .err()
        .expect("error");
    assert!(matches!(err, SessionError::InvalidPayload(_)));
}
