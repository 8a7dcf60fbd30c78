use std::time::Duration;

use shared::{
    domain::WorldCoord,
    error::{PayloadError, PayloadField},
    protocol::VolumeSpec,
};
use viewer_integration::headless::HeadlessToolkit;

use super::*;
use crate::tests_support::{colormap_name, config_with, ramp_volume, Harness};

fn background(handles: &ViewerHandles) -> LayerSnapshot {
    handles
        .stack
        .layer(&LayerId::new("background"))
        .expect("background layer")
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_construction() {
    let harness = Harness::with_toolkit(
        HeadlessToolkit::new().with_create_delay(Duration::from_millis(50)),
    );
    harness
        .session
        .set_config(Some(config_with(ramp_volume(4))))
        .await;

    let (first, second) = tokio::join!(
        harness.session.ensure_ready(),
        harness.session.ensure_ready()
    );
    let first = first.expect("first").expect("viewer");
    let second = second.expect("second").expect("viewer");

    assert!(Arc::ptr_eq(&first.viewer, &second.viewer));
    assert_eq!(harness.toolkit.viewers_created(), 1);

    let later = harness.session.ensure_ready().await.expect("later").expect("viewer");
    assert!(Arc::ptr_eq(&first.viewer, &later.viewer));
    assert_eq!(harness.toolkit.viewers_created(), 1);
}

#[tokio::test]
async fn resolves_empty_without_configuration_and_initializes_later() {
    let harness = Harness::new();
    assert!(harness.session.ensure_ready().await.expect("ok").is_none());
    assert_eq!(harness.toolkit.viewers_created(), 0);

    harness
        .session
        .set_config(Some(config_with(ramp_volume(2))))
        .await;
    assert!(harness.session.ensure_ready().await.expect("ok").is_some());
    assert_eq!(harness.toolkit.viewers_created(), 1);
}

#[tokio::test]
async fn malformed_configuration_fails_before_any_construction() {
    let harness = Harness::new();
    let broken = VolumeSpec {
        dim: None,
        data: Some(vec![0.0; 8]),
        ..VolumeSpec::default()
    };
    harness.session.set_config(Some(config_with(broken))).await;

    let err = harness.session.ensure_ready().await.err().expect("error");
    assert_eq!(
        err,
        SessionError::InvalidPayload(PayloadError::Missing(PayloadField::Dim))
    );
    assert_eq!(harness.toolkit.viewers_created(), 0);
    assert!(harness.session.handles().await.is_none());

    // The failure is kept: a corrected configuration does not retry.
    harness
        .session
        .set_config(Some(config_with(ramp_volume(2))))
        .await;
    assert_eq!(harness.session.ensure_ready().await.err(), Some(err));
    assert_eq!(harness.toolkit.viewers_created(), 0);
}

#[tokio::test]
async fn sample_count_mismatch_is_fatal() {
    let harness = Harness::new();
    harness
        .session
        .set_config(Some(config_with(VolumeSpec::new([2, 2, 2], vec![1.0; 7]))))
        .await;
    let err = harness.session.ensure_ready().await.err().expect("error");
    assert!(matches!(
        err,
        SessionError::InvalidPayload(PayloadError::SampleCount {
            expected: 8,
            actual: 7,
            ..
        })
    ));
}

#[tokio::test]
async fn background_range_prefers_configuration_then_volume_then_fallback() {
    let configured = Harness::new();
    let mut config = config_with(ramp_volume(4));
    config.bg_range = Some([5.0, 6.0]);
    let handles = configured.ready_with(config).await;
    assert_eq!(background(&handles).properties.range, [5.0, 6.0]);

    let all_zero = Harness::new();
    let handles = all_zero
        .ready_with(config_with(VolumeSpec::new([4, 4, 4], vec![0.0; 64])))
        .await;
    assert_eq!(background(&handles).properties.range, [0.0, 0.0]);

    let no_finite = Harness::new();
    let handles = no_finite
        .ready_with(config_with(VolumeSpec::new([1, 1, 2], vec![f64::NAN; 2])))
        .await;
    assert_eq!(background(&handles).properties.range, [0.0, 1.0]);
}

#[tokio::test]
async fn background_layer_uses_defaults_and_recovers_unknown_colormap() {
    let harness = Harness::new();
    let mut config = config_with(ramp_volume(2));
    config.bg_colormap = Some("NoSuchMap".into());
    let handles = harness.ready_with(config).await;

    let layer = background(&handles);
    assert_eq!(colormap_name(&layer), "Greys");
    assert_eq!(layer.properties.threshold, [0.0, 0.0]);
    assert_eq!(layer.properties.effective_opacity(), 1.0);
    assert_eq!(handles.image_layer.layer_ids(), vec![LayerId::new("background")]);

    let options = harness.viewer();
    assert_eq!(options.options().layout, Layout::LeftTall);
    assert!(options.options().show_crosshair && options.options().show_slider);
}

#[tokio::test(start_paused = true)]
async fn initialization_wires_panel_handlers_and_first_status() {
    let harness = Harness::new();
    let mut config = config_with(ramp_volume(4));
    config.show_sidebar = Some(false);
    harness.ready_with(config).await;

    assert!(harness.panel.has_viewer());
    assert_eq!(harness.panel.updates(), 1);
    assert!(!harness.panel.is_visible());
    assert!(harness.bridge.is_installed());

    harness.advance(20).await;
    let readout = harness.display.latest().expect("status shown");
    assert_eq!(readout.world, "L 1.0 | P 1.0 | S 1.0");
    assert_eq!(readout.voxel.as_deref(), Some("[1, 1, 1]"));
    assert_eq!(readout.intensity_text, "bg: 21.00");
    assert_eq!(readout.slice, "A:1/4 C:1/4 S:1/4");
}

#[tokio::test]
async fn resize_is_forwarded_only_once_a_viewer_exists() {
    let harness = Harness::new();
    harness.session.resize(640, 480).await;
    assert_eq!(harness.toolkit.viewers_created(), 0);

    harness.ready().await;
    harness.session.resize(800, 600).await;
    assert_eq!(harness.viewer().size(), Some((800, 600)));
}

#[tokio::test]
async fn resolve_layer_defaults_to_most_recent() {
    let harness = Harness::new();
    let handles = harness.ready().await;
    for id in ["a", "b", "c"] {
        harness
            .engine
            .apply(shared::protocol::Command::AddLayer {
                layer_id: Some(LayerId::new(id)),
                volume: Some(ramp_volume(2)),
                colormap: None,
                range: None,
                threshold: None,
                opacity: None,
            })
            .await
            .expect("add");
    }

    let last = ViewerSession::resolve_layer(&handles, None).expect("last");
    assert_eq!(last.id, LayerId::new("c"));
    let empty = LayerId::new("");
    assert_eq!(
        ViewerSession::resolve_layer(&handles, Some(&empty)).map(|l| l.id),
        Some(LayerId::new("c"))
    );
    assert_eq!(
        ViewerSession::resolve_layer(&handles, Some(&LayerId::new("a"))).map(|l| l.id),
        Some(LayerId::new("a"))
    );
    assert!(ViewerSession::resolve_layer(&handles, Some(&LayerId::new("zzz"))).is_none());
}

#[tokio::test]
async fn force_rerender_redraws_every_plane() {
    let harness = Harness::new();
    let handles = harness.ready().await;
    ViewerSession::force_rerender(&handles);
    let viewer = harness.viewer();
    for plane in ViewPlane::ALL {
        assert_eq!(viewer.render_count(plane), 1);
    }
    assert_eq!(
        handles.viewer.current_coord(),
        Some(WorldCoord::new(1.0, 1.0, 1.0))
    );
}

#[tokio::test]
async fn background_with_missing_samples_takes_its_range_from_the_rest() {
    let harness = Harness::new();
    let config = serde_json::from_value(serde_json::json!({
        "bg_volume": { "dim": [2, 2, 1], "data": [null, 3.0, 7.0, null] }
    }))
    .expect("config");
    let handles = harness.ready_with(config).await;
    assert_eq!(background(&handles).properties.range, [3.0, 7.0]);
}
