//! Status readout: display strings for the crosshair/pointer position, and the
//! reporter that pushes them to the status display at most once per frame.

use std::sync::{Arc, Mutex};

use shared::domain::{VoxelCoord, WorldCoord};
use viewer_integration::{IntensityItem, SliceInfo, StatusDisplay, StatusReadout};

use crate::{
    lock,
    resolver::{pointer_coord, sample_intensities, world_to_voxel, LayerSample},
    scheduler::FrameCoalescer,
    session::ViewerHandles,
};

pub const PLACEHOLDER: &str = "—";

fn magnitude(value: f64) -> String {
    if value.is_finite() {
        format!("{:.1}", value.abs())
    } else {
        PLACEHOLDER.to_string()
    }
}

fn axis(value: f64, positive: &str, negative: &str) -> String {
    // Non-finite values keep the positive label so that only the magnitude degrades.
    let label = if value >= 0.0 || !value.is_finite() {
        positive
    } else {
        negative
    };
    format!("{label} {}", magnitude(value))
}

/// `L|R x | P|A y | S|I z`; positive x is left, positive y posterior, positive z superior.
pub fn format_world(coord: Option<WorldCoord>) -> String {
    match coord {
        Some(coord) => format!(
            "{} | {} | {}",
            axis(coord.x(), "L", "R"),
            axis(coord.y(), "P", "A"),
            axis(coord.z(), "S", "I")
        ),
        None => format!("L {PLACEHOLDER} | P {PLACEHOLDER} | S {PLACEHOLDER}"),
    }
}

pub fn format_voxel(voxel: Option<VoxelCoord>) -> String {
    match voxel {
        Some(VoxelCoord([i, j, k])) => format!("[{i}, {j}, {k}]"),
        None => format!("[{PLACEHOLDER}, {PLACEHOLDER}, {PLACEHOLDER}]"),
    }
}

pub fn format_intensity(value: Option<f64>) -> String {
    match value {
        Some(value) if value.is_finite() => format!("{value:.2}"),
        _ => PLACEHOLDER.to_string(),
    }
}

/// `bg` for the bottom layer, `L1`, `L2`, ... for overlays.
pub fn intensity_label(index: usize) -> String {
    if index == 0 {
        "bg".to_string()
    } else {
        format!("L{index}")
    }
}

pub fn intensity_items(samples: &[LayerSample]) -> Vec<IntensityItem> {
    samples
        .iter()
        .enumerate()
        .map(|(index, sample)| IntensityItem {
            label: intensity_label(index),
            value: format_intensity(sample.value),
        })
        .collect()
}

pub fn format_intensities(samples: &[LayerSample]) -> String {
    if samples.is_empty() {
        return PLACEHOLDER.to_string();
    }
    intensity_items(samples)
        .iter()
        .map(|item| format!("{}: {}", item.label, item.value))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_slices(info: Option<SliceInfo>) -> String {
    match info {
        Some(info) => format!(
            "A:{}/{} C:{}/{} S:{}/{}",
            info.axial.index,
            info.axial.total,
            info.coronal.index,
            info.coronal.total,
            info.sagittal.index,
            info.sagittal.total
        ),
        None => PLACEHOLDER.to_string(),
    }
}

pub fn accessible_label(world: &str, voxel: &str, intensities: &str, slice: &str) -> String {
    format!("World {world}, Voxel {voxel}, Value {intensities}, Slice {slice}")
}

/// Builds the readout for wherever the pointer (or else the crosshair) is.
pub fn build_readout(handles: &ViewerHandles) -> StatusReadout {
    let coord = pointer_coord(handles.viewer.as_ref());
    let space = handles.image_layer.reference_space();
    let voxel = format_voxel(world_to_voxel(coord, space.as_deref()));
    let samples = if coord.is_some() {
        sample_intensities(coord, handles.stack.as_ref())
    } else {
        Vec::new()
    };
    let world = format_world(coord);
    let intensity_text = format_intensities(&samples);
    let slice = format_slices(handles.viewer.slice_info());
    StatusReadout {
        accessible_label: accessible_label(&world, &voxel, &intensity_text, &slice),
        world,
        voxel: Some(voxel),
        intensities: intensity_items(&samples),
        intensity_text,
        slice,
    }
}

/// Pushes readouts to the status display; requests made before the next frame collapse into one.
pub struct StatusReporter {
    display: Arc<dyn StatusDisplay>,
    frame: FrameCoalescer,
    latest: Mutex<Option<StatusReadout>>,
}

impl StatusReporter {
    pub fn new(display: Arc<dyn StatusDisplay>, frame: std::time::Duration) -> Self {
        Self {
            display,
            frame: FrameCoalescer::new(frame),
            latest: Mutex::new(None),
        }
    }

    /// Refreshes right away.
    pub fn refresh(&self, handles: &ViewerHandles) -> StatusReadout {
        let readout = build_readout(handles);
        self.display.show(&readout);
        *lock(&self.latest) = Some(readout.clone());
        readout
    }

    /// Refreshes on the next frame. Returns false when a refresh is already queued.
    pub fn refresh_soon(self: &Arc<Self>, handles: &ViewerHandles) -> bool {
        let reporter = Arc::clone(self);
        let handles = handles.clone();
        self.frame.request(move || {
            reporter.refresh(&handles);
        })
    }

    pub fn latest(&self) -> Option<StatusReadout> {
        lock(&self.latest).clone()
    }
}
