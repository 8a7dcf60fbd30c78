use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::domain::WorldCoord;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::trace;
use viewer_integration::Viewer;

pub fn ease_out_cubic(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationOutcome {
    Completed,
    /// A newer coordinate request took over before this one finished.
    Superseded,
}

/// Crosshair transitions. Every coordinate request bumps a generation counter;
/// a running transition stops at its next frame once it is no longer current.
pub struct CrosshairAnimator {
    generation: Arc<AtomicU64>,
    frame: Duration,
}

impl CrosshairAnimator {
    pub fn new(frame: Duration) -> Self {
        Self {
            generation: Arc::new(AtomicU64::new(0)),
            frame,
        }
    }

    /// Sets `to` immediately, superseding any running transition.
    pub fn jump(&self, viewer: &dyn Viewer, to: WorldCoord) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        viewer.set_world_coord(to);
    }

    /// Eases from `from` to `to` over `duration_ms`. Falls back to [`Self::jump`]
    /// (and returns `None`) for reduced motion or a non-positive/non-finite duration.
    pub fn animate(
        &self,
        viewer: Arc<dyn Viewer>,
        from: WorldCoord,
        to: WorldCoord,
        duration_ms: f64,
        reduced_motion: bool,
    ) -> Option<JoinHandle<AnimationOutcome>> {
        if reduced_motion || !duration_ms.is_finite() || duration_ms <= 0.0 {
            self.jump(viewer.as_ref(), to);
            return None;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.generation);
        let frame = self.frame;
        Some(tokio::spawn(async move {
            let start = Instant::now();
            let mut frames = interval_at(start + frame, frame);
            frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                frames.tick().await;
                if current.load(Ordering::SeqCst) != generation {
                    trace!(generation, "crosshair transition superseded");
                    return AnimationOutcome::Superseded;
                }
                let t = (start.elapsed().as_secs_f64() * 1000.0 / duration_ms).min(1.0);
                if t >= 1.0 {
                    viewer.set_world_coord(to);
                    return AnimationOutcome::Completed;
                }
                viewer.set_world_coord(from.lerp(&to, ease_out_cubic(t)));
            }
        }))
    }
}
