//! Command-and-synchronization engine for an orthogonal (three-plane) volume viewer
//! embedded in a host application.

use std::sync::{Mutex, MutexGuard};

pub mod animator;
pub mod bridge;
pub mod commands;
pub mod config;
pub mod error;
pub mod resolver;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod widget;

pub use bridge::Disposition;
pub use config::{load_settings, WidgetSettings};
pub use error::SessionError;
pub use router::CommandRouter;
pub use session::ViewerHandles;
pub use widget::OrthoWidget;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
