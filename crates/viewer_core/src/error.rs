use shared::error::PayloadError;
use thiserror::Error;

/// Fatal viewer construction failure. Cloned to every caller awaiting the same
/// initialization, so underlying errors are carried as rendered text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),
    #[error("failed to build background volume: {0}")]
    Volume(String),
    #[error("failed to compose image layer: {0}")]
    Compose(String),
    #[error("failed to create viewer: {0}")]
    ViewerCreation(String),
}

impl SessionError {
    pub(crate) fn volume(err: anyhow::Error) -> Self {
        SessionError::Volume(format!("{err:#}"))
    }

    pub(crate) fn compose(err: anyhow::Error) -> Self {
        SessionError::Compose(format!("{err:#}"))
    }

    pub(crate) fn viewer_creation(err: anyhow::Error) -> Self {
        SessionError::ViewerCreation(format!("{err:#}"))
    }
}
