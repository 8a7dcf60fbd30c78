use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use futures::StreamExt;
use shared::protocol::{HostMessage, RoutedCommand};
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};
use viewer_integration::HostTransport;

use crate::widget::OrthoWidget;

/// Delivers out-of-band host commands (`{ "id": <mount>, "type": ... }`) to
/// the mounted widget they name.
pub struct CommandRouter {
    message: String,
    mounts: RwLock<HashMap<String, Weak<OrthoWidget>>>,
}

impl CommandRouter {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            mounts: RwLock::new(HashMap::new()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The router only keeps a weak reference; a dropped widget stops receiving commands.
    pub async fn register(&self, widget: &Arc<OrthoWidget>) {
        self.mounts
            .write()
            .await
            .insert(widget.id().to_string(), Arc::downgrade(widget));
    }

    pub async fn unregister(&self, mount_id: &str) -> bool {
        self.mounts.write().await.remove(mount_id).is_some()
    }

    pub async fn mounted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .mounts
            .read()
            .await
            .iter()
            .filter(|(_, widget)| widget.strong_count() > 0)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Applies one host message. Returns whether it reached a widget.
    pub async fn dispatch(&self, message: HostMessage) -> bool {
        if message.name != self.message {
            return false;
        }
        let Some(routed) = RoutedCommand::from_value(message.payload) else {
            debug!(message = %self.message, "command without a mount id ignored");
            return false;
        };

        let widget = self.mounts.read().await.get(&routed.id).and_then(Weak::upgrade);
        let Some(widget) = widget else {
            debug!(mount = %routed.id, "command for unknown mount ignored");
            self.prune(&routed.id).await;
            return false;
        };

        if let Err(err) = widget.apply_command(routed.command).await {
            warn!(mount = %routed.id, %err, "command not applied");
        }
        true
    }

    async fn prune(&self, mount_id: &str) {
        let mut mounts = self.mounts.write().await;
        if mounts
            .get(mount_id)
            .is_some_and(|widget| widget.strong_count() == 0)
        {
            mounts.remove(mount_id);
        }
    }

    /// Listens on `transport` until it closes, dispatching messages in arrival order.
    pub fn spawn(self: &Arc<Self>, transport: &dyn HostTransport) -> JoinHandle<()> {
        let router = Arc::clone(self);
        let mut messages = BroadcastStream::new(transport.subscribe_messages());
        tokio::spawn(async move {
            info!(message = %router.message, "command router listening");
            while let Some(next) = messages.next().await {
                match next {
                    Ok(message) => {
                        router.dispatch(message).await;
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "command router fell behind; host messages dropped");
                    }
                }
            }
            info!(message = %router.message, "command router stopped");
        })
    }
}
